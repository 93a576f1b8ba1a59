use super::Dynamics;
use crate::celestia::{Celestial, Cosm, Frame};
use crate::errors::AstroError;
use crate::linalg::{DVector, Vector3};
use crate::state::{
    cartesian_position, cartesian_velocity, drag_coefficient, mass, surface_area, SubsetRef,
};
use crate::time::Epoch;
use std::any::Any;
use std::sync::Arc;

/// Cannonball atmospheric drag.
///
/// `a = -1/2 Cd A rho(r, t) |v_rel| v_rel / m` with `v_rel = v - omega x r`,
/// the velocity relative to the co-rotating atmosphere. The spacecraft
/// parameters (mass, area, drag coefficient) are read out of the state
/// vector, so a propagation with drag carries them as coordinate subsets.
#[derive(Clone, Debug)]
pub struct AtmosphericDrag {
    pub celestial: Arc<Celestial>,
    cosm: Arc<Cosm>,
}

impl AtmosphericDrag {
    pub fn new(celestial: Arc<Celestial>, cosm: Arc<Cosm>) -> Result<Arc<Self>, AstroError> {
        if celestial.atmosphere().is_none() {
            return Err(AstroError::ModelUndefined(format!(
                "{} has no atmospheric model",
                celestial.name
            )));
        }
        Ok(Arc::new(Self { celestial, cosm }))
    }
}

impl Dynamics for AtmosphericDrag {
    fn read_subsets(&self) -> Vec<SubsetRef> {
        vec![
            cartesian_position(),
            cartesian_velocity(),
            mass(),
            surface_area(),
            drag_coefficient(),
        ]
    }

    fn write_subsets(&self) -> Vec<SubsetRef> {
        vec![cartesian_velocity()]
    }

    fn contribute(
        &self,
        epoch: Epoch,
        coordinates: &DVector<f64>,
        frame: Frame,
    ) -> Result<DVector<f64>, AstroError> {
        let r = Vector3::new(coordinates[0], coordinates[1], coordinates[2]);
        let v = Vector3::new(coordinates[3], coordinates[4], coordinates[5]);
        let sc_mass = coordinates[6];
        let sc_area = coordinates[7];
        let cd = coordinates[8];

        if sc_mass <= 0.0 {
            return Err(AstroError::MassDepleted);
        }

        let atmosphere = self.celestial.atmosphere().ok_or_else(|| {
            AstroError::ModelUndefined(format!("{} has no atmospheric model", self.celestial.name))
        })?;

        // Density is computed at the body-fixed position
        let rho = match self.celestial.body_fixed_frame {
            Some(body_frame) => {
                let xf = self.cosm.transform(frame, body_frame, epoch)?;
                let (r_bf, _) = xf.apply(&r, &Vector3::zeros());
                atmosphere.density(&r_bf, epoch)
            }
            None => atmosphere.density(&r, epoch),
        };

        // Atmosphere co-rotates with the body
        let omega = Vector3::new(0.0, 0.0, self.celestial.rotation_rate);
        let v_rel = v - omega.cross(&r);

        let accel = -0.5 * cd * sc_area * rho * v_rel.norm() * v_rel / sc_mass;
        Ok(DVector::from_vec(vec![accel[0], accel[1], accel[2]]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
