use super::Dynamics;
use crate::celestia::{Celestial, Cosm, Frame};
use crate::errors::AstroError;
use crate::linalg::{DVector, Vector3};
use crate::state::{cartesian_position, cartesian_velocity, SubsetRef};
use crate::time::Epoch;
use std::any::Any;
use std::sync::Arc;

/// Point-mass gravity of the central body, plus its harmonic expansion when
/// the body carries one.
///
/// The harmonic perturbation is evaluated in the body-fixed frame and rotated
/// back into the integration frame.
#[derive(Clone, Debug)]
pub struct CentralBodyGravity {
    pub celestial: Arc<Celestial>,
    cosm: Arc<Cosm>,
}

impl CentralBodyGravity {
    pub fn new(celestial: Arc<Celestial>, cosm: Arc<Cosm>) -> Result<Arc<Self>, AstroError> {
        if !celestial.gm.is_finite() || celestial.gm <= 0.0 {
            return Err(AstroError::ModelUndefined(format!(
                "{} has no gravitational model",
                celestial.name
            )));
        }
        Ok(Arc::new(Self { celestial, cosm }))
    }
}

impl Dynamics for CentralBodyGravity {
    fn read_subsets(&self) -> Vec<SubsetRef> {
        vec![cartesian_position()]
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
        let rmag = r.norm();
        let mut accel = -self.celestial.gm / rmag.powi(3) * r;

        if let Some(harmonics) = self.celestial.harmonics() {
            let body_frame = self.celestial.body_fixed_frame.ok_or_else(|| {
                AstroError::ModelUndefined(format!(
                    "{} carries harmonics but no body-fixed frame",
                    self.celestial.name
                ))
            })?;
            let xf = self.cosm.transform(frame, body_frame, epoch)?;
            let (r_bf, _) = xf.apply(&r, &Vector3::zeros());
            let accel_bf = harmonics.acceleration(&r_bf);
            accel += xf.rotation.inverse() * accel_bf;
        }

        Ok(DVector::from_vec(vec![accel[0], accel[1], accel[2]]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Differential gravity of a third body: the attraction on the spacecraft
/// minus the attraction on the integration center.
#[derive(Clone, Debug)]
pub struct ThirdBodyGravity {
    pub celestial: Arc<Celestial>,
    cosm: Arc<Cosm>,
}

impl ThirdBodyGravity {
    /// Rejects the central body itself: its gravity is already the
    /// central-body contribution.
    pub fn new(celestial: Arc<Celestial>, cosm: Arc<Cosm>) -> Result<Arc<Self>, AstroError> {
        if !celestial.has_ephemeris() {
            return Err(AstroError::SetupInvalid(format!(
                "{} cannot be a third body: it is the integration center",
                celestial.name
            )));
        }
        if !celestial.gm.is_finite() || celestial.gm <= 0.0 {
            return Err(AstroError::ModelUndefined(format!(
                "{} has no gravitational model",
                celestial.name
            )));
        }
        Ok(Arc::new(Self { celestial, cosm }))
    }
}

impl Dynamics for ThirdBodyGravity {
    fn read_subsets(&self) -> Vec<SubsetRef> {
        vec![cartesian_position()]
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
        // Third body in the integration frame
        let d = self.celestial.position_in(frame, epoch, &self.cosm)?;
        // Third body relative to the spacecraft
        let rho = d - r;
        let accel = self.celestial.gm * (rho / rho.norm().powi(3) - d / d.norm().powi(3));
        Ok(DVector::from_vec(vec![accel[0], accel[1], accel[2]]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::J2000_OFFSET;

    #[test]
    fn central_body_matches_point_mass() {
        let cosm = Cosm::standard();
        let gravity = CentralBodyGravity::new(cosm.earth(), cosm.clone()).unwrap();
        let epoch = Epoch::from_mjd_tai(J2000_OFFSET);
        let accel = gravity
            .contribute(epoch, &DVector::from_vec(vec![7e6, 0.0, 0.0]), Frame::Gcrf)
            .unwrap();
        let expected = -cosm.earth().gm / 7e6_f64.powi(2);
        assert!((accel[0] - expected).abs() < 1e-12);
        assert!(accel[1].abs() < 1e-15 && accel[2].abs() < 1e-15);
    }

    #[test]
    fn third_body_rejects_the_center() {
        let cosm = Cosm::standard();
        match ThirdBodyGravity::new(cosm.earth(), cosm.clone()) {
            Err(AstroError::SetupInvalid(_)) => (),
            other => panic!("expected setup-invalid, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn third_body_differential_is_small_near_the_center() {
        let cosm = Cosm::standard();
        let sun_gravity = ThirdBodyGravity::new(cosm.sun(), cosm.clone()).unwrap();
        let epoch = Epoch::from_mjd_tai(J2000_OFFSET);
        let accel = sun_gravity
            .contribute(epoch, &DVector::from_vec(vec![7e6, 0.0, 0.0]), Frame::Gcrf)
            .unwrap();
        let magnitude = (accel[0].powi(2) + accel[1].powi(2) + accel[2].powi(2)).sqrt();
        // Differential solar acceleration in LEO is below 1e-6 m/s^2
        assert!(magnitude > 0.0 && magnitude < 1e-6, "got {:.3e}", magnitude);
    }
}
