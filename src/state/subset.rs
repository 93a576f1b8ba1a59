use super::broker::CoordinateBroker;
use crate::celestia::{Cosm, Frame};
use crate::errors::AstroError;
use crate::linalg::{DVector, Vector3};
use crate::time::Epoch;
use crate::utils::between_pm_pi;
use std::fmt;
use std::sync::Arc;

/// A shared handle on a coordinate subset descriptor.
pub type SubsetRef = Arc<dyn CoordinateSubset>;

/// A named, sized block of coordinates inside a flat state vector.
///
/// Subsets define how their coordinates combine (`add`/`subtract`) and how
/// they move between reference frames. The defaults are element-wise
/// arithmetic and an identity frame conversion, which is correct for scalar
/// quantities such as mass. Subset identity is by name.
pub trait CoordinateSubset: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> usize;

    fn add(&self, this: &[f64], other: &[f64]) -> Vec<f64> {
        this.iter().zip(other).map(|(a, b)| a + b).collect()
    }

    fn subtract(&self, this: &[f64], other: &[f64]) -> Vec<f64> {
        this.iter().zip(other).map(|(a, b)| a - b).collect()
    }

    /// Expresses this subset's coordinates in another frame.
    ///
    /// The full coordinate vector and its broker are provided because some
    /// subsets (velocities) transform jointly with others (positions).
    fn in_frame(
        &self,
        _epoch: Epoch,
        coordinates: &DVector<f64>,
        broker: &CoordinateBroker,
        _from: Frame,
        _to: Frame,
        _cosm: &Cosm,
    ) -> Result<Vec<f64>, AstroError> {
        Ok(broker.extract_raw(coordinates, self.name())?.to_vec())
    }
}

/// Cartesian position in meters, transformed by rotation and translation.
#[derive(Debug)]
pub struct CartesianPosition;

/// Cartesian velocity in meters per second, transformed jointly with the
/// Cartesian position of the same state.
#[derive(Debug)]
pub struct CartesianVelocity;

/// A scalar coordinate with element-wise arithmetic (mass, area, drag
/// coefficient, equinoctial elements, ...).
#[derive(Debug)]
pub struct ScalarSubset {
    name: String,
}

/// A scalar angle in radians whose arithmetic wraps into (-pi, pi].
#[derive(Debug)]
pub struct AngularSubset {
    name: String,
}

/// An opaque multi-coordinate block with default arithmetic.
#[derive(Debug)]
pub struct GenericSubset {
    name: String,
    size: usize,
}

impl ScalarSubset {
    pub fn new<S: Into<String>>(name: S) -> SubsetRef {
        Arc::new(Self { name: name.into() })
    }
}

impl AngularSubset {
    pub fn new<S: Into<String>>(name: S) -> SubsetRef {
        Arc::new(Self { name: name.into() })
    }
}

impl GenericSubset {
    pub fn new<S: Into<String>>(name: S, size: usize) -> SubsetRef {
        Arc::new(Self {
            name: name.into(),
            size,
        })
    }
}

fn transformed_pos_vel(
    epoch: Epoch,
    coordinates: &DVector<f64>,
    broker: &CoordinateBroker,
    from: Frame,
    to: Frame,
    cosm: &Cosm,
) -> Result<(Vector3<f64>, Vector3<f64>), AstroError> {
    let r = broker.extract_raw(coordinates, CartesianPosition.name())?;
    let r = Vector3::new(r[0], r[1], r[2]);
    // A state without a velocity still has a well-defined position transform
    let v = match broker.extract_raw(coordinates, CartesianVelocity.name()) {
        Ok(v) => Vector3::new(v[0], v[1], v[2]),
        Err(_) => Vector3::zeros(),
    };
    let xf = cosm.transform(from, to, epoch)?;
    Ok(xf.apply(&r, &v))
}

impl CoordinateSubset for CartesianPosition {
    fn name(&self) -> &str {
        "CARTESIAN_POSITION"
    }

    fn size(&self) -> usize {
        3
    }

    fn in_frame(
        &self,
        epoch: Epoch,
        coordinates: &DVector<f64>,
        broker: &CoordinateBroker,
        from: Frame,
        to: Frame,
        cosm: &Cosm,
    ) -> Result<Vec<f64>, AstroError> {
        let (r, _) = transformed_pos_vel(epoch, coordinates, broker, from, to, cosm)?;
        Ok(vec![r[0], r[1], r[2]])
    }
}

impl CoordinateSubset for CartesianVelocity {
    fn name(&self) -> &str {
        "CARTESIAN_VELOCITY"
    }

    fn size(&self) -> usize {
        3
    }

    fn in_frame(
        &self,
        epoch: Epoch,
        coordinates: &DVector<f64>,
        broker: &CoordinateBroker,
        from: Frame,
        to: Frame,
        cosm: &Cosm,
    ) -> Result<Vec<f64>, AstroError> {
        let (_, v) = transformed_pos_vel(epoch, coordinates, broker, from, to, cosm)?;
        Ok(vec![v[0], v[1], v[2]])
    }
}

impl CoordinateSubset for ScalarSubset {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        1
    }
}

impl CoordinateSubset for AngularSubset {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        1
    }

    fn add(&self, this: &[f64], other: &[f64]) -> Vec<f64> {
        vec![between_pm_pi(this[0] + other[0])]
    }

    fn subtract(&self, this: &[f64], other: &[f64]) -> Vec<f64> {
        vec![between_pm_pi(this[0] - other[0])]
    }
}

impl CoordinateSubset for GenericSubset {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.size
    }
}

lazy_static! {
    static ref POSITION: SubsetRef = Arc::new(CartesianPosition);
    static ref VELOCITY: SubsetRef = Arc::new(CartesianVelocity);
    static ref MASS: SubsetRef = ScalarSubset::new("MASS");
    static ref SURFACE_AREA: SubsetRef = ScalarSubset::new("SURFACE_AREA");
    static ref DRAG_COEFFICIENT: SubsetRef = ScalarSubset::new("DRAG_COEFFICIENT");
}

/// The shared Cartesian position descriptor (meters).
pub fn cartesian_position() -> SubsetRef {
    POSITION.clone()
}

/// The shared Cartesian velocity descriptor (meters per second).
pub fn cartesian_velocity() -> SubsetRef {
    VELOCITY.clone()
}

/// The shared mass descriptor (kilograms).
pub fn mass() -> SubsetRef {
    MASS.clone()
}

/// The shared drag surface area descriptor (square meters).
pub fn surface_area() -> SubsetRef {
    SURFACE_AREA.clone()
}

/// The shared drag coefficient descriptor (dimensionless).
pub fn drag_coefficient() -> SubsetRef {
    DRAG_COEFFICIENT.clone()
}
