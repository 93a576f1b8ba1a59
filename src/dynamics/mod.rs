use crate::celestia::Frame;
use crate::errors::AstroError;
use crate::linalg::DVector;
use crate::state::{cartesian_position, cartesian_velocity, SubsetRef};
use crate::time::Epoch;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The gravity module provides the central-body and third-body dynamics.
pub mod gravity;

/// The drag module provides cannonball atmospheric drag against the central
/// body's atmosphere model.
pub mod drag;

/// The thrustctrl module provides the thruster dynamics and the guidance laws
/// steering it.
pub mod thrustctrl;

pub use drag::AtmosphericDrag;
pub use gravity::{CentralBodyGravity, ThirdBodyGravity};
pub use thrustctrl::{
    ConstantLocalDirection, GuidanceLaw, QLaw, QLawParameters, Thruster, STD_GRAVITY,
};

/// A dynamics contributes partial derivatives to a subset of the state
/// vector, reading another (possibly overlapping) subset.
///
/// Contributions are pure: the propagator evaluates every registered dynamics
/// at each stage of the integrator and accumulates the partials additively
/// into a zero-initialized derivative vector. Writes of several dynamics to
/// the same subset therefore sum.
pub trait Dynamics: fmt::Debug + Send + Sync {
    /// The coordinate subsets this dynamics reads, in the order its
    /// `contribute` expects them concatenated.
    fn read_subsets(&self) -> Vec<SubsetRef>;

    /// The coordinate subsets this dynamics writes, in the order its
    /// `contribute` returns them concatenated.
    fn write_subsets(&self) -> Vec<SubsetRef>;

    /// Evaluates the partial derivatives of the write subsets, given the read
    /// coordinates expressed in the integration frame at the provided epoch.
    fn contribute(
        &self,
        epoch: Epoch,
        coordinates: &DVector<f64>,
        frame: Frame,
    ) -> Result<DVector<f64>, AstroError>;

    /// Downcasting hook used by the propagator to enforce the composition
    /// validity rules.
    fn as_any(&self) -> &dyn Any;
}

/// The kinematic coupling: d(position)/dt = velocity.
///
/// Every propagation needs exactly one of these.
#[derive(Clone, Debug)]
pub struct PositionDerivative;

impl PositionDerivative {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Dynamics for PositionDerivative {
    fn read_subsets(&self) -> Vec<SubsetRef> {
        vec![cartesian_velocity()]
    }

    fn write_subsets(&self) -> Vec<SubsetRef> {
        vec![cartesian_position()]
    }

    fn contribute(
        &self,
        _epoch: Epoch,
        coordinates: &DVector<f64>,
        _frame: Frame,
    ) -> Result<DVector<f64>, AstroError> {
        Ok(coordinates.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A dynamics bound to the offsets of its read and write subsets inside the
/// propagator's coordinate broker. Built once during propagator setup.
#[derive(Clone, Debug)]
pub struct DynamicsContext {
    pub dynamics: Arc<dyn Dynamics>,
    /// (offset, size) of each read subset in the full state vector
    pub read_info: Vec<(usize, usize)>,
    /// (offset, size) of each write subset in the full state vector
    pub write_info: Vec<(usize, usize)>,
}

/// Builds the system of equations over the registered dynamics contexts.
///
/// The returned closure maps (seconds past the start epoch, full coordinate
/// vector) to the accumulated derivative vector, and propagates any dynamics
/// evaluation error unchanged.
pub fn system_of_equations<'a>(
    contexts: &'a [DynamicsContext],
    start_epoch: Epoch,
    frame: Frame,
) -> impl Fn(f64, &DVector<f64>) -> Result<DVector<f64>, AstroError> + 'a {
    move |t: f64, x: &DVector<f64>| {
        let epoch = start_epoch + t;
        let mut dxdt = DVector::<f64>::zeros(x.len());
        for context in contexts {
            let read_size: usize = context.read_info.iter().map(|(_, size)| size).sum();
            let mut read = Vec::with_capacity(read_size);
            for (offset, size) in &context.read_info {
                read.extend_from_slice(&x.as_slice()[*offset..offset + size]);
            }
            let contribution = context
                .dynamics
                .contribute(epoch, &DVector::from_vec(read), frame)?;
            let mut cursor = 0;
            for (offset, size) in &context.write_info {
                for i in 0..*size {
                    dxdt[offset + i] += contribution[cursor + i];
                }
                cursor += size;
            }
        }
        Ok(dxdt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CoordinateBroker;

    #[test]
    fn contributions_to_the_same_subset_are_additive() {
        // Two position derivatives both writing d(position)/dt = velocity
        let mut broker = CoordinateBroker::new();
        let first = PositionDerivative::new();
        let mut contexts = Vec::new();
        for _ in 0..2 {
            let dynamics: Arc<dyn Dynamics> = first.clone();
            let read_info: Vec<(usize, usize)> = dynamics
                .read_subsets()
                .iter()
                .map(|s| (broker.add_subset(s), s.size()))
                .collect();
            let write_info: Vec<(usize, usize)> = dynamics
                .write_subsets()
                .iter()
                .map(|s| (broker.add_subset(s), s.size()))
                .collect();
            contexts.push(DynamicsContext {
                dynamics,
                read_info,
                write_info,
            });
        }

        let epoch = Epoch::from_mjd_tai(crate::time::J2000_OFFSET);
        let system = system_of_equations(&contexts, epoch, Frame::Gcrf);
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
        let dxdt = system(0.0, &x).unwrap();
        // Velocity occupies the first block (it was registered first), the
        // position derivative is written twice
        assert_eq!(dxdt.as_slice()[3..6], [2.0, 4.0, 6.0]);
    }
}
