use crate::celestia::{Cosm, Frame};
use crate::errors::AstroError;
use crate::linalg::{DVector, Vector3};
use crate::time::Epoch;
use std::fmt;
use std::sync::Arc;

pub mod broker;
pub mod subset;

pub use broker::CoordinateBroker;
pub use subset::{
    cartesian_position, cartesian_velocity, drag_coefficient, mass, surface_area, AngularSubset,
    CartesianPosition, CartesianVelocity, CoordinateSubset, GenericSubset, ScalarSubset, SubsetRef,
};

/// A heterogeneous state vector at an instant, expressed in a frame and
/// labeled by a coordinate broker.
///
/// The broker is shared immutably between every state of a propagation: the
/// coordinate layout never changes once integration has started.
#[derive(Clone)]
pub struct State {
    pub epoch: Epoch,
    pub frame: Frame,
    coordinates: DVector<f64>,
    broker: Arc<CoordinateBroker>,
}

impl State {
    pub fn new(
        epoch: Epoch,
        frame: Frame,
        coordinates: DVector<f64>,
        broker: Arc<CoordinateBroker>,
    ) -> Result<Self, AstroError> {
        if coordinates.len() != broker.width() {
            return Err(AstroError::SetupInvalid(format!(
                "state has {} coordinates but its broker is {} wide",
                coordinates.len(),
                broker.width()
            )));
        }
        Ok(Self {
            epoch,
            frame,
            coordinates,
            broker,
        })
    }

    /// Builds a Cartesian position/velocity state with its own two-subset broker.
    pub fn cartesian(
        epoch: Epoch,
        frame: Frame,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
    ) -> Self {
        let broker = Arc::new(CoordinateBroker::from_subsets(&[
            cartesian_position(),
            cartesian_velocity(),
        ]));
        Self {
            epoch,
            frame,
            coordinates: DVector::from_vec(vec![
                position[0],
                position[1],
                position[2],
                velocity[0],
                velocity[1],
                velocity[2],
            ]),
            broker,
        }
    }

    pub fn coordinates(&self) -> &DVector<f64> {
        &self.coordinates
    }

    pub fn broker(&self) -> &Arc<CoordinateBroker> {
        &self.broker
    }

    /// Returns a copy of the coordinates of the provided subset.
    pub fn extract(&self, subset: &SubsetRef) -> Result<DVector<f64>, AstroError> {
        let values = self.broker.extract_raw(&self.coordinates, subset.name())?;
        Ok(DVector::from_column_slice(values))
    }

    /// Concatenates the coordinates of the provided subsets, in their order.
    pub fn extract_many(&self, subsets: &[SubsetRef]) -> Result<DVector<f64>, AstroError> {
        let mut values = Vec::new();
        for subset in subsets {
            values.extend_from_slice(self.broker.extract_raw(&self.coordinates, subset.name())?);
        }
        Ok(DVector::from_vec(values))
    }

    pub fn position(&self) -> Result<Vector3<f64>, AstroError> {
        let r = self
            .broker
            .extract_raw(&self.coordinates, "CARTESIAN_POSITION")?;
        Ok(Vector3::new(r[0], r[1], r[2]))
    }

    pub fn velocity(&self) -> Result<Vector3<f64>, AstroError> {
        let v = self
            .broker
            .extract_raw(&self.coordinates, "CARTESIAN_VELOCITY")?;
        Ok(Vector3::new(v[0], v[1], v[2]))
    }

    pub fn mass(&self) -> Result<f64, AstroError> {
        Ok(self.broker.extract_raw(&self.coordinates, "MASS")?[0])
    }

    /// Magnitude of the position vector, in meters.
    pub fn rmag(&self) -> Result<f64, AstroError> {
        Ok(self.position()?.norm())
    }

    /// Magnitude of the velocity vector, in meters per second.
    pub fn vmag(&self) -> Result<f64, AstroError> {
        Ok(self.velocity()?.norm())
    }

    /// Expresses this state in the target frame, transforming each subset.
    pub fn in_frame(&self, target: Frame, cosm: &Cosm) -> Result<State, AstroError> {
        if target == self.frame {
            return Ok(self.clone());
        }
        let mut coordinates = Vec::with_capacity(self.broker.width());
        for subset in self.broker.subsets() {
            let converted = subset.in_frame(
                self.epoch,
                &self.coordinates,
                &self.broker,
                self.frame,
                target,
                cosm,
            )?;
            coordinates.extend_from_slice(&converted);
        }
        Ok(State {
            epoch: self.epoch,
            frame: target,
            coordinates: DVector::from_vec(coordinates),
            broker: self.broker.clone(),
        })
    }

    /// Adds a deviation in this state's coordinate layout, subset by subset.
    pub fn apply_deviation(&self, deviation: &DVector<f64>) -> State {
        let mut coordinates = Vec::with_capacity(self.broker.width());
        let mut offset = 0;
        for subset in self.broker.subsets() {
            let size = subset.size();
            let this = &self.coordinates.as_slice()[offset..offset + size];
            let other = &deviation.as_slice()[offset..offset + size];
            coordinates.extend_from_slice(&subset.add(this, other));
            offset += size;
        }
        State {
            epoch: self.epoch,
            frame: self.frame,
            coordinates: DVector::from_vec(coordinates),
            broker: self.broker.clone(),
        }
    }

    /// Subset-wise difference `self (-) other`, in this state's layout.
    ///
    /// The other state must carry every subset of this state (it may carry
    /// more). Angular subsets wrap their residual.
    pub fn subtract(&self, other: &State) -> Result<DVector<f64>, AstroError> {
        let mut values = Vec::with_capacity(self.broker.width());
        let mut offset = 0;
        for subset in self.broker.subsets() {
            let size = subset.size();
            let this = &self.coordinates.as_slice()[offset..offset + size];
            let that = other
                .broker
                .extract_raw(&other.coordinates, subset.name())?;
            values.extend_from_slice(&subset.subtract(this, that));
            offset += size;
        }
        Ok(DVector::from_vec(values))
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.epoch == other.epoch
            && self.frame == other.frame
            && *self.broker == *other.broker
            && self.coordinates == other.coordinates
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "State [{} @ {}] {:?}: {:?}",
            self.frame,
            self.epoch,
            self.broker,
            self.coordinates.as_slice()
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{} @ {}]", self.frame, self.epoch)?;
        for subset in self.broker.subsets() {
            let values = self
                .broker
                .extract_raw(&self.coordinates, subset.name())
                .expect("broker and coordinates out of sync");
            write!(f, " {}={:?}", subset.name(), values)?;
        }
        Ok(())
    }
}

/// Builds states in a fixed (frame, broker) shape, and reshapes states
/// between broker layouts.
#[derive(Clone, Debug)]
pub struct StateBuilder {
    pub frame: Frame,
    broker: Arc<CoordinateBroker>,
}

impl StateBuilder {
    pub fn new(frame: Frame, subsets: &[SubsetRef]) -> Self {
        Self {
            frame,
            broker: Arc::new(CoordinateBroker::from_subsets(subsets)),
        }
    }

    pub fn from_broker(frame: Frame, broker: Arc<CoordinateBroker>) -> Self {
        Self { frame, broker }
    }

    /// A builder with the same frame and layout as the provided state.
    pub fn from_state(state: &State) -> Self {
        Self {
            frame: state.frame,
            broker: state.broker().clone(),
        }
    }

    pub fn broker(&self) -> &Arc<CoordinateBroker> {
        &self.broker
    }

    pub fn build(&self, epoch: Epoch, coordinates: DVector<f64>) -> Result<State, AstroError> {
        State::new(epoch, self.frame, coordinates, self.broker.clone())
    }

    /// Reshapes a state into this builder's layout, taking each of this
    /// builder's subsets from the provided state.
    ///
    /// Fails with an undefined-input error when the state is missing one of
    /// the required subsets. The state must already be in this builder's
    /// frame.
    pub fn reduce(&self, state: &State) -> Result<State, AstroError> {
        let mut coordinates = Vec::with_capacity(self.broker.width());
        for subset in self.broker.subsets() {
            coordinates
                .extend_from_slice(state.broker().extract_raw(state.coordinates(), subset.name())?);
        }
        State::new(
            state.epoch,
            self.frame,
            DVector::from_vec(coordinates),
            self.broker.clone(),
        )
    }

    /// Reshapes a solved state into this builder's layout, taking each subset
    /// from the solved state when it carries it, and from the default state
    /// otherwise.
    pub fn expand(&self, solved: &State, defaults: &State) -> Result<State, AstroError> {
        let mut coordinates = Vec::with_capacity(self.broker.width());
        for subset in self.broker.subsets() {
            match solved.broker().extract_raw(solved.coordinates(), subset.name()) {
                Ok(values) => coordinates.extend_from_slice(values),
                Err(_) => coordinates.extend_from_slice(
                    defaults
                        .broker()
                        .extract_raw(defaults.coordinates(), subset.name())?,
                ),
            }
        }
        State::new(
            solved.epoch,
            self.frame,
            DVector::from_vec(coordinates),
            self.broker.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celestia::Cosm;
    use crate::time::{Epoch, J2000_OFFSET};

    fn j2000() -> Epoch {
        Epoch::from_mjd_tai(J2000_OFFSET)
    }

    #[test]
    fn state_width_must_match_broker() {
        let broker = Arc::new(CoordinateBroker::from_subsets(&[cartesian_position()]));
        assert!(State::new(j2000(), Frame::Gcrf, DVector::zeros(4), broker).is_err());
    }

    #[test]
    fn extract_and_helpers() {
        let state = State::cartesian(
            j2000(),
            Frame::Gcrf,
            Vector3::new(7e6, 0.0, 0.0),
            Vector3::new(0.0, 7.5e3, 0.0),
        );
        assert_eq!(state.rmag().unwrap(), 7e6);
        assert_eq!(state.vmag().unwrap(), 7.5e3);
        let pv = state
            .extract_many(&[cartesian_velocity(), cartesian_position()])
            .unwrap();
        assert_eq!(pv[1], 7.5e3);
        assert_eq!(pv[3], 7e6);
        assert!(state.mass().is_err());
    }

    #[test]
    fn reduce_and_expand_round_trip() {
        let mut subsets = vec![cartesian_position(), cartesian_velocity(), mass()];
        let full_builder = StateBuilder::new(Frame::Gcrf, &subsets);
        let full = full_builder
            .build(
                j2000(),
                DVector::from_vec(vec![7e6, 1.0, 2.0, 0.0, 7.5e3, 0.0, 250.0]),
            )
            .unwrap();

        subsets.truncate(2);
        let reduced = StateBuilder::new(Frame::Gcrf, &subsets).reduce(&full).unwrap();
        assert_eq!(reduced.coordinates().len(), 6);

        let expanded = full_builder.expand(&reduced, &full).unwrap();
        assert_eq!(expanded, full);
    }

    #[test]
    fn frame_round_trip_is_machine_precision() {
        let cosm = Cosm::standard();
        let state = State::cartesian(
            j2000(),
            Frame::Gcrf,
            Vector3::new(7e6, -1.2e5, 3.4e5),
            Vector3::new(12.0, 7.5e3, -3.0),
        );
        let there = state.in_frame(Frame::IauEarth, &cosm).unwrap();
        let back = there.in_frame(Frame::Gcrf, &cosm).unwrap();
        let dr = (back.position().unwrap() - state.position().unwrap()).norm();
        let dv = (back.velocity().unwrap() - state.velocity().unwrap()).norm();
        assert!(dr < 1e-6, "position round trip error {:.3e} m", dr);
        assert!(dv < 1e-9, "velocity round trip error {:.3e} m/s", dv);
    }

    #[test]
    fn subtract_wraps_angles_and_matches_layout() {
        let builder = StateBuilder::new(
            Frame::Gcrf,
            &[mass(), AngularSubset::new("TRUE_LONGITUDE")],
        );
        let a = builder
            .build(j2000(), DVector::from_vec(vec![100.0, 3.1]))
            .unwrap();
        let b = builder
            .build(j2000(), DVector::from_vec(vec![90.0, -3.1]))
            .unwrap();
        let delta = a.subtract(&b).unwrap();
        assert_eq!(delta[0], 10.0);
        assert!((delta[1] - (6.2 - 2.0 * std::f64::consts::PI)).abs() < 1e-12);
    }
}
