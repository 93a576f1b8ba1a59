use super::propagator::Propagator;
use crate::celestia::Cosm;
use crate::dynamics::{Dynamics, Thruster, STD_GRAVITY};
use crate::errors::AstroError;
use crate::propagators::events::{EventCondition, TargetKind};
use crate::propagators::NumericalSolver;
use crate::state::State;
use crate::time::{Duration, Epoch};
use std::fmt;
use std::sync::Arc;

/// Whether a segment coasts or maneuvers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentKind {
    Coast,
    Maneuver,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SegmentKind::Coast => write!(f, "coast"),
            SegmentKind::Maneuver => write!(f, "maneuver"),
        }
    }
}

/// An event-bounded propagation phase.
///
/// A coast segment carries no live thruster; a maneuver segment carries
/// exactly one. Solving a segment propagates its dynamics until the event
/// condition is satisfied or the caller's duration bound is reached.
pub struct Segment {
    pub name: String,
    pub kind: SegmentKind,
    condition: Arc<dyn EventCondition>,
    dynamics: Vec<Arc<dyn Dynamics>>,
    solver: NumericalSolver,
    cosm: Arc<Cosm>,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Segment {{ {} ({}) until {:?}, {} dynamics }}",
            self.name,
            self.kind,
            self.condition,
            self.dynamics.len()
        )
    }
}

impl Segment {
    /// A coast: rejects any live thruster in the dynamics.
    pub fn coast<S: Into<String>>(
        name: S,
        condition: Arc<dyn EventCondition>,
        dynamics: Vec<Arc<dyn Dynamics>>,
        solver: NumericalSolver,
        cosm: Arc<Cosm>,
    ) -> Result<Self, AstroError> {
        for dyn_ref in &dynamics {
            if let Some(thruster) = dyn_ref.as_any().downcast_ref::<Thruster>() {
                if thruster.is_live() {
                    return Err(AstroError::SetupInvalid(
                        "a coast segment cannot carry a live thruster".to_string(),
                    ));
                }
            }
        }
        Ok(Self {
            name: name.into(),
            kind: SegmentKind::Coast,
            condition,
            dynamics,
            solver,
            cosm,
        })
    }

    /// A maneuver: the provided thruster joins the dynamics, which must not
    /// already contain one.
    pub fn maneuver<S: Into<String>>(
        name: S,
        condition: Arc<dyn EventCondition>,
        thruster: Arc<Thruster>,
        dynamics: Vec<Arc<dyn Dynamics>>,
        solver: NumericalSolver,
        cosm: Arc<Cosm>,
    ) -> Result<Self, AstroError> {
        if dynamics
            .iter()
            .any(|dyn_ref| dyn_ref.as_any().is::<Thruster>())
        {
            return Err(AstroError::SetupInvalid(
                "a maneuver segment carries exactly one thruster".to_string(),
            ));
        }
        let mut dynamics = dynamics;
        dynamics.push(thruster);
        Ok(Self {
            name: name.into(),
            kind: SegmentKind::Maneuver,
            condition,
            dynamics,
            solver,
            cosm,
        })
    }

    pub fn condition(&self) -> &Arc<dyn EventCondition> {
        &self.condition
    }

    pub fn dynamics(&self) -> &[Arc<dyn Dynamics>] {
        &self.dynamics
    }

    /// Solves the segment from the provided state, bounded by `max_duration`.
    ///
    /// An unsatisfied condition at the bound is not an error: it is reported
    /// on the solution record.
    pub fn solve(&self, state: &State, max_duration: Duration) -> Result<SegmentSolution, AstroError> {
        if max_duration.in_seconds() <= 0.0 {
            return Err(AstroError::UndefinedInput(
                "segment duration bound must be positive".to_string(),
            ));
        }

        if self.condition.target_kind() == TargetKind::RelativeSegmentStart {
            self.condition.resolve_target(state);
        }

        let propagator = Propagator::new(self.cosm.clone(), self.solver.clone(), &self.dynamics)?;
        let solution =
            propagator.calculate_state_to_condition(state, state.epoch + max_duration, self.condition.as_ref())?;

        if !solution.condition_is_satisfied {
            warn!(
                "segment {} reached its duration bound without satisfying {}",
                self.name,
                self.condition.name()
            );
        }

        // Initial state, dense output (when observed), then the terminal state
        let mut states = vec![state.clone()];
        for observed in propagator.observed_states() {
            if observed.epoch > state.epoch && observed.epoch < solution.state.epoch {
                states.push(propagator_expand(&propagator, &observed, state)?);
            }
        }
        states.push(solution.state.clone());

        Ok(SegmentSolution {
            name: self.name.clone(),
            kind: self.kind,
            states,
            condition_is_satisfied: solution.condition_is_satisfied,
            dynamics: self.dynamics.clone(),
        })
    }
}

fn propagator_expand(
    propagator: &Propagator,
    observed: &State,
    caller: &State,
) -> Result<State, AstroError> {
    use crate::state::StateBuilder;
    let in_caller_frame = observed.in_frame(caller.frame, propagator.cosm())?;
    StateBuilder::from_state(caller).expand(&in_caller_frame, caller)
}

/// The record of a solved segment: the dense states, the terminal state, and
/// whether the event condition was reached.
#[derive(Clone, Debug)]
pub struct SegmentSolution {
    pub name: String,
    pub kind: SegmentKind,
    /// Observed states (when state logging is enabled on the solver) plus the
    /// terminal state, in monotonic time order
    pub states: Vec<State>,
    pub condition_is_satisfied: bool,
    /// The dynamics that were active over this segment
    pub dynamics: Vec<Arc<dyn Dynamics>>,
}

impl SegmentSolution {
    pub fn start_instant(&self) -> Epoch {
        self.states.first().expect("empty segment solution").epoch
    }

    pub fn end_instant(&self) -> Epoch {
        self.states.last().expect("empty segment solution").epoch
    }

    pub fn last_state(&self) -> &State {
        self.states.last().expect("empty segment solution")
    }

    pub fn propagation_duration(&self) -> Duration {
        self.end_instant() - self.start_instant()
    }

    /// Mass at the start of the segment, when the states carry one.
    pub fn initial_mass(&self) -> Option<f64> {
        self.states.first().and_then(|state| state.mass().ok())
    }

    pub fn final_mass(&self) -> Option<f64> {
        self.states.last().and_then(|state| state.mass().ok())
    }

    pub fn delta_mass(&self) -> Option<f64> {
        Some(self.initial_mass()? - self.final_mass()?)
    }

    /// Delta-v from the rocket equation, for the provided specific impulse.
    pub fn delta_v(&self, isp: f64) -> Option<f64> {
        let m0 = self.initial_mass()?;
        let m1 = self.final_mass()?;
        if m0 <= 0.0 || m1 <= 0.0 {
            return None;
        }
        Some(isp * STD_GRAVITY * (m0 / m1).ln())
    }
}
