use crate::celestia::{Cosm, Frame};
use crate::dynamics::{
    system_of_equations, AtmosphericDrag, CentralBodyGravity, Dynamics, DynamicsContext,
    PositionDerivative, Thruster,
};
use crate::errors::AstroError;
use crate::propagators::{ConditionSolution, NumericalSolver};
use crate::propagators::events::EventCondition;
use crate::state::{CoordinateBroker, State, StateBuilder};
use crate::time::Epoch;
use std::sync::Arc;

/// All propagations are integrated in this frame; inputs are converted on the
/// way in and restored to the caller's frame on the way out.
pub const INTEGRATION_FRAME: Frame = Frame::Gcrf;

/// Composes registered dynamics into one system of equations and drives the
/// numerical solver forward or backward.
///
/// Construction registers every dynamics' read and write subsets with a fresh
/// coordinate broker, records the (offset, size) contexts, and enforces the
/// composition validity rules. The broker never changes afterwards.
#[derive(Debug)]
pub struct Propagator {
    cosm: Arc<Cosm>,
    solver: NumericalSolver,
    contexts: Vec<DynamicsContext>,
    broker: Arc<CoordinateBroker>,
}

impl Clone for Propagator {
    fn clone(&self) -> Self {
        Self {
            cosm: self.cosm.clone(),
            solver: self.solver.clone(),
            contexts: self.contexts.clone(),
            broker: self.broker.clone(),
        }
    }
}

impl Propagator {
    pub fn new(
        cosm: Arc<Cosm>,
        solver: NumericalSolver,
        dynamics: &[Arc<dyn Dynamics>],
    ) -> Result<Self, AstroError> {
        let mut broker = CoordinateBroker::new();
        let mut contexts = Vec::with_capacity(dynamics.len());
        for dynamics in dynamics {
            let read_info = dynamics
                .read_subsets()
                .iter()
                .map(|subset| (broker.add_subset(subset), subset.size()))
                .collect();
            let write_info = dynamics
                .write_subsets()
                .iter()
                .map(|subset| (broker.add_subset(subset), subset.size()))
                .collect();
            contexts.push(DynamicsContext {
                dynamics: dynamics.clone(),
                read_info,
                write_info,
            });
        }

        let propagator = Self {
            cosm,
            solver,
            contexts,
            broker: Arc::new(broker),
        };
        propagator.validate_dynamics_set()?;
        Ok(propagator)
    }

    /// Two-body point-mass dynamics around the Earth, the minimal valid set.
    pub fn two_body(cosm: Arc<Cosm>, solver: NumericalSolver) -> Result<Self, AstroError> {
        let dynamics: Vec<Arc<dyn Dynamics>> = vec![
            PositionDerivative::new(),
            CentralBodyGravity::new(cosm.earth(), cosm.clone())?,
        ];
        Self::new(cosm, solver, &dynamics)
    }

    /// Enforces the composition validity rules: exactly one position
    /// derivative, exactly one central-body gravity, at most one drag, at
    /// most one thruster.
    fn validate_dynamics_set(&self) -> Result<(), AstroError> {
        let count = |pred: &dyn Fn(&dyn Dynamics) -> bool| {
            self.contexts
                .iter()
                .filter(|context| pred(context.dynamics.as_ref()))
                .count()
        };

        let gravity = count(&|d| d.as_any().is::<CentralBodyGravity>());
        if gravity != 1 {
            return Err(AstroError::SetupInvalid(format!(
                "a propagator needs exactly one central-body gravity, found {}",
                gravity
            )));
        }
        let kinematics = count(&|d| d.as_any().is::<PositionDerivative>());
        if kinematics != 1 {
            return Err(AstroError::SetupInvalid(format!(
                "a propagator needs exactly one position derivative, found {}",
                kinematics
            )));
        }
        let drag = count(&|d| d.as_any().is::<AtmosphericDrag>());
        if drag > 1 {
            return Err(AstroError::SetupInvalid(format!(
                "a propagator can have at most one atmospheric drag, found {}",
                drag
            )));
        }
        let thrusters = count(&|d| d.as_any().is::<Thruster>());
        if thrusters > 1 {
            return Err(AstroError::SetupInvalid(format!(
                "a propagator can have at most one thruster, found {}",
                thrusters
            )));
        }
        Ok(())
    }

    pub fn broker(&self) -> &Arc<CoordinateBroker> {
        &self.broker
    }

    pub fn solver(&self) -> &NumericalSolver {
        &self.solver
    }

    pub fn dynamics(&self) -> Vec<Arc<dyn Dynamics>> {
        self.contexts
            .iter()
            .map(|context| context.dynamics.clone())
            .collect()
    }

    pub fn cosm(&self) -> &Arc<Cosm> {
        &self.cosm
    }

    /// Reshapes the caller's state into the integration frame and this
    /// propagator's broker layout.
    fn reduce(&self, state: &State) -> Result<State, AstroError> {
        let in_frame = state.in_frame(INTEGRATION_FRAME, &self.cosm)?;
        StateBuilder::from_broker(INTEGRATION_FRAME, self.broker.clone()).reduce(&in_frame)
    }

    /// Restores a solver output into the caller's frame and layout.
    fn expand(&self, solved: &State, caller: &State) -> Result<State, AstroError> {
        let in_caller_frame = solved.in_frame(caller.frame, &self.cosm)?;
        StateBuilder::from_state(caller).expand(&in_caller_frame, caller)
    }

    /// Propagates the state to a single instant, forward or backward.
    pub fn calculate_state_at(&self, state: &State, target: Epoch) -> Result<State, AstroError> {
        let input = self.reduce(state)?;
        let system = system_of_equations(&self.contexts, input.epoch, INTEGRATION_FRAME);
        let output = self.solver.integrate_time(&input, target, &system)?;
        self.expand(&output, state)
    }

    /// Propagates the state to every requested instant, in the caller's
    /// order. The instants must be sorted ascending; those before the state's
    /// epoch are reached backward, the others forward.
    pub fn calculate_states_at(
        &self,
        state: &State,
        instants: &[Epoch],
    ) -> Result<Vec<State>, AstroError> {
        if instants.is_empty() {
            return Ok(Vec::new());
        }
        for pair in instants.windows(2) {
            if pair[0] > pair[1] {
                return Err(AstroError::UnsortedInstants);
            }
        }

        let input = self.reduce(state)?;
        let start = input.epoch;
        let system = system_of_equations(&self.contexts, start, INTEGRATION_FRAME);

        let mut backward: Vec<Epoch> = instants
            .iter()
            .copied()
            .filter(|epoch| *epoch <= start)
            .collect();
        let forward: Vec<Epoch> = instants
            .iter()
            .copied()
            .filter(|epoch| *epoch > start)
            .collect();

        // Backward instants are integrated in reverse order, then restored
        backward.reverse();
        let mut backward_states = if backward.is_empty() {
            Vec::new()
        } else {
            self.solver.integrate_times(&input, &backward, &system)?
        };
        backward_states.reverse();

        let forward_states = if forward.is_empty() {
            Vec::new()
        } else {
            self.solver.integrate_times(&input, &forward, &system)?
        };

        backward_states
            .into_iter()
            .chain(forward_states.into_iter())
            .map(|solved| self.expand(&solved, state))
            .collect()
    }

    /// Propagates the state until the event condition is satisfied or the
    /// maximum instant is reached; the returned state matches the caller's
    /// frame and subset layout.
    pub fn calculate_state_to_condition(
        &self,
        state: &State,
        max_instant: Epoch,
        condition: &dyn EventCondition,
    ) -> Result<ConditionSolution, AstroError> {
        let input = self.reduce(state)?;
        let system = system_of_equations(&self.contexts, input.epoch, INTEGRATION_FRAME);
        let mut solution = self
            .solver
            .integrate_to_condition(&input, max_instant, condition, &system)?;
        solution.state = self.expand(&solution.state, state)?;
        Ok(solution)
    }

    /// The accepted intermediate states of the last propagation, in the
    /// integration frame and broker layout, when state logging is enabled on
    /// the solver.
    pub fn observed_states(&self) -> Vec<State> {
        self.solver.observed_states()
    }
}
