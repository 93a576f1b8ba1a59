use crate::celestia::{Cosm, Frame, Orbit, TrajectoryModel};
use crate::dynamics::Dynamics;
use crate::errors::AstroError;
use crate::linalg::DVector;
use crate::md::Propagator;
use crate::propagators::NumericalSolver;
use crate::state::{State, StateBuilder, SubsetRef};
use crate::time::Epoch;
use std::fmt;
use std::sync::Arc;

/// Jacobians and state transition matrices by finite differences.
pub mod finite_diff;

/// The Levenberg-Marquardt nonlinear least-squares solver.
pub mod least_squares;

/// TLE-parameter orbit determination over an SGP4 evaluator.
pub mod tle;

pub use finite_diff::{FiniteDifferenceSolver, StepType};
pub use least_squares::{Analysis, LeastSquaresSolver, SigmaMap, TerminationCriteria};
pub use tle::{InitialGuess, TleAnalysis, TleSolver};

/// The outcome of a Cartesian orbit determination.
#[derive(Clone, Debug)]
pub struct OdAnalysis {
    pub estimated_state: State,
    pub solver_analysis: Analysis,
}

/// Cartesian-state orbit determination: fits an initial state to observed
/// states by propagating candidate states through the dynamics.
///
/// The propagator is the least-squares state generator; the estimation frame
/// is the frame the fit runs in, and observations are converted into it
/// before solving.
pub struct OrbitDeterminationSolver {
    cosm: Arc<Cosm>,
    solver: LeastSquaresSolver,
    propagator: Propagator,
    pub estimation_frame: Frame,
}

impl fmt::Debug for OrbitDeterminationSolver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "OrbitDeterminationSolver {{ {} dynamics, estimating in {} }}",
            self.propagator.dynamics().len(),
            self.estimation_frame
        )
    }
}

impl OrbitDeterminationSolver {
    /// Two-body dynamics around the Earth; use [`Self::with_dynamics`] for a
    /// richer force model.
    pub fn new(
        cosm: Arc<Cosm>,
        numerical_solver: NumericalSolver,
        solver: LeastSquaresSolver,
        estimation_frame: Frame,
    ) -> Result<Self, AstroError> {
        let propagator = Propagator::two_body(cosm.clone(), numerical_solver)?;
        Ok(Self {
            cosm,
            solver,
            propagator,
            estimation_frame,
        })
    }

    pub fn with_dynamics(
        cosm: Arc<Cosm>,
        numerical_solver: NumericalSolver,
        solver: LeastSquaresSolver,
        estimation_frame: Frame,
        dynamics: &[Arc<dyn Dynamics>],
    ) -> Result<Self, AstroError> {
        let propagator = Propagator::new(cosm.clone(), numerical_solver, dynamics)?;
        Ok(Self {
            cosm,
            solver,
            propagator,
            estimation_frame,
        })
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// Estimates the state at the initial guess's epoch which best fits the
    /// observations.
    pub fn estimate(
        &self,
        initial_guess: &State,
        observations: &[State],
        initial_guess_sigmas: &SigmaMap,
        observation_sigmas: &SigmaMap,
    ) -> Result<OdAnalysis, AstroError> {
        self.estimate_with_subsets(
            initial_guess,
            observations,
            initial_guess_sigmas,
            observation_sigmas,
            None,
        )
    }

    /// As [`Self::estimate`], optionally restricting the estimated parameters
    /// to the provided coordinate subsets (the others stay at the guess).
    pub fn estimate_with_subsets(
        &self,
        initial_guess: &State,
        observations: &[State],
        initial_guess_sigmas: &SigmaMap,
        observation_sigmas: &SigmaMap,
        estimation_subsets: Option<&[SubsetRef]>,
    ) -> Result<OdAnalysis, AstroError> {
        let guess = initial_guess.in_frame(self.estimation_frame, &self.cosm)?;
        let observations: Vec<State> = observations
            .iter()
            .map(|observation| observation.in_frame(self.estimation_frame, &self.cosm))
            .collect::<Result<_, _>>()?;

        // When the fit is restricted, the solved state carries only the
        // estimated subsets; the full template fills in the rest.
        let solved_guess = match estimation_subsets {
            Some(subsets) => {
                StateBuilder::new(self.estimation_frame, subsets).reduce(&guess)?
            }
            None => guess.clone(),
        };

        let template = guess.clone();
        let template_builder = StateBuilder::from_state(&template);
        let propagator = &self.propagator;
        let mut generator = |candidate: &State, instants: &[Epoch]| -> Result<Vec<State>, AstroError> {
            // Merge the candidate parameters over the template, then propagate
            let full = template_builder.expand(candidate, &template)?;
            propagator.calculate_states_at(&full, instants)
        };

        let analysis = self.solver.solve(
            &solved_guess,
            &observations,
            &mut generator,
            initial_guess_sigmas,
            observation_sigmas,
        )?;

        let estimated_state =
            template_builder.expand(&analysis.estimated_state, &template)?;
        Ok(OdAnalysis {
            estimated_state,
            solver_analysis: analysis,
        })
    }

    /// Estimates and wraps the result in an [`Orbit`] sampled through this
    /// solver's propagator.
    pub fn estimate_orbit(
        &self,
        initial_guess: &State,
        observations: &[State],
        initial_guess_sigmas: &SigmaMap,
        observation_sigmas: &SigmaMap,
    ) -> Result<Orbit, AstroError> {
        let analysis = self.estimate(
            initial_guess,
            observations,
            initial_guess_sigmas,
            observation_sigmas,
        )?;
        let model = PropagatedTrajectory {
            propagator: self.propagator.clone(),
            initial_state: analysis.estimated_state,
        };
        Ok(Orbit::new(Arc::new(model), self.cosm.earth()))
    }
}

/// A trajectory sampled by propagating a fixed initial state.
#[derive(Debug)]
pub struct PropagatedTrajectory {
    pub propagator: Propagator,
    pub initial_state: State,
}

impl TrajectoryModel for PropagatedTrajectory {
    fn state_at(&self, epoch: Epoch) -> Result<State, AstroError> {
        self.propagator.calculate_state_at(&self.initial_state, epoch)
    }
}

/// Builds a Cartesian observation state carrying only a position, the shape
/// produced by angle-less range instruments and ephemeris messages.
pub fn position_observation(
    epoch: Epoch,
    frame: Frame,
    position: &crate::linalg::Vector3<f64>,
) -> State {
    let builder = StateBuilder::new(frame, &[crate::state::cartesian_position()]);
    builder
        .build(
            epoch,
            DVector::from_vec(vec![position[0], position[1], position[2]]),
        )
        .expect("three coordinates for a position subset")
}
