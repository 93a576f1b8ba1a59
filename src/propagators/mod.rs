use crate::errors::AstroError;
use crate::linalg::DVector;
use crate::roots::RootSolver;
use crate::state::{State, StateBuilder};
use crate::time::{Duration, Epoch};
use std::cell::RefCell;
use std::sync::Arc;

/// Provides the error controllers normalizing the step error against the
/// requested tolerances.
pub mod error_ctrl;

/// Event conditions consumed by the conditional integration entry point.
pub mod events;

mod dormand;
mod fehlberg;
mod rk;

use self::error_ctrl::{ErrorCtrl, ScaledRss};
use self::rk::Tableau;

/// Instants closer than one nanosecond are considered reached: this is the
/// resolution of the time service.
const TIME_EPSILON: f64 = 1e-9;

/// The available Runge-Kutta steppers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepperType {
    /// Classical fixed-step RK4, for deterministic tests
    Rk4Fixed,
    /// Cash-Karp 5(4) embedded pair
    CashKarp45,
    /// Dormand-Prince 5(4) embedded pair
    DormandPrince45,
    /// Fehlberg 7(8) embedded pair
    Fehlberg78,
}

impl StepperType {
    fn tableau(self) -> Tableau {
        match self {
            StepperType::Rk4Fixed => rk::RK4_FIXED,
            StepperType::CashKarp45 => rk::CASH_KARP_45,
            StepperType::DormandPrince45 => dormand::DORMAND_PRINCE_45,
            StepperType::Fehlberg78 => fehlberg::FEHLBERG_78,
        }
    }
}

/// The system of equations composed by the propagator: maps (seconds past the
/// start epoch, coordinates) to the derivative vector.
pub type SystemOfEquations<'a> = dyn Fn(f64, &DVector<f64>) -> Result<DVector<f64>, AstroError> + 'a;

/// Details of the last integration step.
#[derive(Clone, Debug, Default)]
pub struct IntegrationDetails {
    /// Step size used, in seconds
    pub step: f64,
    /// Normalized error of the step
    pub error: f64,
    /// Attempts needed to bring the error within tolerance
    pub attempts: u8,
}

/// The solution of a conditional integration.
#[derive(Clone, Debug)]
pub struct ConditionSolution {
    pub state: State,
    /// Whether the event condition was satisfied within the span
    pub condition_is_satisfied: bool,
    /// Whether the root isolation converged (true when no isolation was needed)
    pub root_solver_has_converged: bool,
    /// Root solver iterations spent isolating the event
    pub iteration_count: usize,
}

/// An accepted integration step with its dense-output interpolant.
///
/// The interpolant is the cubic Hermite polynomial matching the states and
/// derivatives at both step endpoints.
struct AcceptedStep {
    t0: f64,
    y0: DVector<f64>,
    f0: DVector<f64>,
    t1: f64,
    y1: DVector<f64>,
    f1: DVector<f64>,
}

impl AcceptedStep {
    fn interpolate(&self, t: f64) -> DVector<f64> {
        let h = self.t1 - self.t0;
        let theta = (t - self.t0) / h;
        let t2 = theta * theta;
        let t3 = t2 * theta;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + theta;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        let mut out = &self.y0 * h00;
        out.axpy(h10 * h, &self.f0, 1.0);
        out.axpy(h01, &self.y1, 1.0);
        out.axpy(h11 * h, &self.f1, 1.0);
        out
    }
}

/// An adaptive Runge-Kutta ODE solver with dense output and event isolation.
///
/// Adaptive steppers scale the embedded error estimate against the relative
/// and absolute tolerances and reject any step whose normalized error exceeds
/// one; the next step size follows a PI controller. Accepted intermediate
/// states are observable when state logging is enabled, and are otherwise
/// discarded.
#[derive(Debug)]
pub struct NumericalSolver {
    pub stepper: StepperType,
    rel_tol: f64,
    abs_tol: f64,
    /// Initial step size guess, in seconds
    init_step: f64,
    min_step: f64,
    max_step: f64,
    /// Bounded retry budget per step
    attempts: u8,
    error_ctrl: Arc<dyn ErrorCtrl>,
    root_solver: RootSolver,
    log_states: bool,
    observed: RefCell<Vec<State>>,
    details: RefCell<IntegrationDetails>,
}

impl Default for NumericalSolver {
    /// Cash-Karp 5(4) at 1e-12 tolerances with GMAT-heritage step bounds.
    fn default() -> Self {
        Self::new(StepperType::CashKarp45, 1e-12, 1e-12)
    }
}

impl Clone for NumericalSolver {
    fn clone(&self) -> Self {
        Self {
            stepper: self.stepper,
            rel_tol: self.rel_tol,
            abs_tol: self.abs_tol,
            init_step: self.init_step,
            min_step: self.min_step,
            max_step: self.max_step,
            attempts: self.attempts,
            error_ctrl: self.error_ctrl.clone(),
            root_solver: self.root_solver,
            log_states: self.log_states,
            observed: RefCell::new(Vec::new()),
            details: RefCell::new(IntegrationDetails::default()),
        }
    }
}

impl NumericalSolver {
    pub fn new(stepper: StepperType, rel_tol: f64, abs_tol: f64) -> Self {
        Self {
            stepper,
            rel_tol,
            abs_tol,
            init_step: 60.0,
            min_step: 1e-3,
            max_step: 2700.0,
            attempts: 50,
            error_ctrl: Arc::new(ScaledRss),
            root_solver: RootSolver::default(),
            log_states: false,
            observed: RefCell::new(Vec::new()),
            details: RefCell::new(IntegrationDetails::default()),
        }
    }

    /// A fixed-step classical RK4.
    pub fn fixed_step_rk4(step: Duration) -> Self {
        let step = step.in_seconds().abs();
        let mut solver = Self::new(StepperType::Rk4Fixed, 0.0, 0.0);
        solver.init_step = step;
        solver.min_step = step;
        solver.max_step = step;
        solver
    }

    pub fn with_initial_step(mut self, step: Duration) -> Self {
        self.init_step = step.in_seconds().abs();
        self
    }

    pub fn with_step_bounds(mut self, min_step: Duration, max_step: Duration) -> Self {
        self.min_step = min_step.in_seconds().abs();
        self.max_step = max_step.in_seconds().abs();
        self
    }

    pub fn with_error_ctrl(mut self, error_ctrl: Arc<dyn ErrorCtrl>) -> Self {
        self.error_ctrl = error_ctrl;
        self
    }

    pub fn with_root_solver(mut self, root_solver: RootSolver) -> Self {
        self.root_solver = root_solver;
        self
    }

    /// Enables or disables the recording of accepted intermediate states.
    pub fn with_state_logging(mut self, log_states: bool) -> Self {
        self.log_states = log_states;
        self
    }

    pub fn rel_tol(&self) -> f64 {
        self.rel_tol
    }

    pub fn abs_tol(&self) -> f64 {
        self.abs_tol
    }

    /// The accepted intermediate states of the last integration, when state
    /// logging was enabled.
    pub fn observed_states(&self) -> Vec<State> {
        self.observed.borrow().clone()
    }

    /// Details of the last integration step taken.
    pub fn latest_details(&self) -> IntegrationDetails {
        self.details.borrow().clone()
    }

    /// Advances the state to the target instant, forward or backward.
    pub fn integrate_time(
        &self,
        state: &State,
        target: Epoch,
        system: &SystemOfEquations,
    ) -> Result<State, AstroError> {
        self.observed.borrow_mut().clear();
        let builder = StateBuilder::from_state(state);
        let t_end = (target - state.epoch).in_seconds();
        let start = state.epoch;

        let (_, y) = self.propagate(state.coordinates(), t_end, system, &mut |step| {
            if self.log_states {
                self.observed
                    .borrow_mut()
                    .push(builder.build(start + step.t1, step.y1.clone())?);
            }
            Ok(false)
        })?;

        builder.build(target, y)
    }

    /// Integrates across the provided instants, producing one interpolated
    /// state per instant without letting them constrain step selection.
    ///
    /// The instants must be sorted along the integration direction (the
    /// direction from the state's epoch to the last instant).
    pub fn integrate_times(
        &self,
        state: &State,
        instants: &[Epoch],
        system: &SystemOfEquations,
    ) -> Result<Vec<State>, AstroError> {
        self.observed.borrow_mut().clear();
        if instants.is_empty() {
            return Ok(Vec::new());
        }

        let start = state.epoch;
        let rel: Vec<f64> = instants
            .iter()
            .map(|epoch| (*epoch - start).in_seconds())
            .collect();
        let t_end = *rel.last().unwrap();
        let dir = if t_end >= 0.0 { 1.0 } else { -1.0 };
        for pair in rel.windows(2) {
            if (pair[1] - pair[0]) * dir < 0.0 {
                return Err(AstroError::UnsortedInstants);
            }
        }
        if rel.iter().any(|t| t * dir < -TIME_EPSILON) {
            return Err(AstroError::UnsortedInstants);
        }

        let builder = StateBuilder::from_state(state);
        let mut outputs = Vec::with_capacity(instants.len());
        let mut idx = 0;

        // Instants at the start epoch need no integration
        while idx < rel.len() && rel[idx].abs() <= TIME_EPSILON {
            outputs.push(state.clone());
            idx += 1;
        }

        self.propagate(state.coordinates(), t_end, system, &mut |step| {
            while idx < rel.len()
                && (rel[idx] - step.t0) * dir > 0.0
                && (rel[idx] - step.t1) * dir <= TIME_EPSILON
            {
                outputs.push(builder.build(start + rel[idx], step.interpolate(rel[idx]))?);
                idx += 1;
            }
            if self.log_states {
                self.observed
                    .borrow_mut()
                    .push(builder.build(start + step.t1, step.y1.clone())?);
            }
            Ok(false)
        })?;

        // The terminal instant is always the last step produced
        while idx < rel.len() {
            let last = outputs
                .last()
                .ok_or_else(|| {
                    AstroError::IntegrationFailed("no state produced for the requested instants".to_string())
                })?
                .clone();
            outputs.push(last);
            idx += 1;
        }

        Ok(outputs)
    }

    /// Advances the state until the event condition is satisfied or the
    /// maximum instant is reached.
    ///
    /// On every accepted step the condition is evaluated on the (previous,
    /// current) state pair. When it is satisfied and exposes a residual with
    /// a sign change across the step, the crossing is isolated with the root
    /// solver on the dense-output interpolant, and the state at the root is
    /// returned.
    pub fn integrate_to_condition(
        &self,
        state: &State,
        max_instant: Epoch,
        condition: &dyn events::EventCondition,
        system: &SystemOfEquations,
    ) -> Result<ConditionSolution, AstroError> {
        self.observed.borrow_mut().clear();
        let builder = StateBuilder::from_state(state);
        let start = state.epoch;
        let t_end = (max_instant - start).in_seconds();

        let mut previous = state.clone();
        let mut found: Option<ConditionSolution> = None;

        let (tf, yf) = self.propagate(state.coordinates(), t_end, system, &mut |step| {
            let current = builder.build(start + step.t1, step.y1.clone())?;
            if condition.is_satisfied(&current, &previous) {
                let solution = self.isolate_event(&builder, start, step, condition, &current)?;
                found = Some(solution);
                return Ok(true);
            }
            if self.log_states {
                self.observed.borrow_mut().push(current.clone());
            }
            previous = current;
            Ok(false)
        })?;

        match found {
            Some(solution) => Ok(solution),
            None => Ok(ConditionSolution {
                state: builder.build(start + tf, yf)?,
                condition_is_satisfied: false,
                root_solver_has_converged: true,
                iteration_count: 0,
            }),
        }
    }

    /// Isolates the event crossing inside an accepted step.
    fn isolate_event(
        &self,
        builder: &StateBuilder,
        start: Epoch,
        step: &AcceptedStep,
        condition: &dyn events::EventCondition,
        current: &State,
    ) -> Result<ConditionSolution, AstroError> {
        let prev_state = builder.build(start + step.t0, step.y0.clone())?;
        let g0 = condition.residual(&prev_state);
        let g1 = condition.residual(current);

        if let (Some(g0), Some(g1)) = (g0, g1) {
            if g0 * g1 < 0.0 {
                let mut eval_failure = None;
                let solution = self.root_solver.solve(step.t0, step.t1, |t| {
                    match builder.build(start + t, step.interpolate(t)) {
                        Ok(state) => condition.residual(&state).unwrap_or(f64::NAN),
                        Err(error) => {
                            eval_failure = Some(error);
                            f64::NAN
                        }
                    }
                });
                if let Some(error) = eval_failure {
                    return Err(error);
                }
                if !solution.has_converged {
                    warn!(
                        "root isolation of {} did not converge in {} iterations",
                        condition.name(),
                        solution.iterations
                    );
                }
                let state = builder.build(start + solution.root, step.interpolate(solution.root))?;
                return Ok(ConditionSolution {
                    state,
                    condition_is_satisfied: true,
                    root_solver_has_converged: solution.has_converged,
                    iteration_count: solution.iterations,
                });
            }
        }

        // No bracketable residual: the step end is the event state
        Ok(ConditionSolution {
            state: current.clone(),
            condition_is_satisfied: true,
            root_solver_has_converged: true,
            iteration_count: 0,
        })
    }

    /// The stepping engine shared by the three entry points.
    ///
    /// Works in seconds relative to the start epoch; the sign of `t_end`
    /// selects the integration direction. The observer receives every
    /// accepted step and may request an early stop by returning `true`.
    fn propagate(
        &self,
        y0: &DVector<f64>,
        t_end: f64,
        system: &SystemOfEquations,
        observer: &mut dyn FnMut(&AcceptedStep) -> Result<bool, AstroError>,
    ) -> Result<(f64, DVector<f64>), AstroError> {
        if t_end.abs() <= TIME_EPSILON {
            return Ok((t_end, y0.clone()));
        }

        let tableau = self.stepper.tableau();
        let adaptive = tableau.is_adaptive();
        let order = f64::from(tableau.order);
        let dim = y0.len();
        let dir = if t_end > 0.0 { 1.0 } else { -1.0 };

        let mut t = 0.0_f64;
        let mut y = y0.clone();
        let mut f_curr = system(t, &y)?;
        let mut h_mag = self.init_step.min(t_end.abs());
        let mut err_prev = 1e-4_f64;

        while (t_end - t) * dir > TIME_EPSILON {
            // Do not overshoot the target
            let remaining = (t_end - t).abs();
            if h_mag > remaining {
                h_mag = remaining;
            }

            let mut attempts = 1_u8;
            let (h, y_next) = loop {
                let h = h_mag * dir;

                // Stage evaluations; the c nodes are the row sums of a
                let mut k: Vec<DVector<f64>> = Vec::with_capacity(tableau.stages);
                k.push(f_curr.clone());
                let mut a_idx = 0;
                for _ in 0..tableau.stages - 1 {
                    let mut ci = 0.0;
                    let mut wi = DVector::<f64>::zeros(dim);
                    for kj in &k {
                        let a_ij = tableau.a[a_idx];
                        ci += a_ij;
                        if a_ij != 0.0 {
                            wi.axpy(a_ij, kj, 1.0);
                        }
                        a_idx += 1;
                    }
                    let y_stage = &y + h * &wi;
                    k.push(system(t + ci * h, &y_stage)?);
                }

                let mut y_next = y.clone();
                let mut error_est = DVector::<f64>::zeros(dim);
                for (i, ki) in k.iter().enumerate() {
                    if tableau.b[i] != 0.0 {
                        y_next.axpy(h * tableau.b[i], ki, 1.0);
                    }
                    if adaptive {
                        let db = tableau.b[i] - tableau.b_star[i];
                        if db != 0.0 {
                            error_est.axpy(h * db, ki, 1.0);
                        }
                    }
                }

                if !adaptive {
                    let mut details = self.details.borrow_mut();
                    details.step = h;
                    details.error = 0.0;
                    details.attempts = attempts;
                    break (h, y_next);
                }

                let error =
                    self.error_ctrl
                        .estimate(&error_est, &y_next, &y, self.rel_tol, self.abs_tol);

                if error <= 1.0 {
                    let mut details = self.details.borrow_mut();
                    details.step = h;
                    details.error = error;
                    details.attempts = attempts;
                    drop(details);

                    // PI controller for the next step size
                    let grow = 0.9
                        * error.max(1e-10).powf(-0.7 / order)
                        * err_prev.powf(0.4 / order);
                    h_mag = (h_mag * grow.clamp(0.2, 5.0)).clamp(self.min_step, self.max_step);
                    err_prev = error.max(1e-4);
                    break (h, y_next);
                }

                attempts += 1;
                if attempts > self.attempts {
                    return Err(AstroError::IntegrationFailed(format!(
                        "error {:.3e} still above tolerance after {} attempts",
                        error, self.attempts
                    )));
                }
                if h_mag <= self.min_step {
                    return Err(AstroError::IntegrationFailed(format!(
                        "error {:.3e} above tolerance at the minimum step size",
                        error
                    )));
                }
                let shrink = (0.9 * error.powf(-1.0 / (order - 1.0))).max(0.2);
                h_mag = (h_mag * shrink).max(self.min_step);
                debug!(
                    "step rejected (error {:.3e}), retrying with {:.3e} s",
                    error, h_mag
                );
            };

            let t1 = t + h;
            let f_next = system(t1, &y_next)?;
            let step = AcceptedStep {
                t0: t,
                y0: y,
                f0: f_curr,
                t1,
                y1: y_next.clone(),
                f1: f_next.clone(),
            };
            let stop = observer(&step)?;

            t = t1;
            y = y_next;
            f_curr = f_next;
            if stop {
                return Ok((t, y));
            }
        }

        Ok((t_end, y))
    }
}
