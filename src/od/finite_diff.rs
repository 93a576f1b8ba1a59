use crate::errors::AstroError;
use crate::linalg::{DMatrix, DVector};
use crate::state::State;
use crate::time::Epoch;

/// The differencing scheme of the sensitivity stencil.
///
/// Central differences cancel the leading truncation term and are the
/// default; forward and backward differences halve the number of propagator
/// calls at the cost of a first-order bias.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepType {
    Forward,
    Backward,
    Central,
}

/// Maps a candidate initial state to states at the requested instants.
pub type StateGenerator<'a> = dyn FnMut(&State, &[Epoch]) -> Result<Vec<State>, AstroError> + 'a;

/// Computes Jacobians and state transition matrices by finite differences
/// over perturbations of each initial-state component.
///
/// The same generator closure (and therefore the same integrator instance) is
/// reused across the whole stencil, keeping the columns mutually consistent.
#[derive(Clone, Copy, Debug)]
pub struct FiniteDifferenceSolver {
    pub step_type: StepType,
    /// Relative perturbation size; also the absolute floor for components
    /// near zero
    pub step_percentage: f64,
}

impl Default for FiniteDifferenceSolver {
    fn default() -> Self {
        Self {
            step_type: StepType::Central,
            step_percentage: 1e-3,
        }
    }
}

impl FiniteDifferenceSolver {
    pub fn new(step_type: StepType, step_percentage: f64) -> Self {
        Self {
            step_type,
            step_percentage,
        }
    }

    fn perturbation(&self, value: f64) -> f64 {
        let eps = self.step_percentage * value.abs();
        if eps > 0.0 {
            eps
        } else {
            self.step_percentage
        }
    }

    fn perturbed(state: &State, component: usize, epsilon: f64) -> State {
        let mut coordinates = state.coordinates().clone();
        coordinates[component] += epsilon;
        // The broker width is unchanged, so this cannot fail
        State::new(state.epoch, state.frame, coordinates, state.broker().clone())
            .expect("perturbed state width mismatch")
    }

    /// The state transition matrices d x(t_j) / d x(t_0), one per requested
    /// instant.
    ///
    /// Column `i` of matrix `j` holds the sensitivity of every coordinate of
    /// the state at `t_j` to the i-th initial coordinate.
    pub fn compute_state_transition_matrices(
        &self,
        state: &State,
        instants: &[Epoch],
        generator: &mut StateGenerator,
    ) -> Result<Vec<DMatrix<f64>>, AstroError> {
        if instants.is_empty() {
            return Err(AstroError::UndefinedInput(
                "state transition matrices need at least one instant".to_string(),
            ));
        }
        let n = state.coordinates().len();
        if n == 0 {
            return Err(AstroError::UndefinedInput(
                "cannot differentiate an empty state".to_string(),
            ));
        }

        // The nominal trajectory is only needed for one-sided stencils
        let nominal = match self.step_type {
            StepType::Central => None,
            _ => Some(generator(state, instants)?),
        };

        let mut matrices: Option<Vec<DMatrix<f64>>> = None;

        for i in 0..n {
            let eps = self.perturbation(state.coordinates()[i]);
            let column_states: Vec<DVector<f64>> = match self.step_type {
                StepType::Central => {
                    let plus = generator(&Self::perturbed(state, i, eps), instants)?;
                    let minus = generator(&Self::perturbed(state, i, -eps), instants)?;
                    plus.iter()
                        .zip(minus.iter())
                        .map(|(p, m)| (p.coordinates() - m.coordinates()) / (2.0 * eps))
                        .collect()
                }
                StepType::Forward => {
                    let plus = generator(&Self::perturbed(state, i, eps), instants)?;
                    plus.iter()
                        .zip(nominal.as_ref().unwrap().iter())
                        .map(|(p, n0)| (p.coordinates() - n0.coordinates()) / eps)
                        .collect()
                }
                StepType::Backward => {
                    let minus = generator(&Self::perturbed(state, i, -eps), instants)?;
                    nominal
                        .as_ref()
                        .unwrap()
                        .iter()
                        .zip(minus.iter())
                        .map(|(n0, m)| (n0.coordinates() - m.coordinates()) / eps)
                        .collect()
                }
            };

            let matrices = matrices.get_or_insert_with(|| {
                column_states
                    .iter()
                    .map(|column| DMatrix::zeros(column.len(), n))
                    .collect()
            });
            for (j, column) in column_states.iter().enumerate() {
                matrices[j].set_column(i, column);
            }
        }

        Ok(matrices.expect("at least one column was differentiated"))
    }

    /// Convenience for a single instant.
    pub fn compute_jacobian(
        &self,
        state: &State,
        instant: Epoch,
        generator: &mut StateGenerator,
    ) -> Result<DMatrix<f64>, AstroError> {
        Ok(self
            .compute_state_transition_matrices(state, &[instant], generator)?
            .remove(0))
    }

    /// Gradient of a scalar function of the state, by the same stencil.
    pub fn compute_gradient(
        &self,
        state: &State,
        function: &mut dyn FnMut(&State) -> Result<f64, AstroError>,
    ) -> Result<DVector<f64>, AstroError> {
        let n = state.coordinates().len();
        let nominal = match self.step_type {
            StepType::Central => None,
            _ => Some(function(state)?),
        };

        let mut gradient = DVector::zeros(n);
        for i in 0..n {
            let eps = self.perturbation(state.coordinates()[i]);
            gradient[i] = match self.step_type {
                StepType::Central => {
                    let plus = function(&Self::perturbed(state, i, eps))?;
                    let minus = function(&Self::perturbed(state, i, -eps))?;
                    (plus - minus) / (2.0 * eps)
                }
                StepType::Forward => {
                    (function(&Self::perturbed(state, i, eps))? - nominal.unwrap()) / eps
                }
                StepType::Backward => {
                    (nominal.unwrap() - function(&Self::perturbed(state, i, -eps))?) / eps
                }
            };
        }
        Ok(gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celestia::Frame;
    use crate::state::{GenericSubset, StateBuilder};
    use crate::time::{TimeUnit, J2000_OFFSET};

    fn two_state(x: f64, y: f64) -> State {
        StateBuilder::new(Frame::Gcrf, &[GenericSubset::new("XY", 2)])
            .build(
                Epoch::from_mjd_tai(J2000_OFFSET),
                crate::linalg::DVector::from_vec(vec![x, y]),
            )
            .unwrap()
    }

    #[test]
    fn stm_of_a_linear_map_is_its_matrix() {
        // x(t) = A x0 with A = [[2, 1], [0, 3]]
        let mut generator = |state: &State, instants: &[Epoch]| -> Result<Vec<State>, AstroError> {
            let c = state.coordinates();
            Ok(instants
                .iter()
                .map(|_| two_state(2.0 * c[0] + c[1], 3.0 * c[1]))
                .collect())
        };
        let state = two_state(1.0, 1.0);
        let instant = state.epoch + 1.0 * TimeUnit::Second;
        for step_type in [StepType::Central, StepType::Forward, StepType::Backward].iter() {
            let solver = FiniteDifferenceSolver::new(*step_type, 1e-4);
            let jacobian = solver
                .compute_jacobian(&state, instant, &mut generator)
                .unwrap();
            assert!((jacobian[(0, 0)] - 2.0).abs() < 1e-6, "{:?}", step_type);
            assert!((jacobian[(0, 1)] - 1.0).abs() < 1e-6);
            assert!((jacobian[(1, 0)]).abs() < 1e-6);
            assert!((jacobian[(1, 1)] - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn central_gradient_of_a_quadratic() {
        let solver = FiniteDifferenceSolver::default();
        let state = two_state(3.0, -2.0);
        let gradient = solver
            .compute_gradient(&state, &mut |s| {
                let c = s.coordinates();
                Ok(c[0] * c[0] + 4.0 * c[1])
            })
            .unwrap();
        assert!((gradient[0] - 6.0).abs() < 1e-6);
        assert!((gradient[1] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn one_matrix_per_instant() {
        let mut generator = |state: &State, instants: &[Epoch]| -> Result<Vec<State>, AstroError> {
            let c = state.coordinates();
            Ok(instants
                .iter()
                .enumerate()
                .map(|(j, _)| two_state(c[0] * (j + 1) as f64, c[1]))
                .collect())
        };
        let state = two_state(1.0, 1.0);
        let instants = vec![
            state.epoch + 1.0 * TimeUnit::Second,
            state.epoch + 2.0 * TimeUnit::Second,
        ];
        let solver = FiniteDifferenceSolver::default();
        let stms = solver
            .compute_state_transition_matrices(&state, &instants, &mut generator)
            .unwrap();
        assert_eq!(stms.len(), 2);
        assert!((stms[0][(0, 0)] - 1.0).abs() < 1e-6);
        assert!((stms[1][(0, 0)] - 2.0).abs() < 1e-6);
    }
}
