use crate::linalg::DVector;
use std::fmt;

/// The error control trait manages how the solver normalizes the error of a
/// candidate step.
///
/// The estimate is scaled against the requested tolerances: a value at or
/// below one accepts the step, a value above one rejects it.
pub trait ErrorCtrl: fmt::Debug + Send + Sync {
    /// Normalized error of the candidate step.
    ///
    /// `error_est` is the embedded-pair error estimate, `candidate` the
    /// candidate state and `cur_state` the state the step started from.
    fn estimate(
        &self,
        error_est: &DVector<f64>,
        candidate: &DVector<f64>,
        cur_state: &DVector<f64>,
        rel_tol: f64,
        abs_tol: f64,
    ) -> f64;
}

/// Component-wise scaled root-mean-square error norm.
///
/// This is the standard norm of Hairer, Norsett & Wanner (II.4): each error
/// component is scaled by `abs_tol + rel_tol * max(|y_i|, |y_hat_i|)` and the
/// RMS of the scaled components is returned. Use this controller unless the
/// state mixes units so wildly that a max-norm is safer.
#[derive(Clone, Copy, Debug)]
pub struct ScaledRss;

impl ErrorCtrl for ScaledRss {
    fn estimate(
        &self,
        error_est: &DVector<f64>,
        candidate: &DVector<f64>,
        cur_state: &DVector<f64>,
        rel_tol: f64,
        abs_tol: f64,
    ) -> f64 {
        let mut sum = 0.0;
        for i in 0..error_est.len() {
            let scale = abs_tol + rel_tol * cur_state[i].abs().max(candidate[i].abs());
            let scaled = error_est[i] / scale;
            sum += scaled * scaled;
        }
        (sum / error_est.len() as f64).sqrt()
    }
}

/// Largest scaled component error.
///
/// The max-norm analogue of [`ScaledRss`]: conservative when a single
/// component dominates the error, as in the physical model error estimator of
/// GMAT.
#[derive(Clone, Copy, Debug)]
pub struct LargestError;

impl ErrorCtrl for LargestError {
    fn estimate(
        &self,
        error_est: &DVector<f64>,
        candidate: &DVector<f64>,
        cur_state: &DVector<f64>,
        rel_tol: f64,
        abs_tol: f64,
    ) -> f64 {
        let mut max_err = 0.0_f64;
        for i in 0..error_est.len() {
            let scale = abs_tol + rel_tol * cur_state[i].abs().max(candidate[i].abs());
            max_err = max_err.max((error_est[i] / scale).abs());
        }
        max_err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_error_at_the_tolerance_boundary() {
        let ctrl = ScaledRss;
        let error = DVector::from_vec(vec![1e-9, 1e-9]);
        let y = DVector::from_vec(vec![1.0, 1.0]);
        // scale = 1e-12 + 1e-9 * 1 ~ 1e-9, so the normalized error is ~1
        let est = ctrl.estimate(&error, &y, &y, 1e-9, 1e-12);
        assert!((est - 1.0).abs() < 0.01);
    }

    #[test]
    fn largest_error_dominated_by_worst_component() {
        let ctrl = LargestError;
        let error = DVector::from_vec(vec![1e-14, 5e-8]);
        let y = DVector::from_vec(vec![1.0, 1.0]);
        let est = ctrl.estimate(&error, &y, &y, 1e-9, 0.0);
        assert!((est - 50.0).abs() < 1.0);
    }
}
