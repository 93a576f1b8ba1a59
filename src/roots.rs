use std::f64::EPSILON;

/// Bracketed 1-D root finder used to isolate event crossings.
///
/// This is the Brent-Dekker method: inverse quadratic interpolation (falling
/// back to the secant rule) safeguarded by bisection. Non-convergence is
/// reported on the returned [`RootSolution`], never raised.
#[derive(Clone, Copy, Debug)]
pub struct RootSolver {
    /// Maximum number of iterations before giving up
    pub max_iterations: usize,
    /// Convergence criterion on the bracket width
    pub xtol: f64,
    /// Convergence criterion on the function magnitude
    pub ftol: f64,
}

impl Default for RootSolver {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            xtol: 1e-9,
            ftol: 1e-12,
        }
    }
}

/// Outcome of a bracketed root search.
#[derive(Clone, Copy, Debug)]
pub struct RootSolution {
    pub root: f64,
    pub iterations: usize,
    pub has_converged: bool,
}

impl RootSolver {
    pub fn new(max_iterations: usize, xtol: f64, ftol: f64) -> Self {
        Self {
            max_iterations,
            xtol,
            ftol,
        }
    }

    /// Finds the root of `g` over `[lo, hi]`, which must bracket a sign change.
    ///
    /// If the bracket does not contain a sign change, the solution is flagged
    /// as not converged and the returned root is the endpoint with the
    /// smallest function magnitude.
    pub fn solve<F: FnMut(f64) -> f64>(&self, lo: f64, hi: f64, mut g: F) -> RootSolution {
        let mut a = lo;
        let mut b = hi;
        let mut fa = g(a);
        let mut fb = g(b);

        if fa == 0.0 {
            return RootSolution {
                root: a,
                iterations: 0,
                has_converged: true,
            };
        }
        if fb == 0.0 {
            return RootSolution {
                root: b,
                iterations: 0,
                has_converged: true,
            };
        }
        if fa * fb > 0.0 {
            return RootSolution {
                root: if fa.abs() < fb.abs() { a } else { b },
                iterations: 0,
                has_converged: false,
            };
        }

        let mut c = a;
        let mut fc = fa;
        let mut d = b - a;
        let mut e = d;

        for iter in 1..=self.max_iterations {
            if fb * fc > 0.0 {
                // Root is now bracketed by [b, a]: rename to keep c on the far side
                c = a;
                fc = fa;
                d = b - a;
                e = d;
            }
            if fc.abs() < fb.abs() {
                a = b;
                b = c;
                c = a;
                fa = fb;
                fb = fc;
                fc = fa;
            }

            let tol1 = 2.0 * EPSILON * b.abs() + 0.5 * self.xtol;
            let xm = 0.5 * (c - b);

            if xm.abs() <= tol1 || fb.abs() <= self.ftol {
                return RootSolution {
                    root: b,
                    iterations: iter,
                    has_converged: true,
                };
            }

            if e.abs() >= tol1 && fa.abs() > fb.abs() {
                // Attempt inverse quadratic interpolation, or secant if a == c
                let s = fb / fa;
                let (mut p, mut q) = if (a - c).abs() < EPSILON {
                    (2.0 * xm * s, 1.0 - s)
                } else {
                    let q = fa / fc;
                    let r = fb / fc;
                    (
                        s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0)),
                        (q - 1.0) * (r - 1.0) * (s - 1.0),
                    )
                };
                if p > 0.0 {
                    q = -q;
                }
                p = p.abs();
                let min1 = 3.0 * xm * q - (tol1 * q).abs();
                let min2 = (e * q).abs();
                if 2.0 * p < min1.min(min2) {
                    // Interpolation accepted
                    e = d;
                    d = p / q;
                } else {
                    // Interpolation rejected, bisect
                    d = xm;
                    e = d;
                }
            } else {
                d = xm;
                e = d;
            }

            a = b;
            fa = fb;
            if d.abs() > tol1 {
                b += d;
            } else {
                b += if xm >= 0.0 { tol1 } else { -tol1 };
            }
            fb = g(b);
        }

        RootSolution {
            root: b,
            iterations: self.max_iterations,
            has_converged: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_root() {
        let solver = RootSolver::default();
        let sol = solver.solve(0.0, 10.0, |t| t - 4.25);
        assert!(sol.has_converged);
        assert!((sol.root - 4.25).abs() < 1e-8);
    }

    #[test]
    fn cosine_root() {
        let solver = RootSolver::default();
        let sol = solver.solve(0.0, 3.0, f64::cos);
        assert!(sol.has_converged);
        assert!((sol.root - std::f64::consts::FRAC_PI_2).abs() < 1e-8);
        assert!(sol.iterations < 20);
    }

    #[test]
    fn no_sign_change_is_reported_not_raised() {
        let solver = RootSolver::default();
        let sol = solver.solve(1.0, 2.0, |t| t * t + 1.0);
        assert!(!sol.has_converged);
    }

    #[test]
    fn steep_root_converges_within_cap() {
        let solver = RootSolver::default();
        let sol = solver.solve(-1.0, 1.5, |t| (20.0 * (t - 1.0)).tanh());
        assert!(sol.has_converged);
        assert!((sol.root - 1.0).abs() < 1e-7);
    }
}
