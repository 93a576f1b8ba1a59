use crate::linalg::DVector;
use std::f64::consts::PI;

/// Wraps the provided angle (in radians) into (-pi, pi].
pub fn between_pm_pi(angle: f64) -> f64 {
    let mut wrapped = angle % (2.0 * PI);
    if wrapped > PI {
        wrapped -= 2.0 * PI;
    } else if wrapped <= -PI {
        wrapped += 2.0 * PI;
    }
    wrapped
}

/// Wraps the provided angle (in radians) into [0, 2 pi).
pub fn between_0_2pi(angle: f64) -> f64 {
    let wrapped = angle % (2.0 * PI);
    if wrapped < 0.0 {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Root sum squared error between two vectors of identical length.
pub fn rss_error(estimate: &DVector<f64>, truth: &DVector<f64>) -> f64 {
    (estimate - truth).norm()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_wrapping() {
        assert!((between_pm_pi(3.0 * PI) - PI).abs() < 1e-14);
        assert!((between_pm_pi(-3.0 * PI) - PI).abs() < 1e-14);
        assert!((between_pm_pi(0.1) - 0.1).abs() < 1e-15);
        assert!((between_pm_pi(2.0 * PI - 0.1) + 0.1).abs() < 1e-14);
        assert!((between_0_2pi(-0.1) - (2.0 * PI - 0.1)).abs() < 1e-14);
        assert!((between_0_2pi(2.0 * PI + 0.25) - 0.25).abs() < 1e-14);
    }
}
