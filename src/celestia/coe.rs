use crate::errors::AstroError;
use crate::linalg::Vector3;
use crate::utils::between_0_2pi;
use std::f64::consts::PI;

/// Below this eccentricity or inclination, the orbit is treated as circular
/// or equatorial when recovering the angles.
const ELEMENT_TOLERANCE: f64 = 1e-11;

/// Classical (Keplerian) orbital elements, SI: meters and radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassicalElements {
    /// Semi-major axis, in meters
    pub sma: f64,
    /// Eccentricity
    pub ecc: f64,
    /// Inclination, in radians
    pub inc: f64,
    /// Right ascension of the ascending node, in radians
    pub raan: f64,
    /// Argument of periapsis, in radians
    pub aop: f64,
    /// True anomaly, in radians
    pub ta: f64,
}

impl ClassicalElements {
    pub fn new(sma: f64, ecc: f64, inc: f64, raan: f64, aop: f64, ta: f64) -> Self {
        Self {
            sma,
            ecc,
            inc,
            raan,
            aop,
            ta,
        }
    }

    /// Recovers the elements from a Cartesian position and velocity, Vallado's
    /// RV2COE with the usual circular and equatorial guards.
    pub fn from_cartesian(
        r_vec: &Vector3<f64>,
        v_vec: &Vector3<f64>,
        gm: f64,
    ) -> Result<Self, AstroError> {
        let r = r_vec.norm();
        let v = v_vec.norm();
        if r < 1.0 {
            return Err(AstroError::UndefinedInput(
                "position magnitude is zero".to_string(),
            ));
        }

        let h_vec = r_vec.cross(v_vec);
        let h = h_vec.norm();
        if h < 1e-6 {
            return Err(AstroError::UndefinedInput(
                "angular momentum is zero, orbit is rectilinear".to_string(),
            ));
        }
        let n_vec = Vector3::z().cross(&h_vec);
        let n = n_vec.norm();

        let e_vec = ((v * v - gm / r) * r_vec - r_vec.dot(v_vec) * v_vec) / gm;
        let ecc = e_vec.norm();

        let energy = v * v / 2.0 - gm / r;
        if energy.abs() < 1e-12 {
            return Err(AstroError::UndefinedInput(
                "orbit is parabolic, the semi-major axis is undefined".to_string(),
            ));
        }
        let sma = -gm / (2.0 * energy);

        let inc = (h_vec[2] / h).clamp(-1.0, 1.0).acos();

        let circular = ecc < ELEMENT_TOLERANCE;
        let equatorial = inc < ELEMENT_TOLERANCE || (PI - inc).abs() < ELEMENT_TOLERANCE;

        let (raan, aop, ta) = if !circular && !equatorial {
            let mut raan = (n_vec[0] / n).clamp(-1.0, 1.0).acos();
            if n_vec[1] < 0.0 {
                raan = 2.0 * PI - raan;
            }
            let mut aop = (n_vec.dot(&e_vec) / (n * ecc)).clamp(-1.0, 1.0).acos();
            if e_vec[2] < 0.0 {
                aop = 2.0 * PI - aop;
            }
            let mut ta = (e_vec.dot(r_vec) / (ecc * r)).clamp(-1.0, 1.0).acos();
            if r_vec.dot(v_vec) < 0.0 {
                ta = 2.0 * PI - ta;
            }
            (raan, aop, ta)
        } else if circular && !equatorial {
            // Argument of latitude stands in for the true anomaly
            let mut raan = (n_vec[0] / n).clamp(-1.0, 1.0).acos();
            if n_vec[1] < 0.0 {
                raan = 2.0 * PI - raan;
            }
            let mut u = (n_vec.dot(r_vec) / (n * r)).clamp(-1.0, 1.0).acos();
            if r_vec[2] < 0.0 {
                u = 2.0 * PI - u;
            }
            (raan, 0.0, u)
        } else if !circular && equatorial {
            // True longitude of periapsis stands in for the node and argument
            let mut aop = (e_vec[0] / ecc).clamp(-1.0, 1.0).acos();
            if e_vec[1] < 0.0 {
                aop = 2.0 * PI - aop;
            }
            let mut ta = (e_vec.dot(r_vec) / (ecc * r)).clamp(-1.0, 1.0).acos();
            if r_vec.dot(v_vec) < 0.0 {
                ta = 2.0 * PI - ta;
            }
            (0.0, aop, ta)
        } else {
            // Circular equatorial: true longitude only
            let mut l = (r_vec[0] / r).clamp(-1.0, 1.0).acos();
            if r_vec[1] < 0.0 {
                l = 2.0 * PI - l;
            }
            (0.0, 0.0, l)
        };

        Ok(Self {
            sma,
            ecc,
            inc,
            raan,
            aop,
            ta,
        })
    }

    /// Cartesian position and velocity from the elements.
    pub fn to_cartesian(&self, gm: f64) -> (Vector3<f64>, Vector3<f64>) {
        let p = self.semi_latus_rectum();
        let (sin_ta, cos_ta) = self.ta.sin_cos();
        let r = p / (1.0 + self.ecc * cos_ta);

        // Perifocal coordinates
        let r_pqw = Vector3::new(r * cos_ta, r * sin_ta, 0.0);
        let v_pqw = (gm / p).sqrt() * Vector3::new(-sin_ta, self.ecc + cos_ta, 0.0);

        let (sin_raan, cos_raan) = self.raan.sin_cos();
        let (sin_inc, cos_inc) = self.inc.sin_cos();
        let (sin_aop, cos_aop) = self.aop.sin_cos();

        let rot = |u: &Vector3<f64>| -> Vector3<f64> {
            // R3(-raan) R1(-inc) R3(-aop) applied to perifocal coordinates
            let x1 = u[0] * cos_aop - u[1] * sin_aop;
            let y1 = u[0] * sin_aop + u[1] * cos_aop;
            let z1 = u[2];
            let y2 = y1 * cos_inc - z1 * sin_inc;
            let z2 = y1 * sin_inc + z1 * cos_inc;
            Vector3::new(
                x1 * cos_raan - y2 * sin_raan,
                x1 * sin_raan + y2 * cos_raan,
                z2,
            )
        };

        (rot(&r_pqw), rot(&v_pqw))
    }

    pub fn semi_latus_rectum(&self) -> f64 {
        self.sma * (1.0 - self.ecc * self.ecc)
    }

    pub fn angular_momentum(&self, gm: f64) -> f64 {
        (gm * self.semi_latus_rectum()).sqrt()
    }

    pub fn radial_distance(&self) -> f64 {
        self.semi_latus_rectum() / (1.0 + self.ecc * self.ta.cos())
    }

    /// Mean motion, in rad/s.
    pub fn mean_motion(&self, gm: f64) -> f64 {
        (gm / self.sma.powi(3)).sqrt()
    }

    /// Orbital period, in seconds.
    pub fn period(&self, gm: f64) -> f64 {
        2.0 * PI / self.mean_motion(gm)
    }

    /// Eccentric anomaly, in radians.
    pub fn eccentric_anomaly(&self) -> f64 {
        let beta = ((1.0 - self.ecc) / (1.0 + self.ecc)).sqrt();
        between_0_2pi(2.0 * (beta * (self.ta / 2.0).tan()).atan())
    }

    /// Mean anomaly from Kepler's equation, in radians.
    pub fn mean_anomaly(&self) -> f64 {
        let ea = self.eccentric_anomaly();
        between_0_2pi(ea - self.ecc * ea.sin())
    }

    /// Replaces the true anomaly from a mean anomaly, solving Kepler's
    /// equation by Newton iteration.
    pub fn with_mean_anomaly(mut self, ma: f64) -> Self {
        let ma = between_0_2pi(ma);
        let mut ea = if self.ecc < 0.8 { ma } else { PI };
        for _ in 0..50 {
            let delta = (ea - self.ecc * ea.sin() - ma) / (1.0 - self.ecc * ea.cos());
            ea -= delta;
            if delta.abs() < 1e-14 {
                break;
            }
        }
        let beta = ((1.0 + self.ecc) / (1.0 - self.ecc)).sqrt();
        self.ta = between_0_2pi(2.0 * (beta * (ea / 2.0).tan()).atan());
        self
    }

    /// The elements as a (sma, ecc, inc, raan, aop, ta) array.
    pub fn to_array(&self) -> [f64; 6] {
        [self.sma, self.ecc, self.inc, self.raan, self.aop, self.ta]
    }

    pub fn from_array(oe: &[f64; 6]) -> Self {
        Self {
            sma: oe[0],
            ecc: oe[1],
            inc: oe[2],
            raan: oe[3],
            aop: oe[4],
            ta: oe[5],
        }
    }
}

/// Modified equinoctial elements: the non-singular reparameterization
/// (p, f, g, h, k, L) used by the TLE solver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModifiedEquinoctial {
    /// Semi-latus rectum, in meters
    pub p: f64,
    /// Eccentricity vector x: `e cos(raan + aop)`
    pub f: f64,
    /// Eccentricity vector y: `e sin(raan + aop)`
    pub g: f64,
    /// Node vector x: `tan(i/2) cos(raan)`
    pub h: f64,
    /// Node vector y: `tan(i/2) sin(raan)`
    pub k: f64,
    /// True longitude `raan + aop + ta`, in radians
    pub l: f64,
}

impl ModifiedEquinoctial {
    pub fn new(p: f64, f: f64, g: f64, h: f64, k: f64, l: f64) -> Self {
        Self { p, f, g, h, k, l }
    }

    pub fn from_coe(coe: &ClassicalElements) -> Self {
        let lonper = coe.raan + coe.aop;
        let half_inc_tan = (coe.inc / 2.0).tan();
        Self {
            p: coe.semi_latus_rectum(),
            f: coe.ecc * lonper.cos(),
            g: coe.ecc * lonper.sin(),
            h: half_inc_tan * coe.raan.cos(),
            k: half_inc_tan * coe.raan.sin(),
            l: between_0_2pi(lonper + coe.ta),
        }
    }

    pub fn to_coe(&self) -> ClassicalElements {
        let ecc = (self.f * self.f + self.g * self.g).sqrt();
        let inc = 2.0 * (self.h * self.h + self.k * self.k).sqrt().atan();
        let raan = if self.h.abs() < 1e-15 && self.k.abs() < 1e-15 {
            0.0
        } else {
            between_0_2pi(self.k.atan2(self.h))
        };
        let lonper = if ecc < 1e-15 {
            0.0
        } else {
            self.g.atan2(self.f)
        };
        let aop = between_0_2pi(lonper - raan);
        let ta = between_0_2pi(self.l - lonper);
        ClassicalElements {
            sma: self.p / (1.0 - ecc * ecc),
            ecc,
            inc,
            raan,
            aop,
            ta,
        }
    }

    pub fn from_cartesian(
        r: &Vector3<f64>,
        v: &Vector3<f64>,
        gm: f64,
    ) -> Result<Self, AstroError> {
        Ok(Self::from_coe(&ClassicalElements::from_cartesian(r, v, gm)?))
    }

    pub fn to_cartesian(&self, gm: f64) -> (Vector3<f64>, Vector3<f64>) {
        self.to_coe().to_cartesian(gm)
    }

    /// The elements as a (p, f, g, h, k, L) array.
    pub fn to_array(&self) -> [f64; 6] {
        [self.p, self.f, self.g, self.h, self.k, self.l]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celestia::cosm::EARTH_GM;
    use crate::utils::between_pm_pi;

    #[test]
    fn coe_cartesian_round_trip() {
        let coe = ClassicalElements::new(
            7.2e6,
            0.0013,
            51.6_f64.to_radians(),
            211.0_f64.to_radians(),
            84.0_f64.to_radians(),
            67.0_f64.to_radians(),
        );
        let (r, v) = coe.to_cartesian(EARTH_GM);
        let back = ClassicalElements::from_cartesian(&r, &v, EARTH_GM).unwrap();
        assert!((back.sma - coe.sma).abs() < 1e-3);
        assert!((back.ecc - coe.ecc).abs() < 1e-10);
        assert!((back.inc - coe.inc).abs() < 1e-12);
        assert!(between_pm_pi(back.raan - coe.raan).abs() < 1e-10);
        assert!(between_pm_pi(back.aop - coe.aop).abs() < 1e-8);
        assert!(between_pm_pi(back.ta - coe.ta).abs() < 1e-8);
    }

    #[test]
    fn circular_orbit_elements_are_recovered() {
        let gm = EARTH_GM;
        let r = Vector3::new(7e6, 0.0, 0.0);
        let v = Vector3::new(0.0, (gm / 7e6).sqrt(), 0.0);
        let coe = ClassicalElements::from_cartesian(&r, &v, gm).unwrap();
        assert!((coe.sma - 7e6).abs() < 1e-4);
        assert!(coe.ecc < 1e-12);
        assert!(coe.inc.abs() < 1e-12);
    }

    #[test]
    fn anomaly_round_trip() {
        let coe = ClassicalElements::new(2.5e7, 0.72, 0.3, 1.0, 2.0, 2.4);
        let ma = coe.mean_anomaly();
        let back = coe.with_mean_anomaly(ma);
        assert!(between_pm_pi(back.ta - coe.ta).abs() < 1e-10);
    }

    #[test]
    fn meoe_round_trip() {
        let coe = ClassicalElements::new(
            4.216e7,
            0.0004,
            0.9_f64.to_radians(),
            33.0_f64.to_radians(),
            12.0_f64.to_radians(),
            250.0_f64.to_radians(),
        );
        let meoe = ModifiedEquinoctial::from_coe(&coe);
        let back = meoe.to_coe();
        assert!((back.sma - coe.sma).abs() < 1e-3);
        assert!((back.ecc - coe.ecc).abs() < 1e-12);
        assert!((back.inc - coe.inc).abs() < 1e-12);
        assert!(between_pm_pi((back.raan + back.aop + back.ta) - (coe.raan + coe.aop + coe.ta)).abs() < 1e-9);
    }
}
