use super::Frame;
use crate::errors::AstroError;
use crate::state::State;
use crate::time::Epoch;
use std::fmt;
use std::sync::Arc;

/// A two-line element set as a typed record.
///
/// Text parsing and checksum handling live upstream: this crate only consumes
/// and produces the parsed record. Angles are in degrees and the mean motion
/// in revolutions per day, matching the TLE convention.
#[derive(Clone, Debug, PartialEq)]
pub struct Tle {
    pub satellite_number: u32,
    pub classification: char,
    pub international_designator: String,
    pub epoch: Epoch,
    /// First derivative of the mean motion divided by two, in rev/day^2
    pub mean_motion_dot_over_2: f64,
    /// Second derivative of the mean motion divided by six, in rev/day^3
    pub mean_motion_ddot_over_6: f64,
    /// Drag term, in 1/Earth radii
    pub b_star: f64,
    pub ephemeris_type: u8,
    pub element_set_number: u16,
    /// Inclination, in degrees
    pub inclination: f64,
    /// Right ascension of the ascending node, in degrees
    pub raan: f64,
    pub eccentricity: f64,
    /// Argument of perigee, in degrees
    pub aop: f64,
    /// Mean anomaly, in degrees
    pub mean_anomaly: f64,
    /// Mean motion, in revolutions per day
    pub mean_motion: f64,
    pub revolution_number: u32,
}

impl Tle {
    /// Builds a TLE record from its fields, in the order of the wire format.
    #[allow(clippy::too_many_arguments)]
    pub fn construct(
        satellite_number: u32,
        classification: char,
        international_designator: &str,
        epoch: Epoch,
        mean_motion_dot_over_2: f64,
        mean_motion_ddot_over_6: f64,
        b_star: f64,
        ephemeris_type: u8,
        element_set_number: u16,
        inclination: f64,
        raan: f64,
        eccentricity: f64,
        aop: f64,
        mean_anomaly: f64,
        mean_motion: f64,
        revolution_number: u32,
    ) -> Self {
        Self {
            satellite_number,
            classification,
            international_designator: international_designator.to_string(),
            epoch,
            mean_motion_dot_over_2,
            mean_motion_ddot_over_6,
            b_star,
            ephemeris_type,
            element_set_number,
            inclination,
            raan,
            eccentricity,
            aop,
            mean_anomaly,
            mean_motion,
            revolution_number,
        }
    }

    /// Mean motion in rad/s.
    pub fn mean_motion_rad_s(&self) -> f64 {
        self.mean_motion * 2.0 * std::f64::consts::PI / 86_400.0
    }
}

impl fmt::Display for Tle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TLE {} ({}) @ {}: i={:.4} deg raan={:.4} deg e={:.7} aop={:.4} deg M={:.4} deg n={:.8} rev/day B*={:.4e}",
            self.satellite_number,
            self.international_designator,
            self.epoch,
            self.inclination,
            self.raan,
            self.eccentricity,
            self.aop,
            self.mean_anomaly,
            self.mean_motion,
            self.b_star,
        )
    }
}

/// The SGP4 evaluation contract: an external analytical theory which maps a
/// TLE to a Cartesian state in TEME at any epoch.
pub trait Sgp4Evaluator: fmt::Debug {
    fn state_at(&self, tle: &Tle, epoch: Epoch) -> Result<State, AstroError>;
}

/// An SGP4 model bound to one TLE.
#[derive(Clone, Debug)]
pub struct Sgp4 {
    pub tle: Tle,
    evaluator: Arc<dyn Sgp4Evaluator>,
}

impl Sgp4 {
    pub fn new(tle: Tle, evaluator: Arc<dyn Sgp4Evaluator>) -> Self {
        Self { tle, evaluator }
    }

    /// The state of this TLE at the provided epoch, in TEME.
    pub fn state_at(&self, epoch: Epoch) -> Result<State, AstroError> {
        let state = self.evaluator.state_at(&self.tle, epoch)?;
        debug_assert_eq!(state.frame, Frame::Teme);
        Ok(state)
    }
}
