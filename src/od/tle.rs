use super::least_squares::{Analysis, LeastSquaresSolver, SigmaMap};
use crate::celestia::cosm::EARTH_GM;
use crate::celestia::{Cosm, Frame, ModifiedEquinoctial, Orbit, Sgp4, Sgp4Evaluator, Tle};
use crate::errors::AstroError;
use crate::linalg::DVector;
use crate::state::{AngularSubset, ScalarSubset, State, StateBuilder, SubsetRef};
use crate::time::Epoch;
use std::cell::Cell;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref SEMI_LATUS_RECTUM: SubsetRef = ScalarSubset::new("SEMI_LATUS_RECTUM");
    static ref ECCENTRICITY_X: SubsetRef = ScalarSubset::new("ECCENTRICITY_X");
    static ref ECCENTRICITY_Y: SubsetRef = ScalarSubset::new("ECCENTRICITY_Y");
    static ref NODE_X: SubsetRef = ScalarSubset::new("NODE_X");
    static ref NODE_Y: SubsetRef = ScalarSubset::new("NODE_Y");
    static ref TRUE_LONGITUDE: SubsetRef = AngularSubset::new("TRUE_LONGITUDE");
    static ref B_STAR: SubsetRef = ScalarSubset::new("B_STAR");
}

/// The accepted shapes of a TLE solver initial guess.
#[derive(Clone, Debug)]
pub enum InitialGuess {
    Tle(Tle),
    /// A Cartesian state with an accompanying B* value
    CartesianWithBStar(State, f64),
    Cartesian(State),
}

/// The outcome of a TLE fit.
#[derive(Clone, Debug)]
pub struct TleAnalysis {
    pub estimated_tle: Tle,
    pub solver_analysis: Analysis,
}

/// Fits TLE parameters to observed states through an SGP4 evaluator.
///
/// The estimated vector is the modified equinoctial reparameterization of the
/// TLE (semi-latus rectum, eccentricity and node vectors, true longitude),
/// optionally extended with B*. Each least-squares trial converts the current
/// parameters back to a TLE, evaluates SGP4 at the observation instants and
/// compares in the estimation frame.
pub struct TleSolver {
    solver: LeastSquaresSolver,
    pub satellite_number: u32,
    pub international_designator: String,
    pub revolution_number: u32,
    pub estimate_b_star: bool,
    pub estimation_frame: Frame,
    default_b_star: Cell<f64>,
    first_derivative_mean_motion_over_2: f64,
    second_derivative_mean_motion_over_6: f64,
    ephemeris_type: u8,
    element_set_number: u16,
    tle_state_builder: StateBuilder,
    sgp4: Arc<dyn Sgp4Evaluator>,
    cosm: Arc<Cosm>,
}

impl fmt::Debug for TleSolver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TleSolver {{ sat {} ({}), B* estimated: {} }}",
            self.satellite_number, self.international_designator, self.estimate_b_star
        )
    }
}

impl TleSolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        solver: LeastSquaresSolver,
        sgp4: Arc<dyn Sgp4Evaluator>,
        satellite_number: u32,
        international_designator: &str,
        revolution_number: u32,
        estimate_b_star: bool,
        estimation_frame: Frame,
        cosm: Arc<Cosm>,
    ) -> Self {
        let mut subsets = vec![
            SEMI_LATUS_RECTUM.clone(),
            ECCENTRICITY_X.clone(),
            ECCENTRICITY_Y.clone(),
            NODE_X.clone(),
            NODE_Y.clone(),
            TRUE_LONGITUDE.clone(),
        ];
        if estimate_b_star {
            subsets.push(B_STAR.clone());
        }

        Self {
            solver,
            satellite_number,
            international_designator: international_designator.to_string(),
            revolution_number,
            estimate_b_star,
            estimation_frame,
            default_b_star: Cell::new(0.0),
            first_derivative_mean_motion_over_2: 0.0,
            second_derivative_mean_motion_over_6: 0.0,
            ephemeris_type: 0,
            element_set_number: 0,
            tle_state_builder: StateBuilder::new(Frame::Teme, &subsets),
            sgp4,
            cosm,
        }
    }

    /// Fits the TLE parameters to the observations.
    pub fn estimate(
        &self,
        initial_guess: &InitialGuess,
        observations: &[State],
        initial_guess_sigmas: &SigmaMap,
        observation_sigmas: &SigmaMap,
    ) -> Result<TleAnalysis, AstroError> {
        let guess_state = match initial_guess {
            InitialGuess::Tle(tle) => self.tle_to_tle_state(tle)?,
            InitialGuess::CartesianWithBStar(state, b_star) => {
                if !self.estimate_b_star {
                    self.default_b_star.set(*b_star);
                }
                self.cartesian_to_tle_state(state, *b_star)?
            }
            InitialGuess::Cartesian(state) => {
                if self.estimate_b_star {
                    return Err(AstroError::UndefinedInput(
                        "estimating B* takes a TLE or a (state, B*) initial guess".to_string(),
                    ));
                }
                self.cartesian_to_tle_state(state, self.default_b_star.get())?
            }
        };

        let observations: Vec<State> = observations
            .iter()
            .map(|observation| observation.in_frame(self.estimation_frame, &self.cosm))
            .collect::<Result<_, _>>()?;

        let mut generator = |tle_state: &State, instants: &[Epoch]| -> Result<Vec<State>, AstroError> {
            let tle = self.tle_state_to_tle(tle_state)?;
            instants
                .iter()
                .map(|instant| {
                    self.sgp4
                        .state_at(&tle, *instant)?
                        .in_frame(self.estimation_frame, &self.cosm)
                })
                .collect()
        };

        let analysis = self.solver.solve(
            &guess_state,
            &observations,
            &mut generator,
            initial_guess_sigmas,
            observation_sigmas,
        )?;

        let estimated_tle = self.tle_state_to_tle(&analysis.estimated_state)?;
        Ok(TleAnalysis {
            estimated_tle,
            solver_analysis: analysis,
        })
    }

    /// Fits and forms an [`Orbit`] around the SGP4 model of the estimated TLE.
    pub fn estimate_orbit(
        &self,
        initial_guess: &InitialGuess,
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
        Ok(Orbit::new(
            Arc::new(Sgp4::new(analysis.estimated_tle, self.sgp4.clone())),
            self.cosm.earth(),
        ))
    }

    /// Evaluates the TLE at its own epoch and re-parameterizes into the
    /// solver's equinoctial state.
    fn tle_to_tle_state(&self, tle: &Tle) -> Result<State, AstroError> {
        let state = self.sgp4.state_at(tle, tle.epoch)?;
        let teme = state.in_frame(Frame::Teme, &self.cosm)?;
        self.build_tle_state(
            teme.epoch,
            &ModifiedEquinoctial::from_cartesian(&teme.position()?, &teme.velocity()?, EARTH_GM)?,
            tle.b_star,
        )
    }

    fn cartesian_to_tle_state(&self, state: &State, b_star: f64) -> Result<State, AstroError> {
        let teme = state.in_frame(Frame::Teme, &self.cosm)?;
        self.build_tle_state(
            teme.epoch,
            &ModifiedEquinoctial::from_cartesian(&teme.position()?, &teme.velocity()?, EARTH_GM)?,
            b_star,
        )
    }

    fn build_tle_state(
        &self,
        epoch: Epoch,
        meoe: &ModifiedEquinoctial,
        b_star: f64,
    ) -> Result<State, AstroError> {
        let mut coordinates = meoe.to_array().to_vec();
        if self.estimate_b_star {
            coordinates.push(b_star);
        }
        self.tle_state_builder
            .build(epoch, DVector::from_vec(coordinates))
    }

    /// Converts the solver's equinoctial state back into a TLE record.
    fn tle_state_to_tle(&self, tle_state: &State) -> Result<Tle, AstroError> {
        let coordinates = tle_state.coordinates();
        let meoe = ModifiedEquinoctial::new(
            coordinates[0],
            coordinates[1],
            coordinates[2],
            coordinates[3],
            coordinates[4],
            coordinates[5],
        );
        let coe = meoe.to_coe();
        let mean_motion_rev_day = coe.mean_motion(EARTH_GM) * 86_400.0 / (2.0 * PI);

        let b_star = if self.estimate_b_star {
            coordinates[6]
        } else {
            self.default_b_star.get()
        };

        Ok(Tle::construct(
            self.satellite_number,
            'U',
            &self.international_designator,
            tle_state.epoch,
            self.first_derivative_mean_motion_over_2,
            self.second_derivative_mean_motion_over_6,
            b_star,
            self.ephemeris_type,
            self.element_set_number,
            coe.inc.to_degrees(),
            coe.raan.to_degrees(),
            coe.ecc,
            coe.aop.to_degrees(),
            coe.mean_anomaly().to_degrees(),
            mean_motion_rev_day,
            self.revolution_number,
        ))
    }
}
