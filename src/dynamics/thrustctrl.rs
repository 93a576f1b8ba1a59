use super::Dynamics;
use crate::celestia::{ClassicalElements, Frame, LocalFrame};
use crate::errors::AstroError;
use crate::linalg::{DVector, Matrix3, SMatrix, Vector3};
use crate::od::finite_diff::FiniteDifferenceSolver;
use crate::state::{
    cartesian_position, cartesian_velocity, mass, GenericSubset, StateBuilder, SubsetRef,
};
use crate::time::Epoch;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Standard gravity used for the mass flow rate, in m/s^2.
pub const STD_GRAVITY: f64 = 9.806_65;

/// Eccentricity and inclination are clamped away from zero before evaluating
/// the Q-law, which is singular on circular and equatorial orbits.
const QLAW_SINGULARITY_TOLERANCE: f64 = 1e-4;

type Matrix5x3 = SMatrix<f64, 5, 3>;

/// A guidance law maps the current state to a unit thrust direction in the
/// integration frame.
pub trait GuidanceLaw: fmt::Debug + Send + Sync {
    fn direction(
        &self,
        epoch: Epoch,
        position: &Vector3<f64>,
        velocity: &Vector3<f64>,
        thrust_acceleration: f64,
    ) -> Result<Vector3<f64>, AstroError>;
}

/// A fixed thrust direction expressed in a local orbital frame, rotated into
/// the integration frame at every evaluation.
#[derive(Clone, Debug)]
pub struct ConstantLocalDirection {
    pub direction: Vector3<f64>,
    pub local_frame: LocalFrame,
}

impl ConstantLocalDirection {
    pub fn new(direction: Vector3<f64>, local_frame: LocalFrame) -> Arc<Self> {
        Arc::new(Self {
            direction: direction.normalize(),
            local_frame,
        })
    }

    /// Along-track thrust in the TNW frame.
    pub fn prograde() -> Arc<Self> {
        Self::new(Vector3::x(), LocalFrame::Tnw)
    }

    /// Against-track thrust in the TNW frame.
    pub fn retrograde() -> Arc<Self> {
        Self::new(-Vector3::x(), LocalFrame::Tnw)
    }
}

impl GuidanceLaw for ConstantLocalDirection {
    fn direction(
        &self,
        _epoch: Epoch,
        position: &Vector3<f64>,
        velocity: &Vector3<f64>,
        _thrust_acceleration: f64,
    ) -> Result<Vector3<f64>, AstroError> {
        Ok(self.local_frame.dcm_to_parent(position, velocity) * self.direction)
    }
}

/// The thruster dynamics: a propulsion description steered by a guidance law.
///
/// Writes `d(velocity)/dt = (T/m) direction` and `d(mass)/dt = -T/(Isp g0)`.
/// Fails with a mass-depleted error when the propagated mass reaches zero
/// while the thruster is live.
#[derive(Clone, Debug)]
pub struct Thruster {
    /// Thrust, in Newtons
    pub thrust: f64,
    /// Specific impulse, in seconds
    pub isp: f64,
    pub guidance: Arc<dyn GuidanceLaw>,
}

impl Thruster {
    pub fn new(thrust: f64, isp: f64, guidance: Arc<dyn GuidanceLaw>) -> Arc<Self> {
        Arc::new(Self {
            thrust,
            isp,
            guidance,
        })
    }

    pub fn is_live(&self) -> bool {
        self.thrust > 0.0
    }
}

impl Dynamics for Thruster {
    fn read_subsets(&self) -> Vec<SubsetRef> {
        vec![cartesian_position(), cartesian_velocity(), mass()]
    }

    fn write_subsets(&self) -> Vec<SubsetRef> {
        vec![cartesian_velocity(), mass()]
    }

    fn contribute(
        &self,
        epoch: Epoch,
        coordinates: &DVector<f64>,
        _frame: Frame,
    ) -> Result<DVector<f64>, AstroError> {
        if !self.is_live() {
            return Ok(DVector::zeros(4));
        }
        let r = Vector3::new(coordinates[0], coordinates[1], coordinates[2]);
        let v = Vector3::new(coordinates[3], coordinates[4], coordinates[5]);
        let sc_mass = coordinates[6];
        if sc_mass <= 0.0 {
            return Err(AstroError::MassDepleted);
        }

        let thrust_acceleration = self.thrust / sc_mass;
        let direction = self.guidance.direction(epoch, &r, &v, thrust_acceleration)?;
        let accel = thrust_acceleration * direction;
        let mass_flow = -self.thrust / (self.isp * STD_GRAVITY);

        Ok(DVector::from_vec(vec![
            accel[0], accel[1], accel[2], mass_flow,
        ]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The weighting and scaling parameters of the Q-law.
#[derive(Clone, Copy, Debug)]
pub struct QLawParameters {
    /// Semi-major-axis scaling exponent denominators (Petropoulos m, n, r)
    pub m: f64,
    pub n: f64,
    pub r: f64,
    /// Relative weight of the out-of-plane argument-of-periapsis change
    pub b: f64,
    /// Per-element control weights on (sma, ecc, inc, raan, aop)
    pub control_weights: [f64; 5],
}

impl Default for QLawParameters {
    fn default() -> Self {
        Self {
            m: 3.0,
            n: 4.0,
            r: 2.0,
            b: 0.01,
            control_weights: [1.0; 5],
        }
    }
}

/// The Q-law Lyapunov guidance law.
///
/// The thrust direction is the steepest descent of the proximity quotient Q,
/// a weighted penalty on the gap between the osculating and target classical
/// elements, each gap scaled by the best achievable rate of that element.
/// The gradient of Q over the elements is evaluated with the
/// finite-difference solver.
#[derive(Clone, Debug)]
pub struct QLaw {
    pub target: ClassicalElements,
    /// Gravitational parameter of the central body, in m^3/s^2
    pub gm: f64,
    pub parameters: QLawParameters,
    finite_difference_solver: FiniteDifferenceSolver,
    coe_state_builder: StateBuilder,
}

impl QLaw {
    pub fn new(
        target: ClassicalElements,
        gm: f64,
        parameters: QLawParameters,
        finite_difference_solver: FiniteDifferenceSolver,
    ) -> Arc<Self> {
        Arc::new(Self {
            target,
            gm,
            parameters,
            finite_difference_solver,
            coe_state_builder: StateBuilder::new(
                Frame::Gcrf,
                &[GenericSubset::new("COE_VECTOR", 6)],
            ),
        })
    }

    /// Rotation whose columns are the (theta, radial, angular momentum)
    /// directions expressed in the integration frame.
    fn theta_r_h_dcm(position: &Vector3<f64>, velocity: &Vector3<f64>) -> Matrix3<f64> {
        let r_hat = position.normalize();
        let h_hat = position.cross(velocity).normalize();
        let theta_hat = h_hat.cross(&r_hat);
        Matrix3::from_columns(&[theta_hat, r_hat, h_hat])
    }

    fn clamped(&self, coe: &ClassicalElements) -> ClassicalElements {
        let mut oe = *coe;
        oe.ecc = oe.ecc.max(QLAW_SINGULARITY_TOLERANCE);
        oe.inc = oe.inc.max(QLAW_SINGULARITY_TOLERANCE);
        oe
    }

    /// The proximity quotient for the provided element vector.
    pub fn compute_q(&self, oe: &ClassicalElements, thrust_acceleration: f64) -> f64 {
        let params = &self.parameters;
        let delta = [
            oe.sma - self.target.sma,
            oe.ecc - self.target.ecc,
            oe.inc - self.target.inc,
            (oe.raan - self.target.raan).cos().acos(),
            (oe.aop - self.target.aop).cos().acos(),
        ];

        // Petropoulos scaling keeps the semi-major-axis term bounded far from target
        let sma_scale =
            (1.0 + (delta[0].abs() / (params.m * self.target.sma)).powf(params.n)).powf(1.0 / params.r);
        let scaling = [sma_scale, 1.0, 1.0, 1.0, 1.0];

        let maximal = self.maximal_rates(oe, thrust_acceleration);

        let mut q = 0.0;
        for i in 0..5 {
            if params.control_weights[i] == 0.0 {
                continue;
            }
            let ratio = delta[i] / maximal[i];
            q += params.control_weights[i] * scaling[i] * ratio * ratio;
        }
        q
    }

    /// Best achievable rate of change of each element under the provided
    /// thrust acceleration (Petropoulos' maximal rates).
    fn maximal_rates(&self, oe: &ClassicalElements, f: f64) -> [f64; 5] {
        let (a, e, inc, aop) = (oe.sma, oe.ecc, oe.inc, oe.aop);
        let p = oe.semi_latus_rectum();
        let h = oe.angular_momentum(self.gm);
        let e2 = e * e;
        let (sin_aop, cos_aop) = aop.sin_cos();

        let sma_xx = 2.0 * f * (a.powi(3) * (1.0 + e) / (self.gm * (1.0 - e))).sqrt();
        let ecc_xx = 2.0 * p * f / h;
        let inc_xx = p * f / (h * ((1.0 - e2 * sin_aop * sin_aop).sqrt() - e * cos_aop.abs()));
        let raan_xx =
            p * f / (h * inc.sin() * ((1.0 - e2 * cos_aop * cos_aop).sqrt() - e * sin_aop.abs()));

        // True anomaly of the point maximizing the in-plane aop rate
        let alpha = (1.0 - e2) / (2.0 * e.powi(3));
        let beta = (alpha * alpha + 1.0 / 27.0).sqrt();
        let cos_ta_xx = (alpha + beta).cbrt() - (beta - alpha).cbrt() - 1.0 / e;
        let r_xx = p / (1.0 + e * cos_ta_xx);
        let aop_i_xx = (f / (e * h))
            * (p * p * cos_ta_xx * cos_ta_xx
                + (p + r_xx) * (p + r_xx) * (1.0 - cos_ta_xx * cos_ta_xx))
                .sqrt();
        let aop_o_xx = raan_xx * inc.cos().abs();
        let aop_xx = (aop_i_xx + self.parameters.b * aop_o_xx) / (1.0 + self.parameters.b);

        [sma_xx, ecc_xx, inc_xx, raan_xx, aop_xx]
    }

    /// Gauss variational partials d(oe)/d(F) in the (theta, radial, angular
    /// momentum) directions. Rows are (sma, ecc, inc, raan, aop).
    fn element_rates(&self, oe: &ClassicalElements) -> Matrix5x3 {
        let (e, inc, aop, ta) = (oe.ecc, oe.inc, oe.aop, oe.ta);
        let p = oe.semi_latus_rectum();
        let h = oe.angular_momentum(self.gm);
        let r = oe.radial_distance();

        let (sin_ta, cos_ta) = ta.sin_cos();
        let (sin_u, cos_u) = (ta + aop).sin_cos();

        let mut rates = Matrix5x3::zeros();

        let sma_alpha = 2.0 * oe.sma * oe.sma / h;
        rates[(0, 0)] = sma_alpha * p / r;
        rates[(0, 1)] = sma_alpha * e * sin_ta;

        rates[(1, 0)] = ((p + r) * cos_ta + r * e) / h;
        rates[(1, 1)] = p * sin_ta / h;

        rates[(2, 2)] = r * cos_u / h;

        rates[(3, 2)] = r * sin_u / (h * inc.sin());

        rates[(4, 0)] = (p + r) * sin_ta / (e * h);
        rates[(4, 1)] = -p * cos_ta / (e * h);
        rates[(4, 2)] = -r * sin_u * inc.cos() / (h * inc.sin());

        rates
    }
}

impl GuidanceLaw for QLaw {
    fn direction(
        &self,
        epoch: Epoch,
        position: &Vector3<f64>,
        velocity: &Vector3<f64>,
        thrust_acceleration: f64,
    ) -> Result<Vector3<f64>, AstroError> {
        let oe = self.clamped(&ClassicalElements::from_cartesian(position, velocity, self.gm)?);

        // dQ/d(oe) by central differences through the finite-difference solver
        let coe_state = self
            .coe_state_builder
            .build(epoch, DVector::from_column_slice(&oe.to_array()))?;
        let gradient = self.finite_difference_solver.compute_gradient(
            &coe_state,
            &mut |state| {
                let c = state.coordinates();
                let oe = ClassicalElements::from_array(&[c[0], c[1], c[2], c[3], c[4], c[5]]);
                Ok(self.compute_q(&oe, thrust_acceleration))
            },
        )?;

        // Chain through the Gauss partials: dQ/dF in (theta, r, h)
        let rates = self.element_rates(&oe);
        let mut descent = Vector3::zeros();
        for col in 0..3 {
            for row in 0..5 {
                descent[col] += gradient[row] * rates[(row, col)];
            }
        }

        let norm: f64 = descent.norm();
        if !norm.is_finite() || norm == 0.0 {
            return Err(AstroError::UndefinedInput(
                "Q-law gradient vanished, the thrust direction is undefined".to_string(),
            ));
        }
        let local = -descent / norm;

        Ok(Self::theta_r_h_dcm(position, velocity) * local)
    }
}
