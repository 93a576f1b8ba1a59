use super::cosm::Cosm;
use super::Frame;
use crate::errors::AstroError;
use crate::linalg::Vector3;
use crate::time::{Epoch, J2000_OFFSET};
use std::fmt;
use std::sync::Arc;

/// Serves the position of a celestial body in GCRF, in meters.
///
/// This is the contract of an external ephemeris service; the analytic
/// implementations in this module are hermetic stand-ins.
pub trait Ephemeris: fmt::Debug + Send + Sync {
    fn position(&self, epoch: Epoch) -> Vector3<f64>;
}

/// Perturbing gravitational acceleration beyond the point mass, evaluated in
/// the body-fixed frame, in m/s^2.
///
/// Harmonic coefficient storage is external; [`ZonalHarmonics`] ships the
/// zonal-only closed forms used by the tests.
pub trait HarmonicField: fmt::Debug + Send + Sync {
    fn degree(&self) -> usize;
    fn order(&self) -> usize;
    fn acceleration(&self, r_bf: &Vector3<f64>) -> Vector3<f64>;
}

/// Atmospheric density at a body-fixed position, in kg/m^3.
pub trait AtmosphereModel: fmt::Debug + Send + Sync {
    fn density(&self, r_bf: &Vector3<f64>, epoch: Epoch) -> f64;
}

/// A celestial body: point-mass parameters plus optional gravity harmonics,
/// atmosphere and ephemeris sub-models.
///
/// Bodies are shared immutably (`Arc<Celestial>`) between all dynamics of a
/// computation.
#[derive(Clone, Debug)]
pub struct Celestial {
    pub name: String,
    /// Gravitational parameter, in m^3/s^2
    pub gm: f64,
    /// Equatorial radius, in meters
    pub equatorial_radius: f64,
    pub flattening: f64,
    /// Body spin rate about its polar axis, in rad/s
    pub rotation_rate: f64,
    /// The body-fixed frame, when the Cosm serves one for this body
    pub body_fixed_frame: Option<Frame>,
    ephemeris: Option<Arc<dyn Ephemeris>>,
    harmonics: Option<Arc<dyn HarmonicField>>,
    atmosphere: Option<Arc<dyn AtmosphereModel>>,
}

impl Celestial {
    pub fn new<S: Into<String>>(name: S, gm: f64, equatorial_radius: f64, flattening: f64) -> Self {
        Self {
            name: name.into(),
            gm,
            equatorial_radius,
            flattening,
            rotation_rate: 0.0,
            body_fixed_frame: None,
            ephemeris: None,
            harmonics: None,
            atmosphere: None,
        }
    }

    pub fn with_rotation(mut self, rotation_rate: f64, body_fixed_frame: Frame) -> Self {
        self.rotation_rate = rotation_rate;
        self.body_fixed_frame = Some(body_fixed_frame);
        self
    }

    pub fn with_ephemeris(mut self, ephemeris: Arc<dyn Ephemeris>) -> Self {
        self.ephemeris = Some(ephemeris);
        self
    }

    pub fn with_harmonics(mut self, harmonics: Arc<dyn HarmonicField>) -> Self {
        self.harmonics = Some(harmonics);
        self
    }

    pub fn with_atmosphere(mut self, atmosphere: Arc<dyn AtmosphereModel>) -> Self {
        self.atmosphere = Some(atmosphere);
        self
    }

    pub fn harmonics(&self) -> Option<&Arc<dyn HarmonicField>> {
        self.harmonics.as_ref()
    }

    pub fn atmosphere(&self) -> Option<&Arc<dyn AtmosphereModel>> {
        self.atmosphere.as_ref()
    }

    pub fn has_ephemeris(&self) -> bool {
        self.ephemeris.is_some()
    }

    /// Position of this body in GCRF. Bodies without an ephemeris sit at the
    /// geocenter (they are the center of integration).
    pub fn position(&self, epoch: Epoch) -> Vector3<f64> {
        match &self.ephemeris {
            Some(ephemeris) => ephemeris.position(epoch),
            None => Vector3::zeros(),
        }
    }

    /// Position of this body in the requested frame.
    pub fn position_in(
        &self,
        frame: Frame,
        epoch: Epoch,
        cosm: &Cosm,
    ) -> Result<Vector3<f64>, AstroError> {
        let r_gcrf = self.position(epoch);
        let xf = cosm.transform(Frame::Gcrf, frame, epoch)?;
        let (r, _) = xf.apply(&r_gcrf, &Vector3::zeros());
        Ok(r)
    }

    /// Total gravitational acceleration at a body-fixed position: point mass
    /// plus the harmonic expansion when one is attached.
    pub fn gravitational_field_at(&self, r_bf: &Vector3<f64>, _epoch: Epoch) -> Vector3<f64> {
        let rmag = r_bf.norm();
        let mut accel = -self.gm / rmag.powi(3) * r_bf;
        if let Some(harmonics) = &self.harmonics {
            accel += harmonics.acceleration(r_bf);
        }
        accel
    }
}

/// A circular ephemeris in a plane inclined to the equator, for the
/// mean-motion Sun and Moon fixtures.
#[derive(Clone, Debug)]
pub struct CircularEphemeris {
    pub radius: f64,
    /// Mean motion along the circle, in rad/s
    pub rate: f64,
    /// Longitude in the orbit plane at J2000, in radians
    pub phase_at_j2000: f64,
    /// Inclination of the orbit plane to the equator, in radians
    pub obliquity: f64,
}

impl CircularEphemeris {
    pub fn in_ecliptic(radius: f64, rate: f64, phase_at_j2000: f64, obliquity: f64) -> Self {
        Self {
            radius,
            rate,
            phase_at_j2000,
            obliquity,
        }
    }
}

impl Ephemeris for CircularEphemeris {
    fn position(&self, epoch: Epoch) -> Vector3<f64> {
        let dt = epoch.as_tai_seconds() - Epoch::from_mjd_tai(J2000_OFFSET).as_tai_seconds();
        let lambda = self.phase_at_j2000 + self.rate * dt;
        let (sin_l, cos_l) = lambda.sin_cos();
        let (sin_e, cos_e) = self.obliquity.sin_cos();
        self.radius * Vector3::new(cos_l, sin_l * cos_e, sin_l * sin_e)
    }
}

/// Exponential atmosphere: `rho = rho0 * exp(-(h - h0) / H)` with the
/// altitude measured above the equatorial radius.
#[derive(Clone, Debug)]
pub struct ExponentialAtmosphere {
    /// Density at the reference altitude, in kg/m^3
    pub rho0: f64,
    /// Reference altitude, in meters
    pub ref_altitude: f64,
    /// Scale height, in meters
    pub scale_height: f64,
    /// Radius from which altitudes are measured, in meters
    pub body_radius: f64,
}

impl ExponentialAtmosphere {
    /// Vallado's 700 km reference band for the Earth.
    pub fn earth() -> Self {
        Self {
            rho0: 3.614e-13,
            ref_altitude: 700_000.0,
            scale_height: 88_667.0,
            body_radius: super::cosm::EARTH_EQUATORIAL_RADIUS,
        }
    }

    pub fn new(rho0: f64, ref_altitude: f64, scale_height: f64, body_radius: f64) -> Self {
        Self {
            rho0,
            ref_altitude,
            scale_height,
            body_radius,
        }
    }
}

impl AtmosphereModel for ExponentialAtmosphere {
    fn density(&self, r_bf: &Vector3<f64>, _epoch: Epoch) -> f64 {
        let altitude = r_bf.norm() - self.body_radius;
        self.rho0 * (-(altitude - self.ref_altitude) / self.scale_height).exp()
    }
}

/// Zonal-only gravity harmonics (J2 through J4) in closed form.
///
/// Stands in for an external spherical-harmonics store when only the secular
/// zonal terms matter.
#[derive(Clone, Debug)]
pub struct ZonalHarmonics {
    pub gm: f64,
    pub reference_radius: f64,
    pub j2: f64,
    pub j3: f64,
    pub j4: f64,
    degree: usize,
}

impl ZonalHarmonics {
    /// EGM96 zonal coefficients for the Earth, truncated to the given degree (2 to 4).
    pub fn egm96(degree: usize) -> Self {
        Self {
            gm: super::cosm::EARTH_GM,
            reference_radius: super::cosm::EARTH_EQUATORIAL_RADIUS,
            j2: 1.082_626_683_553_151_3e-3,
            j3: if degree >= 3 { -2.532_656_485_33e-6 } else { 0.0 },
            j4: if degree >= 4 { -1.619_621_591_37e-6 } else { 0.0 },
            degree: degree.min(4),
        }
    }
}

impl HarmonicField for ZonalHarmonics {
    fn degree(&self) -> usize {
        self.degree
    }

    fn order(&self) -> usize {
        0
    }

    fn acceleration(&self, r_bf: &Vector3<f64>) -> Vector3<f64> {
        let r = r_bf.norm();
        let (x, y, z) = (r_bf[0], r_bf[1], r_bf[2]);
        let z2_r2 = z * z / (r * r);

        // J2, Vallado 4th ed. eq. 8-30
        let k2 = -1.5 * self.j2 * self.gm * self.reference_radius.powi(2) / r.powi(5);
        let mut accel = Vector3::new(
            k2 * x * (1.0 - 5.0 * z2_r2),
            k2 * y * (1.0 - 5.0 * z2_r2),
            k2 * z * (3.0 - 5.0 * z2_r2),
        );

        if self.j3 != 0.0 {
            let k3 = -2.5 * self.j3 * self.gm * self.reference_radius.powi(3) / r.powi(7);
            accel += Vector3::new(
                k3 * x * (3.0 * z - 7.0 * z.powi(3) / (r * r)),
                k3 * y * (3.0 * z - 7.0 * z.powi(3) / (r * r)),
                k3 * (6.0 * z * z - 7.0 * z.powi(4) / (r * r) - 0.6 * r * r),
            );
        }

        if self.j4 != 0.0 {
            let k4 = 1.875 * self.j4 * self.gm * self.reference_radius.powi(4) / r.powi(7);
            accel += Vector3::new(
                k4 * x * (1.0 - 14.0 * z2_r2 + 21.0 * z2_r2 * z2_r2),
                k4 * y * (1.0 - 14.0 * z2_r2 + 21.0 * z2_r2 * z2_r2),
                k4 * z * (5.0 - 70.0 / 3.0 * z2_r2 + 21.0 * z2_r2 * z2_r2),
            );
        }

        accel
    }
}
