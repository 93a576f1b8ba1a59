use super::bodies::{Celestial, CircularEphemeris, ExponentialAtmosphere};
use super::{Frame, RigidTransform};
use crate::errors::AstroError;
use crate::linalg::{UnitQuaternion, Vector3};
use crate::state::State;
use crate::time::{Epoch, J2000_OFFSET};
use std::f64::consts::PI;
use std::sync::Arc;

/// Gravitational parameter of the Earth, in m^3/s^2.
pub const EARTH_GM: f64 = 3.986_004_418e14;
/// Equatorial radius of the Earth, in meters.
pub const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;
/// Flattening of the Earth.
pub const EARTH_FLATTENING: f64 = 1.0 / 298.257_223_563;
/// Rotation rate of the Earth with respect to the stars, in rad/s.
pub const EARTH_ROTATION_RATE: f64 = 7.292_115_146_706_979e-5;
/// Earth rotation angle at the J2000 epoch, in radians.
const EARTH_ROTATION_ANGLE_J2000: f64 = 4.894_961_212_823_059;

/// Gravitational parameter of the Sun, in m^3/s^2.
pub const SUN_GM: f64 = 1.327_124_400_419_393_8e20;
/// Radius of the Sun, in meters.
pub const SUN_RADIUS: f64 = 6.957e8;
/// Gravitational parameter of the Moon, in m^3/s^2.
pub const MOON_GM: f64 = 4.902_800_066e12;

/// Mean obliquity of the ecliptic at J2000, in radians.
const ECLIPTIC_OBLIQUITY: f64 = 0.409_092_804_222_329_3;

/// The environment broker, from the Greek word for "world".
///
/// A `Cosm` owns the celestial bodies of a computation and serves the rigid
/// transforms between frames. It is built once, shared behind an `Arc`, and
/// never mutated afterwards.
///
/// The bodies use analytic ephemerides and rotation models: transforms are
/// exact for the frame definitions above, which stand in for an external
/// Earth-orientation service.
#[derive(Debug)]
pub struct Cosm {
    earth: Arc<Celestial>,
    sun: Arc<Celestial>,
    moon: Arc<Celestial>,
}

impl Cosm {
    /// The standard environment: Earth with an exponential atmosphere, and
    /// analytic Sun and Moon ephemerides.
    pub fn standard() -> Arc<Self> {
        let earth = Arc::new(
            Celestial::new("Earth", EARTH_GM, EARTH_EQUATORIAL_RADIUS, EARTH_FLATTENING)
                .with_rotation(EARTH_ROTATION_RATE, Frame::IauEarth)
                .with_atmosphere(Arc::new(ExponentialAtmosphere::earth())),
        );

        // Mean-circular ephemerides: solar mean longitude 280.460 deg and
        // lunar mean longitude 218.316 deg at J2000.
        let sun = Arc::new(
            Celestial::new("Sun", SUN_GM, SUN_RADIUS, 0.0).with_ephemeris(Arc::new(
                CircularEphemeris::in_ecliptic(
                    1.495_978_707e11,
                    2.0 * PI / (365.25 * 86_400.0),
                    280.460_f64.to_radians(),
                    ECLIPTIC_OBLIQUITY,
                ),
            )),
        );
        let moon = Arc::new(
            Celestial::new("Moon", MOON_GM, 1.737_4e6, 0.0).with_ephemeris(Arc::new(
                CircularEphemeris::in_ecliptic(
                    3.844e8,
                    2.0 * PI / (27.321_661 * 86_400.0),
                    218.316_f64.to_radians(),
                    ECLIPTIC_OBLIQUITY,
                ),
            )),
        );

        Arc::new(Self { earth, sun, moon })
    }

    pub fn earth(&self) -> Arc<Celestial> {
        self.earth.clone()
    }

    pub fn sun(&self) -> Arc<Celestial> {
        self.sun.clone()
    }

    pub fn moon(&self) -> Arc<Celestial> {
        self.moon.clone()
    }

    /// Earth rotation angle with respect to GCRF at the provided epoch.
    pub fn earth_rotation_angle(epoch: Epoch) -> f64 {
        let dt = epoch.as_tai_seconds() - Epoch::from_mjd_tai(J2000_OFFSET).as_tai_seconds();
        EARTH_ROTATION_ANGLE_J2000 + EARTH_ROTATION_RATE * dt
    }

    /// Rotation from GCRF into the provided frame, and the angular velocity
    /// of that frame with respect to GCRF (in that frame).
    fn rotation_from_gcrf(frame: Frame, epoch: Epoch) -> (UnitQuaternion<f64>, Vector3<f64>) {
        match frame {
            // Inertial frames coincide with the root at this fidelity
            Frame::Gcrf | Frame::Eme2000 | Frame::Teme => {
                (UnitQuaternion::identity(), Vector3::zeros())
            }
            Frame::IauEarth => {
                let theta = Self::earth_rotation_angle(epoch);
                (
                    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -theta),
                    Vector3::new(0.0, 0.0, EARTH_ROTATION_RATE),
                )
            }
        }
    }

    /// The rigid transform taking coordinates from one frame to another at
    /// the provided epoch.
    pub fn transform(
        &self,
        from: Frame,
        to: Frame,
        epoch: Epoch,
    ) -> Result<RigidTransform, AstroError> {
        if from == to {
            return Ok(RigidTransform::identity());
        }
        let (q_from, omega_from) = Self::rotation_from_gcrf(from, epoch);
        let (q_to, omega_to) = Self::rotation_from_gcrf(to, epoch);
        let rotation = q_to * q_from.inverse();
        // Angular velocity of the target with respect to the source, in the target frame
        let angular_velocity = omega_to - rotation * omega_from;
        Ok(RigidTransform {
            rotation,
            translation: Vector3::zeros(),
            angular_velocity,
        })
    }

    /// Expresses the provided state in another frame.
    pub fn frame_chg(&self, state: &State, to: Frame) -> Result<State, AstroError> {
        state.in_frame(to, self)
    }
}
