use crate::linalg::{Matrix3, UnitQuaternion, Vector3};
use std::fmt;

/// The environment broker: celestial bodies and frame transforms.
pub mod cosm;

/// Celestial bodies and the gravity, atmosphere and ephemeris model contracts.
pub mod bodies;

/// Classical and modified equinoctial orbital elements.
pub mod coe;

/// Two-line element records and the SGP4 evaluation contract.
pub mod tle;

/// A trajectory handle formed around an orbit model.
pub mod orbit;

/// Umbra/penumbra geometry and eclipse interval search.
pub mod eclipse;

pub use bodies::{AtmosphereModel, Celestial, Ephemeris, ExponentialAtmosphere, HarmonicField, ZonalHarmonics};
pub use coe::{ClassicalElements, ModifiedEquinoctial};
pub use cosm::Cosm;
pub use eclipse::{EclipseLocator, EclipseState};
pub use orbit::{Orbit, TrajectoryModel};
pub use tle::{Sgp4, Sgp4Evaluator, Tle};

/// A reference frame handle.
///
/// Frames are cheap copyable names; the transforms between them are served by
/// the [`Cosm`]. `Gcrf` is the integration root. At this crate's fidelity
/// `Eme2000` and `Teme` are fixed-rotation inertial frames, and `IauEarth` is
/// the Earth-fixed frame rotating at the sidereal rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Frame {
    /// Geocentric Celestial Reference Frame, the integration root
    Gcrf,
    /// Earth mean equator and equinox of J2000
    Eme2000,
    /// True equator, mean equinox: the frame of SGP4 outputs
    Teme,
    /// Earth body-fixed, rotating at the sidereal rate
    IauEarth,
}

impl Frame {
    pub fn is_inertial(self) -> bool {
        !matches!(self, Frame::IauEarth)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frame::Gcrf => write!(f, "GCRF"),
            Frame::Eme2000 => write!(f, "EME2000"),
            Frame::Teme => write!(f, "TEME"),
            Frame::IauEarth => write!(f, "IAU Earth"),
        }
    }
}

/// A rigid transform between two frames at an instant.
///
/// `rotation` maps source coordinates into target coordinates, `translation`
/// is the source origin seen from the target origin (in target coordinates),
/// and `angular_velocity` is the rotation rate of the target frame with
/// respect to the source frame, expressed in the target frame.
#[derive(Clone, Debug)]
pub struct RigidTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }

    /// Applies this transform jointly to a position and a velocity.
    pub fn apply(&self, position: &Vector3<f64>, velocity: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        let r = self.rotation * position + self.translation;
        let v = self.rotation * velocity - self.angular_velocity.cross(&r);
        (r, v)
    }

    /// The transform mapping target coordinates back into source coordinates.
    pub fn inverse(&self) -> Self {
        let inv = self.rotation.inverse();
        Self {
            rotation: inv,
            translation: -(inv * self.translation),
            angular_velocity: -(inv * self.angular_velocity),
        }
    }
}

/// A local orbital frame built from the current position and velocity.
///
/// The direction cosine matrix maps local coordinates into the frame the
/// position and velocity are expressed in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LocalFrame {
    /// x along the radius vector, z along the angular momentum
    Qsw,
    /// x along the velocity, z along the angular momentum
    Tnw,
    /// x along the velocity, y along the angular momentum
    Vnc,
    /// z toward the body center, y opposite the angular momentum
    Lvlh,
}

impl LocalFrame {
    /// Columns are the local basis vectors expressed in the parent frame.
    pub fn dcm_to_parent(self, position: &Vector3<f64>, velocity: &Vector3<f64>) -> Matrix3<f64> {
        let r_hat = position.normalize();
        let h_hat = position.cross(velocity).normalize();
        let v_hat = velocity.normalize();
        match self {
            LocalFrame::Qsw => {
                let s_hat = h_hat.cross(&r_hat);
                Matrix3::from_columns(&[r_hat, s_hat, h_hat])
            }
            LocalFrame::Tnw => {
                let n_hat = h_hat.cross(&v_hat);
                Matrix3::from_columns(&[v_hat, n_hat, h_hat])
            }
            LocalFrame::Vnc => {
                let c_hat = v_hat.cross(&h_hat);
                Matrix3::from_columns(&[v_hat, h_hat, c_hat])
            }
            LocalFrame::Lvlh => {
                let z_hat = -r_hat;
                let y_hat = -h_hat;
                let x_hat = y_hat.cross(&z_hat);
                Matrix3::from_columns(&[x_hat, y_hat, z_hat])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_frames_are_orthonormal() {
        let r = Vector3::new(7e6, 1e5, -2e5);
        let v = Vector3::new(10.0, 7.4e3, 120.0);
        for frame in [LocalFrame::Qsw, LocalFrame::Tnw, LocalFrame::Vnc, LocalFrame::Lvlh].iter() {
            let dcm = frame.dcm_to_parent(&r, &v);
            let should_be_eye = dcm.transpose() * dcm;
            assert!((should_be_eye - Matrix3::identity()).norm() < 1e-12, "{:?}", frame);
            assert!((dcm.determinant() - 1.0).abs() < 1e-12, "{:?}", frame);
        }
    }

    #[test]
    fn qsw_radial_axis_points_outward() {
        let r = Vector3::new(7e6, 0.0, 0.0);
        let v = Vector3::new(0.0, 7.5e3, 0.0);
        let dcm = LocalFrame::Qsw.dcm_to_parent(&r, &v);
        assert!((dcm.column(0) - Vector3::x()).norm() < 1e-14);
        assert!((dcm.column(2) - Vector3::z()).norm() < 1e-14);
    }
}
