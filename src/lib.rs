/*! # astrodyn

An astrodynamics engine built around three layers:

1. **Propagation**: pluggable force models ([`dynamics`]) composed into a
   single system of equations, integrated by an adaptive Runge-Kutta solver
   with dense output and event-condition root finding ([`propagators`]).
2. **Segmentation**: event-bounded propagation phases chained into mission
   sequences ([`md`]).
3. **Estimation**: finite-difference sensitivities feeding a nonlinear
   least-squares solver, wrapped by Cartesian orbit determination and a TLE
   solver ([`od`]).

Time services are provided by `hifitime` (re-exported as [`time`]) and linear
algebra by `nalgebra` (re-exported as [`linalg`]). Reference frames, celestial
bodies and their gravity/atmosphere/ephemeris models live in [`celestia`];
the heterogeneous state vector and its coordinate broker live in [`state`].
*/

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

/// Re-export of hifitime: `Epoch`, `Duration`, `TimeUnit`.
pub use hifitime as time;

/// Re-export of nalgebra.
pub use nalgebra as linalg;

/// Crate-wide error enum.
pub mod errors;

/// Frames, celestial bodies, orbital elements, TLEs and eclipse geometry.
pub mod celestia;

/// Force and kinematic models which contribute partial derivatives, and the
/// guidance laws consumed by the thruster model.
pub mod dynamics;

/// Mission design: the propagator, event-bounded segments and sequences.
pub mod md;

/// Orbit determination: finite differences, least squares, and the TLE solver.
pub mod od;

/// The numerical ODE solver, its steppers and error control, and the event
/// conditions it isolates.
pub mod propagators;

/// Bracketed scalar root finding.
pub mod roots;

/// Coordinate subsets, the coordinate broker, and the state vector they label.
pub mod state;

/// Small math helpers shared across the crate.
pub mod utils;

pub use crate::errors::AstroError;
