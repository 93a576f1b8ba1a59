use super::bodies::Celestial;
use super::cosm::Cosm;
use super::orbit::TrajectoryModel;
use super::Frame;
use crate::errors::AstroError;
use crate::roots::RootSolver;
use crate::state::State;
use crate::time::{Duration, Epoch, TimeUnit};
use std::fmt;
use std::sync::Arc;

/// Illumination of a state with respect to one occulting body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EclipseState {
    /// Fully inside the shadow cone
    Umbra,
    /// Partially shadowed
    Penumbra,
    /// In full view of the light source
    Visibilis,
}

impl fmt::Display for EclipseState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EclipseState::Umbra => write!(f, "umbra"),
            EclipseState::Penumbra => write!(f, "penumbra"),
            EclipseState::Visibilis => write!(f, "visibilis"),
        }
    }
}

/// One umbra passage.
#[derive(Clone, Debug)]
pub struct EclipseEvent {
    pub start: Epoch,
    pub end: Epoch,
}

impl EclipseEvent {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Conical-shadow eclipse geometry for a trajectory around one occulting
/// body, lit by one light source.
#[derive(Clone, Debug)]
pub struct EclipseLocator {
    pub light_source: Arc<Celestial>,
    pub shadow_body: Arc<Celestial>,
    pub cosm: Arc<Cosm>,
    /// Step of the coarse transition scan
    pub scan_step: Duration,
    root_solver: RootSolver,
}

impl EclipseLocator {
    pub fn new(light_source: Arc<Celestial>, shadow_body: Arc<Celestial>, cosm: Arc<Cosm>) -> Self {
        Self {
            light_source,
            shadow_body,
            cosm,
            scan_step: 60.0 * TimeUnit::Second,
            root_solver: RootSolver::new(60, 1e-4, 0.0),
        }
    }

    /// Signed distance (meters) of the state from the umbra cone boundary:
    /// negative inside the umbra.
    fn umbra_residual(&self, state: &State) -> Result<f64, AstroError> {
        let state = state.in_frame(Frame::Gcrf, &self.cosm)?;
        let r = state.position()?;
        let sun = self.light_source.position_in(Frame::Gcrf, state.epoch, &self.cosm)?
            - self.shadow_body.position(state.epoch);
        let sun_dist = sun.norm();
        let sun_hat = sun / sun_dist;

        // Distance behind the body along the anti-solar axis
        let xi = -r.dot(&sun_hat);
        if xi <= 0.0 {
            // Sunward side: report the distance to the shadow half-space
            return Ok(xi.abs() + self.shadow_body.equatorial_radius);
        }

        let radial = (r + xi * sun_hat).norm();
        let umbra_slope =
            (self.light_source.equatorial_radius - self.shadow_body.equatorial_radius) / sun_dist;
        let umbra_radius = self.shadow_body.equatorial_radius - xi * umbra_slope;
        Ok(radial - umbra_radius)
    }

    /// Classifies the illumination of the provided state.
    pub fn compute(&self, state: &State) -> Result<EclipseState, AstroError> {
        let gcrf = state.in_frame(Frame::Gcrf, &self.cosm)?;
        let r = gcrf.position()?;
        let sun = self.light_source.position_in(Frame::Gcrf, gcrf.epoch, &self.cosm)?
            - self.shadow_body.position(gcrf.epoch);
        let sun_dist = sun.norm();
        let sun_hat = sun / sun_dist;

        let xi = -r.dot(&sun_hat);
        if xi <= 0.0 {
            return Ok(EclipseState::Visibilis);
        }

        let radial = (r + xi * sun_hat).norm();
        let umbra_slope =
            (self.light_source.equatorial_radius - self.shadow_body.equatorial_radius) / sun_dist;
        let penumbra_slope =
            (self.light_source.equatorial_radius + self.shadow_body.equatorial_radius) / sun_dist;
        let umbra_radius = self.shadow_body.equatorial_radius - xi * umbra_slope;
        let penumbra_radius = self.shadow_body.equatorial_radius + xi * penumbra_slope;

        if radial <= umbra_radius {
            Ok(EclipseState::Umbra)
        } else if radial <= penumbra_radius {
            Ok(EclipseState::Penumbra)
        } else {
            Ok(EclipseState::Visibilis)
        }
    }

    /// Finds every umbra passage of the trajectory over the analysis span.
    ///
    /// The scan samples the umbra boundary residual at `scan_step` and
    /// refines each sign change with the bracketed root solver, so passages
    /// shorter than the scan step may be missed.
    pub fn umbra_events(
        &self,
        trajectory: &dyn TrajectoryModel,
        start: Epoch,
        end: Epoch,
    ) -> Result<Vec<EclipseEvent>, AstroError> {
        let step = self.scan_step.in_seconds();
        let span = (end - start).in_seconds();
        if span <= 0.0 {
            return Err(AstroError::UndefinedInput(
                "eclipse analysis span is empty".to_string(),
            ));
        }

        let residual_at = |t: f64| -> Result<f64, AstroError> {
            self.umbra_residual(&trajectory.state_at(start + t)?)
        };

        let mut events = Vec::new();
        let mut entry: Option<Epoch> = None;
        let mut t_prev = 0.0;
        let mut g_prev = residual_at(t_prev)?;
        if g_prev < 0.0 {
            entry = Some(start);
        }

        let mut t = step;
        loop {
            let t_curr = t.min(span);
            let g_curr = residual_at(t_curr)?;
            if g_prev.signum() != g_curr.signum() {
                // Refine the boundary crossing; residual evaluation errors
                // inside the refinement would have already surfaced in the scan
                let sol = self
                    .root_solver
                    .solve(t_prev, t_curr, |t| residual_at(t).unwrap_or(f64::MAX));
                let crossing = start + sol.root;
                if g_curr < 0.0 {
                    entry = Some(crossing);
                } else if let Some(started) = entry.take() {
                    events.push(EclipseEvent {
                        start: started,
                        end: crossing,
                    });
                }
            }
            if t_curr >= span {
                break;
            }
            t_prev = t_curr;
            g_prev = g_curr;
            t += step;
        }

        if let Some(started) = entry {
            // Still in umbra at the end of the span
            events.push(EclipseEvent {
                start: started,
                end,
            });
        }

        Ok(events)
    }
}
