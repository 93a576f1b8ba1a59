use super::segment::{Segment, SegmentKind, SegmentSolution};
use crate::celestia::Cosm;
use crate::dynamics::{Dynamics, Thruster};
use crate::errors::AstroError;
use crate::propagators::events::{EventCondition, TargetKind};
use crate::propagators::NumericalSolver;
use crate::state::State;
use crate::time::{Duration, Epoch, TimeUnit};
use std::fmt;
use std::sync::Arc;

/// A mission timeline: segments chained in order, repeated, under global
/// duration bounds.
///
/// The sequence owns a default solver and a set of common dynamics injected
/// into the segments added through [`Sequence::add_coast_segment`] and
/// [`Sequence::add_maneuver_segment`]; segments built elsewhere keep their
/// own.
pub struct Sequence {
    segments: Vec<Segment>,
    repetition_count: usize,
    solver: NumericalSolver,
    dynamics: Vec<Arc<dyn Dynamics>>,
    /// Bound on any single segment propagation
    segment_duration_limit: Duration,
    cosm: Arc<Cosm>,
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Sequence {{ {} segments x {} repetitions, segment limit {} s }}",
            self.segments.len(),
            self.repetition_count,
            self.segment_duration_limit.in_seconds()
        )
    }
}

impl Sequence {
    pub fn new(
        segments: Vec<Segment>,
        repetition_count: usize,
        solver: NumericalSolver,
        dynamics: Vec<Arc<dyn Dynamics>>,
        segment_duration_limit: Duration,
        cosm: Arc<Cosm>,
    ) -> Result<Self, AstroError> {
        if repetition_count < 1 {
            return Err(AstroError::SetupInvalid(
                "a sequence repeats at least once".to_string(),
            ));
        }
        Ok(Self {
            segments,
            repetition_count,
            solver,
            dynamics,
            segment_duration_limit,
            cosm,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn dynamics(&self) -> &[Arc<dyn Dynamics>] {
        &self.dynamics
    }

    pub fn segment_duration_limit(&self) -> Duration {
        self.segment_duration_limit
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Appends a coast over the sequence's common dynamics.
    pub fn add_coast_segment(
        &mut self,
        condition: Arc<dyn EventCondition>,
    ) -> Result<(), AstroError> {
        let segment = Segment::coast(
            format!("Coast {}", self.segments.len()),
            condition,
            self.dynamics.clone(),
            self.solver.clone(),
            self.cosm.clone(),
        )?;
        self.segments.push(segment);
        Ok(())
    }

    /// Appends a maneuver over the sequence's common dynamics plus the
    /// provided thruster.
    pub fn add_maneuver_segment(
        &mut self,
        condition: Arc<dyn EventCondition>,
        thruster: Arc<Thruster>,
    ) -> Result<(), AstroError> {
        let segment = Segment::maneuver(
            format!("Maneuver {}", self.segments.len()),
            condition,
            thruster,
            self.dynamics.clone(),
            self.solver.clone(),
            self.cosm.clone(),
        )?;
        self.segments.push(segment);
        Ok(())
    }

    /// Solves the sequence from the provided state.
    ///
    /// Segments run in order, `repetition_count` times. Each segment is
    /// bounded by the smaller of the per-segment limit and the remaining
    /// sequence budget. The sequence terminates unsuccessfully when the
    /// budget runs out or a segment misses its condition, and successfully
    /// when the optional sequence-level condition fires or every repetition
    /// completes with no such condition given.
    pub fn solve(
        &self,
        state: &State,
        sequence_duration_limit: Duration,
        sequence_condition: Option<&Arc<dyn EventCondition>>,
    ) -> Result<SequenceSolution, AstroError> {
        let mut solutions: Vec<SegmentSolution> = Vec::new();
        let mut current = state.clone();
        let mut elapsed = 0.0 * TimeUnit::Second;

        if let Some(condition) = sequence_condition {
            if condition.target_kind() != TargetKind::Absolute {
                condition.resolve_target(state);
            }
        }

        for repetition in 0..self.repetition_count {
            for segment in &self.segments {
                match segment.condition().target_kind() {
                    // Segment-start targets are resolved inside Segment::solve
                    TargetKind::RelativeSequenceStart => {
                        segment.condition().resolve_target(state);
                    }
                    _ => {}
                }

                let remaining: Duration = sequence_duration_limit - elapsed;
                if remaining.in_seconds() <= 0.0 {
                    warn!("sequence terminated: the propagation duration budget is exhausted");
                    return Ok(SequenceSolution {
                        segment_solutions: solutions,
                        execution_is_complete: false,
                    });
                }

                let segment_limit =
                    if self.segment_duration_limit.in_seconds() < remaining.in_seconds() {
                        self.segment_duration_limit
                    } else {
                        remaining
                    };

                debug!(
                    "solving segment {} (repetition {})",
                    segment.name, repetition
                );
                let mut solution = segment.solve(&current, segment_limit)?;
                solution.name = format!(
                    "{} - {} - {}",
                    solution.name,
                    segment.condition().name(),
                    repetition
                );

                elapsed = elapsed + solution.propagation_duration();
                let satisfied = solution.condition_is_satisfied;
                let last_state = solution.last_state().clone();
                solutions.push(solution);

                if !satisfied {
                    warn!("sequence terminated: segment condition not satisfied");
                    return Ok(SequenceSolution {
                        segment_solutions: solutions,
                        execution_is_complete: false,
                    });
                }

                if let Some(condition) = sequence_condition {
                    if condition.is_satisfied(&last_state, &current) {
                        debug!("sequence event condition is satisfied");
                        return Ok(SequenceSolution {
                            segment_solutions: solutions,
                            execution_is_complete: true,
                        });
                    }
                }

                current = last_state;
            }
        }

        // With no sequence-level condition, running out the repetitions is success
        Ok(SequenceSolution {
            segment_solutions: solutions,
            execution_is_complete: sequence_condition.is_none(),
        })
    }
}

/// The record of a solved sequence.
#[derive(Clone, Debug)]
pub struct SequenceSolution {
    pub segment_solutions: Vec<SegmentSolution>,
    pub execution_is_complete: bool,
}

impl SequenceSolution {
    pub fn start_instant(&self) -> Epoch {
        self.segment_solutions
            .first()
            .expect("empty sequence solution")
            .start_instant()
    }

    pub fn end_instant(&self) -> Epoch {
        self.segment_solutions
            .last()
            .expect("empty sequence solution")
            .end_instant()
    }

    pub fn propagation_duration(&self) -> Duration {
        self.end_instant() - self.start_instant()
    }

    /// All states across the segments, the shared boundary states included
    /// once.
    pub fn states(&self) -> Vec<State> {
        let mut states: Vec<State> = Vec::new();
        for (no, solution) in self.segment_solutions.iter().enumerate() {
            let skip = if no == 0 { 0 } else { 1 };
            states.extend(solution.states.iter().skip(skip).cloned());
        }
        states
    }

    pub fn initial_mass(&self) -> Option<f64> {
        self.segment_solutions.first()?.initial_mass()
    }

    pub fn final_mass(&self) -> Option<f64> {
        self.segment_solutions.last()?.final_mass()
    }

    pub fn delta_mass(&self) -> Option<f64> {
        Some(self.initial_mass()? - self.final_mass()?)
    }

    pub fn delta_v(&self, isp: f64) -> Option<f64> {
        let mut total = 0.0;
        for solution in &self.segment_solutions {
            if solution.kind == SegmentKind::Maneuver {
                total += solution.delta_v(isp)?;
            }
        }
        Some(total)
    }
}
