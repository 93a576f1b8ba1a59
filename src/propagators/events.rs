use crate::state::State;
use crate::time::{Duration, Epoch, TimeUnit};
use crate::utils::between_pm_pi;
use std::cell::Cell;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// When a scalar residual satisfies a condition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Criterion {
    /// Residual goes from non-positive to positive
    PositiveCrossing,
    /// Residual goes from non-negative to negative
    NegativeCrossing,
    /// Residual changes sign in either direction
    AnyCrossing,
    /// Residual of the current state is positive
    StrictlyPositive,
    /// Residual of the current state is negative
    StrictlyNegative,
}

impl Criterion {
    pub(crate) fn is_satisfied(self, previous: f64, current: f64) -> bool {
        match self {
            Criterion::PositiveCrossing => previous <= 0.0 && current > 0.0,
            Criterion::NegativeCrossing => previous >= 0.0 && current < 0.0,
            Criterion::AnyCrossing => {
                (previous < 0.0 && current > 0.0)
                    || (previous > 0.0 && current < 0.0)
                    || (previous == 0.0 && current != 0.0)
            }
            Criterion::StrictlyPositive => current > 0.0,
            Criterion::StrictlyNegative => current < 0.0,
        }
    }
}

/// Where a condition's target value is anchored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetKind {
    Absolute,
    /// Resolved against the state a segment starts from
    RelativeSegmentStart,
    /// Resolved against the state a sequence starts from
    RelativeSequenceStart,
}

/// A scalar target, possibly anchored on a reference state resolved just
/// before solving.
#[derive(Clone, Debug)]
pub struct EventTarget {
    pub kind: TargetKind,
    pub value: f64,
    offset: Cell<f64>,
}

impl EventTarget {
    pub fn absolute(value: f64) -> Self {
        Self {
            kind: TargetKind::Absolute,
            value,
            offset: Cell::new(0.0),
        }
    }

    pub fn relative_segment_start(value: f64) -> Self {
        Self {
            kind: TargetKind::RelativeSegmentStart,
            value,
            offset: Cell::new(0.0),
        }
    }

    pub fn relative_sequence_start(value: f64) -> Self {
        Self {
            kind: TargetKind::RelativeSequenceStart,
            value,
            offset: Cell::new(0.0),
        }
    }

    /// Anchors a relative target on the provided reference value.
    pub fn resolve(&self, reference_value: f64) {
        if self.kind != TargetKind::Absolute {
            self.offset.set(reference_value);
        }
    }

    /// The absolute target value, offset included.
    pub fn resolved_value(&self) -> f64 {
        self.value + self.offset.get()
    }
}

/// A predicate over (previous, current) state pairs which bounds a
/// propagation.
///
/// Conditions exposing a residual can be root-bracketed by the numerical
/// solver to isolate the crossing instant; logical composites are evaluated
/// pairwise only.
pub trait EventCondition: fmt::Debug {
    fn name(&self) -> &str;

    fn is_satisfied(&self, current: &State, previous: &State) -> bool;

    /// Signed residual for root bracketing, `None` when this condition cannot
    /// bracket.
    fn residual(&self, _state: &State) -> Option<f64> {
        None
    }

    fn target_kind(&self) -> TargetKind {
        TargetKind::Absolute
    }

    /// Re-anchors relative targets on the provided reference state. A no-op
    /// for absolute targets.
    fn resolve_target(&self, _reference: &State) {}
}

/// Evaluates a scalar out of a state.
pub type Evaluator = Arc<dyn Fn(&State) -> f64>;

/// A condition on a real-valued function of the state.
pub struct RealCondition {
    name: String,
    pub criterion: Criterion,
    evaluator: Evaluator,
    pub target: EventTarget,
}

impl RealCondition {
    pub fn new<S: Into<String>>(
        name: S,
        criterion: Criterion,
        evaluator: Evaluator,
        target: EventTarget,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            criterion,
            evaluator,
            target,
        })
    }
}

impl fmt::Debug for RealCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RealCondition {{ {} {:?} target {} }}",
            self.name,
            self.criterion,
            self.target.resolved_value()
        )
    }
}

impl EventCondition for RealCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied(&self, current: &State, previous: &State) -> bool {
        let prev = self.residual(previous).unwrap();
        let curr = self.residual(current).unwrap();
        self.criterion.is_satisfied(prev, curr)
    }

    fn residual(&self, state: &State) -> Option<f64> {
        Some((self.evaluator)(state) - self.target.resolved_value())
    }

    fn target_kind(&self) -> TargetKind {
        self.target.kind
    }

    fn resolve_target(&self, reference: &State) {
        self.target.resolve((self.evaluator)(reference));
    }
}

/// A condition on an angle, with the residual wrapped into (-pi, pi].
///
/// A crossing through the target plus 180 degrees flips the sign of the
/// wrapped residual without passing through the target; such antipodal
/// crossings are disregarded.
pub struct AngularCondition {
    name: String,
    pub criterion: Criterion,
    evaluator: Evaluator,
    pub target: EventTarget,
}

impl AngularCondition {
    pub fn new<S: Into<String>>(
        name: S,
        criterion: Criterion,
        evaluator: Evaluator,
        target: EventTarget,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            criterion,
            evaluator,
            target,
        })
    }
}

impl fmt::Debug for AngularCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "AngularCondition {{ {} {:?} target {} rad }}",
            self.name,
            self.criterion,
            self.target.resolved_value()
        )
    }
}

impl EventCondition for AngularCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied(&self, current: &State, previous: &State) -> bool {
        let prev = self.residual(previous).unwrap();
        let curr = self.residual(current).unwrap();
        match self.criterion {
            Criterion::PositiveCrossing | Criterion::NegativeCrossing | Criterion::AnyCrossing => {
                // A genuine crossing of the target keeps the wrapped residuals
                // on the same side of the antipode
                (prev - curr).abs() <= PI && self.criterion.is_satisfied(prev, curr)
            }
            _ => self.criterion.is_satisfied(prev, curr),
        }
    }

    fn residual(&self, state: &State) -> Option<f64> {
        Some(between_pm_pi(
            (self.evaluator)(state) - self.target.resolved_value(),
        ))
    }

    fn target_kind(&self) -> TargetKind {
        self.target.kind
    }

    fn resolve_target(&self, reference: &State) {
        self.target.resolve((self.evaluator)(reference));
    }
}

/// A condition on the state's instant.
#[derive(Debug)]
pub struct InstantCondition {
    name: String,
    pub criterion: Criterion,
    kind: TargetKind,
    /// Offset from the reference for relative targets
    duration: Duration,
    resolved: Cell<Option<Epoch>>,
}

impl InstantCondition {
    pub fn absolute<S: Into<String>>(name: S, criterion: Criterion, epoch: Epoch) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            criterion,
            kind: TargetKind::Absolute,
            duration: 0.0 * TimeUnit::Second,
            resolved: Cell::new(Some(epoch)),
        })
    }

    /// Fires the given duration past the segment start.
    pub fn elapsed<S: Into<String>>(name: S, criterion: Criterion, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            criterion,
            kind: TargetKind::RelativeSegmentStart,
            duration,
            resolved: Cell::new(None),
        })
    }

    /// Fires the given duration past the sequence start.
    pub fn elapsed_from_sequence_start<S: Into<String>>(
        name: S,
        criterion: Criterion,
        duration: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            criterion,
            kind: TargetKind::RelativeSequenceStart,
            duration,
            resolved: Cell::new(None),
        })
    }

    pub fn target_epoch(&self) -> Option<Epoch> {
        self.resolved.get()
    }
}

impl EventCondition for InstantCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied(&self, current: &State, previous: &State) -> bool {
        let prev = self.residual(previous).unwrap();
        let curr = self.residual(current).unwrap();
        self.criterion.is_satisfied(prev, curr)
    }

    fn residual(&self, state: &State) -> Option<f64> {
        let target = self
            .resolved
            .get()
            .expect("relative instant condition evaluated before target resolution");
        Some(state.epoch.as_tai_seconds() - target.as_tai_seconds())
    }

    fn target_kind(&self) -> TargetKind {
        self.kind
    }

    fn resolve_target(&self, reference: &State) {
        if self.kind != TargetKind::Absolute {
            self.resolved.set(Some(reference.epoch + self.duration));
        }
    }
}

/// A boolean expression over other conditions, evaluated with short circuits.
///
/// Composites are satisfied pairwise on the (previous, current) states but
/// expose no residual: the solver cannot bracket them.
pub enum BooleanExpr {
    And(Vec<Arc<dyn EventCondition>>),
    Or(Vec<Arc<dyn EventCondition>>),
    Not(Arc<dyn EventCondition>),
}

pub struct LogicalCondition {
    name: String,
    pub expr: BooleanExpr,
}

impl LogicalCondition {
    pub fn new<S: Into<String>>(name: S, expr: BooleanExpr) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            expr,
        })
    }

    fn eval(expr: &BooleanExpr, current: &State, previous: &State) -> bool {
        match expr {
            BooleanExpr::And(children) => children
                .iter()
                .all(|c| c.is_satisfied(current, previous)),
            BooleanExpr::Or(children) => children
                .iter()
                .any(|c| c.is_satisfied(current, previous)),
            BooleanExpr::Not(child) => !child.is_satisfied(current, previous),
        }
    }
}

impl fmt::Debug for LogicalCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = match &self.expr {
            BooleanExpr::And(_) => "and",
            BooleanExpr::Or(_) => "or",
            BooleanExpr::Not(_) => "not",
        };
        write!(f, "LogicalCondition {{ {} ({}) }}", self.name, op)
    }
}

impl EventCondition for LogicalCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_satisfied(&self, current: &State, previous: &State) -> bool {
        Self::eval(&self.expr, current, previous)
    }

    fn resolve_target(&self, reference: &State) {
        match &self.expr {
            BooleanExpr::And(children) | BooleanExpr::Or(children) => {
                for child in children {
                    child.resolve_target(reference);
                }
            }
            BooleanExpr::Not(child) => child.resolve_target(reference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celestia::Frame;
    use crate::linalg::DVector;
    use crate::state::{GenericSubset, StateBuilder};
    use crate::time::{Epoch, TimeUnit, J2000_OFFSET};

    fn angle_state(deg: f64) -> State {
        StateBuilder::new(Frame::Gcrf, &[GenericSubset::new("ANGLE", 1)])
            .build(
                Epoch::from_mjd_tai(J2000_OFFSET),
                DVector::from_vec(vec![deg.to_radians()]),
            )
            .unwrap()
    }

    fn angle_evaluator() -> Evaluator {
        Arc::new(|state: &State| state.coordinates()[0])
    }

    #[test]
    fn angular_positive_crossing_semantics() {
        let condition = AngularCondition::new(
            "angle at 45 deg",
            Criterion::PositiveCrossing,
            angle_evaluator(),
            EventTarget::absolute(45_f64.to_radians()),
        );

        // Genuine crossing of the target
        assert!(condition.is_satisfied(&angle_state(46.0), &angle_state(44.0)));
        // Crossing of the antipode (target + 180 deg) is not a crossing
        assert!(!condition.is_satisfied(&angle_state(226.0), &angle_state(224.0)));
        // Wrong direction
        assert!(!condition.is_satisfied(&angle_state(44.0), &angle_state(46.0)));
    }

    #[test]
    fn angular_any_crossing_still_ignores_the_antipode() {
        let condition = AngularCondition::new(
            "angle at 45 deg",
            Criterion::AnyCrossing,
            angle_evaluator(),
            EventTarget::absolute(45_f64.to_radians()),
        );
        assert!(condition.is_satisfied(&angle_state(44.0), &angle_state(46.0)));
        assert!(condition.is_satisfied(&angle_state(46.0), &angle_state(44.0)));
        assert!(!condition.is_satisfied(&angle_state(226.0), &angle_state(224.0)));
    }

    #[test]
    fn real_condition_crossing_table() {
        let evaluator: Evaluator = Arc::new(|state: &State| state.coordinates()[0]);
        let mk = |value: f64| {
            StateBuilder::new(Frame::Gcrf, &[GenericSubset::new("X", 1)])
                .build(
                    Epoch::from_mjd_tai(J2000_OFFSET),
                    DVector::from_vec(vec![value]),
                )
                .unwrap()
        };
        let target = || EventTarget::absolute(10.0);

        let positive =
            RealCondition::new("x", Criterion::PositiveCrossing, evaluator.clone(), target());
        assert!(positive.is_satisfied(&mk(11.0), &mk(9.0)));
        assert!(!positive.is_satisfied(&mk(9.0), &mk(11.0)));

        let negative =
            RealCondition::new("x", Criterion::NegativeCrossing, evaluator.clone(), target());
        assert!(negative.is_satisfied(&mk(9.0), &mk(11.0)));
        assert!(!negative.is_satisfied(&mk(11.0), &mk(9.0)));

        let strictly =
            RealCondition::new("x", Criterion::StrictlyNegative, evaluator.clone(), target());
        assert!(strictly.is_satisfied(&mk(9.0), &mk(12.0)));
        assert!(strictly.is_satisfied(&mk(9.0), &mk(8.0)));
        assert!(!strictly.is_satisfied(&mk(11.0), &mk(8.0)));
    }

    #[test]
    fn relative_target_resolution() {
        let evaluator: Evaluator = Arc::new(|state: &State| state.coordinates()[0]);
        let condition = RealCondition::new(
            "x grew by 5",
            Criterion::PositiveCrossing,
            evaluator,
            EventTarget::relative_segment_start(5.0),
        );
        let mk = |value: f64| {
            StateBuilder::new(Frame::Gcrf, &[GenericSubset::new("X", 1)])
                .build(
                    Epoch::from_mjd_tai(J2000_OFFSET),
                    DVector::from_vec(vec![value]),
                )
                .unwrap()
        };
        condition.resolve_target(&mk(100.0));
        assert!(condition.is_satisfied(&mk(105.5), &mk(104.0)));
        assert!(!condition.is_satisfied(&mk(104.5), &mk(104.0)));
    }

    #[test]
    fn logical_and_or_not() {
        let evaluator: Evaluator = Arc::new(|state: &State| state.coordinates()[0]);
        let mk = |value: f64| {
            StateBuilder::new(Frame::Gcrf, &[GenericSubset::new("X", 1)])
                .build(
                    Epoch::from_mjd_tai(J2000_OFFSET),
                    DVector::from_vec(vec![value]),
                )
                .unwrap()
        };
        let above_10: Arc<dyn EventCondition> = RealCondition::new(
            "above 10",
            Criterion::StrictlyPositive,
            evaluator.clone(),
            EventTarget::absolute(10.0),
        );
        let below_20: Arc<dyn EventCondition> = RealCondition::new(
            "below 20",
            Criterion::StrictlyNegative,
            evaluator.clone(),
            EventTarget::absolute(20.0),
        );

        let both = LogicalCondition::new(
            "between",
            BooleanExpr::And(vec![above_10.clone(), below_20.clone()]),
        );
        assert!(both.is_satisfied(&mk(15.0), &mk(15.0)));
        assert!(!both.is_satisfied(&mk(25.0), &mk(15.0)));
        assert!(both.residual(&mk(15.0)).is_none());

        let either = LogicalCondition::new(
            "either",
            BooleanExpr::Or(vec![above_10.clone(), below_20.clone()]),
        );
        assert!(either.is_satisfied(&mk(25.0), &mk(25.0)));

        let inverted = LogicalCondition::new("not above", BooleanExpr::Not(above_10));
        assert!(inverted.is_satisfied(&mk(5.0), &mk(5.0)));
    }

    #[test]
    fn instant_condition_residual_is_elapsed_seconds() {
        let start = Epoch::from_mjd_tai(J2000_OFFSET);
        let condition =
            InstantCondition::elapsed("15 min", Criterion::AnyCrossing, 15.0 * TimeUnit::Minute);
        let reference = angle_state(0.0);
        condition.resolve_target(&reference);
        let mut later = reference.clone();
        later.epoch = start + 16.0 * TimeUnit::Minute;
        assert!((condition.residual(&later).unwrap() - 60.0).abs() < 1e-9);
        assert!(condition.is_satisfied(&later, &reference));
    }
}
