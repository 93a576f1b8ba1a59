extern crate astrodyn;

use astrodyn::celestia::cosm::EARTH_GM;
use astrodyn::celestia::{ClassicalElements, Cosm, Frame};
use astrodyn::dynamics::{
    CentralBodyGravity, ConstantLocalDirection, Dynamics, PositionDerivative, Thruster,
};
use astrodyn::errors::AstroError;
use astrodyn::linalg::DVector;
use astrodyn::md::{Segment, SegmentKind};
use astrodyn::propagators::events::{Criterion, InstantCondition};
use astrodyn::propagators::NumericalSolver;
use astrodyn::state::{cartesian_position, cartesian_velocity, mass, StateBuilder};
use astrodyn::time::{Epoch, TimeUnit, J2000_OFFSET};
use std::sync::Arc;

fn j2000() -> Epoch {
    Epoch::from_mjd_tai(J2000_OFFSET)
}

fn two_body_dynamics(cosm: &Arc<Cosm>) -> Vec<Arc<dyn Dynamics>> {
    vec![
        PositionDerivative::new(),
        CentralBodyGravity::new(cosm.earth(), cosm.clone()).unwrap(),
    ]
}

fn spacecraft_state(epoch: Epoch, fuel_mass: f64) -> astrodyn::state::State {
    let oe = ClassicalElements::new(7.0e6, 0.01, 0.9, 0.0, 0.0, 0.0);
    let (r, v) = oe.to_cartesian(EARTH_GM);
    StateBuilder::new(
        Frame::Gcrf,
        &[cartesian_position(), cartesian_velocity(), mass()],
    )
    .build(
        epoch,
        DVector::from_vec(vec![r[0], r[1], r[2], v[0], v[1], v[2], fuel_mass]),
    )
    .unwrap()
}

#[test]
fn maneuver_burns_mass_and_raises_the_orbit() {
    let cosm = Cosm::standard();
    let epoch = j2000();
    let state = spacecraft_state(epoch, 300.0);

    let thruster = Thruster::new(2.0, 3100.0, ConstantLocalDirection::prograde());
    let condition =
        InstantCondition::elapsed("20 min burn", Criterion::AnyCrossing, 20.0 * TimeUnit::Minute);
    let segment = Segment::maneuver(
        "raise",
        condition,
        thruster,
        two_body_dynamics(&cosm),
        NumericalSolver::default().with_state_logging(true),
        cosm.clone(),
    )
    .unwrap();

    let solution = segment.solve(&state, 1.0 * TimeUnit::Hour).unwrap();
    assert!(solution.condition_is_satisfied);
    assert_eq!(solution.kind, SegmentKind::Maneuver);

    // Mass is strictly decreasing along the burn
    let masses: Vec<f64> = solution
        .states
        .iter()
        .map(|s| s.mass().unwrap())
        .collect();
    assert!(masses.len() > 2, "expected dense output in the solution");
    for pair in masses.windows(2) {
        assert!(pair[1] < pair[0], "mass did not decrease: {:?}", pair);
    }

    // Total consumption matches the constant flow rate
    let burn_seconds = solution.propagation_duration().in_seconds();
    let expected = 2.0 / (3100.0 * 9.806_65) * burn_seconds;
    let consumed = solution.delta_mass().unwrap();
    println!(
        "[maneuver] consumed {:.6} kg over {:.1} s (expected {:.6})",
        consumed, burn_seconds, expected
    );
    assert!((consumed - expected).abs() < 1e-9);

    // Prograde thrust raises the energy, hence the semi-major axis
    let oe_before = ClassicalElements::from_cartesian(
        &state.position().unwrap(),
        &state.velocity().unwrap(),
        EARTH_GM,
    )
    .unwrap();
    let last = solution.last_state();
    let oe_after = ClassicalElements::from_cartesian(
        &last.position().unwrap(),
        &last.velocity().unwrap(),
        EARTH_GM,
    )
    .unwrap();
    println!("[maneuver] sma {:.1} -> {:.1} m", oe_before.sma, oe_after.sma);
    assert!(oe_after.sma > oe_before.sma + 100.0);

    // And the delta-v accessor is in family with the rocket equation
    let dv = solution.delta_v(3100.0).unwrap();
    assert!(dv > 0.0 && (dv - 2.0 / 300.0 * burn_seconds).abs() / dv < 0.01);
}

#[test]
fn coast_factory_rejects_a_live_thruster() {
    let cosm = Cosm::standard();
    let thruster: Arc<dyn Dynamics> =
        Thruster::new(1.0, 2000.0, ConstantLocalDirection::prograde());
    let mut dynamics = two_body_dynamics(&cosm);
    dynamics.push(thruster);

    let condition =
        InstantCondition::elapsed("10 min", Criterion::AnyCrossing, 10.0 * TimeUnit::Minute);
    match Segment::coast(
        "bad coast",
        condition,
        dynamics,
        NumericalSolver::default(),
        cosm.clone(),
    ) {
        Err(AstroError::SetupInvalid(_)) => (),
        other => panic!("expected setup-invalid, got {:?}", other.map(|_| ())),
    }

    // A zero-thrust thruster coasts fine
    let idle: Arc<dyn Dynamics> = Thruster::new(0.0, 2000.0, ConstantLocalDirection::prograde());
    let mut dynamics = two_body_dynamics(&cosm);
    dynamics.push(idle);
    let condition =
        InstantCondition::elapsed("10 min", Criterion::AnyCrossing, 10.0 * TimeUnit::Minute);
    assert!(Segment::coast(
        "idle coast",
        condition,
        dynamics,
        NumericalSolver::default(),
        cosm,
    )
    .is_ok());
}

#[test]
fn maneuver_factory_rejects_a_second_thruster() {
    let cosm = Cosm::standard();
    let first: Arc<dyn Dynamics> = Thruster::new(1.0, 2000.0, ConstantLocalDirection::prograde());
    let second = Thruster::new(1.0, 2000.0, ConstantLocalDirection::retrograde());
    let mut dynamics = two_body_dynamics(&cosm);
    dynamics.push(first);

    let condition =
        InstantCondition::elapsed("10 min", Criterion::AnyCrossing, 10.0 * TimeUnit::Minute);
    match Segment::maneuver(
        "double thruster",
        condition,
        second,
        dynamics,
        NumericalSolver::default(),
        cosm,
    ) {
        Err(AstroError::SetupInvalid(_)) => (),
        other => panic!("expected setup-invalid, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn mass_depletion_fails_the_segment() {
    let cosm = Cosm::standard();
    let epoch = j2000();
    // Two kilograms of propellant against a thruster burning ~1 kg/s
    let state = spacecraft_state(epoch, 2.0);

    let thruster = Thruster::new(1_000.0, 100.0, ConstantLocalDirection::prograde());
    let condition =
        InstantCondition::elapsed("10 min burn", Criterion::AnyCrossing, 10.0 * TimeUnit::Minute);
    let segment = Segment::maneuver(
        "overeager",
        condition,
        thruster,
        two_body_dynamics(&cosm),
        NumericalSolver::fixed_step_rk4(1.0 * TimeUnit::Second),
        cosm.clone(),
    )
    .unwrap();

    assert_eq!(
        segment
            .solve(&state, 10.0 * TimeUnit::Minute)
            .map(|_| ())
            .unwrap_err(),
        AstroError::MassDepleted
    );
}
