extern crate astrodyn;

use astrodyn::celestia::cosm::{EARTH_EQUATORIAL_RADIUS, EARTH_FLATTENING, EARTH_GM, EARTH_ROTATION_RATE};
use astrodyn::celestia::{Celestial, Cosm, ExponentialAtmosphere, Frame};
use astrodyn::dynamics::{
    system_of_equations, AtmosphericDrag, CentralBodyGravity, Dynamics, DynamicsContext,
    PositionDerivative, ThirdBodyGravity,
};
use astrodyn::linalg::{DVector, Vector3};
use astrodyn::md::Propagator;
use astrodyn::propagators::{NumericalSolver, StepperType};
use astrodyn::state::{
    cartesian_position, cartesian_velocity, drag_coefficient, mass, surface_area, CoordinateBroker,
    State, StateBuilder,
};
use astrodyn::time::{Epoch, TimeUnit, J2000_OFFSET};
use approx::assert_relative_eq;
use std::sync::Arc;

fn j2000() -> Epoch {
    Epoch::from_mjd_tai(J2000_OFFSET)
}

fn circular_leo(epoch: Epoch) -> State {
    State::cartesian(
        epoch,
        Frame::Gcrf,
        Vector3::new(7_000_000.0, 0.0, 0.0),
        Vector3::new(0.0, 7_546.053_29, 0.0),
    )
}

#[test]
fn val_two_body_circular_one_hour() {
    let cosm = Cosm::standard();
    let setup = Propagator::two_body(cosm, NumericalSolver::default()).unwrap();

    let epoch = j2000();
    let state = circular_leo(epoch);
    let out = setup
        .calculate_state_at(&state, epoch + 1.0 * TimeUnit::Hour)
        .unwrap();

    let rmag = out.rmag().unwrap();
    let vmag = out.vmag().unwrap();
    println!("[two_body_circular] |r| = {:.3} m, |v| = {:.6} m/s", rmag, vmag);

    assert_relative_eq!(rmag, 7_000_000.0, epsilon = 1.0);
    assert_relative_eq!(vmag, 7_546.053_29, epsilon = 1e-3);
    // Less than one revolution in an hour
    assert!((out.epoch - state.epoch).in_seconds() < 5_828.5);
}

#[test]
fn val_two_body_reversibility() {
    // Conservative two-body dynamics propagated forward then backward must
    // recover the initial state
    let cosm = Cosm::standard();
    let setup = Propagator::two_body(
        cosm,
        NumericalSolver::new(StepperType::CashKarp45, 1e-14, 1e-14),
    )
    .unwrap();

    let epoch = j2000();
    let state = circular_leo(epoch);
    let period = 5_828.5 * TimeUnit::Second;

    let forward = setup.calculate_state_at(&state, epoch + period).unwrap();
    let back = setup.calculate_state_at(&forward, epoch).unwrap();

    let err_r = (back.position().unwrap() - state.position().unwrap()).norm();
    let err_v = (back.velocity().unwrap() - state.velocity().unwrap()).norm();
    println!("[reversibility] dr = {:.3e} m, dv = {:.3e} m/s", err_r, err_v);

    assert!(
        err_r / 7_000_000.0 < 1e-6,
        "relative position error {:.3e} after one round trip",
        err_r / 7_000_000.0
    );
    assert!((back.epoch - epoch).in_seconds().abs() < 1e-6);
}

#[test]
fn val_multi_instant_consistency() {
    let cosm = Cosm::standard();
    let solver = NumericalSolver::default()
        .with_step_bounds(1e-3 * TimeUnit::Second, 60.0 * TimeUnit::Second);
    let setup = Propagator::two_body(cosm, solver).unwrap();

    let epoch = j2000();
    let state = circular_leo(epoch);
    let instants = vec![
        epoch + 5.0 * TimeUnit::Minute,
        epoch + 17.0 * TimeUnit::Minute,
        epoch + 44.0 * TimeUnit::Minute,
    ];

    let many = setup.calculate_states_at(&state, &instants).unwrap();
    assert_eq!(many.len(), 3);

    for (out, instant) in many.iter().zip(instants.iter()) {
        assert!((out.epoch - *instant).in_seconds().abs() < 1e-6);
        let single = setup.calculate_state_at(&state, *instant).unwrap();
        let dr = (out.position().unwrap() - single.position().unwrap()).norm();
        println!("[multi_instant] dr = {:.3e} m at {}", dr, instant);
        assert!(dr < 0.5, "dense output off by {:.3} m at {}", dr, instant);
    }
}

#[test]
fn val_multi_instant_backward_split_preserves_order() {
    let cosm = Cosm::standard();
    let setup = Propagator::two_body(cosm, NumericalSolver::default()).unwrap();

    let epoch = j2000();
    let state = circular_leo(epoch);
    let instants = vec![
        epoch - 20.0 * TimeUnit::Minute,
        epoch - 5.0 * TimeUnit::Minute,
        epoch,
        epoch + 12.0 * TimeUnit::Minute,
        epoch + 30.0 * TimeUnit::Minute,
    ];

    let many = setup.calculate_states_at(&state, &instants).unwrap();
    assert_eq!(many.len(), instants.len());
    for (out, instant) in many.iter().zip(instants.iter()) {
        assert!(
            (out.epoch - *instant).in_seconds().abs() < 1e-6,
            "caller order was not preserved"
        );
        // Every output stays on the same conic
        let rmag = out.rmag().unwrap();
        assert!((rmag - 7_000_000.0).abs() < 5.0);
    }

    // The state at the initial epoch is the input state itself
    assert!((many[2].position().unwrap() - state.position().unwrap()).norm() < 1e-6);

    // Unsorted requests are rejected
    let unsorted = vec![epoch + 12.0 * TimeUnit::Minute, epoch + 2.0 * TimeUnit::Minute];
    assert!(setup.calculate_states_at(&state, &unsorted).is_err());
}

#[test]
fn val_third_body_changes_the_orbit_slightly() {
    let cosm = Cosm::standard();
    let dynamics: Vec<Arc<dyn Dynamics>> = vec![
        PositionDerivative::new(),
        CentralBodyGravity::new(cosm.earth(), cosm.clone()).unwrap(),
        ThirdBodyGravity::new(cosm.moon(), cosm.clone()).unwrap(),
        ThirdBodyGravity::new(cosm.sun(), cosm.clone()).unwrap(),
    ];
    let perturbed = Propagator::new(cosm.clone(), NumericalSolver::default(), &dynamics).unwrap();
    let two_body = Propagator::two_body(cosm, NumericalSolver::default()).unwrap();

    let epoch = j2000();
    let state = circular_leo(epoch);
    let target = epoch + 6.0 * TimeUnit::Hour;
    let with_tb = perturbed.calculate_state_at(&state, target).unwrap();
    let without = two_body.calculate_state_at(&state, target).unwrap();

    let dr = (with_tb.position().unwrap() - without.position().unwrap()).norm();
    println!("[third_body] luni-solar displacement over 6 h: {:.3} m", dr);
    // Luni-solar perturbations nudge a LEO by a measurable but small amount
    assert!(dr > 1e-4 && dr < 50_000.0);
}

/// Single-step drag-only regression against the closed-form acceleration.
#[test]
fn val_drag_single_rk4_step() {
    let cosm = Cosm::standard();
    // 500 km reference exponential atmosphere
    let earth = Arc::new(
        Celestial::new("Earth", EARTH_GM, EARTH_EQUATORIAL_RADIUS, EARTH_FLATTENING)
            .with_rotation(EARTH_ROTATION_RATE, Frame::IauEarth)
            .with_atmosphere(Arc::new(ExponentialAtmosphere::new(
                6.967e-13,
                500_000.0,
                63_822.0,
                EARTH_EQUATORIAL_RADIUS,
            ))),
    );
    let drag = AtmosphericDrag::new(earth, cosm).unwrap();

    // Drag alone, bypassing the full propagator composition
    let mut broker = CoordinateBroker::new();
    let read_info: Vec<(usize, usize)> = drag
        .read_subsets()
        .iter()
        .map(|s| (broker.add_subset(s), s.size()))
        .collect();
    let write_info: Vec<(usize, usize)> = drag
        .write_subsets()
        .iter()
        .map(|s| (broker.add_subset(s), s.size()))
        .collect();
    let contexts = vec![DynamicsContext {
        dynamics: drag,
        read_info,
        write_info,
    }];

    let epoch = Epoch::from_gregorian_utc_hms(2021, 3, 20, 12, 0, 0);
    let system = system_of_equations(&contexts, epoch, Frame::Gcrf);

    let builder = StateBuilder::new(
        Frame::Gcrf,
        &[
            cartesian_position(),
            cartesian_velocity(),
            mass(),
            surface_area(),
            drag_coefficient(),
        ],
    );
    let vy = 7_546.053_29;
    let state = builder
        .build(
            epoch,
            DVector::from_vec(vec![
                7_000_000.0,
                0.0,
                0.0,
                0.0,
                vy,
                0.0,
                100.0,
                500.0,
                2.1,
            ]),
        )
        .unwrap();

    let solver = NumericalSolver::fixed_step_rk4(1.0 * TimeUnit::Second);
    let out = solver
        .integrate_time(&state, epoch + 1.0 * TimeUnit::Second, &system)
        .unwrap();

    let dv = out.velocity().unwrap() - state.velocity().unwrap();
    println!("[drag_step] dv = ({:.3e}, {:.3e}, {:.3e}) m/s", dv[0], dv[1], dv[2]);

    // Closed form with the same constants
    let altitude: f64 = 7_000_000.0 - EARTH_EQUATORIAL_RADIUS;
    let rho = 6.967e-13 * (-(altitude - 500_000.0) / 63_822.0).exp();
    let v_rel: f64 = vy - EARTH_ROTATION_RATE * 7_000_000.0;
    let expected_dvy = -0.5 * 2.1 * 500.0 * rho * v_rel * v_rel / 100.0;

    assert!(
        (dv[1] - expected_dvy).abs() < 5e-11,
        "dv_y = {:.6e}, expected {:.6e}",
        dv[1],
        expected_dvy
    );
    // The along-track decay is a few 1e-5 m/s over one second
    assert!(dv[1] > -2.9e-5 && dv[1] < -2.5e-5);
    // No cross-track coupling for an equatorial state
    assert!(dv[0].abs() < 1e-10);
    assert!(dv[2].abs() < 1e-12);
}

#[test]
fn val_drag_decays_the_orbit() {
    let cosm = Cosm::standard();
    let dynamics: Vec<Arc<dyn Dynamics>> = vec![
        PositionDerivative::new(),
        CentralBodyGravity::new(cosm.earth(), cosm.clone()).unwrap(),
        AtmosphericDrag::new(cosm.earth(), cosm.clone()).unwrap(),
    ];
    let setup = Propagator::new(cosm, NumericalSolver::default(), &dynamics).unwrap();

    let epoch = j2000();
    let builder = StateBuilder::new(
        Frame::Gcrf,
        &[
            cartesian_position(),
            cartesian_velocity(),
            mass(),
            surface_area(),
            drag_coefficient(),
        ],
    );
    // 400 km circular orbit, chunky area over a light spacecraft
    let r = EARTH_EQUATORIAL_RADIUS + 400_000.0;
    let v = (EARTH_GM / r).sqrt();
    let state = builder
        .build(
            epoch,
            DVector::from_vec(vec![r, 0.0, 0.0, 0.0, v, 0.0, 50.0, 40.0, 2.2]),
        )
        .unwrap();

    let out = setup
        .calculate_state_at(&state, epoch + 1.0 * TimeUnit::Day)
        .unwrap();

    // Specific orbital energy must decrease under drag
    let energy = |s: &State| {
        s.vmag().unwrap().powi(2) / 2.0 - EARTH_GM / s.rmag().unwrap()
    };
    println!(
        "[drag_decay] energy {:.6e} -> {:.6e} J/kg",
        energy(&state),
        energy(&out)
    );
    assert!(energy(&out) < energy(&state));
    // Spacecraft parameters have no writer: they stay constant
    assert_eq!(out.mass().unwrap(), 50.0);
}

#[test]
fn propagator_setup_validation() {
    let cosm = Cosm::standard();
    // No central-body gravity
    let missing: Vec<Arc<dyn Dynamics>> = vec![PositionDerivative::new()];
    assert!(Propagator::new(cosm.clone(), NumericalSolver::default(), &missing).is_err());

    // Two drags
    let doubled: Vec<Arc<dyn Dynamics>> = vec![
        PositionDerivative::new(),
        CentralBodyGravity::new(cosm.earth(), cosm.clone()).unwrap(),
        AtmosphericDrag::new(cosm.earth(), cosm.clone()).unwrap(),
        AtmosphericDrag::new(cosm.earth(), cosm.clone()).unwrap(),
    ];
    assert!(Propagator::new(cosm.clone(), NumericalSolver::default(), &doubled).is_err());

    // Broker width drives the state width
    let setup = Propagator::two_body(cosm, NumericalSolver::default()).unwrap();
    assert_eq!(setup.broker().width(), 6);
    let state = circular_leo(j2000());
    let out = setup
        .calculate_state_at(&state, j2000() + 1.0 * TimeUnit::Minute)
        .unwrap();
    assert_eq!(out.coordinates().len(), state.broker().width());
}
