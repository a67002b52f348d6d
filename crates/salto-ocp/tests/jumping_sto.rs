//! End-to-end jump with switching-time optimization.
//!
//! Standing → flying → standing with liftoff/touchdown starting at
//! (0.7 s, 0.95 s), minimum dwell times (0.1, 0.1, 0.65) s, and at most
//! 130 outer iterations with interleaved mesh refinement. Checks the
//! operational tolerances: KKT below 0.1 and mesh spacing below 0.02.

use std::sync::Arc;

use nalgebra::{DVector, Vector3};

use salto_contact::{ContactSequence, ContactStatus};
use salto_core::SolverOptions;
use salto_cost::{
    ConfigurationCost, ConstraintSet, CostFunction, FrictionCone, JointPositionLimits,
    JointTorqueLimits, JointVelocityLimits, TaskSpace3dCost,
};
use salto_ocp::{OcpSolver, SolveStatus};
use salto_robot::{PointFootQuadruped, QuadrupedParams, RobotModel};
use salto_sto::{StoConstraints, StoCostFunction, StoRegularization, StoRegularizationKind};

const JUMP_LENGTH: f64 = 0.3;
const HORIZON: f64 = 1.7;
const N: usize = 85;
const LIFTOFF: f64 = 0.7;
const TOUCHDOWN: f64 = 0.95;
const MIN_DWELL: [f64; 3] = [0.1, 0.1, 0.65];

fn standing_status(robot: &PointFootQuadruped, q: &DVector<f64>) -> ContactStatus {
    let mut status = robot.create_contact_status();
    status.activate_contacts(&[0, 1, 2, 3]);
    for i in 0..4 {
        status.set_contact_point(i, robot.frame_position(q, i));
    }
    status
}

fn build_solver() -> (OcpSolver, DVector<f64>, DVector<f64>) {
    let robot = Arc::new(PointFootQuadruped::new(QuadrupedParams::default()));
    let q_standing = robot.standing_configuration();
    let v_zero = DVector::zeros(robot.dimv());

    let mut q_ref = q_standing.clone();
    q_ref[0] += JUMP_LENGTH;
    let mut q_weight = DVector::from_element(robot.dimv(), 0.001);
    for i in 0..6 {
        q_weight[i] = 1.0;
    }
    let mut config = ConfigurationCost::new(robot.dimv(), robot.dimu());
    config.set_q_ref(q_ref);
    config.set_q_weight(q_weight.clone());
    config.set_q_weight_terminal(q_weight);
    config.set_v_weight(DVector::from_element(robot.dimv(), 1.0));
    config.set_v_weight_terminal(DVector::from_element(robot.dimv(), 1.0));
    config.set_v_weight_impulse(DVector::from_element(robot.dimv(), 1.0));
    config.set_u_weight(DVector::from_element(robot.dimu(), 1.0e-6));

    let mut cost = CostFunction::new();
    cost.push_back(Box::new(config));
    let track = 10.0 / robot.spec().stabilization_dt.powi(2);
    for frame in 0..4 {
        let mut foot = TaskSpace3dCost::new(robot.clone(), frame);
        foot.set_weight(Vector3::new(track, track, track));
        cost.push_back(Box::new(foot));
    }

    let limits = robot.joint_limits();
    let mut constraints = ConstraintSet::new();
    constraints.push_back(Box::new(JointPositionLimits::new(
        limits.position_lower,
        limits.position_upper,
    )));
    constraints.push_back(Box::new(JointVelocityLimits::from_bounds(&limits.velocity)));
    constraints.push_back(Box::new(JointTorqueLimits::from_bounds(&limits.torque)));
    constraints.push_back(Box::new(FrictionCone::new(0.7)));

    let standing = standing_status(&robot, &q_standing);
    let flying = robot.create_contact_status();
    let mut landed = standing.clone();
    let shifted: Vec<Vector3<f64>> = standing
        .contact_points()
        .iter()
        .map(|p| p + Vector3::new(JUMP_LENGTH, 0.0, 0.0))
        .collect();
    landed.set_contact_points(&shifted);

    let mut sequence = ContactSequence::new(2);
    sequence.init(&standing);
    sequence.push_back(&flying, LIFTOFF, true).unwrap();
    sequence.push_back(&landed, TOUCHDOWN, true).unwrap();

    let mut sto_constraints = StoConstraints::new(3);
    sto_constraints.set_minimum_dwell_times(&MIN_DWELL).unwrap();

    let options = SolverOptions::default();
    let mut solver = OcpSolver::new(
        robot.clone(),
        sequence,
        cost,
        constraints,
        StoCostFunction::new(),
        sto_constraints,
        HORIZON,
        N,
        options.clone(),
    )
    .unwrap();

    solver.init(0.0, &q_standing, &v_zero, &options, true).unwrap();
    solver.set_solution_q(&q_standing);
    solver.set_solution_v(&v_zero);
    solver.set_solution_f(&Vector3::new(0.0, 0.0, 0.25 * robot.total_weight()));
    solver.set_sto_regularization(StoRegularization::new(
        StoRegularizationKind::Square,
        1.0e-2,
    ));
    solver.mesh_refinement(0.0);
    solver.init_constraints(0.0).unwrap();
    (solver, q_standing, v_zero)
}

#[test]
fn jump_converges_within_operational_tolerances() {
    let (mut solver, q, v) = build_solver();

    let kkt_tol = 0.1;
    let dt_tol = 0.02;
    let mut final_kkt = f64::INFINITY;
    for _ in 0..130 {
        final_kkt = solver.step(0.0, &q, &v).unwrap();
        if final_kkt < kkt_tol {
            if solver.discretization().max_dt() > dt_tol {
                solver.mesh_refinement(0.0);
            } else {
                break;
            }
        }
    }

    assert!(
        final_kkt < kkt_tol,
        "KKT residual {final_kkt} above the operational tolerance"
    );
    assert!(
        solver.discretization().max_dt() <= dt_tol + 1e-9,
        "mesh spacing {} above the operational tolerance",
        solver.discretization().max_dt()
    );

    // The optimized schedule respects the dwell minimums.
    let ts = solver.solution().switching_times().to_vec();
    assert_eq!(ts.len(), 2);
    assert!(ts[0] < ts[1], "switch times must stay ordered");
    let eps = 1e-6;
    assert!(ts[0] - 0.0 >= MIN_DWELL[0] - eps, "ground dwell violated: {}", ts[0]);
    assert!(
        ts[1] - ts[0] >= MIN_DWELL[1] - eps,
        "flying dwell violated: {}",
        ts[1] - ts[0]
    );
    assert!(
        HORIZON - ts[1] >= MIN_DWELL[2] - eps,
        "landing dwell violated: {}",
        HORIZON - ts[1]
    );
}

#[test]
fn warm_started_resolve_with_zero_budget_is_identity() {
    let (mut solver, q, v) = build_solver();
    for _ in 0..5 {
        solver.step(0.0, &q, &v).unwrap();
    }

    let q_before: Vec<DVector<f64>> = (0..solver.solution().num_nodes())
        .map(|k| solver.solution().q(k).clone())
        .collect();
    let ts_before = solver.solution().switching_times().to_vec();

    let zero_budget = SolverOptions {
        max_iter: 0,
        ..SolverOptions::default()
    };
    solver.set_solver_options(zero_budget).unwrap();
    let status = solver.solve(0.0, &q, &v).unwrap();
    assert_eq!(status, SolveStatus::MaxIterReached);

    for (k, q_node) in q_before.iter().enumerate() {
        assert_eq!(solver.solution().q(k), q_node, "node {k} moved");
    }
    assert_eq!(solver.solution().switching_times(), ts_before.as_slice());
}

#[test]
fn mesh_refinement_is_idempotent_between_time_changes() {
    let (mut solver, q, v) = build_solver();
    for _ in 0..3 {
        solver.step(0.0, &q, &v).unwrap();
    }

    solver.mesh_refinement(0.0);
    let times_once: Vec<f64> = solver
        .discretization()
        .nodes()
        .iter()
        .map(|n| n.t)
        .collect();
    solver.mesh_refinement(0.0);
    let times_twice: Vec<f64> = solver
        .discretization()
        .nodes()
        .iter()
        .map(|n| n.t)
        .collect();
    assert_eq!(times_once, times_twice);
}

#[test]
fn impulse_forces_respect_the_friction_cone() {
    let (mut solver, q, v) = build_solver();
    for _ in 0..30 {
        if solver.step(0.0, &q, &v).unwrap() < 0.1 {
            break;
        }
    }

    let impulse_node = solver
        .discretization()
        .nodes()
        .iter()
        .position(|n| n.kind == salto_ocp::NodeKind::Impulse)
        .expect("touchdown impulse node must exist");
    let mu = 0.7 / std::f64::consts::SQRT_2;
    for lam in solver.solution().f(impulse_node) {
        assert!(lam.z >= -1e-9, "impulse must push, not pull: {}", lam.z);
        assert!(lam.x.abs() <= mu * lam.z + 1e-6);
        assert!(lam.y.abs() <= mu * lam.z + 1e-6);
    }
}
