//! Offline jump trajectory optimization with switching-time optimization.
//!
//! Standing → flying → standing on the built-in quadruped: the liftoff and
//! touchdown times start at 0.7 s and 0.95 s and are optimized subject to
//! minimum dwell times of (0.1, 0.1, 0.65) s. Switching times and the KKT
//! residual are logged per iteration as plain numeric tables.

use std::error::Error;

use clap::Parser;
use nalgebra::{DVector, Vector3};

use salto_bench::{ConvergenceOptions, Logger, convergence_sto};
use salto_contact::ContactSequence;
use salto_core::SolverOptions;
use salto_cost::{ConfigurationCost, CostFunction, TaskSpace3dCost};
use salto_demos::{build_quadruped, shifted_points, standard_constraints, standing_status};
use salto_ocp::OcpSolver;
use salto_robot::RobotModel;
use salto_sto::{StoConstraints, StoCostFunction, StoRegularization, StoRegularizationKind};

#[derive(Parser)]
#[command(about = "Jump trajectory optimization with switching-time optimization")]
struct Args {
    /// Jump length along x in meters.
    #[arg(long, default_value_t = 0.5)]
    jump_length: f64,

    /// Iteration budget.
    #[arg(long, default_value_t = 130)]
    num_iteration: u32,

    /// Log directory.
    #[arg(long, default_value = "logs/jumping_sto")]
    log_dir: String,
}

#[allow(clippy::too_many_lines)]
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let robot = build_quadruped();
    let q_standing = robot.standing_configuration();
    let v_zero = DVector::zeros(robot.dimv());

    let dt = 0.02;
    let liftoff_time = 0.7;
    let touchdown_time = 0.95;
    let horizon = 1.7;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n = (horizon / dt) as usize;
    let t0 = 0.0;

    // Cost: track the landing configuration, keep stance feet planted.
    let mut q_ref = q_standing.clone();
    q_ref[0] += args.jump_length;
    let mut q_weight = DVector::from_element(robot.dimv(), 0.001);
    q_weight[0] = 1.0;
    q_weight[1] = 0.0;
    q_weight[2] = 0.0;
    for i in 3..6 {
        q_weight[i] = 1.0;
    }
    let mut q_weight_impulse = DVector::from_element(robot.dimv(), 0.1);
    for i in 0..3 {
        q_weight_impulse[i] = 0.0;
    }
    for i in 3..6 {
        q_weight_impulse[i] = 100.0;
    }

    let mut config_cost = ConfigurationCost::new(robot.dimv(), robot.dimu());
    config_cost.set_q_ref(q_ref);
    config_cost.set_q_weight(q_weight.clone());
    config_cost.set_q_weight_terminal(q_weight);
    config_cost.set_q_weight_impulse(q_weight_impulse);
    config_cost.set_v_weight(DVector::from_element(robot.dimv(), 1.0));
    config_cost.set_v_weight_terminal(DVector::from_element(robot.dimv(), 1.0));
    config_cost.set_v_weight_impulse(DVector::from_element(robot.dimv(), 1.0));
    config_cost.set_u_weight(DVector::from_element(robot.dimu(), 1.0e-6));

    let mut cost = CostFunction::new();
    cost.push_back(Box::new(config_cost));
    let track = 10.0 / robot.spec().stabilization_dt.powi(2);
    for frame in 0..robot.num_contacts() {
        let mut foot = TaskSpace3dCost::new(robot.clone(), frame);
        foot.set_weight(Vector3::new(track, track, track));
        cost.push_back(Box::new(foot));
    }

    let mu = 0.7;
    let constraints = standard_constraints(&robot, mu);

    // Contact sequence: stand, fly, land shifted by the jump length.
    let standing = standing_status(&robot, &q_standing);
    let flying = robot.create_contact_status();
    let mut landed = standing.clone();
    landed.set_contact_points(&shifted_points(
        standing.contact_points(),
        &Vector3::new(args.jump_length, 0.0, 0.0),
    ));

    let max_impulses = 1;
    let mut contact_sequence = ContactSequence::new(2 * max_impulses);
    contact_sequence.init(&standing);
    contact_sequence.push_back(&flying, t0 + liftoff_time, true)?;
    contact_sequence.push_back(&landed, t0 + touchdown_time, true)?;

    let mut sto_constraints = StoConstraints::new(2 * max_impulses + 1);
    sto_constraints.set_minimum_dwell_times(&[0.1, 0.1, 0.65])?;

    let options = SolverOptions::default();
    let mut solver = OcpSolver::new(
        robot.clone(),
        contact_sequence,
        cost,
        constraints,
        StoCostFunction::new(),
        sto_constraints,
        horizon,
        n,
        options.clone(),
    )?;

    solver.init(t0, &q_standing, &v_zero, &options, true)?;
    solver.set_solution_q(&q_standing);
    solver.set_solution_v(&v_zero);
    let f_init = Vector3::new(0.0, 0.0, 0.25 * robot.total_weight());
    solver.set_solution_f(&f_init);
    solver.set_sto_regularization(StoRegularization::new(
        StoRegularizationKind::Square,
        1.0e-2,
    ));
    solver.mesh_refinement(t0);
    solver.init_constraints(t0)?;

    let mut logger = Logger::new(&args.log_dir, "jumping_sto", &["ts", "KKT"])?;
    let result = convergence_sto(
        &mut solver,
        t0,
        &q_standing,
        &v_zero,
        &ConvergenceOptions {
            num_iteration: args.num_iteration,
            dt_tol_mesh: 0.02,
            kkt_tol_mesh: 0.1,
        },
        Some(&mut logger),
    )?;
    logger.flush()?;

    let ts = solver.solution().switching_times();
    println!("iterations:      {}", result.iterations);
    println!("final KKT:       {:.6e}", result.final_kkt);
    println!("final max dt:    {:.6}", result.final_max_dt);
    println!("liftoff time:    {:.6}", ts[0]);
    println!("touchdown time:  {:.6}", ts[1]);
    println!("logs written to: {}", logger.log_dir().display());
    Ok(())
}
