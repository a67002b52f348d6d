//! Closed-loop jump MPC on the built-in quadruped.
//!
//! Mirrors the classic jump driver: an offline 50-iteration solve with a
//! long switching-time freeze, then 2-iteration re-solves at 400 Hz while
//! the state is propagated through the model's own dynamics under the
//! planned contact forces. Configuration, velocity, and time are logged as
//! plain numeric tables.

use std::error::Error;

use clap::{Parser, ValueEnum};
use nalgebra::{DVector, Vector3};

use salto_bench::Logger;
use salto_core::SolverOptions;
use salto_demos::build_quadruped;
use salto_mpc::{JumpFootStepPlanner, MpcJump};
use salto_robot::RobotModel;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum JumpType {
    Longitudinal,
    Lateral,
    Back,
    Rotational,
}

impl JumpType {
    fn pattern(self) -> (Vector3<f64>, f64) {
        match self {
            Self::Longitudinal => (Vector3::new(0.6, 0.0, 0.0), 0.0),
            Self::Lateral => (Vector3::new(0.0, 0.4, 0.0), 0.0),
            Self::Back => (Vector3::new(-0.3, 0.0, 0.0), 0.0),
            Self::Rotational => (Vector3::new(0.1, 0.0, 0.0), std::f64::consts::PI / 6.0),
        }
    }
}

#[derive(Parser)]
#[command(about = "Closed-loop jump MPC")]
struct Args {
    /// Jump pattern.
    #[arg(long, value_enum, default_value = "longitudinal")]
    jump_type: JumpType,

    /// Simulated duration in seconds.
    #[arg(long, default_value_t = 1.5)]
    sim_time: f64,

    /// Write q/v/t logs.
    #[arg(long)]
    log: bool,

    /// Log directory.
    #[arg(long, default_value = "logs/mpc_jump")]
    log_dir: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let robot = build_quadruped();
    let mut q = robot.standing_configuration();
    let mut v = DVector::zeros(robot.dimv());

    let horizon = 0.8;
    let n = 18;
    let mut mpc = MpcJump::new(robot.clone(), horizon, n);
    let (jump_length, jump_yaw) = args.jump_type.pattern();
    let mut planner = JumpFootStepPlanner::new(robot.clone());
    planner.set_jump_pattern(jump_length, jump_yaw);
    mpc.set_jump_pattern(planner, 0.3, 0.2, 0.3, 0.2);

    let option_init = SolverOptions {
        max_iter: 50,
        initial_sto_reg_iter: 50,
        ..SolverOptions::default()
    };
    mpc.init(0.0, &q, &v, &option_init, true)?;
    mpc.set_solver_options(&SolverOptions::mpc(horizon, n))?;

    let mut logger = if args.log {
        Some(Logger::new(&args.log_dir, "mpc_jump", &["q", "v", "t"])?)
    } else {
        None
    };

    let sim_dt = 0.0025; // 400 Hz control
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = (args.sim_time / sim_dt) as usize;
    let mut total_update_us: u64 = 0;
    let mut worst_update_us: u64 = 0;

    let mut t = 0.0;
    for _ in 0..steps {
        let u = mpc.update(t, &q, &v)?;
        total_update_us += mpc.last_update_us();
        worst_update_us = worst_update_us.max(mpc.last_update_us());

        // Propagate the state through the model's own dynamics under the
        // planned contact forces.
        let solver = mpc.solver().expect("initialized above");
        let sequence = solver.contact_sequence();
        let status = sequence.contact_status(sequence.phase_at(t))?;
        let forces = solver.solution().f(0).to_vec();
        let vdot = robot.dynamics(&q, &v, &u, &forces, status);
        v += sim_dt * vdot;
        q = robot.integrate(&q, &v, sim_dt);
        t += sim_dt;

        if let Some(logger) = logger.as_mut() {
            logger.take("q", q.as_slice())?;
            logger.take("v", v.as_slice())?;
            logger.take("t", &[t])?;
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let mean_us = total_update_us / steps.max(1) as u64;
    println!("jump type:        {:?}", args.jump_type);
    println!("simulated time:   {:.3} s ({steps} ticks at 400 Hz)", t);
    println!("final base pos:   [{:.3}, {:.3}, {:.3}]", q[0], q[1], q[2]);
    println!("mean update time: {mean_us} us");
    println!("peak update time: {worst_update_us} us");
    if let Some(logger) = logger.as_mut() {
        logger.flush()?;
        println!("logs written to:  {}", logger.log_dir().display());
    }
    Ok(())
}
