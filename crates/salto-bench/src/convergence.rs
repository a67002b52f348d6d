use std::io;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use tracing::info;

use salto_core::{SaltoError, SolveError};
use salto_ocp::OcpSolver;

use crate::logger::Logger;

/// Budget and tolerances of the convergence benchmark.
#[derive(Clone, Debug)]
pub struct ConvergenceOptions {
    /// Maximum single-iteration solves.
    pub num_iteration: u32,
    /// Mesh-spacing tolerance: refinement triggers while the largest stage
    /// interval exceeds this.
    pub dt_tol_mesh: f64,
    /// KKT threshold below which mesh refinement is allowed (refining a
    /// far-from-converged iterate would spoil the warm start).
    pub kkt_tol_mesh: f64,
}

/// Outcome of [`convergence_sto`].
#[derive(Clone, Debug)]
pub struct ConvergenceResult {
    pub iterations: u32,
    pub final_kkt: f64,
    pub final_max_dt: f64,
}

/// Drive the solver one iteration at a time until both the KKT residual
/// and the mesh spacing meet the benchmark tolerances (or the budget runs
/// out), logging switching times and KKT per iteration.
pub fn convergence_sto(
    solver: &mut OcpSolver,
    t: f64,
    q: &DVector<f64>,
    v: &DVector<f64>,
    options: &ConvergenceOptions,
    mut logger: Option<&mut Logger>,
) -> Result<ConvergenceResult, SaltoError> {
    let mut result = ConvergenceResult {
        iterations: 0,
        final_kkt: f64::INFINITY,
        final_max_dt: solver.discretization().max_dt(),
    };
    for _ in 0..options.num_iteration {
        let kkt = solver.step(t, q, v)?;
        result.iterations += 1;
        result.final_kkt = kkt;
        result.final_max_dt = solver.discretization().max_dt();
        if let Some(logger) = logger.as_deref_mut() {
            let ts: Vec<f64> = solver.solution().switching_times().to_vec();
            logger.take("ts", &ts).map_err(log_error)?;
            logger.take("KKT", &[kkt]).map_err(log_error)?;
        }
        if kkt < options.kkt_tol_mesh {
            if result.final_max_dt > options.dt_tol_mesh {
                solver.mesh_refinement(t);
            } else {
                break;
            }
        }
    }
    info!(
        iterations = result.iterations,
        kkt = result.final_kkt,
        max_dt = result.final_max_dt,
        "convergence benchmark finished"
    );
    Ok(result)
}

/// Average wall time of repeated solve calls.
pub fn cpu_time(
    solver: &mut OcpSolver,
    t: f64,
    q: &DVector<f64>,
    v: &DVector<f64>,
    num_solves: u32,
) -> Result<Duration, SolveError> {
    let started = Instant::now();
    for _ in 0..num_solves {
        solver.solve(t, q, v)?;
    }
    Ok(started.elapsed() / num_solves.max(1))
}

fn log_error(e: io::Error) -> SaltoError {
    SaltoError::Config(salto_core::ConfigError::Io(e))
}
