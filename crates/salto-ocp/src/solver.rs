use std::sync::Arc;

use nalgebra::DVector;
use rayon::prelude::*;
use tracing::{debug, warn};

use salto_contact::{ContactSequence, ContactStatus};
use salto_core::{ConfigError, SaltoError, SolveError, SolverOptions};
use salto_cost::{ConstraintData, ConstraintSet, CostFunction, EvalPoint, NodeLayout};
use salto_robot::RobotModel;
use salto_sto::{StoConstraints, StoCostFunction, StoRegularization, StoRegularizationKind};

use crate::discretization::{NodeKind, TimeDiscretization, TimeNode};
use crate::kkt::{KktError, StageData};
use crate::line_search;
use crate::riccati::{Direction, backward_pass, forward_pass};
use crate::solution::Solution;

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

/// Outcome of one solve call.
///
/// `MaxIterReached` is not a failure: in MPC use the per-tick budget is
/// exhausted on purpose and the next call warm-starts from here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    MaxIterReached,
}

/// Solver lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverState {
    Uninitialized,
    ConstraintsInitialized,
    Solving,
    Converged,
    MaxIterReached,
}

/// Per-solve statistics.
#[derive(Clone, Debug)]
pub struct SolverStatistics {
    pub status: SolveStatus,
    pub iterations: u32,
    pub final_kkt: f64,
    pub kkt_history: Vec<f64>,
}

impl Default for SolverStatistics {
    fn default() -> Self {
        Self {
            status: SolveStatus::MaxIterReached,
            iterations: 0,
            final_kkt: f64::INFINITY,
            kkt_history: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// OcpSolver
// ---------------------------------------------------------------------------

/// Direct multiple-shooting OCP solver over a contact sequence.
///
/// Owns the contact sequence, the cost/constraint aggregators, the mesh,
/// and the solution buffer. Lifecycle: `Uninitialized` until
/// [`init_constraints`](OcpSolver::init_constraints) seeds the
/// interior-point variables, then `ConstraintsInitialized`; each
/// [`solve`](OcpSolver::solve) passes through `Solving` and lands on
/// `Converged` or `MaxIterReached`.
pub struct OcpSolver {
    model: Arc<dyn RobotModel>,
    sequence: ContactSequence,
    cost: CostFunction,
    constraints: ConstraintSet,
    sto_cost: StoCostFunction,
    sto_constraints: StoConstraints,
    sto_reg: StoRegularization,
    horizon: f64,
    n_ideal: usize,
    options: SolverOptions,
    pool: rayon::ThreadPool,

    disc: TimeDiscretization,
    solution: Solution,
    constraint_data: Vec<Vec<ConstraintData>>,
    barrier: f64,
    start_time: f64,
    sto_enabled: bool,
    initialized: bool,
    iters_total: u32,
    state: SolverState,
    stats: SolverStatistics,
}

impl OcpSolver {
    /// Build a solver over the horizon `[t, t + horizon]` with `n_ideal`
    /// ideal intervals.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn RobotModel>,
        sequence: ContactSequence,
        cost: CostFunction,
        constraints: ConstraintSet,
        sto_cost: StoCostFunction,
        sto_constraints: StoConstraints,
        horizon: f64,
        n_ideal: usize,
        options: SolverOptions,
    ) -> Result<Self, SaltoError> {
        options.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.nthreads)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "nthreads",
                message: e.to_string(),
            })?;
        let disc = TimeDiscretization::new(0.0, horizon, n_ideal, options.max_dt_mesh, &sequence);
        let solution = Solution::zeros(&disc, &sequence, model.dimq(), model.dimv(), model.dimu());
        let sto_reg = StoRegularization::new(StoRegularizationKind::Square, options.sto_reg_weight);
        let barrier = options.barrier_init;
        Ok(Self {
            model,
            sequence,
            cost,
            constraints,
            sto_cost,
            sto_constraints,
            sto_reg,
            horizon,
            n_ideal,
            options,
            pool,
            disc,
            solution,
            constraint_data: Vec::new(),
            barrier,
            start_time: 0.0,
            sto_enabled: false,
            initialized: false,
            iters_total: 0,
            state: SolverState::Uninitialized,
            stats: SolverStatistics::default(),
        })
    }

    // -- Setup ------------------------------------------------------------

    /// Replace the switching-time regularization.
    pub fn set_sto_regularization(&mut self, mut reg: StoRegularization) {
        reg.set_nominal(self.sequence.event_times());
        self.sto_reg = reg;
    }

    /// Replace the solver options (e.g. swapping to a per-tick MPC budget).
    pub fn set_solver_options(&mut self, options: SolverOptions) -> Result<(), SaltoError> {
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Current options.
    #[must_use]
    pub const fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Seed every node's configuration guess.
    pub fn set_solution_q(&mut self, q: &DVector<f64>) {
        self.solution.set_q(q);
    }

    /// Seed every node's velocity guess.
    pub fn set_solution_v(&mut self, v: &DVector<f64>) {
        self.solution.set_v(v);
    }

    /// Seed every active force and impulse slot.
    pub fn set_solution_f(&mut self, f: &nalgebra::Vector3<f64>) {
        self.solution.set_f(f);
    }

    /// Build the initial discretization and seed the solution guess.
    pub fn init(
        &mut self,
        t: f64,
        q0: &DVector<f64>,
        v0: &DVector<f64>,
        options: &SolverOptions,
        sto: bool,
    ) -> Result<(), SaltoError> {
        options.validate()?;
        self.options = options.clone();
        self.start_time = t;
        self.sto_enabled = sto;
        self.disc = TimeDiscretization::new(
            t,
            self.horizon,
            self.n_ideal,
            self.options.max_dt_mesh,
            &self.sequence,
        );
        self.solution = Solution::zeros(
            &self.disc,
            &self.sequence,
            self.model.dimq(),
            self.model.dimv(),
            self.model.dimu(),
        );
        self.solution.set_q(q0);
        self.solution.set_v(v0);
        self.sto_reg.set_nominal(self.sequence.event_times());
        self.barrier = self.options.barrier_init;
        self.iters_total = 0;
        self.initialized = true;
        self.state = SolverState::Uninitialized;
        self.constraint_data.clear();
        Ok(())
    }

    /// Rebuild the mesh from the current sequence timing and remap the
    /// solution onto it. Idempotent when the timing has not moved.
    pub fn mesh_refinement(&mut self, t: f64) {
        let old_times: Vec<f64> = self.disc.nodes().iter().map(|n| n.t).collect();
        self.start_time = t;
        self.disc.refine(t, &self.sequence);
        self.solution = self.solution.remapped(
            &old_times,
            &self.disc,
            &self.sequence,
            self.model.dimq(),
            self.model.dimv(),
            self.model.dimu(),
        );
        if !self.constraint_data.is_empty() {
            self.reinit_constraint_data();
        }
    }

    /// Seed the interior-point slack and multiplier variables at the
    /// current solution guess. Required before solving.
    pub fn init_constraints(&mut self, t: f64) -> Result<(), SolveError> {
        if !self.initialized {
            return Err(SolveError::NotInitialized);
        }
        self.start_time = t;
        self.reinit_constraint_data();
        self.state = SolverState::ConstraintsInitialized;
        Ok(())
    }

    // -- Queries ----------------------------------------------------------

    /// Read view of the current solution.
    #[must_use]
    pub const fn solution(&self) -> &Solution {
        &self.solution
    }

    /// The time mesh.
    #[must_use]
    pub const fn discretization(&self) -> &TimeDiscretization {
        &self.disc
    }

    /// The contact sequence.
    #[must_use]
    pub const fn contact_sequence(&self) -> &ContactSequence {
        &self.sequence
    }

    /// Mutable access for MPC horizon shifting; the mesh resynchronizes on
    /// the next step.
    pub const fn contact_sequence_mut(&mut self) -> &mut ContactSequence {
        &mut self.sequence
    }

    /// Minimum-dwell-time constraints.
    #[must_use]
    pub const fn sto_constraints(&self) -> &StoConstraints {
        &self.sto_constraints
    }

    /// Mutable access so the MPC layer can drop consumed dwell entries.
    pub const fn sto_constraints_mut(&mut self) -> &mut StoConstraints {
        &mut self.sto_constraints
    }

    /// Horizon length.
    #[must_use]
    pub const fn horizon(&self) -> f64 {
        self.horizon
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SolverState {
        self.state
    }

    /// Statistics of the last solve call.
    #[must_use]
    pub const fn statistics(&self) -> &SolverStatistics {
        &self.stats
    }

    /// Control command of the first stage node.
    #[must_use]
    pub fn initial_control(&self) -> DVector<f64> {
        self.solution.u(0).clone()
    }

    /// Current barrier parameter.
    #[must_use]
    pub const fn barrier(&self) -> f64 {
        self.barrier
    }

    // -- Solving ----------------------------------------------------------

    /// KKT residual of the current iterate (no step taken).
    pub fn kkt_error(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
    ) -> Result<f64, SolveError> {
        if self.constraint_data.is_empty() {
            return Err(SolveError::NotInitialized);
        }
        self.sync_mesh(t);
        let stages = self.linearize();
        let dx0 = self.initial_mismatch(q, v);
        let (factors, policies) = backward_pass(&stages, 1e-9);
        let dir = forward_pass(&stages, &factors, &policies, dx0.clone());
        let sto_grad = self.sto_gradient(&stages, &dir, self.sto_reg.weight());
        Ok(self.kkt_from(&stages, &dir, &dx0, &sto_grad).total())
    }

    /// Run up to `max_iter` outer iterations.
    ///
    /// A zero iteration budget returns immediately and leaves the solution
    /// untouched, which is what makes warm-started re-solves a no-op.
    pub fn solve(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
    ) -> Result<SolveStatus, SolveError> {
        if !matches!(
            self.state,
            SolverState::ConstraintsInitialized
                | SolverState::Converged
                | SolverState::MaxIterReached
        ) {
            return Err(SolveError::NotInitialized);
        }
        self.state = SolverState::Solving;
        self.stats = SolverStatistics::default();

        let mut status = SolveStatus::MaxIterReached;
        for _ in 0..self.options.max_iter {
            let kkt = self.step(t, q, v)?;
            self.stats.iterations += 1;
            self.stats.kkt_history.push(kkt);
            self.stats.final_kkt = kkt;
            if kkt < self.options.kkt_tol {
                status = SolveStatus::Converged;
                break;
            }
        }
        self.stats.status = status;
        self.state = match status {
            SolveStatus::Converged => SolverState::Converged,
            SolveStatus::MaxIterReached => SolverState::MaxIterReached,
        };
        Ok(status)
    }

    /// One outer iteration: linearize, sweep, line-search, update.
    ///
    /// Returns the KKT residual of the iterate the step departed from; if
    /// that residual is already below tolerance no step is taken.
    pub fn step(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
    ) -> Result<f64, SolveError> {
        if self.constraint_data.is_empty() {
            return Err(SolveError::NotInitialized);
        }
        self.sync_mesh(t);
        if self.sto_enabled && self.mesh_needs_refinement() {
            debug!("mesh spacing degraded, refining before the iteration");
            self.mesh_refinement(t);
        }

        let stages = self.linearize();
        let dx0 = self.initial_mismatch(q, v);
        let (factors, policies) = backward_pass(&stages, 1e-9);
        let dir = forward_pass(&stages, &factors, &policies, dx0.clone());

        // Switching-time direction.
        let reg_weight = if self.iters_total < self.options.initial_sto_reg_iter {
            self.options.initial_sto_reg
        } else {
            self.sto_reg.weight()
        };
        let free = self.free_events();
        let num_events = self.sequence.num_events();
        let (sto_grad_total, dts) = if self.sto_enabled && free.iter().any(|&f| f) {
            // The gradient carries the Hamiltonian differences, the dwell
            // barrier, and the regularization; the Hessian the latter two
            // (the direct curvature of the time-scaled cost vanishes).
            let grad = self.sto_gradient(&stages, &dir, reg_weight);
            let mut scratch = DVector::zeros(num_events);
            let mut hess = nalgebra::DMatrix::zeros(num_events, num_events);
            let ts = self.sequence.event_times().to_vec();
            let tf = t + self.horizon;
            self.sto_constraints
                .condense(&ts, t, tf, self.barrier, &mut scratch, &mut hess);
            self.sto_cost.quadratize(&ts, &mut scratch, &mut hess);
            self.sto_reg
                .condense_with_weight(&ts, reg_weight, &mut scratch, &mut hess);
            let newton = salto_sto::solve_newton(
                &grad,
                &hess,
                &free,
                self.options.sto_cond_threshold,
                self.options.sto_reg_weight.max(1e-6),
            );
            // Trust cap: a steep Hamiltonian gradient must not produce a
            // switching-time step that starves the shared line search.
            let cap = 0.05 * self.horizon;
            let max_abs = newton.dts.amax();
            let dts = if max_abs > cap {
                newton.dts * (cap / max_abs)
            } else {
                newton.dts
            };
            (grad, dts)
        } else {
            (DVector::zeros(num_events), DVector::zeros(num_events))
        };

        // Convergence check on the departing iterate.
        let kkt_residual = self.kkt_from(
            &stages,
            &dir,
            &dx0,
            &self.sto_gradient(&stages, &dir, self.sto_reg.weight()),
        );
        let kkt = kkt_residual.total();
        if kkt < self.options.kkt_tol {
            return Ok(kkt);
        }

        // Step bound from the fraction-to-boundary rule.
        let tau = self.options.fraction_to_boundary;
        let mut alpha_max: f64 = 1.0;
        for (k, stage) in stages.iter().enumerate() {
            let node = self.disc.nodes()[k];
            let dz = Self::node_direction(stage, &dir, k);
            let (point_status, is_impulse) = self.node_status(&node);
            let point = self.eval_point(k, &node, point_status, stage.layout);
            alpha_max = alpha_max.min(self.constraints.max_step(
                &point,
                &self.constraint_data[k],
                is_impulse,
                &dz,
                tau,
            ));
        }
        {
            let ts = self.sequence.event_times();
            alpha_max =
                alpha_max.min(self.sto_constraints.max_step(ts, &dts, t, t + self.horizon, tau));
        }

        // Merit line search.
        let penalty = self.defect_penalty(&dir);
        let merit0 = self.merit(&dir, &dts, 0.0, q, v, penalty);
        let dd = self.directional_derivative(&stages, &dir, &sto_grad_total, &dts, penalty);
        let options = self.options.clone();
        let alpha = {
            let this = &*self;
            line_search::backtracking(&options, alpha_max, merit0, dd, |a| {
                this.merit(&dir, &dts, a, q, v, penalty)
            })?
        };

        self.apply_step(&dir, &dts, alpha, t);
        self.iters_total += 1;
        debug!(kkt, alpha, "outer iteration complete");
        Ok(kkt)
    }

    // -- Internals --------------------------------------------------------

    fn reinit_constraint_data(&mut self) {
        let nodes: Vec<TimeNode> = self.disc.nodes().to_vec();
        self.constraint_data = nodes
            .iter()
            .enumerate()
            .map(|(k, node)| {
                if node.kind == NodeKind::Terminal {
                    return self.constraints.empty_data();
                }
                let (status, is_impulse) = self.node_status(node);
                let layout = self.layout_for(node, status);
                let point = self.eval_point(k, node, status, layout);
                self.constraints.init_data(&point, is_impulse, self.barrier)
            })
            .collect();
    }

    /// Contact (or impulse) status governing a node.
    fn node_status<'a>(&'a self, node: &TimeNode) -> (&'a ContactStatus, bool) {
        if node.kind == NodeKind::Impulse
            && let Some(event) = node.event
            && let Ok(impulse) = self.sequence.impulse_status(event)
        {
            return (impulse.as_contact_status(), true);
        }
        let status = self
            .sequence
            .contact_status(node.phase)
            .expect("discretization phase must exist in the sequence");
        (status, false)
    }

    fn layout_for(&self, node: &TimeNode, status: &ContactStatus) -> NodeLayout {
        match node.kind {
            NodeKind::Stage => {
                NodeLayout::stage(self.model.dimv(), self.model.dimu(), status.dimf())
            }
            NodeKind::Impulse => NodeLayout::impulse(self.model.dimv(), status.dimf()),
            NodeKind::Terminal => NodeLayout::terminal(self.model.dimv()),
        }
    }

    fn eval_point<'a>(
        &'a self,
        k: usize,
        node: &TimeNode,
        status: &'a ContactStatus,
        layout: NodeLayout,
    ) -> EvalPoint<'a> {
        EvalPoint {
            t: node.t,
            dt: node.dt,
            q: self.solution.q(k),
            v: self.solution.v(k),
            u: self.solution.u(k),
            f: self.solution.f(k),
            status,
            layout,
        }
    }

    /// Keep the mesh aligned with the sequence timing; remap the solution
    /// when the node structure changed (events entering or leaving the
    /// window).
    fn sync_mesh(&mut self, t: f64) {
        #[allow(clippy::float_cmp)]
        let unchanged = self.start_time == t
            && self
                .disc
                .nodes()
                .last()
                .is_some_and(|n| (n.t - (t + self.horizon)).abs() < 1e-12)
            && self.solution.switching_times() == self.sequence.event_times();
        if unchanged {
            return;
        }
        self.start_time = t;
        let old_times: Vec<f64> = self.disc.nodes().iter().map(|n| n.t).collect();
        self.disc.update_times(t, &self.sequence);
        // Remapping by nearest time keeps node shapes consistent with the
        // new mesh even when phases were renumbered by a pop_front.
        self.solution = self.solution.remapped(
            &old_times,
            &self.disc,
            &self.sequence,
            self.model.dimq(),
            self.model.dimv(),
            self.model.dimu(),
        );
        if !self.constraint_data.is_empty() {
            self.reinit_constraint_data();
        }
    }

    fn mesh_needs_refinement(&self) -> bool {
        self.disc.max_dt() > self.disc.effective_max_dt() + 1e-9
    }

    fn initial_mismatch(&self, q: &DVector<f64>, v: &DVector<f64>) -> DVector<f64> {
        let dimv = self.model.dimv();
        let mut dx0 = DVector::zeros(2 * dimv);
        for i in 0..dimv {
            dx0[i] = q[i] - self.solution.q(0)[i];
            dx0[dimv + i] = v[i] - self.solution.v(0)[i];
        }
        dx0
    }

    fn linearize(&self) -> Vec<StageData> {
        let n = self.disc.num_nodes();
        self.pool
            .install(|| (0..n).into_par_iter().map(|k| self.linearize_node(k)).collect())
    }

    fn linearize_node(&self, k: usize) -> StageData {
        let node = self.disc.nodes()[k];
        let (status, is_impulse) = self.node_status(&node);
        let layout = self.layout_for(&node, status);
        let point = self.eval_point(k, &node, status, layout);
        let mut stage = StageData::zeros(layout);
        let dimv = layout.dimv;

        match node.kind {
            NodeKind::Stage => {
                stage.cost = self.cost.stage_cost(&point);
                stage.cost_rate = if node.dt > 0.0 { stage.cost / node.dt } else { 0.0 };
                self.cost
                    .stage_quadratize(&point, &mut stage.grad, &mut stage.hess);
                self.constraints.condense(
                    &point,
                    &self.constraint_data[k],
                    is_impulse,
                    self.barrier,
                    &mut stage.grad,
                    &mut stage.hess,
                );
                stage.violation = self.constraints.primal_violation(&point, is_impulse);

                let vdot = self
                    .model
                    .dynamics(point.q, point.v, point.u, point.f, status);
                let jac = self
                    .model
                    .linearize_dynamics(point.q, point.v, point.u, point.f, status);
                let dt = node.dt;
                for i in 0..dimv {
                    stage.a[(i, i)] = 1.0;
                    stage.a[(i, dimv + i)] = dt;
                }
                stage
                    .a
                    .view_mut((dimv, 0), (dimv, dimv))
                    .copy_from(&(dt * &jac.dq));
                {
                    let mut block = stage.a.view_mut((dimv, dimv), (dimv, dimv));
                    block.copy_from(&(dt * &jac.dv));
                    for i in 0..dimv {
                        block[(i, i)] += 1.0;
                    }
                }
                if layout.dimu > 0 {
                    stage
                        .b
                        .view_mut((dimv, 0), (dimv, layout.dimu))
                        .copy_from(&(dt * &jac.du));
                }
                if layout.dimf > 0 {
                    stage
                        .b
                        .view_mut((dimv, layout.dimu), (dimv, layout.dimf))
                        .copy_from(&(dt * &jac.df));
                }
                stage.xdot.rows_mut(0, dimv).copy_from(point.v);
                stage.xdot.rows_mut(dimv, dimv).copy_from(&vdot);

                if k + 1 < self.disc.num_nodes() {
                    let q_pred = self.model.integrate(point.q, point.v, dt);
                    let v_pred = point.v + dt * &vdot;
                    let q_next = self.solution.q(k + 1);
                    let v_next = self.solution.v(k + 1);
                    for i in 0..dimv {
                        stage.defect[i] = q_pred[i] - q_next[i];
                        stage.defect[dimv + i] = v_pred[i] - v_next[i];
                    }
                }
            }
            NodeKind::Impulse => {
                stage.cost = self.cost.impulse_cost(&point);
                self.cost
                    .impulse_quadratize(&point, &mut stage.grad, &mut stage.hess);
                self.constraints.condense(
                    &point,
                    &self.constraint_data[k],
                    true,
                    self.barrier,
                    &mut stage.grad,
                    &mut stage.hess,
                );
                stage.violation = self.constraints.primal_violation(&point, true);

                let event = node.event.expect("impulse node must carry its event");
                let impulse = self
                    .sequence
                    .impulse_status(event)
                    .expect("impulse node event must exist");
                for i in 0..2 * dimv {
                    stage.a[(i, i)] = 1.0;
                }
                let jimp = self.model.impulse_jacobian(point.q, impulse);
                stage
                    .b
                    .view_mut((dimv, 0), (dimv, layout.dimf))
                    .copy_from(&jimp);

                if k + 1 < self.disc.num_nodes() {
                    let v_plus =
                        self.model
                            .impulse_velocity_jump(point.q, point.v, point.f, impulse);
                    let q_next = self.solution.q(k + 1);
                    let v_next = self.solution.v(k + 1);
                    for i in 0..dimv {
                        stage.defect[i] = point.q[i] - q_next[i];
                        stage.defect[dimv + i] = v_plus[i] - v_next[i];
                    }
                }
            }
            NodeKind::Terminal => {
                stage.cost = self.cost.terminal_cost(&point);
                self.cost
                    .terminal_quadratize(&point, &mut stage.grad, &mut stage.hess);
            }
        }
        stage
    }

    fn free_events(&self) -> Vec<bool> {
        let t0 = self.start_time;
        let tf = t0 + self.horizon;
        // Events within two mesh intervals of the window start are frozen:
        // their timing can no longer move without colliding with the
        // receding horizon.
        let margin = 2.0 * self.disc.effective_max_dt();
        (0..self.sequence.num_events())
            .map(|e| {
                let te = self.sequence.event_times()[e];
                te > t0 + margin
                    && te < tf
                    && self.sequence.is_sto_enabled(e).unwrap_or(false)
            })
            .collect()
    }

    /// Switching-time gradient: Hamiltonian differences across each event
    /// plus the dwell barrier and the regularization at `reg_weight`.
    fn sto_gradient(
        &self,
        stages: &[StageData],
        dir: &Direction,
        reg_weight: f64,
    ) -> DVector<f64> {
        let num_events = self.sequence.num_events();
        let mut grad = DVector::zeros(num_events);
        if num_events == 0 || !self.sto_enabled {
            return grad;
        }

        let num_phases = self.sequence.num_phases();
        let mut h_sum = vec![0.0; num_phases];
        let mut n_count = vec![0usize; num_phases];
        for (k, node) in self.disc.nodes().iter().enumerate() {
            if node.kind != NodeKind::Stage || k + 1 >= stages.len() {
                continue;
            }
            let hamiltonian = stages[k].cost_rate + dir.costate[k + 1].dot(&stages[k].xdot);
            h_sum[node.phase] += hamiltonian;
            n_count[node.phase] += 1;
        }
        for e in 0..num_events {
            let before = e;
            let after = e + 1;
            if after < num_phases && n_count[before] > 0 && n_count[after] > 0 {
                #[allow(clippy::cast_precision_loss)]
                {
                    grad[e] = h_sum[before] / n_count[before] as f64
                        - h_sum[after] / n_count[after] as f64;
                }
            }
        }

        // Dwell barrier and regularization only while the events being
        // optimized are inside the window; an event that slid past the
        // horizon start has no meaningful dwell slack any more.
        if self.free_events().iter().any(|&f| f) {
            let ts = self.sequence.event_times().to_vec();
            let t0 = self.start_time;
            let tf = t0 + self.horizon;
            let mut hess = nalgebra::DMatrix::zeros(num_events, num_events);
            self.sto_constraints
                .condense(&ts, t0, tf, self.barrier, &mut grad, &mut hess);
            self.sto_cost.quadratize(&ts, &mut grad, &mut hess);
            self.sto_reg
                .condense_with_weight(&ts, reg_weight, &mut grad, &mut hess);
        }
        grad
    }

    fn kkt_from(
        &self,
        stages: &[StageData],
        dir: &Direction,
        dx0: &DVector<f64>,
        sto_grad: &DVector<f64>,
    ) -> KktError {
        let n = stages.len();
        let mut err = KktError::default();
        for (k, stage) in stages.iter().enumerate() {
            let nx = stage.layout.nx();
            let nw = stage.layout.nw();
            let lam = &dir.costate[k];
            if k + 1 < n {
                let lam_next = &dir.costate[k + 1];
                let rx = stage.grad.rows(0, nx) + stage.a.transpose() * lam_next - lam;
                err.stationarity += rx.norm_squared();
                if nw > 0 {
                    let rw = stage.grad.rows(nx, nw) + stage.b.transpose() * lam_next;
                    err.stationarity += rw.norm_squared();
                }
                err.dynamics += stage.defect.norm_squared();
            } else {
                let rx = stage.grad.rows(0, nx) - lam;
                err.stationarity += rx.norm_squared();
            }
            err.constraints += stage.violation;
        }
        err.dynamics += dx0.norm_squared();
        for (e, &free) in self.free_events().iter().enumerate() {
            if free {
                err.sto += sto_grad[e] * sto_grad[e];
            }
        }
        err
    }

    fn node_direction(stage: &StageData, dir: &Direction, k: usize) -> DVector<f64> {
        let nx = stage.layout.nx();
        let nw = stage.layout.nw();
        let mut dz = DVector::zeros(nx + nw);
        dz.rows_mut(0, nx).copy_from(&dir.dx[k]);
        if nw > 0 {
            dz.rows_mut(nx, nw).copy_from(&dir.dw[k]);
        }
        dz
    }

    fn defect_penalty(&self, dir: &Direction) -> f64 {
        let mut max_costate: f64 = 1.0;
        for lam in &dir.costate {
            max_costate = max_costate.max(lam.amax());
        }
        2.0 * max_costate
    }

    fn directional_derivative(
        &self,
        stages: &[StageData],
        dir: &Direction,
        sto_grad: &DVector<f64>,
        dts: &DVector<f64>,
        penalty: f64,
    ) -> f64 {
        let mut dd = 0.0;
        let mut defect_l1 = 0.0;
        for (k, stage) in stages.iter().enumerate() {
            let nx = stage.layout.nx();
            let nw = stage.layout.nw();
            for i in 0..nx {
                dd += stage.grad[i] * dir.dx[k][i];
            }
            for j in 0..nw {
                dd += stage.grad[nx + j] * dir.dw[k][j];
            }
            defect_l1 += stage.defect.iter().map(|d| d.abs()).sum::<f64>();
        }
        dd += sto_grad.dot(dts);
        dd - penalty * defect_l1
    }

    /// Merit of the trial point at step length `alpha`.
    ///
    /// Cost plus the interior-point barriers plus a penalty on the
    /// multiple-shooting defects; infinite for infeasible trials, which
    /// makes the backtracking reject them outright.
    #[allow(clippy::too_many_lines)]
    fn merit(
        &self,
        dir: &Direction,
        dts: &DVector<f64>,
        alpha: f64,
        q_meas: &DVector<f64>,
        v_meas: &DVector<f64>,
        penalty: f64,
    ) -> f64 {
        let dimv = self.model.dimv();
        let n = self.disc.num_nodes();

        // Trial switching times and the retimed mesh.
        let mut trial_ts = self.sequence.event_times().to_vec();
        for (e, t) in trial_ts.iter_mut().enumerate() {
            *t += alpha * dts[e];
        }
        let has_sto_step = dts.iter().any(|d| d.abs() > 0.0);
        let trial_disc = if alpha == 0.0 || !has_sto_step {
            None
        } else {
            Some(self.disc.retimed(&self.sequence, &trial_ts))
        };
        let nodes: &[TimeNode] = trial_disc
            .as_ref()
            .map_or(self.disc.nodes(), TimeDiscretization::nodes);

        // Trial primal point.
        let mut q_trial = Vec::with_capacity(n);
        let mut v_trial = Vec::with_capacity(n);
        let mut u_trial = Vec::with_capacity(n);
        let mut f_trial = Vec::with_capacity(n);
        for k in 0..n {
            let dq = dir.dx[k].rows(0, dimv);
            let dv = dir.dx[k].rows(dimv, dimv);
            q_trial.push(self.model.integrate(self.solution.q(k), &dq.into_owned(), alpha));
            v_trial.push(self.solution.v(k) + alpha * dv);
            let layout_u = self.solution.u(k).len();
            let mut u = self.solution.u(k).clone();
            for j in 0..layout_u {
                u[j] += alpha * dir.dw[k][j];
            }
            u_trial.push(u);
            let mut f = self.solution.f(k).to_vec();
            for (slot, force) in f.iter_mut().enumerate() {
                for axis in 0..3 {
                    force[axis] += alpha * dir.dw[k][layout_u + 3 * slot + axis];
                }
            }
            f_trial.push(f);
        }

        let mut merit = 0.0;
        for k in 0..n {
            let node = nodes[k];
            let (status, is_impulse) = self.node_status(&node);
            let layout = self.layout_for(&node, status);
            let point = EvalPoint {
                t: node.t,
                dt: node.dt,
                q: &q_trial[k],
                v: &v_trial[k],
                u: &u_trial[k],
                f: &f_trial[k],
                status,
                layout,
            };
            match node.kind {
                NodeKind::Stage => {
                    merit += self.cost.stage_cost(&point);
                    let barrier = self.constraints.barrier_cost(&point, is_impulse, self.barrier);
                    if !barrier.is_finite() {
                        return f64::INFINITY;
                    }
                    merit += barrier;
                    if k + 1 < n {
                        let vdot = self
                            .model
                            .dynamics(point.q, point.v, point.u, point.f, status);
                        let q_pred = self.model.integrate(point.q, point.v, node.dt);
                        let v_pred = point.v + node.dt * vdot;
                        for i in 0..dimv {
                            merit += penalty
                                * ((q_pred[i] - q_trial[k + 1][i]).abs()
                                    + (v_pred[i] - v_trial[k + 1][i]).abs());
                        }
                    }
                }
                NodeKind::Impulse => {
                    merit += self.cost.impulse_cost(&point);
                    let barrier = self.constraints.barrier_cost(&point, true, self.barrier);
                    if !barrier.is_finite() {
                        return f64::INFINITY;
                    }
                    merit += barrier;
                    if k + 1 < n
                        && let Some(event) = node.event
                        && let Ok(impulse) = self.sequence.impulse_status(event)
                    {
                        let v_plus = self.model.impulse_velocity_jump(
                            point.q, point.v, point.f, impulse,
                        );
                        for i in 0..dimv {
                            merit += penalty
                                * ((point.q[i] - q_trial[k + 1][i]).abs()
                                    + (v_plus[i] - v_trial[k + 1][i]).abs());
                        }
                    }
                }
                NodeKind::Terminal => {
                    merit += self.cost.terminal_cost(&point);
                }
            }
        }

        // Initial-state consistency.
        for i in 0..dimv {
            merit += penalty
                * ((q_meas[i] - q_trial[0][i]).abs() + (v_meas[i] - v_trial[0][i]).abs());
        }

        // Switching-time terms, only while events are being optimized.
        if self.sto_enabled && self.free_events().iter().any(|&f| f) {
            let t0 = self.start_time;
            let tf = t0 + self.horizon;
            let sto_barrier = self
                .sto_constraints
                .barrier_cost(&trial_ts, t0, tf, self.barrier);
            if !sto_barrier.is_finite() {
                return f64::INFINITY;
            }
            merit += sto_barrier;
            merit += self.sto_cost.cost(&trial_ts);
            let reg_weight = if self.iters_total < self.options.initial_sto_reg_iter {
                self.options.initial_sto_reg
            } else {
                self.sto_reg.weight()
            };
            merit += self.sto_reg.cost_with_weight(&trial_ts, reg_weight);
        }
        merit
    }

    fn apply_step(&mut self, dir: &Direction, dts: &DVector<f64>, alpha: f64, t: f64) {
        let dimv = self.model.dimv();
        let n = self.disc.num_nodes();
        for k in 0..n {
            let dq = dir.dx[k].rows(0, dimv).into_owned();
            let dv = dir.dx[k].rows(dimv, dimv).into_owned();
            let q_new = self.model.integrate(self.solution.q(k), &dq, alpha);
            self.solution.q_mut(k).copy_from(&q_new);
            *self.solution.v_mut(k) += alpha * dv;
            let n_u = self.solution.u(k).len();
            for j in 0..n_u {
                self.solution.u_mut(k)[j] += alpha * dir.dw[k][j];
            }
            let n_f = self.solution.f(k).len();
            for slot in 0..n_f {
                for axis in 0..3 {
                    self.solution.f_mut(k)[slot][axis] +=
                        alpha * dir.dw[k][n_u + 3 * slot + axis];
                }
            }
        }

        // Commit the switching times and re-space the mesh.
        if dts.iter().any(|d| d.abs() > 0.0) {
            let mut new_ts = self.sequence.event_times().to_vec();
            for (e, ts) in new_ts.iter_mut().enumerate() {
                *ts += alpha * dts[e];
            }
            if let Err(e) = self.sequence.set_event_times(&new_ts) {
                warn!(error = %e, "rejecting switching-time update");
            } else {
                self.disc.update_times(t, &self.sequence);
                self.solution
                    .set_switching_times(self.sequence.event_times());
            }
        }

        // Barrier schedule and interior-point refresh.
        self.barrier = (self.barrier * self.options.barrier_decay).max(self.options.barrier_min);
        let nodes: Vec<TimeNode> = self.disc.nodes().to_vec();
        for (k, node) in nodes.iter().enumerate() {
            if node.kind == NodeKind::Terminal {
                continue;
            }
            let mut data = std::mem::take(&mut self.constraint_data[k]);
            let (status, is_impulse) = self.node_status(node);
            let layout = self.layout_for(node, status);
            let point = self.eval_point(k, node, status, layout);
            self.constraints
                .update_data(&point, &mut data, is_impulse, self.barrier);
            self.constraint_data[k] = data;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
