use std::sync::Arc;
use std::time::Instant;

use nalgebra::{DVector, Vector3};
use tracing::debug;

use salto_contact::ContactSequence;
use salto_core::{SaltoError, SolveError, SolverOptions};
use salto_cost::{
    ConfigurationCost, ConstraintSet, CostFunction, FrictionCone, JointPositionLimits,
    JointTorqueLimits, JointVelocityLimits, TaskSpace3dCost,
};
use salto_ocp::{OcpSolver, Solution};
use salto_robot::RobotModel;
use salto_sto::{StoConstraints, StoCostFunction};

use crate::planner::JumpFootStepPlanner;

/// MPC lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpcState {
    Idle,
    Initialized,
    Running,
}

/// Receding-horizon MPC for a single jump motion.
///
/// Builds its own cost function, constraints, and ground→flying→ground
/// contact sequence from a jump pattern, runs an offline high-iteration
/// solve at [`init`](MpcJump::init), and re-solves the shifted horizon
/// with a per-tick iteration budget during closed-loop execution. The
/// per-tick wall time is measured and reported, not enforced: exceeding
/// the control period is the caller's timing violation to handle.
///
/// Assumes the floating-base chart `q = [position(3), rpy(3), joints]`
/// when displacing the tracking reference by the jump pattern.
pub struct MpcJump {
    model: Arc<dyn RobotModel>,
    horizon: f64,
    n_ideal: usize,
    planner: JumpFootStepPlanner,
    flying_time: f64,
    min_flying_time: f64,
    ground_time: f64,
    min_ground_time: f64,
    friction_coefficient: f64,
    dwell: Vec<f64>,
    dwell_offset: usize,
    solver: Option<OcpSolver>,
    state: MpcState,
    last_update_us: u64,
}

impl MpcJump {
    /// MPC over the horizon `[t, t + horizon]` with `n_ideal` ideal
    /// intervals.
    #[must_use]
    pub fn new(model: Arc<dyn RobotModel>, horizon: f64, n_ideal: usize) -> Self {
        let planner = JumpFootStepPlanner::new(model.clone());
        Self {
            model,
            horizon,
            n_ideal,
            planner,
            flying_time: 0.3,
            min_flying_time: 0.2,
            ground_time: 0.3,
            min_ground_time: 0.2,
            friction_coefficient: 0.7,
            dwell: Vec::new(),
            dwell_offset: 0,
            solver: None,
            state: MpcState::Idle,
            last_update_us: 0,
        }
    }

    /// Set the jump pattern and the phase timing with its dwell minimums.
    pub fn set_jump_pattern(
        &mut self,
        planner: JumpFootStepPlanner,
        flying_time: f64,
        min_flying_time: f64,
        ground_time: f64,
        min_ground_time: f64,
    ) {
        self.planner = planner;
        self.flying_time = flying_time;
        self.min_flying_time = min_flying_time;
        self.ground_time = ground_time;
        self.min_ground_time = min_ground_time;
    }

    /// Set the ground friction coefficient.
    pub fn set_friction_coefficient(&mut self, mu: f64) {
        self.friction_coefficient = mu;
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> MpcState {
        self.state
    }

    /// Wall time of the last per-tick update, in microseconds.
    #[must_use]
    pub const fn last_update_us(&self) -> u64 {
        self.last_update_us
    }

    /// Read view of the current planned trajectory.
    #[must_use]
    pub fn solution(&self) -> Option<&Solution> {
        self.solver.as_ref().map(OcpSolver::solution)
    }

    /// The underlying solver.
    #[must_use]
    pub fn solver(&self) -> Option<&OcpSolver> {
        self.solver.as_ref()
    }

    /// Feedback command for immediate application; always `dimu`-sized
    /// once initialized.
    pub fn control_input(&self) -> Result<DVector<f64>, SolveError> {
        self.solver
            .as_ref()
            .map(OcpSolver::initial_control)
            .ok_or(SolveError::NotInitialized)
    }

    /// Offline initialization solve.
    ///
    /// Builds the ground→flying→ground sequence from the jump pattern at
    /// the measured state, assembles costs and constraints, and runs a
    /// high-iteration solve so the first real-time tick starts from a
    /// good trajectory.
    pub fn init(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
        options: &SolverOptions,
        sto: bool,
    ) -> Result<(), SaltoError> {
        let liftoff = t + self.ground_time;
        let touchdown = liftoff + self.flying_time;

        // Contact sequence: stand, fly, land on the planned points.
        let stance = self.planner.stance_points(q);
        let landing = self.planner.landing_points(q);
        let mut standing = self.model.create_contact_status();
        let all: Vec<usize> = (0..self.model.num_contacts()).collect();
        standing.activate_contacts(&all);
        standing.set_contact_points(&stance);
        let flying = self.model.create_contact_status();
        let mut landed = self.model.create_contact_status();
        landed.activate_contacts(&all);
        landed.set_contact_points(&landing);

        let mut sequence = ContactSequence::new(2);
        sequence.init(&standing);
        sequence.push_back(&flying, liftoff, sto)?;
        sequence.push_back(&landed, touchdown, sto)?;

        // The tail phase cannot satisfy a dwell minimum longer than the
        // horizon leaves for it.
        let tail = self.horizon - self.ground_time - self.flying_time;
        let final_dwell = if tail > self.min_ground_time {
            self.min_ground_time
        } else {
            0.5 * tail
        };
        self.dwell = vec![self.min_ground_time, self.min_flying_time, final_dwell];
        self.dwell_offset = 0;
        let mut sto_constraints = StoConstraints::new(3);
        sto_constraints.set_minimum_dwell_times(&self.dwell)?;

        let cost = self.build_cost(q);
        let constraints = self.build_constraints();

        let mut solver = OcpSolver::new(
            self.model.clone(),
            sequence,
            cost,
            constraints,
            StoCostFunction::new(),
            sto_constraints,
            self.horizon,
            self.n_ideal,
            options.clone(),
        )?;
        solver.init(t, q, v, options, sto)?;
        solver.set_solution_q(q);
        solver.set_solution_v(v);
        let f_seed = Vector3::new(0.0, 0.0, 0.25 * self.model.total_weight());
        solver.set_solution_f(&f_seed);
        solver.init_constraints(t)?;
        solver.solve(t, q, v)?;

        self.solver = Some(solver);
        self.state = MpcState::Initialized;
        self.last_update_us = 0;
        Ok(())
    }

    /// Swap to the per-tick solver options.
    pub fn set_solver_options(&mut self, options: &SolverOptions) -> Result<(), SaltoError> {
        let solver = self
            .solver
            .as_mut()
            .ok_or(SaltoError::Solve(SolveError::NotInitialized))?;
        solver.set_solver_options(options.clone())
    }

    /// Per-tick update: shift the horizon, warm-start re-solve, and
    /// return the feedback command.
    pub fn update(
        &mut self,
        t: f64,
        q: &DVector<f64>,
        v: &DVector<f64>,
    ) -> Result<DVector<f64>, SolveError> {
        let started = Instant::now();
        let solver = self.solver.as_mut().ok_or(SolveError::NotInitialized)?;

        // Drop phases the horizon has consumed.
        let mut popped = false;
        while solver.contact_sequence().num_events() > 0
            && solver
                .contact_sequence()
                .event_time(0)
                .is_ok_and(|te| te <= t)
        {
            solver.contact_sequence_mut().pop_front();
            self.dwell_offset += 1;
            popped = true;
        }
        if popped {
            let remaining = &self.dwell[self.dwell_offset.min(self.dwell.len())..];
            let mut sto_constraints = StoConstraints::new(remaining.len());
            sto_constraints
                .set_minimum_dwell_times(remaining)
                .expect("dwell suffix length matches by construction");
            *solver.sto_constraints_mut() = sto_constraints;
            debug!(dwell_offset = self.dwell_offset, "phase consumed, horizon shifted");
        }

        // While both events remain, refresh the landing placements from
        // the measured state.
        if solver.contact_sequence().num_events() == 2 {
            let landing = self.planner.landing_points(q);
            let last_phase = solver.contact_sequence().num_phases() - 1;
            if let Err(e) = solver
                .contact_sequence_mut()
                .set_contact_points(last_phase, &landing)
            {
                debug!(error = %e, "keeping previous landing placements");
            }
        }

        solver.solve(t, q, v)?;
        let command = solver.initial_control();

        #[allow(clippy::cast_possible_truncation)]
        {
            self.last_update_us = started.elapsed().as_micros() as u64;
        }
        self.state = MpcState::Running;
        Ok(command)
    }

    fn build_cost(&self, q: &DVector<f64>) -> CostFunction {
        let dimv = self.model.dimv();
        let dimu = self.model.dimu();

        // Reference: the measured configuration displaced by the jump.
        let mut q_ref = q.clone();
        for axis in 0..3 {
            q_ref[axis] += self.planner.jump_length()[axis];
        }
        q_ref[5] += self.planner.jump_yaw();

        let mut q_weight = DVector::from_element(dimv, 0.01);
        let mut q_weight_impulse = DVector::from_element(dimv, 0.1);
        for i in 0..6 {
            q_weight[i] = 10.0;
            q_weight_impulse[i] = 100.0;
        }

        let mut config = ConfigurationCost::new(dimv, dimu);
        config.set_q_ref(q_ref);
        config.set_q_weight(q_weight.clone());
        config.set_v_weight(DVector::from_element(dimv, 1.0));
        config.set_u_weight(DVector::from_element(dimu, 1.0e-6));
        config.set_q_weight_terminal(q_weight);
        config.set_v_weight_terminal(DVector::from_element(dimv, 1.0));
        config.set_q_weight_impulse(q_weight_impulse);
        config.set_v_weight_impulse(DVector::from_element(dimv, 1.0));

        let mut cost = CostFunction::new();
        cost.push_back(Box::new(config));

        // Stance-foot tracking stiffness from the contact-stabilization
        // time step (Baumgarte-style, gain ~ 1/dt²).
        let dt = self.model.spec().stabilization_dt;
        let track = 10.0 / (dt * dt);
        for frame in 0..self.model.num_contacts() {
            let mut foot = TaskSpace3dCost::new(self.model.clone(), frame);
            foot.set_weight(Vector3::new(track, track, track));
            cost.push_back(Box::new(foot));
        }
        cost
    }

    fn build_constraints(&self) -> ConstraintSet {
        let limits = self.model.joint_limits();
        let mut constraints = ConstraintSet::new();
        constraints.push_back(Box::new(JointPositionLimits::new(
            limits.position_lower,
            limits.position_upper,
        )));
        constraints.push_back(Box::new(JointVelocityLimits::from_bounds(&limits.velocity)));
        constraints.push_back(Box::new(JointTorqueLimits::from_bounds(&limits.torque)));
        constraints.push_back(Box::new(FrictionCone::new(self.friction_coefficient)));
        constraints
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use salto_robot::{PointFootQuadruped, QuadrupedParams};

    fn quick_options() -> SolverOptions {
        SolverOptions {
            max_iter: 2,
            nthreads: 2,
            ..SolverOptions::default()
        }
    }

    fn jump_mpc() -> (MpcJump, DVector<f64>, DVector<f64>) {
        let robot = Arc::new(PointFootQuadruped::new(QuadrupedParams::default()));
        let q = robot.standing_configuration();
        let v = DVector::zeros(robot.dimv());
        let mut mpc = MpcJump::new(robot.clone(), 0.8, 18);
        let mut planner = JumpFootStepPlanner::new(robot);
        planner.set_jump_pattern(Vector3::new(0.3, 0.0, 0.0), 0.0);
        mpc.set_jump_pattern(planner, 0.3, 0.2, 0.3, 0.2);
        (mpc, q, v)
    }

    #[test]
    fn starts_idle_and_rejects_updates() {
        let (mut mpc, q, v) = jump_mpc();
        assert_eq!(mpc.state(), MpcState::Idle);
        assert!(mpc.solution().is_none());
        let err = mpc.update(0.0, &q, &v).unwrap_err();
        assert_eq!(err, SolveError::NotInitialized);
        assert!(mpc.control_input().is_err());
    }

    #[test]
    fn init_builds_jump_sequence_and_solves() {
        let (mut mpc, q, v) = jump_mpc();
        mpc.init(0.0, &q, &v, &quick_options(), true).unwrap();
        assert_eq!(mpc.state(), MpcState::Initialized);

        let solver = mpc.solver().unwrap();
        let seq = solver.contact_sequence();
        assert_eq!(seq.num_phases(), 3);
        assert_eq!(seq.num_events(), 2);
        assert!((seq.event_time(0).unwrap() - 0.3).abs() < 1e-12);
        assert!((seq.event_time(1).unwrap() - 0.6).abs() < 1e-12);
        // Landing points carry the jump displacement.
        let landed = seq.contact_status(2).unwrap();
        let stance = seq.contact_status(0).unwrap();
        assert!(
            (landed.contact_point(0).x - stance.contact_point(0).x - 0.3).abs() < 1e-9
        );
    }

    #[test]
    fn ticks_return_control_of_model_dimension() {
        let (mut mpc, q, v) = jump_mpc();
        mpc.init(0.0, &q, &v, &quick_options(), true).unwrap();
        mpc.set_solver_options(&SolverOptions::mpc(0.8, 18)).unwrap();

        let dt = 0.0025;
        for tick in 1..=8 {
            let t = f64::from(tick) * dt;
            let u = mpc.update(t, &q, &v).unwrap();
            assert_eq!(u.len(), 12, "tick {tick} returned a wrong-sized command");
        }
        assert_eq!(mpc.state(), MpcState::Running);
        assert!(mpc.last_update_us() > 0);
    }

    #[test]
    fn horizon_shift_consumes_phases() {
        let (mut mpc, q, v) = jump_mpc();
        mpc.init(0.0, &q, &v, &quick_options(), true).unwrap();
        mpc.set_solver_options(&SolverOptions::mpc(0.8, 18)).unwrap();

        // Jump ticks past the liftoff at t = 0.3.
        mpc.update(0.31, &q, &v).unwrap();
        let solver = mpc.solver().unwrap();
        assert_eq!(solver.contact_sequence().num_events(), 1);
        assert_eq!(solver.sto_constraints().num_dwell(), 2);

        // And past the touchdown at t = 0.6.
        mpc.update(0.61, &q, &v).unwrap();
        let solver = mpc.solver().unwrap();
        assert_eq!(solver.contact_sequence().num_events(), 0);
        assert!(
            solver
                .contact_sequence()
                .contact_status(0)
                .unwrap()
                .has_active_contacts()
        );
    }
}
