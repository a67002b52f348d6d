use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use salto_contact::{ContactStatus, ImpulseStatus};

use crate::model::{DynamicsJacobians, JointLimits, RobotModel, RobotSpec};

// ---------------------------------------------------------------------------
// QuadrupedParams
// ---------------------------------------------------------------------------

/// Physical parameters of the built-in point-foot quadruped.
///
/// Defaults follow the Unitree A1: 3-dof legs (hip roll, hip pitch, knee),
/// 0.2 m thigh and calf links, 0.3181 m standing height.
#[derive(Clone, Debug)]
pub struct QuadrupedParams {
    /// Total mass in kg.
    pub mass: f64,
    /// Body-frame inertia about the CoM (composite body + legs).
    pub inertia: Matrix3<f64>,
    /// Gravitational acceleration magnitude (positive).
    pub gravity: f64,
    /// Hip positions in the body frame, order FL, RL, FR, RR.
    pub hip_offsets: [Vector3<f64>; 4],
    /// Lateral hip (abduction) offset, signed per leg side.
    pub hip_length: f64,
    /// Thigh link length.
    pub thigh_length: f64,
    /// Calf link length.
    pub calf_length: f64,
    /// Reflected rotor inertia per joint.
    pub rotor_inertia: f64,
    /// Viscous joint damping.
    pub joint_damping: f64,
    /// Joint position limits (lower, upper) per leg joint (roll, pitch, knee).
    pub joint_position_limits: [(f64, f64); 3],
    /// Symmetric joint velocity limit in rad/s.
    pub joint_velocity_limit: f64,
    /// Symmetric joint torque limit in N·m.
    pub joint_torque_limit: f64,
    /// Contact-constraint stabilization time step.
    pub stabilization_dt: f64,
}

impl Default for QuadrupedParams {
    fn default() -> Self {
        Self {
            mass: 12.45,
            inertia: Matrix3::from_diagonal(&Vector3::new(0.0792, 0.2085, 0.2265)),
            gravity: 9.81,
            hip_offsets: [
                Vector3::new(0.183, 0.047, 0.0),
                Vector3::new(-0.183, 0.047, 0.0),
                Vector3::new(0.183, -0.047, 0.0),
                Vector3::new(-0.183, -0.047, 0.0),
            ],
            hip_length: 0.08505,
            thigh_length: 0.2,
            calf_length: 0.2,
            rotor_inertia: 0.033,
            joint_damping: 0.01,
            joint_position_limits: [(-0.80, 0.80), (-1.05, 4.19), (-2.70, -0.92)],
            joint_velocity_limit: 21.0,
            joint_torque_limit: 33.5,
            stabilization_dt: 0.05,
        }
    }
}

// ---------------------------------------------------------------------------
// PointFootQuadruped
// ---------------------------------------------------------------------------

/// Floating-base quadruped with massless 3-dof legs.
///
/// State chart: `q = [p(3), rpy(3), 12 joint angles]`, `v = q̇` (dimq =
/// dimv = 18). Base translation/rotation is unactuated and driven by the
/// contact forces acting at the sequence's contact points (single rigid
/// body with yaw-rotated inertia); joints are torque-actuated with
/// reflected rotor inertia. Foot positions come from analytic leg forward
/// kinematics, so stance feet can be tracked to their contact points.
#[derive(Clone, Debug)]
pub struct PointFootQuadruped {
    params: QuadrupedParams,
    spec: RobotSpec,
}

const DIMQ: usize = 18;
const DIMV: usize = 18;
const DIMU: usize = 12;
const NUM_FEET: usize = 4;

/// Skew-symmetric cross-product matrix of `v`.
fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

fn rot_x(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

fn rot_y(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

fn rot_z(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

fn drot_x(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(0.0, 0.0, 0.0, 0.0, -s, -c, 0.0, c, -s)
}

fn drot_y(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(-s, 0.0, c, 0.0, 0.0, 0.0, -c, 0.0, -s)
}

fn drot_z(a: f64) -> Matrix3<f64> {
    let (s, c) = a.sin_cos();
    Matrix3::new(-s, -c, 0.0, c, -s, 0.0, 0.0, 0.0, 0.0)
}

impl PointFootQuadruped {
    /// Build a quadruped with the given parameters.
    #[must_use]
    pub fn new(params: QuadrupedParams) -> Self {
        let spec = RobotSpec::point_contacts(
            &["FL_foot", "RL_foot", "FR_foot", "RR_foot"],
            params.stabilization_dt,
        );
        Self { params, spec }
    }

    /// The physical parameters.
    #[must_use]
    pub const fn params(&self) -> &QuadrupedParams {
        &self.params
    }

    /// Nominal standing configuration: 0.3181 m height, legs at
    /// (0, 0.67, -1.3).
    #[must_use]
    pub fn standing_configuration(&self) -> DVector<f64> {
        let mut q = DVector::zeros(DIMQ);
        q[2] = 0.3181;
        for leg in 0..NUM_FEET {
            q[6 + 3 * leg] = 0.0;
            q[6 + 3 * leg + 1] = 0.67;
            q[6 + 3 * leg + 2] = -1.3;
        }
        q
    }

    /// Sign of the abduction offset for a leg (left legs +, right legs −).
    fn side_sign(leg: usize) -> f64 {
        if leg < 2 { 1.0 } else { -1.0 }
    }

    /// Base rotation matrix `Rz(yaw) Ry(pitch) Rx(roll)`.
    fn base_rotation(q: &DVector<f64>) -> Matrix3<f64> {
        rot_z(q[5]) * rot_y(q[4]) * rot_x(q[3])
    }

    /// World-frame inertia: yaw-only rotation of the body inertia, the
    /// standard small roll/pitch approximation for legged MPC.
    fn world_inertia(&self, q: &DVector<f64>) -> Matrix3<f64> {
        let rz = rot_z(q[5]);
        rz * self.params.inertia * rz.transpose()
    }

    /// Foot position in the hip frame from the leg joint angles.
    fn leg_forward_kinematics(&self, leg: usize, theta: &[f64; 3]) -> Vector3<f64> {
        let p = &self.params;
        let s12 = (theta[1] + theta[2]).sin();
        let c12 = (theta[1] + theta[2]).cos();
        let local = Vector3::new(
            -p.thigh_length * theta[1].sin() - p.calf_length * s12,
            Self::side_sign(leg) * p.hip_length,
            -p.thigh_length * theta[1].cos() - p.calf_length * c12,
        );
        rot_x(theta[0]) * local
    }

    fn leg_joint_angles(q: &DVector<f64>, leg: usize) -> [f64; 3] {
        [q[6 + 3 * leg], q[6 + 3 * leg + 1], q[6 + 3 * leg + 2]]
    }

    /// Net force/torque Jacobian pattern shared by stage forces and
    /// impulses: columns `[I/m ; I_w⁻¹ [c_i − p]×]` per active contact.
    fn force_jacobian(&self, q: &DVector<f64>, status: &ContactStatus) -> DMatrix<f64> {
        let inv_iw = self
            .world_inertia(q)
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros);
        let p = Vector3::new(q[0], q[1], q[2]);
        let active = status.active_indices();
        let mut jac = DMatrix::zeros(DIMV, 3 * active.len());
        for (slot, &contact) in active.iter().enumerate() {
            let arm = status.contact_point(contact) - p;
            let lin = Matrix3::identity() / self.params.mass;
            jac.view_mut((0, 3 * slot), (3, 3)).copy_from(&lin);
            let ang = inv_iw * skew(&arm);
            jac.view_mut((3, 3 * slot), (3, 3)).copy_from(&ang);
        }
        jac
    }
}

impl RobotModel for PointFootQuadruped {
    fn dimq(&self) -> usize {
        DIMQ
    }

    fn dimv(&self) -> usize {
        DIMV
    }

    fn dimu(&self) -> usize {
        DIMU
    }

    fn max_dimf(&self) -> usize {
        3 * NUM_FEET
    }

    fn spec(&self) -> &RobotSpec {
        &self.spec
    }

    fn total_weight(&self) -> f64 {
        self.params.mass * self.params.gravity
    }

    fn joint_limits(&self) -> JointLimits {
        let p = &self.params;
        let mut lower = DVector::zeros(DIMU);
        let mut upper = DVector::zeros(DIMU);
        for leg in 0..NUM_FEET {
            for j in 0..3 {
                lower[3 * leg + j] = p.joint_position_limits[j].0;
                upper[3 * leg + j] = p.joint_position_limits[j].1;
            }
        }
        JointLimits {
            position_lower: lower,
            position_upper: upper,
            velocity: DVector::from_element(DIMU, p.joint_velocity_limit),
            torque: DVector::from_element(DIMU, p.joint_torque_limit),
        }
    }

    fn frame_position(&self, q: &DVector<f64>, contact: usize) -> Vector3<f64> {
        let base = Vector3::new(q[0], q[1], q[2]);
        let rot = Self::base_rotation(q);
        let theta = Self::leg_joint_angles(q, contact);
        base + rot * (self.params.hip_offsets[contact] + self.leg_forward_kinematics(contact, &theta))
    }

    fn frame_jacobian(&self, q: &DVector<f64>, contact: usize) -> DMatrix<f64> {
        let p = &self.params;
        let theta = Self::leg_joint_angles(q, contact);
        let (roll, pitch, yaw) = (q[3], q[4], q[5]);
        let rot = Self::base_rotation(q);
        let body_point = p.hip_offsets[contact] + self.leg_forward_kinematics(contact, &theta);

        let mut jac = DMatrix::zeros(3, DIMV);
        // Base translation.
        jac.view_mut((0, 0), (3, 3)).copy_from(&Matrix3::identity());
        // Base orientation: column-wise derivative of R(rpy) * body_point.
        let d_roll = rot_z(yaw) * rot_y(pitch) * drot_x(roll) * body_point;
        let d_pitch = rot_z(yaw) * drot_y(pitch) * rot_x(roll) * body_point;
        let d_yaw = drot_z(yaw) * rot_y(pitch) * rot_x(roll) * body_point;
        jac.view_mut((0, 3), (3, 1)).copy_from(&d_roll);
        jac.view_mut((0, 4), (3, 1)).copy_from(&d_pitch);
        jac.view_mut((0, 5), (3, 1)).copy_from(&d_yaw);

        // Leg joints.
        let s1 = theta[1].sin();
        let c1 = theta[1].cos();
        let s12 = (theta[1] + theta[2]).sin();
        let c12 = (theta[1] + theta[2]).cos();
        let local = Vector3::new(
            -p.thigh_length * s1 - p.calf_length * s12,
            Self::side_sign(contact) * p.hip_length,
            -p.thigh_length * c1 - p.calf_length * c12,
        );
        let d_theta0 = drot_x(theta[0]) * local;
        let d_theta1 = rot_x(theta[0])
            * Vector3::new(
                -p.thigh_length * c1 - p.calf_length * c12,
                0.0,
                p.thigh_length * s1 + p.calf_length * s12,
            );
        let d_theta2 = rot_x(theta[0])
            * Vector3::new(-p.calf_length * c12, 0.0, p.calf_length * s12);

        let col = 6 + 3 * contact;
        jac.view_mut((0, col), (3, 1)).copy_from(&(rot * d_theta0));
        jac.view_mut((0, col + 1), (3, 1)).copy_from(&(rot * d_theta1));
        jac.view_mut((0, col + 2), (3, 1)).copy_from(&(rot * d_theta2));
        jac
    }

    fn integrate(&self, q: &DVector<f64>, dq: &DVector<f64>, step: f64) -> DVector<f64> {
        q + step * dq
    }

    fn dynamics(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        u: &DVector<f64>,
        f: &[Vector3<f64>],
        status: &ContactStatus,
    ) -> DVector<f64> {
        let p = &self.params;
        let base = Vector3::new(q[0], q[1], q[2]);
        let mut net_force = Vector3::new(0.0, 0.0, -p.mass * p.gravity);
        let mut net_torque = Vector3::zeros();
        for (slot, &contact) in status.active_indices().iter().enumerate() {
            net_force += f[slot];
            net_torque += (status.contact_point(contact) - base).cross(&f[slot]);
        }
        let inv_iw = self
            .world_inertia(q)
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros);

        let mut vdot = DVector::zeros(DIMV);
        vdot.rows_mut(0, 3).copy_from(&(net_force / p.mass));
        vdot.rows_mut(3, 3).copy_from(&(inv_iw * net_torque));
        for j in 0..DIMU {
            vdot[6 + j] = (u[j] - p.joint_damping * v[6 + j]) / p.rotor_inertia;
        }
        vdot
    }

    fn linearize_dynamics(
        &self,
        q: &DVector<f64>,
        _v: &DVector<f64>,
        _u: &DVector<f64>,
        f: &[Vector3<f64>],
        status: &ContactStatus,
    ) -> DynamicsJacobians {
        let p = &self.params;
        let inv_iw = self
            .world_inertia(q)
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros);

        // The yaw dependence of the rotated inertia is neglected in the
        // linearization (Gauss-Newton model).
        let mut dq_jac = DMatrix::zeros(DIMV, DIMV);
        let mut force_skew_sum = Matrix3::zeros();
        for (slot, _) in status.active_indices().iter().enumerate() {
            force_skew_sum += skew(&f[slot]);
        }
        dq_jac
            .view_mut((3, 0), (3, 3))
            .copy_from(&(inv_iw * force_skew_sum));

        let mut dv_jac = DMatrix::zeros(DIMV, DIMV);
        let mut du_jac = DMatrix::zeros(DIMV, DIMU);
        for j in 0..DIMU {
            dv_jac[(6 + j, 6 + j)] = -p.joint_damping / p.rotor_inertia;
            du_jac[(6 + j, j)] = 1.0 / p.rotor_inertia;
        }

        DynamicsJacobians {
            dq: dq_jac,
            dv: dv_jac,
            du: du_jac,
            df: self.force_jacobian(q, status),
        }
    }

    fn impulse_velocity_jump(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        lam: &[Vector3<f64>],
        impulse: &ImpulseStatus,
    ) -> DVector<f64> {
        let p = &self.params;
        let status = impulse.as_contact_status();
        let base = Vector3::new(q[0], q[1], q[2]);
        let mut net_impulse = Vector3::zeros();
        let mut net_angular = Vector3::zeros();
        for (slot, &contact) in status.active_indices().iter().enumerate() {
            net_impulse += lam[slot];
            net_angular += (status.contact_point(contact) - base).cross(&lam[slot]);
        }
        let inv_iw = self
            .world_inertia(q)
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros);

        let mut v_plus = v.clone();
        let dv_lin = net_impulse / p.mass;
        let dv_ang = inv_iw * net_angular;
        for i in 0..3 {
            v_plus[i] += dv_lin[i];
            v_plus[3 + i] += dv_ang[i];
        }
        v_plus
    }

    fn impulse_jacobian(&self, q: &DVector<f64>, impulse: &ImpulseStatus) -> DMatrix<f64> {
        self.force_jacobian(q, impulse.as_contact_status())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
