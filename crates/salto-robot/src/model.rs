use nalgebra::{DMatrix, DVector, Vector3};

use salto_contact::{ContactStatus, ImpulseStatus};

// ---------------------------------------------------------------------------
// RobotSpec
// ---------------------------------------------------------------------------

/// Contact type of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactKind {
    /// Point contact: 3 force components.
    Point,
    /// Surface contact: 6 wrench components.
    Surface,
}

/// Model description handed in by the external robot provider.
#[derive(Clone, Debug)]
pub struct RobotSpec {
    /// Names of the contact frames, in index order.
    pub contact_frames: Vec<String>,
    /// Contact type per frame.
    pub contact_kinds: Vec<ContactKind>,
    /// Numerical time step for contact-constraint stabilization; stance
    /// tracking gains are derived from it (Baumgarte-style, gain ~ 1/dt).
    pub stabilization_dt: f64,
}

impl RobotSpec {
    /// Spec with all-point contacts.
    #[must_use]
    pub fn point_contacts(frames: &[&str], stabilization_dt: f64) -> Self {
        Self {
            contact_frames: frames.iter().map(|s| (*s).to_string()).collect(),
            contact_kinds: vec![ContactKind::Point; frames.len()],
            stabilization_dt,
        }
    }
}

// ---------------------------------------------------------------------------
// RobotModel
// ---------------------------------------------------------------------------

/// Jacobians of the velocity derivative with respect to each variable block.
///
/// `df` is sized for the *active* contacts of the status the dynamics were
/// evaluated under (3 columns per active point contact, frame order).
#[derive(Clone, Debug)]
pub struct DynamicsJacobians {
    pub dq: DMatrix<f64>,
    pub dv: DMatrix<f64>,
    pub du: DMatrix<f64>,
    pub df: DMatrix<f64>,
}

/// Actuated-joint limits reported by the model.
#[derive(Clone, Debug)]
pub struct JointLimits {
    pub position_lower: DVector<f64>,
    pub position_upper: DVector<f64>,
    /// Symmetric velocity bound per joint.
    pub velocity: DVector<f64>,
    /// Symmetric torque bound per joint.
    pub torque: DVector<f64>,
}

/// The adapter contract the solver consumes.
///
/// Implementations are immutable after construction and owned exclusively
/// by the solving session; all queries are `&self` and thread-safe so
/// per-node linearization can run on the worker pool.
pub trait RobotModel: Send + Sync {
    /// Configuration dimension.
    fn dimq(&self) -> usize;
    /// Velocity (tangent) dimension.
    fn dimv(&self) -> usize;
    /// Control (actuation) dimension.
    fn dimu(&self) -> usize;
    /// Maximum total contact-force dimension (all contacts active).
    fn max_dimf(&self) -> usize;

    /// The model description.
    fn spec(&self) -> &RobotSpec;

    /// Number of contact frames.
    fn num_contacts(&self) -> usize {
        self.spec().contact_frames.len()
    }

    /// Total weight `m * g` in newtons.
    fn total_weight(&self) -> f64;

    /// Actuated-joint limits.
    fn joint_limits(&self) -> JointLimits;

    /// An all-inactive contact status sized for this model.
    fn create_contact_status(&self) -> ContactStatus {
        ContactStatus::new(self.num_contacts())
    }

    /// World-frame position of a contact frame at configuration `q`.
    fn frame_position(&self, q: &DVector<f64>, contact: usize) -> Vector3<f64>;

    /// Jacobian of [`frame_position`](Self::frame_position) with respect to
    /// the configuration tangent; 3 x `dimv`.
    fn frame_jacobian(&self, q: &DVector<f64>, contact: usize) -> DMatrix<f64>;

    /// Chart update `q ⊞ step * dq`.
    fn integrate(&self, q: &DVector<f64>, dq: &DVector<f64>, step: f64) -> DVector<f64>;

    /// Velocity derivative under controls `u` and contact forces `f`
    /// (one force per active contact of `status`, frame order).
    fn dynamics(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        u: &DVector<f64>,
        f: &[Vector3<f64>],
        status: &ContactStatus,
    ) -> DVector<f64>;

    /// Analytic Jacobians of [`dynamics`](Self::dynamics).
    fn linearize_dynamics(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        u: &DVector<f64>,
        f: &[Vector3<f64>],
        status: &ContactStatus,
    ) -> DynamicsJacobians;

    /// Post-impact velocity `v⁺ = v⁻ + M⁻¹ Jᵀ Λ` under the impulses `lam`
    /// (one per impacting contact of `impulse`, frame order).
    fn impulse_velocity_jump(
        &self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        lam: &[Vector3<f64>],
        impulse: &ImpulseStatus,
    ) -> DVector<f64>;

    /// Jacobian of the post-impact velocity with respect to the stacked
    /// impulses; `dimv` x `dimi`.
    fn impulse_jacobian(&self, q: &DVector<f64>, impulse: &ImpulseStatus) -> DMatrix<f64>;
}
