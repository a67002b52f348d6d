use nalgebra::{DMatrix, DVector};

use salto_contact::ContactStatus;

use crate::constraints::ConstraintTerm;
use crate::point::{EvalPoint, NodeLayout};

/// Which variable block a box limit acts on.
#[derive(Clone, Copy, Debug)]
enum Block {
    /// Tail of the configuration block (the actuated joints).
    Position,
    /// Tail of the velocity block.
    Velocity,
    /// The whole torque block.
    Torque,
}

/// Shared two-sided box limit `lower ≤ z ≤ upper` on a joint block.
#[derive(Clone, Debug)]
struct BoxLimits {
    lower: DVector<f64>,
    upper: DVector<f64>,
    block: Block,
}

impl BoxLimits {
    fn n(&self) -> usize {
        self.lower.len()
    }

    /// Offset of the constrained entries inside the node vector.
    fn offset(&self, layout: &NodeLayout) -> usize {
        match self.block {
            // Joints sit at the tail of the q/v blocks (after the base).
            Block::Position => layout.offset_q() + layout.dimv - self.n(),
            Block::Velocity => layout.offset_v() + layout.dimv - self.n(),
            Block::Torque => layout.offset_u(),
        }
    }

    fn values<'a>(&self, p: &'a EvalPoint) -> &'a DVector<f64> {
        match self.block {
            Block::Position => p.q,
            Block::Velocity => p.v,
            Block::Torque => p.u,
        }
    }

    /// Index of the first constrained entry inside the source vector.
    fn source_offset(&self, p: &EvalPoint) -> usize {
        match self.block {
            Block::Position | Block::Velocity => p.layout.dimv - self.n(),
            Block::Torque => 0,
        }
    }

    fn residual(&self, p: &EvalPoint, out: &mut DVector<f64>) {
        let n = self.n();
        let values = self.values(p);
        let src = self.source_offset(p);
        for j in 0..n {
            out[j] = values[src + j] - self.upper[j];
            out[n + j] = self.lower[j] - values[src + j];
        }
    }

    fn jacobian(&self, p: &EvalPoint, out: &mut DMatrix<f64>) {
        let n = self.n();
        let offset = self.offset(&p.layout);
        for j in 0..n {
            out[(j, offset + j)] = 1.0;
            out[(n + j, offset + j)] = -1.0;
        }
    }
}

// ---------------------------------------------------------------------------
// Concrete limit terms
// ---------------------------------------------------------------------------

/// Two-sided joint position limits (stage nodes only).
pub struct JointPositionLimits(BoxLimits);

impl JointPositionLimits {
    /// # Panics
    /// Panics if the bound vectors have different lengths.
    #[must_use]
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Self {
        assert_eq!(lower.len(), upper.len(), "bound length mismatch");
        Self(BoxLimits {
            lower,
            upper,
            block: Block::Position,
        })
    }
}

impl ConstraintTerm for JointPositionLimits {
    fn dim(&self, _layout: &NodeLayout, _status: &ContactStatus) -> usize {
        2 * self.0.n()
    }
    fn residual(&self, p: &EvalPoint, out: &mut DVector<f64>) {
        self.0.residual(p, out);
    }
    fn jacobian(&self, p: &EvalPoint, out: &mut DMatrix<f64>) {
        self.0.jacobian(p, out);
    }
}

/// Symmetric joint velocity limits (stage nodes only).
pub struct JointVelocityLimits(BoxLimits);

impl JointVelocityLimits {
    /// Symmetric bound `|v| ≤ limit` on `n_joints` joints.
    #[must_use]
    pub fn symmetric(n_joints: usize, limit: f64) -> Self {
        Self(BoxLimits {
            lower: DVector::from_element(n_joints, -limit),
            upper: DVector::from_element(n_joints, limit),
            block: Block::Velocity,
        })
    }

    /// Per-joint symmetric bounds `|v_j| ≤ limits_j`.
    #[must_use]
    pub fn from_bounds(limits: &DVector<f64>) -> Self {
        Self(BoxLimits {
            lower: -limits,
            upper: limits.clone(),
            block: Block::Velocity,
        })
    }
}

impl ConstraintTerm for JointVelocityLimits {
    fn dim(&self, _layout: &NodeLayout, _status: &ContactStatus) -> usize {
        2 * self.0.n()
    }
    fn residual(&self, p: &EvalPoint, out: &mut DVector<f64>) {
        self.0.residual(p, out);
    }
    fn jacobian(&self, p: &EvalPoint, out: &mut DMatrix<f64>) {
        self.0.jacobian(p, out);
    }
}

/// Symmetric joint torque limits (stage nodes only; impulse nodes carry no
/// torques).
pub struct JointTorqueLimits(BoxLimits);

impl JointTorqueLimits {
    /// Symmetric bound `|u| ≤ limit` on `dimu` torques.
    #[must_use]
    pub fn symmetric(dimu: usize, limit: f64) -> Self {
        Self(BoxLimits {
            lower: DVector::from_element(dimu, -limit),
            upper: DVector::from_element(dimu, limit),
            block: Block::Torque,
        })
    }

    /// Per-joint symmetric bounds `|u_j| ≤ limits_j`.
    #[must_use]
    pub fn from_bounds(limits: &DVector<f64>) -> Self {
        Self(BoxLimits {
            lower: -limits,
            upper: limits.clone(),
            block: Block::Torque,
        })
    }
}

impl ConstraintTerm for JointTorqueLimits {
    fn dim(&self, _layout: &NodeLayout, _status: &ContactStatus) -> usize {
        2 * self.0.n()
    }
    fn residual(&self, p: &EvalPoint, out: &mut DVector<f64>) {
        self.0.residual(p, out);
    }
    fn jacobian(&self, p: &EvalPoint, out: &mut DMatrix<f64>) {
        self.0.jacobian(p, out);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
