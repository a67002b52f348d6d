use nalgebra::{DMatrix, DVector};

use salto_contact::ContactStatus;

use crate::constraints::ConstraintTerm;
use crate::point::{EvalPoint, NodeLayout};

/// Rows per active point contact: unilateral normal force plus the four
/// faces of the inner friction pyramid.
const ROWS_PER_CONTACT: usize = 5;

/// Linearized friction cone on every active contact force.
///
/// The cone `‖f_xy‖ ≤ μ f_z` is inner-approximated by the pyramid
/// `|f_x|, |f_y| ≤ (μ/√2) f_z` together with `f_z ≥ 0`, so feasible
/// pyramid forces always satisfy the true cone. Applies to stage forces
/// and to touchdown impulses alike.
pub struct FrictionCone {
    mu: f64,
}

impl FrictionCone {
    /// Cone with friction coefficient `mu`.
    #[must_use]
    pub const fn new(mu: f64) -> Self {
        Self { mu }
    }

    /// Friction coefficient.
    #[must_use]
    pub const fn mu(&self) -> f64 {
        self.mu
    }

    fn mu_pyramid(&self) -> f64 {
        self.mu / std::f64::consts::SQRT_2
    }
}

impl ConstraintTerm for FrictionCone {
    fn dim(&self, _layout: &NodeLayout, status: &ContactStatus) -> usize {
        ROWS_PER_CONTACT * status.num_active()
    }

    fn applies_at_impulse(&self) -> bool {
        true
    }

    fn residual(&self, p: &EvalPoint, out: &mut DVector<f64>) {
        let mu = self.mu_pyramid();
        for (slot, _) in p.status.active_indices().iter().enumerate() {
            let f = &p.f[slot];
            let row = ROWS_PER_CONTACT * slot;
            out[row] = -f.z;
            out[row + 1] = f.x - mu * f.z;
            out[row + 2] = -f.x - mu * f.z;
            out[row + 3] = f.y - mu * f.z;
            out[row + 4] = -f.y - mu * f.z;
        }
    }

    fn jacobian(&self, p: &EvalPoint, out: &mut DMatrix<f64>) {
        let mu = self.mu_pyramid();
        for (slot, _) in p.status.active_indices().iter().enumerate() {
            let row = ROWS_PER_CONTACT * slot;
            let fx = p.force_offset(slot);
            let fy = fx + 1;
            let fz = fx + 2;
            out[(row, fz)] = -1.0;
            out[(row + 1, fx)] = 1.0;
            out[(row + 1, fz)] = -mu;
            out[(row + 2, fx)] = -1.0;
            out[(row + 2, fz)] = -mu;
            out[(row + 3, fy)] = 1.0;
            out[(row + 3, fz)] = -mu;
            out[(row + 4, fy)] = -1.0;
            out[(row + 4, fz)] = -mu;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
