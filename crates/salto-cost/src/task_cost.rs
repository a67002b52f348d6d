use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector3};

use salto_robot::RobotModel;

use crate::cost::CostTerm;
use crate::point::EvalPoint;

/// Task-space tracking of a contact frame to its contact point.
///
/// While the frame's contact is active, pulls the forward-kinematics foot
/// position towards the contact point recorded in the phase's status. This
/// is what ties the kinematic chain to the contact placements in the
/// kinodynamic formulation; a stiff weight stands in for a hard holonomic
/// constraint. Inactive (swing) phases contribute nothing.
pub struct TaskSpace3dCost {
    model: Arc<dyn RobotModel>,
    frame: usize,
    weight: Vector3<f64>,
}

impl TaskSpace3dCost {
    /// Zero-weight tracking cost for one contact frame.
    #[must_use]
    pub fn new(model: Arc<dyn RobotModel>, frame: usize) -> Self {
        Self {
            model,
            frame,
            weight: Vector3::zeros(),
        }
    }

    /// Set the per-axis tracking weight.
    pub fn set_weight(&mut self, weight: Vector3<f64>) {
        self.weight = weight;
    }

    fn error(&self, p: &EvalPoint) -> Option<Vector3<f64>> {
        if !p.status.is_active(self.frame) {
            return None;
        }
        let foot = self.model.frame_position(p.q, self.frame);
        Some(foot - p.status.contact_point(self.frame))
    }

    fn cost(&self, p: &EvalPoint, scale: f64) -> f64 {
        self.error(p).map_or(0.0, |e| {
            0.5 * scale * (self.weight.x * e.x * e.x + self.weight.y * e.y * e.y + self.weight.z * e.z * e.z)
        })
    }

    fn quadratize(
        &self,
        p: &EvalPoint,
        scale: f64,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        let Some(e) = self.error(p) else {
            return;
        };
        let jac = self.model.frame_jacobian(p.q, self.frame);
        let weighted = Vector3::new(
            self.weight.x * e.x,
            self.weight.y * e.y,
            self.weight.z * e.z,
        );
        let oq = p.layout.offset_q();
        let dimv = p.layout.dimv;
        // grad_q += scale * Jᵀ (w ⊙ e); hess_qq += scale * Jᵀ diag(w) J.
        for col in 0..dimv {
            let j_col = jac.column(col);
            grad[oq + col] += scale * j_col.dot(&weighted);
            for col2 in 0..dimv {
                let j_col2 = jac.column(col2);
                let mut acc = 0.0;
                for axis in 0..3 {
                    acc += j_col[axis] * self.weight[axis] * j_col2[axis];
                }
                hess[(oq + col, oq + col2)] += scale * acc;
            }
        }
    }
}

impl CostTerm for TaskSpace3dCost {
    fn stage_cost(&self, p: &EvalPoint) -> f64 {
        self.cost(p, p.dt)
    }

    fn stage_quadratize(&self, p: &EvalPoint, grad: &mut DVector<f64>, hess: &mut DMatrix<f64>) {
        self.quadratize(p, p.dt, grad, hess);
    }

    fn terminal_cost(&self, p: &EvalPoint) -> f64 {
        self.cost(p, 1.0)
    }

    fn terminal_quadratize(
        &self,
        p: &EvalPoint,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        self.quadratize(p, 1.0, grad, hess);
    }

    fn impulse_cost(&self, p: &EvalPoint) -> f64 {
        self.cost(p, 1.0)
    }

    fn impulse_quadratize(&self, p: &EvalPoint, grad: &mut DVector<f64>, hess: &mut DMatrix<f64>) {
        self.quadratize(p, 1.0, grad, hess);
    }
}
