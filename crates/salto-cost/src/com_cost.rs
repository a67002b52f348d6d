use nalgebra::{DMatrix, DVector, Vector3};

use crate::cost::CostTerm;
use crate::point::EvalPoint;

/// Center-of-mass tracking cost.
///
/// With massless legs the CoM coincides with the base position, so this
/// tracks the first three configuration entries to a fixed reference.
pub struct ComCost {
    com_ref: Vector3<f64>,
    weight: Vector3<f64>,
}

impl ComCost {
    /// Zero-weight cost about the given reference.
    #[must_use]
    pub fn new(com_ref: Vector3<f64>) -> Self {
        Self {
            com_ref,
            weight: Vector3::zeros(),
        }
    }

    /// Set the per-axis weight.
    pub fn set_weight(&mut self, weight: Vector3<f64>) {
        self.weight = weight;
    }

    /// Update the reference (e.g. between MPC re-solves).
    pub fn set_com_ref(&mut self, com_ref: Vector3<f64>) {
        self.com_ref = com_ref;
    }

    fn cost(&self, p: &EvalPoint, scale: f64) -> f64 {
        let mut cost = 0.0;
        for axis in 0..3 {
            let e = p.q[axis] - self.com_ref[axis];
            cost += 0.5 * scale * self.weight[axis] * e * e;
        }
        cost
    }

    fn quadratize(
        &self,
        p: &EvalPoint,
        scale: f64,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        let oq = p.layout.offset_q();
        for axis in 0..3 {
            let e = p.q[axis] - self.com_ref[axis];
            grad[oq + axis] += scale * self.weight[axis] * e;
            hess[(oq + axis, oq + axis)] += scale * self.weight[axis];
        }
    }
}

impl CostTerm for ComCost {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::NodeLayout;
    use approx::assert_relative_eq;
    use salto_contact::ContactStatus;

    #[test]
    fn tracks_base_position() {
        let mut cost = ComCost::new(Vector3::new(0.0, 0.0, 0.3));
        cost.set_weight(Vector3::new(10.0, 10.0, 10.0));

        let mut q = DVector::zeros(18);
        q[2] = 0.5;
        let v = DVector::zeros(18);
        let u = DVector::zeros(12);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(4);
        let layout = NodeLayout::stage(18, 12, 0);
        let p = EvalPoint {
            t: 0.0,
            dt: 0.1,
            q: &q,
            v: &v,
            u: &u,
            f: &f,
            status: &status,
            layout,
        };

        // 0.1 * 0.5 * 10 * 0.2^2
        assert_relative_eq!(cost.stage_cost(&p), 0.02, epsilon = 1e-12);

        let mut grad = DVector::zeros(layout.nz());
        let mut hess = DMatrix::zeros(layout.nz(), layout.nz());
        cost.stage_quadratize(&p, &mut grad, &mut hess);
        assert_relative_eq!(grad[2], 0.1 * 10.0 * 0.2, epsilon = 1e-12);
        assert_relative_eq!(hess[(2, 2)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(grad[0], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn terminal_channel_unscaled() {
        let mut cost = ComCost::new(Vector3::zeros());
        cost.set_weight(Vector3::new(2.0, 2.0, 2.0));
        let mut q = DVector::zeros(18);
        q[0] = 1.0;
        let v = DVector::zeros(18);
        let u = DVector::zeros(0);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(4);
        let p = EvalPoint {
            t: 1.7,
            dt: 0.0,
            q: &q,
            v: &v,
            u: &u,
            f: &f,
            status: &status,
            layout: NodeLayout::terminal(18),
        };
        assert_relative_eq!(cost.terminal_cost(&p), 1.0, epsilon = 1e-12);
    }
}
