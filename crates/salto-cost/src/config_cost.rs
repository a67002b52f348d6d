use nalgebra::{DMatrix, DVector};

use crate::cost::CostTerm;
use crate::point::EvalPoint;

/// Configuration-space tracking cost.
///
/// Weighted quadratic tracking of a reference configuration and velocity,
/// with independent weight vectors per channel (stage / terminal / impulse)
/// plus a torque-effort weight on the stage channel. Unset references
/// default to zero; unset weights contribute nothing.
pub struct ConfigurationCost {
    dimv: usize,
    dimu: usize,
    q_ref: DVector<f64>,
    v_ref: DVector<f64>,
    q_weight: DVector<f64>,
    v_weight: DVector<f64>,
    u_weight: DVector<f64>,
    q_weight_terminal: DVector<f64>,
    v_weight_terminal: DVector<f64>,
    q_weight_impulse: DVector<f64>,
    v_weight_impulse: DVector<f64>,
}

impl ConfigurationCost {
    /// Zero-weight cost for a model with the given dimensions.
    #[must_use]
    pub fn new(dimv: usize, dimu: usize) -> Self {
        Self {
            dimv,
            dimu,
            q_ref: DVector::zeros(dimv),
            v_ref: DVector::zeros(dimv),
            q_weight: DVector::zeros(dimv),
            v_weight: DVector::zeros(dimv),
            u_weight: DVector::zeros(dimu),
            q_weight_terminal: DVector::zeros(dimv),
            v_weight_terminal: DVector::zeros(dimv),
            q_weight_impulse: DVector::zeros(dimv),
            v_weight_impulse: DVector::zeros(dimv),
        }
    }

    pub fn set_q_ref(&mut self, q_ref: DVector<f64>) {
        assert_eq!(q_ref.len(), self.dimv);
        self.q_ref = q_ref;
    }

    pub fn set_v_ref(&mut self, v_ref: DVector<f64>) {
        assert_eq!(v_ref.len(), self.dimv);
        self.v_ref = v_ref;
    }

    pub fn set_q_weight(&mut self, w: DVector<f64>) {
        assert_eq!(w.len(), self.dimv);
        self.q_weight = w;
    }

    pub fn set_v_weight(&mut self, w: DVector<f64>) {
        assert_eq!(w.len(), self.dimv);
        self.v_weight = w;
    }

    pub fn set_u_weight(&mut self, w: DVector<f64>) {
        assert_eq!(w.len(), self.dimu);
        self.u_weight = w;
    }

    pub fn set_q_weight_terminal(&mut self, w: DVector<f64>) {
        assert_eq!(w.len(), self.dimv);
        self.q_weight_terminal = w;
    }

    pub fn set_v_weight_terminal(&mut self, w: DVector<f64>) {
        assert_eq!(w.len(), self.dimv);
        self.v_weight_terminal = w;
    }

    pub fn set_q_weight_impulse(&mut self, w: DVector<f64>) {
        assert_eq!(w.len(), self.dimv);
        self.q_weight_impulse = w;
    }

    pub fn set_v_weight_impulse(&mut self, w: DVector<f64>) {
        assert_eq!(w.len(), self.dimv);
        self.v_weight_impulse = w;
    }

    fn weighted_cost(
        p: &EvalPoint,
        qw: &DVector<f64>,
        vw: &DVector<f64>,
        q_ref: &DVector<f64>,
        v_ref: &DVector<f64>,
    ) -> f64 {
        let mut cost = 0.0;
        for i in 0..q_ref.len() {
            let eq = p.q[i] - q_ref[i];
            let ev = p.v[i] - v_ref[i];
            cost += 0.5 * (qw[i] * eq * eq + vw[i] * ev * ev);
        }
        cost
    }

    fn weighted_quadratize(
        &self,
        p: &EvalPoint,
        scale: f64,
        qw: &DVector<f64>,
        vw: &DVector<f64>,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        let oq = p.layout.offset_q();
        let ov = p.layout.offset_v();
        for i in 0..self.dimv {
            grad[oq + i] += scale * qw[i] * (p.q[i] - self.q_ref[i]);
            grad[ov + i] += scale * vw[i] * (p.v[i] - self.v_ref[i]);
            hess[(oq + i, oq + i)] += scale * qw[i];
            hess[(ov + i, ov + i)] += scale * vw[i];
        }
    }
}

impl CostTerm for ConfigurationCost {
    fn stage_cost(&self, p: &EvalPoint) -> f64 {
        let mut cost =
            Self::weighted_cost(p, &self.q_weight, &self.v_weight, &self.q_ref, &self.v_ref);
        for j in 0..self.dimu.min(p.u.len()) {
            cost += 0.5 * self.u_weight[j] * p.u[j] * p.u[j];
        }
        p.dt * cost
    }

    fn stage_quadratize(&self, p: &EvalPoint, grad: &mut DVector<f64>, hess: &mut DMatrix<f64>) {
        self.weighted_quadratize(p, p.dt, &self.q_weight, &self.v_weight, grad, hess);
        let ou = p.layout.offset_u();
        for j in 0..self.dimu.min(p.u.len()) {
            grad[ou + j] += p.dt * self.u_weight[j] * p.u[j];
            hess[(ou + j, ou + j)] += p.dt * self.u_weight[j];
        }
    }

    fn terminal_cost(&self, p: &EvalPoint) -> f64 {
        Self::weighted_cost(
            p,
            &self.q_weight_terminal,
            &self.v_weight_terminal,
            &self.q_ref,
            &self.v_ref,
        )
    }

    fn terminal_quadratize(
        &self,
        p: &EvalPoint,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        self.weighted_quadratize(
            p,
            1.0,
            &self.q_weight_terminal,
            &self.v_weight_terminal,
            grad,
            hess,
        );
    }

    fn impulse_cost(&self, p: &EvalPoint) -> f64 {
        Self::weighted_cost(
            p,
            &self.q_weight_impulse,
            &self.v_weight_impulse,
            &self.q_ref,
            &self.v_ref,
        )
    }

    fn impulse_quadratize(&self, p: &EvalPoint, grad: &mut DVector<f64>, hess: &mut DMatrix<f64>) {
        self.weighted_quadratize(
            p,
            1.0,
            &self.q_weight_impulse,
            &self.v_weight_impulse,
            grad,
            hess,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::NodeLayout;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use salto_contact::ContactStatus;

    fn make_cost() -> ConfigurationCost {
        let mut cost = ConfigurationCost::new(4, 2);
        cost.set_q_ref(DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0]));
        cost.set_q_weight(DVector::from_element(4, 2.0));
        cost.set_v_weight(DVector::from_element(4, 1.0));
        cost.set_u_weight(DVector::from_element(2, 0.5));
        cost.set_q_weight_terminal(DVector::from_element(4, 10.0));
        cost.set_v_weight_terminal(DVector::from_element(4, 10.0));
        cost
    }

    #[test]
    fn stage_cost_value() {
        let cost = make_cost();
        let q = DVector::from_vec(vec![2.0, 0.0, 0.0, 0.0]);
        let v = DVector::zeros(4);
        let u = DVector::from_vec(vec![1.0, -1.0]);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = EvalPoint {
            t: 0.0,
            dt: 0.1,
            q: &q,
            v: &v,
            u: &u,
            f: &f,
            status: &status,
            layout: NodeLayout::stage(4, 2, 0),
        };
        // dt * (0.5 * 2 * 1^2 + 0.5 * 0.5 * (1 + 1)) = 0.1 * 1.5
        assert_relative_eq!(cost.stage_cost(&p), 0.15, epsilon = 1e-12);
    }

    #[test]
    fn stage_gradient_matches_finite_differences() {
        let cost = make_cost();
        let q = DVector::from_vec(vec![0.3, -0.2, 0.5, 0.0]);
        let v = DVector::from_vec(vec![0.1, 0.0, -0.4, 0.2]);
        let u = DVector::from_vec(vec![0.7, -0.3]);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let layout = NodeLayout::stage(4, 2, 0);
        let p = EvalPoint {
            t: 0.0,
            dt: 0.05,
            q: &q,
            v: &v,
            u: &u,
            f: &f,
            status: &status,
            layout,
        };

        let mut grad = DVector::zeros(layout.nz());
        let mut hess = DMatrix::zeros(layout.nz(), layout.nz());
        cost.stage_quadratize(&p, &mut grad, &mut hess);

        let h = 1e-7;
        let base = cost.stage_cost(&p);
        // q block
        for i in 0..4 {
            let mut qp = q.clone();
            qp[i] += h;
            let pp = EvalPoint { q: &qp, ..p };
            assert_relative_eq!(grad[i], (cost.stage_cost(&pp) - base) / h, epsilon = 1e-6);
        }
        // u block
        for j in 0..2 {
            let mut up = u.clone();
            up[j] += h;
            let pp = EvalPoint { u: &up, ..p };
            assert_relative_eq!(
                grad[layout.offset_u() + j],
                (cost.stage_cost(&pp) - base) / h,
                epsilon = 1e-6
            );
        }
        // Hessian diagonal is the weights scaled by dt.
        assert_relative_eq!(hess[(0, 0)], 0.05 * 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            hess[(layout.offset_u(), layout.offset_u())],
            0.05 * 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn terminal_channel_uses_terminal_weights() {
        let cost = make_cost();
        let q = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0]);
        let v = DVector::zeros(4);
        let u = DVector::zeros(0);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = EvalPoint {
            t: 1.7,
            dt: 0.0,
            q: &q,
            v: &v,
            u: &u,
            f: &f,
            status: &status,
            layout: NodeLayout::terminal(4),
        };
        // 0.5 * 10 * 1^2 from the q_ref offset on index 0.
        assert_relative_eq!(cost.terminal_cost(&p), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn impulse_channel_zero_by_default() {
        let cost = make_cost();
        let q = DVector::from_vec(vec![5.0, 5.0, 5.0, 5.0]);
        let v = DVector::from_element(4, 3.0);
        let u = DVector::zeros(0);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = EvalPoint {
            t: 0.9,
            dt: 0.0,
            q: &q,
            v: &v,
            u: &u,
            f: &f,
            status: &status,
            layout: NodeLayout::impulse(4, 0),
        };
        assert_relative_eq!(cost.impulse_cost(&p), 0.0, epsilon = 1e-12);
    }
}
