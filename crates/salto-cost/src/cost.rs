use nalgebra::{DMatrix, DVector};

use crate::point::EvalPoint;

/// A single cost term with a uniform evaluate/sensitivity contract.
///
/// Terms contribute through three channels: stage (integrated over the node
/// interval), terminal, and impulse. The quadratize methods *accumulate*
/// the Gauss-Newton gradient and Hessian into buffers sized by the point's
/// [`NodeLayout`](crate::NodeLayout); the default terminal/impulse
/// implementations contribute nothing.
pub trait CostTerm: Send + Sync {
    /// Stage cost, already scaled by the node interval `p.dt`.
    fn stage_cost(&self, p: &EvalPoint) -> f64;

    /// Accumulate the stage gradient and Gauss-Newton Hessian.
    fn stage_quadratize(&self, p: &EvalPoint, grad: &mut DVector<f64>, hess: &mut DMatrix<f64>);

    /// Terminal cost.
    fn terminal_cost(&self, _p: &EvalPoint) -> f64 {
        0.0
    }

    /// Accumulate the terminal gradient and Hessian.
    fn terminal_quadratize(
        &self,
        _p: &EvalPoint,
        _grad: &mut DVector<f64>,
        _hess: &mut DMatrix<f64>,
    ) {
    }

    /// Impulse cost at a touchdown event.
    fn impulse_cost(&self, _p: &EvalPoint) -> f64 {
        0.0
    }

    /// Accumulate the impulse gradient and Hessian.
    fn impulse_quadratize(
        &self,
        _p: &EvalPoint,
        _grad: &mut DVector<f64>,
        _hess: &mut DMatrix<f64>,
    ) {
    }
}

/// Composable collection of weighted cost terms.
///
/// Terms are evaluated independently and summed; insertion order has no
/// effect on the result.
#[derive(Default)]
pub struct CostFunction {
    terms: Vec<Box<dyn CostTerm>>,
}

impl CostFunction {
    /// Empty cost function.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a term.
    pub fn push_back(&mut self, term: Box<dyn CostTerm>) {
        self.terms.push(term);
    }

    /// Number of registered terms.
    #[must_use]
    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    /// Total stage cost at `p`.
    #[must_use]
    pub fn stage_cost(&self, p: &EvalPoint) -> f64 {
        self.terms.iter().map(|term| term.stage_cost(p)).sum()
    }

    /// Total terminal cost at `p`.
    #[must_use]
    pub fn terminal_cost(&self, p: &EvalPoint) -> f64 {
        self.terms.iter().map(|term| term.terminal_cost(p)).sum()
    }

    /// Total impulse cost at `p`.
    #[must_use]
    pub fn impulse_cost(&self, p: &EvalPoint) -> f64 {
        self.terms.iter().map(|term| term.impulse_cost(p)).sum()
    }

    /// Accumulate all stage sensitivities into `grad`/`hess`.
    pub fn stage_quadratize(
        &self,
        p: &EvalPoint,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        for term in &self.terms {
            term.stage_quadratize(p, grad, hess);
        }
    }

    /// Accumulate all terminal sensitivities.
    pub fn terminal_quadratize(
        &self,
        p: &EvalPoint,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        for term in &self.terms {
            term.terminal_quadratize(p, grad, hess);
        }
    }

    /// Accumulate all impulse sensitivities.
    pub fn impulse_quadratize(
        &self,
        p: &EvalPoint,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        for term in &self.terms {
            term.impulse_quadratize(p, grad, hess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::NodeLayout;
    use nalgebra::Vector3;
    use salto_contact::ContactStatus;

    struct ConstantCost(f64);

    impl CostTerm for ConstantCost {
        fn stage_cost(&self, p: &EvalPoint) -> f64 {
            self.0 * p.dt
        }
        fn stage_quadratize(
            &self,
            _p: &EvalPoint,
            grad: &mut DVector<f64>,
            _hess: &mut DMatrix<f64>,
        ) {
            grad[0] += self.0;
        }
        fn terminal_cost(&self, _p: &EvalPoint) -> f64 {
            self.0
        }
    }

    #[test]
    fn sum_is_order_independent() {
        let layout = NodeLayout::stage(2, 1, 0);
        let q = DVector::zeros(2);
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
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
            layout,
        };

        let mut ab = CostFunction::new();
        ab.push_back(Box::new(ConstantCost(1.0)));
        ab.push_back(Box::new(ConstantCost(2.0)));
        let mut ba = CostFunction::new();
        ba.push_back(Box::new(ConstantCost(2.0)));
        ba.push_back(Box::new(ConstantCost(1.0)));

        assert_eq!(ab.num_terms(), 2);
        assert!((ab.stage_cost(&p) - ba.stage_cost(&p)).abs() < 1e-15);
        assert!((ab.stage_cost(&p) - 0.3).abs() < 1e-15);
        assert!((ab.terminal_cost(&p) - 3.0).abs() < 1e-15);

        let mut grad = DVector::zeros(layout.nz());
        let mut hess = DMatrix::zeros(layout.nz(), layout.nz());
        ab.stage_quadratize(&p, &mut grad, &mut hess);
        assert!((grad[0] - 3.0).abs() < 1e-15);
    }

    #[test]
    fn default_channels_are_zero() {
        let layout = NodeLayout::terminal(2);
        let q = DVector::zeros(2);
        let v = DVector::zeros(2);
        let u = DVector::zeros(0);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = EvalPoint {
            t: 0.0,
            dt: 0.0,
            q: &q,
            v: &v,
            u: &u,
            f: &f,
            status: &status,
            layout,
        };
        let mut cost = CostFunction::new();
        cost.push_back(Box::new(ConstantCost(5.0)));
        // ConstantCost leaves the impulse channel at its default.
        assert!((cost.impulse_cost(&p) - 0.0).abs() < 1e-15);
    }
}
