use nalgebra::{DMatrix, DVector};

use salto_contact::ContactStatus;

use crate::point::{EvalPoint, NodeLayout};

// ---------------------------------------------------------------------------
// ConstraintTerm
// ---------------------------------------------------------------------------

/// A block of inequality constraints `g(point) ≤ 0`, component-wise.
pub trait ConstraintTerm: Send + Sync {
    /// Number of rows at a node with the given layout and contact status.
    fn dim(&self, layout: &NodeLayout, status: &ContactStatus) -> usize;

    /// Whether the term applies at regular stage nodes.
    fn applies_at_stage(&self) -> bool {
        true
    }

    /// Whether the term applies at impulse nodes.
    fn applies_at_impulse(&self) -> bool {
        false
    }

    /// Evaluate the residual into `out` (length [`dim`](Self::dim)).
    fn residual(&self, p: &EvalPoint, out: &mut DVector<f64>);

    /// Evaluate the Jacobian into `out` (`dim` x `layout.nz()`).
    fn jacobian(&self, p: &EvalPoint, out: &mut DMatrix<f64>);
}

// ---------------------------------------------------------------------------
// ConstraintData
// ---------------------------------------------------------------------------

/// Interior-point slack and multiplier variables of one term at one node.
#[derive(Clone, Debug, Default)]
pub struct ConstraintData {
    pub slack: DVector<f64>,
    pub dual: DVector<f64>,
}

impl ConstraintData {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            slack: DVector::zeros(dim),
            dual: DVector::zeros(dim),
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.slack.len()
    }
}

// ---------------------------------------------------------------------------
// ConstraintSet
// ---------------------------------------------------------------------------

/// Slack floor when seeding at an infeasible guess.
const SLACK_MIN: f64 = 1.0e-4;

/// Composable collection of inequality constraint terms with interior-point
/// bookkeeping.
///
/// Terms are independently evaluated and stacked; order does not affect the
/// result. The barrier parameter `mu` is always passed in by the solver,
/// which owns the shrink schedule.
#[derive(Default)]
pub struct ConstraintSet {
    terms: Vec<Box<dyn ConstraintTerm>>,
}

impl ConstraintSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a term.
    pub fn push_back(&mut self, term: Box<dyn ConstraintTerm>) {
        self.terms.push(term);
    }

    /// Number of registered terms.
    #[must_use]
    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    fn applies(&self, index: usize, impulse_node: bool) -> bool {
        if impulse_node {
            self.terms[index].applies_at_impulse()
        } else {
            self.terms[index].applies_at_stage()
        }
    }

    /// Zero-dimensional data for nodes no term applies to (the terminal
    /// node has no control block to constrain).
    #[must_use]
    pub fn empty_data(&self) -> Vec<ConstraintData> {
        self.terms.iter().map(|_| ConstraintData::new(0)).collect()
    }

    /// Seed slack and multiplier variables at the current guess.
    ///
    /// Slacks are `max(-g, SLACK_MIN)` so an infeasible guess still yields
    /// strictly positive slacks; duals are centered at `mu / s`.
    #[must_use]
    pub fn init_data(&self, p: &EvalPoint, impulse_node: bool, mu: f64) -> Vec<ConstraintData> {
        let mut all = Vec::with_capacity(self.terms.len());
        for (i, term) in self.terms.iter().enumerate() {
            let dim = if self.applies(i, impulse_node) {
                term.dim(&p.layout, p.status)
            } else {
                0
            };
            let mut data = ConstraintData::new(dim);
            if dim > 0 {
                let mut g = DVector::zeros(dim);
                term.residual(p, &mut g);
                for r in 0..dim {
                    data.slack[r] = (-g[r]).max(SLACK_MIN);
                    data.dual[r] = mu / data.slack[r];
                }
            }
            all.push(data);
        }
        all
    }

    /// Log-barrier cost at `p`, or `+inf` if any component is infeasible.
    ///
    /// Feeds the line-search merit so trial points stay strictly feasible.
    #[must_use]
    pub fn barrier_cost(&self, p: &EvalPoint, impulse_node: bool, mu: f64) -> f64 {
        let mut cost = 0.0;
        for (i, term) in self.terms.iter().enumerate() {
            if !self.applies(i, impulse_node) {
                continue;
            }
            let dim = term.dim(&p.layout, p.status);
            if dim == 0 {
                continue;
            }
            let mut g = DVector::zeros(dim);
            term.residual(p, &mut g);
            for r in 0..dim {
                if g[r] >= 0.0 {
                    return f64::INFINITY;
                }
                cost -= mu * (-g[r]).ln();
            }
        }
        cost
    }

    /// Condense the barrier into the node's gradient and Hessian.
    ///
    /// Primal-dual form: `grad += Jᵀ (mu ⊘ s)`, `hess += Jᵀ diag(ν ⊘ s) J`.
    pub fn condense(
        &self,
        p: &EvalPoint,
        data: &[ConstraintData],
        impulse_node: bool,
        mu: f64,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        let nz = p.layout.nz();
        for (i, term) in self.terms.iter().enumerate() {
            if !self.applies(i, impulse_node) || data[i].dim() == 0 {
                continue;
            }
            let dim = data[i].dim();
            let mut jac = DMatrix::zeros(dim, nz);
            term.jacobian(p, &mut jac);
            for r in 0..dim {
                let s = data[i].slack[r].max(SLACK_MIN);
                let nu_over_s = (data[i].dual[r] / s).max(0.0);
                let g_scale = mu / s;
                let row = jac.row(r);
                for c in 0..nz {
                    let jr = row[c];
                    if jr == 0.0 {
                        continue;
                    }
                    grad[c] += jr * g_scale;
                    for c2 in 0..nz {
                        let jr2 = row[c2];
                        if jr2 != 0.0 {
                            hess[(c, c2)] += jr * nu_over_s * jr2;
                        }
                    }
                }
            }
        }
    }

    /// Fraction-to-boundary bound on the step `dz`.
    ///
    /// With `δs = -J dz`, returns the largest `α ≤ 1` keeping
    /// `s + α δs ≥ (1 − τ) s` for every slack.
    #[must_use]
    pub fn max_step(
        &self,
        p: &EvalPoint,
        data: &[ConstraintData],
        impulse_node: bool,
        dz: &DVector<f64>,
        tau: f64,
    ) -> f64 {
        let nz = p.layout.nz();
        let mut alpha: f64 = 1.0;
        for (i, term) in self.terms.iter().enumerate() {
            if !self.applies(i, impulse_node) || data[i].dim() == 0 {
                continue;
            }
            let dim = data[i].dim();
            let mut jac = DMatrix::zeros(dim, nz);
            term.jacobian(p, &mut jac);
            let ds = -(&jac * dz);
            for r in 0..dim {
                if ds[r] < 0.0 {
                    let s = data[i].slack[r];
                    alpha = alpha.min(tau * s / (-ds[r]));
                }
            }
        }
        alpha
    }

    /// Refresh slacks and multipliers after an accepted step.
    pub fn update_data(
        &self,
        p: &EvalPoint,
        data: &mut [ConstraintData],
        impulse_node: bool,
        mu: f64,
    ) {
        for (i, term) in self.terms.iter().enumerate() {
            if !self.applies(i, impulse_node) || data[i].dim() == 0 {
                continue;
            }
            let dim = data[i].dim();
            let mut g = DVector::zeros(dim);
            term.residual(p, &mut g);
            for r in 0..dim {
                data[i].slack[r] = (-g[r]).max(SLACK_MIN);
                data[i].dual[r] = mu / data[i].slack[r];
            }
        }
    }

    /// Squared primal violation `Σ max(g, 0)²` for the KKT residual.
    #[must_use]
    pub fn primal_violation(&self, p: &EvalPoint, impulse_node: bool) -> f64 {
        let mut violation = 0.0;
        for (i, term) in self.terms.iter().enumerate() {
            if !self.applies(i, impulse_node) {
                continue;
            }
            let dim = term.dim(&p.layout, p.status);
            if dim == 0 {
                continue;
            }
            let mut g = DVector::zeros(dim);
            term.residual(p, &mut g);
            for r in 0..dim {
                let viol = g[r].max(0.0);
                violation += viol * viol;
            }
        }
        violation
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    /// Toy bound `z_0 ≤ 1` on the first configuration entry.
    struct UpperBound;

    impl ConstraintTerm for UpperBound {
        fn dim(&self, _layout: &NodeLayout, _status: &ContactStatus) -> usize {
            1
        }
        fn residual(&self, p: &EvalPoint, out: &mut DVector<f64>) {
            out[0] = p.q[0] - 1.0;
        }
        fn jacobian(&self, _p: &EvalPoint, out: &mut DMatrix<f64>) {
            out[(0, 0)] = 1.0;
        }
    }

    fn make_point<'a>(
        q: &'a DVector<f64>,
        v: &'a DVector<f64>,
        u: &'a DVector<f64>,
        f: &'a [Vector3<f64>],
        status: &'a ContactStatus,
    ) -> EvalPoint<'a> {
        EvalPoint {
            t: 0.0,
            dt: 0.1,
            q,
            v,
            u,
            f,
            status,
            layout: NodeLayout::stage(2, 1, 0),
        }
    }

    #[test]
    fn init_data_seeds_positive_slack() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let q = DVector::from_vec(vec![0.2, 0.0]);
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = make_point(&q, &v, &u, &f, &status);

        let data = set.init_data(&p, false, 1e-3);
        assert_eq!(data.len(), 1);
        assert_relative_eq!(data[0].slack[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(data[0].dual[0], 1e-3 / 0.8, epsilon = 1e-12);
    }

    #[test]
    fn infeasible_guess_clamps_slack() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let q = DVector::from_vec(vec![2.0, 0.0]);
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = make_point(&q, &v, &u, &f, &status);

        let data = set.init_data(&p, false, 1e-3);
        assert!(data[0].slack[0] > 0.0);
    }

    #[test]
    fn barrier_cost_infinite_when_infeasible() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);

        let q_ok = DVector::from_vec(vec![0.0, 0.0]);
        let p_ok = make_point(&q_ok, &v, &u, &f, &status);
        assert!(set.barrier_cost(&p_ok, false, 1e-3).is_finite());

        let q_bad = DVector::from_vec(vec![1.5, 0.0]);
        let p_bad = make_point(&q_bad, &v, &u, &f, &status);
        assert!(set.barrier_cost(&p_bad, false, 1e-3).is_infinite());
    }

    #[test]
    fn condense_pushes_away_from_boundary() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let q = DVector::from_vec(vec![0.9, 0.0]);
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = make_point(&q, &v, &u, &f, &status);
        let data = set.init_data(&p, false, 1e-3);

        let nz = p.layout.nz();
        let mut grad = DVector::zeros(nz);
        let mut hess = DMatrix::zeros(nz, nz);
        set.condense(&p, &data, false, 1e-3, &mut grad, &mut hess);
        // Gradient of -mu ln(1 - z0) is mu / (1 - z0) > 0: pushes z0 down.
        assert_relative_eq!(grad[0], 1e-3 / 0.1, epsilon = 1e-9);
        assert!(hess[(0, 0)] > 0.0);
    }

    #[test]
    fn max_step_respects_fraction_to_boundary() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let q = DVector::from_vec(vec![0.9, 0.0]);
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = make_point(&q, &v, &u, &f, &status);
        let data = set.init_data(&p, false, 1e-3);

        // Step pushing z0 up by 1.0 would cross the bound at alpha = 0.1.
        let mut dz = DVector::zeros(p.layout.nz());
        dz[0] = 1.0;
        let alpha = set.max_step(&p, &data, false, &dz, 0.995);
        assert_relative_eq!(alpha, 0.995 * 0.1, epsilon = 1e-9);

        // A step away from the bound is unrestricted.
        dz[0] = -1.0;
        let alpha = set.max_step(&p, &data, false, &dz, 0.995);
        assert_relative_eq!(alpha, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn update_data_recenters_duals() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let q = DVector::from_vec(vec![0.5, 0.0]);
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = make_point(&q, &v, &u, &f, &status);
        let mut data = set.init_data(&p, false, 1e-3);

        set.update_data(&p, &mut data, false, 1e-4);
        assert_relative_eq!(data[0].slack[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(data[0].dual[0], 1e-4 / 0.5, epsilon = 1e-12);
    }

    #[test]
    fn primal_violation_measures_positive_part() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);

        let q_ok = DVector::from_vec(vec![0.5, 0.0]);
        let p_ok = make_point(&q_ok, &v, &u, &f, &status);
        assert_relative_eq!(set.primal_violation(&p_ok, false), 0.0, epsilon = 1e-15);

        let q_bad = DVector::from_vec(vec![1.3, 0.0]);
        let p_bad = make_point(&q_bad, &v, &u, &f, &status);
        assert_relative_eq!(set.primal_violation(&p_bad, false), 0.09, epsilon = 1e-12);
    }

    #[test]
    fn stage_only_term_skipped_at_impulse_nodes() {
        let mut set = ConstraintSet::new();
        set.push_back(Box::new(UpperBound));
        let q = DVector::from_vec(vec![5.0, 0.0]);
        let v = DVector::zeros(2);
        let u = DVector::zeros(1);
        let f: Vec<Vector3<f64>> = Vec::new();
        let status = ContactStatus::new(0);
        let p = make_point(&q, &v, &u, &f, &status);

        // UpperBound keeps the default applies_at_impulse = false.
        let data = set.init_data(&p, true, 1e-3);
        assert_eq!(data[0].dim(), 0);
        assert!(set.barrier_cost(&p, true, 1e-3).is_finite());
        assert_relative_eq!(set.primal_violation(&p, true), 0.0, epsilon = 1e-15);
    }
}
