use nalgebra::{DMatrix, DVector};

// ---------------------------------------------------------------------------
// StoCostTerm / StoCostFunction
// ---------------------------------------------------------------------------

/// A cost term over the switching-time vector.
pub trait StoCostTerm: Send + Sync {
    /// Cost at the switch times `ts`.
    fn cost(&self, ts: &[f64]) -> f64;

    /// Accumulate gradient and Hessian over `ts`.
    fn quadratize(&self, ts: &[f64], grad: &mut DVector<f64>, hess: &mut DMatrix<f64>);
}

/// Composable collection of switching-time cost terms.
///
/// Parallel to the trajectory cost aggregator but over the switching-time
/// variables; usually empty, with the regularization applied separately by
/// the solver.
#[derive(Default)]
pub struct StoCostFunction {
    terms: Vec<Box<dyn StoCostTerm>>,
}

impl StoCostFunction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, term: Box<dyn StoCostTerm>) {
        self.terms.push(term);
    }

    #[must_use]
    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn cost(&self, ts: &[f64]) -> f64 {
        self.terms.iter().map(|t| t.cost(ts)).sum()
    }

    pub fn quadratize(&self, ts: &[f64], grad: &mut DVector<f64>, hess: &mut DMatrix<f64>) {
        for term in &self.terms {
            term.quadratize(ts, grad, hess);
        }
    }
}

// ---------------------------------------------------------------------------
// StoRegularization
// ---------------------------------------------------------------------------

/// Shape of the switching-time regularization penalty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoRegularizationKind {
    /// `½ w Σ (ts_i − nominal_i)²`.
    Square,
    /// `w Σ |ts_i − nominal_i|` (no curvature contribution).
    Abs,
}

/// Regularization penalty about a nominal switching schedule.
///
/// The direct second derivative of the time-scaled cost with respect to
/// the switch times vanishes, so the raw STO Hessian carries barrier
/// curvature only and turns near-singular once the dwell slacks open up.
/// This penalty keeps the subproblem well posed; the solver owns the
/// effective weight schedule and passes it in explicitly.
#[derive(Clone, Debug)]
pub struct StoRegularization {
    kind: StoRegularizationKind,
    weight: f64,
    nominal: Vec<f64>,
}

impl StoRegularization {
    /// Regularization of the given shape and weight; the nominal schedule
    /// is captured later via [`set_nominal`](Self::set_nominal).
    #[must_use]
    pub fn new(kind: StoRegularizationKind, weight: f64) -> Self {
        Self {
            kind,
            weight,
            nominal: Vec::new(),
        }
    }

    /// Configured weight.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Penalty shape.
    #[must_use]
    pub const fn kind(&self) -> StoRegularizationKind {
        self.kind
    }

    /// Capture the nominal schedule the penalty is measured against.
    pub fn set_nominal(&mut self, ts: &[f64]) {
        self.nominal = ts.to_vec();
    }

    /// The nominal schedule.
    #[must_use]
    pub fn nominal(&self) -> &[f64] {
        &self.nominal
    }

    /// Penalty value at `ts` under the given effective weight.
    #[must_use]
    pub fn cost_with_weight(&self, ts: &[f64], weight: f64) -> f64 {
        let mut cost = 0.0;
        for (i, &t) in ts.iter().enumerate() {
            let e = t - self.nominal.get(i).copied().unwrap_or(t);
            cost += match self.kind {
                StoRegularizationKind::Square => 0.5 * weight * e * e,
                StoRegularizationKind::Abs => weight * e.abs(),
            };
        }
        cost
    }

    /// Accumulate gradient and Hessian under the given effective weight.
    pub fn condense_with_weight(
        &self,
        ts: &[f64],
        weight: f64,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        for (i, &t) in ts.iter().enumerate() {
            let e = t - self.nominal.get(i).copied().unwrap_or(t);
            match self.kind {
                StoRegularizationKind::Square => {
                    grad[i] += weight * e;
                    hess[(i, i)] += weight;
                }
                StoRegularizationKind::Abs => {
                    grad[i] += weight * e.signum();
                }
            }
        }
    }
}

impl StoCostTerm for StoRegularization {
    fn cost(&self, ts: &[f64]) -> f64 {
        self.cost_with_weight(ts, self.weight)
    }

    fn quadratize(&self, ts: &[f64], grad: &mut DVector<f64>, hess: &mut DMatrix<f64>) {
        self.condense_with_weight(ts, self.weight, grad, hess);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn square_penalty_about_nominal() {
        let mut reg = StoRegularization::new(StoRegularizationKind::Square, 1e-2);
        reg.set_nominal(&[0.7, 0.95]);
        assert_relative_eq!(reg.cost(&[0.7, 0.95]), 0.0, epsilon = 1e-15);
        // 0.5 * 1e-2 * 0.1^2
        assert_relative_eq!(reg.cost(&[0.8, 0.95]), 5e-5, epsilon = 1e-12);

        let mut grad = DVector::zeros(2);
        let mut hess = DMatrix::zeros(2, 2);
        reg.quadratize(&[0.8, 0.95], &mut grad, &mut hess);
        assert_relative_eq!(grad[0], 1e-2 * 0.1, epsilon = 1e-12);
        assert_relative_eq!(grad[1], 0.0, epsilon = 1e-15);
        assert_relative_eq!(hess[(0, 0)], 1e-2, epsilon = 1e-15);
        assert_relative_eq!(hess[(1, 1)], 1e-2, epsilon = 1e-15);
    }

    #[test]
    fn abs_penalty_has_no_curvature() {
        let mut reg = StoRegularization::new(StoRegularizationKind::Abs, 2.0);
        reg.set_nominal(&[0.5]);
        assert_relative_eq!(reg.cost(&[0.3]), 0.4, epsilon = 1e-12);

        let mut grad = DVector::zeros(1);
        let mut hess = DMatrix::zeros(1, 1);
        reg.quadratize(&[0.3], &mut grad, &mut hess);
        assert_relative_eq!(grad[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(hess[(0, 0)], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn effective_weight_overrides_configured() {
        let mut reg = StoRegularization::new(StoRegularizationKind::Square, 1e-6);
        reg.set_nominal(&[0.5]);
        let mut grad = DVector::zeros(1);
        let mut hess = DMatrix::zeros(1, 1);
        reg.condense_with_weight(&[0.6], 1e30, &mut grad, &mut hess);
        // A freezing-scale weight dominates the Hessian.
        assert!(hess[(0, 0)] >= 1e30);
    }

    #[test]
    fn cost_function_sums_terms() {
        let mut f = StoCostFunction::new();
        let mut a = StoRegularization::new(StoRegularizationKind::Square, 2.0);
        a.set_nominal(&[0.0]);
        let mut b = StoRegularization::new(StoRegularizationKind::Square, 4.0);
        b.set_nominal(&[0.0]);
        f.push_back(Box::new(a));
        f.push_back(Box::new(b));
        assert_eq!(f.num_terms(), 2);
        // 0.5 * (2 + 4) * 1^2
        assert_relative_eq!(f.cost(&[1.0]), 3.0, epsilon = 1e-12);

        let mut grad = DVector::zeros(1);
        let mut hess = DMatrix::zeros(1, 1);
        f.quadratize(&[1.0], &mut grad, &mut hess);
        assert_relative_eq!(grad[0], 6.0, epsilon = 1e-12);
        assert_relative_eq!(hess[(0, 0)], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_nominal_contributes_nothing() {
        let reg = StoRegularization::new(StoRegularizationKind::Square, 1.0);
        // No nominal captured: every entry is measured against itself.
        assert_relative_eq!(reg.cost(&[0.4, 0.9]), 0.0, epsilon = 1e-15);
    }
}
