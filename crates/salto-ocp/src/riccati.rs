use nalgebra::{DMatrix, DVector};

use crate::kkt::StageData;

// ---------------------------------------------------------------------------
// Factorization products
// ---------------------------------------------------------------------------

/// Quadratic value-function factor at one node:
/// `V(δx) = ½ δxᵀ P δx + sᵀ δx + const`.
#[derive(Clone, Debug)]
pub struct RiccatiFactor {
    pub p: DMatrix<f64>,
    pub s: DVector<f64>,
}

/// State-feedback policy of the LQR subproblem at one node:
/// `δw = gain · δx + feedforward`.
#[derive(Clone, Debug)]
pub struct LqrPolicy {
    pub gain: DMatrix<f64>,
    pub feedforward: DVector<f64>,
}

/// Primal search direction and costates from one backward/forward sweep.
#[derive(Clone, Debug)]
pub struct Direction {
    /// State direction per node.
    pub dx: Vec<DVector<f64>>,
    /// Control-block direction per node (empty at the terminal node).
    pub dw: Vec<DVector<f64>>,
    /// Costate `λ = P δx + s` per node.
    pub costate: Vec<DVector<f64>>,
}

// ---------------------------------------------------------------------------
// Backward sweep
// ---------------------------------------------------------------------------

/// Factorize the control-block Hessian, escalating a Levenberg shift until
/// it is positive definite.
fn factorize_quu(
    quu: &DMatrix<f64>,
    reg0: f64,
) -> nalgebra::linalg::Cholesky<f64, nalgebra::Dyn> {
    if let Some(chol) = nalgebra::linalg::Cholesky::new(quu.clone()) {
        return chol;
    }
    let n = quu.nrows();
    let mut reg = reg0.max(1.0e-12);
    loop {
        let mut shifted = quu.clone();
        for i in 0..n {
            shifted[(i, i)] += reg;
        }
        if let Some(chol) = nalgebra::linalg::Cholesky::new(shifted) {
            return chol;
        }
        reg *= 10.0;
        assert!(
            reg.is_finite(),
            "control-Hessian regularization diverged; the quadratic model is corrupt"
        );
    }
}

/// Backward Riccati sweep over the linearized stages.
///
/// `stages` is time-ordered with the terminal node last. Returns the value
/// factors and the per-node LQR policies (the terminal policy is empty).
#[must_use]
pub fn backward_pass(stages: &[StageData], reg: f64) -> (Vec<RiccatiFactor>, Vec<LqrPolicy>) {
    let n = stages.len();
    assert!(n >= 1, "at least a terminal node is required");

    let mut factors: Vec<Option<RiccatiFactor>> = vec![None; n];
    let mut policies: Vec<Option<LqrPolicy>> = vec![None; n];

    // Terminal node: value = its own quadratic (state-only layout).
    let term = &stages[n - 1];
    let nx = term.layout.nx();
    factors[n - 1] = Some(RiccatiFactor {
        p: term.hess.view((0, 0), (nx, nx)).into_owned(),
        s: term.grad.rows(0, nx).into_owned(),
    });
    policies[n - 1] = Some(LqrPolicy {
        gain: DMatrix::zeros(0, nx),
        feedforward: DVector::zeros(0),
    });

    for k in (0..n - 1).rev() {
        let stage = &stages[k];
        let nx = stage.layout.nx();
        let nw = stage.layout.nw();
        let next = factors[k + 1].as_ref().expect("factor k+1 computed");

        // Gradient of the next value at the propagated defect.
        let pd_s = &next.p * &stage.defect + &next.s;

        let hxx = stage.hess.view((0, 0), (nx, nx));
        let gx = stage.grad.rows(0, nx);
        let at_p = stage.a.transpose() * &next.p;

        if nw == 0 {
            let p = (&hxx + &at_p * &stage.a).into_owned();
            let s = &gx + stage.a.transpose() * &pd_s;
            factors[k] = Some(RiccatiFactor {
                p: 0.5 * (&p + p.transpose()),
                s: s.into_owned(),
            });
            policies[k] = Some(LqrPolicy {
                gain: DMatrix::zeros(0, nx),
                feedforward: DVector::zeros(0),
            });
            continue;
        }

        let hxw = stage.hess.view((0, nx), (nx, nw));
        let hww = stage.hess.view((nx, nx), (nw, nw));
        let gw = stage.grad.rows(nx, nw);

        let qxx = &hxx + &at_p * &stage.a;
        let qxw = (&hxw + &at_p * &stage.b).into_owned();
        let qww = (&hww + stage.b.transpose() * &next.p * &stage.b).into_owned();
        let qx = &gx + stage.a.transpose() * &pd_s;
        let qw = &gw + stage.b.transpose() * &pd_s;

        let chol = factorize_quu(&qww, reg);
        let gain = -chol.solve(&qxw.transpose());
        let feedforward = -chol.solve(&qw);

        let p = (&qxx + &qxw * &gain).into_owned();
        let s = qx + &qxw * &feedforward;
        factors[k] = Some(RiccatiFactor {
            p: 0.5 * (&p + p.transpose()),
            s: s.into_owned(),
        });
        policies[k] = Some(LqrPolicy { gain, feedforward });
    }

    (
        factors.into_iter().map(Option::unwrap).collect(),
        policies.into_iter().map(Option::unwrap).collect(),
    )
}

// ---------------------------------------------------------------------------
// Forward sweep
// ---------------------------------------------------------------------------

/// Roll the direction forward from the initial-state mismatch `dx0`,
/// applying the policies and correcting the multiple-shooting defects.
#[must_use]
pub fn forward_pass(
    stages: &[StageData],
    factors: &[RiccatiFactor],
    policies: &[LqrPolicy],
    dx0: DVector<f64>,
) -> Direction {
    let n = stages.len();
    let mut dx = Vec::with_capacity(n);
    let mut dw = Vec::with_capacity(n);
    let mut costate = Vec::with_capacity(n);

    let mut x = dx0;
    for k in 0..n {
        costate.push(&factors[k].p * &x + &factors[k].s);
        let w = if policies[k].feedforward.is_empty() {
            DVector::zeros(0)
        } else {
            &policies[k].gain * &x + &policies[k].feedforward
        };
        let x_next = if k + 1 < n {
            &stages[k].a * &x + &stages[k].b * &w + &stages[k].defect
        } else {
            DVector::zeros(0)
        };
        dx.push(x);
        dw.push(w);
        x = x_next;
    }

    Direction { dx, dw, costate }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
