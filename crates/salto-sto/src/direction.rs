use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Result of the switching-time Newton solve.
#[derive(Clone, Debug)]
pub struct StoDirection {
    /// Direction over all events; zero at STO-disabled entries.
    pub dts: DVector<f64>,
    /// Whether the regularized fallback was engaged.
    pub regularized_fallback: bool,
}

impl StoDirection {
    /// Zero direction over `num_events` events.
    #[must_use]
    pub fn zero(num_events: usize) -> Self {
        Self {
            dts: DVector::zeros(num_events),
            regularized_fallback: false,
        }
    }
}

/// Conditioning estimate of a symmetric positive matrix from its diagonal.
fn diagonal_condition(m: &DMatrix<f64>) -> f64 {
    let mut min = f64::INFINITY;
    let mut max: f64 = 0.0;
    for i in 0..m.nrows() {
        let d = m[(i, i)].abs();
        min = min.min(d);
        max = max.max(d);
    }
    if min <= 0.0 { f64::INFINITY } else { max / min }
}

/// Solve the switching-time Newton system `H δts = −g` over the free
/// events.
///
/// `gradient` and `hessian` span *all* events; rows/columns of
/// STO-disabled events are masked out and their direction entries stay
/// zero. When the reduced Hessian is near-singular (conditioning estimate
/// above `cond_threshold`, or a failed Cholesky factorization), the
/// regularized formulation is engaged automatically by adding
/// `fallback_weight` to the diagonal, escalating until the factorization
/// succeeds.
#[must_use]
pub fn solve_newton(
    gradient: &DVector<f64>,
    hessian: &DMatrix<f64>,
    free: &[bool],
    cond_threshold: f64,
    fallback_weight: f64,
) -> StoDirection {
    let num_events = free.len();
    let free_idx: Vec<usize> = (0..num_events).filter(|&i| free[i]).collect();
    if free_idx.is_empty() {
        return StoDirection::zero(num_events);
    }

    let n = free_idx.len();
    let mut h = DMatrix::zeros(n, n);
    let mut g = DVector::zeros(n);
    for (r, &i) in free_idx.iter().enumerate() {
        g[r] = gradient[i];
        for (c, &j) in free_idx.iter().enumerate() {
            h[(r, c)] = hessian[(i, j)];
        }
    }

    let mut fallback = false;
    if diagonal_condition(&h) > cond_threshold {
        debug!(
            cond = diagonal_condition(&h),
            "switching-time Hessian near-singular, engaging regularized formulation"
        );
        fallback = true;
        for i in 0..n {
            h[(i, i)] += fallback_weight.max(f64::MIN_POSITIVE);
        }
    }

    let mut reg = fallback_weight.max(f64::MIN_POSITIVE);
    let reduced = loop {
        match nalgebra::linalg::Cholesky::new(h.clone()) {
            Some(chol) => break chol.solve(&(-&g)),
            None => {
                debug!(reg, "switching-time Cholesky failed, increasing regularization");
                fallback = true;
                for i in 0..n {
                    h[(i, i)] += reg;
                }
                reg *= 10.0;
                if reg > 1.0e32 {
                    // Give up on moving the switch times this iteration.
                    break DVector::zeros(n);
                }
            }
        }
    };

    let mut dts = DVector::zeros(num_events);
    for (r, &i) in free_idx.iter().enumerate() {
        dts[i] = reduced[r];
    }
    StoDirection {
        dts,
        regularized_fallback: fallback,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
