use salto_core::{SolveError, SolverOptions};
use tracing::trace;

/// Armijo sufficient-decrease test.
///
/// `dd` is the directional derivative of the merit along the step; when it
/// is not a descent direction (can happen with large defect penalties) the
/// test degenerates to simple decrease.
#[must_use]
pub fn armijo_accepts(merit0: f64, merit_trial: f64, dd: f64, alpha: f64, coeff: f64) -> bool {
    if !merit_trial.is_finite() {
        return false;
    }
    // Absolute slack so a step taken at (numerical) optimality is not
    // rejected on round-off noise.
    let tol = 1.0e-12 * (1.0 + merit0.abs());
    if dd < 0.0 {
        merit_trial <= merit0 + coeff * alpha * dd + tol
    } else {
        merit_trial < merit0 + tol
    }
}

/// Backtracking line search on a merit function.
///
/// Starts from the fraction-to-boundary bound `alpha_max` and multiplies
/// by the configured reduction until the Armijo condition holds; a
/// bounded number of backtracks guards against stalls and surfaces
/// [`SolveError::LineSearchFailure`] to the caller.
pub fn backtracking(
    options: &SolverOptions,
    alpha_max: f64,
    merit0: f64,
    dd: f64,
    mut merit_at: impl FnMut(f64) -> f64,
) -> Result<f64, SolveError> {
    let mut alpha = alpha_max.clamp(0.0, 1.0);
    for backtrack in 0..=options.max_backtracks {
        let merit_trial = merit_at(alpha);
        trace!(alpha, merit_trial, backtrack, "line search trial");
        if armijo_accepts(merit0, merit_trial, dd, alpha, options.armijo_coeff) {
            return Ok(alpha);
        }
        alpha *= options.step_reduction;
    }
    Err(SolveError::LineSearchFailure {
        backtracks: options.max_backtracks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SolverOptions {
        SolverOptions::default()
    }

    #[test]
    fn full_step_accepted_on_quadratic() {
        // merit(a) = (1 - a)^2, dd = -2 at a = 0.
        let alpha = backtracking(&options(), 1.0, 1.0, -2.0, |a| (1.0 - a) * (1.0 - a)).unwrap();
        assert!((alpha - 1.0).abs() < 1e-12);
    }

    #[test]
    fn backtracks_past_infeasible_region() {
        // Trial points above a = 0.4 are infeasible (infinite merit).
        let alpha = backtracking(&options(), 1.0, 1.0, -1.0, |a| {
            if a > 0.4 { f64::INFINITY } else { 1.0 - 0.5 * a }
        })
        .unwrap();
        assert!(alpha <= 0.4);
        assert!(alpha > 0.0);
    }

    #[test]
    fn respects_alpha_max() {
        let alpha = backtracking(&options(), 0.25, 1.0, -1.0, |a| 1.0 - a).unwrap();
        assert!((alpha - 0.25).abs() < 1e-12);
    }

    #[test]
    fn failure_after_budget() {
        // Merit strictly increases: no step is acceptable.
        let err = backtracking(&options(), 1.0, 1.0, -1.0, |a| 1.0 + a).unwrap_err();
        assert_eq!(err, SolveError::LineSearchFailure { backtracks: 20 });
    }

    #[test]
    fn nonnegative_dd_falls_back_to_simple_decrease() {
        assert!(armijo_accepts(1.0, 0.99, 0.5, 1.0, 1e-4));
        assert!(!armijo_accepts(1.0, 1.0, 0.5, 1.0, 1e-4));
        assert!(!armijo_accepts(1.0, f64::NAN, -1.0, 1.0, 1e-4));
    }
}
