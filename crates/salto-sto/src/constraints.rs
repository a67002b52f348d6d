use nalgebra::{DMatrix, DVector};

use salto_core::SequenceError;

/// Minimum-dwell-time constraints over the switching times.
///
/// For `E` events on the horizon `[t0, tf]` there are `E + 1` phase
/// durations: `ts[0] − t0`, `ts[i] − ts[i−1]`, and `tf − ts[E−1]`. Each
/// duration must stay at or above its entry of the minimum-dwell-time
/// vector; the constraint enters the STO subproblem as a log barrier whose
/// Hessian is tridiagonal in the switch times.
#[derive(Clone, Debug)]
pub struct StoConstraints {
    min_dwell: Vec<f64>,
}

impl StoConstraints {
    /// Constraints over `num_dwell` phase durations (`num_events + 1`),
    /// initially all zero.
    #[must_use]
    pub fn new(num_dwell: usize) -> Self {
        Self {
            min_dwell: vec![0.0; num_dwell],
        }
    }

    /// Set the minimum dwell times; each entry must be non-negative.
    pub fn set_minimum_dwell_times(&mut self, dwell: &[f64]) -> Result<(), SequenceError> {
        if dwell.len() != self.min_dwell.len() {
            return Err(SequenceError::DwellTimeLengthMismatch {
                expected: self.min_dwell.len(),
                got: dwell.len(),
            });
        }
        self.min_dwell.copy_from_slice(dwell);
        Ok(())
    }

    /// The minimum dwell times.
    #[must_use]
    pub fn minimum_dwell_times(&self) -> &[f64] {
        &self.min_dwell
    }

    /// Number of phase durations this constraint covers.
    #[must_use]
    pub fn num_dwell(&self) -> usize {
        self.min_dwell.len()
    }

    /// Phase durations induced by the switch times on `[t0, tf]`.
    #[must_use]
    pub fn durations(&self, ts: &[f64], t0: f64, tf: f64) -> Vec<f64> {
        let mut dur = Vec::with_capacity(ts.len() + 1);
        let mut prev = t0;
        for &t in ts {
            dur.push(t - prev);
            prev = t;
        }
        dur.push(tf - prev);
        dur
    }

    /// Slacks `duration − min_dwell` per phase.
    #[must_use]
    pub fn slacks(&self, ts: &[f64], t0: f64, tf: f64) -> Vec<f64> {
        self.durations(ts, t0, tf)
            .iter()
            .zip(&self.min_dwell)
            .map(|(d, m)| d - m)
            .collect()
    }

    /// Whether every dwell minimum is satisfied within `eps`.
    #[must_use]
    pub fn is_feasible(&self, ts: &[f64], t0: f64, tf: f64, eps: f64) -> bool {
        self.slacks(ts, t0, tf).iter().all(|&s| s >= -eps)
    }

    /// Log-barrier cost, `+inf` when a duration reaches its minimum.
    #[must_use]
    pub fn barrier_cost(&self, ts: &[f64], t0: f64, tf: f64, mu: f64) -> f64 {
        let mut cost = 0.0;
        for s in self.slacks(ts, t0, tf) {
            if s <= 0.0 {
                return f64::INFINITY;
            }
            cost -= mu * s.ln();
        }
        cost
    }

    /// Accumulate the barrier gradient and (tridiagonal) Hessian over the
    /// switch times.
    pub fn condense(
        &self,
        ts: &[f64],
        t0: f64,
        tf: f64,
        mu: f64,
        grad: &mut DVector<f64>,
        hess: &mut DMatrix<f64>,
    ) {
        let slacks = self.slacks(ts, t0, tf);
        let num_events = ts.len();
        for j in 0..num_events {
            // ts[j] lengthens duration j and shortens duration j + 1.
            let s_before = slacks[j].max(f64::MIN_POSITIVE);
            let s_after = slacks[j + 1].max(f64::MIN_POSITIVE);
            grad[j] += mu * (1.0 / s_after - 1.0 / s_before);
            hess[(j, j)] += mu * (1.0 / (s_before * s_before) + 1.0 / (s_after * s_after));
            if j + 1 < num_events {
                let coupling = -mu / (s_after * s_after);
                hess[(j, j + 1)] += coupling;
                hess[(j + 1, j)] += coupling;
            }
        }
    }

    /// Fraction-to-boundary bound on a switching-time step.
    #[must_use]
    pub fn max_step(&self, ts: &[f64], dts: &DVector<f64>, t0: f64, tf: f64, tau: f64) -> f64 {
        let num_events = ts.len();
        if num_events == 0 {
            return 1.0;
        }
        let slacks = self.slacks(ts, t0, tf);
        let mut alpha: f64 = 1.0;
        for i in 0..=num_events {
            let d_dur = match i {
                0 => dts[0],
                _ if i == num_events => -dts[num_events - 1],
                _ => dts[i] - dts[i - 1],
            };
            if d_dur < 0.0 && slacks[i] > 0.0 {
                alpha = alpha.min(tau * slacks[i] / (-d_dur));
            }
        }
        alpha
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
