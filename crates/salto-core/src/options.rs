use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_max_iter() -> u32 {
    100
}
const fn default_kkt_tol() -> f64 {
    1.0e-7
}
const fn default_barrier_init() -> f64 {
    1.0e-3
}
const fn default_barrier_decay() -> f64 {
    0.5
}
const fn default_barrier_min() -> f64 {
    1.0e-6
}
const fn default_fraction_to_boundary() -> f64 {
    0.995
}
const fn default_max_backtracks() -> u32 {
    20
}
const fn default_step_reduction() -> f64 {
    0.75
}
const fn default_armijo_coeff() -> f64 {
    1.0e-4
}
const fn default_sto_reg_weight() -> f64 {
    1.0e-6
}
const fn default_initial_sto_reg() -> f64 {
    1.0e30
}
const fn default_sto_cond_threshold() -> f64 {
    1.0e8
}
const fn default_nthreads() -> usize {
    4
}

// ---------------------------------------------------------------------------
// SolverOptions
// ---------------------------------------------------------------------------

/// Solver configuration, immutable per solve call.
///
/// Two profiles are typical: a high-budget initialization profile
/// ([`SolverOptions::default`] with `max_iter` raised) used for the offline
/// solve, and a low-budget profile ([`SolverOptions::mpc`]) used at every
/// control tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Maximum outer iterations per solve call (default: 100).
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,

    /// Convergence threshold on the total KKT residual (default: 1e-7).
    #[serde(default = "default_kkt_tol")]
    pub kkt_tol: f64,

    /// Initial interior-point barrier parameter (default: 1e-3).
    #[serde(default = "default_barrier_init")]
    pub barrier_init: f64,

    /// Geometric shrink factor applied to the barrier after each accepted
    /// step (default: 0.5). The schedule is owned by the solver, not by the
    /// constraint terms.
    #[serde(default = "default_barrier_decay")]
    pub barrier_decay: f64,

    /// Barrier floor (default: 1e-6).
    #[serde(default = "default_barrier_min")]
    pub barrier_min: f64,

    /// Fraction-to-boundary rule keeping slacks and dwell durations strictly
    /// positive (default: 0.995).
    #[serde(default = "default_fraction_to_boundary")]
    pub fraction_to_boundary: f64,

    /// Maximum line-search backtracks before the step is declared a failure
    /// (default: 20).
    #[serde(default = "default_max_backtracks")]
    pub max_backtracks: u32,

    /// Multiplicative step-size reduction per backtrack (default: 0.75).
    #[serde(default = "default_step_reduction")]
    pub step_reduction: f64,

    /// Armijo sufficient-decrease coefficient (default: 1e-4).
    #[serde(default = "default_armijo_coeff")]
    pub armijo_coeff: f64,

    /// Square-regularization weight on switching times about the nominal
    /// schedule (default: 1e-6).
    #[serde(default = "default_sto_reg_weight")]
    pub sto_reg_weight: f64,

    /// Number of initial iterations during which `initial_sto_reg` freezes
    /// the switching times (default: 0).
    #[serde(default)]
    pub initial_sto_reg_iter: u32,

    /// Regularization magnitude used during the first
    /// `initial_sto_reg_iter` iterations (default: 1e30).
    #[serde(default = "default_initial_sto_reg")]
    pub initial_sto_reg: f64,

    /// Conditioning threshold on the switching-time Hessian above which the
    /// regularized formulation is forced (default: 1e8).
    #[serde(default = "default_sto_cond_threshold")]
    pub sto_cond_threshold: f64,

    /// Maximum mesh spacing; 0.0 leaves the spacing governed solely by the
    /// ideal interval `T / N` (default: 0.0).
    #[serde(default)]
    pub max_dt_mesh: f64,

    /// Worker threads for per-node linearization (default: 4).
    #[serde(default = "default_nthreads")]
    pub nthreads: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            kkt_tol: default_kkt_tol(),
            barrier_init: default_barrier_init(),
            barrier_decay: default_barrier_decay(),
            barrier_min: default_barrier_min(),
            fraction_to_boundary: default_fraction_to_boundary(),
            max_backtracks: default_max_backtracks(),
            step_reduction: default_step_reduction(),
            armijo_coeff: default_armijo_coeff(),
            sto_reg_weight: default_sto_reg_weight(),
            initial_sto_reg_iter: 0,
            initial_sto_reg: default_initial_sto_reg(),
            sto_cond_threshold: default_sto_cond_threshold(),
            max_dt_mesh: 0.0,
            nthreads: default_nthreads(),
        }
    }
}

impl SolverOptions {
    /// Low-budget profile for per-tick MPC re-solves: 2 iterations, no
    /// STO-freezing phase, mesh spacing capped at the ideal interval.
    #[must_use]
    pub fn mpc(horizon: f64, num_intervals: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let max_dt_mesh = horizon / num_intervals as f64;
        Self {
            max_iter: 2,
            initial_sto_reg_iter: 0,
            max_dt_mesh,
            ..Self::default()
        }
    }

    /// Validate option values. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.kkt_tol.is_finite() || self.kkt_tol <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "kkt_tol",
                message: format!("{} (must be positive)", self.kkt_tol),
            });
        }
        if self.barrier_init <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "barrier_init",
                message: format!("{} (must be positive)", self.barrier_init),
            });
        }
        if !(0.0..1.0).contains(&self.barrier_decay) {
            return Err(ConfigError::InvalidValue {
                field: "barrier_decay",
                message: format!("{} (must be in (0, 1))", self.barrier_decay),
            });
        }
        if !(0.0..1.0).contains(&self.fraction_to_boundary) {
            return Err(ConfigError::InvalidValue {
                field: "fraction_to_boundary",
                message: format!("{} (must be in (0, 1))", self.fraction_to_boundary),
            });
        }
        if !(0.0..1.0).contains(&self.step_reduction) || self.step_reduction == 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "step_reduction",
                message: format!("{} (must be in (0, 1))", self.step_reduction),
            });
        }
        if self.max_dt_mesh < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "max_dt_mesh",
                message: format!("{} (must be non-negative)", self.max_dt_mesh),
            });
        }
        if self.nthreads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "nthreads",
                message: "0 (must be positive)".into(),
            });
        }
        Ok(())
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let options: Self = toml::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
