use thiserror::Error;

/// Top-level error type for the salto workspace.
#[derive(Debug, Error)]
pub enum SaltoError {
    #[error("Contact sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Solve error: {0}")]
    Solve(#[from] SolveError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Malformed contact-sequence construction or mutation.
///
/// Copy + static payloads for cheap propagation in hot paths.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SequenceError {
    #[error("Switch time {given} is not after the previous switch time {prev}")]
    NonIncreasingSwitchTime { prev: f64, given: f64 },

    #[error("Event capacity exceeded: at most {max} discrete events allowed")]
    TooManyEvents { max: usize },

    #[error("Phase index {phase} out of range (sequence has {num_phases} phases)")]
    PhaseOutOfRange { phase: usize, num_phases: usize },

    #[error("Event index {event} out of range (sequence has {num_events} events)")]
    EventOutOfRange { event: usize, num_events: usize },

    #[error("Dwell-time vector length mismatch: expected {expected}, got {got}")]
    DwellTimeLengthMismatch { expected: usize, got: usize },

    #[error("Contact-point count mismatch: expected {expected}, got {got}")]
    ContactPointCountMismatch { expected: usize, got: usize },

    #[error("Sequence has no initial contact status; call init first")]
    Uninitialized,
}

/// Solver runtime failures surfaced to the caller.
///
/// Iteration exhaustion is deliberately *not* here: `MaxIterReached` is the
/// expected steady state in MPC use and is reported through
/// `SolveStatus` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("Line search failed to find an acceptable step within {backtracks} backtracks")]
    LineSearchFailure { backtracks: u32 },

    #[error("Solver not initialized: call init and init_constraints before solving")]
    NotInitialized,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}
