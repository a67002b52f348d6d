// salto-core: Errors and solver options shared across the salto workspace.

pub mod error;
pub mod options;

pub use error::{ConfigError, SaltoError, SequenceError, SolveError};
pub use options::SolverOptions;
