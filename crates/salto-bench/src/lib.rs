//! Logging and benchmark harnesses.
//!
//! [`Logger`] persists named variable streams as plain whitespace-delimited
//! numeric tables, one row per step, so downstream plotting tools can
//! consume them directly. [`convergence_sto`] drives the solver one
//! iteration at a time, logging switching times and the KKT residual, with
//! mesh refinement interleaved once the residual is small enough.

pub mod convergence;
pub mod logger;

pub use convergence::{ConvergenceOptions, ConvergenceResult, convergence_sto, cpu_time};
pub use logger::Logger;
