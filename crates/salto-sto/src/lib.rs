//! Switching-time optimization (STO) layer.
//!
//! Treats each free contact-switch time as a scalar decision variable:
//! [`StoConstraints`] enforces minimum dwell times through a log barrier,
//! [`StoRegularization`] stabilizes the otherwise near-singular
//! time-scaling subproblem, and [`direction::solve_newton`] computes the
//! switching-time Newton step with an automatic regularized fallback when
//! the raw Hessian is ill-conditioned.

pub mod constraints;
pub mod cost;
pub mod direction;

pub use constraints::StoConstraints;
pub use cost::{StoCostFunction, StoCostTerm, StoRegularization, StoRegularizationKind};
pub use direction::{StoDirection, solve_newton};
