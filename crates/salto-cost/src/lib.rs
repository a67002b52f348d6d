//! Cost and constraint aggregators for the salto trajectory optimizer.
//!
//! Costs and inequality constraints are composable collections of terms,
//! each with a uniform evaluate/sensitivity contract over an [`EvalPoint`].
//! Insertion order defines iteration order only; contributions are summed
//! (costs) or stacked (constraints), so the mathematical result is
//! order-independent.
//!
//! Inequality constraints are handled interior-point style: each term's
//! residual `g ≤ 0` gets slack and multiplier variables, and a logarithmic
//! barrier is condensed into the per-node quadratic model. The barrier
//! parameter and its shrink schedule are owned by the solver, never by the
//! terms themselves.

pub mod com_cost;
pub mod config_cost;
pub mod constraints;
pub mod cost;
pub mod friction_cone;
pub mod joint_limits;
pub mod point;
pub mod task_cost;

pub use com_cost::ComCost;
pub use config_cost::ConfigurationCost;
pub use constraints::{ConstraintData, ConstraintSet, ConstraintTerm};
pub use cost::{CostFunction, CostTerm};
pub use friction_cone::FrictionCone;
pub use joint_limits::{JointPositionLimits, JointTorqueLimits, JointVelocityLimits};
pub use point::{EvalPoint, NodeLayout};
pub use task_cost::TaskSpace3dCost;
