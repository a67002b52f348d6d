//! Robot model adapter for the salto trajectory optimizer.
//!
//! The solver consumes robots through the [`RobotModel`] trait: dimension
//! queries, forward-kinematics frame positions, dynamics with analytic
//! Jacobians, and the impulse map applied at touchdown events. External
//! articulated-body providers implement the trait; [`PointFootQuadruped`]
//! is the built-in implementation used by the demos and tests.

pub mod model;
pub mod quadruped;

pub use model::{ContactKind, DynamicsJacobians, JointLimits, RobotModel, RobotSpec};
pub use quadruped::{PointFootQuadruped, QuadrupedParams};
