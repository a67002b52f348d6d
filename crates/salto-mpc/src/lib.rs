//! Receding-horizon MPC for quadruped jumping.
//!
//! [`MpcJump`] wraps the OCP solver for closed-loop execution: an offline
//! high-iteration solve at [`init`](MpcJump::init) produces a good initial
//! trajectory, then every control tick re-solves the shifted horizon with
//! a small iteration budget, warm-started from the previous solution, and
//! hands back the feedback command. [`JumpFootStepPlanner`] turns a jump
//! pattern (length and yaw) into contact placements.

pub mod jump;
pub mod planner;

pub use jump::{MpcJump, MpcState};
pub use planner::JumpFootStepPlanner;
