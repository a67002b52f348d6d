//! Shared setup for the salto demo binaries.

use std::sync::Arc;

use nalgebra::{DVector, Vector3};

use salto_contact::ContactStatus;
use salto_cost::{
    ConstraintSet, FrictionCone, JointPositionLimits, JointTorqueLimits, JointVelocityLimits,
};
use salto_robot::{PointFootQuadruped, QuadrupedParams, RobotModel};

/// The demo robot: the built-in A1-flavored point-foot quadruped.
#[must_use]
pub fn build_quadruped() -> Arc<PointFootQuadruped> {
    Arc::new(PointFootQuadruped::new(QuadrupedParams::default()))
}

/// All-feet-active status with contact points at the feet of `q`.
#[must_use]
pub fn standing_status(robot: &PointFootQuadruped, q: &DVector<f64>) -> ContactStatus {
    let mut status = robot.create_contact_status();
    let all: Vec<usize> = (0..robot.num_contacts()).collect();
    status.activate_contacts(&all);
    for i in 0..robot.num_contacts() {
        status.set_contact_point(i, robot.frame_position(q, i));
    }
    status
}

/// The standard constraint stack: joint limits plus a friction cone.
#[must_use]
pub fn standard_constraints(robot: &PointFootQuadruped, mu: f64) -> ConstraintSet {
    let limits = robot.joint_limits();
    let mut constraints = ConstraintSet::new();
    constraints.push_back(Box::new(JointPositionLimits::new(
        limits.position_lower,
        limits.position_upper,
    )));
    constraints.push_back(Box::new(JointVelocityLimits::from_bounds(&limits.velocity)));
    constraints.push_back(Box::new(JointTorqueLimits::from_bounds(&limits.torque)));
    constraints.push_back(Box::new(FrictionCone::new(mu)));
    constraints
}

/// Shift contact points by a displacement.
#[must_use]
pub fn shifted_points(points: &[Vector3<f64>], shift: &Vector3<f64>) -> Vec<Vector3<f64>> {
    points.iter().map(|p| p + shift).collect()
}
