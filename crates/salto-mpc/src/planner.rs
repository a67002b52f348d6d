use std::sync::Arc;

use nalgebra::{DVector, Rotation3, Vector3};

use salto_robot::RobotModel;

/// Plans takeoff and landing contact placements for a jump.
///
/// The landing points are the current stance points rotated about the base
/// by the jump yaw and translated by the jump length, so the foot geometry
/// is preserved through the flight.
#[derive(Clone)]
pub struct JumpFootStepPlanner {
    model: Arc<dyn RobotModel>,
    jump_length: Vector3<f64>,
    jump_yaw: f64,
}

impl JumpFootStepPlanner {
    /// Planner with a zero jump pattern.
    #[must_use]
    pub fn new(model: Arc<dyn RobotModel>) -> Self {
        Self {
            model,
            jump_length: Vector3::zeros(),
            jump_yaw: 0.0,
        }
    }

    /// Set the jump displacement and yaw rotation.
    pub fn set_jump_pattern(&mut self, jump_length: Vector3<f64>, jump_yaw: f64) {
        self.jump_length = jump_length;
        self.jump_yaw = jump_yaw;
    }

    /// Jump displacement.
    #[must_use]
    pub const fn jump_length(&self) -> &Vector3<f64> {
        &self.jump_length
    }

    /// Jump yaw rotation.
    #[must_use]
    pub const fn jump_yaw(&self) -> f64 {
        self.jump_yaw
    }

    /// Stance points at the configuration `q` (forward kinematics).
    #[must_use]
    pub fn stance_points(&self, q: &DVector<f64>) -> Vec<Vector3<f64>> {
        (0..self.model.num_contacts())
            .map(|i| self.model.frame_position(q, i))
            .collect()
    }

    /// Landing points: stance points rotated about the base by the jump
    /// yaw, then shifted by the jump length.
    #[must_use]
    pub fn landing_points(&self, q: &DVector<f64>) -> Vec<Vector3<f64>> {
        let base = Vector3::new(q[0], q[1], 0.0);
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), self.jump_yaw);
        self.stance_points(q)
            .iter()
            .map(|p| {
                let mut landed = base + rot * (p - base) + self.jump_length;
                landed.z = p.z;
                landed
            })
            .collect()
    }
}
