//! Stand-in for the application's camera: a slow orbit around the box.

use glam::{Mat4, Vec3};

const TARGET: Vec3 = Vec3::new(0.0, 0.5, 0.0);
const DISTANCE: f32 = 3.5;
const HEIGHT: f32 = 1.8;
const ORBIT_SPEED: f32 = 0.01;

/// View-projection matrix for `frame`, depth mapped to `[0, 1]`.
pub fn orbit(frame: u64, aspect: f32) -> Mat4 {
    let angle = frame as f32 * ORBIT_SPEED;
    let eye = Vec3::new(DISTANCE * angle.sin(), HEIGHT, DISTANCE * angle.cos());
    let view = Mat4::look_at_rh(eye, TARGET, Vec3::Y);
    let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 20.0);
    projection * view
}
