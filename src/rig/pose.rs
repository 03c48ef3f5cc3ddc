//! Procedural idle pose: shoulder relaxation, breathing, hip sway and a slow
//! arm pendulum. A pure function of elapsed time.

use glam::{EulerRot, Quat, Vec3};
use std::collections::HashMap;
use std::f32::consts::PI;

use super::vrm::VrmModel;

/// Local bone rotations keyed by node index.
pub type Pose = HashMap<usize, Quat>;

/// Multiply `delta` onto the current (or rest) rotation of a humanoid bone.
fn layer(pose: &mut Pose, model: &VrmModel, bone: &str, delta: Quat) {
    let Some(&node) = model.bone_to_node.get(bone) else {
        return;
    };
    let base = pose
        .get(&node)
        .copied()
        .unwrap_or(model.rest_rotations[node]);
    pose.insert(node, base * delta);
}

fn relax_shoulders(pose: &mut Pose, model: &VrmModel) {
    layer(pose, model, "leftShoulder", Quat::from_axis_angle(Vec3::Z, -0.05));
    layer(pose, model, "rightShoulder", Quat::from_axis_angle(Vec3::Z, 0.05));
}

fn breathe(pose: &mut Pose, model: &VrmModel, t: f32) {
    let angle = (t * 1.2 * PI).sin() * 0.008;
    layer(pose, model, "spine", Quat::from_axis_angle(Vec3::X, angle));
    layer(pose, model, "chest", Quat::from_axis_angle(Vec3::X, angle * 0.5));
}

fn sway(pose: &mut Pose, model: &VrmModel, t: f32) {
    let angle = (t * 0.4 * PI).sin() * 0.006;
    layer(pose, model, "hips", Quat::from_axis_angle(Vec3::Z, angle));
    // Head counters half the hip roll so the gaze stays level.
    layer(pose, model, "neck", Quat::from_axis_angle(Vec3::Z, -angle * 0.5));
}

fn swing_arms(pose: &mut Pose, model: &VrmModel, t: f32) {
    const AMP: f32 = 0.015;
    let phase = t * 0.8 * PI;
    for (upper, lower, offset) in [
        ("leftUpperArm", "leftLowerArm", 0.0),
        ("rightUpperArm", "rightLowerArm", PI * 0.5),
    ] {
        let swing = (phase + offset).sin() * AMP;
        layer(pose, model, upper, Quat::from_euler(EulerRot::YXZ, 0.0, swing, 0.0));
        let lag = (phase + offset - 0.3).sin() * AMP * 0.5;
        layer(pose, model, lower, Quat::from_axis_angle(Vec3::X, lag));
    }
}

/// Idle pose at `t` seconds since the rig was attached.
pub fn idle_pose(model: &VrmModel, t: f32) -> Pose {
    let mut pose = Pose::new();
    relax_shoulders(&mut pose, model);
    breathe(&mut pose, model, t);
    sway(&mut pose, model, t);
    swing_arms(&mut pose, model, t);
    pose
}
