//! Gaze: turns a model-space target point into eye bone rotations or
//! look expressions, using the rig's authored range maps.

use glam::{EulerRot, Mat4, Quat, Vec3};

use super::pose::Pose;
use super::vrm::{LookAtConfig, LookAtKind, VrmModel, VrmVersion};

/// Gaze angles in degrees. Positive yaw turns toward the model's left,
/// positive pitch looks up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gaze {
    pub yaw: f32,
    pub pitch: f32,
}

/// Yaw/pitch from the rig's eyes to `target` (model space).
///
/// Returns a neutral gaze when the rig has no head bone.
pub fn gaze_toward(model: &VrmModel, world: &[Mat4], target: Vec3) -> Gaze {
    let Some(&head) = model.bone_to_node.get("head") else {
        return Gaze::default();
    };
    let eye = world[head].transform_point3(model.look_at.offset_from_head);
    let mut dir = target - eye;
    // VRM 0.x rigs face -Z in their own space.
    if matches!(model.version, VrmVersion::V0 | VrmVersion::Unknown) {
        dir = Vec3::new(-dir.x, dir.y, -dir.z);
    }
    if dir.length_squared() < 1e-10 {
        return Gaze::default();
    }
    let flat = (dir.x * dir.x + dir.z * dir.z).sqrt();
    Gaze {
        yaw: dir.x.atan2(dir.z).to_degrees(),
        pitch: dir.y.atan2(flat).to_degrees(),
    }
}

/// Per-eye (left, right) yaw and shared pitch after range mapping.
fn eye_angles(cfg: &LookAtConfig, gaze: Gaze) -> (f32, f32, f32) {
    let (left, right) = if gaze.yaw < 0.0 {
        (
            -cfg.horizontal_outer.map(gaze.yaw),
            -cfg.horizontal_inner.map(gaze.yaw),
        )
    } else {
        (
            cfg.horizontal_inner.map(gaze.yaw),
            cfg.horizontal_outer.map(gaze.yaw),
        )
    };
    let pitch = if gaze.pitch < 0.0 {
        -cfg.vertical_down.map(gaze.pitch)
    } else {
        cfg.vertical_up.map(gaze.pitch)
    };
    (left, right, pitch)
}

/// Rotate the eye bones toward `gaze`. No-op for expression-driven rigs.
pub fn apply_to_eyes(model: &VrmModel, gaze: Gaze, pose: &mut Pose) {
    if model.look_at.kind != LookAtKind::Bone {
        return;
    }
    let (left, right, pitch) = eye_angles(&model.look_at, gaze);
    for (bone, yaw) in [("leftEye", left), ("rightEye", right)] {
        let Some(&node) = model.bone_to_node.get(bone) else {
            continue;
        };
        let turn = Quat::from_euler(EulerRot::YXZ, yaw.to_radians(), -pitch.to_radians(), 0.0);
        pose.insert(node, model.rest_rotations[node] * turn);
    }
}

/// Weights for the four look expressions, clamped to 0..1.
///
/// All zero for bone-driven rigs.
pub fn expression_weights(cfg: &LookAtConfig, gaze: Gaze) -> [(&'static str, f32); 4] {
    let mut out = [
        ("lookLeft", 0.0),
        ("lookRight", 0.0),
        ("lookUp", 0.0),
        ("lookDown", 0.0),
    ];
    if cfg.kind != LookAtKind::Expression {
        return out;
    }
    let horizontal = cfg.horizontal_outer.map(gaze.yaw).min(1.0);
    if gaze.yaw >= 0.0 {
        out[0].1 = horizontal;
    } else {
        out[1].1 = horizontal;
    }
    if gaze.pitch >= 0.0 {
        out[2].1 = cfg.vertical_up.map(gaze.pitch).min(1.0);
    } else {
        out[3].1 = cfg.vertical_down.map(gaze.pitch).min(1.0);
    }
    out
}
