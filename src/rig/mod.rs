//! The loaded avatar: a decoded VRM model plus its per-frame runtime state.

pub mod expression;
pub mod loader;
pub mod look_at;
pub mod pose;
pub mod prune;
pub mod skinning;
pub mod spring_bone;
pub mod vrm;

use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::view::scene::Camera;
use expression::ExpressionController;
use skinning::MeshPositions;
use spring_bone::SpringBoneSimulator;
use vrm::{VrmModel, VrmVersion};

static NEXT_RIG_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one loaded rig instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RigId(u64);

impl RigId {
    fn next() -> Self {
        Self(NEXT_RIG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rig#{}", self.0)
    }
}

/// Where the rig's eyes point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GazeTarget {
    /// Follow the scene camera every frame.
    Camera,
    /// A fixed world-space point.
    Point(Vec3),
}

/// An animatable avatar instance.
pub struct Rig {
    id: RigId,
    source: String,
    model: VrmModel,
    position: Vec3,
    yaw: f32,
    gaze: Option<GazeTarget>,
    springs: Option<SpringBoneSimulator>,
    expressions: ExpressionController,
    /// Seconds of animation since the rig was built
    elapsed: f32,
    /// Model-space vertex positions per mesh, refreshed by `update`
    skinned: Vec<MeshPositions>,
}

impl Rig {
    pub fn new(source: impl Into<String>, model: VrmModel) -> Self {
        let springs = SpringBoneSimulator::new(&model);
        let world = skinning::compute_world_transforms(&model, &HashMap::new());
        let skinned = (0..model.meshes.len())
            .map(|m| skinning::skin_vertices(&model, m, &skinning::base_positions(&model, m), &world))
            .collect();
        Self {
            id: RigId::next(),
            source: source.into(),
            model,
            position: Vec3::ZERO,
            yaw: 0.0,
            gaze: None,
            springs,
            expressions: ExpressionController::new(),
            elapsed: 0.0,
            skinned,
        }
    }

    pub fn id(&self) -> RigId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn model(&self) -> &VrmModel {
        &self.model
    }

    pub fn expressions(&self) -> &ExpressionController {
        &self.expressions
    }

    pub fn gaze_target(&self) -> Option<GazeTarget> {
        self.gaze
    }

    pub fn set_gaze_target(&mut self, target: Option<GazeTarget>) {
        self.gaze = target;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Model-to-world transform of the rig root.
    pub fn root_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(Quat::from_rotation_y(self.yaw), self.position)
    }

    /// Turn the rig toward the +Z camera.
    ///
    /// VRM 0.x (and plain glTF) models are authored facing -Z and need a
    /// half turn; VRM 1.0 models already face +Z.
    pub fn face_camera(&mut self) {
        self.yaw = match self.model.version {
            VrmVersion::V1 => 0.0,
            VrmVersion::V0 | VrmVersion::Unknown => PI,
        };
    }

    pub fn center_at_origin(&mut self) {
        self.position = Vec3::ZERO;
    }

    /// Post-processing applied when a load is accepted: gaze on the camera,
    /// facing it, standing at the origin.
    pub fn prepare_for_scene(&mut self) {
        self.set_gaze_target(Some(GazeTarget::Camera));
        self.face_camera();
        self.center_at_origin();
    }

    /// Node indices in depth-first order, roots first.
    pub fn nodes(&self) -> Vec<usize> {
        self.model.traverse()
    }

    /// Skinned positions of `mesh`, one vector per primitive.
    pub fn skinned_positions(&self, mesh: usize) -> Option<&MeshPositions> {
        self.skinned.get(mesh)
    }

    /// Advance pose, gaze, spring bones and blink by one frame and re-skin.
    ///
    /// `now` is the frame timestamp driving the blink cycle.
    pub fn update(&mut self, dt: f32, now: Duration, camera: &Camera) {
        self.elapsed += dt;
        let model = &self.model;

        let mut pose = pose::idle_pose(model, self.elapsed);
        let mut world = skinning::compute_world_transforms(model, &pose);

        if let Some(target) = self.gaze {
            let point = match target {
                GazeTarget::Camera => camera.position,
                GazeTarget::Point(p) => p,
            };
            let local = self.root_matrix().inverse().transform_point3(point);
            let gaze = look_at::gaze_toward(model, &world, local);
            look_at::apply_to_eyes(model, gaze, &mut pose);
            for (name, weight) in look_at::expression_weights(&model.look_at, gaze) {
                self.expressions.set(model, name, weight);
            }
        }

        if let Some(springs) = self.springs.as_mut() {
            world = skinning::compute_world_transforms(model, &pose);
            pose.extend(springs.step(model, &world, &pose, dt));
        }
        world = skinning::compute_world_transforms(model, &pose);

        self.expressions
            .set(model, "blink", expression::blink(now.as_secs_f32()));
        let morphs = self.expressions.morph_weights(model);

        for (mesh, out) in self.skinned.iter_mut().enumerate() {
            let base = match morphs.get(&mesh) {
                Some(weights) => skinning::apply_morph_targets(model, mesh, weights),
                None => skinning::base_positions(model, mesh),
            };
            *out = skinning::skin_vertices(model, mesh, &base, &world);
        }
    }
}

impl fmt::Debug for Rig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rig")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("version", &self.model.version)
            .field("meshes", &self.model.meshes.len())
            .field("nodes", &self.model.node_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::prune::tests::sample_model;
    use crate::rig::vrm::ExpressionBind;
    use crate::view::scene::Scene;

    #[test]
    fn test_ids_are_unique() {
        let a = Rig::new("a.vrm", sample_model());
        let b = Rig::new("a.vrm", sample_model());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_v0_faces_camera_with_half_turn() {
        let mut rig = Rig::new("a.vrm", sample_model());
        rig.prepare_for_scene();
        assert!((rig.yaw() - PI).abs() < 1e-6);
        assert_eq!(rig.position(), Vec3::ZERO);
        assert_eq!(rig.gaze_target(), Some(GazeTarget::Camera));
        // model -Z now points at the camera (+Z)
        let forward = rig.root_matrix().transform_vector3(-Vec3::Z);
        assert!((forward - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_v1_needs_no_turn() {
        let mut model = sample_model();
        model.version = VrmVersion::V1;
        let mut rig = Rig::new("a.vrm", model);
        rig.face_camera();
        assert_eq!(rig.yaw(), 0.0);
    }

    #[test]
    fn test_update_reskins_every_mesh() {
        let mut rig = Rig::new("a.vrm", sample_model());
        rig.prepare_for_scene();
        let scene = Scene::build();
        rig.update(1.0 / 60.0, Duration::from_millis(16), scene.camera());
        let skinned = rig.skinned_positions(0).expect("mesh 0");
        assert_eq!(skinned[0].len(), 5);
    }

    #[test]
    fn test_blink_drives_morphs() {
        let mut model = sample_model();
        model.expression_binds.insert(
            "blink".into(),
            vec![ExpressionBind {
                mesh: 0,
                morph_index: 0,
                weight: 1.0,
            }],
        );
        let mut rig = Rig::new("a.vrm", model);
        let scene = Scene::build();

        rig.update(0.0, Duration::ZERO, scene.camera());
        assert_eq!(rig.expressions().get("blink"), 0.0);
        let open = rig.skinned_positions(0).expect("mesh")[0][0];

        // sin(2.7 t) peaks at t = pi / 5.4
        let peak = Duration::from_secs_f32(PI / 5.4);
        rig.update(0.0, peak, scene.camera());
        assert_eq!(rig.expressions().get("blink"), 1.0);
        let closed = rig.skinned_positions(0).expect("mesh")[0][0];
        // the blink morph in the sample rig shifts every vertex by +Y
        assert!((closed.y - open.y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_nodes_traversal() {
        let rig = Rig::new("a.vrm", sample_model());
        assert_eq!(rig.nodes(), vec![0, 1, 2]);
    }
}
