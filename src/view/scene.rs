//! The fixed portrait scene: one perspective camera, a hemisphere light, a
//! directional key light and at most one attached rig.

use glam::{Mat4, Vec3};

use super::surface::GraphicsContext;
use crate::rig::{Rig, RigId};

/// Perspective camera framing a half-body portrait at eye height.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Vertical field of view in degrees
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
    pub position: Vec3,
    pub target: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y: 30.0,
            near: 0.1,
            far: 20.0,
            aspect: 1.0,
            position: Vec3::new(0.0, 1.35, 1.2),
            target: Vec3::new(0.0, 1.35, 0.0),
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// Sky/ground gradient ambient light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HemisphereLight {
    pub sky: [f32; 3],
    pub ground: [f32; 3],
    pub intensity: f32,
    /// Direction of the sky, as a position relative to the origin
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub color: [f32; 3],
    pub intensity: f32,
    pub position: Vec3,
    pub casts_shadow: bool,
}

impl DirectionalLight {
    /// Unit vector pointing from the scene toward the light.
    pub fn direction(&self) -> Vec3 {
        self.position.normalize_or_zero()
    }
}

/// The immutable two-light rig.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightRig {
    pub hemisphere: HemisphereLight,
    pub directional: DirectionalLight,
}

impl Default for LightRig {
    fn default() -> Self {
        Self {
            hemisphere: HemisphereLight {
                sky: rgb(0xffffff),
                ground: rgb(0x222244),
                intensity: 0.9,
                position: Vec3::Y,
            },
            directional: DirectionalLight {
                color: rgb(0xffffff),
                intensity: 1.2,
                position: Vec3::new(1.5, 2.0, 2.0),
                casts_shadow: false,
            },
        }
    }
}

fn rgb(hex: u32) -> [f32; 3] {
    [
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    ]
}

/// One entry of the scene's render list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneObject {
    Camera,
    HemisphereLight,
    DirectionalLight,
    Rig(RigId),
}

pub struct Scene {
    camera: Camera,
    lights: LightRig,
    rig: Option<Rig>,
    render_size: u32,
}

impl Scene {
    /// A fresh scene with the camera and lights and no rig.
    pub fn build() -> Self {
        Self {
            camera: Camera::default(),
            lights: LightRig::default(),
            rig: None,
            render_size: 0,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn lights(&self) -> &LightRig {
        &self.lights
    }

    pub fn rig(&self) -> Option<&Rig> {
        self.rig.as_ref()
    }

    /// Side of the square viewport set by the last `fit`.
    pub fn render_size(&self) -> u32 {
        self.render_size
    }

    /// Render objects in draw order.
    pub fn objects(&self) -> Vec<SceneObject> {
        let mut out = vec![
            SceneObject::Camera,
            SceneObject::HemisphereLight,
            SceneObject::DirectionalLight,
        ];
        out.extend(self.rig.as_ref().map(|r| SceneObject::Rig(r.id())));
        out
    }

    /// Fit the square viewport into a `width` x `height` box.
    ///
    /// The viewport side is the smaller dimension, centered in the box.
    pub fn fit(&mut self, width: u32, height: u32) -> u32 {
        self.render_size = width.min(height);
        self.camera.aspect = 1.0;
        tracing::debug!("Scene fit {}x{} -> {}", width, height, self.render_size);
        self.render_size
    }

    /// Attach `rig`, detaching and releasing any previous one first.
    pub fn attach_rig(&mut self, rig: Rig, context: &mut dyn GraphicsContext) {
        self.detach_rig(context);
        context.upload_rig(&rig);
        tracing::info!("Attached {} ({})", rig.id(), rig.source());
        self.rig = Some(rig);
    }

    /// Detach the current rig and release its GPU resources.
    pub fn detach_rig(&mut self, context: &mut dyn GraphicsContext) -> Option<RigId> {
        let rig = self.rig.take()?;
        let id = rig.id();
        context.release_rig(id);
        tracing::debug!("Detached {} ({} nodes)", id, rig.nodes().len());
        Some(id)
    }

    /// Step the attached rig, if any.
    pub fn update_rig(&mut self, dt: f32, now: std::time::Duration) {
        let camera = &self.camera;
        if let Some(rig) = self.rig.as_mut() {
            rig.update(dt, now, camera);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::prune::tests::sample_model;
    use crate::view::testing::RecordingBackend;
    use crate::view::surface::{GraphicsBackend, SurfaceConfig};

    fn context(backend: &RecordingBackend) -> Box<dyn GraphicsContext> {
        backend
            .create_context(&SurfaceConfig::new(100, 100))
            .expect("context")
    }

    #[test]
    fn test_build_camera_and_lights() {
        let scene = Scene::build();
        let cam = scene.camera();
        assert_eq!(cam.fov_y, 30.0);
        assert_eq!(cam.near, 0.1);
        assert_eq!(cam.far, 20.0);
        assert_eq!(cam.position, Vec3::new(0.0, 1.35, 1.2));
        assert_eq!(scene.lights().hemisphere.intensity, 0.9);
        assert_eq!(scene.lights().hemisphere.ground, rgb(0x222244));
        assert_eq!(scene.lights().directional.intensity, 1.2);
        assert!(!scene.lights().directional.casts_shadow);
        assert!(scene.rig().is_none());
    }

    #[test]
    fn test_build_is_idempotent() {
        let a = Scene::build();
        let b = Scene::build();
        assert_eq!(a.camera(), b.camera());
        assert_eq!(a.lights(), b.lights());
        assert_eq!(a.objects(), b.objects());
    }

    #[test]
    fn test_fit_is_square() {
        let mut scene = Scene::build();
        for (w, h) in [(800, 600), (300, 900), (420, 420), (1, 5000), (0, 10)] {
            let size = scene.fit(w, h);
            assert_eq!(size, w.min(h));
            assert_eq!(scene.render_size(), w.min(h));
            assert_eq!(scene.camera().aspect, 1.0);
        }
    }

    #[test]
    fn test_attach_replaces_previous_rig() {
        let backend = RecordingBackend::new();
        let mut ctx = context(&backend);
        let mut scene = Scene::build();

        let a = Rig::new("a.vrm", sample_model());
        let a_id = a.id();
        scene.attach_rig(a, ctx.as_mut());
        let b = Rig::new("b.vrm", sample_model());
        let b_id = b.id();
        scene.attach_rig(b, ctx.as_mut());

        assert_eq!(backend.released_rigs(), vec![a_id]);
        assert_eq!(backend.resident_rigs(), vec![b_id]);
        let rigs: Vec<_> = scene
            .objects()
            .into_iter()
            .filter(|o| matches!(o, SceneObject::Rig(_)))
            .collect();
        assert_eq!(rigs, vec![SceneObject::Rig(b_id)]);
    }

    #[test]
    fn test_detach_empty_scene_is_noop() {
        let backend = RecordingBackend::new();
        let mut ctx = context(&backend);
        let mut scene = Scene::build();
        assert_eq!(scene.detach_rig(ctx.as_mut()), None);
        assert!(backend.released_rigs().is_empty());
    }

    #[test]
    fn test_projection_uses_square_aspect() {
        let mut scene = Scene::build();
        scene.fit(640, 480);
        let p = scene.camera().projection_matrix();
        // x and y scale are equal when aspect is 1
        assert!((p.x_axis.x - p.y_axis.y).abs() < 1e-6);
    }
}
