//! Render surface: a graphics context plus the drawing element it puts into a
//! host container.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::scene::Scene;
use crate::error::SurfaceCreationError;
use crate::rig::{Rig, RigId};

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(u64);

impl ElementId {
    pub fn next() -> Self {
        Self(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Something a graphics context draws into and a host can display.
pub trait DrawingElement: Any + Send + Sync {
    fn id(&self) -> ElementId;
    fn as_any(&self) -> &dyn Any;
}

/// Container the view renders into.
pub trait HostElement: Send + Sync {
    /// Logical (unscaled) size of the container box.
    fn box_size(&self) -> (u32, u32);
    fn device_pixel_ratio(&self) -> f32;
    fn append_child(&self, element: Arc<dyn DrawingElement>);
    fn remove_child(&self, id: ElementId);
}

/// Parameters for a new graphics context, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub transparent: bool,
    pub antialias: bool,
}

impl SurfaceConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            transparent: true,
            antialias: true,
        }
    }
}

/// Factory for graphics contexts.
pub trait GraphicsBackend {
    fn create_context(
        &self,
        config: &SurfaceConfig,
    ) -> Result<Box<dyn GraphicsContext>, SurfaceCreationError>;
}

/// A live rendering context and its per-rig GPU resources.
pub trait GraphicsContext {
    fn drawing_element(&self) -> Arc<dyn DrawingElement>;
    /// Resize the backing buffer (physical pixels).
    fn resize(&mut self, width: u32, height: u32);
    fn upload_rig(&mut self, rig: &Rig);
    fn release_rig(&mut self, id: RigId);
    fn render(&mut self, scene: &Scene);
    /// Free every GPU resource. Called once, right before the context drops.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceOptions {
    pub width: u32,
    pub height: u32,
    pub transparent: bool,
    pub antialias: bool,
    pub device_pixel_ratio_cap: f32,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            width: 420,
            height: 420,
            transparent: true,
            antialias: true,
            device_pixel_ratio_cap: 2.0,
        }
    }
}

pub struct RenderSurface {
    host: Arc<dyn HostElement>,
    context: Option<Box<dyn GraphicsContext>>,
    element: Option<ElementId>,
    pixel_ratio: f32,
    width: u32,
    height: u32,
    transparent: bool,
}

impl RenderSurface {
    /// Obtain a context and insert its drawing element into `host`.
    pub fn create(
        backend: &dyn GraphicsBackend,
        host: Arc<dyn HostElement>,
        options: SurfaceOptions,
    ) -> Result<Self, SurfaceCreationError> {
        let pixel_ratio = host
            .device_pixel_ratio()
            .min(options.device_pixel_ratio_cap)
            .max(f32::EPSILON);
        let width = physical(options.width, pixel_ratio);
        let height = physical(options.height, pixel_ratio);
        if width == 0 || height == 0 {
            let err = SurfaceCreationError::ZeroSize {
                width: options.width,
                height: options.height,
            };
            tracing::error!("Render surface creation failed: {}", err);
            return Err(err);
        }

        let config = SurfaceConfig {
            width,
            height,
            transparent: options.transparent,
            antialias: options.antialias,
        };
        let context = backend.create_context(&config).map_err(|err| {
            tracing::error!("Render surface creation failed: {}", err);
            err
        })?;

        let element = context.drawing_element();
        let id = element.id();
        host.append_child(element);
        tracing::info!(
            "Render surface {}x{} (pixel ratio {:.2}, transparent: {})",
            width,
            height,
            pixel_ratio,
            options.transparent
        );

        Ok(Self {
            host,
            context: Some(context),
            element: Some(id),
            pixel_ratio,
            width,
            height,
            transparent: options.transparent,
        })
    }

    /// Resize to `width` x `height` logical pixels. Zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (w, h) = (physical(width, self.pixel_ratio), physical(height, self.pixel_ratio));
        if w == 0 || h == 0 || (w, h) == (self.width, self.height) {
            return;
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.resize(w, h);
            self.width = w;
            self.height = h;
        }
    }

    /// Physical pixel size of the backing buffer.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    pub fn is_disposed(&self) -> bool {
        self.context.is_none()
    }

    pub fn context_mut(&mut self) -> Option<&mut (dyn GraphicsContext + 'static)> {
        self.context.as_deref_mut()
    }

    /// Release the context and take the drawing element out of the host.
    pub fn dispose(&mut self) {
        if let Some(mut ctx) = self.context.take() {
            ctx.release();
        }
        if let Some(id) = self.element.take() {
            self.host.remove_child(id);
            tracing::debug!("Render surface disposed");
        }
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn physical(logical: u32, ratio: f32) -> u32 {
    (logical as f32 * ratio).round() as u32
}

/// Polls a host's box size and reports changes.
pub struct ResizeObserver {
    host: Option<Arc<dyn HostElement>>,
    last: Option<(u32, u32)>,
}

impl ResizeObserver {
    pub fn observe(host: Arc<dyn HostElement>) -> Self {
        Self {
            host: Some(host),
            last: None,
        }
    }

    /// New box size if it changed since the last poll (first poll always
    /// reports).
    pub fn poll(&mut self) -> Option<(u32, u32)> {
        let size = self.host.as_ref()?.box_size();
        if self.last == Some(size) {
            return None;
        }
        self.last = Some(size);
        Some(size)
    }

    pub fn disconnect(&mut self) {
        self.host = None;
    }

    pub fn is_connected(&self) -> bool {
        self.host.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::testing::{FakeHost, RecordingBackend};

    fn options() -> SurfaceOptions {
        SurfaceOptions {
            width: 200,
            height: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_appends_element() {
        let backend = RecordingBackend::new();
        let host = FakeHost::new(200, 100, 1.0);
        let surface = RenderSurface::create(&backend, host.clone(), options()).unwrap();
        assert_eq!(host.children().len(), 1);
        assert_eq!(surface.size(), (200, 100));
        assert_eq!(backend.contexts_created(), 1);
    }

    #[test]
    fn test_pixel_ratio_is_capped() {
        let backend = RecordingBackend::new();
        let host = FakeHost::new(200, 100, 3.0);
        let surface = RenderSurface::create(&backend, host, options()).unwrap();
        assert_eq!(surface.pixel_ratio(), 2.0);
        assert_eq!(surface.size(), (400, 200));
        assert_eq!(backend.last_config().map(|c| c.width), Some(400));
    }

    #[test]
    fn test_failure_leaves_host_untouched() {
        let backend = RecordingBackend::failing();
        let host = FakeHost::new(200, 100, 1.0);
        let err = RenderSurface::create(&backend, host.clone(), options())
            .err()
            .expect("must fail");
        assert!(matches!(err, SurfaceCreationError::NoAdapter(_)));
        assert!(host.children().is_empty());
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let backend = RecordingBackend::new();
        let host = FakeHost::new(0, 0, 1.0);
        let opts = SurfaceOptions {
            width: 0,
            ..options()
        };
        let err = RenderSurface::create(&backend, host, opts).err();
        assert!(matches!(err, Some(SurfaceCreationError::ZeroSize { .. })));
        assert_eq!(backend.contexts_created(), 0);
    }

    #[test]
    fn test_resize_keeps_context() {
        let backend = RecordingBackend::new();
        let host = FakeHost::new(200, 100, 2.0);
        let mut surface = RenderSurface::create(&backend, host, options()).unwrap();
        surface.resize(50, 50);
        assert_eq!(surface.size(), (100, 100));
        surface.resize(0, 50);
        assert_eq!(surface.size(), (100, 100));
        assert_eq!(backend.contexts_created(), 1);
        assert_eq!(backend.resizes(), vec![(100, 100)]);
    }

    #[test]
    fn test_dispose_releases_once() {
        let backend = RecordingBackend::new();
        let host = FakeHost::new(200, 100, 1.0);
        let mut surface = RenderSurface::create(&backend, host.clone(), options()).unwrap();
        surface.dispose();
        surface.dispose();
        drop(surface);
        assert_eq!(backend.contexts_released(), 1);
        assert!(host.children().is_empty());
        assert_eq!(host.removals(), 1);
    }

    #[test]
    fn test_drop_disposes() {
        let backend = RecordingBackend::new();
        let host = FakeHost::new(200, 100, 1.0);
        drop(RenderSurface::create(&backend, host.clone(), options()).unwrap());
        assert_eq!(backend.contexts_released(), 1);
        assert!(host.children().is_empty());
    }

    #[test]
    fn test_resize_observer_reports_changes() {
        let host = FakeHost::new(300, 200, 1.0);
        let mut observer = ResizeObserver::observe(host.clone());
        assert_eq!(observer.poll(), Some((300, 200)));
        assert_eq!(observer.poll(), None);
        host.set_box_size(500, 400);
        assert_eq!(observer.poll(), Some((500, 400)));
        observer.disconnect();
        host.set_box_size(10, 10);
        assert_eq!(observer.poll(), None);
    }
}
