//! Mount/unmount orchestration of surface, scene, driver and loader.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use super::driver::{AnimationDriver, DriverState, FrameRequest, FrameScheduler};
use super::scene::Scene;
use super::surface::{
    GraphicsBackend, HostElement, RenderSurface, ResizeObserver, SurfaceOptions,
};
use crate::error::{RigLoadError, SurfaceCreationError};
use crate::rig::loader::{LoadOutcome, RigFetcher, RigLoader};
use crate::rig::{Rig, RigId};

pub type LoadedObserver = Box<dyn FnMut(&Rig)>;
pub type ErrorObserver = Box<dyn FnMut(&RigLoadError)>;

/// Collaborators a view needs for its whole life.
pub struct ViewDeps {
    pub backend: Arc<dyn GraphicsBackend>,
    pub host: Arc<dyn HostElement>,
    pub scheduler: Arc<dyn FrameScheduler>,
    pub fetcher: Arc<dyn RigFetcher>,
    pub runtime: Handle,
    pub options: SurfaceOptions,
}

/// Everything acquired by one mount. Field order is not drop order;
/// `AvatarView::unmount` tears it down explicitly.
struct Mounted {
    surface: RenderSurface,
    scene: Scene,
    resize: ResizeObserver,
    driver: AnimationDriver,
    loader: RigLoader,
}

/// Displays one rig source in a host element.
pub struct AvatarView {
    deps: ViewDeps,
    source: Option<String>,
    on_loaded: Option<LoadedObserver>,
    on_error: Option<ErrorObserver>,
    mounted: Option<Mounted>,
}

impl AvatarView {
    pub fn new(deps: ViewDeps) -> Self {
        Self {
            deps,
            source: None,
            on_loaded: None,
            on_error: None,
            mounted: None,
        }
    }

    pub fn on_loaded(mut self, f: impl FnMut(&Rig) + 'static) -> Self {
        self.on_loaded = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&RigLoadError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.mounted.as_ref().map(|m| &m.scene)
    }

    pub fn attached_rig(&self) -> Option<RigId> {
        self.scene().and_then(|s| s.rig()).map(|r| r.id())
    }

    pub fn driver_state(&self) -> Option<DriverState> {
        self.mounted.as_ref().map(|m| m.driver.state())
    }

    pub fn frames(&self) -> u64 {
        self.mounted.as_ref().map_or(0, |m| m.driver.frames())
    }

    /// Token of the next frame the view wants.
    pub fn pending_frame(&self) -> Option<FrameRequest> {
        self.mounted.as_ref().and_then(|m| m.driver.pending())
    }

    pub fn is_loading(&self) -> bool {
        self.mounted.as_ref().is_some_and(|m| m.loader.is_pending())
    }

    /// Build the surface and scene, start rendering and begin loading
    /// `source`. Any previous mount is torn down first.
    pub fn mount(&mut self, source: &str) -> Result<(), SurfaceCreationError> {
        self.unmount();
        self.source = Some(source.to_string());

        let surface = RenderSurface::create(
            self.deps.backend.as_ref(),
            Arc::clone(&self.deps.host),
            self.deps.options,
        )?;
        let mut mounted = Mounted {
            surface,
            scene: Scene::build(),
            resize: ResizeObserver::observe(Arc::clone(&self.deps.host)),
            driver: AnimationDriver::new(),
            loader: RigLoader::new(self.deps.runtime.clone(), Arc::clone(&self.deps.fetcher)),
        };

        apply_resize(&mut mounted);
        mounted.driver.start(self.deps.scheduler.as_ref());
        mounted.loader.load(source);
        tracing::info!("Mounted avatar view for {}", source);

        self.mounted = Some(mounted);
        Ok(())
    }

    /// Switch to another rig source. Same source is a no-op.
    pub fn set_source(&mut self, source: &str) -> Result<(), SurfaceCreationError> {
        if self.source.as_deref() == Some(source) && self.is_mounted() {
            return Ok(());
        }
        self.mount(source)
    }

    /// Frame callback. Returns whether a frame was rendered.
    pub fn on_frame(&mut self, request: FrameRequest, now: Duration) -> bool {
        let Some(m) = self.mounted.as_mut() else {
            return false;
        };
        if m.driver.state() != DriverState::Running {
            return false;
        }

        apply_resize(m);

        for outcome in m.loader.poll_completed() {
            match outcome {
                LoadOutcome::Loaded { mut rig, .. } => {
                    let Some(ctx) = m.surface.context_mut() else {
                        continue;
                    };
                    rig.prepare_for_scene();
                    m.scene.attach_rig(rig, ctx);
                    if let (Some(observer), Some(rig)) = (self.on_loaded.as_mut(), m.scene.rig()) {
                        observer(rig);
                    }
                }
                LoadOutcome::Failed { error, .. } => {
                    tracing::warn!("Rig load failed: {}", error);
                    if let Some(observer) = self.on_error.as_mut() {
                        observer(&error);
                    }
                }
                LoadOutcome::Stale { .. } => {}
            }
        }

        let Some(ctx) = m.surface.context_mut() else {
            return false;
        };
        m.driver
            .on_frame(request, now, &mut m.scene, ctx, self.deps.scheduler.as_ref())
    }

    /// Tear down in dependency order. Safe to call repeatedly.
    pub fn unmount(&mut self) {
        let Some(mut m) = self.mounted.take() else {
            return;
        };
        m.driver.stop(self.deps.scheduler.as_ref());
        m.resize.disconnect();
        m.loader.cancel();
        if let Some(ctx) = m.surface.context_mut() {
            m.scene.detach_rig(ctx);
        }
        m.surface.dispose();
        tracing::info!(
            "Unmounted avatar view for {}",
            self.source.as_deref().unwrap_or("<none>")
        );
    }
}

impl Drop for AvatarView {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn apply_resize(m: &mut Mounted) {
    if let Some((w, h)) = m.resize.poll() {
        let size = m.scene.fit(w, h);
        m.surface.resize(size, size);
    }
}
