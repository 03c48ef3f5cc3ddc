//! Recording test doubles for the view's collaborators.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::driver::{FrameRequest, FrameScheduler};
use super::scene::Scene;
use super::surface::{
    DrawingElement, ElementId, GraphicsBackend, GraphicsContext, HostElement, SurfaceConfig,
};
use crate::error::{RigLoadError, SurfaceCreationError};
use crate::rig::loader::{build_rig, RigFetcher};
use crate::rig::prune::tests::sample_model;
use crate::rig::vrm::VrmModel;
use crate::rig::{Rig, RigId};

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct FakeElement {
    id: ElementId,
}

impl DrawingElement for FakeElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct HostState {
    size: (u32, u32),
    children: Vec<ElementId>,
    removals: usize,
}

pub struct FakeHost {
    ratio: f32,
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new(width: u32, height: u32, ratio: f32) -> Arc<Self> {
        Arc::new(Self {
            ratio,
            state: Mutex::new(HostState {
                size: (width, height),
                ..Default::default()
            }),
        })
    }

    pub fn set_box_size(&self, width: u32, height: u32) {
        lock(&self.state).size = (width, height);
    }

    pub fn children(&self) -> Vec<ElementId> {
        lock(&self.state).children.clone()
    }

    pub fn removals(&self) -> usize {
        lock(&self.state).removals
    }
}

impl HostElement for FakeHost {
    fn box_size(&self) -> (u32, u32) {
        lock(&self.state).size
    }

    fn device_pixel_ratio(&self) -> f32 {
        self.ratio
    }

    fn append_child(&self, element: Arc<dyn DrawingElement>) {
        lock(&self.state).children.push(element.id());
    }

    fn remove_child(&self, id: ElementId) {
        let mut state = lock(&self.state);
        state.children.retain(|c| *c != id);
        state.removals += 1;
    }
}

#[derive(Default)]
struct Record {
    created: usize,
    released: usize,
    renders: usize,
    resizes: Vec<(u32, u32)>,
    last_config: Option<SurfaceConfig>,
    uploads: Vec<RigId>,
    released_rigs: Vec<RigId>,
}

/// Backend whose contexts log every call into a shared record.
#[derive(Default)]
pub struct RecordingBackend {
    fail: bool,
    record: Arc<Mutex<Record>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with no usable adapter.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn contexts_created(&self) -> usize {
        lock(&self.record).created
    }

    pub fn contexts_released(&self) -> usize {
        lock(&self.record).released
    }

    pub fn renders(&self) -> usize {
        lock(&self.record).renders
    }

    pub fn resizes(&self) -> Vec<(u32, u32)> {
        lock(&self.record).resizes.clone()
    }

    pub fn last_config(&self) -> Option<SurfaceConfig> {
        lock(&self.record).last_config
    }

    pub fn uploads(&self) -> Vec<RigId> {
        lock(&self.record).uploads.clone()
    }

    pub fn released_rigs(&self) -> Vec<RigId> {
        lock(&self.record).released_rigs.clone()
    }

    /// Uploaded and not yet released.
    pub fn resident_rigs(&self) -> Vec<RigId> {
        let r = lock(&self.record);
        r.uploads
            .iter()
            .filter(|id| !r.released_rigs.contains(id))
            .copied()
            .collect()
    }
}

impl GraphicsBackend for RecordingBackend {
    fn create_context(
        &self,
        config: &SurfaceConfig,
    ) -> Result<Box<dyn GraphicsContext>, SurfaceCreationError> {
        if self.fail {
            return Err(SurfaceCreationError::NoAdapter("test backend".into()));
        }
        let mut r = lock(&self.record);
        r.created += 1;
        r.last_config = Some(*config);
        Ok(Box::new(RecordingContext {
            element: Arc::new(FakeElement {
                id: ElementId::next(),
            }),
            record: Arc::clone(&self.record),
            released: false,
        }))
    }
}

struct RecordingContext {
    element: Arc<FakeElement>,
    record: Arc<Mutex<Record>>,
    released: bool,
}

impl GraphicsContext for RecordingContext {
    fn drawing_element(&self) -> Arc<dyn DrawingElement> {
        self.element.clone()
    }

    fn resize(&mut self, width: u32, height: u32) {
        lock(&self.record).resizes.push((width, height));
    }

    fn upload_rig(&mut self, rig: &Rig) {
        lock(&self.record).uploads.push(rig.id());
    }

    fn release_rig(&mut self, id: RigId) {
        lock(&self.record).released_rigs.push(id);
    }

    fn render(&mut self, _scene: &Scene) {
        assert!(!self.released, "render after release");
        lock(&self.record).renders += 1;
    }

    fn release(&mut self) {
        assert!(!self.released, "context released twice");
        self.released = true;
        lock(&self.record).released += 1;
    }
}

#[derive(Default)]
struct SchedulerState {
    next: u64,
    requested: usize,
    cancelled: Vec<FrameRequest>,
}

/// Hands out sequential frame tokens; the test decides when frames run.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<SchedulerState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> usize {
        lock(&self.state).requested
    }

    pub fn cancelled(&self) -> Vec<FrameRequest> {
        lock(&self.state).cancelled.clone()
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&self) -> FrameRequest {
        let mut s = lock(&self.state);
        s.next += 1;
        s.requested += 1;
        FrameRequest(s.next)
    }

    fn cancel_frame(&self, request: FrameRequest) {
        lock(&self.state).cancelled.push(request);
    }
}

/// Serves the sample rig after a per-source delay; unknown sources fail.
#[derive(Default)]
pub struct FakeFetcher {
    delays: HashMap<String, u64>,
    empty: Vec<String>,
    edited: HashMap<String, fn(&mut VrmModel)>,
    panicking: Vec<String>,
    completed: Arc<Mutex<Vec<String>>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, source: &str, millis: u64) -> Self {
        self.delays.insert(source.to_string(), millis);
        self
    }

    /// Serve a model without geometry for `source`.
    pub fn with_empty(mut self, source: &str) -> Self {
        self.empty.push(source.to_string());
        self
    }

    /// Serve the sample rig altered by `edit` for `source`.
    pub fn with_edited(mut self, source: &str, edit: fn(&mut VrmModel)) -> Self {
        self.edited.insert(source.to_string(), edit);
        self
    }

    /// Panic while fetching `source`.
    pub fn with_panic(mut self, source: &str) -> Self {
        self.panicking.push(source.to_string());
        self
    }

    /// Sources whose fetch ran to completion.
    pub fn completed(&self) -> Vec<String> {
        lock(&self.completed).clone()
    }
}

fn empty_model() -> VrmModel {
    let mut model = sample_model();
    model.meshes.clear();
    model.mesh_skin.clear();
    model.mesh_node.clear();
    model
}

impl RigFetcher for FakeFetcher {
    fn fetch(&self, source: &str) -> BoxFuture<'static, Result<VrmModel, RigLoadError>> {
        let source = source.to_string();
        let completed = Arc::clone(&self.completed);
        let panics = self.panicking.contains(&source);
        let model = if self.empty.contains(&source) {
            Some((0, empty_model()))
        } else if let Some(edit) = self.edited.get(&source) {
            let mut model = sample_model();
            edit(&mut model);
            Some((0, model))
        } else {
            self.delays.get(&source).map(|&ms| (ms, sample_model()))
        };
        // Deadline fixed at request time, not first poll.
        let deadline = tokio::time::Instant::now();

        async move {
            if panics {
                panic!("fetcher crashed on {source}");
            }
            let Some((ms, model)) = model else {
                return Err(RigLoadError::Fetch {
                    rig: source,
                    reason: "not found".into(),
                });
            };
            tokio::time::sleep_until(deadline + Duration::from_millis(ms)).await;
            lock(&completed).push(source);
            Ok(model)
        }
        .boxed()
    }

    /// Builds inline so paused-clock tests stay deterministic.
    fn build(
        &self,
        source: &str,
        model: VrmModel,
    ) -> BoxFuture<'static, Result<Rig, RigLoadError>> {
        futures::future::ready(build_rig(source, model)).boxed()
    }
}
