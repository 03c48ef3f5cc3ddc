//! Per-frame animation loop.
//!
//! The driver owns no timer. A [`FrameScheduler`] hands out one
//! [`FrameRequest`] token per requested frame and the host calls
//! [`AnimationDriver::on_frame`] with that token and a timestamp.

use std::time::Duration;

use super::scene::Scene;
use super::surface::GraphicsContext;

/// Token for one scheduled frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(pub u64);

/// Host frame-callback primitive.
pub trait FrameScheduler {
    fn request_frame(&self) -> FrameRequest;
    fn cancel_frame(&self, request: FrameRequest);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

/// Frame-to-frame delta tracking.
#[derive(Debug, Default, Clone)]
pub struct ClockState {
    last: Option<Duration>,
    elapsed: Duration,
}

impl ClockState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Seconds since the previous tick; 0 on the first tick or if `now`
    /// went backwards.
    pub fn tick(&mut self, now: Duration) -> f32 {
        let dt = match self.last {
            Some(last) => now.saturating_sub(last),
            None => Duration::ZERO,
        };
        self.last = Some(self.last.map_or(now, |last| last.max(now)));
        self.elapsed += dt;
        dt.as_secs_f32()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

pub struct AnimationDriver {
    state: DriverState,
    pending: Option<FrameRequest>,
    clock: ClockState,
    frames: u64,
}

impl Default for AnimationDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationDriver {
    pub fn new() -> Self {
        Self {
            state: DriverState::Idle,
            pending: None,
            clock: ClockState::default(),
            frames: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Frames rendered since start.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Token of the frame currently scheduled.
    pub fn pending(&self) -> Option<FrameRequest> {
        self.pending
    }

    pub fn start(&mut self, scheduler: &dyn FrameScheduler) {
        if self.state != DriverState::Idle {
            tracing::warn!("Animation driver start ignored in state {:?}", self.state);
            return;
        }
        self.clock.reset();
        self.state = DriverState::Running;
        self.pending = Some(scheduler.request_frame());
    }

    /// Run one frame if `request` is the pending token. Returns whether a
    /// frame was rendered.
    pub fn on_frame(
        &mut self,
        request: FrameRequest,
        now: Duration,
        scene: &mut Scene,
        context: &mut dyn GraphicsContext,
        scheduler: &dyn FrameScheduler,
    ) -> bool {
        if self.state != DriverState::Running || self.pending != Some(request) {
            return false;
        }
        self.pending = None;

        let dt = self.clock.tick(now);
        scene.update_rig(dt, now);
        context.render(scene);
        self.frames += 1;

        self.pending = Some(scheduler.request_frame());
        true
    }

    /// Stop for good. Safe in any state.
    pub fn stop(&mut self, scheduler: &dyn FrameScheduler) {
        if let Some(request) = self.pending.take() {
            scheduler.cancel_frame(request);
        }
        if self.state != DriverState::Stopped {
            tracing::debug!("Animation driver stopped after {} frames", self.frames);
        }
        self.state = DriverState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::surface::{GraphicsBackend, SurfaceConfig};
    use crate::view::testing::{ManualScheduler, RecordingBackend};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_clock_deltas() {
        let mut clock = ClockState::default();
        assert_eq!(clock.tick(ms(100)), 0.0);
        assert!((clock.tick(ms(116)) - 0.016).abs() < 1e-6);
        // backwards timestamps never yield negative time
        assert_eq!(clock.tick(ms(50)), 0.0);
        assert!((clock.tick(ms(132)) - 0.016).abs() < 1e-6);
        assert_eq!(clock.elapsed(), ms(32));
        clock.reset();
        assert_eq!(clock.tick(ms(500)), 0.0);
    }

    #[test]
    fn test_runs_and_reschedules() {
        let backend = RecordingBackend::new();
        let mut ctx = backend.create_context(&SurfaceConfig::new(64, 64)).unwrap();
        let scheduler = ManualScheduler::new();
        let mut scene = Scene::build();
        let mut driver = AnimationDriver::new();

        driver.start(&scheduler);
        assert_eq!(driver.state(), DriverState::Running);
        for i in 0..3 {
            let req = driver.pending().expect("frame scheduled");
            assert!(driver.on_frame(req, ms(i * 16), &mut scene, ctx.as_mut(), &scheduler));
        }
        assert_eq!(driver.frames(), 3);
        assert_eq!(backend.renders(), 3);
        assert_eq!(scheduler.requested(), 4);
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let backend = RecordingBackend::new();
        let mut ctx = backend.create_context(&SurfaceConfig::new(64, 64)).unwrap();
        let scheduler = ManualScheduler::new();
        let mut scene = Scene::build();
        let mut driver = AnimationDriver::new();

        driver.start(&scheduler);
        let first = driver.pending().unwrap();
        assert!(driver.on_frame(first, ms(0), &mut scene, ctx.as_mut(), &scheduler));
        // same token again
        assert!(!driver.on_frame(first, ms(16), &mut scene, ctx.as_mut(), &scheduler));
        assert_eq!(driver.frames(), 1);
    }

    #[test]
    fn test_idle_driver_renders_nothing() {
        let backend = RecordingBackend::new();
        let mut ctx = backend.create_context(&SurfaceConfig::new(64, 64)).unwrap();
        let scheduler = ManualScheduler::new();
        let mut driver = AnimationDriver::new();
        let rendered = driver.on_frame(
            FrameRequest(1),
            ms(0),
            &mut Scene::build(),
            ctx.as_mut(),
            &scheduler,
        );
        assert!(!rendered);
        assert_eq!(backend.renders(), 0);
    }

    #[test]
    fn test_stop_is_idempotent_and_final() {
        let backend = RecordingBackend::new();
        let mut ctx = backend.create_context(&SurfaceConfig::new(64, 64)).unwrap();
        let scheduler = ManualScheduler::new();
        let mut scene = Scene::build();
        let mut driver = AnimationDriver::new();

        driver.start(&scheduler);
        let req = driver.pending().unwrap();
        driver.stop(&scheduler);
        driver.stop(&scheduler);
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(scheduler.cancelled(), vec![req]);

        assert!(!driver.on_frame(req, ms(16), &mut scene, ctx.as_mut(), &scheduler));
        driver.start(&scheduler);
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(backend.renders(), 0);
    }

    #[test]
    fn test_stop_before_start() {
        let scheduler = ManualScheduler::new();
        let mut driver = AnimationDriver::new();
        driver.stop(&scheduler);
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(scheduler.cancelled().is_empty());
    }
}
