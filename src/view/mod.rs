//! The avatar view: render surface, scene, frame loop and their lifecycle.

pub mod controller;
pub mod driver;
pub mod scene;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{AvatarView, ViewDeps};
pub use driver::{AnimationDriver, DriverState, FrameRequest, FrameScheduler};
pub use scene::{Camera, Scene};
pub use surface::{
    DrawingElement, ElementId, GraphicsBackend, GraphicsContext, HostElement, RenderSurface,
    SurfaceConfig, SurfaceOptions,
};
