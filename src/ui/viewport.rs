//! egui-wgpu `CallbackTrait` implementation for the avatar surface.
//!
//! Rendering happens on the frame boundary in `AvatarView::on_frame`; the
//! paint callback only blits the finished offscreen target into egui's pass.

#![cfg(feature = "native-ui")]

use eframe::egui_wgpu;
use eframe::wgpu;
use std::sync::Arc;

use super::renderer::OffscreenTarget;
use crate::view::DrawingElement;

/// Paint callback for one drawing element appended to the window host.
pub struct SurfaceCallback {
    pub element: Arc<dyn DrawingElement>,
}

impl egui_wgpu::CallbackTrait for SurfaceCallback {
    fn prepare(
        &self,
        _device: &wgpu::Device,
        _queue: &wgpu::Queue,
        _screen_descriptor: &egui_wgpu::ScreenDescriptor,
        _egui_encoder: &mut wgpu::CommandEncoder,
        _callback_resources: &mut egui_wgpu::CallbackResources,
    ) -> Vec<wgpu::CommandBuffer> {
        Vec::new()
    }

    fn paint(
        &self,
        _info: eframe::egui::PaintCallbackInfo,
        render_pass: &mut wgpu::RenderPass<'static>,
        _callback_resources: &egui_wgpu::CallbackResources,
    ) {
        match self.element.as_any().downcast_ref::<OffscreenTarget>() {
            Some(target) => target.blit(render_pass),
            None => tracing::debug!("Unsupported drawing element {:?}", self.element.id()),
        }
    }
}
