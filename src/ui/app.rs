//! The pet window: an undecorated eframe viewport hosting one `AvatarView`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use eframe::egui;
use tokio::runtime::Handle;

use super::renderer::WgpuBackend;
use super::shell::{spawn_signal_toggle, ShellState};
use super::viewport::SurfaceCallback;
use crate::config::Config;
use crate::rig::loader::SourceFetcher;
use crate::view::{
    AvatarView, DrawingElement, ElementId, FrameRequest, FrameScheduler, HostElement, ViewDeps,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct PanelState {
    size: (u32, u32),
    pixel_ratio: f32,
    children: Vec<Arc<dyn DrawingElement>>,
}

/// The window's central panel, seen by the view as its host element.
pub struct PanelHost {
    state: Mutex<PanelState>,
}

impl PanelHost {
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Self {
        Self {
            state: Mutex::new(PanelState {
                size: (width, height),
                pixel_ratio,
                children: Vec::new(),
            }),
        }
    }

    pub fn set_box_size(&self, width: u32, height: u32) {
        lock(&self.state).size = (width, height);
    }

    pub fn children(&self) -> Vec<Arc<dyn DrawingElement>> {
        lock(&self.state).children.clone()
    }
}

impl HostElement for PanelHost {
    fn box_size(&self) -> (u32, u32) {
        lock(&self.state).size
    }

    fn device_pixel_ratio(&self) -> f32 {
        lock(&self.state).pixel_ratio
    }

    fn append_child(&self, element: Arc<dyn DrawingElement>) {
        lock(&self.state).children.push(element);
    }

    fn remove_child(&self, id: ElementId) {
        lock(&self.state).children.retain(|c| c.id() != id);
    }
}

/// Frame callbacks on top of egui's repaint requests.
///
/// A request asks egui for another pass; the app runs the pending token on
/// that pass.
pub struct EguiScheduler {
    ctx: egui::Context,
    next: AtomicU64,
    pending: Mutex<Option<FrameRequest>>,
}

impl EguiScheduler {
    pub fn new(ctx: egui::Context) -> Self {
        Self {
            ctx,
            next: AtomicU64::new(1),
            pending: Mutex::new(None),
        }
    }

    pub fn take_pending(&self) -> Option<FrameRequest> {
        lock(&self.pending).take()
    }
}

impl FrameScheduler for EguiScheduler {
    fn request_frame(&self) -> FrameRequest {
        let request = FrameRequest(self.next.fetch_add(1, Ordering::Relaxed));
        *lock(&self.pending) = Some(request);
        self.ctx.request_repaint();
        request
    }

    fn cancel_frame(&self, request: FrameRequest) {
        let mut pending = lock(&self.pending);
        if *pending == Some(request) {
            *pending = None;
        }
    }
}

/// Last load status, written by the view's observers.
#[derive(Default)]
struct Status {
    loaded: Option<String>,
    error: Option<String>,
}

pub struct PetApp {
    view: AvatarView,
    host: Arc<PanelHost>,
    scheduler: Arc<EguiScheduler>,
    shell: ShellState,
    status: Rc<RefCell<Status>>,
    background: [u8; 4],
    start_time: Instant,
}

impl PetApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: &Config, runtime: Handle) -> Self {
        let window = &config.window;
        let host = Arc::new(PanelHost::new(
            window.width,
            window.height,
            cc.egui_ctx.pixels_per_point(),
        ));
        let scheduler = Arc::new(EguiScheduler::new(cc.egui_ctx.clone()));
        let status = Rc::new(RefCell::new(Status::default()));

        let loaded = Rc::clone(&status);
        let failed = Rc::clone(&status);
        let mut view = AvatarView::new(ViewDeps {
            backend: Arc::new(WgpuBackend::new(cc.wgpu_render_state.as_ref())),
            host: host.clone(),
            scheduler: scheduler.clone(),
            fetcher: Arc::new(SourceFetcher::new()),
            runtime: runtime.clone(),
            options: window.surface_options(),
        })
        .on_loaded(move |rig| {
            let mut s = loaded.borrow_mut();
            s.loaded = Some(rig.source().to_string());
            s.error = None;
        })
        .on_error(move |err| {
            failed.borrow_mut().error = Some(err.to_string());
        });

        if let Err(e) = view.mount(&config.avatar.model) {
            tracing::error!("Failed to create render surface: {}", e);
            status.borrow_mut().error = Some(e.to_string());
        }

        let shell = ShellState::new(window.click_through);
        let ctx = cc.egui_ctx.clone();
        spawn_signal_toggle(&runtime, shell.toggle_handle(), move || ctx.request_repaint());

        Self {
            view,
            host,
            scheduler,
            shell,
            status,
            background: window.background_rgba(),
            start_time: Instant::now(),
        }
    }

    /// Open the pet window. Blocks until it closes.
    pub fn run(config: Config, runtime: Handle) -> eframe::Result {
        let window = &config.window;
        let mut viewport = egui::ViewportBuilder::default()
            .with_title(crate::NAME)
            .with_inner_size([window.width as f32, window.height as f32])
            .with_resizable(false)
            .with_decorations(false)
            .with_transparent(window.transparent)
            .with_taskbar(!window.skip_taskbar)
            .with_mouse_passthrough(window.click_through);
        if window.always_on_top {
            viewport = viewport.with_window_level(egui::WindowLevel::AlwaysOnTop);
        }

        let options = eframe::NativeOptions {
            viewport,
            renderer: eframe::Renderer::Wgpu,
            ..Default::default()
        };

        eframe::run_native(
            crate::NAME,
            options,
            Box::new(move |cc| Ok(Box::new(Self::new(cc, &config, runtime)))),
        )
    }

    fn paint_surface(&self, ui: &egui::Ui, panel: egui::Rect) {
        let side = self
            .view
            .scene()
            .map_or(0.0, |scene| scene.render_size() as f32);
        if side <= 0.0 {
            return;
        }
        let rect = egui::Rect::from_center_size(panel.center(), egui::vec2(side, side));
        for element in self.host.children() {
            ui.painter().add(eframe::egui_wgpu::Callback::new_paint_callback(
                rect,
                SurfaceCallback { element },
            ));
        }
    }
}

impl eframe::App for PetApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let hotkey = ctx.input(|i| {
            i.modifiers.ctrl && i.modifiers.shift && i.key_pressed(egui::Key::C)
        });
        if let Some(passthrough) = self.shell.poll(hotkey) {
            ctx.send_viewport_cmd(egui::ViewportCommand::MousePassthrough(passthrough));
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                let panel = ui.max_rect();
                self.host
                    .set_box_size(panel.width().round() as u32, panel.height().round() as u32);

                // Drag the borderless window around by the avatar
                let response = ui.interact(panel, ui.id().with("pet_drag"), egui::Sense::drag());
                if response.drag_started() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::StartDrag);
                }

                if let Some(request) = self.scheduler.take_pending() {
                    self.view.on_frame(request, self.start_time.elapsed());
                }
                self.paint_surface(ui, panel);

                let status = self.status.borrow();
                if let Some(err) = status.error.as_ref() {
                    ui.colored_label(egui::Color32::RED, err);
                } else if status.loaded.is_none() && self.view.is_loading() {
                    ui.label("Loading...");
                }
            });
    }

    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        let [r, g, b, a] = self.background;
        egui::Rgba::from(egui::Color32::from_rgba_unmultiplied(r, g, b, a)).to_array()
    }
}
