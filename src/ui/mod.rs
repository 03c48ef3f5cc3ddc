//! Native egui shell for the pet.
//!
//! Provides the always-on-top window, the wgpu graphics backend the avatar
//! view renders through, and the click-through toggle.
//!
//! Enabled via `--features native-ui`.

mod app;
pub mod renderer;
pub mod shell;
mod viewport;

pub use app::{EguiScheduler, PanelHost, PetApp};
pub use renderer::WgpuBackend;
pub use shell::ShellState;
