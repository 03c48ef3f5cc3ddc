//! vrmpet - Desktop VRM pet
//!
//! Renders an animated VRM avatar in a small always-on-top window:
//! - Asynchronous rig loading from files or URLs, last request wins
//! - Idle motion, gaze tracking, blinking and spring bone physics
//! - Transparent, click-through capable native window

pub mod config;
pub mod error;
pub mod rig;
pub mod view;

#[cfg(feature = "native-ui")]
pub mod ui;

pub use config::Config;
pub use error::{PetError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
