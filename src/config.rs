//! Configuration parsing and management for vrmpet

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, PetError};
use crate::view::SurfaceOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub avatar: AvatarConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PetError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> Result<Self, PetError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, PetError> {
        let paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("config/default.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PetError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid("window.size", "Window dimensions must be greater than 0"));
        }

        if parse_hex_color(&self.window.background_color).is_none() {
            return Err(invalid(
                "window.background_color",
                "Expected #rrggbb or #rrggbbaa",
            ));
        }

        let cap = self.window.device_pixel_ratio_cap;
        if cap.is_nan() || cap <= 0.0 {
            return Err(invalid(
                "window.device_pixel_ratio_cap",
                "Pixel ratio cap must be greater than 0",
            ));
        }

        if self.avatar.model.trim().is_empty() {
            return Err(invalid("avatar.model", "Model source must not be empty"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> PetError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Host window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub always_on_top: bool,
    /// Hide from the taskbar/dock
    pub skip_taskbar: bool,
    /// Window fill behind the avatar, `#rrggbb` or `#rrggbbaa`
    pub background_color: String,
    /// Start with pointer input passing through the window
    pub click_through: bool,
    pub transparent: bool,
    pub antialias: bool,
    pub device_pixel_ratio_cap: f32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 420,
            height: 420,
            always_on_top: true,
            skip_taskbar: true,
            background_color: "#0040ffff".to_string(),
            click_through: false,
            transparent: true,
            antialias: true,
            device_pixel_ratio_cap: 2.0,
        }
    }
}

impl WindowConfig {
    pub fn surface_options(&self) -> SurfaceOptions {
        SurfaceOptions {
            width: self.width,
            height: self.height,
            transparent: self.transparent,
            antialias: self.antialias,
            device_pixel_ratio_cap: self.device_pixel_ratio_cap,
        }
    }

    /// Background as RGBA bytes. Invalid strings fall back to transparent.
    pub fn background_rgba(&self) -> [u8; 4] {
        parse_hex_color(&self.background_color).unwrap_or([0, 0, 0, 0])
    }
}

/// Avatar settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// VRM source: file path, `file://` URL or `http(s)://` URL
    pub model: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            model: "assets/avatar.vrm".to_string(),
        }
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(s: &str) -> Option<[u8; 4]> {
    let hex = s.strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => {
            let nib = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
            Some([nib(0)?, nib(1)?, nib(2)?, 255])
        }
        6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => None,
    }
}

/// Get the platform-specific config directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("vrmpet");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/vrmpet");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/vrmpet");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("vrmpet");
        }
    }

    PathBuf::from(".")
}
