//! Error types for vrmpet

use thiserror::Error;

/// Main error type for vrmpet
#[derive(Error, Debug)]
pub enum PetError {
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceCreationError),

    #[error("Rig error: {0}")]
    RigLoad(#[from] RigLoadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// No compatible render context could be obtained for a mount.
///
/// Fatal for that mount attempt only; the host keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCreationError {
    #[error("No compatible GPU adapter: {0}")]
    NoAdapter(String),

    #[error("Failed to create graphics context: {0}")]
    Context(String),

    #[error("Host element has no usable size ({width}x{height})")]
    ZeroSize { width: u32, height: u32 },
}

/// Fetching or decoding a rig failed.
///
/// Recoverable: the view keeps rendering the empty scene.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RigLoadError {
    #[error("Failed to fetch rig '{rig}': {reason}")]
    Fetch { rig: String, reason: String },

    #[error("Failed to decode rig '{rig}': {reason}")]
    Decode { rig: String, reason: String },

    #[error("Rig '{rig}' contains no renderable geometry")]
    Empty { rig: String },

    #[error("Load of rig '{rig}' was aborted")]
    Aborted { rig: String },
}

impl RigLoadError {
    /// Source identifier of the rig that failed.
    pub fn rig(&self) -> &str {
        match self {
            Self::Fetch { rig, .. }
            | Self::Decode { rig, .. }
            | Self::Empty { rig }
            | Self::Aborted { rig } => rig,
        }
    }

    /// Human-readable failure reason without the rig identifier.
    pub fn reason(&self) -> String {
        match self {
            Self::Fetch { reason, .. } | Self::Decode { reason, .. } => reason.clone(),
            Self::Empty { .. } => "no renderable geometry".to_string(),
            Self::Aborted { .. } => "aborted".to_string(),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Result type alias for vrmpet operations
pub type Result<T> = std::result::Result<T, PetError>;
