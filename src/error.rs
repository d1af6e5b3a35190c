use thiserror::Error;

use crate::engine::Mode;

/// Main error type for the videofx library
#[derive(Error, Debug)]
pub enum VideoFxError {
    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Hand-off error: {0}")]
    HandOff(#[from] HandOffError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Errors raised while opening or reading a video asset
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Asset unavailable (no decodable video track): {locator}")]
    AssetUnavailable { locator: String },

    #[error("Failed to probe {locator}: {reason}")]
    ProbeFailed { locator: String, reason: String },

    #[error("Decoding failed: {reason}")]
    DecodeFailed { reason: String },

    #[error("No video session is open")]
    NoSession,
}

/// Filter lookup and application errors
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Filter not found: {name}")]
    NotFound { name: String },

    #[error("Filter failed: {filter} - {reason}")]
    EffectFailed { filter: String, reason: String },

    #[error("Filter configuration invalid: {details}")]
    InvalidConfig { details: String },
}

/// Export pipeline errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Writer setup failed: {reason}")]
    WriterSetup { reason: String },

    #[error("Writer cannot apply settings: {details}")]
    UnsupportedSettings { details: String },

    #[error("Failed to append frame: {reason}")]
    AppendFailed { reason: String },

    #[error("Failed to finalize output: {reason}")]
    FinalizeFailed { reason: String },

    #[error("Export cancelled")]
    Cancelled,

    #[error("Export worker panicked: {reason}")]
    WorkerPanicked { reason: String },

    #[error("Presentation time went backwards: {previous:.4}s -> {current:.4}s")]
    NonMonotonicTimestamp { previous: f64, current: f64 },
}

/// Errors reported by the external persistence collaborator
#[derive(Error, Debug)]
pub enum HandOffError {
    #[error("Failed to persist {path}: {reason}")]
    PersistFailed { path: String, reason: String },

    #[error("Failed to remove temporary artifact {path}: {reason}")]
    CleanupFailed { path: String, reason: String },
}

/// Mode guard violations on the engine handle
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cannot {requested} while {current}")]
    Busy { requested: &'static str, current: Mode },

    #[error("No video is open")]
    NoSession,

    #[error("No export is running")]
    NoExport,
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using VideoFxError
pub type Result<T> = std::result::Result<T, VideoFxError>;

impl VideoFxError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Source(SourceError::DecodeFailed { .. }) => true,
            // The caller can retry once the conflicting operation finishes
            Self::Engine(EngineError::Busy { .. }) => true,
            Self::HandOff(HandOffError::PersistFailed { .. }) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Source(SourceError::AssetUnavailable { locator }) => {
                format!("Could not open '{}'. Please check the file exists and contains a video track.", locator)
            }
            Self::Filter(FilterError::NotFound { name }) => {
                format!(
                    "Filter '{}' not found. Available filters: none, chrome, fade, instant, mono, noir, process, tonal, transfer",
                    name
                )
            }
            Self::Export(ExportError::WriterSetup { .. }) => {
                "Could not start writing the output video. Is FFmpeg installed?".to_string()
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
