//! Error types shared across Snapcut crates.

use std::path::PathBuf;

/// Top-level error type for Snapcut operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapcutError {
    #[error("Setup error: {message}")]
    Setup { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Muxer error: {message}")]
    Muxer { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Pixel conversion error: {message}")]
    Conversion { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SnapcutError.
pub type SnapcutResult<T> = Result<T, SnapcutError>;

impl SnapcutError {
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn muxer(msg: impl Into<String>) -> Self {
        Self::Muxer {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error happened before any media was written.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::Setup { .. } | Self::Config { .. } | Self::Unsupported { .. }
        )
    }
}
