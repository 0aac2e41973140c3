//! Read-only view of a timeline as seen by the export engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The part of a project an export needs: its name and total duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub name: String,

    /// Timeline length in milliseconds.
    pub duration_ms: u64,
}

impl ProjectSnapshot {
    /// Longest timeline an export accepts: 24 hours.
    pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

    pub fn new(name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            duration_ms,
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let snapshot: Self = serde_json::from_str(&json).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        if snapshot.name.trim().is_empty() {
            return Err(ProjectError::ValidationError {
                message: format!("project at {} has an empty name", path.display()),
            });
        }
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check the duration is one the engine can time frames for.
    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.duration_ms > Self::MAX_DURATION_MS {
            return Err(ProjectError::ValidationError {
                message: format!(
                    "duration {}ms exceeds the {}ms limit",
                    self.duration_ms,
                    Self::MAX_DURATION_MS
                ),
            });
        }
        Ok(())
    }

    /// Write the snapshot as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProjectError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Errors that can occur when reading or writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}
