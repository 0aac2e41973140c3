//! Export progress events.

use serde::{Deserialize, Serialize};

/// Stages of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Preparing,
    Encoding,
    Finalizing,
    Completed,
    Error,
    Cancelled,
}

impl ExportStatus {
    /// Terminal statuses end the progress sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Encoding => "encoding",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Export progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    /// Frames processed so far.
    pub current_frame: u64,

    /// Total frames to process.
    pub total_frames: u64,

    /// Progress in percent [0.0, 100.0].
    pub progress_percent: f32,

    /// Wall time since the export started.
    pub elapsed_time_ms: u64,

    /// Estimated time remaining; 0 while unknown.
    pub estimated_time_remaining_ms: u64,

    pub status: ExportStatus,

    /// Error description for [`ExportStatus::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExportProgress {
    fn with_status(status: ExportStatus, current_frame: u64, total_frames: u64) -> Self {
        Self {
            current_frame,
            total_frames,
            progress_percent: 0.0,
            elapsed_time_ms: 0,
            estimated_time_remaining_ms: 0,
            status,
            message: None,
        }
    }

    pub fn preparing(total_frames: u64) -> Self {
        Self::with_status(ExportStatus::Preparing, 0, total_frames)
    }

    pub fn encoding(
        current_frame: u64,
        total_frames: u64,
        progress_percent: f32,
        elapsed_time_ms: u64,
        estimated_time_remaining_ms: u64,
    ) -> Self {
        Self {
            progress_percent,
            elapsed_time_ms,
            estimated_time_remaining_ms,
            ..Self::with_status(ExportStatus::Encoding, current_frame, total_frames)
        }
    }

    pub fn finalizing(current_frame: u64, total_frames: u64, elapsed_time_ms: u64) -> Self {
        Self {
            progress_percent: percent_of(current_frame, total_frames).min(99.0),
            elapsed_time_ms,
            ..Self::with_status(ExportStatus::Finalizing, current_frame, total_frames)
        }
    }

    pub fn completed(total_frames: u64, elapsed_time_ms: u64) -> Self {
        Self {
            progress_percent: 100.0,
            elapsed_time_ms,
            ..Self::with_status(ExportStatus::Completed, total_frames, total_frames)
        }
    }

    pub fn cancelled(current_frame: u64, total_frames: u64, elapsed_time_ms: u64) -> Self {
        Self {
            progress_percent: percent_of(current_frame, total_frames).min(99.0),
            elapsed_time_ms,
            ..Self::with_status(ExportStatus::Cancelled, current_frame, total_frames)
        }
    }

    pub fn error(
        current_frame: u64,
        total_frames: u64,
        elapsed_time_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            progress_percent: percent_of(current_frame, total_frames).min(99.0),
            elapsed_time_ms,
            message: Some(message.into()),
            ..Self::with_status(ExportStatus::Error, current_frame, total_frames)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// `current / total * 100`, or 0 when there is nothing to process.
pub fn percent_of(current: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (current as f64 / total as f64 * 100.0) as f32
}
