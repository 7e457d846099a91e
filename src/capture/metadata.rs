use crate::error::SinkError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Counters kept by the recording controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingStats {
    pub recordings_started: u64,
    pub recordings_completed: u64,
    pub recordings_failed: u64,
    pub units_written: u64,
    pub preroll_units_flushed: u64,
}

/// Sidecar written next to a finished recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub file: PathBuf,
    pub started_at: DateTime<Local>,
    pub stopped_at: DateTime<Local>,
    pub duration_seconds: f64,
    pub preroll_units: usize,
    pub units_written: u64,
    /// Size on disk after close, when the sink wrote a local file
    pub file_size_bytes: Option<u64>,
    pub record_duration_after_motion: f64,
    pub cooldown_duration: f64,
}

/// Sidecar path for a recording: same stem, `.json` extension
pub fn metadata_path(recording: &Path) -> PathBuf {
    recording.with_extension("json")
}

pub(crate) fn save_metadata(metadata: &RecordingMetadata) -> Result<PathBuf, SinkError> {
    let path = metadata_path(&metadata.file);

    let json = serde_json::to_string_pretty(metadata).map_err(|e| SinkError::Metadata {
        path: path.clone(),
        details: format!("Failed to serialize metadata: {}", e),
    })?;

    std::fs::write(&path, json).map_err(|e| SinkError::Metadata {
        path: path.clone(),
        details: format!("Failed to write metadata file: {}", e),
    })?;

    debug!("Saved metadata to {}", path.display());
    Ok(path)
}
