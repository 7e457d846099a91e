//! In-memory collaborators shared by unit tests.

use crate::capture::{Sink, SinkHandle};
use crate::error::SinkError;
use crate::frame::EncodedUnit;
use chrono::{DateTime, Local, TimeZone};
use std::collections::HashSet;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub fn test_wall_clock() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
pub struct MemoryRecording {
    pub path: PathBuf,
    pub units: Vec<EncodedUnit>,
    pub closed: bool,
}

#[derive(Debug, Default)]
pub struct MemorySinkState {
    pub recordings: Vec<MemoryRecording>,
    pub existing: HashSet<PathBuf>,
    pub fail_open: bool,
    pub fail_writes: bool,
    /// Ordered log of sink operations, e.g. "open", "close"
    pub log: Vec<String>,
}

/// Sink that keeps recordings in memory behind a shared handle for inspection
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recordings(&self) -> Vec<MemoryRecording> {
        self.state.lock().unwrap().recordings.clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn mark_existing(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().existing.insert(path.into());
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }
}

impl Sink for MemorySink {
    fn open(&mut self, path: &Path) -> Result<Box<dyn SinkHandle>, SinkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(SinkError::Open {
                path: path.to_path_buf(),
                source: Error::new(ErrorKind::PermissionDenied, "read-only filesystem"),
            });
        }
        if !state.existing.insert(path.to_path_buf()) {
            return Err(SinkError::Open {
                path: path.to_path_buf(),
                source: Error::new(ErrorKind::AlreadyExists, "exists"),
            });
        }

        state.recordings.push(MemoryRecording {
            path: path.to_path_buf(),
            units: Vec::new(),
            closed: false,
        });
        state.log.push("open".to_string());

        Ok(Box::new(MemoryHandle {
            state: Arc::clone(&self.state),
            index: state.recordings.len() - 1,
            path: path.to_path_buf(),
        }))
    }
}

struct MemoryHandle {
    state: Arc<Mutex<MemorySinkState>>,
    index: usize,
    path: PathBuf,
}

impl SinkHandle for MemoryHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, unit: &EncodedUnit) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(SinkError::Write {
                path: self.path.clone(),
                source: Error::new(ErrorKind::Other, "no space left on device"),
            });
        }
        state.recordings[self.index].units.push(unit.clone());
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.recordings[self.index].closed = true;
        state.log.push("close".to_string());
        Ok(())
    }
}
