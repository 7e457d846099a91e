use crate::error::SinkError;
use crate::frame::EncodedUnit;
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Attempts at `_1`.. `_99` suffixes before giving up on a file name
pub const MAX_NAME_SUFFIX: u32 = 99;

/// Destination for recorded units. Each `open` yields an independent handle.
pub trait Sink: Send {
    /// Create a new recording at `path`. Must fail with an `AlreadyExists`
    /// I/O error rather than overwrite an existing recording.
    fn open(&mut self, path: &Path) -> Result<Box<dyn SinkHandle>, SinkError>;
}

/// An open recording
pub trait SinkHandle: Send {
    fn path(&self) -> &Path;

    fn write(&mut self, unit: &EncodedUnit) -> Result<(), SinkError>;

    /// Flush and close the recording
    fn close(self: Box<Self>) -> Result<(), SinkError>;
}

/// `motion_YYYYMMDD_HHMMSS`, optionally suffixed to avoid collisions
pub fn recording_stem(wall: &DateTime<Local>, suffix: u32) -> String {
    let stem = wall.format("motion_%Y%m%d_%H%M%S").to_string();
    if suffix == 0 {
        stem
    } else {
        format!("{}_{}", stem, suffix)
    }
}

/// Full recording path for a trigger time
pub fn recording_path(
    output_dir: &Path,
    wall: &DateTime<Local>,
    suffix: u32,
    extension: &str,
) -> PathBuf {
    output_dir.join(format!("{}.{}", recording_stem(wall, suffix), extension))
}

/// Writes each recording as a raw unit stream on the local filesystem
#[derive(Debug, Default)]
pub struct FileSink;

impl FileSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for FileSink {
    fn open(&mut self, path: &Path) -> Result<Box<dyn SinkHandle>, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| SinkError::Open {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!("Created recording directory: {}", parent.display());
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("Opened recording file {}", path.display());

        Ok(Box::new(FileSinkHandle {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            bytes_written: 0,
        }))
    }
}

struct FileSinkHandle {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl SinkHandle for FileSinkHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, unit: &EncodedUnit) -> Result<(), SinkError> {
        self.writer
            .write_all(&unit.payload)
            .map_err(|source| SinkError::Write {
                path: self.path.clone(),
                source,
            })?;
        self.bytes_written += unit.len() as u64;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), SinkError> {
        let synced = self
            .writer
            .flush()
            .and_then(|_| self.writer.get_ref().sync_all());
        if let Err(source) = synced {
            return Err(SinkError::Close {
                path: self.path.clone(),
                source,
            });
        }

        debug!(
            "Closed recording file {} ({} bytes)",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::time::Instant;

    fn wall() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap()
    }

    #[test]
    fn test_recording_names() {
        assert_eq!(recording_stem(&wall(), 0), "motion_20240309_070502");
        assert_eq!(recording_stem(&wall(), 3), "motion_20240309_070502_3");

        let path = recording_path(Path::new("clips"), &wall(), 0, "mjpeg");
        assert_eq!(path, PathBuf::from("clips/motion_20240309_070502.mjpeg"));
    }

    #[test]
    fn test_file_sink_writes_units_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clip.mjpeg");

        let mut sink = FileSink::new();
        let mut handle = sink.open(&path).unwrap();
        assert_eq!(handle.path(), path.as_path());

        let now = Instant::now();
        handle.write(&EncodedUnit::new(vec![1, 2], true, now)).unwrap();
        handle.write(&EncodedUnit::new(vec![3], false, now)).unwrap();
        handle.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_file_sink_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        fs::write(&path, b"existing").unwrap();

        let mut sink = FileSink::new();
        match sink.open(&path) {
            Err(SinkError::Open { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("existing recording was overwritten"),
        }
        assert_eq!(fs::read(&path).unwrap(), b"existing");
    }
}
