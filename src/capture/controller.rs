use crate::config::RecordingConfig;
use crate::error::SinkError;
use crate::frame::EncodedUnit;
use crate::preroll::PreRollBuffer;
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::metadata::{save_metadata, RecordingMetadata, RecordingStats};
use super::sink::{recording_path, Sink, SinkHandle, MAX_NAME_SUFFIX};

/// Recording lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Recording,
    Cooldown,
}

/// What a controller step did
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    None,
    /// Idle -> Recording; `preroll_units` were flushed ahead of live units
    Started { path: PathBuf, preroll_units: usize },
    /// Motion pushed the end of the recording out to `record_until`
    Extended { record_until: Instant },
    /// Recording -> Cooldown
    Stopped {
        path: PathBuf,
        cooldown_until: Instant,
        units_written: u64,
        duration: Duration,
    },
    /// Cooldown -> Idle
    CooldownEnded,
}

/// Static controller settings
#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub output_dir: PathBuf,
    pub extension: String,
    pub record_after_motion: Duration,
    pub cooldown: Duration,
    pub save_metadata: bool,
}

impl RecordingSettings {
    pub fn from_config(config: &RecordingConfig, extension: &str) -> Self {
        Self {
            output_dir: config.output_path(),
            extension: extension.to_string(),
            record_after_motion: config.record_after_motion(),
            cooldown: config.cooldown(),
            save_metadata: config.save_metadata,
        }
    }
}

/// The single open recording
struct RecordingSession {
    handle: Box<dyn SinkHandle>,
    started_at: Instant,
    started_wall: DateTime<Local>,
    last_motion_at: Instant,
    record_until: Instant,
    preroll_units: usize,
    units_written: u64,
}

/// Motion-driven recording state machine.
///
/// Owns the sink, the optional pre-roll buffer and at most one open recording.
/// `step` is called once per driver cycle with the debounced motion signal;
/// `ingest` is called with every encoded unit afterwards.
pub struct RecordingController {
    settings: RecordingSettings,
    sink: Box<dyn Sink>,
    preroll: Option<PreRollBuffer>,
    state: ControllerState,
    session: Option<RecordingSession>,
    cooldown_until: Option<Instant>,
    stats: RecordingStats,
}

impl RecordingController {
    pub fn new(
        settings: RecordingSettings,
        sink: Box<dyn Sink>,
        preroll: Option<PreRollBuffer>,
    ) -> Self {
        info!(
            "Recording controller ready (output: {}, tail: {:?}, cooldown: {:?}, pre-roll: {})",
            settings.output_dir.display(),
            settings.record_after_motion,
            settings.cooldown,
            preroll
                .as_ref()
                .map(|p| format!("{:?}", p.window()))
                .unwrap_or_else(|| "disabled".to_string())
        );

        Self {
            settings,
            sink,
            preroll,
            state: ControllerState::Idle,
            session: None,
            cooldown_until: None,
            stats: RecordingStats::default(),
        }
    }

    /// Advance the state machine by one cycle.
    ///
    /// An `Err` means a recording could not be started; the controller is back
    /// in `Idle` and the next motion-active cycle retries.
    pub fn step(
        &mut self,
        motion_active: bool,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Result<Transition, SinkError> {
        match self.state {
            ControllerState::Idle => {
                if motion_active {
                    self.start_recording(now, wall)
                } else {
                    Ok(Transition::None)
                }
            }
            ControllerState::Recording => {
                let record_after_motion = self.settings.record_after_motion;
                let Some(session) = self.session.as_mut() else {
                    error!("Recording state without an open session; returning to idle");
                    self.state = ControllerState::Idle;
                    return Ok(Transition::None);
                };

                if motion_active {
                    session.last_motion_at = now;
                    session.record_until = now + record_after_motion;
                    debug!("Recording extended until {:?}", session.record_until);
                    Ok(Transition::Extended {
                        record_until: session.record_until,
                    })
                } else if now > session.record_until {
                    Ok(self.stop_recording(now, wall))
                } else {
                    Ok(Transition::None)
                }
            }
            ControllerState::Cooldown => Ok(self.expire_cooldown(now)),
        }
    }

    /// Leave cooldown once it has elapsed. A no-op in any other state.
    pub fn expire_cooldown(&mut self, now: Instant) -> Transition {
        if self.state != ControllerState::Cooldown {
            return Transition::None;
        }

        match self.cooldown_until {
            Some(until) if now < until => Transition::None,
            _ => {
                self.state = ControllerState::Idle;
                self.cooldown_until = None;
                info!("Cooldown ended; ready to record");
                Transition::CooldownEnded
            }
        }
    }

    /// Feed one encoded unit: buffered for pre-roll, and written while recording.
    ///
    /// A write failure closes the recording and returns the controller to `Idle`.
    pub fn ingest(&mut self, unit: EncodedUnit) -> Result<(), SinkError> {
        let written = match self.session.as_mut() {
            Some(session) => session.handle.write(&unit).map(|()| {
                session.units_written += 1;
                self.stats.units_written += 1;
            }),
            None => Ok(()),
        };

        if let Some(preroll) = self.preroll.as_mut() {
            preroll.push(unit);
        }

        if let Err(e) = written {
            self.abort_recording(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Whether the driver needs to encode frames this cycle
    pub fn wants_units(&self) -> bool {
        self.session.is_some() || self.preroll.is_some()
    }

    /// Close any open recording. Used on every driver exit path.
    pub fn finish(&mut self, now: Instant, wall: DateTime<Local>) -> Option<PathBuf> {
        let session = self.session.take()?;
        info!("Closing open recording for shutdown");
        let path = self.close_session(session, now, wall);
        self.state = ControllerState::Idle;
        self.cooldown_until = None;
        Some(path)
    }

    fn start_recording(
        &mut self,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Result<Transition, SinkError> {
        let mut handle = match self.open_unique(&wall) {
            Ok(handle) => handle,
            Err(e) => {
                self.stats.recordings_failed += 1;
                return Err(e);
            }
        };

        let preroll_units = match self.preroll.as_mut() {
            Some(preroll) => match preroll.flush_from_last_keyframe(handle.as_mut()) {
                Ok(count) => count,
                Err(e) => {
                    if let Err(close_err) = handle.close() {
                        warn!("Failed to close recording after pre-roll error: {}", close_err);
                    }
                    self.stats.recordings_failed += 1;
                    return Err(e);
                }
            },
            None => 0,
        };

        let path = handle.path().to_path_buf();
        info!(
            "Recording started: {} ({} pre-roll units)",
            path.display(),
            preroll_units
        );

        self.session = Some(RecordingSession {
            handle,
            started_at: now,
            started_wall: wall,
            last_motion_at: now,
            record_until: now + self.settings.record_after_motion,
            preroll_units,
            units_written: preroll_units as u64,
        });
        self.state = ControllerState::Recording;
        self.stats.recordings_started += 1;
        self.stats.preroll_units_flushed += preroll_units as u64;

        Ok(Transition::Started {
            path,
            preroll_units,
        })
    }

    /// Open `motion_<ts>.<ext>`, falling back to `_1`.. `_99` on collisions
    fn open_unique(&mut self, wall: &DateTime<Local>) -> Result<Box<dyn SinkHandle>, SinkError> {
        let dir = &self.settings.output_dir;
        let ext = &self.settings.extension;

        for suffix in 0..=MAX_NAME_SUFFIX {
            let path = recording_path(dir, wall, suffix, ext);
            match self.sink.open(&path) {
                Ok(handle) => return Ok(handle),
                Err(SinkError::Open { source, .. }) if source.kind() == ErrorKind::AlreadyExists => {
                    debug!("{} already exists; trying next name", path.display());
                }
                Err(e) => return Err(e),
            }
        }

        Err(SinkError::NameExhausted {
            path: recording_path(dir, wall, 0, ext),
        })
    }

    fn stop_recording(&mut self, now: Instant, wall: DateTime<Local>) -> Transition {
        let Some(session) = self.session.take() else {
            self.state = ControllerState::Idle;
            return Transition::None;
        };

        let units_written = session.units_written;
        let duration = now.saturating_duration_since(session.started_at);
        let path = self.close_session(session, now, wall);

        let cooldown_until = now + self.settings.cooldown;
        self.state = ControllerState::Cooldown;
        self.cooldown_until = Some(cooldown_until);

        info!(
            "Recording stopped: {} ({} units, {:.1}s); cooling down for {:?}",
            path.display(),
            units_written,
            duration.as_secs_f64(),
            self.settings.cooldown
        );

        Transition::Stopped {
            path,
            cooldown_until,
            units_written,
            duration,
        }
    }

    /// Close the handle and write the sidecar. Failures are logged; the session
    /// is gone either way.
    fn close_session(
        &mut self,
        session: RecordingSession,
        now: Instant,
        wall: DateTime<Local>,
    ) -> PathBuf {
        let RecordingSession {
            handle,
            started_at,
            started_wall,
            preroll_units,
            units_written,
            ..
        } = session;
        let path = handle.path().to_path_buf();

        match handle.close() {
            Ok(()) => self.stats.recordings_completed += 1,
            Err(e) => {
                error!("Failed to close recording cleanly: {}", e);
                self.stats.recordings_failed += 1;
            }
        }

        if self.settings.save_metadata {
            let metadata = RecordingMetadata {
                file: path.clone(),
                started_at: started_wall,
                stopped_at: wall,
                duration_seconds: now.saturating_duration_since(started_at).as_secs_f64(),
                preroll_units,
                units_written,
                file_size_bytes: std::fs::metadata(&path).map(|m| m.len()).ok(),
                record_duration_after_motion: self.settings.record_after_motion.as_secs_f64(),
                cooldown_duration: self.settings.cooldown.as_secs_f64(),
            };
            if let Err(e) = save_metadata(&metadata) {
                warn!("{}", e);
            }
        }

        path
    }

    fn abort_recording(&mut self, cause: &SinkError) {
        if let Some(session) = self.session.take() {
            warn!(
                "Aborting recording {} after write failure: {}",
                session.handle.path().display(),
                cause
            );
            if let Err(e) = session.handle.close() {
                warn!("Failed to close aborted recording: {}", e);
            }
        }
        self.state = ControllerState::Idle;
        self.cooldown_until = None;
        self.stats.recordings_failed += 1;
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until
    }

    pub fn record_until(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.record_until)
    }

    pub fn last_motion_at(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.last_motion_at)
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.handle.path())
    }

    pub fn preroll(&self) -> Option<&PreRollBuffer> {
        self.preroll.as_ref()
    }

    pub fn stats(&self) -> &RecordingStats {
        &self.stats
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(
                "Recording controller dropped with {} still open; closing",
                session.handle.path().display()
            );
            if let Err(e) = session.handle.close() {
                error!("Failed to close recording on drop: {}", e);
            }
        }
    }
}
