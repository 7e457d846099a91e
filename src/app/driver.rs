use crate::analyzer::{FrameDifferencer, MotionDebouncer};
use crate::camera::FrameSource;
use crate::capture::{Encoder, RecordingController, RecordingStats, Transition};
use crate::clock::Clock;
use crate::error::{CaptureError, MotionCamError, Result};
use crate::events::{EventBus, MotionCamEvent};
use crate::frame::FrameData;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::types::{DriverSettings, DriverStats, ShutdownReason};

/// The motion recording loop.
///
/// Each cycle pulls one frame, scores it, debounces the score, advances the
/// recording state machine and feeds encoded units to the controller. All of
/// that runs on the calling task; the only suspension points are frame
/// acquisition, the inter-cycle sleep and an optional source restart.
pub struct MotionDriver {
    settings: DriverSettings,
    source: Box<dyn FrameSource>,
    differencer: FrameDifferencer,
    debouncer: MotionDebouncer,
    controller: RecordingController,
    encoder: Box<dyn Encoder>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    cancel: CancellationToken,
    stats: DriverStats,
    consecutive_failures: u32,
    motion_active: bool,
}

impl MotionDriver {
    /// Run until cancelled or until frame acquisition fails too often.
    ///
    /// Any open recording is closed before the frame source is stopped, on every
    /// exit path.
    pub async fn run(&mut self) -> Result<ShutdownReason> {
        let outcome = self.run_cycles().await;

        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(e) => ShutdownReason::CaptureFailed(e.to_string()),
        };
        self.shutdown(&reason).await;

        outcome
    }

    async fn run_cycles(&mut self) -> Result<ShutdownReason> {
        info!("Starting frame source '{}'", self.source.name());
        self.source.start().await.map_err(|e| {
            error!("Frame source failed to start: {}", e);
            e
        })?;
        info!("Motion driver running");

        loop {
            if self.cancel.is_cancelled() {
                return Ok(ShutdownReason::Cancelled);
            }

            let acquired = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(ShutdownReason::Cancelled),
                frame = self.source.next_frame(self.settings.frame_timeout) => frame,
            };

            match acquired {
                Ok(frame) => {
                    self.consecutive_failures = 0;
                    self.process_frame(&frame).await;
                }
                Err(e) => self.record_capture_failure(e).await?,
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(ShutdownReason::Cancelled),
                _ = self.clock.sleep(self.settings.cycle_interval) => {}
            }
        }
    }

    /// Count a failed acquisition; an error once the budget is exhausted
    async fn record_capture_failure(&mut self, e: CaptureError) -> Result<()> {
        self.consecutive_failures += 1;
        self.stats.capture_failures += 1;
        warn!(
            "Frame capture failed ({} in a row): {}",
            self.consecutive_failures, e
        );

        self.publish(MotionCamEvent::CaptureFailed {
            error: e.to_string(),
            consecutive: self.consecutive_failures,
        })
        .await;

        if self.consecutive_failures >= self.settings.max_capture_failures {
            error!(
                "Giving up after {} consecutive capture failures: {}",
                self.consecutive_failures, e
            );
            return Err(e.into());
        }
        Ok(())
    }

    async fn process_frame(&mut self, frame: &FrameData) {
        let now = self.clock.now();
        let wall = self.clock.wall_clock();

        let changed = match self.differencer.score(frame) {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Scoring frame {} failed; treating as no change: {}", frame.id, e);
                self.stats.analyzer_errors += 1;
                0
            }
        };

        let active = self.debouncer.update(changed, now);
        self.publish_motion_edge(active, changed, wall).await;

        match self.controller.step(active, now, wall) {
            Ok(transition) => self.handle_transition(transition, wall).await,
            Err(e) => {
                warn!("Could not start recording: {}", e);
                self.publish(MotionCamEvent::RecordingFailed {
                    error: e.to_string(),
                })
                .await
            }
        }

        if self.controller.wants_units() {
            self.encode_and_ingest(frame).await;
        }

        self.stats.frames_processed += 1;
        trace!(
            "Cycle {} done (changed={}, motion={}, state={:?})",
            frame.id,
            changed,
            active,
            self.controller.state()
        );
    }

    async fn publish_motion_edge(&mut self, active: bool, changed: u64, wall: DateTime<Local>) {
        if active == self.motion_active {
            return;
        }
        self.motion_active = active;

        let timestamp = SystemTime::from(wall);
        let event = if active {
            self.stats.motion_events += 1;
            MotionCamEvent::MotionStarted {
                changed_count: changed,
                timestamp,
            }
        } else {
            MotionCamEvent::MotionEnded { timestamp }
        };
        self.publish(event).await;
    }

    async fn handle_transition(&mut self, transition: Transition, wall: DateTime<Local>) {
        match transition {
            Transition::None | Transition::Extended { .. } => {}
            Transition::Started {
                path,
                preroll_units,
            } => {
                // Without pre-roll the first live unit has to be decodable on its own
                if self.controller.preroll().is_none() {
                    self.encoder.force_keyframe();
                }
                self.publish(MotionCamEvent::RecordingStarted {
                    path,
                    preroll_units,
                })
                .await;
            }
            Transition::Stopped {
                path,
                cooldown_until,
                units_written,
                duration,
            } => {
                self.debouncer.begin_cooldown(cooldown_until);
                self.publish(MotionCamEvent::RecordingStopped {
                    path,
                    units_written,
                    duration,
                })
                .await;

                if self.settings.restart_after_recording {
                    self.restart_source().await;
                }
            }
            Transition::CooldownEnded => {
                self.publish(MotionCamEvent::CooldownEnded {
                    timestamp: SystemTime::from(wall),
                })
                .await;
            }
        }
    }

    async fn encode_and_ingest(&mut self, frame: &FrameData) {
        let units = match self.encoder.encode(frame) {
            Ok(units) => units,
            Err(e) => {
                warn!("Encoding frame {} failed: {}", frame.id, e);
                self.stats.encoder_errors += 1;
                return;
            }
        };

        for unit in units {
            if let Err(e) = self.controller.ingest(unit) {
                warn!("Recording aborted: {}", e);
                self.publish(MotionCamEvent::RecordingFailed {
                    error: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn restart_source(&mut self) {
        info!("Reinitializing frame source after recording");
        match self.source.reinitialize().await {
            Ok(()) => {
                self.stats.source_restarts += 1;
                // New capture session: the next frame seeds the reference
                self.differencer.reset();
            }
            Err(e) => warn!("Frame source restart failed: {}", e),
        }
    }

    /// Close the recording, then release the camera
    async fn shutdown(&mut self, reason: &ShutdownReason) {
        info!("Motion driver shutting down: {}", reason);

        let wall = self.clock.wall_clock();
        self.publish(MotionCamEvent::ShutdownRequested {
            timestamp: SystemTime::from(wall),
            reason: reason.to_string(),
        })
        .await;

        if let Some(path) = self.controller.finish(self.clock.now(), wall) {
            info!("Closed recording {} on shutdown", path.display());
        }

        if let Err(e) = self.source.stop().await {
            error!("Failed to stop frame source: {}", e);
        }

        info!(
            "Motion driver stopped after {} frames ({} capture failures, {} motion events)",
            self.stats.frames_processed, self.stats.capture_failures, self.stats.motion_events
        );
    }

    async fn publish(&self, event: MotionCamEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            debug!("Event not delivered: {}", e);
        }
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn recording_stats(&self) -> &RecordingStats {
        self.controller.stats()
    }

    pub fn controller(&self) -> &RecordingController {
        &self.controller
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

/// Builder for [`MotionDriver`]
pub struct MotionDriverBuilder {
    settings: DriverSettings,
    source: Option<Box<dyn FrameSource>>,
    differencer: Option<FrameDifferencer>,
    debouncer: Option<MotionDebouncer>,
    controller: Option<RecordingController>,
    encoder: Option<Box<dyn Encoder>>,
    clock: Option<Arc<dyn Clock>>,
    event_bus: Option<EventBus>,
    cancel: Option<CancellationToken>,
}

impl MotionDriverBuilder {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            settings,
            source: None,
            differencer: None,
            debouncer: None,
            controller: None,
            encoder: None,
            clock: None,
            event_bus: None,
            cancel: None,
        }
    }

    pub fn source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn differencer(mut self, differencer: FrameDifferencer) -> Self {
        self.differencer = Some(differencer);
        self
    }

    pub fn debouncer(mut self, debouncer: MotionDebouncer) -> Self {
        self.debouncer = Some(debouncer);
        self
    }

    pub fn controller(mut self, controller: RecordingController) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<MotionDriver> {
        let missing = |what: &str| {
            MotionCamError::component("driver".to_string(), format!("{} is required", what))
        };

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(crate::clock::SystemClock),
        };

        Ok(MotionDriver {
            settings: self.settings,
            source: self.source.ok_or_else(|| missing("frame source"))?,
            differencer: self.differencer.ok_or_else(|| missing("frame differencer"))?,
            debouncer: self.debouncer.ok_or_else(|| missing("motion debouncer"))?,
            controller: self.controller.ok_or_else(|| missing("recording controller"))?,
            encoder: self.encoder.ok_or_else(|| missing("encoder"))?,
            clock,
            event_bus: self.event_bus.unwrap_or_else(|| EventBus::new(100)),
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
            stats: DriverStats::default(),
            consecutive_failures: 0,
            motion_active: false,
        })
    }
}
