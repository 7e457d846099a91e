use crate::capture::SinkHandle;
use crate::error::{MotionCamError, SinkError};
use crate::frame::EncodedUnit;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// Time-windowed buffer of encoded units kept ahead of a motion trigger.
///
/// Units are stored oldest first. After every push, units are evicted from the
/// front while the span between the newest and oldest timestamp exceeds the
/// window. A flush always starts at a keyframe so the recording is decodable
/// from its first unit.
pub struct PreRollBuffer {
    units: VecDeque<EncodedUnit>,
    window: Duration,
    /// Sequence number of `units[0]`; every pushed unit gets the next number
    front_seq: u64,
    /// Sequence number of the newest keyframe still buffered
    last_keyframe_seq: Option<u64>,
    stats: PreRollStats,
}

/// Counters for pre-roll buffer monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreRollStats {
    pub units_pushed: u64,
    pub units_evicted: u64,
    pub flushes: u64,
}

impl PreRollBuffer {
    /// Create an empty buffer holding at most `window` of footage
    pub fn new(window: Duration) -> Self {
        debug!("Created pre-roll buffer with window {:?}", window);

        Self {
            units: VecDeque::new(),
            window,
            front_seq: 0,
            last_keyframe_seq: None,
            stats: PreRollStats::default(),
        }
    }

    /// Append a unit and evict whatever falls outside the window
    pub fn push(&mut self, unit: EncodedUnit) {
        if unit.is_keyframe {
            self.last_keyframe_seq = Some(self.front_seq + self.units.len() as u64);
        }
        self.units.push_back(unit);
        self.stats.units_pushed += 1;

        self.evict_expired();
    }

    fn evict_expired(&mut self) {
        let newest = match self.units.back() {
            Some(unit) => unit.timestamp,
            None => return,
        };

        while let Some(oldest) = self.units.front() {
            if newest.saturating_duration_since(oldest.timestamp) <= self.window {
                break;
            }
            self.units.pop_front();
            self.front_seq += 1;
            self.stats.units_evicted += 1;
        }

        if matches!(self.last_keyframe_seq, Some(seq) if seq < self.front_seq) {
            trace!("Newest keyframe evicted from pre-roll window");
            self.last_keyframe_seq = None;
        }
    }

    /// Index of the first unit a flush would write
    fn flush_start(&self) -> usize {
        self.last_keyframe_seq
            .map(|seq| (seq - self.front_seq) as usize)
            .unwrap_or(0)
    }

    /// Write every unit from the newest buffered keyframe onward, oldest first.
    ///
    /// Without a buffered keyframe the whole buffer is written. The buffer keeps
    /// its contents; the written units simply age out as new ones arrive.
    pub fn flush_from_last_keyframe(
        &mut self,
        handle: &mut dyn SinkHandle,
    ) -> Result<usize, SinkError> {
        let start = self.flush_start();
        let mut written = 0;

        for unit in self.units.range(start..) {
            handle.write(unit)?;
            written += 1;
        }

        self.stats.flushes += 1;
        debug!(
            "Flushed {} pre-roll units to {} ({} skipped before keyframe)",
            written,
            handle.path().display(),
            start
        );
        Ok(written)
    }

    /// Units a flush would currently write
    pub fn pending_flush_len(&self) -> usize {
        self.units.len() - self.flush_start()
    }

    pub fn has_keyframe(&self) -> bool {
        self.last_keyframe_seq.is_some()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time between the oldest and newest buffered unit
    pub fn span(&self) -> Duration {
        match (self.units.front(), self.units.back()) {
            (Some(oldest), Some(newest)) => {
                newest.timestamp.saturating_duration_since(oldest.timestamp)
            }
            _ => Duration::ZERO,
        }
    }

    pub fn stats(&self) -> &PreRollStats {
        &self.stats
    }
}

/// Builder for pre-roll buffers
#[derive(Default)]
pub struct PreRollBufferBuilder {
    window: Option<Duration>,
}

impl PreRollBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pre-roll window
    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Set the pre-roll window in seconds
    pub fn window_seconds(self, seconds: f64) -> Self {
        self.window(Duration::from_secs_f64(seconds.max(0.0)))
    }

    /// Build the buffer; a zero window is rejected since it disables pre-roll
    pub fn build(self) -> Result<PreRollBuffer, MotionCamError> {
        let window = self
            .window
            .ok_or_else(|| MotionCamError::system("Pre-roll window must be specified"))?;

        if window.is_zero() {
            return Err(MotionCamError::system(
                "Pre-roll window must be greater than 0",
            ));
        }

        Ok(PreRollBuffer::new(window))
    }
}
