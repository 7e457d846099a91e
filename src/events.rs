use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Events emitted by the motion recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MotionCamEvent {
    /// Debounced motion became active
    MotionStarted {
        changed_count: u64,
        timestamp: SystemTime,
    },
    /// Debounced motion returned to inactive
    MotionEnded { timestamp: SystemTime },
    /// A recording file was opened and pre-roll flushed into it
    RecordingStarted { path: PathBuf, preroll_units: usize },
    /// A recording was closed after the post-motion tail elapsed
    RecordingStopped {
        path: PathBuf,
        units_written: u64,
        duration: Duration,
    },
    /// Opening or writing a recording failed; the recorder is idle again
    RecordingFailed { error: String },
    /// Cooldown elapsed; motion can trigger recordings again
    CooldownEnded { timestamp: SystemTime },
    /// Frame acquisition failed for one cycle
    CaptureFailed { error: String, consecutive: u32 },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl MotionCamEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            MotionCamEvent::MotionStarted { changed_count, .. } => {
                format!("Motion started ({} changed)", changed_count)
            }
            MotionCamEvent::MotionEnded { .. } => "Motion ended".to_string(),
            MotionCamEvent::RecordingStarted {
                path,
                preroll_units,
            } => format!(
                "Recording started: {} ({} pre-roll units)",
                path.display(),
                preroll_units
            ),
            MotionCamEvent::RecordingStopped {
                path,
                units_written,
                duration,
            } => format!(
                "Recording stopped: {} ({} units, {:.1}s)",
                path.display(),
                units_written,
                duration.as_secs_f64()
            ),
            MotionCamEvent::RecordingFailed { error } => {
                format!("Recording failed: {}", error)
            }
            MotionCamEvent::CooldownEnded { .. } => "Cooldown ended".to_string(),
            MotionCamEvent::CaptureFailed { error, consecutive } => {
                format!("Capture failed ({} in a row): {}", consecutive, error)
            }
            MotionCamEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            MotionCamEvent::MotionStarted { .. } => "motion_started",
            MotionCamEvent::MotionEnded { .. } => "motion_ended",
            MotionCamEvent::RecordingStarted { .. } => "recording_started",
            MotionCamEvent::RecordingStopped { .. } => "recording_stopped",
            MotionCamEvent::RecordingFailed { .. } => "recording_failed",
            MotionCamEvent::CooldownEnded { .. } => "cooldown_ended",
            MotionCamEvent::CaptureFailed { .. } => "capture_failed",
            MotionCamEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MotionCamEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<MotionCamEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub async fn publish(&self, event: MotionCamEvent) -> Result<usize, EventBusError> {
        trace!("Publishing {} event", event.event_type());

        if self.sender.receiver_count() == 0 {
            return Ok(0);
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&MotionCamEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &MotionCamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<MotionCamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<MotionCamEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event that passes the filter
    pub async fn recv(&mut self) -> Result<MotionCamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive a matching event without blocking
    pub fn try_recv(&mut self) -> Result<Option<MotionCamEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = MotionCamEvent::MotionStarted {
            changed_count: 1500,
            timestamp: SystemTime::now(),
        };

        let subscriber_count = event_bus.publish(event).await.unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            MotionCamEvent::MotionStarted { changed_count, .. } => {
                assert_eq!(changed_count, 1500);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());

        let delivered = event_bus
            .publish(MotionCamEvent::CooldownEnded {
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus
            .publish(MotionCamEvent::RecordingStarted {
                path: PathBuf::from("motion_20240101_120000.mjpeg"),
                preroll_units: 12,
            })
            .await
            .unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let filter = EventFilter::EventTypes(vec!["recording_stopped"]);
        let mut filtered = EventReceiver::new(event_bus.subscribe(), filter, "test".to_string());

        event_bus
            .publish(MotionCamEvent::MotionEnded {
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();
        event_bus
            .publish(MotionCamEvent::RecordingStopped {
                path: PathBuf::from("clip.mjpeg"),
                units_written: 40,
                duration: Duration::from_secs(12),
            })
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), filtered.recv())
            .await
            .unwrap()
            .unwrap();
        match received {
            MotionCamEvent::RecordingStopped { units_written, .. } => {
                assert_eq!(units_written, 40);
            }
            _ => panic!("Unexpected event type"),
        }
        assert!(filtered.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_event_properties() {
        let event = MotionCamEvent::CaptureFailed {
            error: "timeout".to_string(),
            consecutive: 2,
        };
        assert_eq!(event.event_type(), "capture_failed");
        assert!(event.description().contains("2 in a row"));

        let custom = EventFilter::Custom(|e| e.event_type().starts_with("recording"));
        assert!(custom.matches(&MotionCamEvent::RecordingFailed {
            error: "disk full".to_string()
        }));
        assert!(!custom.matches(&event));
        assert!(EventFilter::All.matches(&event));
    }
}
