use crate::error::EventBusError;
use crate::events::{EventReceiver, MotionCamEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cancel `token` on SIGINT (Ctrl+C) or, on Unix, SIGTERM
pub fn spawn_signal_handlers(token: CancellationToken) {
    // SIGTERM (systemd stop) - Unix only
    #[cfg(unix)]
    {
        let token = token.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM signal");
                            token.cancel();
                        }
                        _ = token.cancelled() => {}
                    }
                }
                Err(e) => error!("Failed to register SIGTERM handler: {}", e),
            }
        });
    }

    // SIGINT (Ctrl+C) - cross-platform
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    token.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            },
            _ = token.cancelled() => {}
        }
    });
}

/// Log events from `receiver` until the bus closes.
///
/// Resolves to the number of events logged. Lagging only loses the skipped
/// events; the logger keeps going.
pub fn spawn_event_logger(mut receiver: EventReceiver) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    log_event(&event);
                    logged += 1;
                }
                Err(EventBusError::ChannelClosed) => break,
                Err(e) => debug!("Event logger skipped events: {}", e),
            }
        }
        logged
    })
}

fn log_event(event: &MotionCamEvent) {
    match event {
        MotionCamEvent::RecordingFailed { .. } => error!("{}", event.description()),
        MotionCamEvent::CaptureFailed { .. } => warn!("{}", event.description()),
        _ => info!("{}", event.description()),
    }
}
