use tokio::sync::watch;

/// Single-slot handoff from a capture thread to the driver task.
///
/// The producer never blocks and never queues: a frame the driver has not
/// taken yet is replaced by the newer one, so the driver always sees the
/// most recent capture and never falls behind the camera. Frames that are
/// delivered still arrive in capture order.
pub fn latest_frame_channel<T: Clone>() -> (LatestSender<T>, LatestReceiver<T>) {
    let (tx, rx) = watch::channel(None);
    (LatestSender { tx }, LatestReceiver { rx })
}

pub struct LatestSender<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> LatestSender<T> {
    /// Replace the pending value; false once the receiver is gone
    pub fn publish(&self, value: T) -> bool {
        self.tx.send(Some(value)).is_ok()
    }
}

pub struct LatestReceiver<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> LatestReceiver<T> {
    /// Wait for a value newer than the last one returned; `None` once the
    /// sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }
}
