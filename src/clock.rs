use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::Instant;

/// Time source for the driver loop.
///
/// `now` is monotonic and drives every timing decision; `wall_clock` is only used
/// to name recordings.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn wall_clock(&self) -> DateTime<Local>;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer, so paused test runtimes control it too
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Local> {
        Local::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock;
        let start = clock.now();

        clock.sleep(Duration::from_millis(250)).await;

        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }
}
