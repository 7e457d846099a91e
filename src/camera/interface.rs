use crate::error::CaptureError;
use crate::frame::FrameData;
use async_trait::async_trait;
use std::time::Duration;

/// A camera (or camera stand-in) delivering frames in capture order.
///
/// Only the driver task calls these methods; implementations that capture on
/// another thread must hand frames over without reordering them.
#[async_trait]
pub trait FrameSource: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Acquire the device and begin streaming
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Wait up to `timeout` for the next frame
    async fn next_frame(&mut self, timeout: Duration) -> Result<FrameData, CaptureError>;

    /// Tear the stream down and bring it back up, e.g. after a recording closes
    async fn reinitialize(&mut self) -> Result<(), CaptureError>;

    /// Release the device. Safe to call more than once.
    async fn stop(&mut self) -> Result<(), CaptureError>;
}
