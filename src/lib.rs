pub mod analyzer;
pub mod app;
pub mod camera;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod preroll;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{FrameDifferencer, MotionDebouncer, MotionSignal};
pub use app::{MotionDriver, MotionDriverBuilder, ShutdownReason};
pub use camera::{FrameSource, SyntheticFrameSource};
pub use capture::{
    ControllerState, Encoder, FileSink, MjpegEncoder, RecordingController, Sink, SinkHandle,
    Transition,
};
pub use clock::{Clock, SystemClock};
pub use config::MotionCamConfig;
pub use error::{MotionCamError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, MotionCamEvent};
pub use frame::{EncodedUnit, Flip, FrameData, FrameFormat};
pub use preroll::{PreRollBuffer, PreRollBufferBuilder};
