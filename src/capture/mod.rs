mod controller;
mod encode;
mod metadata;
mod sink;

pub use controller::{ControllerState, RecordingController, RecordingSettings, Transition};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use encode::GstH264Encoder;
pub use encode::{Encoder, MjpegEncoder};
pub use metadata::{metadata_path, RecordingMetadata, RecordingStats};
pub use sink::{recording_path, recording_stem, FileSink, Sink, SinkHandle, MAX_NAME_SUFFIX};
