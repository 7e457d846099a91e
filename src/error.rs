use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MotionCamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl MotionCamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Frame acquisition failures
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No frame received within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Camera device error: {details}")]
    Device { details: String },

    #[error("Capture pipeline error: {details}")]
    Pipeline { details: String },

    #[error("Frame stream ended")]
    StreamEnded,
}

/// Recording output failures
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open recording {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to recording {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to close recording {}: {source}", path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save metadata {}: {details}", path.display())]
    Metadata { path: PathBuf, details: String },

    #[error("No free file name for {}", path.display())]
    NameExhausted { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Unsupported frame format for encoding: {format}")]
    Unsupported { format: String },

    #[error("Encoding failed: {details}")]
    Encoding { details: String },
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Frame processing failed: {details}")]
    FrameProcessing { details: String },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, MotionCamError>;
