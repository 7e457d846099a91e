use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MotionCamConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub recording: RecordingConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    /// V4L2 capture through GStreamer (requires the `camera` feature)
    Gstreamer,
    /// Generated frames with periodic motion
    Synthetic,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// Per-pixel absolute difference against a reference frame
    Absolute,
    /// Per-pixel running mean/variance background model
    Background,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceUpdate {
    /// Reference becomes the latest frame every cycle
    Replace,
    /// Reference decays toward each frame with `learning_rate`
    Decay,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundScore {
    /// Total number of foreground pixels
    Pixels,
    /// Number of connected foreground regions of at least `min_component_area`
    Components,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// One JPEG per frame; every unit is a keyframe
    Mjpeg,
    /// x264 through GStreamer (requires the `camera` feature)
    H264,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Frame source backend
    #[serde(default = "default_camera_source")]
    pub source: CameraSource,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Capture/output resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Resolution frames are scaled to before motion scoring
    #[serde(default = "default_motion_resolution")]
    pub motion_resolution: (u32, u32),

    /// Frames per second requested from the device
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    #[serde(default = "default_flip")]
    pub flip_horizontal: bool,

    #[serde(default = "default_flip")]
    pub flip_vertical: bool,

    /// How long to wait for a frame before reporting a stalled device
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// Restart the capture pipeline after each recording closes
    #[serde(default)]
    pub restart_after_recording: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DetectionConfig {
    #[serde(default = "default_detection_method")]
    pub method: DetectionMethod,

    #[serde(default = "default_reference_update")]
    pub reference_update: ReferenceUpdate,

    /// Minimum intensity difference for a pixel to count as changed
    #[serde(default = "default_pixel_diff_threshold")]
    pub pixel_diff_threshold: u32,

    /// Changed-pixel count above which a frame counts as motion
    #[serde(default = "default_sensitivity_threshold")]
    pub sensitivity_threshold: u64,

    /// Seconds motion stays active after the last triggering frame
    #[serde(default = "default_motion_buffer_duration")]
    pub motion_buffer_duration: f64,

    /// Adaptation rate of the decaying reference and the background model
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Seconds between full reference resets (0 disables)
    #[serde(default = "default_reset_interval_seconds")]
    pub reset_interval_seconds: f64,

    /// Squared deviation, in variances, that marks a pixel as foreground
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: f64,

    #[serde(default = "default_background_score")]
    pub background_score: BackgroundScore,

    #[serde(default = "default_min_component_area")]
    pub min_component_area: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecordingConfig {
    /// Directory recordings are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Seconds a recording continues after the last motion-active cycle
    #[serde(default = "default_record_duration_after_motion")]
    pub record_duration_after_motion: f64,

    /// Seconds motion is ignored after a recording closes
    #[serde(default = "default_cooldown_duration")]
    pub cooldown_duration: f64,

    /// Seconds of encoded footage kept before a trigger (0 disables).
    ///
    /// A recording starts at the newest buffered keyframe. With the `h264`
    /// encoder that reaches back up to `keyframe_interval` frames, so the
    /// window should cover at least one keyframe interval. With `mjpeg` every
    /// unit is a keyframe: only the single most recent frame is written ahead of
    /// the trigger, and the rest of the window is held in memory without ever
    /// reaching a file. Set this to a small value (or 0) for `mjpeg` to save
    /// memory.
    #[serde(default = "default_pre_roll_window_seconds")]
    pub pre_roll_window_seconds: f64,

    #[serde(default = "default_encoder")]
    pub encoder: EncoderKind,

    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Maximum frames between H.264 keyframes
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Write a JSON sidecar next to each recording
    #[serde(default)]
    pub save_metadata: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Delay between driver cycles
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,

    /// Consecutive frame acquisition failures tolerated before the loop exits
    #[serde(default = "default_max_capture_failures")]
    pub max_capture_failures: u32,

    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl CameraConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl DetectionConfig {
    pub fn motion_buffer(&self) -> Duration {
        Duration::from_secs_f64(self.motion_buffer_duration)
    }

    pub fn reset_interval(&self) -> Option<Duration> {
        if self.reset_interval_seconds > 0.0 {
            Some(Duration::from_secs_f64(self.reset_interval_seconds))
        } else {
            None
        }
    }
}

impl RecordingConfig {
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    pub fn record_after_motion(&self) -> Duration {
        Duration::from_secs_f64(self.record_duration_after_motion)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_duration)
    }

    pub fn pre_roll_window(&self) -> Option<Duration> {
        if self.pre_roll_window_seconds > 0.0 {
            Some(Duration::from_secs_f64(self.pre_roll_window_seconds))
        } else {
            None
        }
    }
}

impl SystemConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

impl MotionCamConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("camera.source", source_name(default_camera_source()))?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default(
                "camera.motion_resolution",
                vec![default_motion_resolution().0, default_motion_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.flip_horizontal", default_flip())?
            .set_default("camera.flip_vertical", default_flip())?
            .set_default("camera.frame_timeout_ms", default_frame_timeout_ms())?
            .set_default("camera.restart_after_recording", false)?
            .set_default("detection.method", "absolute")?
            .set_default("detection.reference_update", "replace")?
            .set_default(
                "detection.pixel_diff_threshold",
                default_pixel_diff_threshold(),
            )?
            .set_default(
                "detection.sensitivity_threshold",
                default_sensitivity_threshold(),
            )?
            .set_default(
                "detection.motion_buffer_duration",
                default_motion_buffer_duration(),
            )?
            .set_default("detection.learning_rate", default_learning_rate())?
            .set_default(
                "detection.reset_interval_seconds",
                default_reset_interval_seconds(),
            )?
            .set_default("detection.variance_threshold", default_variance_threshold())?
            .set_default("detection.background_score", "pixels")?
            .set_default("detection.min_component_area", default_min_component_area())?
            .set_default("recording.output_dir", default_output_dir())?
            .set_default(
                "recording.record_duration_after_motion",
                default_record_duration_after_motion(),
            )?
            .set_default("recording.cooldown_duration", default_cooldown_duration())?
            .set_default(
                "recording.pre_roll_window_seconds",
                default_pre_roll_window_seconds(),
            )?
            .set_default("recording.encoder", "mjpeg")?
            .set_default("recording.bitrate_kbps", default_bitrate_kbps())?
            .set_default("recording.keyframe_interval", default_keyframe_interval())?
            .set_default("recording.jpeg_quality", default_jpeg_quality() as u32)?
            .set_default("recording.save_metadata", false)?
            .set_default("system.cycle_interval_ms", default_cycle_interval_ms())?
            .set_default("system.max_capture_failures", default_max_capture_failures())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables, e.g. MOTIONCAM_DETECTION__SENSITIVITY_THRESHOLD
            .add_source(
                Environment::with_prefix("MOTIONCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: MotionCamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Camera
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(invalid("Camera resolution must be greater than 0"));
        }
        if self.camera.motion_resolution.0 == 0 || self.camera.motion_resolution.1 == 0 {
            return Err(invalid("Motion resolution must be greater than 0"));
        }
        if self.camera.fps == 0 {
            return Err(invalid("Camera fps must be greater than 0"));
        }
        check_millis("frame_timeout_ms", self.camera.frame_timeout_ms)?;
        if self.camera.source == CameraSource::Gstreamer && !gstreamer_available() {
            return Err(invalid(
                "Camera source 'gstreamer' requires the 'camera' feature on Linux",
            ));
        }

        // Detection
        let detection = &self.detection;
        if detection.pixel_diff_threshold > 255 {
            return Err(invalid("pixel_diff_threshold must be at most 255"));
        }
        check_duration("motion_buffer_duration", detection.motion_buffer_duration, false)?;
        check_duration("reset_interval_seconds", detection.reset_interval_seconds, true)?;
        check_positive("variance_threshold", detection.variance_threshold)?;
        if !(detection.learning_rate > 0.0 && detection.learning_rate < 1.0) {
            return Err(invalid("learning_rate must be between 0 and 1 (exclusive)"));
        }

        // Recording
        let recording = &self.recording;
        if recording.output_dir.trim().is_empty() {
            return Err(invalid("Recording output_dir cannot be empty"));
        }
        check_duration(
            "record_duration_after_motion",
            recording.record_duration_after_motion,
            false,
        )?;
        check_duration("cooldown_duration", recording.cooldown_duration, true)?;
        check_duration(
            "pre_roll_window_seconds",
            recording.pre_roll_window_seconds,
            true,
        )?;
        if recording.keyframe_interval == 0 {
            return Err(invalid("keyframe_interval must be greater than 0"));
        }
        if recording.jpeg_quality == 0 || recording.jpeg_quality > 100 {
            return Err(invalid("jpeg_quality must be between 1 and 100"));
        }
        if recording.encoder == EncoderKind::H264 && !gstreamer_available() {
            return Err(invalid(
                "Encoder 'h264' requires the 'camera' feature on Linux",
            ));
        }

        // System
        check_millis("cycle_interval_ms", self.system.cycle_interval_ms)?;
        if self.system.max_capture_failures == 0 {
            return Err(invalid("max_capture_failures must be greater than 0"));
        }
        if self.system.event_bus_capacity == 0 {
            return Err(invalid("Event bus capacity must be greater than 0"));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for MotionCamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                source: default_camera_source(),
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                motion_resolution: default_motion_resolution(),
                fps: default_camera_fps(),
                flip_horizontal: default_flip(),
                flip_vertical: default_flip(),
                frame_timeout_ms: default_frame_timeout_ms(),
                restart_after_recording: false,
            },
            detection: DetectionConfig {
                method: default_detection_method(),
                reference_update: default_reference_update(),
                pixel_diff_threshold: default_pixel_diff_threshold(),
                sensitivity_threshold: default_sensitivity_threshold(),
                motion_buffer_duration: default_motion_buffer_duration(),
                learning_rate: default_learning_rate(),
                reset_interval_seconds: default_reset_interval_seconds(),
                variance_threshold: default_variance_threshold(),
                background_score: default_background_score(),
                min_component_area: default_min_component_area(),
            },
            recording: RecordingConfig {
                output_dir: default_output_dir(),
                record_duration_after_motion: default_record_duration_after_motion(),
                cooldown_duration: default_cooldown_duration(),
                pre_roll_window_seconds: default_pre_roll_window_seconds(),
                encoder: default_encoder(),
                bitrate_kbps: default_bitrate_kbps(),
                keyframe_interval: default_keyframe_interval(),
                jpeg_quality: default_jpeg_quality(),
                save_metadata: false,
            },
            system: SystemConfig {
                cycle_interval_ms: default_cycle_interval_ms(),
                max_capture_failures: default_max_capture_failures(),
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Message(message.to_string())
}

/// Longest duration any timing option may take: one week
pub const MAX_DURATION_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Message(format!(
            "{} must be a finite number greater than 0",
            name
        )))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Message(format!(
            "{} must be a finite number of at least 0",
            name
        )))
    }
}

/// Durations must convert to `Duration` and stay clear of `Instant` overflow
fn check_duration(name: &str, seconds: f64, allow_zero: bool) -> Result<(), ConfigError> {
    if allow_zero {
        check_non_negative(name, seconds)?;
    } else {
        check_positive(name, seconds)?;
    }
    if seconds > MAX_DURATION_SECONDS {
        return Err(ConfigError::Message(format!(
            "{} must be at most {} seconds",
            name, MAX_DURATION_SECONDS
        )));
    }
    Ok(())
}

fn check_millis(name: &str, millis: u64) -> Result<(), ConfigError> {
    if millis == 0 {
        return Err(ConfigError::Message(format!("{} must be greater than 0", name)));
    }
    check_duration(name, millis as f64 / 1000.0, false)
}

fn gstreamer_available() -> bool {
    cfg!(all(feature = "camera", target_os = "linux"))
}

fn source_name(source: CameraSource) -> &'static str {
    match source {
        CameraSource::Gstreamer => "gstreamer",
        CameraSource::Synthetic => "synthetic",
    }
}

// Default value functions
fn default_camera_source() -> CameraSource {
    if gstreamer_available() {
        CameraSource::Gstreamer
    } else {
        CameraSource::Synthetic
    }
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_motion_resolution() -> (u32, u32) {
    (320, 240)
}
fn default_camera_fps() -> u32 {
    10
}
fn default_flip() -> bool {
    true
}
fn default_frame_timeout_ms() -> u64 {
    2000
}

fn default_detection_method() -> DetectionMethod {
    DetectionMethod::Absolute
}
fn default_reference_update() -> ReferenceUpdate {
    ReferenceUpdate::Replace
}
fn default_pixel_diff_threshold() -> u32 {
    25
}
fn default_sensitivity_threshold() -> u64 {
    500
}
fn default_motion_buffer_duration() -> f64 {
    1.0
}
fn default_learning_rate() -> f64 {
    0.05
}
fn default_reset_interval_seconds() -> f64 {
    60.0
}
fn default_variance_threshold() -> f64 {
    16.0
}
fn default_background_score() -> BackgroundScore {
    BackgroundScore::Pixels
}
fn default_min_component_area() -> u32 {
    50
}

fn default_output_dir() -> String {
    "motion_videos".to_string()
}
fn default_record_duration_after_motion() -> f64 {
    10.0
}
fn default_cooldown_duration() -> f64 {
    5.0
}
fn default_pre_roll_window_seconds() -> f64 {
    3.0
}
fn default_encoder() -> EncoderKind {
    EncoderKind::Mjpeg
}
fn default_bitrate_kbps() -> u32 {
    10_000
}
fn default_keyframe_interval() -> u32 {
    30
}
fn default_jpeg_quality() -> u8 {
    85
}

fn default_cycle_interval_ms() -> u64 {
    100
}
fn default_max_capture_failures() -> u32 {
    3
}
fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn synthetic_config() -> MotionCamConfig {
        let mut config = MotionCamConfig::default();
        config.camera.source = CameraSource::Synthetic;
        config
    }

    #[test]
    fn test_default_config() {
        let config = synthetic_config();
        assert!(config.validate().is_ok());

        assert_eq!(config.detection.pixel_diff_threshold, 25);
        assert_eq!(config.detection.sensitivity_threshold, 500);
        assert_eq!(config.detection.motion_buffer(), Duration::from_secs(1));
        assert_eq!(config.recording.record_after_motion(), Duration::from_secs(10));
        assert_eq!(config.recording.cooldown(), Duration::from_secs(5));
        assert_eq!(config.recording.output_path(), PathBuf::from("motion_videos"));
        assert_eq!(config.system.cycle_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_disables_optional_windows() {
        let mut config = synthetic_config();
        config.recording.pre_roll_window_seconds = 0.0;
        config.detection.reset_interval_seconds = 0.0;

        assert!(config.validate().is_ok());
        assert!(config.recording.pre_roll_window().is_none());
        assert!(config.detection.reset_interval().is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = synthetic_config();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());
        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.detection.learning_rate = 1.0;
        assert!(config.validate().is_err());
        config.detection.learning_rate = 0.05;

        config.detection.pixel_diff_threshold = 300;
        assert!(config.validate().is_err());
        config.detection.pixel_diff_threshold = 25;

        config.recording.cooldown_duration = -1.0;
        assert!(config.validate().is_err());
        config.recording.cooldown_duration = 5.0;

        config.recording.record_duration_after_motion = f64::NAN;
        assert!(config.validate().is_err());
        config.recording.record_duration_after_motion = 10.0;

        config.recording.output_dir = "  ".to_string();
        assert!(config.validate().is_err());
        config.recording.output_dir = "motion_videos".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let mut config = synthetic_config();
        config.recording.cooldown_duration = 1e20;
        assert!(config.validate().is_err());

        let mut config = synthetic_config();
        config.recording.record_duration_after_motion = MAX_DURATION_SECONDS * 2.0;
        assert!(config.validate().is_err());

        let mut config = synthetic_config();
        config.recording.pre_roll_window_seconds = 1e19;
        assert!(config.validate().is_err());

        let mut config = synthetic_config();
        config.detection.motion_buffer_duration = f64::MAX;
        assert!(config.validate().is_err());

        let mut config = synthetic_config();
        config.detection.reset_interval_seconds = 1e30;
        assert!(config.validate().is_err());

        let mut config = synthetic_config();
        config.system.cycle_interval_ms = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = synthetic_config();
        config.camera.frame_timeout_ms = u64::MAX;
        assert!(config.validate().is_err());

        // The cap itself is usable
        let mut config = synthetic_config();
        config.recording.cooldown_duration = MAX_DURATION_SECONDS;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.recording.cooldown(),
            Duration::from_secs(7 * 24 * 3600)
        );
    }

    #[cfg(not(feature = "camera"))]
    #[test]
    fn test_gstreamer_backends_require_feature() {
        let mut config = synthetic_config();
        config.camera.source = CameraSource::Gstreamer;
        assert!(config.validate().is_err());

        let mut config = synthetic_config();
        config.recording.encoder = EncoderKind::H264;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
source = "synthetic"
resolution = [1280, 720]

[detection]
method = "background"
reference_update = "decay"
sensitivity_threshold = 300

[recording]
pre_roll_window_seconds = 0
output_dir = "/tmp/clips"
"#
        )
        .unwrap();

        let config = MotionCamConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.camera.source, CameraSource::Synthetic);
        assert_eq!(config.camera.resolution, (1280, 720));
        assert_eq!(config.camera.motion_resolution, (320, 240));
        assert_eq!(config.detection.method, DetectionMethod::Background);
        assert_eq!(config.detection.reference_update, ReferenceUpdate::Decay);
        assert_eq!(config.detection.sensitivity_threshold, 300);
        assert_eq!(config.detection.pixel_diff_threshold, 25);
        assert!(config.recording.pre_roll_window().is_none());
        assert_eq!(config.recording.output_dir, "/tmp/clips");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let config = synthetic_config();
        let rendered = config.to_toml().unwrap();

        assert!(rendered.contains("[detection]"));
        assert!(rendered.contains("sensitivity_threshold = 500"));

        let parsed: MotionCamConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
