mod driver;
mod factory;
mod runtime;
mod types;


pub use driver::{MotionDriver, MotionDriverBuilder};
pub use factory::{
    build_controller, build_driver, build_driver_with_clock, build_encoder, build_frame_source,
};
pub use runtime::{spawn_event_logger, spawn_signal_handlers};
pub use types::{DriverSettings, DriverStats, ShutdownReason};
