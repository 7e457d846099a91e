#[cfg(all(feature = "camera", target_os = "linux"))]
mod gst_source;
#[cfg(any(test, all(feature = "camera", target_os = "linux")))]
mod handoff;
mod interface;
mod synthetic;
#[cfg(test)]
mod tests;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gst_source::GstFrameSource;
pub use interface::FrameSource;
pub use synthetic::SyntheticFrameSource;
