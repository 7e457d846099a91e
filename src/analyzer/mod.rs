mod background;
mod debounce;
mod differencer;
mod luma;

#[cfg(test)]
mod tests;

pub use background::BackgroundSubtractor;
pub use debounce::{MotionDebouncer, MotionSignal};
pub use differencer::{AbsoluteDifferencer, FrameDifferencer};
pub use luma::{downscale, frame_to_luma};
