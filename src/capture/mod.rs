//! The per-session capture loop and what it accumulates.

pub mod aggregate;
pub mod frame_sink;
mod loop_worker;

pub use aggregate::{DetectionRecord, SessionAggregate};
pub use frame_sink::{FrameSink, JpegFrameSink};

pub(crate) use loop_worker::{capture_loop, LoopContext};
