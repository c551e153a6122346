pub mod block;
pub mod delta;
pub mod encoder;
pub mod error;
pub mod timing;
pub mod writer;

pub use block::EncodedFrame;
pub use delta::{DeltaOptimizer, DeltaStats, OptimizeConfig};
pub use encoder::{validate_frames, EncodedGif, StageEncoder};
pub use error::EncodeError;
pub use timing::{frame_delays, total_duration_sec};
pub use writer::{assemble, compress_frame, EncodeConfig, LoopMode, GIF_SIGNATURE, GIF_TRAILER};
