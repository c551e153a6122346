pub mod error;
pub mod frame;
pub mod host_source;
pub mod mock;
pub mod sampler;
pub mod selection;
pub mod source;

pub use error::CaptureError;
pub use frame::{Frame, Picture, RawFrame};
pub use host_source::{HostVideoSource, SourceReply, SourceRequest};
pub use mock::MockVideoSource;
pub use sampler::{CaptureConfig, FrameSampler};
pub use selection::Selection;
pub use source::{PlaybackState, VideoSource};
