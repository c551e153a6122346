pub mod artifact;
pub mod bridge;
pub mod error;
pub mod store;

pub use artifact::{ArtifactMetadata, ArtifactSummary, GifArtifact};
pub use bridge::{
    BridgeOp, BridgeRequest, BridgeResponse, ExtensionContext, StorageBridge, StorageConfig,
    StorageHost,
};
pub use error::StorageError;
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
