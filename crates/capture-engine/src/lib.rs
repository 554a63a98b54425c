//! Screenshot capture and artifact storage for rendered messages.

pub mod capture;
pub mod keys;
pub mod store;

pub use capture::{CaptureConfig, CaptureEngine};
pub use keys::{artifact_key, CapturePath};
pub use store::{ArtifactStore, BlobStoreConfig, HttpBlobStore, MemoryArtifactStore, StoredArtifact};
