//! Taxifare model registry
//!
//! Keeps immutable, timestamped run records and model artifacts on the local
//! filesystem and, optionally, in an object-store bucket that also carries
//! `Staging`/`Production` tags. [`ModelRegistry`] is the entry point.

pub mod backend;
pub mod bucket;
pub mod errors;
pub mod local;
pub mod registry;
pub mod types;

pub use backend::RegistryBackend;
pub use bucket::{BucketBackend, FsObjectStore, MemoryObjectStore, ObjectStore};
pub use errors::{RegistryError, Result};
pub use local::LocalBackend;
pub use registry::ModelRegistry;
pub use types::{
    canonical_blake3, ArtifactInfo, ModelArtifact, ModelSelector, ModelTarget, RegistryConfig,
    RunRecord, SaveReport, Stage,
};
