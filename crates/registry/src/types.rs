//! Type definitions for the model registry

use crate::errors::{RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Format of artifact and run timestamps; sorts lexicographically in time order
pub const VERSION_FORMAT: &str = "%Y%m%d-%H%M%S%3f";

/// Lifecycle tag of an artifact on a staged backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Stage {
    /// Untagged
    #[default]
    None,
    /// Candidate awaiting promotion
    Staging,
    /// Serving model
    Production,
}

impl Stage {
    /// Stages an artifact can be tagged with
    pub const TAGGED: [Stage; 2] = [Stage::Staging, Stage::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            _ => Err(RegistryError::UnknownStage(s.to_string())),
        }
    }
}

/// Which artifact a load should return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSelector {
    /// Most recently saved local artifact
    Latest,
    /// Artifact carrying this tag on the remote backend
    Stage(Stage),
}

impl ModelSelector {
    /// `"Production"` and `"Staging"` select by tag; anything else means latest
    pub fn parse(mode: &str) -> Self {
        match mode.parse::<Stage>() {
            Ok(stage @ (Stage::Staging | Stage::Production)) => ModelSelector::Stage(stage),
            _ => ModelSelector::Latest,
        }
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSelector::Latest => f.write_str("latest"),
            ModelSelector::Stage(stage) => write!(f, "{stage}"),
        }
    }
}

/// Where trained models are written besides the local registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelTarget {
    /// Local filesystem only
    #[default]
    Local,
    /// Local filesystem plus the object-store bucket
    Bucket,
}

impl FromStr for ModelTarget {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ModelTarget::Local),
            "bucket" | "gcs" => Ok(ModelTarget::Bucket),
            _ => Err(RegistryError::UnknownTarget(s.to_string())),
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Root of the local registry (`params/`, `metrics/`, `models/`)
    pub local_path: PathBuf,
    /// Remote target for trained models
    pub target: ModelTarget,
    /// Root of the bucket when `target` is [`ModelTarget::Bucket`]
    pub bucket_path: Option<PathBuf>,
}

/// Immutable record of one training or evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: String,
    pub params: BTreeMap<String, serde_json::Value>,
    pub metrics: BTreeMap<String, f64>,
}

/// Serialized model plus the data needed to verify it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub saved_at: DateTime<Utc>,
    /// BLAKE3 of the canonical JSON encoding of `payload`
    pub hash: String,
    pub payload: serde_json::Value,
}

impl ModelArtifact {
    pub fn new(version: impl Into<String>, payload: serde_json::Value) -> Result<Self> {
        let hash = canonical_blake3(&payload)?;
        Ok(Self {
            version: version.into(),
            saved_at: Utc::now(),
            hash,
            payload,
        })
    }

    /// Recompute the payload hash and compare it with the recorded one
    pub fn verify(&self) -> Result<()> {
        let actual = canonical_blake3(&self.payload)?;
        if actual != self.hash {
            return Err(RegistryError::Integrity {
                version: self.version.clone(),
                expected: self.hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn info(&self, stage: Stage) -> ArtifactInfo {
        ArtifactInfo {
            version: self.version.clone(),
            saved_at: self.saved_at,
            hash: self.hash.clone(),
            stage,
        }
    }
}

/// Listing entry for one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub version: String,
    pub saved_at: DateTime<Utc>,
    pub hash: String,
    pub stage: Stage,
}

/// Outcome of [`crate::ModelRegistry::save_model`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub version: String,
    /// Backends the artifact was written to
    pub written: Vec<&'static str>,
    /// Backends that failed, with the error message
    pub failed: Vec<(&'static str, String)>,
    /// Tag applied after the remote write, if any
    pub stage: Option<Stage>,
}

/// BLAKE3 hex digest of a value's canonical JSON (object keys sorted)
pub fn canonical_blake3(value: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
}
