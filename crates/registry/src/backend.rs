//! Storage backend abstraction for the model registry

use crate::{
    errors::Result,
    types::{ArtifactInfo, ModelArtifact, RunRecord, Stage},
};

/// One place models and run records can be written to
///
/// Artifacts and run records are immutable once written; stage tags are the
/// only mutable state a backend keeps.
pub trait RegistryBackend: Send + Sync {
    /// Short name used in logs and save reports
    fn name(&self) -> &'static str;

    /// Persist the params and metrics of a run
    fn save_run(&self, record: &RunRecord) -> Result<()>;

    /// Persist an artifact; a second write of the same version fails
    fn save_artifact(&self, artifact: &ModelArtifact) -> Result<()>;

    /// Artifact with the greatest version
    fn load_latest(&self) -> Result<Option<ModelArtifact>>;

    /// Artifact currently tagged `stage`
    fn load_by_stage(&self, stage: Stage) -> Result<Option<ModelArtifact>>;

    fn load_version(&self, version: &str) -> Result<Option<ModelArtifact>>;

    /// Tag `version` with `stage`, superseding the previous holder of the tag.
    /// [`Stage::None`] clears the artifact's tag.
    fn transition_stage(&self, version: &str, stage: Stage) -> Result<()>;

    /// All artifacts in version order with their current tags
    fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>>;

    /// Whether a run record or artifact already uses `version`
    fn contains_version(&self, version: &str) -> Result<bool>;
}
