//! Model registry facade
//!
//! Every run record and artifact is written to the local backend; when a
//! bucket is configured it is written there too. Backend writes are
//! independent, and a save fails only when every backend failed.

use crate::{
    backend::RegistryBackend,
    bucket::{BucketBackend, FsObjectStore},
    errors::{RegistryError, Result},
    local::LocalBackend,
    types::{
        ArtifactInfo, ModelArtifact, ModelSelector, ModelTarget, RegistryConfig, RunRecord,
        SaveReport, Stage, VERSION_FORMAT,
    },
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Stores run records and trained models, and resolves which model to load
pub struct ModelRegistry {
    local: LocalBackend,
    remote: Option<Box<dyn RegistryBackend>>,
}

impl ModelRegistry {
    /// Build the registry for the configured model target
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let local = LocalBackend::new(&config.local_path);
        let remote: Option<Box<dyn RegistryBackend>> = match config.target {
            ModelTarget::Local => None,
            ModelTarget::Bucket => {
                let path = config.bucket_path.as_ref().ok_or_else(|| {
                    RegistryError::Config("model target 'bucket' requires bucket_path".into())
                })?;
                Some(Box::new(BucketBackend::new(FsObjectStore::new(path))))
            }
        };
        Ok(Self::with_backends(local, remote))
    }

    pub fn with_backends(local: LocalBackend, remote: Option<Box<dyn RegistryBackend>>) -> Self {
        Self { local, remote }
    }

    pub fn local(&self) -> &LocalBackend {
        &self.local
    }

    fn backends(&self) -> impl Iterator<Item = &dyn RegistryBackend> {
        std::iter::once(&self.local as &dyn RegistryBackend).chain(self.remote.as_deref())
    }

    /// Fresh timestamp version not used by any backend
    fn next_version(&self) -> Result<String> {
        self.unused_version(&Utc::now().format(VERSION_FORMAT).to_string())
    }

    /// `base`, or `base` with the lowest free zero-padded suffix so that
    /// versions keep sorting in save order
    fn unused_version(&self, base: &str) -> Result<String> {
        let mut candidate = base.to_string();
        let mut suffix = 0u32;
        loop {
            let mut taken = false;
            for backend in self.backends() {
                taken |= backend.contains_version(&candidate)?;
            }
            if !taken {
                return Ok(candidate);
            }
            suffix += 1;
            candidate = format!("{base}-{suffix:03}");
        }
    }

    /// Record the params and metrics of a run; returns the run timestamp
    #[instrument(skip(self, params, metrics))]
    pub fn save(
        &self,
        params: BTreeMap<String, serde_json::Value>,
        metrics: BTreeMap<String, f64>,
    ) -> Result<String> {
        let record = RunRecord {
            timestamp: self.next_version()?,
            params,
            metrics,
        };

        let mut errors = Vec::new();
        let mut saved = 0;
        for backend in self.backends() {
            match backend.save_run(&record) {
                Ok(()) => saved += 1,
                Err(err) => {
                    warn!(backend = backend.name(), error = %err, "failed to save run");
                    errors.push(format!("{}: {err}", backend.name()));
                }
            }
        }
        if saved == 0 {
            return Err(RegistryError::AllBackendsFailed(errors));
        }
        Ok(record.timestamp)
    }

    /// Save a model as a new immutable artifact.
    ///
    /// After a successful remote write the artifact is tagged
    /// [`Stage::Staging`] there.
    #[instrument(skip(self, model))]
    pub fn save_model<M: Serialize>(&self, model: &M) -> Result<SaveReport> {
        let artifact = ModelArtifact::new(self.next_version()?, serde_json::to_value(model)?)?;
        let mut report = SaveReport {
            version: artifact.version.clone(),
            written: Vec::new(),
            failed: Vec::new(),
            stage: None,
        };

        match self.local.save_artifact(&artifact) {
            Ok(()) => report.written.push(self.local.name()),
            Err(err) => {
                warn!(error = %err, "failed to save model locally");
                report.failed.push((self.local.name(), err.to_string()));
            }
        }

        if let Some(remote) = &self.remote {
            let staged = remote
                .save_artifact(&artifact)
                .and_then(|()| remote.transition_stage(&artifact.version, Stage::Staging));
            match staged {
                Ok(()) => {
                    report.written.push(remote.name());
                    report.stage = Some(Stage::Staging);
                }
                Err(err) => {
                    warn!(backend = remote.name(), error = %err, "failed to save model remotely");
                    report.failed.push((remote.name(), err.to_string()));
                }
            }
        }

        if report.written.is_empty() {
            return Err(RegistryError::AllBackendsFailed(
                report
                    .failed
                    .into_iter()
                    .map(|(name, err)| format!("{name}: {err}"))
                    .collect(),
            ));
        }
        info!(version = %report.version, written = ?report.written, "model saved");
        Ok(report)
    }

    /// Artifact for `selector`, with its payload hash verified.
    ///
    /// `Ok(None)` means no artifact matches. Without a remote backend a stage
    /// selector falls back to the latest local artifact.
    #[instrument(skip(self, selector), fields(selector = %selector))]
    pub fn load_artifact(&self, selector: ModelSelector) -> Result<Option<ModelArtifact>> {
        let artifact = match (selector, &self.remote) {
            (ModelSelector::Stage(stage), Some(remote)) if stage != Stage::None => {
                remote.load_by_stage(stage)?
            }
            (ModelSelector::Stage(stage), None) if stage != Stage::None => {
                info!(%stage, "no remote registry configured, loading latest local model");
                self.local.load_latest()?
            }
            _ => self.local.load_latest()?,
        };

        match artifact {
            Some(artifact) => {
                artifact.verify()?;
                info!(version = %artifact.version, "model loaded");
                Ok(Some(artifact))
            }
            None => {
                warn!("no model found");
                Ok(None)
            }
        }
    }

    /// Deserialize the model for `selector`
    pub fn load_model<M: DeserializeOwned>(&self, selector: ModelSelector) -> Result<Option<M>> {
        self.load_artifact(selector)?
            .map(|artifact| serde_json::from_value(artifact.payload).map_err(Into::into))
            .transpose()
    }

    /// Deserialize a specific historical artifact, looking locally first
    pub fn load_version<M: DeserializeOwned>(&self, version: &str) -> Result<Option<M>> {
        let mut found = None;
        for backend in self.backends() {
            if let Some(artifact) = backend.load_version(version)? {
                found = Some(artifact);
                break;
            }
        }
        match found {
            Some(artifact) => {
                artifact.verify()?;
                Ok(Some(serde_json::from_value(artifact.payload)?))
            }
            None => Ok(None),
        }
    }

    /// Tag a remote artifact with `stage`
    #[instrument(skip(self))]
    pub fn transition_stage(&self, version: &str, stage: Stage) -> Result<()> {
        match &self.remote {
            Some(remote) => remote.transition_stage(version, stage),
            None => self.local.transition_stage(version, stage),
        }
    }

    /// Artifacts of the remote backend if configured, otherwise local ones
    pub fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>> {
        match &self.remote {
            Some(remote) => remote.list_artifacts(),
            None => self.local.list_artifacts(),
        }
    }
}
