//! Local filesystem registry backend
//!
//! Layout under the registry root:
//! `params/<version>.json`, `metrics/<version>.json`, `models/<version>.json`.
//! Every file is written once through a temporary file and never replaced.

use crate::{
    backend::RegistryBackend,
    errors::{RegistryError, Result},
    types::{ArtifactInfo, ModelArtifact, RunRecord, Stage},
};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const PARAMS_DIR: &str = "params";
const METRICS_DIR: &str = "metrics";
const MODELS_DIR: &str = "models";

/// Registry backend rooted at a local directory; has no stage tags
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file(&self, dir: &str, version: &str) -> PathBuf {
        self.root.join(dir).join(format!("{version}.json"))
    }

    /// Versions of stored artifacts, oldest first
    fn versions(&self) -> Result<Vec<String>> {
        let dir = self.root.join(MODELS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                versions.push(stem.to_string());
            }
        }
        versions.sort();
        Ok(versions)
    }
}

impl RegistryBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn save_run(&self, record: &RunRecord) -> Result<()> {
        write_new(&self.file(PARAMS_DIR, &record.timestamp), &record.params)?;
        write_new(&self.file(METRICS_DIR, &record.timestamp), &record.metrics)?;
        info!(run = %record.timestamp, root = %self.root.display(), "run saved locally");
        Ok(())
    }

    fn save_artifact(&self, artifact: &ModelArtifact) -> Result<()> {
        let path = self.file(MODELS_DIR, &artifact.version);
        write_new(&path, artifact)?;
        info!(version = %artifact.version, path = %path.display(), "model saved locally");
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<ModelArtifact>> {
        match self.versions()?.pop() {
            Some(version) => self.load_version(&version),
            None => Ok(None),
        }
    }

    fn load_by_stage(&self, stage: Stage) -> Result<Option<ModelArtifact>> {
        debug!(%stage, "local registry keeps no stage tags");
        Ok(None)
    }

    fn load_version(&self, version: &str) -> Result<Option<ModelArtifact>> {
        match fs::read(self.file(MODELS_DIR, version)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn transition_stage(&self, version: &str, stage: Stage) -> Result<()> {
        Err(RegistryError::Unsupported(format!(
            "cannot tag {version} as {stage}: the local registry has no stages"
        )))
    }

    fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>> {
        let mut listing = Vec::new();
        for version in self.versions()? {
            if let Some(artifact) = self.load_version(&version)? {
                listing.push(artifact.info(Stage::None));
            }
        }
        Ok(listing)
    }

    fn contains_version(&self, version: &str) -> Result<bool> {
        Ok(self.file(MODELS_DIR, version).exists() || self.file(PARAMS_DIR, version).exists())
    }
}

/// Write `value` as JSON to `path`, failing if the file already exists
fn write_new<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| RegistryError::Storage(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(staged.as_file_mut(), value)?;
    staged.as_file_mut().write_all(b"\n")?;
    staged.as_file_mut().sync_all()?;
    staged.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            RegistryError::ArtifactExists(path.display().to_string())
        } else {
            RegistryError::Io(e.error)
        }
    })?;
    Ok(())
}
