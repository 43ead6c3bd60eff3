//! Object-store registry backend with stage tags
//!
//! Object layout:
//! - `models/<version>.json`: immutable artifacts
//! - `runs/params/<version>.json`, `runs/metrics/<version>.json`: run records
//! - `stages/<stage>`: pointer object holding the version tagged with that stage
//!
//! Tagging rewrites a pointer object, so at most one artifact holds each tag
//! and a superseded artifact stays in `models/` untagged.

use crate::{
    backend::RegistryBackend,
    errors::{RegistryError, Result},
    types::{ArtifactInfo, ModelArtifact, RunRecord, Stage},
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const MODELS_PREFIX: &str = "models/";
const PARAMS_PREFIX: &str = "runs/params/";
const METRICS_PREFIX: &str = "runs/metrics/";
const STAGES_PREFIX: &str = "stages/";

/// Minimal flat key/value object store
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;
    /// Keys starting with `prefix`, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Object store kept in memory; clones share the same objects
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Object store mapped onto a directory, one file per key
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        let dir = path
            .parent()
            .ok_or_else(|| RegistryError::Storage(format!("invalid object key {key}")))?;
        fs::create_dir_all(dir)?;

        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(bytes)?;
        staged.as_file_mut().sync_all()?;
        staged.persist(&path).map_err(|e| RegistryError::Io(e.error))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // prefixes used by the registry always name a directory
        let entries = match fs::read_dir(self.path(prefix)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // skip in-flight temp files
                if !name.starts_with(".tmp") {
                    keys.push(format!("{prefix}{name}"));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Registry backend on top of an [`ObjectStore`]
pub struct BucketBackend {
    store: Box<dyn ObjectStore>,
}

impl BucketBackend {
    pub fn new<S: ObjectStore + 'static>(store: S) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    fn model_key(version: &str) -> String {
        format!("{MODELS_PREFIX}{version}.json")
    }

    fn stage_key(stage: Stage) -> String {
        format!("{STAGES_PREFIX}{}", stage.as_str().to_ascii_lowercase())
    }

    fn put_new(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if self.store.get(key)?.is_some() {
            return Err(RegistryError::ArtifactExists(key.to_string()));
        }
        self.store.put(key, bytes)
    }

    /// Version currently tagged with `stage`
    fn pointer(&self, stage: Stage) -> Result<Option<String>> {
        Ok(self
            .store
            .get(&Self::stage_key(stage))?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|version| !version.is_empty()))
    }

    fn stage_of(&self, version: &str) -> Result<Stage> {
        for stage in Stage::TAGGED {
            if self.pointer(stage)?.as_deref() == Some(version) {
                return Ok(stage);
            }
        }
        Ok(Stage::None)
    }

    fn versions(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list(MODELS_PREFIX)?
            .iter()
            .filter_map(|key| {
                key.strip_prefix(MODELS_PREFIX)?
                    .strip_suffix(".json")
                    .map(str::to_string)
            })
            .collect())
    }
}

impl RegistryBackend for BucketBackend {
    fn name(&self) -> &'static str {
        "bucket"
    }

    fn save_run(&self, record: &RunRecord) -> Result<()> {
        let name = format!("{}.json", record.timestamp);
        self.put_new(
            &format!("{PARAMS_PREFIX}{name}"),
            &serde_json::to_vec_pretty(&record.params)?,
        )?;
        self.put_new(
            &format!("{METRICS_PREFIX}{name}"),
            &serde_json::to_vec_pretty(&record.metrics)?,
        )?;
        info!(run = %record.timestamp, "run saved to bucket");
        Ok(())
    }

    fn save_artifact(&self, artifact: &ModelArtifact) -> Result<()> {
        self.put_new(
            &Self::model_key(&artifact.version),
            &serde_json::to_vec_pretty(artifact)?,
        )?;
        info!(version = %artifact.version, "model saved to bucket");
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<ModelArtifact>> {
        match self.versions()?.pop() {
            Some(version) => self.load_version(&version),
            None => Ok(None),
        }
    }

    fn load_by_stage(&self, stage: Stage) -> Result<Option<ModelArtifact>> {
        if stage == Stage::None {
            return Ok(None);
        }
        match self.pointer(stage)? {
            Some(version) => {
                debug!(%stage, %version, "resolved stage pointer");
                self.load_version(&version)
            }
            None => Ok(None),
        }
    }

    fn load_version(&self, version: &str) -> Result<Option<ModelArtifact>> {
        match self.store.get(&Self::model_key(version))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn transition_stage(&self, version: &str, stage: Stage) -> Result<()> {
        if self.store.get(&Self::model_key(version))?.is_none() {
            return Err(RegistryError::ArtifactNotFound(version.to_string()));
        }

        // an artifact carries at most one tag
        for other in Stage::TAGGED {
            if other != stage && self.pointer(other)?.as_deref() == Some(version) {
                self.store.delete(&Self::stage_key(other))?;
            }
        }

        if stage != Stage::None {
            let previous = self.pointer(stage)?;
            self.store.put(&Self::stage_key(stage), version.as_bytes())?;
            info!(%version, %stage, ?previous, "stage transitioned");
        } else {
            info!(%version, "stage tag cleared");
        }
        Ok(())
    }

    fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>> {
        let mut listing = Vec::new();
        for version in self.versions()? {
            if let Some(artifact) = self.load_version(&version)? {
                listing.push(artifact.info(self.stage_of(&version)?));
            }
        }
        Ok(listing)
    }

    fn contains_version(&self, version: &str) -> Result<bool> {
        Ok(self.store.get(&Self::model_key(version))?.is_some()
            || self
                .store
                .get(&format!("{PARAMS_PREFIX}{version}.json"))?
                .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn artifact(version: &str) -> ModelArtifact {
        ModelArtifact::new(version, json!({ "version": version })).unwrap()
    }

    #[test]
    fn test_memory_list_is_prefix_scoped() {
        let store = MemoryObjectStore::new();
        store.put("models/a.json", b"1").unwrap();
        store.put("models/b.json", b"2").unwrap();
        store.put("modelsx/c.json", b"3").unwrap();
        store.put("runs/params/a.json", b"4").unwrap();
        assert_eq!(
            store.list(MODELS_PREFIX).unwrap(),
            vec!["models/a.json", "models/b.json"]
        );
    }

    #[test]
    fn test_fs_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("stages/production", b"v1").unwrap();
        store.put("stages/production", b"v2").unwrap();
        assert_eq!(store.get("stages/production").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.list(STAGES_PREFIX).unwrap(), vec!["stages/production"]);

        store.delete("stages/production").unwrap();
        store.delete("stages/production").unwrap();
        assert!(store.get("stages/production").unwrap().is_none());
        assert!(store.list("models/").unwrap().is_empty());
    }

    #[test]
    fn test_retag_supersedes_previous_holder() {
        let backend = BucketBackend::new(MemoryObjectStore::new());
        backend.save_artifact(&artifact("v1")).unwrap();
        backend.save_artifact(&artifact("v2")).unwrap();

        backend.transition_stage("v1", Stage::Production).unwrap();
        backend.transition_stage("v2", Stage::Production).unwrap();

        let production = backend.load_by_stage(Stage::Production).unwrap().unwrap();
        assert_eq!(production.version, "v2");

        let listing = backend.list_artifacts().unwrap();
        assert_eq!(listing[0].version, "v1");
        assert_eq!(listing[0].stage, Stage::None);
        assert_eq!(listing[1].stage, Stage::Production);
        assert!(backend.load_version("v1").unwrap().is_some());
    }

    #[test]
    fn test_promotion_moves_the_tag() {
        let backend = BucketBackend::new(MemoryObjectStore::new());
        backend.save_artifact(&artifact("v1")).unwrap();
        backend.transition_stage("v1", Stage::Staging).unwrap();
        backend.transition_stage("v1", Stage::Production).unwrap();

        assert!(backend.load_by_stage(Stage::Staging).unwrap().is_none());
        assert_eq!(backend.stage_of("v1").unwrap(), Stage::Production);

        backend.transition_stage("v1", Stage::None).unwrap();
        assert!(backend.load_by_stage(Stage::Production).unwrap().is_none());
    }

    #[test]
    fn test_tagging_unknown_version_fails() {
        let backend = BucketBackend::new(MemoryObjectStore::new());
        assert!(matches!(
            backend.transition_stage("missing", Stage::Production),
            Err(RegistryError::ArtifactNotFound(_))
        ));
    }
}
