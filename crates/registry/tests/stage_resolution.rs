use anyhow::Result;
use serde::{Deserialize, Serialize};
use taxifare_registry::{
    ModelRegistry, ModelSelector, ModelTarget, RegistryConfig, RegistryError, Stage,
};
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Weights {
    name: String,
    coefficients: Vec<f64>,
}

fn weights(name: &str) -> Weights {
    Weights {
        name: name.to_string(),
        coefficients: vec![0.5, -1.25, 3.0],
    }
}

fn bucket_registry(root: &std::path::Path) -> Result<ModelRegistry> {
    Ok(ModelRegistry::new(&RegistryConfig {
        local_path: root.join("registry"),
        target: ModelTarget::Bucket,
        bucket_path: Some(root.join("bucket")),
    })?)
}

#[test]
fn retagging_production_supersedes_previous_model() -> Result<()> {
    let dir = tempdir()?;
    let registry = bucket_registry(dir.path())?;

    let a = registry.save_model(&weights("a"))?.version;
    let b = registry.save_model(&weights("b"))?.version;

    registry.transition_stage(&a, Stage::Production)?;
    let first: Option<Weights> = registry.load_model(ModelSelector::parse("Production"))?;
    assert_eq!(first, Some(weights("a")));

    registry.transition_stage(&b, Stage::Production)?;
    let second: Option<Weights> = registry.load_model(ModelSelector::parse("Production"))?;
    assert_eq!(second, Some(weights("b")));

    // the superseded artifact is still retrievable, untagged
    let listing = registry.list_artifacts()?;
    let stages: Vec<(String, Stage)> = listing.into_iter().map(|i| (i.version, i.stage)).collect();
    assert_eq!(stages, vec![(a.clone(), Stage::None), (b, Stage::Production)]);
    let old: Option<Weights> = registry.load_version(&a)?;
    assert_eq!(old, Some(weights("a")));
    Ok(())
}

#[test]
fn missing_stage_is_no_model_not_an_error() -> Result<()> {
    let dir = tempdir()?;
    let registry = bucket_registry(dir.path())?;
    let none: Option<Weights> = registry.load_model(ModelSelector::Stage(Stage::Production))?;
    assert!(none.is_none());

    assert!(matches!(
        registry.transition_stage("19990101-000000000", Stage::Production),
        Err(RegistryError::ArtifactNotFound(_))
    ));
    Ok(())
}

#[test]
fn local_mode_returns_newest_artifact_regardless_of_tags() -> Result<()> {
    let dir = tempdir()?;

    // tag an older model in the bucket, then save a newer one locally only
    let tagged = bucket_registry(dir.path())?;
    let old = tagged.save_model(&weights("old"))?.version;
    tagged.transition_stage(&old, Stage::Production)?;

    let local = ModelRegistry::new(&RegistryConfig {
        local_path: dir.path().join("registry"),
        target: ModelTarget::Local,
        bucket_path: None,
    })?;
    let new = local.save_model(&weights("new"))?;
    assert_eq!(new.written, vec!["local"]);
    assert!(new.version > old);

    for mode in ["Production", "Staging", "latest"] {
        let loaded: Option<Weights> = local.load_model(ModelSelector::parse(mode))?;
        assert_eq!(loaded, Some(weights("new")), "mode {mode}");
    }
    assert!(local.transition_stage(&new.version, Stage::Production).is_err());
    Ok(())
}

#[test]
fn tampered_artifact_is_rejected_on_load() -> Result<()> {
    let dir = tempdir()?;
    let registry = bucket_registry(dir.path())?;
    let version = registry.save_model(&weights("a"))?.version;

    let path = dir.path().join(format!("registry/models/{version}.json"));
    let text = std::fs::read_to_string(&path)?.replace("-1.25", "-9.25");
    std::fs::write(&path, text)?;

    assert!(matches!(
        registry.load_model::<Weights>(ModelSelector::Latest),
        Err(RegistryError::Integrity { .. })
    ));
    Ok(())
}
