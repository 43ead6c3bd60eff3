//! Layered configuration: optional TOML file, then `TAXIFARE_*` variables

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File as ConfigFile};
use std::path::{Path, PathBuf};
use taxifare_registry::{ModelTarget, RegistryConfig};

const DEFAULT_CONFIG_FILE: &str = "taxifare.toml";
const ENV_PREFIX: &str = "TAXIFARE";

/// Settings of the ingestion side: cache, warehouse and table names
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Size tier of the raw table, e.g. `1k`, `200k`, `all`
    pub data_size: String,
    pub chunk_size: usize,
    pub local_data_path: PathBuf,
    pub warehouse_path: PathBuf,
    pub raw_dataset: String,
    pub project_dataset: String,
}

/// Process-wide configuration, built once at start-up
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data: DataConfig,
    pub registry: RegistryConfig,
    pub log_level: String,
    pub log_format: String,
}

impl AppConfig {
    /// Load from `config_path_override` (must exist) or `./taxifare.toml` if
    /// present, with environment variables taking precedence
    pub fn load(config_path_override: Option<&Path>) -> Result<Self> {
        let resolved_path = match config_path_override {
            Some(path) if !path.exists() => bail!(
                "Configuration file {} not found (specified via --config)",
                path.display()
            ),
            Some(path) => Some(path.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX));

        let config = builder.build().context("failed to read configuration")?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let home = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taxifare");

        let chunk_size = match get_string_value(config, &["chunk_size"]) {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid chunk_size {raw:?}"))?,
            None => 200,
        };
        if chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }

        let target = get_string_value(config, &["model_target"])
            .map(|raw| raw.parse::<ModelTarget>())
            .transpose()?
            .unwrap_or_default();
        let bucket_path = get_path_value(config, &["bucket_path"]);
        if target == ModelTarget::Bucket && bucket_path.is_none() {
            bail!("model_target = \"bucket\" requires bucket_path");
        }

        let log_format =
            get_string_value(config, &["log_format"]).unwrap_or_else(|| "pretty".to_string());
        if !matches!(log_format.as_str(), "pretty" | "json") {
            bail!("log_format must be \"pretty\" or \"json\", got {log_format:?}");
        }

        Ok(Self {
            data: DataConfig {
                data_size: get_string_value(config, &["data_size"])
                    .unwrap_or_else(|| "1k".to_string()),
                chunk_size,
                local_data_path: get_path_value(config, &["local_data_path"])
                    .unwrap_or_else(|| home.join("data")),
                warehouse_path: get_path_value(config, &["warehouse_path"])
                    .unwrap_or_else(|| home.join("warehouse")),
                raw_dataset: get_string_value(config, &["raw_dataset"])
                    .unwrap_or_else(|| "taxifare_public".to_string()),
                project_dataset: get_string_value(config, &["project_dataset"])
                    .unwrap_or_else(|| "taxifare".to_string()),
            },
            registry: RegistryConfig {
                local_path: get_path_value(config, &["local_registry_path"])
                    .unwrap_or_else(|| home.join("training_outputs")),
                target,
                bucket_path,
            },
            log_level: get_string_value(config, &["log_level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_path_value(config: &Config, keys: &[&str]) -> Option<PathBuf> {
    get_string_value(config, keys).map(PathBuf::from)
}
