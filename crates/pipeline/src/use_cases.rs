//! End-to-end use cases: preprocess, train, evaluate, predict

use crate::{
    config::DataConfig,
    features::{self, Ride, FEATURE_COUNT},
    model::{LinearModel, TrainConfig},
};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use taxifare_data::{
    write_chunks, CacheKey, IngestionOrchestrator, LocalCacheStore, Query, Schema, Table,
    TableKind, TableRef, TrainingSplit, Warehouse, WriteMode, RAW_COLUMNS,
};
use taxifare_registry::{ArtifactInfo, ModelRegistry, ModelSelector, RegistryConfig, Stage};
use tracing::{info, instrument, warn};

/// Arguments of [`Pipeline::train`]
#[derive(Debug, Clone)]
pub struct TrainParams {
    pub min_date: String,
    pub max_date: String,
    /// Share of the most recent rows held out for validation
    pub split_ratio: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub patience: usize,
}

impl Default for TrainParams {
    fn default() -> Self {
        let model = TrainConfig::default();
        Self {
            min_date: "2009-01-01".to_string(),
            max_date: "2015-01-01".to_string(),
            split_ratio: taxifare_data::DEFAULT_SPLIT_RATIO,
            learning_rate: model.learning_rate,
            batch_size: model.batch_size,
            patience: model.patience,
        }
    }
}

/// Wires the warehouse, cache and registry together for the use cases
pub struct Pipeline {
    data: DataConfig,
    warehouse: Warehouse,
    ingest: IngestionOrchestrator,
    registry: ModelRegistry,
}

impl Pipeline {
    pub fn new(data: DataConfig, registry: &RegistryConfig) -> Result<Self> {
        let warehouse = Warehouse::open(&data.warehouse_path).with_context(|| {
            format!("failed to open warehouse at {}", data.warehouse_path.display())
        })?;
        let registry = ModelRegistry::new(registry)?;
        Ok(Self::with_parts(data, warehouse, registry))
    }

    pub fn with_parts(data: DataConfig, warehouse: Warehouse, registry: ModelRegistry) -> Self {
        let ingest = IngestionOrchestrator::new(LocalCacheStore::new(&data.local_data_path));
        Self {
            data,
            warehouse,
            ingest,
            registry,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    fn raw_table(&self) -> TableRef {
        TableRef::new(&self.data.raw_dataset, format!("raw_{}", self.data.data_size))
    }

    fn processed_table(&self) -> TableRef {
        TableRef::new(
            &self.data.project_dataset,
            format!("processed_{}", self.data.data_size),
        )
    }

    /// Processed rows for the date range, read through the local cache
    fn processed_data(&self, min_date: &str, max_date: &str) -> Result<Table> {
        let key = CacheKey::parse(TableKind::Processed, min_date, max_date, &self.data.data_size)?;
        let schema = Schema::processed(FEATURE_COUNT);
        let query = Query::select(self.processed_table(), schema.column_names())
            .between(key.min_date(), key.max_date());
        info!(%query, "loading processed data");
        Ok(self.ingest.get_chunked_table(
            &key,
            &schema,
            &self.warehouse.cursor(&query),
            self.data.chunk_size,
        )?)
    }

    /// Registered model for `selector`, rejected if its input width differs
    /// from the features this pipeline computes
    fn load_model(&self, selector: ModelSelector) -> Result<Option<LinearModel>> {
        let Some(model) = self.registry.load_model::<LinearModel>(selector)? else {
            return Ok(None);
        };
        if model.feature_count() != FEATURE_COUNT {
            bail!(
                "model expects {} features, pipeline produces {FEATURE_COUNT}",
                model.feature_count()
            );
        }
        Ok(Some(model))
    }

    /// Seed the raw table from a headered CSV file; returns the row count
    #[instrument(skip(self))]
    pub fn load_raw(&self, path: &Path) -> Result<usize> {
        let schema = Schema::raw();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let positions = RAW_COLUMNS
            .iter()
            .map(|name| {
                headers
                    .iter()
                    .position(|h| h == *name)
                    .ok_or_else(|| anyhow!("{} has no {name} column", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut table = Table::empty(schema.clone());
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let fields = positions.iter().map(|&i| record.get(i).unwrap_or(""));
            let row = schema
                .decode(fields)
                .map_err(|reason| anyhow!("{} row {}: {reason}", path.display(), line + 1))?;
            table.push(row)?;
        }

        write_chunks(
            &self.warehouse,
            &table,
            &self.raw_table(),
            self.data.chunk_size,
            WriteMode::Truncate,
        )?;
        info!(rows = table.len(), table = %self.raw_table(), "raw data loaded");
        Ok(table.len())
    }

    /// Query raw rides, clean them, compute features and replace the remote
    /// processed table; returns the number of processed rows
    #[instrument(skip(self))]
    pub fn preprocess(&self, min_date: &str, max_date: &str) -> Result<usize> {
        let key = CacheKey::parse(TableKind::Raw, min_date, max_date, &self.data.data_size)?;
        let query = Query::select(self.raw_table(), &RAW_COLUMNS)
            .between(key.min_date(), key.max_date());
        info!(%query, "loading raw data");

        let raw = self.ingest.get_chunked_table(
            &key,
            &Schema::raw(),
            &self.warehouse.cursor(&query),
            self.data.chunk_size,
        )?;
        let cleaned = features::clean(raw)?;
        let processed = features::preprocess(&cleaned)?;

        write_chunks(
            &self.warehouse,
            &processed,
            &self.processed_table(),
            self.data.chunk_size,
            WriteMode::Truncate,
        )?;
        info!(rows = processed.len(), "preprocess done");
        Ok(processed.len())
    }

    /// Fit a model on the processed range and return its best validation MAE
    #[instrument(skip(self, params), fields(min_date = %params.min_date, max_date = %params.max_date))]
    pub fn train(&self, params: &TrainParams) -> Result<f64> {
        let data = self.processed_data(&params.min_date, &params.max_date)?;
        if data.is_empty() {
            bail!(
                "no processed data between {} and {}; run preprocess first",
                params.min_date,
                params.max_date
            );
        }

        let split = TrainingSplit::chronological(data, params.split_ratio)?;
        let (train_x, train_y) = split.train.features_and_targets();
        let (val_x, val_y) = split.validation.features_and_targets();

        let config = TrainConfig {
            learning_rate: params.learning_rate,
            batch_size: params.batch_size,
            patience: params.patience,
            ..TrainConfig::default()
        };
        let (model, history) = LinearModel::fit(&train_x, &train_y, &val_x, &val_y, &config)?;
        let val_mae = history.best_val_mae;

        self.registry.save(
            BTreeMap::from([
                ("context".to_string(), json!("train")),
                ("training_set_size".to_string(), json!(self.data.data_size)),
                ("row_count".to_string(), json!(train_x.len())),
            ]),
            BTreeMap::from([("mae".to_string(), val_mae)]),
        )?;
        let report = self.registry.save_model(&model)?;

        info!(val_mae, version = %report.version, "train done");
        Ok(val_mae)
    }

    /// MAE of the model for `stage` on the processed range; `None` when the
    /// range holds no data
    #[instrument(skip(self))]
    pub fn evaluate(&self, min_date: &str, max_date: &str, stage: &str) -> Result<Option<f64>> {
        let model = self
            .load_model(ModelSelector::parse(stage))?
            .ok_or_else(|| anyhow!("no model available for stage {stage}"))?;

        let data = self.processed_data(min_date, max_date)?;
        if data.is_empty() {
            warn!("no data to evaluate on");
            return Ok(None);
        }

        let (x, y) = data.features_and_targets();
        let mae = model.evaluate(&x, &y)?;
        self.registry.save(
            BTreeMap::from([
                ("context".to_string(), json!("evaluate")),
                ("training_set_size".to_string(), json!(self.data.data_size)),
                ("row_count".to_string(), json!(x.len())),
            ]),
            BTreeMap::from([("mae".to_string(), mae)]),
        )?;

        info!(mae, "evaluate done");
        Ok(Some(mae))
    }

    /// Fare predictions from the latest model, one per ride
    #[instrument(skip(self, rides))]
    pub fn predict(&self, rides: Option<Vec<Ride>>) -> Result<Vec<f64>> {
        let rides = rides.unwrap_or_else(|| vec![Ride::sample()]);
        let model = self
            .load_model(ModelSelector::Latest)?
            .ok_or_else(|| anyhow!("no trained model found; run train first"))?;

        let predictions = model.predict(&features::feature_matrix(&rides));
        info!(?predictions, "prediction done");
        Ok(predictions)
    }

    /// Tag a stored model version with `stage`
    pub fn promote(&self, version: &str, stage: Stage) -> Result<()> {
        self.registry.transition_stage(version, stage)?;
        info!(%version, %stage, "model promoted");
        Ok(())
    }

    pub fn list_models(&self) -> Result<Vec<ArtifactInfo>> {
        Ok(self.registry.list_artifacts()?)
    }
}
