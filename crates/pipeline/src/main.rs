//! Taxifare CLI

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use taxifare::{AppConfig, Pipeline, Ride, TrainParams};
use taxifare_data::parse_timestamp;
use taxifare_registry::Stage;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "taxifare")]
#[command(author = "Taxifare Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Taxi fare model pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./taxifare.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct DateRange {
    #[arg(long, default_value = "2009-01-01")]
    min_date: String,

    #[arg(long, default_value = "2015-01-01")]
    max_date: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed the warehouse raw table from a CSV file with a header row
    LoadRaw {
        csv: PathBuf,
    },

    /// Clean raw rides and store processed features in the warehouse
    Preprocess {
        #[command(flatten)]
        range: DateRange,
    },

    /// Train a model on processed data and save it to the registry
    Train {
        #[command(flatten)]
        range: DateRange,

        /// Share of the most recent rows used for validation
        #[arg(long, default_value = "0.02")]
        split_ratio: f64,

        #[arg(long, default_value = "0.0005")]
        learning_rate: f64,

        #[arg(long, default_value = "256")]
        batch_size: usize,

        /// Epochs without improvement before stopping
        #[arg(long, default_value = "2")]
        patience: usize,
    },

    /// Mean absolute error of a registered model on processed data
    Evaluate {
        #[arg(long, default_value = "2014-01-01")]
        min_date: String,

        #[arg(long, default_value = "2015-01-01")]
        max_date: String,

        /// "Production", "Staging", or anything else for the latest model
        #[arg(long, default_value = "Production")]
        stage: String,
    },

    /// Predict the fare of one ride (a sample ride when no input is given)
    Predict(RideArgs),

    /// Tag a model version with a stage
    Promote {
        version: String,
        /// Staging, Production or None
        stage: String,
    },

    /// List stored models and their stages
    Models,

    /// Preprocess, train, evaluate and predict in sequence
    Run {
        #[command(flatten)]
        range: DateRange,
    },
}

#[derive(Args, Debug)]
struct RideArgs {
    /// Pickup time, e.g. "2013-07-06 17:18:00"
    #[arg(long)]
    pickup_datetime: Option<String>,

    #[arg(long, requires = "pickup_datetime")]
    pickup_longitude: Option<f64>,

    #[arg(long, requires = "pickup_datetime")]
    pickup_latitude: Option<f64>,

    #[arg(long, requires = "pickup_datetime")]
    dropoff_longitude: Option<f64>,

    #[arg(long, requires = "pickup_datetime")]
    dropoff_latitude: Option<f64>,

    #[arg(long, default_value = "1")]
    passenger_count: i64,
}

impl RideArgs {
    fn into_ride(self) -> Result<Option<Ride>> {
        let Some(pickup) = self.pickup_datetime else {
            return Ok(None);
        };
        let pickup_datetime: DateTime<Utc> = parse_timestamp(&pickup)
            .map_err(|e| anyhow::anyhow!("invalid --pickup-datetime: {e}"))?;
        let sample = Ride::sample();
        Ok(Some(Ride {
            pickup_datetime,
            pickup_longitude: self.pickup_longitude.unwrap_or(sample.pickup_longitude),
            pickup_latitude: self.pickup_latitude.unwrap_or(sample.pickup_latitude),
            dropoff_longitude: self.dropoff_longitude.unwrap_or(sample.dropoff_longitude),
            dropoff_latitude: self.dropoff_latitude.unwrap_or(sample.dropoff_latitude),
            passenger_count: self.passenger_count,
        }))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config)?;

    info!("Taxifare v{}", env!("CARGO_PKG_VERSION"));
    let pipeline = Pipeline::new(config.data.clone(), &config.registry)
        .context("Failed to initialize pipeline")?;

    match cli.command {
        Command::LoadRaw { csv } => {
            let rows = pipeline.load_raw(&csv)?;
            println!("loaded {rows} rows");
        }
        Command::Preprocess { range } => {
            let rows = pipeline.preprocess(&range.min_date, &range.max_date)?;
            println!("processed {rows} rows");
        }
        Command::Train {
            range,
            split_ratio,
            learning_rate,
            batch_size,
            patience,
        } => {
            let val_mae = pipeline.train(&TrainParams {
                min_date: range.min_date,
                max_date: range.max_date,
                split_ratio,
                learning_rate,
                batch_size,
                patience,
            })?;
            println!("val_mae: {val_mae:.4}");
        }
        Command::Evaluate {
            min_date,
            max_date,
            stage,
        } => match pipeline.evaluate(&min_date, &max_date, &stage)? {
            Some(mae) => println!("mae: {mae:.4}"),
            None => println!("no data to evaluate on"),
        },
        Command::Predict(args) => {
            let rides = args.into_ride()?.map(|ride| vec![ride]);
            for fare in pipeline.predict(rides)? {
                println!("fare: {fare:.2}");
            }
        }
        Command::Promote { version, stage } => {
            let stage: Stage = stage.parse()?;
            pipeline.promote(&version, stage)?;
            println!("{version} -> {stage}");
        }
        Command::Models => {
            for model in pipeline.list_models()? {
                println!(
                    "{}  {}  {:<10}  {}",
                    model.version,
                    model.saved_at.format("%Y-%m-%d %H:%M:%S"),
                    model.stage,
                    &model.hash[..12.min(model.hash.len())]
                );
            }
        }
        Command::Run { range } => {
            pipeline.preprocess(&range.min_date, &range.max_date)?;
            let val_mae = pipeline.train(&TrainParams {
                min_date: range.min_date.clone(),
                max_date: range.max_date.clone(),
                ..TrainParams::default()
            })?;
            println!("val_mae: {val_mae:.4}");
            if let Some(mae) = pipeline.evaluate(&range.min_date, &range.max_date, "latest")? {
                println!("mae: {mae:.4}");
            }
            for fare in pipeline.predict(None)? {
                println!("fare: {fare:.2}");
            }
        }
    }

    Ok(())
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}
