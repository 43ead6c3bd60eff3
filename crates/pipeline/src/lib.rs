//! Taxi fare prediction pipeline
//!
//! Use cases over the taxifare data and registry crates:
//! `preprocess` raw rides into features, `train` a fare model, `evaluate` a
//! staged model and `predict` fares for new rides.

pub mod config;
pub mod features;
pub mod model;
pub mod use_cases;

pub use config::{AppConfig, DataConfig};
pub use features::{Ride, FEATURE_COUNT, FEATURE_NAMES};
pub use model::{History, LinearModel, TrainConfig};
pub use use_cases::{Pipeline, TrainParams};
