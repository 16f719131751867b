//! Race-strategy decision engine.
//!
//! Generates one- and two-stop pit strategies for a driver at a race,
//! scores them with a closed-form mean/variance model, refines the
//! shortlist by Monte Carlo simulation, and returns a deduplicated ranking
//! with per-stint pace and tyre-life curves.

pub mod baseline;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod generator;
#[cfg(feature = "torch")]
pub mod model;
pub mod pace_curve;
pub mod predictor;
pub mod ranker;
pub mod simulation;
pub mod types;

pub use config::EngineConfig;
pub use engine::StrategyEngine;
pub use error::{ConfigError, EngineError};
pub use types::{CompareRequest, CompareResponse, StrategyRequest, StrategyResponse};
