use serde::Deserialize;
use std::{fs, path::PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_RISK_BIAS: f64 = 0.15;
pub const DEFAULT_STRATEGY_COUNT: usize = 5;

fn default_pit_window_bin() -> u32 {
    5
}
fn default_mc_top_k() -> usize {
    5
}
fn default_mc_samples() -> usize {
    200
}
fn default_seed() -> u64 {
    42
}
fn default_traffic_mu() -> f64 {
    0.15
}
fn default_traffic_sigma() -> f64 {
    0.05
}
fn default_opponent_penalty() -> f64 {
    0.25
}
fn default_model_cache() -> usize {
    16
}
fn default_profile_cache() -> usize {
    64
}
fn default_curve_cache() -> usize {
    32
}
fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}
fn default_port() -> u16 {
    8000
}

/// Engine tunables. Every field has a default so an empty `{}` is valid.
#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_pit_window_bin")]
    pub pit_window_bin: u32,
    #[serde(default = "default_mc_top_k")]
    pub mc_top_k: usize,
    #[serde(default = "default_mc_samples")]
    pub mc_samples: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_traffic_mu")]
    pub traffic_mu: f64,
    #[serde(default = "default_traffic_sigma")]
    pub traffic_sigma: f64,
    /// Heuristic weight on the gap to an opponent's best analytic score.
    #[serde(default = "default_opponent_penalty")]
    pub opponent_penalty: f64,
    #[serde(default = "default_model_cache")]
    pub model_cache_size: usize,
    #[serde(default = "default_profile_cache")]
    pub profile_cache_size: usize,
    #[serde(default = "default_curve_cache")]
    pub pace_curve_cache_size: usize,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default)]
    pub pace_curve_cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub features_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pit_window_bin: default_pit_window_bin(),
            mc_top_k: default_mc_top_k(),
            mc_samples: default_mc_samples(),
            seed: default_seed(),
            traffic_mu: default_traffic_mu(),
            traffic_sigma: default_traffic_sigma(),
            opponent_penalty: default_opponent_penalty(),
            model_cache_size: default_model_cache(),
            profile_cache_size: default_profile_cache(),
            pace_curve_cache_size: default_curve_cache(),
            models_dir: default_models_dir(),
            pace_curve_cache_dir: None,
            features_path: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&data, path)
    }

    pub fn from_json(data: &str, origin: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(data).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `ENGINE_CONFIG` file (if set) then `FEATURES_PATH`, `MODELS_DIR` and
    /// `PACE_CURVE_CACHE_DIR` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("ENGINE_CONFIG") {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(p) = std::env::var("FEATURES_PATH") {
            cfg.features_path = Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("MODELS_DIR") {
            cfg.models_dir = PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("PACE_CURVE_CACHE_DIR") {
            cfg.pace_curve_cache_dir = Some(PathBuf::from(p));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pit_window_bin == 0 {
            return Err(ConfigError::Invalid("pit_window_bin must be > 0".into()));
        }
        if self.mc_samples == 0 {
            return Err(ConfigError::Invalid("mc_samples must be > 0".into()));
        }
        if !(self.traffic_sigma >= 0.0) {
            return Err(ConfigError::Invalid("traffic_sigma must be >= 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_port);
        Self { port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg = EngineConfig::from_json("{}", "inline").unwrap();
        assert_eq!(cfg.pit_window_bin, 5);
        assert_eq!(cfg.mc_top_k, 5);
        assert_eq!(cfg.mc_samples, 200);
        assert_eq!(cfg.seed, 42);
        assert!((cfg.opponent_penalty - 0.25).abs() < 1e-12);
        assert!(cfg.pace_curve_cache_dir.is_none());
    }

    #[test]
    fn zero_bin_is_rejected() {
        let err = EngineConfig::from_json(r#"{"pit_window_bin":0}"#, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_names_its_origin() {
        let err = EngineConfig::from_json("{", "engine.json").unwrap_err();
        assert!(err.to_string().contains("engine.json"));
    }
}
