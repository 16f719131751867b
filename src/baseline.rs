//! Per-driver tyre degradation baselines.
//!
//! Profiles are fitted offline and written as JSON next to the pace models:
//! `driver_profile_{id}.json` for a driver and `driver_profile_global.json`
//! for the field-wide fit.

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::types::{Compound, DegradationParams};

pub trait DriverBaseline: Send + Sync {
    fn resolve(&self, driver_id: u32, circuit_id: &str, compound: Compound) -> DegradationParams;

    /// Driver-level per-compound fits, for debug output.
    fn driver_defaults(&self, driver_id: u32) -> BTreeMap<Compound, DegradationParams>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitProfile {
    pub circuit_id: String,
    pub compound: Compound,
    pub params: DegradationParams,
}

/// On-disk shape of a driver profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverProfileFile {
    pub driver_id: u32,
    #[serde(default)]
    pub profiles: Vec<CircuitProfile>,
    #[serde(default)]
    pub driver_defaults: BTreeMap<Compound, DegradationParams>,
}

#[derive(Debug, Clone)]
pub struct DriverProfile {
    pub driver_id: u32,
    pub profiles: HashMap<(String, Compound), DegradationParams>,
    pub driver_defaults: BTreeMap<Compound, DegradationParams>,
    pub global_defaults: Arc<BTreeMap<Compound, DegradationParams>>,
}

/// One level of the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupStep {
    CircuitCompound,
    DriverCompound,
    GlobalCompound,
}

const RESOLUTION_ORDER: [LookupStep; 3] = [
    LookupStep::CircuitCompound,
    LookupStep::DriverCompound,
    LookupStep::GlobalCompound,
];

impl DriverProfile {
    fn lookup(&self, step: LookupStep, circuit_id: &str, compound: Compound) -> Option<DegradationParams> {
        match step {
            LookupStep::CircuitCompound => self
                .profiles
                .get(&(circuit_id.to_string(), compound))
                .copied(),
            LookupStep::DriverCompound => self.driver_defaults.get(&compound).copied(),
            LookupStep::GlobalCompound => self.global_defaults.get(&compound).copied(),
        }
    }

    /// First hit in circuit → driver → global order, else the hardcoded constant.
    pub fn resolve(&self, circuit_id: &str, compound: Compound) -> DegradationParams {
        RESOLUTION_ORDER
            .iter()
            .find_map(|step| self.lookup(*step, circuit_id, compound))
            .unwrap_or(DegradationParams::CONSTANT)
    }
}

/// Loads driver profiles from a models directory into a bounded cache.
pub struct ProfileStore {
    dir: PathBuf,
    global: Arc<BTreeMap<Compound, DegradationParams>>,
    cache: Cache<u32, Arc<DriverProfile>>,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>, cache_size: usize) -> Self {
        let dir = dir.into();
        let global = Arc::new(load_global_defaults(&dir));
        Self {
            dir,
            global,
            cache: Cache::new(cache_size as u64),
        }
    }

    pub fn profile(&self, driver_id: u32) -> Arc<DriverProfile> {
        self.cache
            .get_with(driver_id, || Arc::new(self.load_profile(driver_id)))
    }

    fn load_profile(&self, driver_id: u32) -> DriverProfile {
        let path = self.dir.join(format!("driver_profile_{driver_id}.json"));
        let file = match read_json::<DriverProfileFile>(&path) {
            Some(f) => f,
            None => {
                tracing::debug!(driver_id, "no driver profile; using global defaults");
                DriverProfileFile {
                    driver_id,
                    ..Default::default()
                }
            }
        };
        DriverProfile {
            driver_id,
            profiles: file
                .profiles
                .into_iter()
                .map(|p| ((p.circuit_id, p.compound), p.params))
                .collect(),
            driver_defaults: file.driver_defaults,
            global_defaults: Arc::clone(&self.global),
        }
    }
}

impl DriverBaseline for ProfileStore {
    fn resolve(&self, driver_id: u32, circuit_id: &str, compound: Compound) -> DegradationParams {
        self.profile(driver_id).resolve(circuit_id, compound)
    }

    fn driver_defaults(&self, driver_id: u32) -> BTreeMap<Compound, DegradationParams> {
        self.profile(driver_id).driver_defaults.clone()
    }
}

fn load_global_defaults(dir: &Path) -> BTreeMap<Compound, DegradationParams> {
    let path = dir.join("driver_profile_global.json");
    read_json(&path).unwrap_or_else(|| {
        tracing::warn!(path = %path.display(), "global profile missing; using constant SOFT default");
        BTreeMap::from([(Compound::Soft, DegradationParams::CONSTANT)])
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable profile");
            None
        }
    }
}
