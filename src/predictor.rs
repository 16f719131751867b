use anyhow::Result;
use moka::sync::Cache;
use std::{path::PathBuf, sync::Arc};

use crate::types::{Compound, DegradationParams, RaceContext};

/// Synthetic stint handed to the pace model: one entry per lap.
#[derive(Debug, Clone, PartialEq)]
pub struct StintRecords {
    pub circuit_id: String,
    pub compound: Compound,
    pub session_type: String,
    pub track_temp: f64,
    pub air_temp: f64,
    pub lap_number: Vec<u32>,
    pub stint_age: Vec<u32>,
    /// Baseline lap time per lap, seconds.
    pub lap_time: Vec<f64>,
}

impl StintRecords {
    /// Fresh-tyre stint of `laps` laps following the degradation baseline.
    pub fn from_baseline(
        circuit_id: &str,
        compound: Compound,
        params: &DegradationParams,
        context: &RaceContext,
        laps: u32,
    ) -> Self {
        let lap_number: Vec<u32> = (1..=laps).collect();
        let lap_time = lap_number
            .iter()
            .map(|&lap| params.lap_time(lap, context.track_temp, context.air_temp))
            .collect();
        Self {
            circuit_id: circuit_id.to_string(),
            compound,
            session_type: "RACE".to_string(),
            track_temp: context.track_temp,
            air_temp: context.air_temp,
            stint_age: lap_number.clone(),
            lap_number,
            lap_time,
        }
    }

    pub fn len(&self) -> usize {
        self.lap_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lap_time.is_empty()
    }
}

/// Maps a stint description to predicted lap times. Deterministic for fixed weights.
pub trait PacePredictor: Send + Sync {
    fn predict(&self, stint: &StintRecords) -> Result<Vec<f64>>;
}

/// Passes the baseline series through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaselinePredictor;

impl PacePredictor for BaselinePredictor {
    fn predict(&self, stint: &StintRecords) -> Result<Vec<f64>> {
        Ok(stint.lap_time.clone())
    }
}

/// Source of compiled pace models by artifact name (`driver_16`, `global`).
pub trait PaceModelLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<Arc<dyn PacePredictor>>>;
}

/// Reads `{name}.pt` + `{name}.meta.json` TorchScript artifacts from a directory.
pub struct FileModelLoader {
    dir: PathBuf,
}

impl FileModelLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PaceModelLoader for FileModelLoader {
    #[cfg(feature = "torch")]
    fn load(&self, name: &str) -> Result<Option<Arc<dyn PacePredictor>>> {
        let model_path = self.dir.join(format!("{name}.pt"));
        let meta_path = self.dir.join(format!("{name}.meta.json"));
        if !model_path.exists() || !meta_path.exists() {
            return Ok(None);
        }
        let model = crate::model::TorchPacePredictor::new(&model_path, &meta_path)?;
        Ok(Some(Arc::new(model)))
    }

    #[cfg(not(feature = "torch"))]
    fn load(&self, name: &str) -> Result<Option<Arc<dyn PacePredictor>>> {
        tracing::trace!(name, dir = %self.dir.display(), "built without torch; no model artifacts");
        Ok(None)
    }
}

/// Compiled pace model per driver, falling back to the global model and
/// then to [`BaselinePredictor`].
///
/// Concurrent lookups for the same driver share a single load.
pub struct ModelRegistry {
    loader: Box<dyn PaceModelLoader>,
    models: Cache<u32, Arc<dyn PacePredictor>>,
}

impl ModelRegistry {
    pub fn new(loader: Box<dyn PaceModelLoader>, cache_size: usize) -> Self {
        Self {
            loader,
            models: Cache::new(cache_size as u64),
        }
    }

    pub fn get(&self, driver_id: u32) -> Result<Arc<dyn PacePredictor>> {
        self.models
            .try_get_with(driver_id, || self.load_uncached(driver_id))
            .map_err(|e| anyhow::anyhow!("{e:#}"))
    }

    fn load_uncached(&self, driver_id: u32) -> Result<Arc<dyn PacePredictor>> {
        if let Some(m) = self.loader.load(&format!("driver_{driver_id}"))? {
            tracing::info!(driver_id, "loaded per-driver pace model");
            return Ok(m);
        }
        if let Some(m) = self.loader.load("global")? {
            tracing::info!(driver_id, "no per-driver pace model; using global model");
            return Ok(m);
        }
        tracing::warn!(driver_id, "no pace model artifacts; using baseline predictor");
        Ok(Arc::new(BaselinePredictor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    struct Offset(f64);

    impl PacePredictor for Offset {
        fn predict(&self, stint: &StintRecords) -> Result<Vec<f64>> {
            Ok(stint.lap_time.iter().map(|t| t + self.0).collect())
        }
    }

    /// Only a `global` artifact exists; every load attempt is counted.
    struct OnlyGlobal {
        loads: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl PaceModelLoader for OnlyGlobal {
        fn load(&self, name: &str) -> Result<Option<Arc<dyn PacePredictor>>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok((name == "global").then(|| Arc::new(Offset(1.0)) as Arc<dyn PacePredictor>))
        }
    }

    struct Broken;

    impl PaceModelLoader for Broken {
        fn load(&self, _name: &str) -> Result<Option<Arc<dyn PacePredictor>>> {
            anyhow::bail!("corrupt artifact")
        }
    }

    fn registry(delay: Duration) -> (ModelRegistry, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = OnlyGlobal {
            loads: Arc::clone(&loads),
            delay,
        };
        (ModelRegistry::new(Box::new(loader), 4), loads)
    }

    fn stint() -> StintRecords {
        StintRecords::from_baseline(
            "Monza",
            Compound::Soft,
            &DegradationParams::CONSTANT,
            &RaceContext::fallback(2024),
            3,
        )
    }

    #[test]
    fn baseline_stint_follows_params() {
        let s = stint();
        assert_eq!(s.lap_number, vec![1, 2, 3]);
        assert_eq!(s.stint_age, vec![1, 2, 3]);
        assert!((s.lap_time[2] - 90.1).abs() < 1e-9);
    }

    #[test]
    fn registry_falls_back_to_global_and_caches() {
        let (registry, loads) = registry(Duration::ZERO);
        let m = registry.get(16).unwrap();
        let out = m.predict(&stint()).unwrap();
        assert!((out[0] - 91.0).abs() < 1e-9);
        // driver_16 then global
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        registry.get(16).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_misses_share_one_load() {
        let (registry, loads) = registry(Duration::from_millis(50));
        let registry = Arc::new(registry);
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get(44).unwrap().predict(&stint()).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert!((h.join().unwrap()[0] - 91.0).abs() < 1e-9);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn load_errors_surface_and_are_not_cached() {
        let registry = ModelRegistry::new(Box::new(Broken), 4);
        let err = registry.get(1).err().unwrap();
        assert!(err.to_string().contains("corrupt artifact"));
        assert!(registry.get(1).is_err());
    }

    #[test]
    fn registry_without_artifacts_uses_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(Box::new(FileModelLoader::new(dir.path())), 4);
        let out = registry.get(1).unwrap().predict(&stint()).unwrap();
        assert_eq!(out, stint().lap_time);
    }
}
