//! Memoized full-race pace curves.
//!
//! A curve gives the predicted lap time for every tyre age from 1 to
//! `total_laps` on one compound. Curves are keyed by the race, the driver
//! and ambient temperatures rounded to 0.1 °C, held in a bounded in-memory
//! cache and optionally mirrored to JSON files so later runs skip the model.

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::baseline::DriverBaseline;
use crate::error::{EngineError, Result};
use crate::predictor::{PacePredictor, StintRecords};
use crate::types::{Compound, CompoundStats, DegradationParams, PaceCurves, RaceContext};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaceCurveKey {
    pub year: i32,
    pub circuit_id: String,
    pub driver_id: u32,
    /// Temperatures in tenths of a degree.
    pub track_temp_dc: i64,
    pub air_temp_dc: i64,
}

impl PaceCurveKey {
    pub fn new(year: i32, circuit_id: &str, driver_id: u32, context: &RaceContext) -> Self {
        Self {
            year,
            circuit_id: circuit_id.to_string(),
            driver_id,
            track_temp_dc: (context.track_temp * 10.0).round() as i64,
            air_temp_dc: (context.air_temp * 10.0).round() as i64,
        }
    }

    fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{:.1}_{:.1}.json",
            self.year,
            self.circuit_id.replace(' ', "_"),
            self.driver_id,
            self.track_temp_dc as f64 / 10.0,
            self.air_temp_dc as f64 / 10.0,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CurveRow {
    lap: u32,
    compound: Compound,
    lap_time: f64,
}

pub struct PaceCurveCache {
    memory: Cache<PaceCurveKey, Arc<PaceCurves>>,
    dir: Option<PathBuf>,
}

impl PaceCurveCache {
    pub fn new(capacity: usize, dir: Option<PathBuf>) -> Self {
        Self {
            memory: Cache::new(capacity as u64),
            dir,
        }
    }

    /// Cached curves for the key, building through the predictor on a miss.
    /// Concurrent misses on one key wait for a single build.
    pub fn get_or_build(
        &self,
        year: i32,
        circuit_id: &str,
        driver_id: u32,
        context: &RaceContext,
        baseline: &dyn DriverBaseline,
        predictor: &dyn PacePredictor,
    ) -> Result<Arc<PaceCurves>> {
        let key = PaceCurveKey::new(year, circuit_id, driver_id, context);
        if let Some(curves) = self.memory.get(&key) {
            tracing::debug!(year, circuit_id, driver_id, "pace curve cache hit");
            return Ok(curves);
        }

        let curves = self
            .memory
            .try_get_with(key.clone(), || -> Result<Arc<PaceCurves>> {
                if let Some(curves) = self.load_persisted(&key) {
                    tracing::debug!(year, circuit_id, driver_id, "pace curves loaded from disk");
                    return Ok(Arc::new(curves));
                }
                tracing::debug!(year, circuit_id, driver_id, "pace curve cache miss; building");
                let curves = build_curves(circuit_id, driver_id, context, baseline, predictor)?;
                self.persist(&key, &curves);
                Ok(Arc::new(curves))
            })
            .map_err(anyhow::Error::new)?;
        Ok(curves)
    }

    /// Entries currently held in memory; settles pending evictions first.
    pub fn len(&self) -> usize {
        self.memory.run_pending_tasks();
        self.memory.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn path_for(&self, key: &PaceCurveKey) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(key.file_name()))
    }

    fn load_persisted(&self, key: &PaceCurveKey) -> Option<PaceCurves> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return None;
        }
        match read_curves(&path) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable pace curve file");
                None
            }
        }
    }

    fn persist(&self, key: &PaceCurveKey, curves: &PaceCurves) {
        let Some(path) = self.path_for(key) else { return };
        if let Err(e) = write_curves(&path, curves) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist pace curves");
        }
    }
}

fn build_curves(
    circuit_id: &str,
    driver_id: u32,
    context: &RaceContext,
    baseline: &dyn DriverBaseline,
    predictor: &dyn PacePredictor,
) -> Result<PaceCurves> {
    let mut curves = PaceCurves::new();
    for compound in Compound::ALL {
        let params = baseline.resolve(driver_id, circuit_id, compound);
        let stint =
            StintRecords::from_baseline(circuit_id, compound, &params, context, context.total_laps);
        curves.insert(compound, predictor.predict(&stint)?);
    }
    Ok(curves)
}

/// Single stint prediction from compound stats, used when a full-race curve
/// is missing or shorter than the stint.
pub fn predict_stint(
    predictor: &dyn PacePredictor,
    circuit_id: &str,
    compound: Compound,
    stats: Option<&CompoundStats>,
    context: &RaceContext,
    laps: u32,
) -> Result<Vec<f64>> {
    let params = DegradationParams {
        base: stats.map_or(90.0, |s| s.base),
        slope: stats.map_or(0.05, |s| s.slope),
        track_coef: 0.0,
        air_coef: 0.0,
        track_ref: context.track_temp,
        air_ref: context.air_temp,
    };
    let stint = StintRecords::from_baseline(circuit_id, compound, &params, context, laps);
    Ok(predictor.predict(&stint)?)
}

fn write_curves(path: &Path, curves: &PaceCurves) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| EngineError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let rows: Vec<CurveRow> = curves
        .iter()
        .flat_map(|(compound, series)| {
            series.iter().enumerate().map(move |(i, &lap_time)| CurveRow {
                lap: i as u32 + 1,
                compound: *compound,
                lap_time,
            })
        })
        .collect();
    let body = serde_json::to_vec(&rows).map_err(|source| EngineError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    write_atomic(path, &body)
}

/// Write a sibling temp file and rename it over `path`, so readers never
/// observe a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let tmp = path.with_extension(format!(
        "tmp-{}-{}",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, bytes).map_err(|source| EngineError::Io {
        path: tmp.display().to_string(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        EngineError::Io {
            path: path.display().to_string(),
            source,
        }
    })
}

fn read_curves(path: &Path) -> Result<PaceCurves> {
    let text = fs::read(path).map_err(|source| EngineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut rows: Vec<CurveRow> = serde_json::from_slice(&text).map_err(|source| EngineError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    rows.sort_by_key(|r| (r.compound, r.lap));
    let mut curves = PaceCurves::new();
    for r in rows {
        curves.entry(r.compound).or_default().push(r.lap_time);
    }
    Ok(curves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::BaselinePredictor;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBaseline;

    impl DriverBaseline for FixedBaseline {
        fn resolve(&self, _driver: u32, _circuit: &str, compound: Compound) -> DegradationParams {
            let base = match compound {
                Compound::Soft => 80.0,
                Compound::Medium => 80.5,
                Compound::Hard => 81.0,
            };
            DegradationParams {
                base,
                slope: 0.1,
                track_coef: 0.05,
                air_coef: 0.0,
                track_ref: 30.0,
                air_ref: 22.0,
            }
        }

        fn driver_defaults(&self, _driver: u32) -> BTreeMap<Compound, DegradationParams> {
            BTreeMap::new()
        }
    }

    struct Counting(AtomicUsize);

    impl PacePredictor for Counting {
        fn predict(&self, stint: &StintRecords) -> anyhow::Result<Vec<f64>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(stint.lap_time.clone())
        }
    }

    fn ctx(track: f64) -> RaceContext {
        RaceContext {
            track_temp: track,
            total_laps: 20,
            ..RaceContext::fallback(2024)
        }
    }

    #[test]
    fn builds_full_length_curves_with_temperature_offset() {
        let cache = PaceCurveCache::new(4, None);
        let curves = cache
            .get_or_build(2024, "Monza", 1, &ctx(40.0), &FixedBaseline, &BaselinePredictor)
            .unwrap();
        assert_eq!(curves.len(), 3);
        let soft = &curves[&Compound::Soft];
        assert_eq!(soft.len(), 20);
        // 80 + 0.05 * (40 - 30)
        assert!((soft[0] - 80.5).abs() < 1e-9);
        assert!((soft[19] - (80.5 + 1.9)).abs() < 1e-9);
    }

    #[test]
    fn temperatures_are_rounded_into_the_key() {
        let predictor = Counting(AtomicUsize::new(0));
        let cache = PaceCurveCache::new(4, None);
        cache
            .get_or_build(2024, "Monza", 1, &ctx(40.01), &FixedBaseline, &predictor)
            .unwrap();
        cache
            .get_or_build(2024, "Monza", 1, &ctx(40.04), &FixedBaseline, &predictor)
            .unwrap();
        assert_eq!(predictor.0.load(Ordering::SeqCst), 3);
        cache
            .get_or_build(2024, "Monza", 1, &ctx(40.2), &FixedBaseline, &predictor)
            .unwrap();
        assert_eq!(predictor.0.load(Ordering::SeqCst), 6);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn persisted_curves_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let first = PaceCurveCache::new(4, Some(dir.path().to_path_buf()));
        let built = first
            .get_or_build(2024, "Las Vegas", 1, &ctx(33.33), &FixedBaseline, &BaselinePredictor)
            .unwrap();
        assert!(dir.path().join("2024_Las_Vegas_1_33.3_22.0.json").exists());

        let predictor = Counting(AtomicUsize::new(0));
        let second = PaceCurveCache::new(4, Some(dir.path().to_path_buf()));
        let loaded = second
            .get_or_build(2024, "Las Vegas", 1, &ctx(33.33), &FixedBaseline, &predictor)
            .unwrap();
        assert_eq!(predictor.0.load(Ordering::SeqCst), 0);
        for c in Compound::ALL {
            for (a, b) in built[&c].iter().zip(&loaded[&c]) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn concurrent_misses_build_once() {
        struct Slow(AtomicUsize);

        impl PacePredictor for Slow {
            fn predict(&self, stint: &StintRecords) -> anyhow::Result<Vec<f64>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(stint.lap_time.clone())
            }
        }

        let predictor = Slow(AtomicUsize::new(0));
        let cache = PaceCurveCache::new(4, None);
        let barrier = std::sync::Barrier::new(8);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    let curves = cache
                        .get_or_build(2024, "Monza", 1, &ctx(40.0), &FixedBaseline, &predictor)
                        .unwrap();
                    assert_eq!(curves[&Compound::Hard].len(), 20);
                });
            }
        });
        // One build: one prediction per compound.
        assert_eq!(predictor.0.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn persisted_file_is_replaced_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curves.json");
        std::fs::write(&path, b"[{\"lap\": 1, \"comp").unwrap();

        let curves = PaceCurves::from([(Compound::Medium, vec![81.0, 81.25])]);
        write_curves(&path, &curves).unwrap();
        assert_eq!(read_curves(&path).unwrap(), curves);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("curves.json")]);
    }

    #[test]
    fn stint_fallback_uses_stats_or_defaults() {
        let context = ctx(30.0);
        let stats = CompoundStats { base: 85.0, slope: 0.2 };
        let s = predict_stint(&BaselinePredictor, "Monza", Compound::Hard, Some(&stats), &context, 3)
            .unwrap();
        assert_eq!(s.len(), 3);
        assert!((s[2] - 85.4).abs() < 1e-9);
        let d = predict_stint(&BaselinePredictor, "Monza", Compound::Hard, None, &context, 2).unwrap();
        assert!((d[1] - 90.05).abs() < 1e-9);
    }
}
