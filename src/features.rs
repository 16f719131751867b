//! Historical lap features and the aggregate queries the engine runs on them.

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use crate::error::{EngineError, Result};
use crate::types::{
    default_tyre_life_bounds, Compound, CompoundStats, LifeBounds, RaceContext, TyreLifeBounds,
};

const FALLBACK_SLOPE: f64 = 0.04;
const MIN_SAMPLES_FOR_FIT: usize = 4;
const DEFAULT_PIT_LOSS: f64 = 22.5;
const DEFAULT_SC_PROBABILITY: f64 = 0.2;

/// One preprocessed lap as produced by the feature-extraction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    pub year: i32,
    pub circuit_id: String,
    pub driver_id: u32,
    pub session_key: i64,
    pub session_type: String,
    pub lap_number: u32,
    #[serde(default)]
    pub stint_number: Option<i32>,
    pub stint_age: u32,
    #[serde(default)]
    pub compound: Option<String>,
    pub lap_time: f64,
    #[serde(default)]
    pub track_temp: Option<f64>,
    #[serde(default)]
    pub air_temp: Option<f64>,
}

impl LapRecord {
    fn dry_compound(&self) -> Option<Compound> {
        self.compound.as_deref().and_then(|c| c.parse().ok())
    }
}

pub trait FeatureStore: Send + Sync {
    /// Race context for (year, circuit); fixed defaults when nothing is known.
    fn get_context(&self, year: i32, circuit_id: &str) -> RaceContext;

    /// Median pace and degradation slope per dry compound, for the driver if
    /// they have laps at the circuit, else for the whole field.
    fn get_compound_stats(
        &self,
        driver_id: u32,
        year: i32,
        circuit_id: &str,
    ) -> BTreeMap<Compound, CompoundStats>;

    fn get_tyre_life_bounds(&self, year: i32, circuit_id: &str) -> TyreLifeBounds;

    fn is_empty(&self) -> bool;
}

/// Feature store over rows held in memory, indexed by (year, circuit).
#[derive(Debug, Default)]
pub struct InMemoryFeatureStore {
    by_race: HashMap<(i32, String), Vec<LapRecord>>,
    rows: usize,
}

impl InMemoryFeatureStore {
    pub fn from_records(records: Vec<LapRecord>) -> Self {
        let rows = records.len();
        let mut by_race: HashMap<(i32, String), Vec<LapRecord>> = HashMap::new();
        for r in records {
            by_race.entry((r.year, r.circuit_id.clone())).or_default().push(r);
        }
        Self { by_race, rows }
    }

    /// Load a JSON-lines file with one [`LapRecord`] per line.
    pub fn from_jsonl_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut records = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let rec: LapRecord = serde_json::from_str(line).map_err(|source| EngineError::Decode {
                path: path.display().to_string(),
                source,
            })?;
            records.push(rec);
        }
        tracing::info!(path = %path.display(), rows = records.len(), "loaded lap features");
        Ok(Self::from_records(records))
    }

    fn race_rows(&self, year: i32, circuit_id: &str) -> &[LapRecord] {
        self.by_race
            .get(&(year, circuit_id.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.rows
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn get_context(&self, year: i32, circuit_id: &str) -> RaceContext {
        let rows = self.race_rows(year, circuit_id);
        if rows.is_empty() {
            tracing::debug!(year, circuit_id, "no laps for race; using fallback context");
            return RaceContext::fallback(year);
        }

        let race_max = rows
            .iter()
            .filter(|r| r.session_type == "RACE")
            .map(|r| r.lap_number)
            .max();
        let total_laps = race_max
            .or_else(|| rows.iter().map(|r| r.lap_number).max())
            .unwrap_or(55);

        RaceContext {
            year,
            total_laps,
            track_temp: mean(rows.iter().filter_map(|r| r.track_temp)).unwrap_or(30.0),
            air_temp: mean(rows.iter().filter_map(|r| r.air_temp)).unwrap_or(22.0),
            pit_loss: DEFAULT_PIT_LOSS,
            sc_probability: DEFAULT_SC_PROBABILITY,
        }
    }

    fn get_compound_stats(
        &self,
        driver_id: u32,
        year: i32,
        circuit_id: &str,
    ) -> BTreeMap<Compound, CompoundStats> {
        let rows = self.race_rows(year, circuit_id);
        let driver_rows: Vec<&LapRecord> = rows.iter().filter(|r| r.driver_id == driver_id).collect();
        let selected: Vec<&LapRecord> = if driver_rows.is_empty() {
            rows.iter().collect()
        } else {
            driver_rows
        };

        let mut grouped: BTreeMap<Compound, Vec<&LapRecord>> = BTreeMap::new();
        for r in selected {
            if let Some(c) = r.dry_compound() {
                grouped.entry(c).or_default().push(r);
            }
        }

        grouped
            .into_iter()
            .map(|(compound, laps)| {
                let mut times: Vec<f64> = laps.iter().map(|r| r.lap_time).collect();
                let base = median(&mut times);
                let slope = if laps.len() >= MIN_SAMPLES_FOR_FIT {
                    let xs: Vec<f64> = laps.iter().map(|r| f64::from(r.stint_age)).collect();
                    let ys: Vec<f64> = laps.iter().map(|r| r.lap_time).collect();
                    linear_slope(&xs, &ys).unwrap_or(FALLBACK_SLOPE)
                } else {
                    FALLBACK_SLOPE
                };
                (compound, CompoundStats { base, slope })
            })
            .collect()
    }

    fn get_tyre_life_bounds(&self, year: i32, circuit_id: &str) -> TyreLifeBounds {
        let rows = self.race_rows(year, circuit_id);
        if rows.is_empty() {
            return default_tyre_life_bounds();
        }

        // Completed stint length = oldest tyre age seen within the stint.
        // Laps with no stint number belong to no stint.
        let mut stints: HashMap<(u32, i64, i32, Compound), u32> = HashMap::new();
        for r in rows {
            let (Some(c), Some(stint)) = (r.dry_compound(), r.stint_number) else {
                continue;
            };
            let age = stints
                .entry((r.driver_id, r.session_key, stint, c))
                .or_insert(0);
            *age = (*age).max(r.stint_age);
        }

        let mut per_compound: BTreeMap<Compound, Vec<f64>> = BTreeMap::new();
        for ((_, _, _, c), len) in stints {
            per_compound.entry(c).or_default().push(f64::from(len));
        }

        let bounds: TyreLifeBounds = per_compound
            .into_iter()
            .filter_map(|(c, mut lens)| {
                lens.sort_by(f64::total_cmp);
                let q20 = quantile_sorted(&lens, 0.2)? as u32;
                let q80 = quantile_sorted(&lens, 0.8)? as u32;
                let min = q20.max(8);
                Some((c, LifeBounds::new(min, q80.max(min + 4))))
            })
            .collect();

        if bounds.is_empty() {
            default_tyre_life_bounds()
        } else {
            bounds
        }
    }

    fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

// ---------- small numeric helpers ----------

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Least-squares slope of `ys` against `xs`; `None` when `xs` has no spread.
pub(crate) fn linear_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mx = xs[..n].iter().sum::<f64>() / n as f64;
    let my = ys[..n].iter().sum::<f64>() / n as f64;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for i in 0..n {
        let dx = xs[i] - mx;
        sxy += dx * (ys[i] - my);
        sxx += dx * dx;
    }
    (sxx > f64::EPSILON).then(|| sxy / sxx)
}

/// Linear-interpolated quantile of an ascending slice.
fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
