//! Scoring, ordering, near-duplicate removal and strategy fingerprints.

use serde_json::json;

use crate::types::{PaceCurves, StintCurve, StrategyCandidate};

const FINGERPRINT_HEX_LEN: usize = 16;

/// Lower is better. The opponent penalty shifts the score only, never the
/// reported mean.
pub fn score(
    mean: f64,
    variance: f64,
    risk_bias: f64,
    opponent_best: Option<f64>,
    opponent_penalty: f64,
) -> f64 {
    let mut s = mean + risk_bias * variance;
    if let Some(best) = opponent_best {
        if mean > best {
            s += (mean - best) * opponent_penalty;
        }
    }
    s
}

/// Evaluation of one candidate, analytic or refined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub index: usize,
    pub mean: f64,
    pub variance: f64,
    pub score: f64,
}

/// Ascending by score; ties keep generation order.
pub fn sort_by_score(scored: &mut [Scored]) {
    scored.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.index.cmp(&b.index)));
}

/// Stop laps binned by `bin` laps.
pub fn cluster_key(candidate: &StrategyCandidate, bin: u32) -> Vec<u32> {
    candidate.stop_laps.iter().map(|s| s / bin).collect()
}

/// Keep the first candidate per cluster key, up to `limit`; never pads.
pub fn dedup<'a, I>(ordered: I, bin: u32, limit: usize) -> Vec<&'a StrategyCandidate>
where
    I: IntoIterator<Item = &'a StrategyCandidate>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for c in ordered {
        if out.len() >= limit {
            break;
        }
        if seen.insert(cluster_key(c, bin)) {
            out.push(c);
        }
    }
    out
}

/// Deterministic 16-hex id over the strategy's identifying fields.
pub fn strategy_id(year: i32, circuit_id: &str, driver_id: u32, c: &StrategyCandidate) -> String {
    // serde_json objects keep keys sorted, so the serialization is canonical.
    let canonical = json!({
        "year": year,
        "circuit_id": circuit_id,
        "driver_id": driver_id,
        "type": c.strategy_type,
        "compounds": c.compounds,
        "stints": c.stint_lengths,
        "stop_laps": c.stop_laps,
        "pit_windows": c.pit_windows,
    });
    let digest = blake3::hash(canonical.to_string().as_bytes());
    digest.to_hex()[..FINGERPRINT_HEX_LEN].to_string()
}

// ---------- per-stint report curves ----------

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// Lap times and a 100 → 0 tyre-life trace per stint, laps numbered from 1.
pub fn stint_curves(candidate: &StrategyCandidate, curves: &PaceCurves) -> Vec<StintCurve> {
    let mut out = Vec::with_capacity(candidate.stint_lengths.len());
    let mut start_lap = 1;

    for (&len, &compound) in candidate.stint_lengths.iter().zip(&candidate.compounds) {
        let n = len as usize;
        if n == 0 {
            continue;
        }
        let raw: Vec<f64> = match curves.get(&compound).filter(|s| s.len() >= n) {
            Some(series) => series[..n].to_vec(),
            None => linspace(90.0, 92.0, n),
        };

        // Running max so the displayed degradation never recovers.
        let mut mono = raw.clone();
        for i in 1..mono.len() {
            mono[i] = mono[i].max(mono[i - 1]);
        }
        let total_deg = mono[n - 1] - mono[0];
        let life: Vec<f64> = if total_deg <= 1e-6 {
            linspace(100.0, 90.0, n)
        } else {
            mono.iter()
                .map(|m| 100.0 - (m - mono[0]) / total_deg * 100.0)
                .collect()
        };

        let end_lap = start_lap + len - 1;
        out.push(StintCurve {
            compound,
            start_lap,
            end_lap,
            lap_time_data: raw.into_iter().map(round4).collect(),
            tyre_life_data: life.into_iter().map(|v| round4(v.clamp(0.0, 100.0))).collect(),
        });
        start_lap = end_lap + 1;
    }
    out
}
