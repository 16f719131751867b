//! Closed-form mean and variance of total race time.

use crate::types::{Compound, PaceCurves, RaceContext, StrategyCandidate};

/// Flat lap time used when neither the stint compound nor MEDIUM has a long
/// enough curve.
pub const DEFAULT_LAP_TIME: f64 = 90.0;
pub const SC_TIME_LOSS: f64 = 15.0;
pub const SC_PIT_LOSS_FLOOR: f64 = 12.0;
pub const SC_PIT_SAVING: f64 = 8.0;
/// Laps either side of a stop (plus the stop lap) over which a safety car helps.
const SC_WINDOW_LAPS: f64 = 5.0;

/// Additive per-lap traffic noise: mean `mu` s/lap, std-dev `sigma` s/lap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficModel {
    pub mu: f64,
    pub sigma: f64,
}

impl Default for TrafficModel {
    fn default() -> Self {
        Self { mu: 0.15, sigma: 0.05 }
    }
}

/// Sum of the first `len` laps of the compound's curve, else MEDIUM's, else
/// a flat default.
pub fn stint_time(curves: &PaceCurves, compound: Compound, len: u32) -> f64 {
    let n = len as usize;
    [compound, Compound::Medium]
        .iter()
        .filter_map(|c| curves.get(c))
        .find(|series| series.len() >= n)
        .map(|series| series[..n].iter().sum::<f64>())
        .unwrap_or(DEFAULT_LAP_TIME * f64::from(len))
}

pub fn reduced_pit_loss(pit_loss: f64) -> f64 {
    SC_PIT_LOSS_FLOOR.max(pit_loss - SC_PIT_SAVING)
}

/// Returns `(mean, variance)`; variance is clamped at zero.
pub fn evaluate(
    candidate: &StrategyCandidate,
    curves: &PaceCurves,
    context: &RaceContext,
    traffic: TrafficModel,
) -> (f64, f64) {
    let mut mean = 0.0;
    let mut var = 0.0;

    for (&len, &compound) in candidate.stint_lengths.iter().zip(&candidate.compounds) {
        mean += stint_time(curves, compound, len);
        mean += traffic.mu * f64::from(len);
        var += traffic.sigma.powi(2) * f64::from(len);
    }

    let sc_range = (f64::from(context.total_laps) - 9.0).max(1.0);
    let p_sc = context.sc_probability * (SC_WINDOW_LAPS / sc_range).min(1.0);
    let normal = context.pit_loss;
    let reduced = reduced_pit_loss(context.pit_loss);
    for _ in &candidate.stop_laps {
        let m = p_sc * reduced + (1.0 - p_sc) * normal;
        mean += m;
        var += p_sc * reduced.powi(2) + (1.0 - p_sc) * normal.powi(2) - m.powi(2);
    }

    let sc_mean = context.sc_probability * SC_TIME_LOSS;
    mean += sc_mean;
    var += context.sc_probability * SC_TIME_LOSS.powi(2) - sc_mean.powi(2);

    (mean, var.max(0.0))
}
