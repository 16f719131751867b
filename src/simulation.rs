//! Monte Carlo refinement of shortlisted strategies.
//!
//! Each evaluation owns its RNG, seeded from the engine seed and the
//! strategy fingerprint, so samples do not depend on which other requests
//! ran first.

use anyhow::{anyhow, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::evaluator::{reduced_pit_loss, TrafficModel, SC_TIME_LOSS};
use crate::types::{Compound, PaceCurves, RaceContext, StrategyCandidate};

/// Laps from a stop within which a safety car cuts the pit loss.
const SC_STOP_PROXIMITY: i64 = 2;
const SC_FIRST_LAP: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub mean: f64,
    pub variance: f64,
    pub samples: Vec<f64>,
}

pub fn evaluation_seed(engine_seed: u64, fingerprint: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&engine_seed.to_le_bytes());
    hasher.update(fingerprint.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Simulate `n_sim` races for one candidate.
///
/// `fallback` supplies a stint's lap times when the full-race curve for its
/// compound is missing or shorter than the stint.
pub fn refine<F>(
    candidate: &StrategyCandidate,
    curves: &PaceCurves,
    context: &RaceContext,
    traffic: TrafficModel,
    n_sim: usize,
    seed: u64,
    mut fallback: F,
) -> Result<SimulationResult>
where
    F: FnMut(Compound, u32) -> Result<Vec<f64>>,
{
    let n_sim = n_sim.max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut stints = Vec::with_capacity(candidate.stint_lengths.len());
    for (&len, &compound) in candidate.stint_lengths.iter().zip(&candidate.compounds) {
        let n = len as usize;
        let base_sum: f64 = match curves.get(&compound).filter(|s| s.len() >= n) {
            Some(series) => series[..n].iter().sum(),
            None => {
                tracing::debug!(%compound, len, "pace curve too short; predicting stint directly");
                fallback(compound, len)?.iter().take(n).sum()
            }
        };
        let noise = Normal::new(
            traffic.mu * f64::from(len),
            traffic.sigma * f64::from(len).sqrt(),
        )
        .map_err(|e| anyhow!("invalid traffic noise: {e}"))?;
        stints.push((base_sum, noise));
    }

    let normal_loss = context.pit_loss;
    let reduced_loss = reduced_pit_loss(context.pit_loss);
    let stops = candidate.stop_laps.len() as f64;
    let last_sc_lap = context.total_laps.saturating_sub(5).max(SC_FIRST_LAP);

    let mut samples = Vec::with_capacity(n_sim);
    for _ in 0..n_sim {
        let sc_event = rng.gen_bool(context.sc_probability.clamp(0.0, 1.0));
        let sc_lap = rng.gen_range(SC_FIRST_LAP..=last_sc_lap);

        let near_stop = candidate
            .stop_laps
            .iter()
            .any(|&s| (i64::from(sc_lap) - i64::from(s)).abs() <= SC_STOP_PROXIMITY);
        let pit_loss = if sc_event && near_stop {
            reduced_loss
        } else {
            normal_loss
        };

        let mut total: f64 = stints
            .iter()
            .map(|(base, noise)| base + noise.sample(&mut rng))
            .sum();
        total += pit_loss * stops;
        if sc_event {
            total += SC_TIME_LOSS;
        }
        samples.push(total);
    }

    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Ok(SimulationResult {
        mean,
        variance,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::evaluate;
    use crate::types::{PitWindow, StrategyType};

    fn candidate() -> StrategyCandidate {
        StrategyCandidate {
            index: 3,
            strategy_type: StrategyType::OneStop,
            compounds: vec![Compound::Medium, Compound::Hard],
            stint_lengths: vec![24, 33],
            pit_windows: vec![PitWindow { lap_min: 23, lap_max: 26 }],
            stop_laps: vec![24],
        }
    }

    fn curves() -> PaceCurves {
        PaceCurves::from([
            (Compound::Medium, vec![81.0; 57]),
            (Compound::Hard, vec![82.0; 57]),
        ])
    }

    fn ctx() -> RaceContext {
        RaceContext {
            total_laps: 57,
            ..RaceContext::fallback(2024)
        }
    }

    fn no_fallback(_: Compound, _: u32) -> Result<Vec<f64>> {
        Err(anyhow!("fallback not expected"))
    }

    #[test]
    fn same_seed_same_samples() {
        let a = refine(&candidate(), &curves(), &ctx(), TrafficModel::default(), 200, 7, no_fallback)
            .unwrap();
        let b = refine(&candidate(), &curves(), &ctx(), TrafficModel::default(), 200, 7, no_fallback)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.samples.len(), 200);
        let c = refine(&candidate(), &curves(), &ctx(), TrafficModel::default(), 200, 8, no_fallback)
            .unwrap();
        assert_ne!(a.samples, c.samples);
    }

    #[test]
    fn tracks_the_analytic_mean() {
        let (analytic, _) = evaluate(&candidate(), &curves(), &ctx(), TrafficModel::default());
        let mc = refine(&candidate(), &curves(), &ctx(), TrafficModel::default(), 4000, 1, no_fallback)
            .unwrap();
        assert!((mc.mean - analytic).abs() < 1.0, "mc={} analytic={}", mc.mean, analytic);
        assert!(mc.variance >= 0.0);
    }

    #[test]
    fn no_safety_car_no_noise_is_exact() {
        let context = RaceContext {
            sc_probability: 0.0,
            ..ctx()
        };
        let traffic = TrafficModel { mu: 0.0, sigma: 0.0 };
        let mc = refine(&candidate(), &curves(), &context, traffic, 10, 1, no_fallback).unwrap();
        let expected = 24.0 * 81.0 + 33.0 * 82.0 + 22.5;
        assert!(mc.samples.iter().all(|s| (s - expected).abs() < 1e-9));
        assert!(mc.variance.abs() < 1e-9);
    }

    #[test]
    fn missing_curve_uses_fallback() {
        let mut short = curves();
        short.insert(Compound::Hard, vec![82.0; 5]);
        let traffic = TrafficModel { mu: 0.0, sigma: 0.0 };
        let context = RaceContext {
            sc_probability: 0.0,
            ..ctx()
        };
        let mut calls = 0;
        let mc = refine(&candidate(), &short, &context, traffic, 3, 1, |c, len| {
            calls += 1;
            assert_eq!(c, Compound::Hard);
            Ok(vec![85.0; len as usize])
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!((mc.mean - (24.0 * 81.0 + 33.0 * 85.0 + 22.5)).abs() < 1e-9);
    }

    #[test]
    fn seeds_depend_on_fingerprint() {
        assert_eq!(evaluation_seed(42, "abc"), evaluation_seed(42, "abc"));
        assert_ne!(evaluation_seed(42, "abc"), evaluation_seed(42, "abd"));
        assert_ne!(evaluation_seed(42, "abc"), evaluation_seed(43, "abc"));
    }
}
