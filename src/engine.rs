//! Request-level orchestration: context → candidates → analytic ranking →
//! Monte Carlo refinement of the shortlist → dedup and report.

use std::{collections::BTreeMap, sync::Arc};

use crate::baseline::{DriverBaseline, ProfileStore};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::evaluator::{self, TrafficModel};
use crate::features::{FeatureStore, InMemoryFeatureStore};
use crate::generator;
use crate::pace_curve::{predict_stint, PaceCurveCache};
use crate::predictor::{FileModelLoader, ModelRegistry};
use crate::ranker::{self, Scored};
use crate::simulation;
use crate::types::{
    CompareRequest, CompareResponse, ContextSummary, DegradationSummary, ProfileDebug,
    RankedStrategy, RaceContext, StrategyRequest, StrategyResponse,
};

const DEGRADATION_CURVE_LAPS: u32 = 30;

/// Long-lived engine shared by all requests. Only the three caches (models,
/// driver profiles, pace curves) outlive a request.
pub struct StrategyEngine {
    config: EngineConfig,
    features: Arc<dyn FeatureStore>,
    baseline: Arc<dyn DriverBaseline>,
    models: ModelRegistry,
    pace_curves: PaceCurveCache,
}

impl StrategyEngine {
    pub fn new(
        config: EngineConfig,
        features: Arc<dyn FeatureStore>,
        baseline: Arc<dyn DriverBaseline>,
        models: ModelRegistry,
    ) -> Self {
        let pace_curves =
            PaceCurveCache::new(config.pace_curve_cache_size, config.pace_curve_cache_dir.clone());
        Self {
            config,
            features,
            baseline,
            models,
            pace_curves,
        }
    }

    /// Wire the file-backed stores named in the config.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let features: Arc<dyn FeatureStore> = match &config.features_path {
            Some(path) => Arc::new(InMemoryFeatureStore::from_jsonl_path(path)?),
            None => {
                tracing::warn!("no features path configured; engine starts empty");
                Arc::new(InMemoryFeatureStore::default())
            }
        };
        let baseline = Arc::new(ProfileStore::new(&config.models_dir, config.profile_cache_size));
        let models = ModelRegistry::new(
            Box::new(FileModelLoader::new(&config.models_dir)),
            config.model_cache_size,
        );
        Ok(Self::new(config, features, baseline, models))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn traffic(&self) -> TrafficModel {
        TrafficModel {
            mu: self.config.traffic_mu,
            sigma: self.config.traffic_sigma,
        }
    }

    pub fn generate_strategies(&self, req: &StrategyRequest) -> Result<StrategyResponse> {
        if self.features.is_empty() {
            return Err(EngineError::EmptyResultSet);
        }
        if !req.risk_bias.is_finite() {
            return Err(EngineError::InvalidRequest("risk_bias must be finite".into()));
        }

        let (year, circuit, driver) = (req.year, req.circuit_id.as_str(), req.driver_id);
        let context = self.features.get_context(year, circuit);
        let stats = self.features.get_compound_stats(driver, year, circuit);
        let bounds = self.features.get_tyre_life_bounds(year, circuit);
        let model = self.models.get(driver)?;
        let curves = self.pace_curves.get_or_build(
            year,
            circuit,
            driver,
            &context,
            self.baseline.as_ref(),
            model.as_ref(),
        )?;

        let candidates = generator::generate(context.total_laps, &bounds);
        let opponent_best = match req.opponent_id {
            Some(opp) => self.opponent_best(year, circuit, opp, &context, req.risk_bias)?,
            None => None,
        };

        let traffic = self.traffic();
        let rescore = |mean: f64, variance: f64| {
            ranker::score(mean, variance, req.risk_bias, opponent_best, self.config.opponent_penalty)
        };
        let mut scored: Vec<Scored> = candidates
            .iter()
            .map(|c| {
                let (mean, variance) = evaluator::evaluate(c, &curves, &context, traffic);
                Scored {
                    index: c.index,
                    mean,
                    variance,
                    score: rescore(mean, variance),
                }
            })
            .collect();
        ranker::sort_by_score(&mut scored);

        // Analytic order is authoritative; refinement only updates the
        // reported numbers of the shortlist.
        let mut by_index: Vec<Option<Scored>> = vec![None; candidates.len()];
        for (rank, s) in scored.iter().enumerate() {
            let mut s = *s;
            if rank < self.config.mc_top_k {
                let c = &candidates[s.index];
                let fingerprint = ranker::strategy_id(year, circuit, driver, c);
                let seed = simulation::evaluation_seed(self.config.seed, &fingerprint);
                let mc = simulation::refine(
                    c,
                    &curves,
                    &context,
                    traffic,
                    self.config.mc_samples,
                    seed,
                    |compound, len| {
                        predict_stint(model.as_ref(), circuit, compound, stats.get(&compound), &context, len)
                            .map_err(anyhow::Error::from)
                    },
                )?;
                tracing::debug!(
                    index = s.index,
                    analytic_mean = s.mean,
                    mc_mean = mc.mean,
                    mc_variance = mc.variance,
                    "refined candidate"
                );
                s.mean = mc.mean;
                s.variance = mc.variance;
                s.score = rescore(mc.mean, mc.variance);
            }
            by_index[s.index] = Some(s);
        }

        let ordered = scored.iter().map(|s| &candidates[s.index]);
        let strategies: Vec<RankedStrategy> =
            ranker::dedup(ordered, self.config.pit_window_bin, req.n_strategies)
                .into_iter()
                .filter_map(|c| {
                    let s = by_index[c.index]?;
                    Some(RankedStrategy {
                        strategy_id: ranker::strategy_id(year, circuit, driver, c),
                        strategy_type: c.strategy_type,
                        compounds: c.compounds.clone(),
                        stints: c.stint_lengths.clone(),
                        stint_curves: ranker::stint_curves(c, &curves),
                        pit_windows: c.pit_windows.clone(),
                        stop_laps: c.stop_laps.clone(),
                        expected_time: s.mean,
                        variance: s.variance,
                        risk_score: s.score,
                    })
                })
                .collect();

        tracing::info!(
            year,
            circuit,
            driver,
            candidates = candidates.len(),
            returned = strategies.len(),
            "generated strategies"
        );

        let degradation = stats
            .iter()
            .map(|(&compound, s)| {
                let curve = (1..=DEGRADATION_CURVE_LAPS.min(context.total_laps))
                    .map(|i| s.base + s.slope * f64::from(i))
                    .collect();
                (
                    compound,
                    DegradationSummary {
                        base: s.base,
                        slope: s.slope,
                        curve,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        let driver_profile = req.debug_profile.then(|| ProfileDebug {
            driver_id: driver,
            defaults: self.baseline.driver_defaults(driver),
        });

        Ok(StrategyResponse {
            year,
            circuit_id: req.circuit_id.clone(),
            driver_id: driver,
            context: ContextSummary::from(&context),
            strategies,
            degradation,
            driver_profile,
        })
    }

    /// Best analytic score the opponent can reach on the same race.
    fn opponent_best(
        &self,
        year: i32,
        circuit: &str,
        opponent: u32,
        context: &RaceContext,
        risk_bias: f64,
    ) -> Result<Option<f64>> {
        let model = self.models.get(opponent)?;
        let curves = self.pace_curves.get_or_build(
            year,
            circuit,
            opponent,
            context,
            self.baseline.as_ref(),
            model.as_ref(),
        )?;
        let bounds = self.features.get_tyre_life_bounds(year, circuit);
        let traffic = self.traffic();
        let best = generator::generate(context.total_laps, &bounds)
            .iter()
            .map(|c| {
                let (mean, var) = evaluator::evaluate(c, &curves, context, traffic);
                mean + risk_bias * var
            })
            .min_by(f64::total_cmp);
        tracing::debug!(opponent, best = ?best, "opponent best analytic score");
        Ok(best)
    }

    /// Driver and teammate each planned against the other as opponent.
    pub fn compare(&self, req: &CompareRequest) -> Result<CompareResponse> {
        let plan = |driver_id: u32, opponent_id: u32| StrategyRequest {
            year: req.year,
            circuit_id: req.circuit_id.clone(),
            driver_id,
            risk_bias: req.risk_bias,
            n_strategies: req.n_strategies,
            opponent_id: Some(opponent_id),
            debug_profile: req.debug_profile,
        };
        let driver = self.generate_strategies(&plan(req.driver_id, req.teammate_id))?;
        let teammate = self.generate_strategies(&plan(req.teammate_id, req.driver_id))?;
        Ok(CompareResponse {
            year: req.year,
            circuit_id: req.circuit_id.clone(),
            driver,
            teammate,
        })
    }
}
