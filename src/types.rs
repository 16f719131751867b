use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

// ---------- Compounds ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compound {
    Soft,
    Medium,
    Hard,
}

impl Compound {
    pub const ALL: [Compound; 3] = [Compound::Soft, Compound::Medium, Compound::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compound {
    type Err = ();

    // Only the three dry compounds take part in strategy search.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SOFT" => Ok(Compound::Soft),
            "MEDIUM" => Ok(Compound::Medium),
            "HARD" => Ok(Compound::Hard),
            _ => Err(()),
        }
    }
}

// ---------- Race inputs ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceContext {
    pub year: i32,
    pub total_laps: u32,
    pub track_temp: f64,
    pub air_temp: f64,
    pub pit_loss: f64,
    pub sc_probability: f64,
}

impl RaceContext {
    /// Context used when no historical laps exist for the (year, circuit).
    pub fn fallback(year: i32) -> Self {
        Self {
            year,
            total_laps: 55,
            track_temp: 30.0,
            air_temp: 22.0,
            pit_loss: 22.5,
            sc_probability: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationParams {
    pub base: f64,
    pub slope: f64,
    pub track_coef: f64,
    pub air_coef: f64,
    pub track_ref: f64,
    pub air_ref: f64,
}

impl DegradationParams {
    pub const CONSTANT: DegradationParams = DegradationParams {
        base: 90.0,
        slope: 0.05,
        track_coef: 0.0,
        air_coef: 0.0,
        track_ref: 30.0,
        air_ref: 22.0,
    };

    /// Baseline lap time at `lap` (1-based) under the given ambient conditions.
    pub fn lap_time(&self, lap: u32, track_temp: f64, air_temp: f64) -> f64 {
        self.base
            + self.slope * f64::from(lap.saturating_sub(1))
            + self.track_coef * (track_temp - self.track_ref)
            + self.air_coef * (air_temp - self.air_ref)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompoundStats {
    pub base: f64,
    pub slope: f64,
}

/// Empirical (min, max) viable stint length in laps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifeBounds {
    pub min: u32,
    pub max: u32,
}

impl LifeBounds {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

pub type TyreLifeBounds = BTreeMap<Compound, LifeBounds>;

pub fn default_tyre_life_bounds() -> TyreLifeBounds {
    BTreeMap::from([
        (Compound::Soft, LifeBounds::new(12, 18)),
        (Compound::Medium, LifeBounds::new(18, 26)),
        (Compound::Hard, LifeBounds::new(24, 34)),
    ])
}

/// Full-race lap-time sequence per compound, indexed by tyre age.
pub type PaceCurves = BTreeMap<Compound, Vec<f64>>;

// ---------- Candidates ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyType {
    #[serde(rename = "1-stop")]
    OneStop,
    #[serde(rename = "2-stop")]
    TwoStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PitWindow {
    pub lap_min: u32,
    pub lap_max: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyCandidate {
    /// Position in generation order; refinement results are matched on this.
    pub index: usize,
    pub strategy_type: StrategyType,
    pub compounds: Vec<Compound>,
    pub stint_lengths: Vec<u32>,
    pub pit_windows: Vec<PitWindow>,
    pub stop_laps: Vec<u32>,
}

// ---------- Request / response ----------

fn default_risk_bias() -> f64 {
    crate::config::DEFAULT_RISK_BIAS
}

fn default_n_strategies() -> usize {
    crate::config::DEFAULT_STRATEGY_COUNT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRequest {
    pub year: i32,
    pub circuit_id: String,
    pub driver_id: u32,
    #[serde(default = "default_risk_bias")]
    pub risk_bias: f64,
    #[serde(default = "default_n_strategies")]
    pub n_strategies: usize,
    #[serde(default)]
    pub opponent_id: Option<u32>,
    #[serde(default)]
    pub debug_profile: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareRequest {
    pub year: i32,
    pub circuit_id: String,
    pub driver_id: u32,
    pub teammate_id: u32,
    #[serde(default = "default_risk_bias")]
    pub risk_bias: f64,
    #[serde(default = "default_n_strategies")]
    pub n_strategies: usize,
    #[serde(default)]
    pub debug_profile: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StintCurve {
    pub compound: Compound,
    pub start_lap: u32,
    pub end_lap: u32,
    pub lap_time_data: Vec<f64>,
    pub tyre_life_data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedStrategy {
    pub strategy_id: String,
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,
    pub compounds: Vec<Compound>,
    pub stints: Vec<u32>,
    pub stint_curves: Vec<StintCurve>,
    pub pit_windows: Vec<PitWindow>,
    pub stop_laps: Vec<u32>,
    pub expected_time: f64,
    pub variance: f64,
    pub risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationSummary {
    pub base: f64,
    pub slope: f64,
    pub curve: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDebug {
    pub driver_id: u32,
    pub defaults: BTreeMap<Compound, DegradationParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub total_laps: u32,
    pub track_temp: f64,
    pub air_temp: f64,
    pub pit_loss: f64,
    pub sc_probability: f64,
}

impl From<&RaceContext> for ContextSummary {
    fn from(ctx: &RaceContext) -> Self {
        Self {
            total_laps: ctx.total_laps,
            track_temp: ctx.track_temp,
            air_temp: ctx.air_temp,
            pit_loss: ctx.pit_loss,
            sc_probability: ctx.sc_probability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResponse {
    pub year: i32,
    pub circuit_id: String,
    pub driver_id: u32,
    pub context: ContextSummary,
    pub strategies: Vec<RankedStrategy>,
    pub degradation: BTreeMap<Compound, DegradationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_profile: Option<ProfileDebug>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareResponse {
    pub year: i32,
    pub circuit_id: String,
    pub driver: StrategyResponse,
    pub teammate: StrategyResponse,
}
