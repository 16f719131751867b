use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};
use tch::{kind::Kind, CModule, Device, Tensor};

use crate::predictor::{PacePredictor, StintRecords};

const N_FEATURES: i64 = 8;

#[derive(Deserialize)]
struct MetaJson {
    context_len: usize,
    lap_mean: f64,
    lap_std: f64,
    #[serde(default)]
    encoders: Encoders,
}

#[derive(Deserialize, Default)]
struct Encoders {
    #[serde(default)]
    compound: HashMap<String, f32>,
    #[serde(default)]
    session_type: HashMap<String, f32>,
    #[serde(default)]
    circuit_id: HashMap<String, f32>,
}

/// TorchScript sequence pace model exported by the training job.
///
/// Input is `[B, context_len, 8]` windows of
/// (lap, stint_age, compound, session, circuit, track_temp, air_temp, lap_norm);
/// output is `[B, 1]` normalized next-lap time.
pub struct TorchPacePredictor {
    model: CModule,
    device: Device,
    context_len: usize,
    lap_mean: f64,
    lap_std: f64,
    encoders: Encoders,
}

impl TorchPacePredictor {
    pub fn new(model_path: &Path, meta_path: &Path) -> Result<Self> {
        let device = Device::Cpu;

        let meta_txt = fs::read_to_string(meta_path)
            .with_context(|| format!("failed to read meta at {}", meta_path.display()))?;
        let meta: MetaJson =
            serde_json::from_str(&meta_txt).with_context(|| "failed to parse model meta")?;
        if meta.context_len == 0 {
            bail!("model meta has context_len 0");
        }

        let model = CModule::load_on_device(model_path, device)
            .with_context(|| format!("failed to load TorchScript {}", model_path.display()))?;

        let lap_std = if meta.lap_std.abs() < f64::EPSILON { 1.0 } else { meta.lap_std };
        Ok(Self {
            model,
            device,
            context_len: meta.context_len,
            lap_mean: meta.lap_mean,
            lap_std,
            encoders: meta.encoders,
        })
    }

    fn lap_features(&self, stint: &StintRecords, i: usize) -> [f32; N_FEATURES as usize] {
        // Unseen categories encode as 0.
        let enc = |m: &HashMap<String, f32>, k: &str| m.get(k).copied().unwrap_or(0.0);
        [
            stint.lap_number[i] as f32,
            stint.stint_age[i] as f32,
            enc(&self.encoders.compound, stint.compound.as_str()),
            enc(&self.encoders.session_type, &stint.session_type),
            enc(&self.encoders.circuit_id, &stint.circuit_id),
            stint.track_temp as f32,
            stint.air_temp as f32,
            ((stint.lap_time[i] - self.lap_mean) / self.lap_std) as f32,
        ]
    }
}

impl PacePredictor for TorchPacePredictor {
    fn predict(&self, stint: &StintRecords) -> Result<Vec<f64>> {
        let n = stint.len();
        let ctx = self.context_len;
        if n <= ctx {
            return Ok(stint.lap_time.clone());
        }

        let rows: Vec<[f32; N_FEATURES as usize]> =
            (0..n).map(|i| self.lap_features(stint, i)).collect();
        let mut flat = Vec::with_capacity((n - ctx) * ctx * N_FEATURES as usize);
        for end in ctx..n {
            for row in &rows[end - ctx..end] {
                flat.extend_from_slice(row);
            }
        }
        let batch = (n - ctx) as i64;
        let input = Tensor::from_slice(&flat)
            .reshape([batch, ctx as i64, N_FEATURES])
            .to_device(self.device);

        let out = tch::no_grad(|| self.model.forward_ts(&[input]))?;
        let out = out.to_kind(Kind::Double).reshape([-1]);
        if out.size() != [batch] {
            bail!("unexpected model output size: {:?}", out.size());
        }

        let mut series = stint.lap_time[..ctx].to_vec();
        for i in 0..batch {
            series.push(out.double_value(&[i]) * self.lap_std + self.lap_mean);
        }
        Ok(series)
    }
}
