//! Feature estimation from raw telemetry
//!
//! IPC, cache-miss rate and temperature cannot be read without hardware
//! counters, so they are modeled as deterministic functions of load and
//! memory pressure. Optional sensor noise is drawn from a caller-supplied
//! RNG; `estimate` itself is pure.

use crate::models::{FeatureVector, TelemetrySnapshot};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the cache-miss proxy is derived
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheMissModel {
    /// `mem% * memory_weight + U[0, max_noise)`
    MemoryWeighted { memory_weight: f64, max_noise: f64 },
    /// `mem% * memory_weight + load * load_weight`
    LoadBlend { memory_weight: f64, load_weight: f64 },
}

/// Coefficients of the proxy formulas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub ipc_base: f64,
    /// IPC gained between 0% and 100% load
    pub ipc_span: f64,
    /// Half-width of uniform IPC jitter (0 disables)
    pub ipc_jitter: f64,
    pub cache_model: CacheMissModel,
    pub base_temp: f64,
    /// Degrees per percent of load
    pub temp_slope: f64,
}

impl EstimatorConfig {
    /// Per-unit estimator with no noise terms
    pub fn per_unit() -> Self {
        Self {
            ipc_base: 0.5,
            ipc_span: 2.0,
            ipc_jitter: 0.0,
            cache_model: CacheMissModel::LoadBlend {
                memory_weight: 0.5,
                load_weight: 0.3,
            },
            base_temp: 35.0,
            temp_slope: 0.55,
        }
    }

    /// Estimator modeling sensor noise on IPC and cache-miss readings
    pub fn sensor_noise() -> Self {
        Self {
            ipc_base: 0.5,
            ipc_span: 2.0,
            ipc_jitter: 0.2,
            cache_model: CacheMissModel::MemoryWeighted {
                memory_weight: 0.8,
                max_noise: 10.0,
            },
            base_temp: 40.0,
            temp_slope: 0.5,
        }
    }

    pub fn has_noise(&self) -> bool {
        let cache_noise = match self.cache_model {
            CacheMissModel::MemoryWeighted { max_noise, .. } => max_noise > 0.0,
            CacheMissModel::LoadBlend { .. } => false,
        };
        self.ipc_jitter > 0.0 || cache_noise
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self::per_unit()
    }
}

/// Derives feature vectors from telemetry snapshots
#[derive(Debug, Clone, Default)]
pub struct FeatureEstimator {
    config: EstimatorConfig,
}

impl FeatureEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Noise-free features for one unit; `None` if the unit does not exist
    pub fn estimate(&self, snapshot: &TelemetrySnapshot, unit: usize) -> Option<FeatureVector> {
        let load = *snapshot.unit_loads.get(unit)?;
        Some(self.derive(load, snapshot.memory_percent(), 0.0, 0.0))
    }

    /// Features for one unit with jitter drawn from `rng`
    pub fn estimate_with_noise<R: Rng + ?Sized>(
        &self,
        snapshot: &TelemetrySnapshot,
        unit: usize,
        rng: &mut R,
    ) -> Option<FeatureVector> {
        let load = *snapshot.unit_loads.get(unit)?;

        let ipc_noise = if self.config.ipc_jitter > 0.0 {
            rng.gen_range(-self.config.ipc_jitter..=self.config.ipc_jitter)
        } else {
            0.0
        };
        let cache_noise = match self.config.cache_model {
            CacheMissModel::MemoryWeighted { max_noise, .. } if max_noise > 0.0 => {
                rng.gen_range(0.0..max_noise)
            }
            _ => 0.0,
        };

        Some(self.derive(load, snapshot.memory_percent(), ipc_noise, cache_noise))
    }

    /// Noise-free features for every unit in the snapshot
    pub fn estimate_all(&self, snapshot: &TelemetrySnapshot) -> Vec<FeatureVector> {
        (0..snapshot.unit_count())
            .filter_map(|unit| self.estimate(snapshot, unit))
            .collect()
    }

    fn derive(
        &self,
        raw_load: f64,
        memory_percent: f64,
        ipc_noise: f64,
        cache_noise: f64,
    ) -> FeatureVector {
        let cpu_load = clamp_percent(raw_load);
        let memory_percent = clamp_percent(memory_percent);
        let c = &self.config;

        let ipc_estimate = c.ipc_base + (cpu_load / 100.0) * c.ipc_span + ipc_noise;
        let cache_miss_estimate = match c.cache_model {
            CacheMissModel::MemoryWeighted { memory_weight, .. } => {
                memory_percent * memory_weight + cache_noise
            }
            CacheMissModel::LoadBlend {
                memory_weight,
                load_weight,
            } => memory_percent * memory_weight + cpu_load * load_weight,
        };
        let temp_estimate = c.base_temp + cpu_load * c.temp_slope;

        FeatureVector {
            cpu_load,
            ipc_estimate,
            cache_miss_estimate,
            temp_estimate,
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
