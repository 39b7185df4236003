//! Scheduler configuration
//!
//! Every field has a default. Values come from an optional config file,
//! overridden by `HETSCHED_*` environment variables.

use anyhow::{Context, Result};
use sched_core::collector::SourceKind;
use sched_core::engine::EngineConfig;
use sched_core::predictor::{EstimatorConfig, PolicyConfig, ThermalScope};
use sched_core::stress::{available_units, StressConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "HETSCHED";

/// Feature estimator preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorPreset {
    PerUnit,
    SensorNoise,
}

impl EstimatorPreset {
    pub fn config(&self) -> EstimatorConfig {
        match self {
            EstimatorPreset::PerUnit => EstimatorConfig::per_unit(),
            EstimatorPreset::SensorNoise => EstimatorConfig::sensor_noise(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name attached to every structured log record
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port for health, metrics, snapshot and stress endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// ONNX weights of the decision model
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// JSON normalization parameters for the model
    #[serde(default = "default_scaler_path")]
    pub scaler_path: PathBuf,

    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Deadline for one telemetry read
    #[serde(default = "default_metrics_timeout_ms")]
    pub metrics_timeout_ms: u64,

    #[serde(default)]
    pub telemetry_source: SourceKind,

    pub synthetic_seed: Option<u64>,

    /// Load percentage above which the baseline picks a P-core
    #[serde(default = "default_baseline_threshold")]
    pub baseline_threshold: f64,

    #[serde(default = "default_thermal_limit")]
    pub thermal_limit: f64,

    #[serde(default = "default_thermal_scope")]
    pub thermal_scope: ThermalScope,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_estimator")]
    pub estimator: EstimatorPreset,

    pub noise_seed: Option<u64>,

    /// Report energy in joules (power x interval) instead of per-tick units
    #[serde(default)]
    pub physical_energy_units: bool,

    /// AI power above which a power_spike event is logged
    #[serde(default = "default_power_spike_watts")]
    pub power_spike_watts: f64,

    /// Stress workers per start; defaults to available parallelism
    pub stress_workers: Option<usize>,

    /// Grace period between SIGTERM and SIGKILL when stopping stress workers
    #[serde(default = "default_stress_grace_ms")]
    pub stress_grace_ms: u64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "hetsched".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_model_path() -> PathBuf {
    PathBuf::from("advanced_scheduler_model.onnx")
}

fn default_scaler_path() -> PathBuf {
    PathBuf::from("advanced_scaler.json")
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_metrics_timeout_ms() -> u64 {
    750
}

fn default_baseline_threshold() -> f64 {
    sched_core::predictor::DEFAULT_BASELINE_THRESHOLD
}

fn default_thermal_limit() -> f64 {
    sched_core::predictor::DEFAULT_THERMAL_LIMIT
}

fn default_thermal_scope() -> ThermalScope {
    ThermalScope::Both
}

fn default_history_capacity() -> usize {
    sched_core::accounting::DEFAULT_HISTORY_CAPACITY
}

fn default_estimator() -> EstimatorPreset {
    EstimatorPreset::PerUnit
}

fn default_power_spike_watts() -> f64 {
    120.0
}

fn default_stress_grace_ms() -> u64 {
    2000
}

impl AgentConfig {
    /// Load from an optional file plus the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_sources(file, config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from an optional file layered under the given environment source
    pub fn from_sources(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            anyhow::bail!("sample_interval_ms must be greater than zero");
        }
        if self.metrics_timeout_ms == 0 {
            anyhow::bail!("metrics_timeout_ms must be greater than zero");
        }
        if self.history_capacity == 0 {
            anyhow::bail!("history_capacity must be greater than zero");
        }
        if self.stress_workers == Some(0) {
            anyhow::bail!("stress_workers must be at least 1");
        }
        if !self.baseline_threshold.is_finite() || !self.thermal_limit.is_finite() {
            anyhow::bail!("baseline_threshold and thermal_limit must be finite");
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_millis(self.metrics_timeout_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            policy: PolicyConfig {
                baseline_threshold: self.baseline_threshold,
                thermal_limit: self.thermal_limit,
                thermal_scope: self.thermal_scope,
            },
            estimator: self.estimator.config(),
            noise_seed: self.noise_seed,
            history_capacity: self.history_capacity,
            energy_interval: self
                .physical_energy_units
                .then(|| self.sample_interval()),
        }
    }

    pub fn stress_config(&self) -> StressConfig {
        StressConfig {
            workers: self.stress_workers.unwrap_or_else(available_units),
            stop_grace: Duration::from_millis(self.stress_grace_ms),
            ..StressConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_sources(None, env(&[])).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.model_path, PathBuf::from("advanced_scheduler_model.onnx"));
        assert_eq!(config.scaler_path, PathBuf::from("advanced_scaler.json"));
        assert_eq!(config.sample_interval(), Duration::from_secs(1));
        assert_eq!(config.metrics_timeout(), Duration::from_millis(750));
        assert_eq!(config.telemetry_source, SourceKind::System);
        assert_eq!(config.baseline_threshold, 40.0);
        assert_eq!(config.thermal_limit, 85.0);
        assert_eq!(config.thermal_scope, ThermalScope::Both);
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.estimator, EstimatorPreset::PerUnit);
        assert!(!config.physical_energy_units);
        assert_eq!(config.power_spike_watts, 120.0);
        assert!(config.stress_config().workers >= 1);
        assert!(config.engine_config().energy_interval.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = AgentConfig::from_sources(
            None,
            env(&[
                ("HETSCHED_BASELINE_THRESHOLD", "50"),
                ("HETSCHED_TELEMETRY_SOURCE", "synthetic"),
                ("HETSCHED_SYNTHETIC_SEED", "7"),
                ("HETSCHED_THERMAL_SCOPE", "ai_only"),
                ("HETSCHED_PHYSICAL_ENERGY_UNITS", "true"),
                ("HETSCHED_SAMPLE_INTERVAL_MS", "500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.baseline_threshold, 50.0);
        assert_eq!(config.telemetry_source, SourceKind::Synthetic);
        assert_eq!(config.synthetic_seed, Some(7));
        assert_eq!(config.thermal_scope, ThermalScope::AiOnly);

        let engine = config.engine_config();
        assert_eq!(engine.policy.baseline_threshold, 50.0);
        assert_eq!(engine.energy_interval, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_file_layered_under_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hetsched.toml");
        std::fs::write(
            &path,
            concat!(
                "api_port = 9100\n",
                "estimator = \"sensor_noise\"\n",
                "stress_workers = 3\n",
                "baseline_threshold = 45.0\n",
            ),
        )
        .unwrap();

        let config = AgentConfig::from_sources(
            Some(&path),
            env(&[("HETSCHED_BASELINE_THRESHOLD", "55")]),
        )
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.estimator, EstimatorPreset::SensorNoise);
        assert_eq!(config.stress_config().workers, 3);
        assert_eq!(config.baseline_threshold, 55.0);
        assert!(config.engine_config().estimator.has_noise());
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = Path::new("/nonexistent/hetsched.toml");
        let result = AgentConfig::from_sources(Some(path), env(&[]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_invalid_values() {
        for (key, value) in [
            ("HETSCHED_SAMPLE_INTERVAL_MS", "0"),
            ("HETSCHED_STRESS_WORKERS", "0"),
            ("HETSCHED_THERMAL_SCOPE", "sometimes"),
        ] {
            let result = AgentConfig::from_sources(None, env(&[(key, value)]));
            assert!(result.is_err(), "{} = {} should be rejected", key, value);
        }
    }
}
