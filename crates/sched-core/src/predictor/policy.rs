//! Policy engine: classifier output to AI decision, plus the rule-based baseline
//!
//! Thermal throttling takes precedence over both policies: any unit whose
//! estimated temperature exceeds the limit runs on an E-core at Low frequency.

use super::inference::ModelOutput;
use crate::error::{SchedError, SchedResult};
use crate::models::{CoreType, Decision, FeatureVector, FreqLevel};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Load percentage above which the baseline picks a P-core
pub const DEFAULT_BASELINE_THRESHOLD: f64 = 40.0;

/// Estimated temperature (C) above which the emergency rule applies
pub const DEFAULT_THERMAL_LIMIT: f64 = 85.0;

/// Which policies the thermal override applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalScope {
    Both,
    AiOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub baseline_threshold: f64,
    pub thermal_limit: f64,
    pub thermal_scope: ThermalScope,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            baseline_threshold: DEFAULT_BASELINE_THRESHOLD,
            thermal_limit: DEFAULT_THERMAL_LIMIT,
            thermal_scope: ThermalScope::Both,
        }
    }
}

/// Final decisions for one unit in one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub ai: Decision,
    pub baseline: Decision,
    /// The thermal override replaced the AI decision
    pub throttled: bool,
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> SchedResult<Self> {
        if !config.baseline_threshold.is_finite() {
            return Err(SchedError::Config(
                "baseline_threshold must be finite".to_string(),
            ));
        }
        if !config.thermal_limit.is_finite() {
            return Err(SchedError::Config("thermal_limit must be finite".to_string()));
        }

        info!(
            baseline_threshold = config.baseline_threshold,
            thermal_limit = config.thermal_limit,
            thermal_scope = ?config.thermal_scope,
            "Policy engine configured"
        );

        Ok(Self { config })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Classifier output to decision: P-core above 0.5, argmax frequency
    pub fn ai_decision(&self, output: &ModelOutput) -> Decision {
        let output = output.sanitized();
        let core = if output.core_probability > 0.5 {
            CoreType::Performance
        } else {
            CoreType::Efficiency
        };
        Decision::new(core, argmax_freq(&output.freq_distribution))
    }

    /// Rule-based baseline: load threshold picks the core, frequency always High
    pub fn baseline_decision(&self, features: &FeatureVector) -> Decision {
        let core = if features.cpu_load > self.config.baseline_threshold {
            CoreType::Performance
        } else {
            CoreType::Efficiency
        };
        Decision::new(core, FreqLevel::High)
    }

    /// Emergency decision when the unit runs too hot
    pub fn thermal_override(&self, features: &FeatureVector) -> Option<Decision> {
        (features.temp_estimate > self.config.thermal_limit).then_some(Decision::THROTTLED)
    }

    /// Both decisions for a unit. `output` is `None` when the model call failed,
    /// in which case the AI side falls back to the baseline rule.
    pub fn decide(&self, features: &FeatureVector, output: Option<&ModelOutput>) -> PolicyOutcome {
        let baseline = self.baseline_decision(features);
        let ai = match output {
            Some(out) => self.ai_decision(out),
            None => baseline,
        };

        match self.thermal_override(features) {
            Some(forced) => PolicyOutcome {
                ai: forced,
                baseline: match self.config.thermal_scope {
                    ThermalScope::Both => forced,
                    ThermalScope::AiOnly => baseline,
                },
                throttled: true,
            },
            None => PolicyOutcome {
                ai,
                baseline,
                throttled: false,
            },
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self {
            config: PolicyConfig::default(),
        }
    }
}

/// Index of the largest probability; ties go to the lowest level
pub fn argmax_freq(dist: &[f64; 3]) -> FreqLevel {
    let mut best = 0;
    for i in 1..dist.len() {
        if dist[i] > dist[best] {
            best = i;
        }
    }
    FreqLevel::from_index(best).unwrap_or(FreqLevel::Low)
}
