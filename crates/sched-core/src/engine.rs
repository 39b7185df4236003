//! Per-tick processing: snapshot in, immutable packet out
//!
//! The engine is the single owner of the cumulative energy totals and the
//! rolling history. It is driven by the sampling loop and never shared.

use crate::accounting::{
    savings_percent, unit_power, EnergyAccountant, HistorySet, DEFAULT_HISTORY_CAPACITY,
};
use crate::error::SchedResult;
use crate::models::{EnergySample, FeatureVector, TelemetrySnapshot, TickPacket, UnitReport};
use crate::observability::SchedulerMetrics;
use crate::predictor::{
    DecisionModel, EstimatorConfig, FeatureEstimator, ModelArtifact, ModelOutput, PolicyConfig,
    PolicyEngine,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: PolicyConfig,
    pub estimator: EstimatorConfig,
    /// Seed for estimator jitter; `None` seeds from entropy
    pub noise_seed: Option<u64>,
    pub history_capacity: usize,
    /// Integrate power over this interval (joules) instead of per-tick units
    pub energy_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            estimator: EstimatorConfig::default(),
            noise_seed: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            energy_interval: None,
        }
    }
}

pub struct TickEngine {
    estimator: FeatureEstimator,
    noise: Option<StdRng>,
    artifact: ModelArtifact,
    policy: PolicyEngine,
    accountant: EnergyAccountant,
    history: HistorySet,
    metrics: SchedulerMetrics,
    tick: u64,
}

impl TickEngine {
    pub fn new(config: EngineConfig, artifact: ModelArtifact) -> SchedResult<Self> {
        let policy = PolicyEngine::new(config.policy)?;
        let estimator = FeatureEstimator::new(config.estimator);

        let noise = estimator.config().has_noise().then(|| match config.noise_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        });

        let accountant = match config.energy_interval {
            Some(interval) => EnergyAccountant::with_interval(interval),
            None => EnergyAccountant::new(),
        };

        Ok(Self {
            estimator,
            noise,
            artifact,
            policy,
            accountant,
            history: HistorySet::new(config.history_capacity),
            metrics: SchedulerMetrics::new(),
            tick: 0,
        })
    }

    /// Ticks processed so far
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn model_version(&self) -> &str {
        self.artifact.version()
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn accountant(&self) -> &EnergyAccountant {
        &self.accountant
    }

    /// Run both policies over every unit, account the energy and build the packet
    pub fn process(&mut self, snapshot: &TelemetrySnapshot, stale: bool) -> TickPacket {
        self.tick += 1;

        let mut units = Vec::with_capacity(snapshot.unit_count());
        let mut ai_power = 0.0;
        let mut baseline_power = 0.0;

        for index in 0..snapshot.unit_count() {
            let features = match self.noise.as_mut() {
                Some(rng) => self.estimator.estimate_with_noise(snapshot, index, rng),
                None => self.estimator.estimate(snapshot, index),
            };
            let Some(features) = features else {
                continue;
            };

            let output = self.infer(index, &features);
            let outcome = self.policy.decide(&features, output.as_ref());

            let unit_ai = unit_power(features.cpu_load, outcome.ai);
            let unit_baseline = unit_power(features.cpu_load, outcome.baseline);
            ai_power += unit_ai;
            baseline_power += unit_baseline;

            units.push(UnitReport {
                index,
                load_percent: features.cpu_load,
                features,
                ai: outcome.ai,
                baseline: outcome.baseline,
                throttled: outcome.throttled,
                fallback: output.is_none(),
                ai_power_watts: unit_ai,
                baseline_power_watts: unit_baseline,
            });
        }

        let totals = self.accountant.record(ai_power, baseline_power);
        self.history.record(
            totals.ai_energy,
            totals.baseline_energy,
            savings_percent(baseline_power, ai_power),
        );

        let timestamp_ms = chrono::Utc::now().timestamp_millis();

        debug!(
            tick = self.tick,
            stale = stale,
            units = units.len(),
            ai_power_watts = ai_power,
            baseline_power_watts = baseline_power,
            savings_percent = totals.savings_percent,
            "Tick processed"
        );

        TickPacket {
            tick: self.tick,
            timestamp_ms,
            stale,
            units,
            memory: snapshot.memory_stats(),
            energy: EnergySample {
                ai_power_watts: ai_power,
                baseline_power_watts: baseline_power,
                timestamp: timestamp_ms,
            },
            totals,
            history: self.history.snapshot(),
        }
    }

    /// Model output for one unit, or `None` when the call fails
    fn infer(&self, unit: usize, features: &FeatureVector) -> Option<ModelOutput> {
        let input = self.artifact.normalization.normalize(features);
        let start = Instant::now();
        let result = self.artifact.model.infer(&input);
        self.metrics
            .observe_inference_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(output) => Some(output),
            Err(e) => {
                self.metrics.inc_inference_failures();
                tracing::warn!(
                    tick = self.tick,
                    unit = unit,
                    error = %e,
                    "Inference failed, using baseline decision"
                );
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::{CoreType, Decision, FreqLevel};
    use crate::predictor::{EstimatorConfig, ThermalScope};

    fn engine_with(model: impl DecisionModel + 'static, threshold: f64) -> TickEngine {
        let config = EngineConfig {
            policy: PolicyConfig {
                baseline_threshold: threshold,
                ..Default::default()
            },
            ..Default::default()
        };
        TickEngine::new(config, artifact(model)).unwrap()
    }

    fn snapshot(loads: Vec<f64>) -> TelemetrySnapshot {
        TelemetrySnapshot::new(loads, 4_000, 16_000)
    }

    #[test]
    fn test_single_tick_savings() {
        // 60% load: baseline P-core at High, AI E-core at Medium
        let mut engine = engine_with(FixedModel(e_medium()), 50.0);
        let packet = engine.process(&snapshot(vec![60.0]), false);

        assert_eq!(packet.tick, 1);
        let unit = &packet.units[0];
        assert_eq!(unit.baseline, Decision::new(CoreType::Performance, FreqLevel::High));
        assert_eq!(unit.ai, Decision::new(CoreType::Efficiency, FreqLevel::Medium));
        assert!((unit.baseline_power_watts - 18.0).abs() < 1e-9);
        assert!((unit.ai_power_watts - 4.8).abs() < 1e-9);

        let expected = (18.0 - 4.8) / 18.0 * 100.0;
        assert!((packet.totals.savings_percent - expected).abs() < 1e-9);
        assert_eq!(packet.history.savings_percent.len(), 1);
        assert!((packet.history.savings_percent[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_power_aggregates_across_units() {
        let mut engine = engine_with(FixedModel(ModelOutput::new(0.9, [0.0, 0.0, 1.0])), 50.0);
        let packet = engine.process(&snapshot(vec![80.0, 20.0]), false);

        // Both units on P/High under AI: 80*0.3 + 20*0.3
        assert!((packet.energy.ai_power_watts - 30.0).abs() < 1e-9);
        // Baseline: 80 on P/High (24.0), 20 on E/High (2.4)
        assert!((packet.energy.baseline_power_watts - 26.4).abs() < 1e-9);
        assert_eq!(packet.performance_units(), 2);
    }

    #[test]
    fn test_idle_system_reports_zero_savings() {
        let mut engine = engine_with(FixedModel(e_medium()), 50.0);
        let packet = engine.process(&snapshot(vec![0.0, 0.0]), false);

        assert_eq!(packet.totals.baseline_energy, 0.0);
        assert_eq!(packet.totals.savings_percent, 0.0);
        assert_eq!(packet.history.savings_percent, vec![0.0]);
    }

    #[test]
    fn test_thermal_override_in_packet() {
        // 100% load under the per-unit estimator: 35 + 55 = 90 C
        let mut engine = engine_with(FixedModel(ModelOutput::new(0.99, [0.0, 0.0, 1.0])), 50.0);
        let packet = engine.process(&snapshot(vec![100.0, 10.0]), false);

        let hot = &packet.units[0];
        assert!(hot.features.temp_estimate > 85.0);
        assert!(hot.throttled);
        assert_eq!(hot.ai, Decision::THROTTLED);
        assert_eq!(hot.baseline, Decision::THROTTLED);
        assert!(!packet.units[1].throttled);
    }

    #[test]
    fn test_thermal_scope_ai_only_keeps_baseline_high() {
        let config = EngineConfig {
            policy: PolicyConfig {
                thermal_scope: ThermalScope::AiOnly,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut engine = TickEngine::new(config, artifact(FixedModel(e_medium()))).unwrap();
        let packet = engine.process(&snapshot(vec![100.0]), false);

        assert_eq!(packet.units[0].ai, Decision::THROTTLED);
        assert_eq!(packet.units[0].baseline.freq, FreqLevel::High);
    }

    #[test]
    fn test_inference_failure_falls_back_to_baseline() {
        let mut engine = engine_with(BrokenModel, 50.0);
        let packet = engine.process(&snapshot(vec![60.0, 30.0]), false);

        for unit in &packet.units {
            assert!(unit.fallback);
            assert_eq!(unit.ai, unit.baseline);
        }
        assert_eq!(packet.totals.savings_percent, 0.0);
    }

    #[test]
    fn test_totals_monotonic_and_history_bounded() {
        let mut engine = engine_with(FixedModel(e_medium()), 50.0);
        let mut last = (0.0, 0.0);

        for i in 0..120 {
            let load = (i * 7 % 100) as f64;
            let packet = engine.process(&snapshot(vec![load, 100.0 - load]), i % 5 == 0);
            assert!(packet.totals.ai_energy >= last.0);
            assert!(packet.totals.baseline_energy >= last.1);
            assert!(packet.totals.savings_percent <= 100.0);
            last = (packet.totals.ai_energy, packet.totals.baseline_energy);

            let h = &packet.history;
            assert!(h.ai_energy.len() <= DEFAULT_HISTORY_CAPACITY);
            assert_eq!(h.ai_energy.len(), h.baseline_energy.len());
            assert_eq!(h.ai_energy.len(), h.savings_percent.len());
        }

        assert_eq!(engine.ticks(), 120);
        assert_eq!(engine.accountant().ticks(), 120);
    }

    #[test]
    fn test_history_tracks_cumulative_energy() {
        let mut engine = engine_with(FixedModel(e_medium()), 50.0);
        engine.process(&snapshot(vec![60.0]), false);
        let packet = engine.process(&snapshot(vec![60.0]), false);

        assert_eq!(packet.history.baseline_energy.len(), 2);
        assert!((packet.history.baseline_energy[1] - 36.0).abs() < 1e-9);
        assert!((packet.history.ai_energy[1] - 9.6).abs() < 1e-9);
    }

    #[test]
    fn test_physical_energy_units() {
        let config = EngineConfig {
            policy: PolicyConfig {
                baseline_threshold: 50.0,
                ..Default::default()
            },
            energy_interval: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let mut engine = TickEngine::new(config, artifact(FixedModel(e_medium()))).unwrap();
        let packet = engine.process(&snapshot(vec![60.0]), false);

        assert!((packet.totals.baseline_energy - 9.0).abs() < 1e-9);
        // Savings ratio does not depend on the unit choice
        let expected = (18.0 - 4.8) / 18.0 * 100.0;
        assert!((packet.totals.savings_percent - expected).abs() < 1e-9);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let config = EngineConfig {
            estimator: EstimatorConfig::sensor_noise(),
            noise_seed: Some(11),
            ..Default::default()
        };
        let mut a = TickEngine::new(config.clone(), artifact(FixedModel(e_medium()))).unwrap();
        let mut b = TickEngine::new(config, artifact(FixedModel(e_medium()))).unwrap();

        let snap = snapshot(vec![40.0, 70.0]);
        let pa = a.process(&snap, false);
        let pb = b.process(&snap, false);
        for (ua, ub) in pa.units.iter().zip(&pb.units) {
            assert_eq!(ua.features, ub.features);
        }
    }

    #[test]
    fn test_stale_flag_propagates() {
        let mut engine = engine_with(FixedModel(e_medium()), 50.0);
        let packet = engine.process(&snapshot(vec![10.0]), true);
        assert!(packet.stale);
        assert_eq!(packet.memory.used_bytes, 4_000);
    }
}
