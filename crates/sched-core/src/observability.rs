//! Observability for the scheduler
//!
//! Provides:
//! - Prometheus metrics (sampling/inference latency, tick counters, power and energy gauges)
//! - Structured JSON logging of scheduler events with tracing

use crate::models::TickPacket;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for latency measurements (seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    sample_latency_seconds: Histogram,
    inference_latency_seconds: Histogram,
    ticks: IntCounter,
    stale_ticks: IntCounter,
    metric_read_failures: IntCounter,
    inference_failures: IntCounter,
    thermal_overrides: IntCounter,
    ai_power_watts: Gauge,
    baseline_power_watts: Gauge,
    ai_energy: Gauge,
    baseline_energy: Gauge,
    savings_percent: Gauge,
    stress_workers: IntGauge,
    units_monitored: IntGauge,
    model_version_info: GaugeVec,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            sample_latency_seconds: register_histogram!(
                "hetsched_sample_latency_seconds",
                "Time spent reading system telemetry",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            inference_latency_seconds: register_histogram!(
                "hetsched_inference_latency_seconds",
                "Time spent running the decision model for one unit",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register inference_latency_seconds"),

            ticks: register_int_counter!("hetsched_ticks_total", "Scheduling ticks processed")
                .expect("Failed to register ticks_total"),

            stale_ticks: register_int_counter!(
                "hetsched_stale_ticks_total",
                "Ticks processed from a reused snapshot after a failed read"
            )
            .expect("Failed to register stale_ticks_total"),

            metric_read_failures: register_int_counter!(
                "hetsched_metric_read_failures_total",
                "Telemetry reads that failed or overran their deadline"
            )
            .expect("Failed to register metric_read_failures_total"),

            inference_failures: register_int_counter!(
                "hetsched_inference_failures_total",
                "Model calls that failed and fell back to the baseline rule"
            )
            .expect("Failed to register inference_failures_total"),

            thermal_overrides: register_int_counter!(
                "hetsched_thermal_overrides_total",
                "Unit decisions forced to E-core/Low by the thermal rule"
            )
            .expect("Failed to register thermal_overrides_total"),

            ai_power_watts: register_gauge!(
                "hetsched_ai_power_watts",
                "Simulated instantaneous power under the AI policy"
            )
            .expect("Failed to register ai_power_watts"),

            baseline_power_watts: register_gauge!(
                "hetsched_baseline_power_watts",
                "Simulated instantaneous power under the baseline policy"
            )
            .expect("Failed to register baseline_power_watts"),

            ai_energy: register_gauge!(
                "hetsched_ai_energy_total",
                "Cumulative simulated energy under the AI policy"
            )
            .expect("Failed to register ai_energy_total"),

            baseline_energy: register_gauge!(
                "hetsched_baseline_energy_total",
                "Cumulative simulated energy under the baseline policy"
            )
            .expect("Failed to register baseline_energy_total"),

            savings_percent: register_gauge!(
                "hetsched_savings_percent",
                "Cumulative energy saved by the AI policy relative to baseline"
            )
            .expect("Failed to register savings_percent"),

            stress_workers: register_int_gauge!(
                "hetsched_stress_workers",
                "Live stress worker processes"
            )
            .expect("Failed to register stress_workers"),

            units_monitored: register_int_gauge!(
                "hetsched_units_monitored",
                "Logical processing units in the latest snapshot"
            )
            .expect("Failed to register units_monitored"),

            model_version_info: register_gauge_vec!(
                "hetsched_model_version_info",
                "Currently loaded decision model",
                &["version"]
            )
            .expect("Failed to register model_version_info"),
        }
    }
}

/// Handle to the process-global scheduler metrics.
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner().sample_latency_seconds.observe(duration_secs);
    }

    pub fn observe_inference_latency(&self, duration_secs: f64) {
        self.inner().inference_latency_seconds.observe(duration_secs);
    }

    pub fn inc_metric_read_failures(&self) {
        self.inner().metric_read_failures.inc();
    }

    pub fn inc_inference_failures(&self) {
        self.inner().inference_failures.inc();
    }

    pub fn set_model_version(&self, version: &str) {
        self.inner().model_version_info.reset();
        self.inner()
            .model_version_info
            .with_label_values(&[version])
            .set(1.0);
    }

    pub fn set_stress_workers(&self, count: usize) {
        self.inner().stress_workers.set(count as i64);
    }

    /// Update tick counters and power/energy gauges from one packet
    pub fn record_packet(&self, packet: &TickPacket) {
        let m = self.inner();
        m.ticks.inc();
        if packet.stale {
            m.stale_ticks.inc();
        }

        let throttled = packet.units.iter().filter(|u| u.throttled).count() as u64;
        if throttled > 0 {
            m.thermal_overrides.inc_by(throttled);
        }

        m.ai_power_watts.set(packet.energy.ai_power_watts);
        m.baseline_power_watts.set(packet.energy.baseline_power_watts);
        m.ai_energy.set(packet.totals.ai_energy);
        m.baseline_energy.set(packet.totals.baseline_energy);
        m.savings_percent.set(packet.totals.savings_percent);
        m.units_monitored.set(packet.units.len() as i64);
    }

    pub fn ticks_total(&self) -> u64 {
        self.inner().ticks.get()
    }

    pub fn metric_read_failures_total(&self) -> u64 {
        self.inner().metric_read_failures.get()
    }

    pub fn inference_failures_total(&self) -> u64 {
        self.inner().inference_failures.get()
    }
}

/// Emits scheduler events as structured records with a stable `event` field
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, model_version: &str, baseline_threshold: f64) {
        info!(
            event = "scheduler_started",
            instance = %self.instance,
            scheduler_version = %version,
            model_version = %model_version,
            baseline_threshold = baseline_threshold,
            "Heterogeneous scheduler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str, ticks: u64) {
        info!(
            event = "scheduler_shutdown",
            instance = %self.instance,
            reason = %reason,
            ticks = ticks,
            "Heterogeneous scheduler shutting down"
        );
    }

    pub fn log_model_loaded(&self, version: &str, weights: &str, scaler: &str) {
        info!(
            event = "model_loaded",
            instance = %self.instance,
            model_version = %version,
            weights = %weights,
            scaler = %scaler,
            "Decision model and normalization loaded"
        );
    }

    pub fn log_metrics_unavailable(&self, tick: u64, error: &str, reused_snapshot: bool) {
        warn!(
            event = "metrics_unavailable",
            instance = %self.instance,
            tick = tick,
            error = %error,
            reused_snapshot = reused_snapshot,
            "Telemetry read failed"
        );
    }

    pub fn log_thermal_override(&self, tick: u64, unit: usize, temp_estimate: f64, load: f64) {
        info!(
            event = "thermal_override",
            instance = %self.instance,
            tick = tick,
            unit = unit,
            temp_estimate = temp_estimate,
            load_percent = load,
            "Thermal limit exceeded, forcing E-core at low frequency"
        );
    }

    pub fn log_power_spike(&self, tick: u64, ai_watts: f64, baseline_watts: f64, threshold: f64) {
        warn!(
            event = "power_spike",
            instance = %self.instance,
            tick = tick,
            ai_power_watts = ai_watts,
            baseline_power_watts = baseline_watts,
            threshold_watts = threshold,
            "AI policy power above spike threshold"
        );
    }

    pub fn log_stress_started(&self, workers: usize) {
        info!(
            event = "stress_started",
            instance = %self.instance,
            workers = workers,
            "Stress load started"
        );
    }

    pub fn log_stress_stopped(&self, graceful: usize, forced: usize) {
        if forced > 0 {
            warn!(
                event = "stress_stopped",
                instance = %self.instance,
                graceful = graceful,
                forced = forced,
                "Stress load stopped, some workers had to be killed"
            );
        } else {
            info!(
                event = "stress_stopped",
                instance = %self.instance,
                graceful = graceful,
                forced = forced,
                "Stress load stopped"
            );
        }
    }

    pub fn log_stress_worker_forced(&self, pid: u32) {
        warn!(
            event = "stress_worker_forced",
            instance = %self.instance,
            pid = pid,
            "Stress worker ignored termination, killed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnergySample, EnergyTotals, HistorySnapshot, MemoryStats};

    fn packet(stale: bool) -> TickPacket {
        TickPacket {
            tick: 1,
            timestamp_ms: 0,
            stale,
            units: vec![],
            memory: MemoryStats {
                used_percent: 10.0,
                used_bytes: 1,
                total_bytes: 10,
            },
            energy: EnergySample {
                ai_power_watts: 4.8,
                baseline_power_watts: 18.0,
                timestamp: 0,
            },
            totals: EnergyTotals {
                ai_energy: 4.8,
                baseline_energy: 18.0,
                savings_percent: 73.3,
            },
            history: HistorySnapshot::default(),
        }
    }

    #[test]
    fn test_metrics_handle() {
        // Registry is process-global; every test shares one set of collectors
        let metrics = SchedulerMetrics::new();
        let clone = metrics.clone();

        metrics.observe_sample_latency(0.001);
        metrics.observe_inference_latency(0.0002);
        metrics.set_model_version("advanced_scheduler_model");
        metrics.set_stress_workers(4);

        let before = clone.ticks_total();
        metrics.record_packet(&packet(false));
        metrics.record_packet(&packet(true));
        assert!(clone.ticks_total() >= before + 2);
    }

    #[test]
    fn test_failure_counters() {
        let metrics = SchedulerMetrics::new();
        let reads = metrics.metric_read_failures_total();
        let infers = metrics.inference_failures_total();

        metrics.inc_metric_read_failures();
        metrics.inc_inference_failures();

        assert!(metrics.metric_read_failures_total() > reads);
        assert!(metrics.inference_failures_total() > infers);
    }

    #[test]
    fn test_structured_logger() {
        let logger = StructuredLogger::new("bench-01");
        assert_eq!(logger.instance(), "bench-01");
        logger.log_power_spike(3, 130.0, 150.0, 120.0);
        logger.log_stress_stopped(3, 1);
    }
}
