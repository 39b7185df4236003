//! Sampler and loop tests against scripted telemetry sources

use super::*;
use crate::engine::test_support::{artifact, e_medium, BrokenModel, FixedModel};
use crate::engine::{EngineConfig, TickEngine};
use crate::error::SchedError;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::TelemetrySnapshot;
use crate::predictor::{DecisionModel, ModelOutput, NormalizedVector, PolicyConfig};
use super::r#loop::TickOutcome;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Replays a fixed sequence of reads, then keeps failing
struct ScriptedSource {
    reads: VecDeque<anyhow::Result<TelemetrySnapshot>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(reads: Vec<anyhow::Result<TelemetrySnapshot>>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                reads: reads.into(),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl MetricsSource for ScriptedSource {
    fn read(&mut self) -> anyhow::Result<TelemetrySnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reads
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Blocks well past any reasonable deadline
struct StuckSource {
    delay: Duration,
}

impl MetricsSource for StuckSource {
    fn read(&mut self) -> anyhow::Result<TelemetrySnapshot> {
        std::thread::sleep(self.delay);
        Ok(snapshot(vec![50.0]))
    }

    fn name(&self) -> &'static str {
        "stuck"
    }
}

fn snapshot(loads: Vec<f64>) -> TelemetrySnapshot {
    TelemetrySnapshot::new(loads, 2_000, 8_000)
}

/// Fails for any unit above half load
struct HalfLoadModel;

impl DecisionModel for HalfLoadModel {
    fn infer(&self, input: &NormalizedVector) -> anyhow::Result<ModelOutput> {
        if input.0[0] > 50.0 {
            anyhow::bail!("output tensor empty");
        }
        Ok(e_medium())
    }

    fn version(&self) -> &str {
        "half-load"
    }
}

fn engine_with(model: impl DecisionModel + 'static) -> TickEngine {
    let config = EngineConfig {
        policy: PolicyConfig {
            baseline_threshold: 50.0,
            ..Default::default()
        },
        ..Default::default()
    };
    TickEngine::new(config, artifact(model)).unwrap()
}

fn engine() -> TickEngine {
    engine_with(FixedModel(e_medium()))
}

fn build_loop(
    source: impl MetricsSource + 'static,
) -> (SamplingLoop, tokio::sync::mpsc::UnboundedReceiver<crate::models::TickPacket>) {
    SamplingLoopBuilder::new()
        .source(Box::new(source))
        .engine(engine())
        .interval(Duration::from_millis(10))
        .read_timeout(Duration::from_millis(200))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_sampler_returns_snapshot() {
    let (source, calls) = ScriptedSource::new(vec![Ok(snapshot(vec![10.0, 20.0]))]);
    let sampler = TelemetrySampler::new(Box::new(source), Duration::from_millis(200));

    let snap = sampler.sample().await.unwrap();
    assert_eq!(snap.unit_loads, vec![10.0, 20.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sampler.source_name(), "scripted");
}

#[tokio::test]
async fn test_sampler_maps_source_error() {
    let (source, _) = ScriptedSource::new(vec![Err(anyhow::anyhow!("proc unreadable"))]);
    let sampler = TelemetrySampler::new(Box::new(source), Duration::from_millis(200));

    let err = sampler.sample().await.unwrap_err();
    assert!(matches!(err, SchedError::MetricsUnavailable(_)));
    assert!(err.to_string().contains("proc unreadable"));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_sampler_deadline_and_fail_fast() {
    let source = StuckSource {
        delay: Duration::from_millis(500),
    };
    let sampler = TelemetrySampler::new(Box::new(source), Duration::from_millis(50));

    let start = std::time::Instant::now();
    let err = sampler.sample().await.unwrap_err();
    assert!(err.to_string().contains("deadline"));
    assert!(start.elapsed() < Duration::from_millis(400));

    // The overrunning read still holds the source
    let err = sampler.sample().await.unwrap_err();
    assert!(err.to_string().contains("in flight"));
}

#[tokio::test]
async fn test_first_tick_failure_emits_nothing() {
    let (source, _) = ScriptedSource::new(vec![Err(anyhow::anyhow!("boom"))]);
    let (mut sampling_loop, mut rx) = build_loop(source);

    assert_eq!(sampling_loop.tick().await, TickOutcome::Skipped);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_read_reuses_previous_snapshot() {
    let (source, _) = ScriptedSource::new(vec![
        Ok(snapshot(vec![60.0, 30.0])),
        Err(anyhow::anyhow!("transient")),
        Ok(snapshot(vec![10.0, 10.0])),
    ]);
    let (mut sampling_loop, mut rx) = build_loop(source);

    assert_eq!(sampling_loop.tick().await, TickOutcome::Emitted { stale: false });
    assert_eq!(sampling_loop.tick().await, TickOutcome::Emitted { stale: true });
    assert_eq!(sampling_loop.tick().await, TickOutcome::Emitted { stale: false });

    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    let third = rx.try_recv().unwrap();

    assert!(!first.stale);
    assert!(second.stale);
    assert_eq!(second.units[0].load_percent, 60.0);
    assert_eq!(third.units[0].load_percent, 10.0);
    assert_eq!(
        [first.tick, second.tick, third.tick],
        [1, 2, 3],
        "every tick delivered once, in order"
    );
    assert!(second.totals.baseline_energy > first.totals.baseline_energy);
}

#[tokio::test]
async fn test_health_follows_read_results() {
    let health = HealthRegistry::new();
    health.register(components::SAMPLER).await;

    let (source, _) = ScriptedSource::new(vec![
        Ok(snapshot(vec![40.0])),
        Err(anyhow::anyhow!("timeout")),
        Ok(snapshot(vec![40.0])),
    ]);
    let (sampling_loop, _rx) = build_loop(source);
    let mut sampling_loop = sampling_loop.with_health(health.clone());

    sampling_loop.tick().await;
    assert_eq!(
        health.status_of(components::SAMPLER).await,
        Some(ComponentStatus::Healthy)
    );

    sampling_loop.tick().await;
    assert_eq!(
        health.status_of(components::SAMPLER).await,
        Some(ComponentStatus::Degraded)
    );

    sampling_loop.tick().await;
    assert_eq!(
        health.status_of(components::SAMPLER).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test]
async fn test_run_delivers_ordered_packets_until_shutdown() {
    let source = SyntheticSource::seeded(3).with_units(4);
    let (sampling_loop, mut rx) = build_loop(source);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(sampling_loop.run(shutdown_rx));

    let mut last_tick = 0;
    let mut last_energy = 0.0;
    for _ in 0..5 {
        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.tick, last_tick + 1);
        assert!(packet.totals.ai_energy >= last_energy);
        assert_eq!(packet.units.len(), 4);
        last_tick = packet.tick;
        last_energy = packet.totals.ai_energy;
    }

    shutdown_tx.send(()).unwrap();
    let ticks = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(ticks >= 5);

    // Anything emitted before shutdown is still in order
    while let Ok(packet) = rx.try_recv() {
        assert_eq!(packet.tick, last_tick + 1);
        last_tick = packet.tick;
    }
    assert_eq!(last_tick, ticks);
}

#[tokio::test]
async fn test_run_stops_when_consumer_dropped() {
    let source = SyntheticSource::seeded(9).with_units(2);
    let (sampling_loop, rx) = build_loop(source);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    drop(rx);

    let ticks = tokio::time::timeout(Duration::from_secs(2), sampling_loop.run(shutdown_rx))
        .await
        .unwrap();
    assert_eq!(ticks, 1);
}

#[tokio::test]
async fn test_shutdown_lets_inflight_tick_finish() {
    let source = StuckSource {
        delay: Duration::from_millis(150),
    };
    let (sampling_loop, mut rx) = SamplingLoopBuilder::new()
        .source(Box::new(source))
        .engine(engine())
        .interval(Duration::from_millis(10))
        .read_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(sampling_loop.run(shutdown_rx));

    // First tick is mid-read when shutdown arrives
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    let ticks = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticks, 1);

    let packet = rx.try_recv().unwrap();
    assert_eq!(packet.tick, 1);
    assert!(!packet.stale);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_model_health_follows_fallbacks() {
    let health = HealthRegistry::new();
    health.register(components::MODEL).await;

    let (source, _) = ScriptedSource::new(vec![
        Ok(snapshot(vec![20.0, 30.0])),
        Ok(snapshot(vec![20.0, 80.0])),
        Ok(snapshot(vec![70.0, 80.0])),
        Ok(snapshot(vec![10.0])),
    ]);
    let (mut sampling_loop, _rx) = SamplingLoopBuilder::new()
        .source(Box::new(source))
        .engine(engine_with(HalfLoadModel))
        .interval(Duration::from_millis(10))
        .health(health.clone())
        .build()
        .unwrap();

    sampling_loop.tick().await;
    assert_eq!(
        health.status_of(components::MODEL).await,
        Some(ComponentStatus::Healthy)
    );

    sampling_loop.tick().await;
    let report = health.health().await;
    let model = &report.components[components::MODEL];
    assert_eq!(model.status, ComponentStatus::Degraded);
    assert!(model.message.as_deref().unwrap().contains("1 of 2"));

    sampling_loop.tick().await;
    assert_eq!(
        health.status_of(components::MODEL).await,
        Some(ComponentStatus::Unhealthy)
    );
    health.set_ready(true).await;
    assert!(!health.readiness().await.ready);

    sampling_loop.tick().await;
    assert_eq!(
        health.status_of(components::MODEL).await,
        Some(ComponentStatus::Healthy)
    );
}

#[tokio::test]
async fn test_broken_model_marks_model_unhealthy() {
    let health = HealthRegistry::new();
    let (source, _) = ScriptedSource::new(vec![Ok(snapshot(vec![40.0]))]);
    let (mut sampling_loop, _rx) = SamplingLoopBuilder::new()
        .source(Box::new(source))
        .engine(engine_with(BrokenModel))
        .health(health.clone())
        .build()
        .unwrap();

    assert_eq!(sampling_loop.tick().await, TickOutcome::Emitted { stale: false });
    assert_eq!(
        health.status_of(components::MODEL).await,
        Some(ComponentStatus::Unhealthy)
    );
}

#[tokio::test]
async fn test_dropped_consumer_marks_consumer_unhealthy() {
    let health = HealthRegistry::new();
    health.register(components::CONSUMER).await;

    let (sampling_loop, rx) = build_loop(SyntheticSource::seeded(5).with_units(2));
    let mut sampling_loop = sampling_loop.with_health(health.clone());
    drop(rx);

    assert_eq!(sampling_loop.tick().await, TickOutcome::ConsumerGone);
    assert_eq!(
        health.status_of(components::CONSUMER).await,
        Some(ComponentStatus::Unhealthy)
    );
}

#[test]
fn test_builder_requires_source_and_engine() {
    assert!(SamplingLoopBuilder::new().engine(engine()).build().is_err());

    let (source, _) = ScriptedSource::new(vec![]);
    assert!(SamplingLoopBuilder::new()
        .source(Box::new(source))
        .build()
        .is_err());
}

#[test]
fn test_builder_rejects_zero_interval() {
    let (source, _) = ScriptedSource::new(vec![]);
    let result = SamplingLoopBuilder::new()
        .source(Box::new(source))
        .engine(engine())
        .interval(Duration::ZERO)
        .build();
    assert!(result.is_err());
}

#[test]
fn test_sampling_config_default() {
    let config = SamplingConfig::default();
    assert_eq!(config.interval, Duration::from_secs(1));
    assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);
}

#[test]
fn test_synthetic_source_is_seeded_and_bounded() {
    let mut a = SyntheticSource::seeded(42).with_units(6);
    let mut b = SyntheticSource::seeded(42).with_units(6);

    for _ in 0..50 {
        let sa = a.read().unwrap();
        let sb = b.read().unwrap();
        assert_eq!(sa.unit_loads, sb.unit_loads);
        assert_eq!(sa.memory_used_bytes, sb.memory_used_bytes);

        assert_eq!(sa.unit_count(), 6);
        assert!(sa.unit_loads.iter().all(|l| (5.0..=100.0).contains(l)));
        assert!(sa.memory_used_fraction >= 0.05 - 1e-9 && sa.memory_used_fraction <= 1.0);
    }
}

#[test]
fn test_create_synthetic_source() {
    let mut source = create_source(SourceKind::Synthetic, Some(1)).unwrap();
    assert_eq!(source.name(), "synthetic");
    assert!(source.read().unwrap().unit_count() > 0);
}

#[test]
fn test_source_kind_serde() {
    let kind: SourceKind = serde_json::from_str("\"synthetic\"").unwrap();
    assert_eq!(kind, SourceKind::Synthetic);
    assert_eq!(SourceKind::default(), SourceKind::System);
}

#[cfg(target_os = "linux")]
#[test]
fn test_sysinfo_source_reads_host() {
    let mut source = SysinfoSource::new().unwrap();
    let snap = source.read().unwrap();

    assert_eq!(snap.unit_count(), source.unit_count());
    assert!(snap.memory_total_bytes > 0);
    assert!((0.0..=1.0).contains(&snap.memory_used_fraction));
}
