//! Sampling loop
//!
//! Drives the sampler and the tick engine on a fixed cadence and pushes one
//! packet per tick into an unbounded channel. Sending never waits on the
//! consumer, so a slow consumer can fall behind but never delays sampling.

use super::{MetricsSource, TelemetrySampler};
use crate::engine::TickEngine;
use crate::health::{components, HealthRegistry};
use crate::models::{TelemetrySnapshot, TickPacket};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Tick cadence (default: 1 second)
    pub interval: Duration,
    /// Deadline for each metrics read (default: 750 ms)
    pub read_timeout: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            read_timeout: super::sampler::DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Result of one pass through the loop body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Emitted { stale: bool },
    /// Read failed before any snapshot existed
    Skipped,
    /// Receiver dropped
    ConsumerGone,
}

pub struct SamplingLoop {
    sampler: TelemetrySampler,
    engine: TickEngine,
    config: SamplingConfig,
    packet_tx: mpsc::UnboundedSender<TickPacket>,
    last_snapshot: Option<TelemetrySnapshot>,
    /// Units throttled in the previous tick, for edge-triggered logging
    throttled: Vec<bool>,
    health: Option<HealthRegistry>,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

impl SamplingLoop {
    pub fn new(
        sampler: TelemetrySampler,
        engine: TickEngine,
        config: SamplingConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TickPacket>) {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();

        let sampling_loop = Self {
            sampler,
            engine,
            config,
            packet_tx,
            last_snapshot: None,
            throttled: Vec::new(),
            health: None,
            metrics: SchedulerMetrics::new(),
            logger: StructuredLogger::new("hetsched"),
        };

        (sampling_loop, packet_rx)
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run until shutdown is signalled or the consumer goes away.
    ///
    /// Shutdown is only observed between ticks; a tick that has started
    /// always finishes and emits its packet. Returns the number of ticks processed.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            read_timeout_ms = self.config.read_timeout.as_millis() as u64,
            source = self.sampler.source_name(),
            "Starting sampling loop"
        );

        let mut ticker = interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tick().await == TickOutcome::ConsumerGone {
                        warn!("Packet consumer closed, stopping sampling loop");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!(ticks = self.engine.ticks(), "Shutting down sampling loop");
                    break;
                }
            }
        }

        self.engine.ticks()
    }

    /// Sample, process and emit one tick
    pub(crate) async fn tick(&mut self) -> TickOutcome {
        let start = Instant::now();
        let result = self.sampler.sample().await;
        self.metrics
            .observe_sample_latency(start.elapsed().as_secs_f64());

        let stale = match result {
            Ok(snapshot) => {
                self.last_snapshot = Some(snapshot);
                if let Some(health) = &self.health {
                    health.set_healthy(components::SAMPLER).await;
                }
                false
            }
            Err(e) => {
                self.metrics.inc_metric_read_failures();
                let reused = self.last_snapshot.is_some();
                self.logger
                    .log_metrics_unavailable(self.engine.ticks() + 1, &e.to_string(), reused);
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::SAMPLER, e.to_string())
                        .await;
                }
                true
            }
        };

        let Some(snapshot) = self.last_snapshot.as_ref() else {
            debug!("No snapshot to reuse yet, skipping tick");
            return TickOutcome::Skipped;
        };

        let packet = self.engine.process(snapshot, stale);
        self.log_throttle_changes(&packet);
        self.report_model_health(&packet).await;

        if self.packet_tx.send(packet).is_err() {
            if let Some(health) = &self.health {
                health
                    .set_unhealthy(components::CONSUMER, "packet channel closed")
                    .await;
            }
            return TickOutcome::ConsumerGone;
        }
        TickOutcome::Emitted { stale }
    }

    /// Model is unhealthy when no unit got a model decision this tick
    async fn report_model_health(&self, packet: &TickPacket) {
        let Some(health) = &self.health else {
            return;
        };
        let fallbacks = packet.units.iter().filter(|u| u.fallback).count();
        if fallbacks == 0 {
            health.set_healthy(components::MODEL).await;
        } else if fallbacks == packet.units.len() {
            health
                .set_unhealthy(components::MODEL, "inference failing on every unit")
                .await;
        } else {
            let message = format!(
                "inference fell back on {} of {} units",
                fallbacks,
                packet.units.len()
            );
            health.set_degraded(components::MODEL, message).await;
        }
    }

    fn log_throttle_changes(&mut self, packet: &TickPacket) {
        self.throttled.resize(packet.units.len(), false);
        for unit in &packet.units {
            let Some(was) = self.throttled.get_mut(unit.index) else {
                continue;
            };
            if unit.throttled && !*was {
                self.logger.log_thermal_override(
                    packet.tick,
                    unit.index,
                    unit.features.temp_estimate,
                    unit.load_percent,
                );
            }
            *was = unit.throttled;
        }
    }
}

/// Builder for the sampling loop
pub struct SamplingLoopBuilder {
    source: Option<Box<dyn MetricsSource>>,
    engine: Option<TickEngine>,
    config: SamplingConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl SamplingLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            engine: None,
            config: SamplingConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn source(mut self, source: Box<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn engine(mut self, engine: TickEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<(SamplingLoop, mpsc::UnboundedReceiver<TickPacket>)> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Telemetry source is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Tick engine is required"))?;

        if self.config.interval.is_zero() {
            anyhow::bail!("Sampling interval must be non-zero");
        }
        if self.config.read_timeout.is_zero() {
            anyhow::bail!("Read timeout must be non-zero");
        }
        if self.config.read_timeout > self.config.interval {
            warn!(
                read_timeout_ms = self.config.read_timeout.as_millis() as u64,
                interval_ms = self.config.interval.as_millis() as u64,
                "Read timeout exceeds sampling interval, slow reads will skip ticks"
            );
        }

        let sampler = TelemetrySampler::new(source, self.config.read_timeout);
        let (mut sampling_loop, rx) = SamplingLoop::new(sampler, engine, self.config);
        if let Some(health) = self.health {
            sampling_loop = sampling_loop.with_health(health);
        }
        if let Some(logger) = self.logger {
            sampling_loop = sampling_loop.with_logger(logger);
        }

        Ok((sampling_loop, rx))
    }
}

impl Default for SamplingLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
