//! Headless packet consumer
//!
//! Drains the sampling loop's channel in tick order, publishes the latest
//! packet for the HTTP surface and updates metrics. Runs until the sampling
//! loop drops its sender.

use sched_core::health::{components, HealthRegistry};
use sched_core::observability::{SchedulerMetrics, StructuredLogger};
use sched_core::TickPacket;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

/// Most recent packet, shared with the API
pub type LatestPacket = Arc<RwLock<Option<TickPacket>>>;

pub struct PacketConsumer {
    rx: mpsc::UnboundedReceiver<TickPacket>,
    latest: LatestPacket,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    power_spike_watts: f64,
    in_spike: bool,
    last_tick: u64,
}

impl PacketConsumer {
    pub fn new(
        rx: mpsc::UnboundedReceiver<TickPacket>,
        latest: LatestPacket,
        health: HealthRegistry,
        logger: StructuredLogger,
        power_spike_watts: f64,
    ) -> Self {
        Self {
            rx,
            latest,
            metrics: SchedulerMetrics::new(),
            logger,
            health,
            power_spike_watts,
            in_spike: false,
            last_tick: 0,
        }
    }

    /// Consume until the channel closes; returns the number of packets handled
    pub async fn run(mut self) -> u64 {
        let mut handled = 0;
        while let Some(packet) = self.rx.recv().await {
            self.handle(packet).await;
            handled += 1;
        }

        debug!(packets = handled, "Packet channel closed, consumer exiting");
        self.health
            .set_degraded(components::CONSUMER, "packet channel closed")
            .await;
        handled
    }

    async fn handle(&mut self, packet: TickPacket) {
        if packet.tick != self.last_tick + 1 {
            warn!(
                expected = self.last_tick + 1,
                received = packet.tick,
                "Out-of-sequence packet"
            );
        }
        self.last_tick = packet.tick;

        self.metrics.record_packet(&packet);

        let ai_watts = packet.energy.ai_power_watts;
        let spiking = ai_watts > self.power_spike_watts;
        if spiking && !self.in_spike {
            self.logger.log_power_spike(
                packet.tick,
                ai_watts,
                packet.energy.baseline_power_watts,
                self.power_spike_watts,
            );
        }
        self.in_spike = spiking;

        debug!(
            tick = packet.tick,
            stale = packet.stale,
            p_cores = packet.performance_units(),
            units = packet.units.len(),
            ai_power_watts = ai_watts,
            savings_percent = packet.totals.savings_percent,
            "Tick consumed"
        );
        for unit in &packet.units {
            trace!(
                tick = packet.tick,
                unit = unit.index,
                core = unit.ai.core.label(),
                clock_ghz = unit.ai.clock_ghz(),
                voltage = unit.ai.voltage(),
                throttled = unit.throttled,
                "Unit decision"
            );
        }

        *self.latest.write().await = Some(packet);
        self.health.set_healthy(components::CONSUMER).await;
    }
}
