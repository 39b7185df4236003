//! System telemetry collection
//!
//! A `MetricsSource` produces raw snapshots (per-unit load and memory
//! pressure). `TelemetrySampler` wraps a source with an explicit read
//! deadline, and `SamplingLoop` drives the sampler and the tick engine on a
//! fixed cadence, handing each tick's packet to the consumer.

mod r#loop;
mod sampler;
mod synthetic;
mod system;

#[cfg(test)]
mod tests;

pub use r#loop::{SamplingConfig, SamplingLoop, SamplingLoopBuilder};
pub use sampler::{TelemetrySampler, DEFAULT_READ_TIMEOUT};
pub use synthetic::SyntheticSource;
pub use system::SysinfoSource;

use crate::models::TelemetrySnapshot;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Blocking source of raw telemetry
///
/// Implementations may block for the duration of an OS read; the sampler
/// runs them off the async runtime under a deadline.
pub trait MetricsSource: Send {
    fn read(&mut self) -> Result<TelemetrySnapshot>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Which telemetry backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Live per-CPU load and RAM usage from the host
    #[default]
    System,
    /// Seeded pseudo-random loads
    Synthetic,
}

/// Build the configured telemetry source
pub fn create_source(kind: SourceKind, seed: Option<u64>) -> Result<Box<dyn MetricsSource>> {
    match kind {
        SourceKind::System => {
            let source = SysinfoSource::new()?;
            tracing::info!(units = source.unit_count(), "Using host telemetry source");
            Ok(Box::new(source))
        }
        SourceKind::Synthetic => {
            let source = match seed {
                Some(seed) => SyntheticSource::seeded(seed),
                None => SyntheticSource::from_entropy(),
            };
            tracing::info!(
                units = source.unit_count(),
                seed = ?seed,
                "Using synthetic telemetry source"
            );
            Ok(Box::new(source))
        }
    }
}
