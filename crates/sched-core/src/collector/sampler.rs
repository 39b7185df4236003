//! Deadline-bounded telemetry reads

use super::MetricsSource;
use crate::error::{SchedError, SchedResult};
use crate::models::TelemetrySnapshot;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

/// Default deadline for a single metrics read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(750);

/// Runs blocking source reads on the blocking pool under a deadline.
///
/// A read that overruns keeps the source locked until it returns; reads
/// attempted in the meantime fail immediately instead of queueing.
#[derive(Clone)]
pub struct TelemetrySampler {
    source: Arc<Mutex<Box<dyn MetricsSource>>>,
    source_name: &'static str,
    read_timeout: Duration,
}

impl TelemetrySampler {
    pub fn new(source: Box<dyn MetricsSource>, read_timeout: Duration) -> Self {
        let source_name = source.name();
        Self {
            source: Arc::new(Mutex::new(source)),
            source_name,
            read_timeout,
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source_name
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Read one snapshot; any failure or overrun is `MetricsUnavailable`
    pub async fn sample(&self) -> SchedResult<TelemetrySnapshot> {
        let source = Arc::clone(&self.source);
        let read = tokio::task::spawn_blocking(move || {
            let mut guard = match source.try_lock() {
                Ok(guard) => guard,
                // Recover the source after a read that panicked
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    return Err(SchedError::MetricsUnavailable(
                        "previous read still in flight".to_string(),
                    ))
                }
            };
            guard
                .read()
                .map_err(|e| SchedError::MetricsUnavailable(format!("{:#}", e)))
        });

        match tokio::time::timeout(self.read_timeout, read).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SchedError::MetricsUnavailable(format!(
                "metrics read aborted: {}",
                join_error
            ))),
            Err(_) => Err(SchedError::MetricsUnavailable(format!(
                "metrics read exceeded {}ms deadline",
                self.read_timeout.as_millis()
            ))),
        }
    }
}
