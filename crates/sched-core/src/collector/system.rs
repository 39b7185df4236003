//! Host telemetry via sysinfo

use super::MetricsSource;
use crate::models::TelemetrySnapshot;
use anyhow::{bail, Result};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// Per-logical-CPU usage and physical memory from the running host
pub struct SysinfoSource {
    sys: System,
}

impl SysinfoSource {
    /// Create and prime the source.
    ///
    /// CPU usage is a delta between two refreshes, so one refresh happens
    /// here and the first `read` already has a baseline.
    pub fn new() -> Result<Self> {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new().with_cpu_usage())
                .with_memory(MemoryRefreshKind::new().with_ram()),
        );
        sys.refresh_cpu();
        sys.refresh_memory();

        if sys.cpus().is_empty() {
            bail!("Platform reports no logical CPUs");
        }
        if sys.total_memory() == 0 {
            bail!("Platform reports zero total memory");
        }

        Ok(Self { sys })
    }

    pub fn unit_count(&self) -> usize {
        self.sys.cpus().len()
    }
}

impl MetricsSource for SysinfoSource {
    fn read(&mut self) -> Result<TelemetrySnapshot> {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        let loads: Vec<f64> = self
            .sys
            .cpus()
            .iter()
            .map(|cpu| cpu.cpu_usage() as f64)
            .collect();
        if loads.is_empty() {
            bail!("CPU list empty after refresh");
        }

        let total = self.sys.total_memory();
        if total == 0 {
            bail!("Total memory reported as zero");
        }

        Ok(TelemetrySnapshot::new(loads, self.sys.used_memory(), total))
    }

    fn name(&self) -> &'static str {
        "sysinfo"
    }
}
