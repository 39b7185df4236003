//! Seeded pseudo-random telemetry for demos and CI

use super::MetricsSource;
use crate::models::TelemetrySnapshot;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bytes of pretend physical memory
const SYNTHETIC_TOTAL_MEMORY: u64 = 16 * 1024 * 1024 * 1024;

const DEFAULT_UNITS: usize = 8;

/// Random per-unit loads in [5, 100] and memory fraction in [0.05, 1.0]
pub struct SyntheticSource {
    rng: StdRng,
    units: usize,
}

impl SyntheticSource {
    /// Deterministic source; the same seed yields the same sequence
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            units: default_units(),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            units: default_units(),
        }
    }

    pub fn with_units(mut self, units: usize) -> Self {
        self.units = units.max(1);
        self
    }

    pub fn unit_count(&self) -> usize {
        self.units
    }
}

fn default_units() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_UNITS)
}

impl MetricsSource for SyntheticSource {
    fn read(&mut self) -> Result<TelemetrySnapshot> {
        let loads = (0..self.units)
            .map(|_| self.rng.gen_range(5.0..=100.0))
            .collect();
        let fraction: f64 = self.rng.gen_range(0.05..=1.0);
        let used = (SYNTHETIC_TOTAL_MEMORY as f64 * fraction) as u64;

        Ok(TelemetrySnapshot::new(loads, used, SYNTHETIC_TOTAL_MEMORY))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
