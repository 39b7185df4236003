//! Simulated power model and cumulative energy accounting
//!
//! Power per unit per tick is `load * 0.1 * core_factor * freq_factor`.
//! Energy is the running sum of per-tick power, optionally scaled by the
//! sampling interval when physical units are wanted.

use crate::models::{CoreType, Decision, EnergyTotals, FreqLevel};
use std::time::Duration;

/// Watts drawn per percent of load before core/frequency scaling
pub const WATTS_PER_LOAD_PERCENT: f64 = 0.1;

pub fn core_factor(core: CoreType) -> f64 {
    match core {
        CoreType::Performance => 2.0,
        CoreType::Efficiency => 0.8,
    }
}

pub fn freq_factor(freq: FreqLevel) -> f64 {
    match freq {
        FreqLevel::Low => 0.5,
        FreqLevel::Medium => 1.0,
        FreqLevel::High => 1.5,
    }
}

/// Instantaneous power of one unit under a decision.
/// Negative or non-finite loads draw nothing.
pub fn unit_power(load_percent: f64, decision: Decision) -> f64 {
    let load = if load_percent.is_finite() {
        load_percent.max(0.0)
    } else {
        0.0
    };
    load * WATTS_PER_LOAD_PERCENT * core_factor(decision.core) * freq_factor(decision.freq)
}

/// Percentage of baseline energy saved by the AI policy; 0 when baseline is 0
pub fn savings_percent(baseline: f64, ai: f64) -> f64 {
    if baseline > 0.0 {
        (baseline - ai) / baseline * 100.0
    } else {
        0.0
    }
}

/// Owns the cumulative energy totals for one process lifetime
#[derive(Debug, Clone)]
pub struct EnergyAccountant {
    ai_total: f64,
    baseline_total: f64,
    ticks: u64,
    /// Multiplier applied to each tick's power (1.0 = unit-per-tick)
    energy_scale: f64,
}

impl EnergyAccountant {
    /// Accountant treating each tick as one unit of time
    pub fn new() -> Self {
        Self {
            ai_total: 0.0,
            baseline_total: 0.0,
            ticks: 0,
            energy_scale: 1.0,
        }
    }

    /// Accountant integrating power over the sampling interval (joules)
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            energy_scale: interval.as_secs_f64(),
            ..Self::new()
        }
    }

    /// Accumulate one tick of aggregate power under both policies
    pub fn record(&mut self, ai_power_watts: f64, baseline_power_watts: f64) -> EnergyTotals {
        self.ai_total += sanitize_power(ai_power_watts) * self.energy_scale;
        self.baseline_total += sanitize_power(baseline_power_watts) * self.energy_scale;
        self.ticks += 1;
        self.totals()
    }

    pub fn totals(&self) -> EnergyTotals {
        EnergyTotals {
            ai_energy: self.ai_total,
            baseline_energy: self.baseline_total,
            savings_percent: self.savings_percent(),
        }
    }

    /// Cumulative savings of the AI policy against the baseline
    pub fn savings_percent(&self) -> f64 {
        savings_percent(self.baseline_total, self.ai_total)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn energy_scale(&self) -> f64 {
        self.energy_scale
    }
}

impl Default for EnergyAccountant {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_power(watts: f64) -> f64 {
    if watts.is_finite() {
        watts.max(0.0)
    } else {
        0.0
    }
}
