//! Core data models for the scheduling engine

use serde::{Deserialize, Serialize};

/// Number of features consumed by the decision model
pub const NUM_FEATURES: usize = 4;

/// Raw system telemetry captured once per sampling tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Load percentage (0-100) per logical processing unit, in unit order
    pub unit_loads: Vec<f64>,
    /// Fraction of physical memory in use (0.0-1.0)
    pub memory_used_fraction: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// Capture time, Unix milliseconds
    pub captured_at: i64,
}

impl TelemetrySnapshot {
    /// Build a snapshot stamped with the current time
    pub fn new(unit_loads: Vec<f64>, memory_used_bytes: u64, memory_total_bytes: u64) -> Self {
        let memory_used_fraction = if memory_total_bytes == 0 {
            0.0
        } else {
            (memory_used_bytes as f64 / memory_total_bytes as f64).clamp(0.0, 1.0)
        };

        Self {
            unit_loads,
            memory_used_fraction,
            memory_used_bytes,
            memory_total_bytes,
            captured_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn unit_count(&self) -> usize {
        self.unit_loads.len()
    }

    /// Memory usage as a percentage (0-100)
    pub fn memory_percent(&self) -> f64 {
        self.memory_used_fraction * 100.0
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            used_percent: self.memory_percent(),
            used_bytes: self.memory_used_bytes,
            total_bytes: self.memory_total_bytes,
        }
    }
}

/// Derived per-unit features fed to both policies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub cpu_load: f64,
    pub ipc_estimate: f64,
    pub cache_miss_estimate: f64,
    pub temp_estimate: f64,
}

impl FeatureVector {
    pub fn as_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.cpu_load,
            self.ipc_estimate,
            self.cache_miss_estimate,
            self.temp_estimate,
        ]
    }
}

/// Simulated core class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreType {
    Efficiency,
    Performance,
}

impl CoreType {
    pub fn label(&self) -> &'static str {
        match self {
            CoreType::Efficiency => "E-CORE",
            CoreType::Performance => "P-CORE",
        }
    }
}

/// Discrete DVFS frequency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreqLevel {
    Low,
    Medium,
    High,
}

impl FreqLevel {
    pub const ALL: [FreqLevel; 3] = [FreqLevel::Low, FreqLevel::Medium, FreqLevel::High];

    pub fn index(&self) -> usize {
        match self {
            FreqLevel::Low => 0,
            FreqLevel::Medium => 1,
            FreqLevel::High => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// A (core type, frequency level) scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decision {
    pub core: CoreType,
    pub freq: FreqLevel,
}

impl Decision {
    pub const THROTTLED: Decision = Decision {
        core: CoreType::Efficiency,
        freq: FreqLevel::Low,
    };

    pub fn new(core: CoreType, freq: FreqLevel) -> Self {
        Self { core, freq }
    }

    /// Nominal clock for display. P-cores step 1.8/3.0/4.2 GHz, E-cores 1.2/1.8/2.4 GHz.
    pub fn clock_ghz(&self) -> f64 {
        let idx = self.freq.index() as f64;
        match self.core {
            CoreType::Performance => 1.8 + idx * 1.2,
            CoreType::Efficiency => 1.2 + idx * 0.6,
        }
    }

    /// Nominal core voltage for display
    pub fn voltage(&self) -> f64 {
        0.8 + self.freq.index() as f64 * 0.2
    }
}

/// Aggregate power drawn under both policies in one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    pub ai_power_watts: f64,
    pub baseline_power_watts: f64,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Cumulative energy under both policies and the resulting savings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyTotals {
    pub ai_energy: f64,
    pub baseline_energy: f64,
    pub savings_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub used_percent: f64,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Per-unit outcome of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub index: usize,
    pub load_percent: f64,
    pub features: FeatureVector,
    pub ai: Decision,
    pub baseline: Decision,
    /// Thermal override replaced the AI decision
    pub throttled: bool,
    /// Model call failed; AI decision fell back to the baseline rule
    pub fallback: bool,
    pub ai_power_watts: f64,
    pub baseline_power_watts: f64,
}

/// Read-only copies of the three rolling history buffers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub ai_energy: Vec<f64>,
    pub baseline_energy: Vec<f64>,
    pub savings_percent: Vec<f64>,
}

/// Immutable record handed from the sampling task to the consumer once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickPacket {
    pub tick: u64,
    pub timestamp_ms: i64,
    /// Telemetry read failed and the previous snapshot was reused
    pub stale: bool,
    pub units: Vec<UnitReport>,
    pub memory: MemoryStats,
    pub energy: EnergySample,
    pub totals: EnergyTotals,
    pub history: HistorySnapshot,
}

impl TickPacket {
    pub fn performance_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.ai.core == CoreType::Performance)
            .count()
    }
}
