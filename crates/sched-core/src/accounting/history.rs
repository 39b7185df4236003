//! Fixed-capacity rolling history buffers
//!
//! Insertion-ordered, oldest evicted first. Three buffers (AI energy,
//! baseline energy, savings) are kept in lock-step by `HistorySet`.

use crate::models::HistorySnapshot;
use std::collections::VecDeque;

/// Default number of retained samples
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Bounded FIFO of the most recently appended values
#[derive(Debug, Clone)]
pub struct RollingHistory<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RollingHistory<T> {
    /// Create a buffer holding at most `capacity` values (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push to the back, evicting from the front once over capacity
    pub fn append(&mut self, value: T) {
        self.buffer.push_back(value);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// Oldest-first copy of the buffer contents
    pub fn snapshot(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Default for RollingHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// The three parallel buffers that feed efficiency reporting
#[derive(Debug, Clone)]
pub struct HistorySet {
    ai_energy: RollingHistory<f64>,
    baseline_energy: RollingHistory<f64>,
    savings_percent: RollingHistory<f64>,
}

impl HistorySet {
    pub fn new(capacity: usize) -> Self {
        Self {
            ai_energy: RollingHistory::new(capacity),
            baseline_energy: RollingHistory::new(capacity),
            savings_percent: RollingHistory::new(capacity),
        }
    }

    /// Append one tick's values to all three buffers
    pub fn record(&mut self, ai_energy: f64, baseline_energy: f64, savings_percent: f64) {
        self.ai_energy.append(ai_energy);
        self.baseline_energy.append(baseline_energy);
        self.savings_percent.append(savings_percent);
        debug_assert_eq!(self.ai_energy.len(), self.baseline_energy.len());
        debug_assert_eq!(self.ai_energy.len(), self.savings_percent.len());
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            ai_energy: self.ai_energy.snapshot(),
            baseline_energy: self.baseline_energy.snapshot(),
            savings_percent: self.savings_percent.snapshot(),
        }
    }

    pub fn len(&self) -> usize {
        self.ai_energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ai_energy.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ai_energy.capacity()
    }
}

impl Default for HistorySet {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
