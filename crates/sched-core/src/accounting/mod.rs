//! Energy accounting and rolling efficiency history

mod energy;
mod history;

pub use energy::{
    core_factor, freq_factor, savings_percent, unit_power, EnergyAccountant,
    WATTS_PER_LOAD_PERCENT,
};
pub use history::{HistorySet, RollingHistory, DEFAULT_HISTORY_CAPACITY};
