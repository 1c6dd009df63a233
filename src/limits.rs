use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution budgets for a user context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Maximum wall-clock span of a single entry in milliseconds (0 = disabled)
    /// Counts everything, including time spent back inside host functions.
    pub max_entry_time_ms: u64,
    /// Maximum user-code time of a single entry in milliseconds (0 = disabled)
    /// Time spent inside nested host (API) calls doesn't count.
    pub max_user_time_ms: u64,
}

impl ExecutionLimits {
    pub fn new(max_entry_time: Option<Duration>, max_user_time: Option<Duration>) -> Self {
        Self {
            max_entry_time_ms: to_ms(max_entry_time),
            max_user_time_ms: to_ms(max_user_time),
        }
    }

    pub fn max_entry_time(&self) -> Option<Duration> {
        from_ms(self.max_entry_time_ms)
    }

    pub fn max_user_time(&self) -> Option<Duration> {
        from_ms(self.max_user_time_ms)
    }

    pub fn set_max_entry_time(&mut self, value: Option<Duration>) {
        self.max_entry_time_ms = to_ms(value);
    }

    pub fn set_max_user_time(&mut self, value: Option<Duration>) {
        self.max_user_time_ms = to_ms(value);
    }

    /// Returns true if no budget is configured
    pub fn is_unlimited(&self) -> bool {
        self.max_entry_time_ms == 0 && self.max_user_time_ms == 0
    }
}

/// Monitor thread configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Name given to the monitor thread (default: "timeguard-monitor")
    pub thread_name: String,
    /// Delay before re-validating deadlines that are due but not yet
    /// confirmed as overrun, in milliseconds (default: 5ms)
    pub recheck_interval_ms: u64,
}

impl MonitorConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms.max(1))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thread_name: "timeguard-monitor".to_string(),
            recheck_interval_ms: 5,
        }
    }
}

// Fractions of a millisecond round up: a stored budget is never shorter than
// the one configured, and never reads as disabled.
fn to_ms(value: Option<Duration>) -> u64 {
    match value {
        None => 0,
        Some(d) => u64::try_from(d.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX),
    }
}

fn from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
