use dongle_error::{DongleError, Result};
use serde::{Deserialize, Serialize};

/// Default number of ephemeral ids tracked at once.
pub const DEFAULT_MAX_TRACKED: usize = 16;
/// Default wait, in dongle clock units, before a tracked id is committed.
pub const DEFAULT_LOG_MIN_WAIT: u32 = 15;

/// Tracker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Slots in the tracking ring.
    pub max_tracked: usize,
    /// A slot is committed once `now - dongle_time_start` exceeds this.
    pub log_min_wait: u32,
    /// Candidates observed for less than this are dropped at commit time.
    /// Zero keeps every candidate.
    pub min_encounter_duration: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_tracked: DEFAULT_MAX_TRACKED,
            log_min_wait: DEFAULT_LOG_MIN_WAIT,
            min_encounter_duration: 0,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tracked == 0 {
            return Err(DongleError::invalid_config(
                "max_tracked must be at least 1",
            ));
        }
        Ok(())
    }
}
