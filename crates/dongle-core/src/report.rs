//! Values handed back to the host by the dongle entry points.

use dongle_download::FailReason;
use dongle_log::CursorSnapshot;
use dongle_observability::{DownloadMetrics, LogMetricsSnapshot, ScanStats};
use dongle_tracker::FlushReport;
use dongle_types::DongleTimer;
use serde::Serialize;

/// Periodic device report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DongleReport {
    pub dongle_id: u32,
    pub dongle_time: DongleTimer,
    pub epoch: u32,
    pub log: CursorSnapshot,
    pub log_metrics: LogMetricsSnapshot,
    /// Ephemeral ids currently in the tracking ring.
    pub tracked: usize,
    /// Live log slots flagged by a risk download.
    pub matched_slots: u32,
    pub scan: ScanStats,
    pub download: DownloadMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Complete {
        match_count: u32,
        received_bytes: u32,
    },
    Failed {
        reason: FailReason,
        received_bytes: u32,
    },
}

/// A download session that ended while handling a periodic packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadNotice {
    pub dongle_time: DongleTimer,
    pub chunk_id: u32,
    pub outcome: DownloadOutcome,
}

impl DownloadNotice {
    #[must_use]
    pub const fn match_count(&self) -> Option<u32> {
        match self.outcome {
            DownloadOutcome::Complete { match_count, .. } => Some(match_count),
            DownloadOutcome::Failed { .. } => None,
        }
    }
}

/// What one clock tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub dongle_time: DongleTimer,
    pub epoch: u32,
    /// The tick crossed an epoch boundary.
    pub new_epoch: bool,
    pub flush: FlushReport,
    /// Records evicted for age.
    pub aged_out: u32,
    /// Present when the report interval elapsed on this tick.
    pub report: Option<DongleReport>,
}
