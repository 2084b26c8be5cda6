//! Counters and aggregates reported by the periodic statistics output.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::RunningStat;

// ── Log store counters ──

/// Log-store counters. Updated with `Ordering::Relaxed`.
#[derive(Debug, Default)]
pub struct LogMetrics {
    appended_total: AtomicU64,
    forced_deletions_total: AtomicU64,
    age_evictions_total: AtomicU64,
    page_erase_evictions_total: AtomicU64,
    page_erases_total: AtomicU64,
    flash_errors_total: AtomicU64,
    cursor_persist_errors_total: AtomicU64,
}

/// Point-in-time copy of [`LogMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogMetricsSnapshot {
    pub appended_total: u64,
    pub forced_deletions_total: u64,
    pub age_evictions_total: u64,
    pub page_erase_evictions_total: u64,
    pub page_erases_total: u64,
    pub flash_errors_total: u64,
    pub cursor_persist_errors_total: u64,
}

impl LogMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_append(&self) {
        self.appended_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_deletion(&self) {
        self.forced_deletions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_age_evictions(&self, n: u32) {
        self.age_evictions_total
            .fetch_add(u64::from(n), Ordering::Relaxed);
    }

    pub fn record_page_erase_evictions(&self, n: u32) {
        self.page_erase_evictions_total
            .fetch_add(u64::from(n), Ordering::Relaxed);
    }

    pub fn record_page_erase(&self) {
        self.page_erases_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flash_error(&self) {
        self.flash_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cursor_persist_error(&self) {
        self.cursor_persist_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> LogMetricsSnapshot {
        LogMetricsSnapshot {
            appended_total: self.appended_total.load(Ordering::Relaxed),
            forced_deletions_total: self.forced_deletions_total.load(Ordering::Relaxed),
            age_evictions_total: self.age_evictions_total.load(Ordering::Relaxed),
            page_erase_evictions_total: self.page_erase_evictions_total.load(Ordering::Relaxed),
            page_erases_total: self.page_erases_total.load(Ordering::Relaxed),
            flash_errors_total: self.flash_errors_total.load(Ordering::Relaxed),
            cursor_persist_errors_total: self.cursor_persist_errors_total.load(Ordering::Relaxed),
        }
    }
}

// ── Download statistics ──

/// Summary of one download session, folded into the aggregates when the
/// session ends.
#[derive(Debug, Clone, Copy)]
pub struct DownloadSample<'a> {
    pub received_bytes: u32,
    pub syncs_lost: u32,
    /// Per-sequence receipt counts.
    pub counts: &'a [u32],
    pub est_pkt_loss: f64,
}

/// Per-session distributions over a set of download sessions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DownloadAggregate {
    pub n_bytes: RunningStat,
    pub syncs_lost: RunningStat,
    /// Receipt count of every sequence number seen at least once.
    pub pkt_duplication: RunningStat,
    pub est_pkt_loss: RunningStat,
}

impl DownloadAggregate {
    pub fn fold(&mut self, sample: &DownloadSample<'_>) {
        self.n_bytes.add(f64::from(sample.received_bytes));
        self.syncs_lost.add(f64::from(sample.syncs_lost));
        for &count in sample.counts.iter().filter(|&&c| c > 0) {
            self.pkt_duplication.add(f64::from(count));
        }
        self.est_pkt_loss.add(sample.est_pkt_loss);
    }
}

/// Download counters and aggregates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DownloadMetrics {
    pub payloads_started: u32,
    pub payloads_complete: u32,
    pub payloads_failed: u32,
    pub switch_chunk: u32,
    pub cuckoo_fail: u32,
    pub log_read_fail: u32,
    pub total_matches: u64,
    pub last_download_end_time: Option<u32>,
    pub num_periodic_data: u32,
    pub num_periodic_data_error: u32,
    pub num_corrupt_packets: u32,
    pub num_out_of_range_packets: u32,
    pub num_length_mismatches: u32,
    pub all: DownloadAggregate,
    pub completed: DownloadAggregate,
    pub failed: DownloadAggregate,
}

impl DownloadMetrics {
    /// Emit the download section of the periodic report.
    pub fn log_summary(&self) {
        info!(
            started = self.payloads_started,
            complete = self.payloads_complete,
            failed = self.payloads_failed,
            switch_chunk = self.switch_chunk,
            cuckoo_fail = self.cuckoo_fail,
            log_read_fail = self.log_read_fail,
            total_matches = self.total_matches,
            "download statistics"
        );
        info!(
            packets = self.num_periodic_data,
            errors = self.num_periodic_data_error,
            corrupt = self.num_corrupt_packets,
            bytes_mu = self.all.n_bytes.mu,
            est_loss_mu = self.all.est_pkt_loss.mu,
            "download packet statistics"
        );
    }
}

// ── Scan statistics ──

/// Legacy-scan and periodic-packet statistics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanStats {
    /// Distinct ephemeral ids that started being tracked.
    pub num_obs_ids: u32,
    pub num_scan_results: u32,
    pub scan_rssi: RunningStat,
    pub encounter_rssi: RunningStat,
    pub periodic_data_size: RunningStat,
    pub periodic_data_rssi: RunningStat,
}

impl ScanStats {
    /// Emit the scan section of the periodic report.
    pub fn log_summary(&self) {
        info!(
            obs_ids = self.num_obs_ids,
            scan_results = self.num_scan_results,
            scan_rssi_mu = self.scan_rssi.mu,
            scan_rssi_sigma = self.scan_rssi.sigma,
            encounter_rssi_mu = self.encounter_rssi.mu,
            periodic_size_mu = self.periodic_data_size.mu,
            "scan statistics"
        );
    }
}
