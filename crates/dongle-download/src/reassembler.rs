//! Periodic download reassembly.
//!
//! # Session lifecycle
//!
//! ```text
//!   Idle ──first packet──▶ Active ──received >= declared──▶ on_complete
//!    ▲                      │  │                                │
//!    │      chunk switch ◀──┘  └── sync lost (counted only)     │
//!    │      (fail, restart)                                     │
//!    └─────── Complete / Failed(CuckooFail | LogRead) ◀─────────┘
//! ```
//!
//! Receipt accounting is per sequence number: the first copy of a sequence
//! is copied to `seq * MAX_PAYLOAD_SIZE` and counted towards
//! `received_bytes`; later copies only bump the per-sequence count.

use dongle_error::{DongleError, Result};
use dongle_flash::{CounterStore, FlashDevice};
use dongle_log::LogStore;
use dongle_observability::{DownloadMetrics, DownloadSample};
use dongle_types::{DongleTimer, LogIndex, MAX_FILTER_BYTES, MAX_PACKETS_PER_FILTER, MAX_PAYLOAD_SIZE, PacketHeader};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::filter::FilterLookup;

const BUFFER_BYTES: usize = MAX_PACKETS_PER_FILTER * MAX_PAYLOAD_SIZE;

/// Why a session ended without a usable filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailReason {
    /// The sender moved to another chunk before this one was complete.
    SwitchChunk,
    /// The assembled bytes are not a usable filter: truncated, oversized,
    /// or zero buckets.
    CuckooFail,
    /// The encounter log could not be read back while matching.
    LogRead,
}

impl FailReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SwitchChunk => "switch_chunk",
            Self::CuckooFail => "cuckoo_fail",
            Self::LogRead => "log_read",
        }
    }
}

/// A session that ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadFailure {
    pub chunk_id: u32,
    pub reason: FailReason,
    pub received_bytes: u32,
}

/// What a single periodic packet did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Zero-length report; nothing to account.
    Empty,
    /// Shorter than the packet header.
    Corrupt,
    /// Sequence number past the per-filter packet limit.
    OutOfRange { seq: u32 },
    /// Sequence already received; only its count changed.
    Duplicate { seq: u32, count: u32 },
    /// First copy of a sequence.
    Accepted { seq: u32, received_bytes: u32 },
    /// First copy of a sequence, and the declared length is now covered.
    /// The caller runs [`DownloadReassembler::on_complete`] next.
    Ready { chunk_id: u32, received_bytes: u32 },
}

/// Outcome of [`DownloadReassembler::on_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketReport {
    pub disposition: PacketDisposition,
    /// Chunk id of a session this packet started.
    pub started: Option<u32>,
    /// Session abandoned because this packet belongs to another chunk.
    pub abandoned: Option<DownloadFailure>,
}

impl PacketReport {
    const fn only(disposition: PacketDisposition) -> Self {
        Self {
            disposition,
            started: None,
            abandoned: None,
        }
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.disposition, PacketDisposition::Ready { .. })
    }
}

/// Outcome of [`DownloadReassembler::on_complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Complete {
        chunk_id: u32,
        received_bytes: u32,
        match_count: u32,
        /// Physical log slots whose record hit the filter.
        matched: Vec<LogIndex>,
    },
    Failed(DownloadFailure),
}

/// Estimated packet loss in percent.
///
/// The sender's payload updates do not line up with the radio's periodic
/// interval, so some sequences are legitimately seen more than once per
/// round. Loss is measured against the best-received sequence:
/// `100 * (1 - total / (max(counts) * distinct))`.
#[must_use]
pub fn estimate_loss(total_packets: u32, distinct: u32, counts: &[u32]) -> f64 {
    if total_packets == 0 && distinct == 0 {
        return 0.0;
    }
    let max_count = counts.iter().copied().max().unwrap_or(0);
    let expected = f64::from(max_count) * f64::from(distinct);
    if expected == 0.0 {
        return 0.0;
    }
    100.0 * (1.0 - f64::from(total_packets) / expected)
}

/// State of the session in progress.
#[derive(Debug, Clone)]
pub struct DownloadState {
    active: bool,
    chunk_id: u32,
    declared_len: u64,
    received_bytes: u32,
    counts: [u32; MAX_PACKETS_PER_FILTER],
    distinct_count: u32,
    total_packet_count: u32,
    syncs_lost: u32,
    corrupt_packets: u32,
    buffer: Box<[u8; BUFFER_BYTES]>,
}

impl Default for DownloadState {
    fn default() -> Self {
        Self {
            active: false,
            chunk_id: 0,
            declared_len: 0,
            received_bytes: 0,
            counts: [0; MAX_PACKETS_PER_FILTER],
            distinct_count: 0,
            total_packet_count: 0,
            syncs_lost: 0,
            corrupt_packets: 0,
            buffer: Box::new([0; BUFFER_BYTES]),
        }
    }
}

impl DownloadState {
    fn reset(&mut self) {
        self.active = false;
        self.chunk_id = 0;
        self.declared_len = 0;
        self.received_bytes = 0;
        self.counts = [0; MAX_PACKETS_PER_FILTER];
        self.distinct_count = 0;
        self.total_packet_count = 0;
        self.syncs_lost = 0;
        self.corrupt_packets = 0;
        self.buffer.fill(0);
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn chunk_id(&self) -> u32 {
        self.chunk_id
    }

    /// Length declared by the first packet of the session.
    #[must_use]
    pub const fn declared_len(&self) -> u64 {
        self.declared_len
    }

    #[must_use]
    pub const fn received_bytes(&self) -> u32 {
        self.received_bytes
    }

    /// Receipt count per sequence number.
    #[must_use]
    pub const fn counts(&self) -> &[u32; MAX_PACKETS_PER_FILTER] {
        &self.counts
    }

    #[must_use]
    pub const fn distinct_count(&self) -> u32 {
        self.distinct_count
    }

    /// In-range packets received, duplicates included.
    #[must_use]
    pub const fn total_packet_count(&self) -> u32 {
        self.total_packet_count
    }

    #[must_use]
    pub const fn syncs_lost(&self) -> u32 {
        self.syncs_lost
    }

    #[must_use]
    pub const fn corrupt_packets(&self) -> u32 {
        self.corrupt_packets
    }

    /// Assembly buffer; sequence `s` starts at `s * MAX_PAYLOAD_SIZE`.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..]
    }

    /// Loss estimate for the session so far.
    #[must_use]
    pub fn estimated_loss(&self) -> f64 {
        estimate_loss(self.total_packet_count, self.distinct_count, &self.counts)
    }

    fn is_ready(&self) -> bool {
        self.active && u64::from(self.received_bytes) >= self.declared_len
    }

    fn sample(&self) -> DownloadSample<'_> {
        DownloadSample {
            received_bytes: self.received_bytes,
            syncs_lost: self.syncs_lost,
            counts: &self.counts,
            est_pkt_loss: self.estimated_loss(),
        }
    }
}

/// Reassembles one risk filter at a time from periodic packets.
#[derive(Debug, Default)]
pub struct DownloadReassembler {
    state: DownloadState,
    metrics: DownloadMetrics,
}

impl DownloadReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> &DownloadState {
        &self.state
    }

    #[must_use]
    pub const fn metrics(&self) -> &DownloadMetrics {
        &self.metrics
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.state.active
    }

    /// Raw periodic report from the radio: header plus payload.
    pub fn on_periodic_data(&mut self, data: &[u8]) -> PacketReport {
        self.metrics.num_periodic_data += 1;
        if data.is_empty() {
            return PacketReport::only(PacketDisposition::Empty);
        }
        let Some((header, payload)) = PacketHeader::parse(data) else {
            self.state.corrupt_packets += 1;
            self.metrics.num_corrupt_packets += 1;
            debug!(len = data.len(), "periodic packet shorter than header");
            return PacketReport::only(PacketDisposition::Corrupt);
        };
        self.on_packet(header, payload)
    }

    /// The radio reported a periodic packet it could not receive intact.
    pub fn on_periodic_data_error(&mut self) {
        self.metrics.num_periodic_data_error += 1;
        self.metrics.num_corrupt_packets += 1;
        self.state.corrupt_packets += 1;
    }

    /// Periodic sync dropped. Counted against the active session, which
    /// stays open.
    pub fn on_sync_lost(&mut self) {
        if self.state.active {
            self.state.syncs_lost += 1;
            info!(
                chunk_id = self.state.chunk_id,
                received = self.state.received_bytes,
                syncs_lost = self.state.syncs_lost,
                "periodic sync lost during download"
            );
        }
    }

    fn start(&mut self, header: &PacketHeader) {
        self.state.active = true;
        self.state.chunk_id = header.chunk_id;
        self.state.declared_len = header.chunk_len;
        self.metrics.payloads_started += 1;
        info!(
            chunk_id = header.chunk_id,
            declared_len = header.chunk_len,
            "download started"
        );
    }

    fn fail(&mut self, reason: FailReason) -> DownloadFailure {
        let failure = DownloadFailure {
            chunk_id: self.state.chunk_id,
            reason,
            received_bytes: self.state.received_bytes,
        };
        let sample = self.state.sample();
        self.metrics.all.fold(&sample);
        self.metrics.failed.fold(&sample);
        self.metrics.payloads_failed += 1;
        match reason {
            FailReason::SwitchChunk => self.metrics.switch_chunk += 1,
            FailReason::CuckooFail => self.metrics.cuckoo_fail += 1,
            FailReason::LogRead => self.metrics.log_read_fail += 1,
        }
        warn!(
            chunk_id = failure.chunk_id,
            reason = reason.as_str(),
            received = failure.received_bytes,
            declared = self.state.declared_len,
            distinct = self.state.distinct_count,
            "download failed"
        );
        self.state.reset();
        failure
    }

    /// Account one parsed packet.
    pub fn on_packet(&mut self, header: PacketHeader, payload: &[u8]) -> PacketReport {
        let mut report = PacketReport::only(PacketDisposition::Empty);

        if !self.state.active {
            self.start(&header);
            report.started = Some(header.chunk_id);
        } else if header.chunk_id != self.state.chunk_id {
            report.abandoned = Some(self.fail(FailReason::SwitchChunk));
            self.start(&header);
            report.started = Some(header.chunk_id);
        } else if header.chunk_len != self.state.declared_len {
            self.metrics.num_length_mismatches += 1;
            warn!(
                chunk_id = header.chunk_id,
                declared = self.state.declared_len,
                got = header.chunk_len,
                "chunk length changed mid-download, keeping the first"
            );
        }

        let Some(seq) = usize::try_from(header.seq)
            .ok()
            .filter(|&seq| seq < MAX_PACKETS_PER_FILTER)
        else {
            self.metrics.num_out_of_range_packets += 1;
            debug!(seq = header.seq, max = MAX_PACKETS_PER_FILTER, "sequence out of range");
            report.disposition = PacketDisposition::OutOfRange { seq: header.seq };
            return report;
        };

        self.state.total_packet_count += 1;
        let count = &mut self.state.counts[seq];
        *count += 1;
        if *count > 1 {
            report.disposition = PacketDisposition::Duplicate {
                seq: header.seq,
                count: *count,
            };
            return report;
        }

        self.state.distinct_count += 1;
        let len = payload.len().min(MAX_PAYLOAD_SIZE);
        let offset = seq * MAX_PAYLOAD_SIZE;
        self.state.buffer[offset..offset + len].copy_from_slice(&payload[..len]);
        self.state.received_bytes += len as u32;
        debug!(
            seq,
            len,
            received = self.state.received_bytes,
            declared = self.state.declared_len,
            "packet accepted"
        );

        report.disposition = if self.state.is_ready() {
            PacketDisposition::Ready {
                chunk_id: self.state.chunk_id,
                received_bytes: self.state.received_bytes,
            }
        } else {
            PacketDisposition::Accepted {
                seq: header.seq,
                received_bytes: self.state.received_bytes,
            }
        };
        report
    }

    /// Finish the active session: validate the filter and check every
    /// logged encounter against it. The session ends either way; a log read
    /// failure ends it as [`FailReason::LogRead`].
    pub fn on_complete<F, C, L>(
        &mut self,
        log: &LogStore<F, C>,
        filter: &L,
        now: DongleTimer,
    ) -> Result<Completion>
    where
        F: FlashDevice,
        C: CounterStore,
        L: FilterLookup + ?Sized,
    {
        if !self.state.active {
            return Err(DongleError::Download {
                detail: "no download in progress".to_owned(),
            });
        }
        let declared = self.state.declared_len;
        if declared > u64::from(self.state.received_bytes) || declared > MAX_FILTER_BYTES as u64 {
            return Ok(Completion::Failed(self.fail(FailReason::CuckooFail)));
        }
        let filter_bytes = &self.state.buffer[..declared as usize];
        let num_buckets = filter.num_buckets(filter_bytes.len());
        if num_buckets == 0 {
            return Ok(Completion::Failed(self.fail(FailReason::CuckooFail)));
        }

        let mut matched = Vec::new();
        let mut lookup_error = None;
        let scanned = log.iterate_from(0, |i, record| {
            if filter.lookup(record.eph_id.hash(), filter_bytes, num_buckets) {
                match log.slot_for(i) {
                    Ok(slot) => matched.push(slot),
                    Err(err) => {
                        lookup_error = Some(err);
                        return false;
                    }
                }
            }
            true
        });
        if let Some(err) = scanned.err().or(lookup_error) {
            error!(chunk_id = self.state.chunk_id, error = %err, "log read failed during match");
            return Ok(Completion::Failed(self.fail(FailReason::LogRead)));
        }

        let match_count = matched.len() as u32;
        let completion = Completion::Complete {
            chunk_id: self.state.chunk_id,
            received_bytes: self.state.received_bytes,
            match_count,
            matched,
        };
        let sample = self.state.sample();
        self.metrics.all.fold(&sample);
        self.metrics.completed.fold(&sample);
        self.metrics.payloads_complete += 1;
        self.metrics.total_matches += u64::from(match_count);
        self.metrics.last_download_end_time = Some(now);
        info!(
            chunk_id = self.state.chunk_id,
            received = self.state.received_bytes,
            packets = self.state.total_packet_count,
            distinct = self.state.distinct_count,
            num_buckets,
            match_count,
            est_loss = self.state.estimated_loss(),
            "download complete"
        );
        self.state.reset();
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use dongle_flash::{FlashGeometry, MemCounterStore, MemFlash};
    use dongle_log::LogLayout;
    use dongle_types::{BeaconId, EncounterRecord, EphId, RecordFormat};

    use super::*;
    use crate::filter::{CuckooFilterBuilder, PackedCuckooFilter};

    fn header(seq: u32, chunk_id: u32, chunk_len: u64) -> PacketHeader {
        PacketHeader {
            seq,
            chunk_id,
            chunk_len,
        }
    }

    fn empty_log() -> LogStore<MemFlash, MemCounterStore> {
        let geometry = FlashGeometry {
            base: 0,
            size: 1024,
            page_size: 4,
            write_block_size: 4,
        };
        let layout = LogLayout::new(&geometry, 0, 512, RecordFormat::Full).unwrap();
        LogStore::open(MemFlash::new(geometry).unwrap(), MemCounterStore::new(), layout).unwrap()
    }

    #[test]
    fn test_short_packets() {
        let mut r = DownloadReassembler::new();
        assert_eq!(r.on_periodic_data(&[]).disposition, PacketDisposition::Empty);
        assert_eq!(r.on_periodic_data(&[1, 2, 3]).disposition, PacketDisposition::Corrupt);
        assert!(!r.is_active(), "case=no_session");
        assert_eq!(r.metrics().num_corrupt_packets, 1, "case=empty_not_corrupt");
        assert_eq!(r.metrics().num_periodic_data, 2);
    }

    #[test]
    fn test_first_packet_starts_session() {
        let mut r = DownloadReassembler::new();
        let report = r.on_packet(header(2, 7, 1000), &[0xAB; 234]);
        assert_eq!(report.started, Some(7));
        assert_eq!(
            report.disposition,
            PacketDisposition::Accepted { seq: 2, received_bytes: 234 }
        );
        assert_eq!(r.state().buffer()[468], 0xAB);
        assert_eq!(r.state().buffer()[467], 0);
        assert_eq!(r.metrics().payloads_started, 1);
    }

    #[test]
    fn test_out_of_range_sequence_keeps_session() {
        let mut r = DownloadReassembler::new();
        let report = r.on_packet(header(9, 1, 100), &[1; 10]);
        assert_eq!(report.disposition, PacketDisposition::OutOfRange { seq: 9 });
        assert!(r.is_active(), "case=still_active");
        assert_eq!(r.state().total_packet_count(), 0);
        assert_eq!(r.metrics().num_out_of_range_packets, 1);
    }

    #[test]
    fn test_duplicate_counts_but_does_not_copy() {
        let mut r = DownloadReassembler::new();
        r.on_packet(header(0, 1, 1000), &[1; 234]);
        let report = r.on_packet(header(0, 1, 1000), &[2; 234]);
        assert_eq!(report.disposition, PacketDisposition::Duplicate { seq: 0, count: 2 });
        assert_eq!(r.state().received_bytes(), 234);
        assert_eq!(r.state().buffer()[0], 1, "case=first_copy_kept");
        assert_eq!(r.state().total_packet_count(), 2);
        assert_eq!(r.state().distinct_count(), 1);
    }

    #[test]
    fn test_length_jitter_keeps_first_declaration() {
        let mut r = DownloadReassembler::new();
        r.on_packet(header(0, 1, 400), &[1; 234]);
        let report = r.on_packet(header(1, 1, 200), &[1; 100]);
        assert!(report.abandoned.is_none());
        assert_eq!(r.state().declared_len(), 400);
        assert_eq!(r.metrics().num_length_mismatches, 1);
        assert!(!report.is_ready(), "case=334_of_400");
    }

    #[test]
    fn test_sync_lost_counts_only_while_active() {
        let mut r = DownloadReassembler::new();
        r.on_sync_lost();
        assert_eq!(r.state().syncs_lost(), 0);
        r.on_packet(header(0, 1, 1000), &[1; 234]);
        r.on_sync_lost();
        r.on_sync_lost();
        assert_eq!(r.state().syncs_lost(), 2);
        assert!(r.is_active(), "case=not_failed");
    }

    #[test]
    fn test_estimate_loss() {
        assert_eq!(estimate_loss(0, 0, &[0; 9]), 0.0);
        assert_eq!(estimate_loss(8, 8, &[1, 1, 1, 1, 1, 1, 1, 1, 0]), 0.0);
        // Every sequence should have arrived twice; one copy of one is missing.
        let loss = estimate_loss(7, 4, &[2, 2, 2, 1, 0, 0, 0, 0, 0]);
        assert!((loss - 12.5).abs() < 1e-9, "case=one_of_eight loss={loss}");
    }

    #[test]
    fn test_complete_without_session_is_error() {
        let mut r = DownloadReassembler::new();
        let log = empty_log();
        assert!(r.on_complete(&log, &PackedCuckooFilter::DEVICE, 0).is_err());
    }

    #[test]
    fn test_truncated_filter_fails() {
        let mut r = DownloadReassembler::new();
        let log = empty_log();
        r.on_packet(header(0, 3, 1736), &[0; 234]);
        let completion = r.on_complete(&log, &PackedCuckooFilter::DEVICE, 5).unwrap();
        assert_eq!(
            completion,
            Completion::Failed(DownloadFailure {
                chunk_id: 3,
                reason: FailReason::CuckooFail,
                received_bytes: 234,
            })
        );
        assert_eq!(r.metrics().cuckoo_fail, 1);
        assert_eq!(r.metrics().failed.n_bytes.count(), 1);
        assert!(!r.is_active());
    }

    #[test]
    fn test_zero_bucket_filter_fails() {
        let mut r = DownloadReassembler::new();
        let log = empty_log();
        let report = r.on_packet(header(0, 3, 100), &[0; 100]);
        assert!(report.is_ready());
        let completion = r.on_complete(&log, &PackedCuckooFilter::DEVICE, 5).unwrap();
        assert!(matches!(
            completion,
            Completion::Failed(DownloadFailure { reason: FailReason::CuckooFail, .. })
        ));
    }

    #[test]
    fn test_complete_matches_logged_encounters() {
        let mut log = empty_log();
        let mut builder = CuckooFilterBuilder::device().unwrap();
        for n in 0..5_u8 {
            let eph = EphId::from_hash(&[n; 14]);
            log.append(
                &EncounterRecord {
                    beacon_id: BeaconId::pancast(u16::from(n)),
                    eph_id: eph,
                    ..EncounterRecord::default()
                },
                u32::from(n),
            )
            .unwrap();
            if n % 2 == 0 {
                builder.insert(eph.hash()).unwrap();
            }
        }
        let filter = builder.encode();

        let mut r = DownloadReassembler::new();
        let mut ready = false;
        for (seq, chunk) in filter.chunks(MAX_PAYLOAD_SIZE).enumerate() {
            ready = r.on_packet(header(seq as u32, 11, filter.len() as u64), chunk).is_ready();
        }
        assert!(ready);
        let completion = r.on_complete(&log, &PackedCuckooFilter::DEVICE, 42).unwrap();
        let (match_count, matched) = match completion {
            Completion::Complete {
                match_count,
                matched,
                ..
            } => (match_count, matched),
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(match_count, 3);
        assert_eq!(matched.iter().map(|s| s.get()).collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(r.metrics().last_download_end_time, Some(42));
        assert_eq!(r.metrics().total_matches, 3);
        assert_eq!(r.metrics().completed.n_bytes.mean(), 1736.0);
    }
}
