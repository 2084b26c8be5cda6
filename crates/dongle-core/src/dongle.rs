//! The owned dongle context.

use std::sync::Arc;

use dongle_download::{
    Completion, DownloadFailure, DownloadReassembler, FilterLookup, MatchBitmap,
    PackedCuckooFilter,
};
use dongle_error::{DongleError, Result};
use dongle_flash::{CounterStore, FlashDevice};
use dongle_log::{LogLayout, LogStore, NUM_OTP, OtpTable, StorageMap};
use dongle_observability::{DongleTelemetryEvent, NoOpObserver, ScanStats, TelemetryObserver};
use dongle_tracker::{EncounterTracker, ObservationOutcome};
use dongle_types::{DongleTimer, decode_advertisement};
use tracing::{debug, info, warn};

use crate::config::DongleConfig;
use crate::device::DeviceConfig;
use crate::report::{DongleReport, DownloadNotice, DownloadOutcome, TickReport};

/// Every piece of device state, driven by radio and timer events.
///
/// Single-threaded: each entry point runs to completion before the next
/// one starts. Wrap in [`crate::SharedDongle`] when events arrive on more
/// than one thread.
pub struct Dongle<F: FlashDevice, C: CounterStore> {
    config: DongleConfig,
    device: DeviceConfig,
    log: LogStore<F, C>,
    otp: OtpTable,
    tracker: EncounterTracker,
    download: DownloadReassembler,
    filter: Box<dyn FilterLookup + Send + Sync>,
    bitmap: MatchBitmap,
    /// The in-memory bitmap differs from the persisted one.
    bitmap_dirty: bool,
    scan_stats: ScanStats,
    observer: Arc<dyn TelemetryObserver>,
    dongle_time: DongleTimer,
    epoch: u32,
    report_time: DongleTimer,
}

impl<F: FlashDevice, C: CounterStore> Dongle<F, C> {
    pub fn open(config: DongleConfig, flash: F, counters: C) -> Result<Self> {
        Self::open_with_observer(config, flash, counters, Arc::new(NoOpObserver))
    }

    /// Load or provision the device identity, restore the clock and the log
    /// cursor, and start with an empty tracking ring and no download.
    pub fn open_with_observer(
        config: DongleConfig,
        flash: F,
        mut counters: C,
        observer: Arc<dyn TelemetryObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let geometry = flash.geometry();
        let map = StorageMap::new(&geometry, config.log.flash_offset)?;
        let layout = LogLayout::new(
            &geometry,
            map.log,
            config.log.reserved_bytes,
            config.log.record_format,
        )?;

        let device = DeviceConfig::load_or_provision(&mut counters, &config)?;
        let dongle_time = device.resume_clock(&counters)?;
        let log = LogStore::open(flash, counters, layout)?;
        let bitmap = restore_bitmap(&log)?;
        let tracker = EncounterTracker::new(config.tracker())?;
        let epoch = dongle_time.saturating_sub(device.t_init) / config.epoch_length;

        info!(
            dongle_id = device.dongle_id,
            t_init = device.t_init,
            dongle_time,
            epoch,
            otp = map.otp,
            log_base = map.log,
            logged = log.count(),
            matched = bitmap.count(),
            "dongle started"
        );
        observer.on_event(&DongleTelemetryEvent::Restart { dongle_time, epoch });

        Ok(Self {
            config,
            device,
            bitmap,
            bitmap_dirty: false,
            log,
            otp: OtpTable::new(map.otp),
            tracker,
            download: DownloadReassembler::new(),
            filter: Box::new(PackedCuckooFilter::DEVICE),
            scan_stats: ScanStats::default(),
            observer,
            dongle_time,
            epoch,
            report_time: dongle_time,
        })
    }

    /// Replace the risk-filter decoder.
    #[must_use]
    pub fn with_filter(mut self, filter: impl FilterLookup + Send + Sync + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TelemetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn emit(&self, event: &DongleTelemetryEvent) {
        self.observer.on_event(event);
    }

    // ── OTP ──

    /// Erase the OTP table and store a fresh set of codes.
    pub fn save_otps(&mut self, codes: &[u64; NUM_OTP]) -> Result<()> {
        self.otp.save_all(self.log.flash_mut(), codes)
    }

    /// Redeem a one-time code, returning the entry it consumed.
    pub fn redeem_otp(&mut self, code: u64) -> Result<Option<usize>> {
        let redeemed = self.otp.match_code(self.log.flash_mut(), code)?;
        if redeemed.is_none() {
            warn!(dongle_time = self.dongle_time, "otp rejected");
        }
        Ok(redeemed)
    }

    pub fn otp_remaining(&self) -> Result<usize> {
        self.otp.remaining(self.log.flash())
    }

    // ── Legacy scan ──

    /// Handle one legacy advertisement. Returns `None` when it is not a
    /// beacon broadcast.
    pub fn on_scan(&mut self, raw: &[u8], rssi: i8) -> Option<ObservationOutcome> {
        let broadcast = decode_advertisement(raw)?;
        let now = self.dongle_time;
        self.emit(&DongleTelemetryEvent::ScanResult {
            dongle_time: now,
            rssi,
        });

        let outcome = self.tracker.on_observation(
            broadcast.beacon_id,
            broadcast.location_id,
            broadcast.eph_id,
            broadcast.beacon_time,
            rssi,
            now,
        );
        let beacon_id = broadcast.beacon_id.0;
        match outcome {
            ObservationOutcome::ServiceMismatch { service_id } => {
                self.emit(&DongleTelemetryEvent::BroadcastIdMismatch {
                    dongle_time: now,
                    beacon_id,
                    service_id,
                });
            }
            ObservationOutcome::New { slot, .. } => {
                self.scan_stats.num_obs_ids += 1;
                self.record_scan(rssi);
                self.emit(&DongleTelemetryEvent::TrackNew {
                    dongle_time: now,
                    beacon_id,
                    slot,
                });
            }
            ObservationOutcome::Match {
                slot,
                dongle_time_duration,
            } => {
                self.record_scan(rssi);
                self.emit(&DongleTelemetryEvent::TrackMatch {
                    dongle_time: now,
                    beacon_id,
                    slot,
                    dongle_time_duration,
                });
            }
        }
        Some(outcome)
    }

    fn record_scan(&mut self, rssi: i8) {
        self.scan_stats.num_scan_results += 1;
        self.scan_stats.scan_rssi.add(f64::from(rssi));
    }

    // ── Periodic download ──

    /// Handle one periodic report. Returns a notice for every session that
    /// ended on this packet: an abandoned chunk, a completed one, or both.
    pub fn on_periodic_data(&mut self, data: &[u8], rssi: i8) -> Result<Vec<DownloadNotice>> {
        self.scan_stats.periodic_data_size.add(data.len() as f64);
        self.scan_stats.periodic_data_rssi.add(f64::from(rssi));

        let report = self.download.on_periodic_data(data);
        let mut notices = Vec::new();
        if let Some(failure) = report.abandoned {
            notices.push(self.failed(failure));
        }
        if let Some(chunk_id) = report.started {
            self.emit(&DongleTelemetryEvent::DownloadStarted {
                dongle_time: self.dongle_time,
                chunk_id,
            });
        }
        if report.is_ready() {
            let completion = self
                .download
                .on_complete(&self.log, &*self.filter, self.dongle_time)?;
            notices.push(self.finish(completion));
        }
        Ok(notices)
    }

    pub fn on_periodic_data_error(&mut self, rssi: i8) {
        self.scan_stats.periodic_data_rssi.add(f64::from(rssi));
        self.download.on_periodic_data_error();
    }

    pub fn on_sync_lost(&mut self) {
        self.download.on_sync_lost();
    }

    fn failed(&self, failure: DownloadFailure) -> DownloadNotice {
        self.emit(&DongleTelemetryEvent::DownloadFailed {
            dongle_time: self.dongle_time,
            chunk_id: failure.chunk_id,
            reason: failure.reason.as_str(),
            received_bytes: failure.received_bytes,
        });
        DownloadNotice {
            dongle_time: self.dongle_time,
            chunk_id: failure.chunk_id,
            outcome: DownloadOutcome::Failed {
                reason: failure.reason,
                received_bytes: failure.received_bytes,
            },
        }
    }

    fn finish(&mut self, completion: Completion) -> DownloadNotice {
        match completion {
            Completion::Failed(failure) => self.failed(failure),
            Completion::Complete {
                chunk_id,
                received_bytes,
                match_count,
                matched,
            } => {
                for slot in matched {
                    self.bitmap.set(slot);
                }
                if match_count > 0 {
                    self.save_bitmap();
                    info!(
                        chunk_id,
                        match_count,
                        flagged = self.bitmap.count(),
                        "risk download matched logged encounters"
                    );
                }
                self.emit(&DongleTelemetryEvent::DownloadComplete {
                    dongle_time: self.dongle_time,
                    chunk_id,
                    received_bytes,
                    match_count,
                });
                DownloadNotice {
                    dongle_time: self.dongle_time,
                    chunk_id,
                    outcome: DownloadOutcome::Complete {
                        match_count,
                        received_bytes,
                    },
                }
            }
        }
    }

    // ── Clock ──

    /// Advance the clock one unit and run the periodic work due at the new
    /// time: commit expired candidates, evict aged records, update the epoch
    /// and report when the interval has elapsed.
    pub fn tick(&mut self) -> Result<TickReport> {
        let now = self
            .dongle_time
            .checked_add(1)
            .ok_or_else(|| DongleError::out_of_range("dongle clock", self.dongle_time))?;
        self.dongle_time = now;

        let flush = self.tracker.flush_expired(now, &mut self.log);
        let capacity = self.log.layout().capacity();
        for promotion in &flush.promoted {
            for n in 0..promotion.evicted() {
                self.bitmap_dirty |= self.bitmap.clear(promotion.evicted_from.advance(n, capacity));
            }
            if promotion.forced_deletion {
                self.emit(&DongleTelemetryEvent::LogEvicted {
                    dongle_time: now,
                    reason: "full",
                    records: 1,
                });
            }
            if promotion.erase_evictions > 0 {
                self.emit(&DongleTelemetryEvent::LogEvicted {
                    dongle_time: now,
                    reason: "page_erase",
                    records: promotion.erase_evictions,
                });
            }
            // The slot now holds a new record; any earlier match is stale.
            self.bitmap_dirty |= self.bitmap.clear(promotion.log_slot);
            let record = &promotion.record;
            self.scan_stats.encounter_rssi.add(f64::from(record.rssi));
            self.emit(&DongleTelemetryEvent::Encounter {
                dongle_time: now,
                beacon_id: record.beacon_id.0,
                location_id: record.location_id,
                dongle_time_duration: record.dongle_time_duration,
                rssi: record.rssi,
            });
            if !promotion.stored {
                let addr = self.log.layout().slot(promotion.log_slot)?.addr;
                self.emit(&DongleTelemetryEvent::FlashFailure {
                    dongle_time: now,
                    op: "append",
                    addr,
                });
            }
        }

        let tail = self.log.tail();
        let aged_out = self.log.evict_older_than(now, self.config.max_log_age)?;
        if aged_out > 0 {
            for n in 0..aged_out {
                self.bitmap_dirty |= self.bitmap.clear(tail.advance(n, capacity));
            }
            self.emit(&DongleTelemetryEvent::LogEvicted {
                dongle_time: now,
                reason: "age",
                records: aged_out,
            });
        }

        if self.bitmap_dirty {
            self.save_bitmap();
        }

        let epoch = now.saturating_sub(self.device.t_init) / self.config.epoch_length;
        let new_epoch = epoch != self.epoch;
        if new_epoch {
            debug!(epoch, dongle_time = now, "epoch advanced");
            self.epoch = epoch;
        }

        let report = if now.saturating_sub(self.report_time) >= self.config.report_interval {
            self.report_time = now;
            Some(self.report())
        } else {
            None
        };

        Ok(TickReport {
            dongle_time: now,
            epoch,
            new_epoch,
            flush,
            aged_out,
            report,
        })
    }

    /// Persist the match bitmap. A failed save is retried on the next tick.
    fn save_bitmap(&mut self) {
        match self.bitmap.save(self.log.counters_mut()) {
            Ok(()) => self.bitmap_dirty = false,
            Err(err) => {
                self.bitmap_dirty = true;
                warn!(error = %err, matched = self.bitmap.count(), "match bitmap save failed");
            }
        }
    }

    /// Snapshot the device statistics and log them.
    pub fn report(&self) -> DongleReport {
        let report = DongleReport {
            dongle_id: self.device.dongle_id,
            dongle_time: self.dongle_time,
            epoch: self.epoch,
            log: self.log.snapshot(),
            log_metrics: self.log.metrics(),
            tracked: self.tracker.tracked(),
            matched_slots: self.bitmap.count(),
            scan: self.scan_stats.clone(),
            download: self.download.metrics().clone(),
        };
        info!(
            dongle_id = report.dongle_id,
            dongle_time = report.dongle_time,
            epoch = report.epoch,
            logged = report.log.count,
            total_logged = report.log_metrics.appended_total,
            tracked = report.tracked,
            matched = report.matched_slots,
            "dongle report"
        );
        self.scan_stats.log_summary();
        self.download.metrics().log_summary();
        report
    }

    /// Whether a download completed at or after `since`.
    #[must_use]
    pub fn download_fresh(&self, since: DongleTimer) -> bool {
        self.download
            .metrics()
            .last_download_end_time
            .is_some_and(|end| end >= since)
    }

    // ── Accessors ──

    #[must_use]
    pub const fn config(&self) -> &DongleConfig {
        &self.config
    }

    #[must_use]
    pub const fn device(&self) -> &DeviceConfig {
        &self.device
    }

    #[must_use]
    pub const fn dongle_time(&self) -> DongleTimer {
        self.dongle_time
    }

    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    #[must_use]
    pub const fn log(&self) -> &LogStore<F, C> {
        &self.log
    }

    #[must_use]
    pub const fn tracker(&self) -> &EncounterTracker {
        &self.tracker
    }

    #[must_use]
    pub const fn download(&self) -> &DownloadReassembler {
        &self.download
    }

    #[must_use]
    pub const fn bitmap(&self) -> &MatchBitmap {
        &self.bitmap
    }

    #[must_use]
    pub const fn scan_stats(&self) -> &ScanStats {
        &self.scan_stats
    }

    /// Release the medium and the counter store.
    pub fn into_parts(self) -> (F, C) {
        self.log.into_parts()
    }
}

/// Reload the persisted match bitmap, keeping only slots that still hold a
/// live record.
fn restore_bitmap<F: FlashDevice, C: CounterStore>(log: &LogStore<F, C>) -> Result<MatchBitmap> {
    let capacity = log.layout().capacity().get();
    let saved = MatchBitmap::load(capacity, log.counters())?;
    let mut live = MatchBitmap::new(capacity);
    for i in 0..log.count() {
        let slot = log.slot_for(i)?;
        if saved.is_set(slot) {
            live.set(slot);
        }
    }
    Ok(live)
}

#[cfg(test)]
mod tests {
    use dongle_download::CuckooFilterBuilder;
    use dongle_flash::{CounterKey, FlashGeometry, MemCounterStore, MemFlash};
    use dongle_observability::TelemetryRingBuffer;
    use dongle_types::{
        BeaconBroadcast, BeaconId, EphId, MAX_PAYLOAD_SIZE, PacketHeader, encode_advertisement,
    };

    use super::*;
    use crate::config::LogConfig;

    fn geometry() -> FlashGeometry {
        FlashGeometry {
            base: 0,
            size: 0x1000,
            page_size: 4,
            write_block_size: 4,
        }
    }

    fn config() -> DongleConfig {
        DongleConfig {
            dongle_id: 5,
            t_init: 100,
            log_min_wait: 3,
            max_log_age: 50,
            report_interval: 10,
            epoch_length: 4,
            log: LogConfig {
                reserved_bytes: 0x200,
                ..LogConfig::default()
            },
            ..DongleConfig::default()
        }
    }

    fn open() -> Dongle<MemFlash, MemCounterStore> {
        Dongle::open(config(), MemFlash::new(geometry()).unwrap(), MemCounterStore::new()).unwrap()
    }

    fn eph(n: u8) -> EphId {
        EphId::from_hash(&[n; 14])
    }

    fn adv(n: u8, beacon_id: BeaconId) -> [u8; 31] {
        encode_advertisement(&BeaconBroadcast {
            beacon_time: 1,
            beacon_id,
            location_id: 77,
            eph_id: eph(n),
        })
    }

    fn download(
        dongle: &mut Dongle<MemFlash, MemCounterStore>,
        chunk_id: u32,
        ids: &[u8],
    ) -> Vec<DownloadNotice> {
        let mut builder = CuckooFilterBuilder::device().unwrap();
        for &id in ids {
            builder.insert(eph(id).hash()).unwrap();
        }
        let filter = builder.encode();
        let mut notices = Vec::new();
        for (seq, payload) in filter.chunks(MAX_PAYLOAD_SIZE).enumerate() {
            let packet = PacketHeader {
                seq: seq as u32,
                chunk_id,
                chunk_len: filter.len() as u64,
            }
            .encode_packet(payload);
            notices.extend(dongle.on_periodic_data(&packet, -80).unwrap());
        }
        notices
    }

    /// One 4 KiB page holding a five-slot log, so every wrap erases the
    /// whole ring.
    fn open_single_page(
        counters: MemCounterStore,
        flash: Option<MemFlash>,
    ) -> Dongle<MemFlash, MemCounterStore> {
        let config = DongleConfig {
            log: LogConfig {
                reserved_bytes: 0x100,
                ..LogConfig::default()
            },
            ..config()
        };
        let flash = flash.unwrap_or_else(|| {
            MemFlash::new(FlashGeometry {
                base: 0,
                size: 0x2000,
                page_size: 0x1000,
                write_block_size: 4,
            })
            .unwrap()
        });
        Dongle::open(config, flash, counters).unwrap()
    }

    /// Track `ids` at the current time and tick until they are committed.
    fn commit(dongle: &mut Dongle<MemFlash, MemCounterStore>, ids: &[u8]) {
        for &id in ids {
            dongle.on_scan(&adv(id, BeaconId::pancast(u16::from(id))), -60);
        }
        for _ in 0..4 {
            dongle.tick().unwrap();
        }
    }

    #[test]
    fn test_open_provisions_and_starts_at_t_init() {
        let dongle = open();
        assert_eq!(dongle.dongle_time(), 100);
        assert_eq!(dongle.epoch(), 0);
        assert_eq!(dongle.device().dongle_id, 5);
        assert_eq!(dongle.log().count(), 0);
        assert_eq!(dongle.bitmap().capacity(), dongle.log().layout().capacity().get());
    }

    #[test]
    fn test_scan_rejects_wrong_length() {
        let mut dongle = open();
        assert!(dongle.on_scan(&[0; 30], -60).is_none(), "case=short");
        assert!(dongle.on_scan(&[0; 32], -60).is_none(), "case=long");
        assert_eq!(dongle.scan_stats().num_scan_results, 0);
    }

    #[test]
    fn test_scan_updates_stats_and_telemetry() {
        let ring = Arc::new(TelemetryRingBuffer::new(16));
        let mut dongle = open().with_observer(ring.clone());
        dongle.on_scan(&adv(1, BeaconId::pancast(1)), -60);
        dongle.on_scan(&adv(1, BeaconId::pancast(1)), -70);
        dongle.on_scan(&adv(2, BeaconId(0x1234_0001)), -50);

        let stats = dongle.scan_stats();
        assert_eq!(stats.num_obs_ids, 1);
        assert_eq!(stats.num_scan_results, 2, "case=mismatch_not_counted");
        assert_eq!(stats.scan_rssi.mean(), -65.0);

        let kinds: Vec<&str> = ring.drain().iter().map(DongleTelemetryEvent::kind_str).collect();
        assert_eq!(
            kinds,
            vec![
                "scan_result",
                "track_new",
                "scan_result",
                "track_match",
                "scan_result",
                "broadcast_id_mismatch",
            ]
        );
    }

    #[test]
    fn test_tick_promotes_after_min_wait() {
        let mut dongle = open();
        dongle.on_scan(&adv(3, BeaconId::pancast(3)), -60);
        for _ in 0..3 {
            let tick = dongle.tick().unwrap();
            assert!(tick.flush.promoted.is_empty(), "case=still_waiting t={}", tick.dongle_time);
        }
        let tick = dongle.tick().unwrap();
        assert_eq!(tick.flush.promoted.len(), 1, "case=waited_four");
        assert!(tick.flush.promoted[0].stored);
        assert_eq!(dongle.log().count(), 1);
        assert_eq!(dongle.scan_stats().encounter_rssi.count(), 1);
    }

    #[test]
    fn test_epoch_and_report_interval() {
        let mut dongle = open();
        let mut reports = 0;
        let mut epochs = 0;
        for _ in 0..20 {
            let tick = dongle.tick().unwrap();
            reports += usize::from(tick.report.is_some());
            epochs += usize::from(tick.new_epoch);
        }
        assert_eq!(dongle.epoch(), 5, "case=20_over_4");
        assert_eq!(epochs, 5);
        assert_eq!(reports, 2, "case=every_10");
    }

    #[test]
    fn test_download_sets_bitmap_and_notice() {
        let mut dongle = open();
        dongle.on_scan(&adv(4, BeaconId::pancast(4)), -60);
        dongle.on_scan(&adv(6, BeaconId::pancast(6)), -60);
        for _ in 0..4 {
            dongle.tick().unwrap();
        }
        assert_eq!(dongle.log().count(), 2);

        let notices = download(&mut dongle, 1, &[6]);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].match_count(), Some(1));
        assert_eq!(dongle.bitmap().count(), 1);
        assert!(dongle.download_fresh(dongle.dongle_time()));
        assert!(!dongle.download_fresh(dongle.dongle_time() + 1), "case=stale_query");
    }

    #[test]
    fn test_page_erase_clears_match_bits_of_erased_records() {
        let ring = Arc::new(TelemetryRingBuffer::new(64));
        let mut dongle =
            open_single_page(MemCounterStore::new(), None).with_observer(ring.clone());
        assert_eq!(dongle.log().layout().capacity().get(), 5);
        commit(&mut dongle, &[10, 11, 12, 13, 14]);
        assert_eq!(dongle.log().count(), 5);

        download(&mut dongle, 1, &[13]);
        let slot = dongle.log().slot_for(3).unwrap();
        assert!(dongle.bitmap().is_set(slot), "case=slot3_flagged");

        // Wrapping back to slot 0 erases the page under the whole ring.
        commit(&mut dongle, &[20]);
        assert_eq!(dongle.log().count(), 1);
        assert_eq!(dongle.bitmap().count(), 0, "case=erased_match_cleared");
        assert_eq!(dongle.report().matched_slots, 0);

        let evictions: Vec<(&str, u32)> = ring
            .drain()
            .iter()
            .filter_map(|event| match event {
                DongleTelemetryEvent::LogEvicted {
                    reason, records, ..
                } => Some((*reason, *records)),
                _ => None,
            })
            .collect();
        assert_eq!(evictions, vec![("full", 1), ("page_erase", 4)]);

        let (flash, counters) = dongle.into_parts();
        let reopened = open_single_page(counters, Some(flash));
        assert_eq!(reopened.bitmap().count(), 0, "case=clear_persisted");
    }

    #[test]
    fn test_match_bitmap_survives_reopen() {
        let mut dongle = open_single_page(MemCounterStore::new(), None);
        commit(&mut dongle, &[30, 31, 32]);
        download(&mut dongle, 2, &[31]);
        let slot = dongle.log().slot_for(1).unwrap();
        assert!(dongle.bitmap().is_set(slot));

        let (flash, counters) = dongle.into_parts();
        assert_eq!(
            counters.read(CounterKey::MatchWord(0)).unwrap(),
            Some(1 << slot.get()),
            "case=saved_on_complete"
        );
        let reopened = open_single_page(counters, Some(flash));
        assert_eq!(reopened.log().count(), 3);
        assert!(reopened.bitmap().is_set(slot), "case=restored");
        assert_eq!(reopened.bitmap().count(), 1);
        assert_eq!(reopened.report().matched_slots, 1);
    }

    #[test]
    fn test_restore_drops_bits_of_slots_without_records() {
        let mut counters = MemCounterStore::new();
        let mut stale = MatchBitmap::new(5);
        stale.set(dongle_types::LogIndex::new(4, std::num::NonZeroU32::new(5).unwrap()).unwrap());
        stale.save(&mut counters).unwrap();
        let dongle = open_single_page(counters, None);
        assert_eq!(dongle.log().count(), 0);
        assert_eq!(dongle.bitmap().count(), 0, "case=empty_log_no_matches");
    }

    #[test]
    fn test_otp_round_trip() {
        let mut dongle = open();
        let mut codes = [0_u64; NUM_OTP];
        for (i, code) in codes.iter_mut().enumerate() {
            *code = 1000 + i as u64;
        }
        dongle.save_otps(&codes).unwrap();
        assert_eq!(dongle.otp_remaining().unwrap(), NUM_OTP);
        assert_eq!(dongle.redeem_otp(1003).unwrap(), Some(3));
        assert_eq!(dongle.redeem_otp(1003).unwrap(), None, "case=single_use");
        assert_eq!(dongle.otp_remaining().unwrap(), NUM_OTP - 1);
    }

    #[test]
    fn test_reopen_resumes_clock_and_log() {
        let mut dongle = open();
        dongle.on_scan(&adv(9, BeaconId::pancast(9)), -60);
        for _ in 0..4 {
            dongle.tick().unwrap();
        }
        let (flash, counters) = dongle.into_parts();
        let reopened = Dongle::open(
            DongleConfig {
                dongle_id: 77,
                ..config()
            },
            flash,
            counters,
        )
        .unwrap();
        assert_eq!(reopened.dongle_time(), 104, "case=clock_from_last_append");
        assert_eq!(reopened.log().count(), 1);
        assert_eq!(reopened.device().dongle_id, 5, "case=persisted_identity");
        assert_eq!(reopened.epoch(), 1);
    }
}
