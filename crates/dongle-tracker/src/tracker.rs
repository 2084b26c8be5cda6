//! The tracking ring and its commit sweep.

use dongle_error::Result;
use dongle_flash::{CounterStore, FlashDevice};
use dongle_log::LogStore;
use dongle_types::{BeaconId, BeaconTimer, DongleTimer, EncounterRecord, EphId, LocationId, LogIndex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;

/// A candidate encounter being built from repeated sightings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackedEncounter {
    pub record: EncounterRecord,
    /// Sightings folded into `record.rssi`.
    pub observations: u32,
}

impl TrackedEncounter {
    fn seed(
        beacon_id: BeaconId,
        location_id: LocationId,
        eph_id: EphId,
        beacon_time: BeaconTimer,
        rssi: i8,
        now: DongleTimer,
    ) -> Self {
        Self {
            record: EncounterRecord {
                location_id,
                beacon_id,
                beacon_time_start: beacon_time,
                // The first sighting is assumed to open the current unit.
                beacon_time_duration: 1,
                dongle_time_start: now,
                dongle_time_duration: 0,
                rssi,
                eph_id,
            },
            observations: 1,
        }
    }

    fn observe(&mut self, beacon_time: BeaconTimer, rssi: i8, now: DongleTimer) {
        let record = &mut self.record;
        record.dongle_time_duration = now.saturating_sub(record.dongle_time_start);
        record.beacon_time_duration = beacon_time
            .saturating_sub(record.beacon_time_start)
            .saturating_add(1);
        let n = i64::from(self.observations);
        let avg = (i64::from(record.rssi) * n + i64::from(rssi)) / (n + 1);
        record.rssi = avg.clamp(i64::from(i8::MIN), i64::from(i8::MAX)) as i8;
        self.observations = self.observations.saturating_add(1);
    }
}

/// What a single observation did to the tracking ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// The beacon id carried a foreign service tag; nothing changed.
    ServiceMismatch { service_id: u32 },
    /// A new ephemeral id took `slot`, evicting whatever was tracked there.
    New {
        slot: usize,
        evicted: Option<TrackedEncounter>,
    },
    /// A tracked id was seen again.
    Match {
        slot: usize,
        dongle_time_duration: u32,
    },
}

/// One candidate handed to the log by [`EncounterTracker::flush_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Promotion {
    pub tracker_slot: usize,
    /// Log slot the record was written to.
    pub log_slot: LogIndex,
    pub record: EncounterRecord,
    /// `false` when the log reported a storage failure for this append.
    pub stored: bool,
    /// Log tail before the append; evicted records start here.
    pub evicted_from: LogIndex,
    /// The log was full and its oldest record was discarded.
    pub forced_deletion: bool,
    /// Live records dropped because their page was erased for this append.
    pub erase_evictions: u32,
}

impl Promotion {
    /// Records the append pushed out of the log, all contiguous from
    /// [`Self::evicted_from`].
    #[must_use]
    pub fn evicted(&self) -> u32 {
        u32::from(self.forced_deletion) + self.erase_evictions
    }
}

/// Result of one commit sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub promoted: Vec<Promotion>,
    /// Candidates dropped for falling short of `min_encounter_duration`.
    pub too_short: u32,
}

impl FlushReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.promoted.is_empty() && self.too_short == 0
    }
}

/// Fixed-size ring of ephemeral ids currently in view.
///
/// Slots are allocated in insertion order: a new id always takes the slot
/// after the last one allocated, evicting whatever was there.
#[derive(Debug, Clone)]
pub struct EncounterTracker {
    config: TrackerConfig,
    slots: Vec<Option<TrackedEncounter>>,
    next_slot: usize,
}

impl EncounterTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            slots: vec![None; config.max_tracked],
            next_slot: 0,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Fold one beacon sighting into the ring.
    pub fn on_observation(
        &mut self,
        beacon_id: BeaconId,
        location_id: LocationId,
        eph_id: EphId,
        beacon_time: BeaconTimer,
        rssi: i8,
        now: DongleTimer,
    ) -> ObservationOutcome {
        if !beacon_id.is_pancast() {
            debug!(
                beacon_id = beacon_id.0,
                service_id = beacon_id.service_id(),
                "broadcast service id mismatch"
            );
            return ObservationOutcome::ServiceMismatch {
                service_id: beacon_id.service_id(),
            };
        }

        let found = self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|tracked| tracked.record.eph_id.same_id(&eph_id))
        });
        if let Some(slot) = found {
            if let Some(tracked) = self.slots[slot].as_mut() {
                tracked.observe(beacon_time, rssi, now);
                let dongle_time_duration = tracked.record.dongle_time_duration;
                debug!(
                    slot,
                    beacon_id = beacon_id.0,
                    beacon_time,
                    dongle_time_duration,
                    "tracked ephemeral id observed again"
                );
                return ObservationOutcome::Match {
                    slot,
                    dongle_time_duration,
                };
            }
        }

        let slot = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.slots.len();
        let evicted = self.slots[slot].replace(TrackedEncounter::seed(
            beacon_id,
            location_id,
            eph_id,
            beacon_time,
            rssi,
            now,
        ));
        if let Some(old) = &evicted {
            warn!(
                slot,
                evicted_beacon = old.record.beacon_id.0,
                evicted_start = old.record.dongle_time_start,
                "tracking ring full, uncommitted encounter dropped"
            );
        }
        debug!(slot, beacon_id = beacon_id.0, beacon_time, ?eph_id, "new ephemeral id tracked");
        ObservationOutcome::New { slot, evicted }
    }

    /// Commit every slot tracked for more than `log_min_wait` units.
    ///
    /// Storage failures are reported per promotion and do not stop the
    /// sweep; the log has already advanced past the failed slot.
    pub fn flush_expired<F, C>(&mut self, now: DongleTimer, log: &mut LogStore<F, C>) -> FlushReport
    where
        F: FlashDevice,
        C: CounterStore,
    {
        let mut report = FlushReport::default();
        for (tracker_slot, entry) in self.slots.iter_mut().enumerate() {
            let Some(tracked) = entry else { continue };
            let waited = now.saturating_sub(tracked.record.dongle_time_start);
            if waited <= self.config.log_min_wait {
                continue;
            }
            let record = tracked.record;
            *entry = None;
            if record.dongle_time_duration < self.config.min_encounter_duration {
                debug!(
                    tracker_slot,
                    duration = record.dongle_time_duration,
                    min = self.config.min_encounter_duration,
                    "encounter too short, discarded"
                );
                report.too_short += 1;
                continue;
            }
            let log_slot = log.head();
            let evicted_from = log.tail();
            let count_before = log.count();
            let appended_before = log.total_appended();
            let (stored, forced_deletion, erase_evictions) = match log.append(&record, now) {
                Ok(outcome) => (true, outcome.forced_deletion, outcome.erase_evictions),
                Err(err) => {
                    warn!(tracker_slot, log_slot = log_slot.get(), error = %err, "encounter append failed");
                    // The cursor moves even when the medium fails.
                    let pushed = u32::from(log.total_appended() != appended_before);
                    let dropped = (count_before + pushed).saturating_sub(log.count());
                    let forced =
                        dropped > 0 && count_before == log.layout().capacity().get();
                    (false, forced, dropped - u32::from(forced))
                }
            };
            info!(
                tracker_slot,
                log_slot = log_slot.get(),
                beacon_id = record.beacon_id.0,
                location_id = record.location_id,
                dongle_time_start = record.dongle_time_start,
                dongle_time_duration = record.dongle_time_duration,
                rssi = record.rssi,
                "encounter committed"
            );
            report.promoted.push(Promotion {
                tracker_slot,
                log_slot,
                record,
                stored,
                evicted_from,
                forced_deletion,
                erase_evictions,
            });
        }
        report
    }

    /// Occupied slot contents.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&TrackedEncounter> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
