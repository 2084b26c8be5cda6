//! Structured telemetry schema for the dongle.
//!
//! The first six event kinds carry the device's numeric telemetry codes
//! (`0x00`..`0x05`) so a host can correlate them with captured serial
//! output. The remaining kinds cover log and download lifecycle.
//!
//! # Conformance rules
//!
//! 1. Every [`DongleTelemetryEvent`] variant carries the dongle clock value.
//! 2. All events implement `serde::Serialize` for JSON export.
//! 3. Observers MUST NOT block or perform I/O.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Telemetry event schema
// ---------------------------------------------------------------------------

/// Structured telemetry event emitted by the dongle core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DongleTelemetryEvent {
    /// Device context (re)started.
    Restart { dongle_time: u32, epoch: u32 },

    /// A legacy advertisement of broadcast size was scanned.
    ScanResult { dongle_time: u32, rssi: i8 },

    /// A broadcast carried a foreign service tag and was ignored.
    BroadcastIdMismatch {
        dongle_time: u32,
        beacon_id: u32,
        service_id: u32,
    },

    /// A previously unseen ephemeral id started being tracked.
    TrackNew {
        dongle_time: u32,
        beacon_id: u32,
        slot: usize,
    },

    /// A tracked ephemeral id was observed again.
    TrackMatch {
        dongle_time: u32,
        beacon_id: u32,
        slot: usize,
        dongle_time_duration: u32,
    },

    /// A tracked encounter was committed to the log.
    Encounter {
        dongle_time: u32,
        beacon_id: u32,
        location_id: u64,
        dongle_time_duration: u32,
        rssi: i8,
    },

    /// Records were dropped from the log tail.
    LogEvicted {
        dongle_time: u32,
        reason: &'static str,
        records: u32,
    },

    /// A flash operation failed; the cursor still advanced.
    FlashFailure {
        dongle_time: u32,
        op: &'static str,
        addr: u32,
    },

    /// A risk-filter download session started.
    DownloadStarted { dongle_time: u32, chunk_id: u32 },

    /// A download session ended in failure.
    DownloadFailed {
        dongle_time: u32,
        chunk_id: u32,
        reason: &'static str,
        received_bytes: u32,
    },

    /// A download completed and the log was checked against the filter.
    DownloadComplete {
        dongle_time: u32,
        chunk_id: u32,
        received_bytes: u32,
        match_count: u32,
    },
}

impl DongleTelemetryEvent {
    /// Dongle clock value carried by any event variant.
    #[must_use]
    pub fn dongle_time(&self) -> u32 {
        match self {
            Self::Restart { dongle_time, .. }
            | Self::ScanResult { dongle_time, .. }
            | Self::BroadcastIdMismatch { dongle_time, .. }
            | Self::TrackNew { dongle_time, .. }
            | Self::TrackMatch { dongle_time, .. }
            | Self::Encounter { dongle_time, .. }
            | Self::LogEvicted { dongle_time, .. }
            | Self::FlashFailure { dongle_time, .. }
            | Self::DownloadStarted { dongle_time, .. }
            | Self::DownloadFailed { dongle_time, .. }
            | Self::DownloadComplete { dongle_time, .. } => *dongle_time,
        }
    }

    /// Short classification label for this event kind.
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Restart { .. } => "restart",
            Self::ScanResult { .. } => "scan_result",
            Self::BroadcastIdMismatch { .. } => "broadcast_id_mismatch",
            Self::TrackNew { .. } => "track_new",
            Self::TrackMatch { .. } => "track_match",
            Self::Encounter { .. } => "encounter",
            Self::LogEvicted { .. } => "log_evicted",
            Self::FlashFailure { .. } => "flash_failure",
            Self::DownloadStarted { .. } => "download_started",
            Self::DownloadFailed { .. } => "download_failed",
            Self::DownloadComplete { .. } => "download_complete",
        }
    }

    /// Device telemetry code, for the kinds the firmware reports on its
    /// serial line.
    #[must_use]
    pub fn device_code(&self) -> Option<u8> {
        match self {
            Self::Restart { .. } => Some(0x00),
            Self::ScanResult { .. } => Some(0x01),
            Self::BroadcastIdMismatch { .. } => Some(0x02),
            Self::TrackNew { .. } => Some(0x03),
            Self::TrackMatch { .. } => Some(0x04),
            Self::Encounter { .. } => Some(0x05),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Observer trait
// ---------------------------------------------------------------------------

/// Receiver for structured telemetry events.
///
/// Implementations MUST NOT block or perform I/O.
pub trait TelemetryObserver: Send + Sync {
    fn on_event(&self, event: &DongleTelemetryEvent);
}

/// Observer that discards everything.
pub struct NoOpObserver;

impl TelemetryObserver for NoOpObserver {
    #[inline(always)]
    fn on_event(&self, _event: &DongleTelemetryEvent) {}
}

/// Ring-buffer observer that keeps the last N events.
pub struct TelemetryRingBuffer {
    events: parking_lot::Mutex<RingBufferInner>,
}

struct RingBufferInner {
    buf: Vec<DongleTelemetryEvent>,
    capacity: usize,
    write_pos: usize,
    count: usize,
}

impl TelemetryRingBuffer {
    /// Create a ring buffer holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: parking_lot::Mutex::new(RingBufferInner {
                buf: Vec::with_capacity(capacity),
                capacity,
                write_pos: 0,
                count: 0,
            }),
        }
    }

    /// The most recent events (up to capacity) in chronological order.
    #[must_use]
    pub fn drain(&self) -> Vec<DongleTelemetryEvent> {
        let inner = self.events.lock();
        let n = inner.count.min(inner.capacity);
        let start = if inner.count >= inner.capacity {
            inner.write_pos
        } else {
            0
        };
        (0..n)
            .map(|i| inner.buf[(start + i) % inner.capacity].clone())
            .collect()
    }

    /// Events observed over the buffer's lifetime, including overwritten ones.
    #[must_use]
    pub fn total_observed(&self) -> usize {
        self.events.lock().count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.events.lock();
        inner.count.min(inner.capacity)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetryObserver for TelemetryRingBuffer {
    fn on_event(&self, event: &DongleTelemetryEvent) {
        let mut inner = self.events.lock();
        let pos = inner.write_pos;
        if inner.buf.len() < inner.capacity {
            inner.buf.push(event.clone());
        } else {
            inner.buf[pos] = event.clone();
        }
        inner.write_pos = (pos + 1) % inner.capacity;
        inner.count += 1;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ── Helper: one event per variant ──

    fn all_event_variants() -> Vec<DongleTelemetryEvent> {
        vec![
            DongleTelemetryEvent::Restart {
                dongle_time: 1,
                epoch: 0,
            },
            DongleTelemetryEvent::ScanResult {
                dongle_time: 2,
                rssi: -70,
            },
            DongleTelemetryEvent::BroadcastIdMismatch {
                dongle_time: 3,
                beacon_id: 0x1111_0001,
                service_id: 0x1111,
            },
            DongleTelemetryEvent::TrackNew {
                dongle_time: 4,
                beacon_id: 0x2222_0001,
                slot: 0,
            },
            DongleTelemetryEvent::TrackMatch {
                dongle_time: 5,
                beacon_id: 0x2222_0001,
                slot: 0,
                dongle_time_duration: 1,
            },
            DongleTelemetryEvent::Encounter {
                dongle_time: 6,
                beacon_id: 0x2222_0001,
                location_id: 9,
                dongle_time_duration: 2,
                rssi: -65,
            },
            DongleTelemetryEvent::LogEvicted {
                dongle_time: 7,
                reason: "age",
                records: 2,
            },
            DongleTelemetryEvent::FlashFailure {
                dongle_time: 8,
                op: "write",
                addr: 0x2e800,
            },
            DongleTelemetryEvent::DownloadStarted {
                dongle_time: 9,
                chunk_id: 1,
            },
            DongleTelemetryEvent::DownloadFailed {
                dongle_time: 10,
                chunk_id: 1,
                reason: "switch_chunk",
                received_bytes: 702,
            },
            DongleTelemetryEvent::DownloadComplete {
                dongle_time: 11,
                chunk_id: 2,
                received_bytes: 1736,
                match_count: 1,
            },
        ]
    }

    // ── Rule 1: every variant carries the clock ──

    #[test]
    fn conformance_every_variant_has_dongle_time() {
        let mut prev = 0;
        for event in all_event_variants() {
            assert!(
                event.dongle_time() > prev,
                "case=monotonic kind={}",
                event.kind_str()
            );
            prev = event.dongle_time();
        }
    }

    // ── Rule 2: all events serialize to JSON ──

    #[test]
    fn conformance_all_events_serialize_to_json() {
        for event in all_event_variants() {
            let json = serde_json::to_string(&event)
                .unwrap_or_else(|e| panic!("failed to serialize {}: {e}", event.kind_str()));
            let _: serde_json::Value = serde_json::from_str(&json)
                .unwrap_or_else(|e| panic!("JSON not parseable for {}: {e}", event.kind_str()));
        }
    }

    #[test]
    fn conformance_kind_str_unique_per_variant() {
        let kinds: Vec<&str> = all_event_variants().iter().map(|e| e.kind_str()).collect();
        let mut sorted = kinds.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(kinds.len(), sorted.len(), "kind_str must be unique per variant");
    }

    #[test]
    fn test_device_codes_cover_first_six_kinds() {
        let codes: Vec<u8> = all_event_variants()
            .iter()
            .filter_map(DongleTelemetryEvent::device_code)
            .collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ring_buffer_keeps_latest_in_order() {
        let ring = TelemetryRingBuffer::new(3);
        assert!(ring.is_empty());
        for event in all_event_variants().iter().take(5) {
            ring.on_event(event);
        }
        let drained = ring.drain();
        let times: Vec<u32> = drained.iter().map(DongleTelemetryEvent::dongle_time).collect();
        assert_eq!(times, vec![3, 4, 5], "case=wrapped_order");
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.total_observed(), 5);
    }

    #[test]
    fn test_ring_buffer_partial_fill() {
        let ring = TelemetryRingBuffer::new(8);
        for event in all_event_variants().iter().take(2) {
            ring.on_event(event);
        }
        assert_eq!(ring.drain().len(), 2);
    }

    #[test]
    fn test_noop_observer_accepts_events() {
        let observer = NoOpObserver;
        for event in all_event_variants() {
            observer.on_event(&event);
        }
    }
}
