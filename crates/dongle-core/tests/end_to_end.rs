//! Scan, commit, download and report through the public context API.

use std::sync::Arc;

use dongle_core::{Dongle, DongleConfig, DownloadOutcome};
use dongle_download::{CuckooFilterBuilder, FailReason};
use dongle_flash::{FlashGeometry, MemCounterStore, MemFlash};
use dongle_observability::{DongleTelemetryEvent, TelemetryRingBuffer};
use dongle_types::{
    BeaconBroadcast, BeaconId, EphId, MAX_PAYLOAD_SIZE, PacketHeader, encode_advertisement,
};

const CONFIG: &str = r#"
dongle_id = 314
t_init = 1000
log_min_wait = 2
max_log_age = 30
report_interval = 25
epoch_length = 5

[log]
flash_offset = 0
reserved_bytes = 512
record_format = "full"
"#;

fn open(ring: &Arc<TelemetryRingBuffer>) -> Dongle<MemFlash, MemCounterStore> {
    let config = DongleConfig::from_toml_str(CONFIG).expect("case=config should parse");
    let geometry = FlashGeometry {
        base: 0,
        size: 0x1000,
        page_size: 4,
        write_block_size: 4,
    };
    Dongle::open_with_observer(
        config,
        MemFlash::new(geometry).expect("case=geometry"),
        MemCounterStore::new(),
        ring.clone(),
    )
    .expect("case=open")
}

fn eph(n: u8) -> EphId {
    EphId::from_hash(&[n; 14])
}

fn advertisement(n: u8, beacon_time: u32) -> [u8; 31] {
    encode_advertisement(&BeaconBroadcast {
        beacon_time,
        beacon_id: BeaconId::pancast(u16::from(n)),
        location_id: 0xAB00 + u64::from(n),
        eph_id: eph(n),
    })
}

fn filter_packets(ids: &[u8], chunk_id: u32) -> Vec<Vec<u8>> {
    let mut builder = CuckooFilterBuilder::device().expect("case=builder");
    for &n in ids {
        builder.insert(eph(n).hash()).expect("case=insert");
    }
    let filter = builder.encode();
    filter
        .chunks(MAX_PAYLOAD_SIZE)
        .enumerate()
        .map(|(seq, payload)| {
            PacketHeader {
                seq: seq as u32,
                chunk_id,
                chunk_len: filter.len() as u64,
            }
            .encode_packet(payload)
        })
        .collect()
}

#[test]
fn exposure_is_flagged_after_download() {
    let ring = Arc::new(TelemetryRingBuffer::new(256));
    let mut dongle = open(&ring);

    // Beacons 1..=3 seen for two units each, then out of range.
    for t in 0..2 {
        for n in 1..=3 {
            dongle.on_scan(&advertisement(n, 50 + t), -60 - n as i8);
        }
        dongle.tick().expect("case=tick");
    }
    for _ in 0..2 {
        dongle.tick().expect("case=tick");
    }
    assert_eq!(dongle.log().count(), 3, "case=three_committed");
    let first = dongle.log().load(0).expect("case=load");
    assert_eq!(first.dongle_time_start, 1000);
    assert_eq!(first.dongle_time_duration, 1);
    assert_eq!(first.beacon_time_duration, 2);

    let mut notices = Vec::new();
    for packet in filter_packets(&[2], 8) {
        notices.extend(dongle.on_periodic_data(&packet, -75).expect("case=periodic"));
    }
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].outcome,
        DownloadOutcome::Complete {
            match_count: 1,
            received_bytes: 1736,
        }
    );
    let matched = dongle.log().slot_for(1).expect("case=slot");
    assert!(dongle.bitmap().is_set(matched), "case=beacon_two_flagged");
    assert_eq!(dongle.bitmap().count(), 1);

    let events = ring.drain();
    let encounters = events
        .iter()
        .filter(|e| matches!(e, DongleTelemetryEvent::Encounter { .. }))
        .count();
    assert_eq!(encounters, 3);
    assert!(matches!(events[0], DongleTelemetryEvent::Restart { dongle_time: 1000, epoch: 0 }));
    assert!(matches!(
        events.last(),
        Some(DongleTelemetryEvent::DownloadComplete { match_count: 1, .. })
    ));
}

#[test]
fn aged_records_leave_the_log_and_the_bitmap() {
    let ring = Arc::new(TelemetryRingBuffer::new(256));
    let mut dongle = open(&ring);
    dongle.on_scan(&advertisement(4, 0), -60);
    for _ in 0..3 {
        dongle.tick().expect("case=tick");
    }
    for packet in filter_packets(&[4], 1) {
        dongle.on_periodic_data(&packet, -70).expect("case=periodic");
    }
    assert_eq!(dongle.bitmap().count(), 1);

    let mut aged = 0;
    for _ in 0..40 {
        aged += dongle.tick().expect("case=tick").aged_out;
    }
    assert_eq!(aged, 1);
    assert_eq!(dongle.log().count(), 0);
    assert_eq!(dongle.bitmap().count(), 0, "case=bit_cleared_with_record");
}

#[test]
fn chunk_switch_surfaces_a_failure_notice() {
    let ring = Arc::new(TelemetryRingBuffer::new(64));
    let mut dongle = open(&ring);
    let first = filter_packets(&[1], 1);
    let second = filter_packets(&[1], 2);
    dongle.on_periodic_data(&first[0], -70).expect("case=first");
    let notices = dongle.on_periodic_data(&second[0], -70).expect("case=switch");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].chunk_id, 1);
    assert!(matches!(
        notices[0].outcome,
        DownloadOutcome::Failed {
            reason: FailReason::SwitchChunk,
            received_bytes: 234,
        }
    ));
    assert_eq!(notices[0].match_count(), None);
}

#[test]
fn periodic_report_serializes_to_json() {
    let ring = Arc::new(TelemetryRingBuffer::new(16));
    let mut dongle = open(&ring);
    dongle.on_scan(&advertisement(7, 0), -61);
    let mut report = None;
    for _ in 0..25 {
        if let Some(r) = dongle.tick().expect("case=tick").report {
            report = Some(r);
        }
    }
    let report = report.expect("case=report_at_interval");
    assert_eq!(report.dongle_time, 1025);
    assert_eq!(report.epoch, 5);
    assert_eq!(report.log.count, 1);

    let json: serde_json::Value =
        serde_json::to_value(&report).expect("case=report should serialize");
    assert_eq!(json["dongle_id"], 314);
    assert_eq!(json["log"]["count"], 1);
    assert_eq!(json["log_metrics"]["appended_total"], 1);
    assert_eq!(json["scan"]["num_obs_ids"], 1);
    assert!(json["download"]["last_download_end_time"].is_null());
}
