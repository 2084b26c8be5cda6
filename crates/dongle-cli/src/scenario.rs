//! Seeded beacon and risk-broadcast scenario.

use dongle_core::{Dongle, DongleConfig, DongleReport, DownloadNotice, DownloadOutcome};
use dongle_download::CuckooFilterBuilder;
use dongle_error::{DongleError, Result};
use dongle_flash::{CounterStore, FlashDevice, FlashGeometry, MemFlash};
use dongle_types::{
    BEACON_EPH_ID_HASH_LEN, BeaconBroadcast, BeaconId, EphId, LocationId, MAX_PAYLOAD_SIZE,
    PacketHeader, encode_advertisement,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

/// 4 KiB pages, 32-bit program blocks.
const DEVICE_PAGE: u32 = 4096;
const DEVICE_WRITE_BLOCK: u32 = 4;
const RISK_CHUNK_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioParams {
    pub seed: u64,
    pub beacons: u8,
    /// Probability that a periodic packet is lost.
    pub loss: f64,
    /// Probability that a periodic packet is received twice.
    pub duplicate: f64,
    /// Ticks during which beacons come and go.
    pub window: u32,
    /// Broadcast rounds before giving up on the download.
    pub max_rounds: u32,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            seed: 0,
            beacons: 6,
            loss: 0.2,
            duplicate: 0.25,
            window: 40,
            max_rounds: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Beacon {
    id: BeaconId,
    location_id: LocationId,
    eph_id: EphId,
    arrive: u32,
    depart: u32,
    exposed: bool,
}

impl Beacon {
    fn present(&self, offset: u32) -> bool {
        (self.arrive..self.depart).contains(&offset)
    }
}

/// Printed result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SimOutput {
    pub seed: u64,
    /// Beacons whose ephemeral id was put in the risk filter.
    pub exposed: Vec<u32>,
    /// Distinct beacons among the logged encounters the dongle flagged.
    pub flagged: Vec<u32>,
    pub broadcast_rounds: u32,
    pub notices: Vec<DownloadNotice>,
    pub report: DongleReport,
}

/// A blank flash region large enough for the configured storage area.
pub fn device_flash(config: &DongleConfig) -> Result<MemFlash> {
    let needed = u64::from(config.log.flash_offset)
        + u64::from(DEVICE_PAGE)
        + u64::from(config.log.reserved_bytes);
    let size = needed.div_ceil(u64::from(DEVICE_PAGE)) * u64::from(DEVICE_PAGE);
    MemFlash::new(FlashGeometry {
        base: 0,
        size: u32::try_from(size)
            .map_err(|_| DongleError::out_of_range("simulated flash size", size))?,
        page_size: DEVICE_PAGE,
        write_block_size: DEVICE_WRITE_BLOCK,
    })
}

fn generate_beacons(rng: &mut StdRng, params: &ScenarioParams) -> Vec<Beacon> {
    let half = (params.window / 2).max(1);
    (0..params.beacons)
        .map(|n| {
            let mut hash = [0_u8; BEACON_EPH_ID_HASH_LEN];
            rng.fill(&mut hash[..]);
            let arrive = rng.gen_range(0..half);
            let stay = rng.gen_range(1..=half);
            Beacon {
                id: BeaconId::pancast(u16::from(n) + 1),
                location_id: rng.r#gen(),
                eph_id: EphId::from_hash(&hash),
                arrive,
                depart: arrive + stay,
                exposed: rng.gen_bool(0.5),
            }
        })
        .collect()
}

fn risk_packets(beacons: &[Beacon]) -> Result<Vec<Vec<u8>>> {
    let mut builder = CuckooFilterBuilder::device()?;
    for beacon in beacons.iter().filter(|b| b.exposed) {
        builder.insert(beacon.eph_id.hash())?;
    }
    let filter = builder.encode();
    Ok(filter
        .chunks(MAX_PAYLOAD_SIZE)
        .enumerate()
        .map(|(seq, payload)| {
            PacketHeader {
                seq: seq as u32,
                chunk_id: RISK_CHUNK_ID,
                chunk_len: filter.len() as u64,
            }
            .encode_packet(payload)
        })
        .collect())
}

/// Let the beacons come and go, wait for every candidate to commit, then
/// broadcast the risk filter until the dongle completes the download.
pub fn run<F, C>(dongle: &mut Dongle<F, C>, params: &ScenarioParams) -> Result<SimOutput>
where
    F: FlashDevice,
    C: CounterStore,
{
    let mut rng = StdRng::seed_from_u64(params.seed);
    let beacons = generate_beacons(&mut rng, params);
    info!(
        seed = params.seed,
        beacons = beacons.len(),
        window = params.window,
        "scenario started"
    );

    let settle = dongle.config().log_min_wait + 2;
    for offset in 0..params.window + settle {
        for beacon in beacons.iter().filter(|b| b.present(offset)) {
            let raw = encode_advertisement(&BeaconBroadcast {
                beacon_time: offset,
                beacon_id: beacon.id,
                location_id: beacon.location_id,
                eph_id: beacon.eph_id,
            });
            for _ in 0..rng.gen_range(1..=2) {
                dongle.on_scan(&raw, rng.gen_range(-90..=-40));
            }
        }
        dongle.tick()?;
    }

    let packets = risk_packets(&beacons)?;
    let mut notices = Vec::new();
    let mut rounds = 0;
    'rounds: while rounds < params.max_rounds {
        rounds += 1;
        for packet in &packets {
            let rssi = rng.gen_range(-95..=-60);
            if rng.gen_bool(params.loss) {
                dongle.on_periodic_data_error(rssi);
                continue;
            }
            let copies = if rng.gen_bool(params.duplicate) { 2 } else { 1 };
            for _ in 0..copies {
                let ended = dongle.on_periodic_data(packet, rssi)?;
                let complete = ended
                    .iter()
                    .any(|n| matches!(n.outcome, DownloadOutcome::Complete { .. }));
                notices.extend(ended);
                if complete {
                    break 'rounds;
                }
            }
        }
        if rng.gen_bool(0.1) {
            debug!(round = rounds, "simulated sync loss");
            dongle.on_sync_lost();
        }
    }

    let log = dongle.log();
    let mut flagged = Vec::new();
    for i in 0..log.count() {
        if dongle.bitmap().is_set(log.slot_for(i)?) {
            flagged.push(log.load(i)?.beacon_id.0);
        }
    }
    flagged.sort_unstable();
    flagged.dedup();

    Ok(SimOutput {
        seed: params.seed,
        exposed: beacons.iter().filter(|b| b.exposed).map(|b| b.id.0).collect(),
        flagged,
        broadcast_rounds: rounds,
        notices,
        report: dongle.report(),
    })
}
