//! Headless power-cycle simulator for the skyvault station core.
//!
//! Runs the station cycles against synthetic sensors on a simulated clock,
//! cuts the power at random points and reboots from the persisted store
//! image, logging what the restore recovered.
//!
//! State is kept in a directory (default `skyvault-state`, override with
//! `SKYVAULT_STATE_DIR`) so consecutive invocations continue the same history:
//!
//! | File          | Content                                  |
//! |---------------|------------------------------------------|
//! | `store.bin`   | Raw image of the non-volatile store      |
//! | `config.bin`  | Station configuration (postcard)         |
//! | `clock.txt`   | Simulated Unix time at the last shutdown |
//!
//! Usage: `skyvault-simulator [power-cycles] [seed]`

use std::fs;
use std::path::{Path, PathBuf};

use embassy_futures::block_on;
use log::{error, info, warn};

use skyvault_core::app_state::{Station, StationError};
use skyvault_core::config::{DEFAULT_CAPACITY, StationConfig};
use skyvault_core::sensors::{IndoorReadings, IndoorSensors, OUTDOOR_PACKET_LEN, SensorError};
use skyvault_core::storage::{FinalizeOutcome, MemoryStore, Quantity};
use skyvault_core::tasks::{
    append_cycle, emergency_cycle, on_power_lost, outdoor_cycle, poll_cycle, snapshot_cycle,
};
use skyvault_core::time::DateTime;

/// Size of the simulated EEPROM [bytes].
const STORE_LEN: usize = 32 * 1024;

/// Simulated time of the very first boot: 2024-06-21 00:00 UTC.
const FIRST_BOOT_EPOCH: u32 = 1_718_928_000;

const DEFAULT_POWER_CYCLES: u32 = 5;
const DEFAULT_SEED: u64 = 0x5EED_CAFE;

/// Longest simulated uptime between two outages [minutes].
const MAX_UPTIME_MINUTES: u32 = 36 * 60;

/// Longest simulated outage [minutes].
const MAX_OUTAGE_MINUTES: u32 = 3 * 60;

/// Chance that an indoor read fails, in percent.
const INDOOR_FAILURE_PCT: u64 = 2;

/// Chance that an outdoor payload is lost, in percent.
const OUTDOOR_LOSS_PCT: u64 = 10;

type SimStation = Station<MemoryStore, DEFAULT_CAPACITY>;

// ---------------------------------------------------------------------------
// Synthetic environment
// ---------------------------------------------------------------------------

/// Linear congruential generator; deterministic per seed.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound.max(1)
    }

    /// Uniform noise in `[-amplitude, amplitude]`.
    fn noise(&mut self, amplitude: f32) -> f32 {
        let unit = self.below(2001) as f32 / 1000.0 - 1.0;
        unit * amplitude
    }

    fn chance(&mut self, pct: u64) -> bool {
        self.below(100) < pct
    }
}

/// Daily weather cycle sampled at a Unix time.
struct Weather<'a> {
    rng: &'a mut Lcg,
    epoch: u32,
}

impl Weather<'_> {
    fn day_phase(&self) -> f32 {
        let seconds = (self.epoch % 86_400) as f32;
        (seconds / 86_400.0) * core::f32::consts::TAU
    }

    fn outdoor_packet(&mut self) -> [u8; OUTDOOR_PACKET_LEN] {
        let phase = self.day_phase();
        // slow pressure swing over several days
        let days = self.epoch as f32 / 86_400.0;
        let temperature = 14.0 - 6.0 * phase.cos() + self.rng.noise(0.3);
        let humidity = (70.0 + 15.0 * phase.cos() + self.rng.noise(2.0)).clamp(0.0, 100.0);
        let pascals = 101_000.0 + 900.0 * (days / 3.0).sin() + self.rng.noise(20.0);

        let mut packet = [0u8; OUTDOOR_PACKET_LEN];
        packet[0..4].copy_from_slice(&temperature.to_le_bytes());
        packet[4..8].copy_from_slice(&humidity.to_le_bytes());
        packet[8..12].copy_from_slice(&pascals.to_le_bytes());
        packet
    }
}

impl IndoorSensors for Weather<'_> {
    async fn read(&mut self) -> Result<IndoorReadings, SensorError> {
        if self.rng.chance(INDOOR_FAILURE_PCT) {
            return Err(SensorError::Timeout { sensor: "SCD41" });
        }
        let phase = self.day_phase();
        Ok(IndoorReadings {
            temperature_c: 22.0 + 1.5 * (phase - 1.0).sin() + self.rng.noise(0.1),
            humidity_pct: 45.0 + 5.0 * phase.sin() + self.rng.noise(1.0),
            co2_ppm: (650.0 + 250.0 * (phase + 0.5).sin() + self.rng.noise(30.0)) as u16,
        })
    }
}

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

struct StateDir {
    root: PathBuf,
}

impl StateDir {
    fn open() -> std::io::Result<Self> {
        let root = std::env::var_os("SKYVAULT_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("skyvault-state"));
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn load_config(&self) -> StationConfig {
        let path = self.path("config.bin");
        match fs::read(&path) {
            Ok(bytes) => match StationConfig::from_postcard(&bytes) {
                Ok(config) => return config,
                Err(e) => warn!("Ignoring {}: {e}", path.display()),
            },
            Err(_) => info!("No saved configuration, using defaults"),
        }
        StationConfig::default()
    }

    fn save_config(&self, config: &StationConfig) {
        match config.to_postcard() {
            Ok(bytes) => write_or_warn(&self.path("config.bin"), &bytes),
            Err(e) => warn!("Configuration not saved: {e}"),
        }
    }

    fn load_store(&self) -> MemoryStore {
        match fs::read(self.path("store.bin")) {
            Ok(bytes) if bytes.len() == STORE_LEN => MemoryStore::from_image(bytes),
            Ok(bytes) => {
                warn!("Store image has {} bytes, expected {STORE_LEN}; erasing", bytes.len());
                MemoryStore::new(STORE_LEN)
            }
            Err(_) => {
                info!("No store image, starting with an erased store");
                MemoryStore::new(STORE_LEN)
            }
        }
    }

    fn save_store(&self, store: &MemoryStore) {
        write_or_warn(&self.path("store.bin"), store.image());
    }

    fn load_clock(&self) -> u32 {
        fs::read_to_string(self.path("clock.txt"))
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(FIRST_BOOT_EPOCH)
    }

    fn save_clock(&self, epoch: u32) {
        write_or_warn(&self.path("clock.txt"), epoch.to_string().as_bytes());
    }
}

fn write_or_warn(path: &Path, bytes: &[u8]) {
    if let Err(e) = fs::write(path, bytes) {
        warn!("Failed to write {}: {e}", path.display());
    }
}

// ---------------------------------------------------------------------------
// Power cycles
// ---------------------------------------------------------------------------

/// Boot the station from `store`, run it for `uptime_minutes`, then cut the
/// power. Returns the store as left by the emergency backup and the time of
/// the outage.
fn run_session(
    store: MemoryStore,
    config: &StationConfig,
    boot_epoch: u32,
    uptime_minutes: u32,
    rng: &mut Lcg,
) -> Result<(MemoryStore, u32), StationError> {
    let station: SimStation = Station::new(store, config.clone(), 0)?;
    let boot_time = DateTime::from_unix(boot_epoch);

    match block_on(station.boot(&boot_time))? {
        Some(report) => info!(
            "Restored after {} min off, {} samples padded, heads {:?}",
            report.elapsed_minutes, report.missing, report.head_counts
        ),
        None => info!("Cold start, vaults empty"),
    }
    log_vaults(&station);

    let poll_s = config.periods.poll_ms / 1_000;
    let append_s = config.periods.append_ms / 1_000;
    let store_s = config.periods.store_ms / 1_000;
    let uptime_s = uptime_minutes * 60;

    let mut elapsed_s = 0;
    while elapsed_s < uptime_s {
        elapsed_s += poll_s;
        let epoch = boot_epoch + elapsed_s;
        let now = DateTime::from_unix(epoch);
        let now_ms = u64::from(elapsed_s) * 1_000;

        let mut weather = Weather { rng: &mut *rng, epoch };
        if let Err(e) = block_on(poll_cycle(&station, &mut weather)) {
            warn!("{:02}:{:02} indoor poll failed: {e}", now.hour, now.minute);
        }
        if !weather.rng.chance(OUTDOOR_LOSS_PCT) {
            let packet = weather.outdoor_packet();
            if let Err(e) = block_on(outdoor_cycle(&station, packet, now_ms)) {
                warn!("{:02}:{:02} outdoor payload rejected: {e}", now.hour, now.minute);
            }
        }

        if elapsed_s % append_s == 0 {
            block_on(append_cycle(&station, &now));
        }
        if elapsed_s % store_s == 0 {
            if let Err(e) = block_on(snapshot_cycle(&station, &now)) {
                warn!("Snapshot failed: {e}");
            }
        }
    }

    let outage_epoch = boot_epoch + uptime_s;
    on_power_lost(&station);
    let outcome = block_on(emergency_cycle(&station, &DateTime::from_unix(outage_epoch)));
    match &outcome {
        Ok(FinalizeOutcome::Incremental { samples }) => {
            info!("Emergency backup appended {samples} samples")
        }
        Ok(other) => info!("Emergency backup: {other:?}"),
        Err(e) => error!("Emergency backup failed: {e}"),
    }
    log_vaults(&station);

    let store = station.vault_lock.into_inner().backup.into_store();
    outcome.map(|_| (store, outage_epoch))
}

fn log_vaults(station: &SimStation) {
    let Ok(bank) = station.vault_lock.try_lock() else {
        return;
    };
    for quantity in Quantity::ALL {
        let series = bank.set.series(quantity);
        let last = series.len().checked_sub(1);
        let value = last.and_then(|i| series.format_at(i, quantity.forced_round()));
        let stamp = last.and_then(|i| series.format_time_at(i));
        info!(
            "  {:<22} {:>5} samples, last {} {} at {}",
            quantity.label(),
            series.len(),
            value.as_deref().unwrap_or("-"),
            quantity.unit(),
            stamp.as_deref().unwrap_or("-")
        );
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let cycles = args
        .next()
        .and_then(|a| a.parse().ok())
        .unwrap_or(DEFAULT_POWER_CYCLES);
    let seed = args.next().and_then(|a| a.parse().ok()).unwrap_or(DEFAULT_SEED);

    let dir = match StateDir::open() {
        Ok(dir) => dir,
        Err(e) => {
            error!("Cannot open state directory: {e}");
            std::process::exit(1);
        }
    };

    let config = dir.load_config();
    dir.save_config(&config);
    let mut store = dir.load_store();
    let mut epoch = dir.load_clock();
    let mut rng = Lcg(seed);

    let start = DateTime::from_unix(epoch);
    info!(
        "Simulating {cycles} power cycles from {}-{:02}-{:02} {:02}:{:02}",
        start.year, start.month, start.day, start.hour, start.minute
    );

    for cycle in 1..=cycles {
        let outage = rng.below(u64::from(MAX_OUTAGE_MINUTES)) as u32;
        let uptime = 60 + rng.below(u64::from(MAX_UPTIME_MINUTES)) as u32;
        epoch += outage * 60;
        info!("=== Power cycle {cycle}: boot after {outage} min off, {uptime} min up ===");

        match run_session(store.clone(), &config, epoch, uptime, &mut rng) {
            Ok((next, outage_epoch)) => {
                store = next;
                epoch = outage_epoch;
            }
            Err(e) => {
                error!("Power cycle {cycle} failed: {e}");
                break;
            }
        }
        dir.save_store(&store);
        dir.save_clock(epoch);
    }
}
