//! Long-lived station tasks
//!
//! Each task is an endless loop around a cycle function. The cycles take the
//! current time as an argument so they run without a time driver in tests
//! and in the simulator; only the loops touch `embassy_time`.
//!
//! Every cycle except the emergency backup passes the suspension gate before
//! it takes a lock, so no new work starts after a power loss. A cycle that was
//! already queued on the vault lock may still get it before the emergency
//! task. An append then runs to the end; a snapshot stops at its next chunk
//! and finalize completes it.

use embassy_futures::join::join;
use embassy_time::{Duration, Instant, Ticker, Timer};
use embedded_hal::digital::Error as _;
use embedded_hal_async::digital::Wait;
use log::{debug, error, info, warn};

use crate::app_state::{Station, StationResult};
use crate::sensors::{
    ClockSync, Encoder, IndoorReadings, IndoorSensors, MotionSensor, OUTDOOR_PACKET_LEN,
    OutdoorLink, OutdoorReadings, RealTimeClock, SensorError,
};
use crate::storage::{BackupError, FinalizeOutcome, NvStore};
use crate::time::{DateTime, decode_epoch};
use crate::ui::{MinuteChange, Renderer, Screen, UiCommand};

/// Pause before watching the power-good pin again after a pin error [ms].
const PIN_RETRY_MS: u64 = 100;

/// Renderer plus what the frame loop last applied to it.
pub struct Frame<R: Renderer> {
    renderer: R,
    backlight: Option<bool>,
}

impl<R: Renderer> Frame<R> {
    pub const fn new(renderer: R) -> Self {
        Self {
            renderer,
            backlight: None,
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }
}

/// Park every other task and wake the emergency task.
pub fn on_power_lost<S: NvStore, const N: usize>(station: &Station<S, N>) {
    warn!("Power lost, suspending tasks");
    station.gate.suspend();
    station.power_loss.signal(());
}

/// Watch the power-good pin. On a drop, suspend the station and wait until
/// power is back and the emergency backup is done before resuming.
pub async fn power_monitor<S: NvStore, const N: usize, P: Wait>(station: &Station<S, N>, power_good: &mut P) -> ! {
    loop {
        if let Err(e) = power_good.wait_for_low().await {
            warn!("Power-good pin failed: {:?}", e.kind());
            Timer::after_millis(PIN_RETRY_MS).await;
            continue;
        }
        on_power_lost(station);

        let (pin, finalized) = join(power_good.wait_for_high(), station.finalized.wait()).await;
        if let Err(e) = pin {
            warn!("Power-good pin failed while waiting for power: {:?}", e.kind());
        }
        match finalized {
            Ok(outcome) => info!("Power back after {:?} finalize, resuming tasks", outcome),
            Err(e) => error!("Power back, emergency backup had failed: {e}"),
        }
        station.gate.resume();
    }
}

/// Bring the backup up to date. Skips the gate: every other task is parked
/// on it by now.
pub async fn emergency_cycle<S: NvStore, const N: usize>(
    station: &Station<S, N>,
    now: &DateTime,
) -> StationResult<FinalizeOutcome> {
    let mut guard = station.vault_lock.lock().await;
    let bank = &mut *guard;
    Ok(bank.backup.finalize_backup(&bank.set, now).await?)
}

pub async fn emergency_backup<S: NvStore, const N: usize, C: RealTimeClock>(station: &Station<S, N>, rtc: &C) -> ! {
    loop {
        station.power_loss.wait().await;
        let result = match rtc.now().await {
            Ok(now) => emergency_cycle(station, &now).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &result {
            error!("Emergency backup failed: {e}");
        }
        station.finalized.signal(result);
    }
}

pub async fn snapshot_cycle<S: NvStore, const N: usize>(station: &Station<S, N>, now: &DateTime) -> Result<(), BackupError> {
    let mut bank = station.lock_vaults().await;
    bank.snapshot_until_suspended(now, &station.gate).await
}

pub async fn periodic_backup<S: NvStore, const N: usize, C: RealTimeClock>(station: &Station<S, N>, rtc: &C) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(station.config.periods.store_ms)));
    loop {
        ticker.next().await;
        match rtc.now().await {
            Ok(now) => {
                if let Err(e) = snapshot_cycle(station, &now).await {
                    warn!("Periodic snapshot failed: {e}");
                }
            }
            Err(e) => warn!("Snapshot skipped, clock unreadable: {e}"),
        }
    }
}

/// Append one sample to every vault and refresh the weather rating while
/// the main screen is shown. Returns how many vaults grew.
pub async fn append_cycle<S: NvStore, const N: usize>(station: &Station<S, N>, now: &DateTime) -> usize {
    let (mut bank, mut state) = station.lock_both().await;
    let appended = bank.set.append_all(now.timestamp());
    if state.screen == Screen::Main {
        let rating = bank.set.weather_rating(&station.config.trend);
        state.set_weather_rating(rating);
    }
    debug!("Appended to {appended} vaults, {} samples held", bank.set.head_count());
    appended
}

pub async fn data_append<S: NvStore, const N: usize, C: RealTimeClock>(station: &Station<S, N>, rtc: &C) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(station.config.periods.append_ms)));
    loop {
        ticker.next().await;
        match rtc.now().await {
            Ok(now) => {
                append_cycle(station, &now).await;
            }
            Err(e) => warn!("Append skipped, clock unreadable: {e}"),
        }
    }
}

/// Read the indoor sensors outside any lock, then feed the averages and the
/// indicators.
pub async fn poll_cycle<S: NvStore, const N: usize, I: IndoorSensors>(
    station: &Station<S, N>,
    sensors: &mut I,
) -> StationResult<IndoorReadings> {
    let readings = sensors.read().await?;
    {
        let mut bank = station.lock_vaults().await;
        bank.set.in_temp.append_to_average(readings.temperature_c);
        bank.set.in_hum.append_to_average(readings.humidity_pct);
        bank.set.co2.append_to_average(readings.co2_ppm);
    }
    station.lock_state().await.record_indoor(readings);
    Ok(readings)
}

pub async fn data_update<S: NvStore, const N: usize, I: IndoorSensors>(station: &Station<S, N>, sensors: &mut I) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(station.config.periods.poll_ms)));
    loop {
        ticker.next().await;
        if let Err(e) = poll_cycle(station, sensors).await {
            warn!("Indoor poll failed: {e}");
        }
    }
}

/// Decode an outdoor payload and feed it to the averages and the state.
pub async fn outdoor_cycle<S: NvStore, const N: usize>(
    station: &Station<S, N>,
    packet: [u8; OUTDOOR_PACKET_LEN],
    now_ms: u64,
) -> StationResult<OutdoorReadings> {
    let readings = OutdoorReadings::from_packet(packet)?;
    {
        let mut bank = station.lock_vaults().await;
        bank.set.out_temp.append_to_average(readings.temperature_c);
        bank.set.out_hum.append_to_average(readings.humidity_pct);
        bank.set.out_press.append_to_average(readings.pressure_mm_hg);
    }
    station.lock_state().await.record_outdoor(readings, now_ms);
    Ok(readings)
}

pub async fn outdoor_receive<S: NvStore, const N: usize, L: OutdoorLink>(station: &Station<S, N>, link: &mut L) -> ! {
    loop {
        match link.receive().await {
            Ok(packet) => {
                if let Err(e) = outdoor_cycle(station, packet, Instant::now().as_millis()).await {
                    warn!("Outdoor packet dropped: {e}");
                }
            }
            Err(e) => warn!("Radio receive failed: {e}"),
        }
    }
}

/// Set the real-time clock from an epoch frame.
pub async fn clock_sync_cycle<C: RealTimeClock>(rtc: &C, frame: [u8; 4]) -> Result<DateTime, SensorError> {
    let time = DateTime::from_unix(decode_epoch(frame));
    rtc.set(time).await?;
    info!(
        "Clock set to {}-{:02}-{:02} {:02}:{:02}:{:02}",
        time.year, time.month, time.day, time.hour, time.minute, time.second
    );
    Ok(time)
}

pub async fn clock_sync<S: NvStore, const N: usize, L: ClockSync, C: RealTimeClock>(
    station: &Station<S, N>,
    link: &mut L,
    rtc: &C,
) -> ! {
    loop {
        match link.receive_epoch().await {
            Ok(frame) => {
                station.gate.wait_resumed().await;
                if let Err(e) = clock_sync_cycle(rtc, frame).await {
                    warn!("Clock sync failed: {e}");
                }
            }
            Err(e) => warn!("Clock sync link failed: {e}"),
        }
    }
}

/// Hand encoder events to the frame loop, one at a time.
pub async fn encoder_input<S: NvStore, const N: usize, E: Encoder>(station: &Station<S, N>, encoder: &mut E) -> ! {
    loop {
        let event = encoder.next_event().await;
        station.gate.wait_resumed().await;
        station.input.raise(event).await;
    }
}

/// Minute rollover, daylight-saving correction and radio status.
pub async fn clock_cycle<S: NvStore, const N: usize, C: RealTimeClock>(
    station: &Station<S, N>,
    rtc: &C,
    now_ms: u64,
) -> StationResult<Option<MinuteChange>> {
    let now = rtc.now().await?;
    let change = {
        let mut state = station.lock_state().await;
        state.refresh_radio_status(now_ms, &station.config.display);
        state.on_minute(&now, &station.config.location)
    };

    if let Some(hours) = change.and_then(|change| change.dst_correction) {
        let corrected = DateTime {
            hour: now.hour.saturating_add_signed(hours),
            ..now
        };
        rtc.set(corrected).await?;
        info!("Daylight saving: clock moved by {hours} h");
    }
    Ok(change)
}

pub async fn clock_events<S: NvStore, const N: usize, C: RealTimeClock>(station: &Station<S, N>, rtc: &C) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(station.config.periods.clock_poll_ms)));
    loop {
        ticker.next().await;
        if let Err(e) = clock_cycle(station, rtc, Instant::now().as_millis()).await {
            warn!("Clock poll failed: {e}");
        }
    }
}

/// Returns the new backlight state when it changed.
pub async fn presence_cycle<S: NvStore, const N: usize, M: MotionSensor>(
    station: &Station<S, N>,
    motion: &mut M,
    now_ms: u64,
) -> Option<bool> {
    let active = motion.is_motion().await;
    station
        .lock_state()
        .await
        .on_presence(active, now_ms, &station.config.display)
}

pub async fn presence<S: NvStore, const N: usize, M: MotionSensor>(station: &Station<S, N>, motion: &mut M) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(station.config.periods.presence_poll_ms)));
    loop {
        ticker.next().await;
        if let Some(on) = presence_cycle(station, motion, Instant::now().as_millis()).await {
            debug!("Backlight {}", if on { "on" } else { "off" });
        }
    }
}

/// One display frame: consume at most one input event, apply it and draw
/// whatever changed.
pub async fn plot_cycle<S: NvStore, const N: usize, R: Renderer>(
    station: &Station<S, N>,
    frame: &mut Frame<R>,
    now_ms: u64,
) -> Result<UiCommand, R::Error> {
    let display = &station.config.display;
    let (bank, mut state) = station.lock_both().await;

    let mut command = UiCommand::None;
    if let Some(event) = station.input.poll() {
        station.input.acknowledge();
        state.on_presence(true, now_ms, display);
        command = state.handle_input(event, bank.set.head_count(), display);
    }

    if frame.backlight != Some(state.backlight) {
        frame.renderer.set_backlight(state.backlight)?;
        frame.backlight = Some(state.backlight);
    }

    let graph = state.screen.quantity().map(|quantity| (quantity, bank.set.series(quantity)));
    match (command, graph) {
        (UiCommand::Pan(step), Some((_, series))) => frame.renderer.pan(series, step)?,
        (UiCommand::MoveCursor(step), Some((_, series))) => frame.renderer.move_cursor(series, step)?,
        _ => {}
    }

    if state.setup {
        state.setup = false;
        match graph {
            Some((quantity, series)) => frame.renderer.draw_graph(quantity, series, state.mode)?,
            None => {
                let rating = bank.set.weather_rating(&station.config.trend);
                state.set_weather_rating(rating);
                state.dirty.take();
                frame.renderer.draw_main(&state)?;
            }
        }
    } else if state.screen == Screen::Main {
        let dirty = state.dirty.take();
        if dirty.any() {
            frame.renderer.update_main(&state, dirty)?;
        }
    }
    Ok(command)
}

pub async fn plot_update<S: NvStore, const N: usize, R: Renderer>(station: &Station<S, N>, frame: &mut Frame<R>) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(station.config.periods.frame_ms)));
    loop {
        ticker.next().await;
        if let Err(e) = plot_cycle(station, frame, Instant::now().as_millis()).await {
            warn!("Frame failed: {:?}", e);
        }
    }
}
