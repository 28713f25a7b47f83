//! Sensor, link and clock interfaces consumed by the station tasks
//!
//! Drivers live with the board support code; the core only sees these traits
//! and the typed readings they produce.

use thiserror_no_std::Error;

use crate::solar::to_mm_hg;
use crate::time::DateTime;
use crate::ui::InputEvent;

/// Bytes in one outdoor radio payload.
pub const OUTDOOR_PACKET_LEN: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },

    #[error("{sensor} failed to {operation}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
    },

    #[error("{sensor} timed out")]
    Timeout { sensor: &'static str },

    #[error("invalid packet: {reason}")]
    InvalidPacket { reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IndoorReadings {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub co2_ppm: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutdoorReadings {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub pressure_mm_hg: u16,
}

impl OutdoorReadings {
    /// Decode a radio payload of three little-endian `f32`: temperature [°C],
    /// relative humidity [%] and pressure [Pa].
    pub fn from_packet(packet: [u8; OUTDOOR_PACKET_LEN]) -> Result<Self, SensorError> {
        let field = |i: usize| {
            f32::from_le_bytes([packet[i], packet[i + 1], packet[i + 2], packet[i + 3]])
        };
        let (temperature_c, humidity_pct, pascals) = (field(0), field(4), field(8));

        if !(temperature_c.is_finite() && humidity_pct.is_finite() && pascals.is_finite()) {
            return Err(SensorError::InvalidPacket {
                reason: "non-finite reading",
            });
        }
        if pascals < 0.0 {
            return Err(SensorError::InvalidPacket {
                reason: "negative pressure",
            });
        }

        Ok(Self {
            temperature_c,
            humidity_pct,
            pressure_mm_hg: to_mm_hg(pascals),
        })
    }
}

/// Temperature, humidity and CO2 sensors inside the enclosure.
pub trait IndoorSensors {
    fn read(&mut self) -> impl Future<Output = Result<IndoorReadings, SensorError>>;
}

/// Radio receiver of the outdoor unit.
pub trait OutdoorLink {
    /// Wait for the next payload.
    fn receive(&mut self) -> impl Future<Output = Result<[u8; OUTDOOR_PACKET_LEN], SensorError>>;
}

/// Serial link delivering the current Unix time.
pub trait ClockSync {
    /// Wait for the next big-endian epoch frame.
    fn receive_epoch(&mut self) -> impl Future<Output = Result<[u8; 4], SensorError>>;
}

/// Battery-backed calendar clock.
///
/// Several tasks read it, so it is used through a shared reference; an
/// implementation on a shared I2C bus locks the bus per transfer.
pub trait RealTimeClock {
    fn now(&self) -> impl Future<Output = Result<DateTime, SensorError>>;

    fn set(&self, time: DateTime) -> impl Future<Output = Result<(), SensorError>>;
}

/// Rotary encoder with push button.
pub trait Encoder {
    fn next_event(&mut self) -> impl Future<Output = InputEvent>;
}

/// Passive infrared motion sensor.
pub trait MotionSensor {
    fn is_motion(&mut self) -> impl Future<Output = bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(temperature: f32, humidity: f32, pascals: f32) -> [u8; OUTDOOR_PACKET_LEN] {
        let mut packet = [0u8; OUTDOOR_PACKET_LEN];
        packet[0..4].copy_from_slice(&temperature.to_le_bytes());
        packet[4..8].copy_from_slice(&humidity.to_le_bytes());
        packet[8..12].copy_from_slice(&pascals.to_le_bytes());
        packet
    }

    #[test]
    fn test_outdoor_packet_decoding() {
        let readings = OutdoorReadings::from_packet(packet(-4.5, 81.0, 101_325.0)).unwrap();
        assert_eq!(readings.temperature_c, -4.5);
        assert_eq!(readings.humidity_pct, 81.0);
        assert_eq!(readings.pressure_mm_hg, 760);
    }

    #[test]
    fn test_outdoor_packet_rejects_garbage() {
        assert!(matches!(
            OutdoorReadings::from_packet(packet(f32::NAN, 50.0, 100_000.0)),
            Err(SensorError::InvalidPacket { .. })
        ));
        assert!(matches!(
            OutdoorReadings::from_packet(packet(1.0, f32::INFINITY, 100_000.0)),
            Err(SensorError::InvalidPacket { .. })
        ));
        assert!(matches!(
            OutdoorReadings::from_packet(packet(1.0, 50.0, -1.0)),
            Err(SensorError::InvalidPacket { .. })
        ));
    }
}
