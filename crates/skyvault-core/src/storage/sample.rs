//! Samples and their two-byte non-volatile encoding

use core::fmt::Write;

use heapless::String;

use crate::time::Timestamp;

/// Bytes per stored value.
pub const ENCODED_LEN: usize = 2;

/// Floats are stored as tenths in a signed 16-bit integer, which covers
/// -3276.8..=3276.7 with a rounding error of at most 0.05.
pub const FIXED_POINT_SCALE: f32 = 10.0;

/// One observation, immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample<T> {
    pub value: T,
    pub stamp: Timestamp,
}

/// Value types a vault can hold.
pub trait SampleValue: Copy + PartialOrd + Default + core::fmt::Debug {
    /// Whole-number quantities are formatted without decimals.
    const INTEGRAL: bool;

    fn to_bytes(self) -> [u8; ENCODED_LEN];
    fn from_bytes(bytes: [u8; ENCODED_LEN]) -> Self;
    fn to_f32(self) -> f32;
    /// Rounds and saturates where the type requires it.
    fn from_f32(value: f32) -> Self;
}

impl SampleValue for f32 {
    const INTEGRAL: bool = false;

    fn to_bytes(self) -> [u8; ENCODED_LEN] {
        let scaled = libm::roundf(self * FIXED_POINT_SCALE).clamp(i16::MIN as f32, i16::MAX as f32);
        (scaled as i16).to_be_bytes()
    }

    fn from_bytes(bytes: [u8; ENCODED_LEN]) -> Self {
        f32::from(i16::from_be_bytes(bytes)) / FIXED_POINT_SCALE
    }

    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

impl SampleValue for u16 {
    const INTEGRAL: bool = true;

    fn to_bytes(self) -> [u8; ENCODED_LEN] {
        self.to_be_bytes()
    }

    fn from_bytes(bytes: [u8; ENCODED_LEN]) -> Self {
        u16::from_be_bytes(bytes)
    }

    fn to_f32(self) -> f32 {
        f32::from(self)
    }

    fn from_f32(value: f32) -> Self {
        libm::roundf(value).clamp(0.0, u16::MAX as f32) as u16
    }
}

/// Human-readable value: one decimal for physical quantities, none for
/// counts or when `forced_round` is set.
pub fn format_value<T: SampleValue>(value: T, forced_round: bool) -> String<12> {
    let mut out = String::new();
    let value = value.to_f32();

    // 12 bytes hold any i32 with its sign, so the writes cannot overflow
    if T::INTEGRAL || forced_round {
        let whole = libm::roundf(value) as i32;
        let _ = write!(out, "{whole}");
    } else {
        let tenths = libm::roundf(value * 10.0) as i32;
        let sign = if tenths < 0 { "-" } else { "" };
        let abs = tenths.unsigned_abs();
        let _ = write!(out, "{sign}{}.{}", abs / 10, abs % 10);
    }
    out
}

/// `HH:MM` of a stamp.
pub fn format_stamp(stamp: Timestamp) -> String<8> {
    let mut out = String::new();
    let _ = write!(out, "{:02}:{:02}", stamp.hour, stamp.minute);
    out
}
