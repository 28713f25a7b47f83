//! The station's collection of vaults and the type-erased views over it

use core::ops::RangeInclusive;

use heapless::String;

use super::sample::{ENCODED_LEN, Sample, SampleValue, format_stamp, format_value};
use super::vault::{Vault, VaultError};
use super::VAULT_COUNT;
use crate::config::TrendConfig;
use crate::solar::find_weather_rating;
use crate::time::Timestamp;

/// Operations the backup engine needs from a vault, independent of its
/// value type.
pub trait VaultHandle {
    /// Flush the accumulator into a new sample. See [`Vault::append_to_vault`].
    fn append_sample(&mut self, stamp: Timestamp) -> bool;

    fn head_count(&self) -> usize;

    fn total_appends(&self) -> u32;

    /// Encode values starting at logical index `start` into `out`, two bytes
    /// each. Returns the number of values written.
    fn encode_range(&self, start: usize, out: &mut [u8]) -> usize;

    /// Append the values encoded in `bytes` with placeholder stamps. Returns
    /// the number of values decoded.
    fn decode_range(&mut self, bytes: &[u8]) -> usize;

    /// Append `count` copies of the last value. Does nothing on an empty
    /// vault and returns the number of samples added.
    fn pad_with_last(&mut self, count: usize) -> usize;

    /// Re-stamp every sample so the newest reads `now` and each older one is
    /// `period_minutes` earlier than its successor.
    fn assign_timestamps(&mut self, now: Timestamp, period_minutes: u32);

    fn clear(&mut self);
}

impl<T: SampleValue, const N: usize> VaultHandle for Vault<T, N> {
    fn append_sample(&mut self, stamp: Timestamp) -> bool {
        self.append_to_vault(stamp)
    }

    fn head_count(&self) -> usize {
        Vault::head_count(self)
    }

    fn total_appends(&self) -> u32 {
        Vault::total_appends(self)
    }

    fn encode_range(&self, start: usize, out: &mut [u8]) -> usize {
        let mut written = 0;
        for (chunk, sample) in out.chunks_exact_mut(ENCODED_LEN).zip(self.iter().skip(start)) {
            chunk.copy_from_slice(&sample.value.to_bytes());
            written += 1;
        }
        written
    }

    fn decode_range(&mut self, bytes: &[u8]) -> usize {
        let mut decoded = 0;
        for chunk in bytes.chunks_exact(ENCODED_LEN) {
            let value = T::from_bytes([chunk[0], chunk[1]]);
            self.push(Sample {
                value,
                stamp: Timestamp::default(),
            });
            decoded += 1;
        }
        decoded
    }

    fn pad_with_last(&mut self, count: usize) -> usize {
        let Some(last) = self.last().copied() else {
            return 0;
        };
        for _ in 0..count {
            self.push(last);
        }
        count
    }

    fn assign_timestamps(&mut self, now: Timestamp, period_minutes: u32) {
        let len = Vault::head_count(self);
        for index in 0..len {
            let steps_back = (len - 1 - index) as u32;
            let stamp = now.minus_minutes(steps_back * period_minutes);
            if let Some(sample) = self.get_mut(index) {
                sample.stamp = stamp;
            }
        }
    }

    fn clear(&mut self) {
        Vault::clear(self);
    }
}

/// Read-only view of a vault for renderers that do not know its value type.
pub trait SeriesView {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn value_at(&self, index: usize) -> Option<f32>;

    fn stamp_at(&self, index: usize) -> Option<Timestamp>;

    fn max_in(&self, range: RangeInclusive<usize>) -> Result<f32, VaultError>;

    fn min_in(&self, range: RangeInclusive<usize>) -> Result<f32, VaultError>;

    fn last_value(&self) -> Result<f32, VaultError>;

    fn format_at(&self, index: usize, forced_round: bool) -> Option<String<12>>;

    fn format_time_at(&self, index: usize) -> Option<String<8>>;
}

impl<T: SampleValue, const N: usize> SeriesView for Vault<T, N> {
    fn len(&self) -> usize {
        self.head_count()
    }

    fn value_at(&self, index: usize) -> Option<f32> {
        self.get(index).map(|s| s.value.to_f32())
    }

    fn stamp_at(&self, index: usize) -> Option<Timestamp> {
        self.get(index).map(|s| s.stamp)
    }

    fn max_in(&self, range: RangeInclusive<usize>) -> Result<f32, VaultError> {
        self.find_sample_max(range).map(SampleValue::to_f32)
    }

    fn min_in(&self, range: RangeInclusive<usize>) -> Result<f32, VaultError> {
        self.find_sample_min(range).map(SampleValue::to_f32)
    }

    fn last_value(&self) -> Result<f32, VaultError> {
        Vault::last_value(self).map(SampleValue::to_f32)
    }

    fn format_at(&self, index: usize, forced_round: bool) -> Option<String<12>> {
        self.get(index).map(|s| format_value(s.value, forced_round))
    }

    fn format_time_at(&self, index: usize) -> Option<String<8>> {
        self.get(index).map(|s| format_stamp(s.stamp))
    }
}

/// Sensed quantities in collection order. The order is part of the
/// non-volatile layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    OutdoorTemperature,
    OutdoorHumidity,
    OutdoorPressure,
    IndoorTemperature,
    IndoorHumidity,
    Co2,
}

impl Quantity {
    pub const ALL: [Quantity; VAULT_COUNT] = [
        Quantity::OutdoorTemperature,
        Quantity::OutdoorHumidity,
        Quantity::OutdoorPressure,
        Quantity::IndoorTemperature,
        Quantity::IndoorHumidity,
        Quantity::Co2,
    ];

    pub const fn label(&self) -> &'static str {
        match self {
            Quantity::OutdoorTemperature => "Outdoor temperature",
            Quantity::OutdoorHumidity => "Outdoor humidity",
            Quantity::OutdoorPressure => "Pressure",
            Quantity::IndoorTemperature => "Indoor temperature",
            Quantity::IndoorHumidity => "Indoor humidity",
            Quantity::Co2 => "CO2",
        }
    }

    pub const fn unit(&self) -> &'static str {
        match self {
            Quantity::OutdoorTemperature | Quantity::IndoorTemperature => "°C",
            Quantity::OutdoorHumidity | Quantity::IndoorHumidity => "%",
            Quantity::OutdoorPressure => "mmHg",
            Quantity::Co2 => "ppm",
        }
    }

    /// Pressure indicators are shown without decimals.
    pub const fn forced_round(&self) -> bool {
        matches!(self, Quantity::OutdoorPressure)
    }
}

/// All vaults of the station.
///
/// Typed fields serve callers that know the value type; [`VaultSet::handles`]
/// gives the backup engine a uniform view in [`Quantity::ALL`] order.
#[derive(Debug, Clone)]
pub struct VaultSet<const N: usize> {
    pub out_temp: Vault<f32, N>,
    pub out_hum: Vault<f32, N>,
    pub out_press: Vault<u16, N>,
    pub in_temp: Vault<f32, N>,
    pub in_hum: Vault<f32, N>,
    pub co2: Vault<u16, N>,
    /// Completed append cycles since boot
    cycles: u32,
}

impl<const N: usize> VaultSet<N> {
    /// Outdoor vaults get trend normalization from `trend`; indoor ones are
    /// displayed only.
    pub fn new(trend: &TrendConfig) -> Self {
        Self {
            out_temp: Vault::new(Some(trend.temperature_norm)),
            out_hum: Vault::new(Some(trend.humidity_norm)),
            out_press: Vault::new(Some(trend.pressure_norm)),
            in_temp: Vault::new(None),
            in_hum: Vault::new(None),
            co2: Vault::new(None),
            cycles: 0,
        }
    }

    pub fn handles(&self) -> [&dyn VaultHandle; VAULT_COUNT] {
        [
            &self.out_temp,
            &self.out_hum,
            &self.out_press,
            &self.in_temp,
            &self.in_hum,
            &self.co2,
        ]
    }

    pub fn handles_mut(&mut self) -> [&mut dyn VaultHandle; VAULT_COUNT] {
        [
            &mut self.out_temp,
            &mut self.out_hum,
            &mut self.out_press,
            &mut self.in_temp,
            &mut self.in_hum,
            &mut self.co2,
        ]
    }

    pub fn series(&self, quantity: Quantity) -> &dyn SeriesView {
        match quantity {
            Quantity::OutdoorTemperature => &self.out_temp,
            Quantity::OutdoorHumidity => &self.out_hum,
            Quantity::OutdoorPressure => &self.out_press,
            Quantity::IndoorTemperature => &self.in_temp,
            Quantity::IndoorHumidity => &self.in_hum,
            Quantity::Co2 => &self.co2,
        }
    }

    /// Append one sample to every vault. Returns how many vaults grew.
    pub fn append_all(&mut self, stamp: Timestamp) -> usize {
        let appended = self
            .handles_mut()
            .into_iter()
            .map(|vault| vault.append_sample(stamp))
            .filter(|grew| *grew)
            .count();
        self.cycles = self.cycles.wrapping_add(1);
        appended
    }

    pub const fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Largest head count across the vaults.
    pub fn head_count(&self) -> usize {
        self.handles()
            .iter()
            .map(|vault| vault.head_count())
            .max()
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        for vault in self.handles_mut() {
            vault.clear();
        }
    }

    /// Weather rating from the outdoor trends over `backstep_minutes`.
    ///
    /// `None` while any outdoor vault is empty: there is nothing to rate.
    pub fn weather_rating(&self, trend: &TrendConfig) -> Option<i8> {
        let window = trend.backstep_minutes;
        let pressure = self.out_press.find_normalized_trend_slope(window).ok()?;
        let humidity = self.out_hum.find_normalized_trend_slope(window).ok()?;
        let temperature = self.out_temp.find_normalized_trend_slope(window).ok()?;
        Some(find_weather_rating(pressure, humidity, temperature, &trend.weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;

    fn set<const N: usize>() -> VaultSet<N> {
        VaultSet::new(&StationConfig::default().trend)
    }

    #[test]
    fn test_handles_follow_collection_order() {
        let mut vaults: VaultSet<8> = set();
        vaults.out_press.append_to_average(755);
        vaults.out_press.append_to_vault(Timestamp::default());

        let counts: [usize; VAULT_COUNT] = vaults.handles().map(|v| v.head_count());
        assert_eq!(counts, [0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_append_all_skips_vaults_without_data() {
        let mut vaults: VaultSet<8> = set();
        vaults.in_temp.append_to_average(21.0);
        vaults.co2.append_to_average(450);

        assert_eq!(vaults.append_all(Timestamp::new(0, 8, 0)), 2);
        assert_eq!(vaults.append_all(Timestamp::new(0, 8, 6)), 2);
        assert_eq!(vaults.in_temp.head_count(), 2);
        assert_eq!(vaults.out_temp.head_count(), 0);
        assert_eq!(vaults.cycles(), 2);
        assert_eq!(vaults.head_count(), 2);
    }

    #[test]
    fn test_encode_decode_range() {
        let mut source: Vault<f32, 8> = Vault::new(None);
        for (i, value) in [1.5f32, -2.25, 30.0].iter().enumerate() {
            source.append_to_average(*value);
            source.append_to_vault(Timestamp::new(0, 0, i as u8));
        }

        let mut bytes = [0u8; 8];
        assert_eq!(source.encode_range(1, &mut bytes), 2);

        let mut target: Vault<f32, 8> = Vault::new(None);
        assert_eq!(target.decode_range(&bytes[..4]), 2);
        assert_eq!(target.iter().map(|s| s.value).collect::<heapless::Vec<f32, 4>>().as_slice(), &[-2.3, 30.0]);
    }

    #[test]
    fn test_pad_and_assign_timestamps() {
        let mut vault: Vault<u16, 8> = Vault::new(None);
        assert_eq!(vault.pad_with_last(3), 0);

        vault.decode_range(&[0x01, 0xF4, 0x01, 0xF5]);
        assert_eq!(vault.pad_with_last(2), 2);
        let now = Timestamp::new(0, 0, 3);
        vault.assign_timestamps(now, 6);

        let stamps: heapless::Vec<Timestamp, 8> = vault.iter().map(|s| s.stamp).collect();
        assert_eq!(
            stamps.as_slice(),
            &[
                Timestamp::new(6, 23, 45),
                Timestamp::new(6, 23, 51),
                Timestamp::new(6, 23, 57),
                now,
            ]
        );
        assert_eq!(vault.last_value(), Ok(501));
    }

    #[test]
    fn test_weather_rating_needs_all_outdoor_vaults() {
        let trend = StationConfig::default().trend;
        let mut vaults: VaultSet<16> = set();
        assert_eq!(vaults.weather_rating(&trend), None);

        for minute in [0u8, 30, 60] {
            let stamp = Timestamp::from_week_minutes(u32::from(minute));
            vaults.out_temp.append_to_average(10.0);
            vaults.out_hum.append_to_average(60.0);
            vaults.out_press.append_to_average(750 + u16::from(minute) / 30);
            vaults.append_all(stamp);
        }
        // 2 mmHg over 60 minutes saturates the pressure trend
        assert_eq!(vaults.weather_rating(&trend), Some(60));
    }

    #[test]
    fn test_series_view_is_type_erased() {
        let mut vaults: VaultSet<8> = set();
        vaults.co2.append_to_average(800);
        vaults.co2.append_to_vault(Timestamp::new(1, 12, 30));

        let series = vaults.series(Quantity::Co2);
        assert_eq!(series.len(), 1);
        assert_eq!(series.value_at(0), Some(800.0));
        assert_eq!(series.max_in(0..=0), Ok(800.0));
        assert_eq!(series.format_at(0, false).unwrap().as_str(), "800");
        assert_eq!(series.format_time_at(0).unwrap().as_str(), "12:30");
        assert!(vaults.series(Quantity::OutdoorTemperature).is_empty());
    }
}
