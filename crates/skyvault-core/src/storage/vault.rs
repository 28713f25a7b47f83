//! Fixed-capacity time series for one sensed quantity

use core::ops::RangeInclusive;

use heapless::String;
use log::warn;
use thiserror_no_std::Error;

use super::sample::{Sample, SampleValue, format_stamp};
use crate::time::Timestamp;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("vault holds no samples")]
    EmptyVault,

    #[error("range {start}..={end} is outside the {head_count} stored samples")]
    OutOfRange {
        start: usize,
        end: usize,
        head_count: usize,
    },

    #[error("vault has no normalization coefficient")]
    NotNormalized,
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Ring buffer of the most recent `N` samples plus the running average that
/// feeds it.
///
/// Logical index 0 is always the oldest sample. Appending to a full vault
/// evicts the oldest sample in O(1).
#[derive(Debug, Clone)]
pub struct Vault<T: SampleValue, const N: usize> {
    samples: [Sample<T>; N],
    /// Physical index of the oldest sample
    head: usize,
    len: usize,
    sum: f32,
    count: u16,
    norm_coef: Option<f32>,
    /// Lifetime number of appended samples, including evicted ones
    total_appends: u32,
}

impl<T: SampleValue, const N: usize> Vault<T, N> {
    /// `norm_coef` is the largest plausible change per minute; vaults without
    /// one cannot produce trend ratings.
    pub fn new(norm_coef: Option<f32>) -> Self {
        const { assert!(N > 0, "vault capacity must be non-zero") };
        Self {
            samples: [Sample::default(); N],
            head: 0,
            len: 0,
            sum: 0.0,
            count: 0,
            norm_coef: norm_coef.filter(|coef| *coef > 0.0),
            total_appends: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of valid samples, at most `N`.
    pub const fn head_count(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn total_appends(&self) -> u32 {
        self.total_appends
    }

    pub const fn norm_coef(&self) -> Option<f32> {
        self.norm_coef
    }

    const fn physical(&self, index: usize) -> usize {
        (self.head + index) % N
    }

    pub fn get(&self, index: usize) -> Option<&Sample<T>> {
        (index < self.len).then(|| &self.samples[self.physical(index)])
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Sample<T>> {
        if index < self.len {
            let slot = self.physical(index);
            Some(&mut self.samples[slot])
        } else {
            None
        }
    }

    pub fn last(&self) -> Option<&Sample<T>> {
        self.len.checked_sub(1).and_then(|index| self.get(index))
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample<T>> + '_ {
        (0..self.len).map(move |index| &self.samples[self.physical(index)])
    }

    pub fn last_value(&self) -> VaultResult<T> {
        self.last().map(|s| s.value).ok_or(VaultError::EmptyVault)
    }

    /// Accumulate a raw reading into the running average.
    pub fn append_to_average(&mut self, raw: T) {
        if self.count == u16::MAX {
            warn!("Average accumulator saturated, dropping reading");
            return;
        }
        self.sum += raw.to_f32();
        self.count += 1;
    }

    /// Current average of the accumulator, if it holds any readings.
    pub fn pending_average(&self) -> Option<T> {
        (self.count > 0).then(|| T::from_f32(self.sum / f32::from(self.count)))
    }

    /// Flush the accumulator into a new sample stamped `stamp`.
    ///
    /// Without fresh readings the last value is carried forward. A vault that
    /// has neither readings nor history gets no sample and `false` is
    /// returned.
    pub fn append_to_vault(&mut self, stamp: Timestamp) -> bool {
        let value = match self.pending_average() {
            Some(average) => average,
            None => match self.last() {
                Some(last) => last.value,
                None => return false,
            },
        };

        self.sum = 0.0;
        self.count = 0;
        self.push(Sample { value, stamp });
        true
    }

    pub(crate) fn push(&mut self, sample: Sample<T>) {
        if self.len < N {
            let slot = self.physical(self.len);
            self.samples[slot] = sample;
            self.len += 1;
        } else {
            self.samples[self.head] = sample;
            self.head = (self.head + 1) % N;
        }
        self.total_appends = self.total_appends.wrapping_add(1);
    }

    /// Drop every sample and the accumulator.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.sum = 0.0;
        self.count = 0;
    }

    fn check_range(&self, range: &RangeInclusive<usize>) -> VaultResult<()> {
        if self.len == 0 {
            return Err(VaultError::EmptyVault);
        }
        if range.is_empty() || *range.end() >= self.len {
            return Err(VaultError::OutOfRange {
                start: *range.start(),
                end: *range.end(),
                head_count: self.len,
            });
        }
        Ok(())
    }

    fn fold_range(&self, range: RangeInclusive<usize>, keep: impl Fn(T, T) -> bool) -> VaultResult<T> {
        self.check_range(&range)?;
        let start = *range.start();
        let mut best = self.samples[self.physical(start)].value;
        for index in range.skip(1) {
            let value = self.samples[self.physical(index)].value;
            if keep(value, best) {
                best = value;
            }
        }
        Ok(best)
    }

    /// Largest value over an inclusive index range.
    pub fn find_sample_max(&self, range: RangeInclusive<usize>) -> VaultResult<T> {
        self.fold_range(range, |value, best| value > best)
    }

    /// Smallest value over an inclusive index range.
    pub fn find_sample_min(&self, range: RangeInclusive<usize>) -> VaultResult<T> {
        self.fold_range(range, |value, best| value < best)
    }

    /// Rate of change over roughly the last `period_minutes`, scaled by the
    /// normalization coefficient into `-100..=100`.
    ///
    /// The start sample is the first one at least `period_minutes` before the
    /// latest, or the oldest usable one if the history is shorter. A gap
    /// between neighbouring samples longer than the window ends the walk.
    pub fn find_normalized_trend_slope(&self, period_minutes: u16) -> VaultResult<i8> {
        let norm = self.norm_coef.ok_or(VaultError::NotNormalized)?;
        let latest = *self.last().ok_or(VaultError::EmptyVault)?;
        let window = u32::from(period_minutes);

        let mut start: Option<(T, u32)> = None;
        let mut newer = latest.stamp;
        for index in (0..self.len - 1).rev() {
            let sample = &self.samples[self.physical(index)];
            if newer.minutes_since(sample.stamp) > window {
                break;
            }
            newer = sample.stamp;

            let elapsed = latest.stamp.minutes_since(sample.stamp);
            start = Some((sample.value, elapsed));
            if elapsed >= window {
                break;
            }
        }

        match start {
            Some((value, elapsed)) if elapsed > 0 => {
                let slope = (latest.value.to_f32() - value.to_f32()) / elapsed as f32;
                Ok(normalize_slope(slope, norm))
            }
            _ => Ok(0),
        }
    }

    /// `HH:MM` of the sample at `index`.
    pub fn format_time(&self, index: usize) -> VaultResult<String<8>> {
        match self.get(index) {
            Some(sample) => Ok(format_stamp(sample.stamp)),
            None if self.len == 0 => Err(VaultError::EmptyVault),
            None => Err(VaultError::OutOfRange {
                start: index,
                end: index,
                head_count: self.len,
            }),
        }
    }
}

fn normalize_slope(slope: f32, norm: f32) -> i8 {
    let rating = slope / norm * 100.0;
    if rating.is_nan() {
        return 0;
    }
    libm::roundf(rating.clamp(-100.0, 100.0)) as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(minutes: u32) -> Timestamp {
        Timestamp::from_week_minutes(minutes)
    }

    fn filled<const N: usize>(values: &[f32], norm: Option<f32>, step: u32) -> Vault<f32, N> {
        let mut vault = Vault::new(norm);
        for (i, value) in values.iter().enumerate() {
            vault.append_to_average(*value);
            assert!(vault.append_to_vault(stamp(i as u32 * step)));
        }
        vault
    }

    /// Deterministic pseudo-random sequence for value-order checks.
    struct Lcg(u32);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            self.0 >> 8
        }
    }

    #[test]
    fn test_appends_keep_order_below_capacity() {
        let vault: Vault<f32, 8> = filled(&[1.0, 2.0, 3.0, 4.0, 5.0], None, 6);
        assert_eq!(vault.head_count(), 5);
        let values: heapless::Vec<f32, 8> = vault.iter().map(|s| s.value).collect();
        assert_eq!(values.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(vault.total_appends(), 5);
    }

    #[test]
    fn test_full_vault_keeps_most_recent() {
        let mut vault: Vault<u16, 4> = Vault::new(None);
        for value in 1..=11u16 {
            vault.append_to_average(value);
            vault.append_to_vault(stamp(u32::from(value)));
        }
        assert_eq!(vault.head_count(), 4);
        let values: heapless::Vec<u16, 4> = vault.iter().map(|s| s.value).collect();
        assert_eq!(values.as_slice(), &[8, 9, 10, 11]);
        assert_eq!(vault.get(0).map(|s| s.stamp), Some(stamp(8)));
        assert_eq!(vault.last_value(), Ok(11));
        assert_eq!(vault.get(4), None);
    }

    #[test]
    fn test_append_averages_readings() {
        let mut vault: Vault<u16, 4> = Vault::new(None);
        for reading in [400u16, 410, 421] {
            vault.append_to_average(reading);
        }
        assert_eq!(vault.pending_average(), Some(410));
        assert!(vault.append_to_vault(stamp(0)));
        assert_eq!(vault.last_value(), Ok(410));
        assert_eq!(vault.pending_average(), None);
    }

    #[test]
    fn test_append_without_readings_carries_last_value() {
        let mut vault: Vault<f32, 4> = Vault::new(None);
        assert!(!vault.append_to_vault(stamp(0)));
        assert_eq!(vault.head_count(), 0);

        vault.append_to_average(12.5);
        vault.append_to_vault(stamp(6));
        assert!(vault.append_to_vault(stamp(12)));
        assert_eq!(vault.head_count(), 2);
        assert_eq!(vault.last_value(), Ok(12.5));
        assert_eq!(vault.last().map(|s| s.stamp), Some(stamp(12)));
    }

    #[test]
    fn test_empty_vault_queries_fail() {
        let vault: Vault<f32, 4> = Vault::new(Some(0.1));
        assert_eq!(vault.last_value(), Err(VaultError::EmptyVault));
        assert_eq!(vault.find_sample_max(0..=0), Err(VaultError::EmptyVault));
        assert_eq!(vault.find_normalized_trend_slope(90), Err(VaultError::EmptyVault));
        assert_eq!(vault.format_time(0), Err(VaultError::EmptyVault));
    }

    #[test]
    fn test_range_checks() {
        let vault: Vault<f32, 8> = filled(&[1.0, 5.0, 3.0], None, 6);
        assert!(matches!(vault.find_sample_max(0..=3), Err(VaultError::OutOfRange { .. })));
        #[allow(clippy::reversed_empty_ranges)]
        let inverted = 2..=1;
        assert!(matches!(vault.find_sample_min(inverted), Err(VaultError::OutOfRange { .. })));
        assert_eq!(vault.find_sample_max(0..=2), Ok(5.0));
        assert_eq!(vault.find_sample_min(1..=2), Ok(3.0));
        assert_eq!(vault.find_sample_min(1..=1), Ok(5.0));
    }

    #[test]
    fn test_max_min_match_random_sequences() {
        let mut rng = Lcg(7);
        for round in 0..20 {
            let mut vault: Vault<u16, 64> = Vault::new(None);
            let appends = 10 + (rng.next() % 100) as usize;
            let mut values: heapless::Vec<u16, 128> = heapless::Vec::new();
            for i in 0..appends {
                let value = (rng.next() % 5000) as u16;
                vault.append_to_average(value);
                vault.append_to_vault(stamp(i as u32));
                let _ = values.push(value);
            }
            let kept = &values[values.len().saturating_sub(64)..];
            let last = vault.head_count() - 1;
            assert_eq!(vault.find_sample_max(0..=last), Ok(*kept.iter().max().unwrap()), "round {round}");
            assert_eq!(vault.find_sample_min(0..=last), Ok(*kept.iter().min().unwrap()), "round {round}");
        }
    }

    #[test]
    fn test_trend_requires_normalization() {
        let vault: Vault<f32, 8> = filled(&[1.0, 2.0], None, 6);
        assert_eq!(vault.find_normalized_trend_slope(90), Err(VaultError::NotNormalized));
    }

    #[test]
    fn test_trend_single_sample_is_flat() {
        let vault: Vault<f32, 8> = filled(&[20.0], Some(0.15), 6);
        assert_eq!(vault.find_normalized_trend_slope(90), Ok(0));
    }

    #[test]
    fn test_trend_uses_backstep_window() {
        // 0.06 °C/min against a 0.15 °C/min norm
        let values: heapless::Vec<f32, 32> = (0..20).map(|i| 10.0 + 0.36 * i as f32).collect();
        let rising: Vault<f32, 32> = filled(&values, Some(0.15), 6);
        assert_eq!(rising.find_normalized_trend_slope(90), Ok(40));

        let reversed: heapless::Vec<f32, 32> = values.iter().rev().copied().collect();
        let falling: Vault<f32, 32> = filled(&reversed, Some(0.15), 6);
        assert_eq!(falling.find_normalized_trend_slope(90), Ok(-40));
    }

    #[test]
    fn test_trend_saturates() {
        let steep: Vault<f32, 8> = filled(&[0.0, 50.0], Some(0.15), 6);
        assert_eq!(steep.find_normalized_trend_slope(90), Ok(100));
        let drop: Vault<f32, 8> = filled(&[50.0, 0.0], Some(0.15), 6);
        assert_eq!(drop.find_normalized_trend_slope(90), Ok(-100));
    }

    #[test]
    fn test_trend_stays_bounded_for_random_slopes() {
        let mut rng = Lcg(99);
        for _ in 0..200 {
            let a = (rng.next() % 20_000) as f32 / 10.0 - 1000.0;
            let b = (rng.next() % 20_000) as f32 / 10.0 - 1000.0;
            let forward: Vault<f32, 4> = filled(&[a, b], Some(0.01), 6);
            let backward: Vault<f32, 4> = filled(&[b, a], Some(0.01), 6);
            let up = forward.find_normalized_trend_slope(90).unwrap();
            let down = backward.find_normalized_trend_slope(90).unwrap();
            assert!((-100..=100).contains(&up));
            assert_eq!(up, -down);
        }
    }

    #[test]
    fn test_trend_across_week_wrap() {
        let mut vault: Vault<f32, 8> = Vault::new(Some(0.5));
        let sunday_night = Timestamp::new(6, 23, 0);
        for (i, value) in [50.0, 60.0, 70.0].iter().enumerate() {
            vault.append_to_average(*value);
            vault.append_to_vault(sunday_night.plus_minutes(i as u32 * 30));
        }
        // 20 % over 60 minutes against 0.5 %/min
        assert_eq!(vault.find_normalized_trend_slope(90), Ok(67));
    }

    #[test]
    fn test_trend_stops_at_discontinuity() {
        let mut vault: Vault<f32, 8> = Vault::new(Some(0.5));
        for (minutes, value) in [(600, 90.0), (0, 10.0), (30, 20.0), (60, 30.0)] {
            vault.append_to_average(value);
            vault.append_to_vault(stamp(minutes));
        }
        // the 600-minute sample sits behind a gap and is ignored
        assert_eq!(vault.find_normalized_trend_slope(90), Ok(67));
    }

    #[test]
    fn test_format_time() {
        let vault: Vault<f32, 8> = filled(&[1.0, 2.0], None, 65);
        assert_eq!(vault.format_time(1).unwrap().as_str(), "01:05");
        assert!(matches!(vault.format_time(2), Err(VaultError::OutOfRange { .. })));
    }
}
