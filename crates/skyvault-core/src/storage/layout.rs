//! Non-volatile byte map of the backup
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! 0        consistency flag (0x01 = consistent, anything else = not)
//! 1..=2    reference year-day
//! 3..=4    reference minute of day
//! 5        append cycles since the last snapshot
//! 6        layout version
//! 7        vault count
//! 8..=9    vault capacity N
//! 10..     per vault: snapshot head count (u16), emergency count (u8)
//! header.. per vault: (N + EMERGENCY_SLOTS) two-byte values
//! ```
//!
//! A header whose version, vault count or capacity differs from the running
//! firmware describes no usable backup.

use super::backup::Inconsistency;
use super::sample::ENCODED_LEN;
use super::{EMERGENCY_SLOTS, VAULT_COUNT};
use crate::time::{DateTime, MINUTES_PER_DAY};

pub const FLAG_ADDR: u16 = 0;
pub const FLAG_CONSISTENT: u8 = 0x01;
pub const FLAG_CLEARED: u8 = 0x00;

pub const LAYOUT_VERSION: u8 = 1;

const FIXED_HEADER_LEN: usize = 10;
const VAULT_ENTRY_LEN: usize = 3;

pub const HEADER_LEN: usize = FIXED_HEADER_LEN + VAULT_ENTRY_LEN * VAULT_COUNT;
/// Header bytes following the flag.
pub const HEADER_BODY_LEN: usize = HEADER_LEN - 1;
pub const HEADER_BODY_ADDR: u16 = 1;

/// What a vault region holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VaultEntry {
    /// Values written by the last snapshot
    pub snapshot_count: u16,
    /// Values appended after them by emergency finalizes
    pub emergency_count: u8,
}

impl VaultEntry {
    pub const fn stored(&self) -> usize {
        self.snapshot_count as usize + self.emergency_count as usize
    }
}

/// Addresses of the backup for a vault capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvLayout {
    capacity: usize,
}

impl NvLayout {
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Values each vault region can hold.
    pub const fn region_slots(&self) -> usize {
        self.capacity + EMERGENCY_SLOTS
    }

    pub const fn slot_addr(&self, vault: usize, slot: usize) -> usize {
        HEADER_LEN + (vault * self.region_slots() + slot) * ENCODED_LEN
    }

    /// Bytes needed by header and regions.
    pub const fn total_len(&self) -> usize {
        self.slot_addr(VAULT_COUNT, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub year_day: u16,
    pub day_minute: u16,
    pub emergency_cycles: u8,
    pub version: u8,
    pub vault_count: u8,
    pub capacity: u16,
    pub entries: [VaultEntry; VAULT_COUNT],
}

impl Header {
    pub fn new(
        layout: &NvLayout,
        reference: &DateTime,
        emergency_cycles: u8,
        entries: [VaultEntry; VAULT_COUNT],
    ) -> Self {
        Self {
            year_day: reference.day_of_year(),
            day_minute: reference.minute_of_day(),
            emergency_cycles,
            version: LAYOUT_VERSION,
            vault_count: VAULT_COUNT as u8,
            capacity: layout.capacity() as u16,
            entries,
        }
    }

    pub fn encode_body(&self) -> [u8; HEADER_BODY_LEN] {
        let mut body = [0u8; HEADER_BODY_LEN];
        body[0..2].copy_from_slice(&self.year_day.to_be_bytes());
        body[2..4].copy_from_slice(&self.day_minute.to_be_bytes());
        body[4] = self.emergency_cycles;
        body[5] = self.version;
        body[6] = self.vault_count;
        body[7..9].copy_from_slice(&self.capacity.to_be_bytes());

        for (entry, field) in self
            .entries
            .iter()
            .zip(body[FIXED_HEADER_LEN - 1..].chunks_exact_mut(VAULT_ENTRY_LEN))
        {
            field[0..2].copy_from_slice(&entry.snapshot_count.to_be_bytes());
            field[2] = entry.emergency_count;
        }
        body
    }

    pub fn decode_body(body: &[u8; HEADER_BODY_LEN]) -> Self {
        let mut entries = [VaultEntry::default(); VAULT_COUNT];
        for (entry, field) in entries
            .iter_mut()
            .zip(body[FIXED_HEADER_LEN - 1..].chunks_exact(VAULT_ENTRY_LEN))
        {
            entry.snapshot_count = u16::from_be_bytes([field[0], field[1]]);
            entry.emergency_count = field[2];
        }

        Self {
            year_day: u16::from_be_bytes([body[0], body[1]]),
            day_minute: u16::from_be_bytes([body[2], body[3]]),
            emergency_cycles: body[4],
            version: body[5],
            vault_count: body[6],
            capacity: u16::from_be_bytes([body[7], body[8]]),
            entries,
        }
    }

    /// Reject headers the running firmware cannot trust.
    pub fn validate(&self, layout: &NvLayout) -> Result<(), Inconsistency> {
        if self.version != LAYOUT_VERSION
            || usize::from(self.vault_count) != VAULT_COUNT
            || usize::from(self.capacity) != layout.capacity()
        {
            return Err(Inconsistency::LayoutMismatch);
        }

        if !(1..=366).contains(&self.year_day) || u32::from(self.day_minute) >= MINUTES_PER_DAY {
            return Err(Inconsistency::ImplausibleTime);
        }

        let counts_plausible = usize::from(self.emergency_cycles) <= EMERGENCY_SLOTS
            && self.entries.iter().all(|entry| {
                usize::from(entry.snapshot_count) <= layout.capacity()
                    && usize::from(entry.emergency_count) <= EMERGENCY_SLOTS
            });
        if !counts_plausible {
            return Err(Inconsistency::ImplausibleCounts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        let mut entries = [VaultEntry::default(); VAULT_COUNT];
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.snapshot_count = 1000 + i as u16;
            entry.emergency_count = i as u8;
        }
        let reference = DateTime::from_unix(1_700_000_000);
        Header::new(&NvLayout::new(1200), &reference, 3, entries)
    }

    #[test]
    fn test_layout_addresses() {
        let layout = NvLayout::new(1200);
        assert_eq!(HEADER_LEN, 28);
        assert_eq!(layout.slot_addr(0, 0), 28);
        assert_eq!(layout.slot_addr(1, 0), 28 + 1216 * 2);
        assert_eq!(layout.total_len(), 28 + 6 * 1216 * 2);
        assert!(layout.total_len() <= 32 * 1024);
    }

    #[test]
    fn test_header_byte_map() {
        let body = header().encode_body();
        // 2023-11-14 22:13 is day 318, minute 1333
        assert_eq!(&body[0..4], &[0x01, 0x3E, 0x05, 0x35]);
        assert_eq!(body[4], 3);
        assert_eq!(&body[5..9], &[LAYOUT_VERSION, 6, 0x04, 0xB0]);
        assert_eq!(&body[9..12], &[0x03, 0xE8, 0]);
        assert_eq!(Header::decode_body(&body), header());
    }

    #[test]
    fn test_validate_rejects_foreign_layouts() {
        let header = header();
        assert_eq!(header.validate(&NvLayout::new(1200)), Ok(()));
        assert_eq!(
            header.validate(&NvLayout::new(600)),
            Err(Inconsistency::LayoutMismatch)
        );

        let mut old = header.clone();
        old.version = 0;
        assert_eq!(old.validate(&NvLayout::new(1200)), Err(Inconsistency::LayoutMismatch));
    }

    #[test]
    fn test_validate_rejects_implausible_fields() {
        let layout = NvLayout::new(1200);

        let mut erased = Header::decode_body(&[0xFF; HEADER_BODY_LEN]);
        erased.version = LAYOUT_VERSION;
        erased.vault_count = VAULT_COUNT as u8;
        erased.capacity = 1200;
        assert_eq!(erased.validate(&layout), Err(Inconsistency::ImplausibleTime));

        let mut overfull = header();
        overfull.entries[2].snapshot_count = 1201;
        assert_eq!(overfull.validate(&layout), Err(Inconsistency::ImplausibleCounts));

        let mut overflowing = header();
        overflowing.entries[5].emergency_count = EMERGENCY_SLOTS as u8 + 1;
        assert_eq!(overflowing.validate(&layout), Err(Inconsistency::ImplausibleCounts));
    }
}
