//! Persistent time-series storage
//!
//! ## Overview
//!
//! Each sensed quantity is kept in a [`Vault`]: a fixed-capacity ring of
//! timestamped samples fed by a running-average accumulator. The six vaults of
//! the station form a [`VaultSet`], which the [`Backup`] engine mirrors into a
//! byte-addressable [`NvStore`]:
//!
//! - **Snapshot**: full copy of every vault, run on the store period
//! - **Finalize**: append-only extension of the last snapshot on power loss
//! - **Restore**: rebuild the vaults at boot, padding the outage with carried
//!   values and re-stamping every sample backwards from the current time
//!
//! ## Non-volatile layout
//!
//! See [`layout`] for the byte map. Values are stored without timestamps as
//! two big-endian bytes each (see [`SampleValue`]).

pub mod backup;
pub mod eeprom;
pub mod layout;
pub mod nv_store;
pub mod sample;
pub mod vault;
pub mod vault_set;

pub use backup::{Backup, BackupError, FinalizeOutcome, Inconsistency, RestoreReport};
pub use eeprom::{At24Eeprom, EepromError};
pub use layout::NvLayout;
pub use nv_store::{MemoryStore, MemoryStoreError, NvStore};
pub use sample::{ENCODED_LEN, FIXED_POINT_SCALE, Sample, SampleValue, format_stamp, format_value};
pub use vault::{Vault, VaultError};
pub use vault_set::{Quantity, SeriesView, VaultHandle, VaultSet};

/// Number of vaults kept by the station.
pub const VAULT_COUNT: usize = 6;

/// Extra samples per vault region reserved for emergency finalize writes.
/// Must hold at least one store period worth of appends.
pub const EMERGENCY_SLOTS: usize = 16;
