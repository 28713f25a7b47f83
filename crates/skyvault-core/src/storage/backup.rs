//! Snapshot, emergency finalize and restore of a [`VaultSet`]
//!
//! The engine keeps a RAM mirror of what the store currently holds for each
//! vault. Finalize uses it to write only the samples appended since the last
//! sync, which bounds the power-loss path by the number of missed appends
//! instead of the vault capacity.
//!
//! Every write path clears the consistency flag before it touches the header
//! and sets it again only after the last byte landed, so an interrupted pass
//! never looks trustworthy at boot. Emergency samples are written to slots
//! the current header does not reference yet, before the flag is cleared.
//!
//! A snapshot aborted for a power loss remembers how far it got. Finalize
//! completes it from there instead of starting over.

use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use super::layout::{
    FLAG_ADDR, FLAG_CLEARED, FLAG_CONSISTENT, HEADER_BODY_ADDR, HEADER_BODY_LEN, Header, NvLayout,
    VaultEntry,
};
use super::nv_store::NvStore;
use super::sample::ENCODED_LEN;
use super::vault_set::VaultSet;
use super::{EMERGENCY_SLOTS, VAULT_COUNT};
use crate::config::StationConfig;
use crate::time::{DateTime, day_minutes_difference, days_in_year, year_minutes_difference};

/// Bytes moved per store transfer.
const CHUNK_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvOp {
    Read,
    Write,
}

/// Why a stored backup cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// The last write pass never completed
    FlagClear,
    /// Written by firmware with another version, vault count or capacity
    LayoutMismatch,
    ImplausibleCounts,
    ImplausibleTime,
    /// The clock reads earlier than the backup reference time
    ClockSkew,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackupError {
    #[error("non-volatile {op:?} of {len} bytes at {addr:#06x} failed")]
    NonVolatileIo { op: NvOp, addr: u16, len: usize },

    #[error("inconsistent backup: {0:?}")]
    InconsistentBackup(Inconsistency),

    #[error("backup is {elapsed_minutes} minutes old, beyond the retention window")]
    Stale { elapsed_minutes: u32 },

    #[error("snapshot interrupted")]
    Interrupted,

    #[error("backup layout needs {needed} bytes but the store has {available}")]
    StoreTooSmall { needed: usize, available: usize },
}

impl From<Inconsistency> for BackupError {
    fn from(value: Inconsistency) -> Self {
        BackupError::InconsistentBackup(value)
    }
}

pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// No usable snapshot to extend, everything was rewritten
    Full,
    /// Pending samples were appended after the last sync
    Incremental { samples: usize },
    /// Nothing was pending, only the reference time moved
    TimeOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub elapsed_minutes: u32,
    /// Samples padded per vault for the outage
    pub missing: usize,
    pub head_counts: [usize; VAULT_COUNT],
}

/// What the store holds, as of the last successful write pass.
#[derive(Debug, Clone, Copy)]
struct Mirror {
    entries: [VaultEntry; VAULT_COUNT],
    /// `total_appends` of each vault when it was last synced
    synced: [u32; VAULT_COUNT],
    /// Append cycles of the set at the last snapshot
    snapshot_cycles: u32,
    /// Append cycles of the set at the last sync
    synced_cycles: u32,
    reference_minute: u16,
}

/// Where an aborted snapshot stopped. The header for it is already stored.
#[derive(Debug, Clone, Copy)]
struct Progress {
    entries: [VaultEntry; VAULT_COUNT],
    /// `total_appends` of each vault when the snapshot started
    started: [u32; VAULT_COUNT],
    cycles: u32,
    reference_minute: u16,
    /// Next vault and sample to write
    vault: usize,
    sample: usize,
}

impl Progress {
    /// Mirror of the store once every snapshot sample is written.
    const fn into_mirror(self) -> Mirror {
        Mirror {
            entries: self.entries,
            synced: self.started,
            snapshot_cycles: self.cycles,
            synced_cycles: self.cycles,
            reference_minute: self.reference_minute,
        }
    }
}

/// Backup engine over a non-volatile store for vaults of capacity `N`.
pub struct Backup<S: NvStore, const N: usize> {
    store: S,
    layout: NvLayout,
    append_minutes: u32,
    retry_limit: u8,
    mirror: Option<Mirror>,
    interrupted: Option<Progress>,
}

impl<S: NvStore, const N: usize> Backup<S, N> {
    pub fn new(store: S, config: &StationConfig) -> BackupResult<Self> {
        let layout = NvLayout::new(N);
        let needed = layout.total_len();
        let available = store.capacity().min(usize::from(u16::MAX) + 1);
        if needed > available {
            return Err(BackupError::StoreTooSmall { needed, available });
        }

        Ok(Self {
            store,
            layout,
            append_minutes: config.append_minutes().max(1),
            retry_limit: config.storage.nv_retry_limit,
            mirror: None,
            interrupted: None,
        })
    }

    pub const fn layout(&self) -> &NvLayout {
        &self.layout
    }

    /// Whether the store holds a consistent copy this engine can extend.
    pub const fn is_synced(&self) -> bool {
        self.mirror.is_some()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    async fn write_all(&mut self, addr: usize, bytes: &[u8]) -> BackupResult<()> {
        let addr = addr as u16;
        let mut attempt = 0;
        loop {
            match self.store.write(addr, bytes).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry_limit => {
                    attempt += 1;
                    warn!(
                        "NV write of {} bytes at {:#06x} failed: {:?}, retry {}/{}",
                        bytes.len(),
                        addr,
                        e,
                        attempt,
                        self.retry_limit
                    );
                }
                Err(e) => {
                    error!("NV write at {:#06x} abandoned: {:?}", addr, e);
                    return Err(BackupError::NonVolatileIo {
                        op: NvOp::Write,
                        addr,
                        len: bytes.len(),
                    });
                }
            }
        }
    }

    async fn read_all(&mut self, addr: usize, buf: &mut [u8]) -> BackupResult<()> {
        let addr = addr as u16;
        let mut attempt = 0;
        loop {
            match self.store.read(addr, buf).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry_limit => {
                    attempt += 1;
                    warn!("NV read at {:#06x} failed: {:?}, retry {}", addr, e, attempt);
                }
                Err(e) => {
                    error!("NV read at {:#06x} abandoned: {:?}", addr, e);
                    return Err(BackupError::NonVolatileIo {
                        op: NvOp::Read,
                        addr,
                        len: buf.len(),
                    });
                }
            }
        }
    }

    async fn set_flag(&mut self, value: u8) -> BackupResult<()> {
        self.write_all(usize::from(FLAG_ADDR), &[value]).await
    }

    /// Full snapshot of every vault.
    pub async fn create_raw_backup(&mut self, set: &VaultSet<N>, now: &DateTime) -> BackupResult<()> {
        self.create_raw_backup_until(set, now, || false).await
    }

    /// Full snapshot that gives up between chunks once `should_abort` returns
    /// true, leaving the flag cleared. The point where it stopped is kept for
    /// [`Backup::finalize_backup`].
    pub async fn create_raw_backup_until(
        &mut self,
        set: &VaultSet<N>,
        now: &DateTime,
        should_abort: impl Fn() -> bool,
    ) -> BackupResult<()> {
        // the prior snapshot stays valid until this write lands
        self.set_flag(FLAG_CLEARED).await?;
        self.mirror = None;
        self.interrupted = None;

        let handles = set.handles();
        let mut entries = [VaultEntry::default(); VAULT_COUNT];
        let mut started = [0u32; VAULT_COUNT];
        for ((entry, total), vault) in entries.iter_mut().zip(started.iter_mut()).zip(handles.iter()) {
            entry.snapshot_count = vault.head_count() as u16;
            *total = vault.total_appends();
        }
        let header = Header::new(&self.layout, now, 0, entries);
        self.write_all(usize::from(HEADER_BODY_ADDR), &header.encode_body())
            .await?;

        let mut progress = Progress {
            entries,
            started,
            cycles: set.cycles(),
            reference_minute: now.minute_of_day(),
            vault: 0,
            sample: 0,
        };
        let completed = self.write_snapshot_from(set, &mut progress, should_abort).await?;
        if !completed {
            warn!(
                "Snapshot interrupted at vault {}, sample {}",
                progress.vault, progress.sample
            );
            self.interrupted = Some(progress);
            return Err(BackupError::Interrupted);
        }

        self.set_flag(FLAG_CONSISTENT).await?;
        self.mirror = Some(progress.into_mirror());

        info!(
            "Snapshot stored: {} samples per vault at day {} {:02}:{:02}",
            set.head_count(),
            header.year_day,
            now.hour,
            now.minute
        );
        Ok(())
    }

    /// Write the snapshot samples from `progress` onwards. Returns `false`
    /// when `should_abort` stopped it, with `progress` at the next sample.
    async fn write_snapshot_from(
        &mut self,
        set: &VaultSet<N>,
        progress: &mut Progress,
        should_abort: impl Fn() -> bool,
    ) -> BackupResult<bool> {
        let handles = set.handles();
        let mut chunk = [0u8; CHUNK_LEN];
        while progress.vault < VAULT_COUNT {
            let index = progress.vault;
            let count = usize::from(progress.entries[index].snapshot_count);
            while progress.sample < count {
                if should_abort() {
                    return Ok(false);
                }
                let take = (count - progress.sample).min(CHUNK_LEN / ENCODED_LEN);
                let encoded = handles[index].encode_range(progress.sample, &mut chunk[..take * ENCODED_LEN]);
                self.write_all(
                    self.layout.slot_addr(index, progress.sample),
                    &chunk[..encoded * ENCODED_LEN],
                )
                .await?;
                progress.sample += encoded;
            }
            progress.vault += 1;
            progress.sample = 0;
        }
        Ok(true)
    }

    /// Complete an aborted snapshot, provided the samples already written
    /// still sit at the same positions. Leaves the flag cleared.
    async fn resume_snapshot(&mut self, set: &VaultSet<N>, mut progress: Progress) -> BackupResult<Option<Mirror>> {
        let handles = set.handles();
        for (index, vault) in handles.iter().enumerate() {
            let grown = vault.total_appends().wrapping_sub(progress.started[index]) as usize;
            let snapshot = usize::from(progress.entries[index].snapshot_count);
            // an evicted sample shifts every logical index
            if vault.head_count() != snapshot + grown {
                return Ok(None);
            }
        }

        let (vault, sample) = (progress.vault, progress.sample);
        if !self.write_snapshot_from(set, &mut progress, || false).await? {
            return Ok(None);
        }
        info!("Interrupted snapshot completed from vault {vault}, sample {sample}");
        Ok(Some(progress.into_mirror()))
    }

    /// Bring the store up to date before the supply runs out.
    ///
    /// Appends the samples collected since the last sync behind the stored
    /// ones and moves the reference time to `now`. A snapshot interrupted by
    /// the power loss is completed first. Falls back to a full snapshot when
    /// there is nothing valid to extend or the pending samples do not fit the
    /// emergency slots.
    pub async fn finalize_backup(&mut self, set: &VaultSet<N>, now: &DateTime) -> BackupResult<FinalizeOutcome> {
        let resumed = match (self.mirror, self.interrupted.take()) {
            (Some(mirror), _) => Some(mirror),
            (None, Some(progress)) => self.resume_snapshot(set, progress).await?,
            (None, None) => None,
        };
        let Some(mirror) = resumed else {
            info!("No synced snapshot, finalizing with a full backup");
            self.create_raw_backup(set, now).await?;
            return Ok(FinalizeOutcome::Full);
        };

        let handles = set.handles();
        let mut pending = [0usize; VAULT_COUNT];
        let mut fits = true;
        for (index, vault) in handles.iter().enumerate() {
            let new = vault.total_appends().wrapping_sub(mirror.synced[index]) as usize;
            let entry = &mirror.entries[index];
            fits &= new <= vault.head_count()
                && usize::from(entry.emergency_count) + new <= EMERGENCY_SLOTS;
            pending[index] = new;
        }
        if !fits {
            info!("Pending samples exceed the emergency slots, finalizing with a full backup");
            self.create_raw_backup(set, now).await?;
            return Ok(FinalizeOutcome::Full);
        }

        let cycles = set.cycles().wrapping_sub(mirror.synced_cycles);
        let elapsed = day_minutes_difference(now.minute_of_day(), mirror.reference_minute);
        let estimated = u32::from(elapsed) / self.append_minutes;
        if estimated.abs_diff(cycles) > 1 {
            warn!("Wall clock suggests {estimated} appends since the last sync, counted {cycles}");
        } else {
            debug!("{cycles} append cycles since the last sync");
        }

        let mut entries = mirror.entries;
        let mut chunk = [0u8; CHUNK_LEN];
        for (index, vault) in handles.iter().enumerate() {
            let new = pending[index];
            if new == 0 {
                continue;
            }
            let start = vault.head_count() - new;
            let encoded = vault.encode_range(start, &mut chunk[..new * ENCODED_LEN]);
            let slot = entries[index].stored();
            self.write_all(
                self.layout.slot_addr(index, slot),
                &chunk[..encoded * ENCODED_LEN],
            )
            .await?;
            entries[index].emergency_count += encoded as u8;
        }

        self.set_flag(FLAG_CLEARED).await?;
        self.mirror = None;

        let emergency_cycles = set
            .cycles()
            .wrapping_sub(mirror.snapshot_cycles)
            .min(u32::from(u8::MAX)) as u8;
        let header = Header::new(&self.layout, now, emergency_cycles, entries);
        self.write_all(usize::from(HEADER_BODY_ADDR), &header.encode_body())
            .await?;
        self.set_flag(FLAG_CONSISTENT).await?;

        let mut synced = mirror.synced;
        for (total, vault) in synced.iter_mut().zip(handles.iter()) {
            *total = vault.total_appends();
        }
        self.mirror = Some(Mirror {
            entries,
            synced,
            synced_cycles: set.cycles(),
            reference_minute: now.minute_of_day(),
            ..mirror
        });

        let samples: usize = pending.iter().sum();
        info!("Backup finalized with {samples} emergency samples");
        Ok(if samples == 0 {
            FinalizeOutcome::TimeOnly
        } else {
            FinalizeOutcome::Incremental { samples }
        })
    }

    /// Rebuild `set` from the store.
    ///
    /// On any error the vaults are left empty.
    pub async fn pull_backup(&mut self, set: &mut VaultSet<N>, now: &DateTime) -> BackupResult<RestoreReport> {
        set.clear();
        self.mirror = None;
        self.interrupted = None;

        let result = self.restore_into(set, now).await;
        match &result {
            Ok(report) => info!(
                "Restored {:?} samples, {} minutes since backup, {} padded",
                report.head_counts, report.elapsed_minutes, report.missing
            ),
            Err(e) => {
                set.clear();
                warn!("Starting with empty vaults: {e}");
            }
        }
        result
    }

    async fn restore_into(&mut self, set: &mut VaultSet<N>, now: &DateTime) -> BackupResult<RestoreReport> {
        let mut flag = [0u8];
        self.read_all(usize::from(FLAG_ADDR), &mut flag).await?;
        if flag[0] != FLAG_CONSISTENT {
            return Err(Inconsistency::FlagClear.into());
        }

        let mut body = [0u8; HEADER_BODY_LEN];
        self.read_all(usize::from(HEADER_BODY_ADDR), &mut body).await?;
        let header = Header::decode_body(&body);
        header.validate(&self.layout)?;

        if !now.is_plausible() {
            return Err(Inconsistency::ImplausibleTime.into());
        }
        let elapsed_minutes = year_minutes_difference(
            now.day_of_year(),
            now.minute_of_day(),
            header.year_day,
            header.day_minute,
            days_in_year(now.year.saturating_sub(1)),
        )
        .ok_or(Inconsistency::ClockSkew)?;

        let retention = N as u32 * self.append_minutes;
        if elapsed_minutes >= retention {
            return Err(BackupError::Stale { elapsed_minutes });
        }
        let missing = (elapsed_minutes / self.append_minutes) as usize;

        let stamp = now.timestamp();
        let mut head_counts = [0usize; VAULT_COUNT];
        let mut chunk = [0u8; CHUNK_LEN];
        for (index, vault) in set.handles_mut().into_iter().enumerate() {
            let stored = header.entries[index].stored();
            if stored == 0 {
                continue;
            }

            // missing < N, so the skipped prefix never reaches the stored end
            let start = (stored + missing).saturating_sub(N);
            let mut slot = start;
            while slot < stored {
                let count = (stored - slot).min(CHUNK_LEN / ENCODED_LEN);
                let bytes = &mut chunk[..count * ENCODED_LEN];
                self.read_all(self.layout.slot_addr(index, slot), bytes).await?;
                vault.decode_range(bytes);
                slot += count;
            }

            vault.pad_with_last(missing);
            vault.assign_timestamps(stamp, self.append_minutes);
            head_counts[index] = vault.head_count();
        }

        Ok(RestoreReport {
            elapsed_minutes,
            missing,
            head_counts,
        })
    }
}
