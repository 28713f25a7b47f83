//! Station context shared by all tasks
//!
//! Lock order is vault lock, then state lock. [`Station::lock_both`] is the
//! only place that takes both.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex as AsyncMutex, MutexGuard};
use embassy_sync::signal::Signal;
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::config::{ConfigError, StationConfig};
use crate::sensors::SensorError;
use crate::storage::{
    Backup, BackupError, FinalizeOutcome, NvStore, RestoreReport, VaultError, VaultSet,
};
use crate::sync::{Rendezvous, SuspendGate};
use crate::time::DateTime;
use crate::ui::{InputEvent, UiState};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("backup: {0}")]
    Backup(#[from] BackupError),
    #[error("vault: {0}")]
    Vault(#[from] VaultError),
    #[error("sensor: {0}")]
    Sensor(#[from] SensorError),
}

pub type StationResult<T> = Result<T, StationError>;

/// Everything guarded by the vault lock.
pub struct VaultBank<S: NvStore, const N: usize> {
    pub set: VaultSet<N>,
    pub backup: Backup<S, N>,
}

impl<S: NvStore, const N: usize> VaultBank<S, N> {
    /// Snapshot unless the gate gets suspended in the middle of it.
    pub async fn snapshot_until_suspended(&mut self, now: &DateTime, gate: &SuspendGate) -> Result<(), BackupError> {
        self.backup
            .create_raw_backup_until(&self.set, now, || gate.is_suspended())
            .await
    }
}

pub type VaultLock<S, const N: usize> = AsyncMutex<CriticalSectionRawMutex, VaultBank<S, N>>;
pub type StateLock = AsyncMutex<CriticalSectionRawMutex, UiState>;

/// Application context, created once at boot and borrowed by every task.
pub struct Station<S: NvStore, const N: usize> {
    pub vault_lock: VaultLock<S, N>,
    pub state_lock: StateLock,
    /// Raised by the power monitor when the supply drops
    pub power_loss: Signal<CriticalSectionRawMutex, ()>,
    /// Raised by the emergency task once the finalize attempt is over
    pub finalized: Signal<CriticalSectionRawMutex, Result<FinalizeOutcome, StationError>>,
    pub gate: SuspendGate,
    pub input: Rendezvous<InputEvent>,
    pub config: StationConfig,
}

impl<S: NvStore, const N: usize> Station<S, N> {
    pub fn new(store: S, config: StationConfig, now_ms: u64) -> StationResult<Self> {
        config.validate()?;
        let backup = Backup::new(store, &config)?;
        let set = VaultSet::new(&config.trend);

        Ok(Self {
            vault_lock: AsyncMutex::new(VaultBank { set, backup }),
            state_lock: AsyncMutex::new(UiState::new(now_ms)),
            power_loss: Signal::new(),
            finalized: Signal::new(),
            gate: SuspendGate::new(),
            input: Rendezvous::new(),
            config,
        })
    }

    /// Restore the vaults, then snapshot them right away so the backup
    /// engine has a synced copy before the first power loss.
    ///
    /// A missing or unusable backup is not an error: the station starts with
    /// empty vaults and `None` is returned.
    pub async fn boot(&self, now: &DateTime) -> StationResult<Option<RestoreReport>> {
        let mut guard = self.vault_lock.lock().await;
        let bank = &mut *guard;

        let report = match bank.backup.pull_backup(&mut bank.set, now).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("No usable backup: {e}");
                None
            }
        };

        if let Err(e) = bank.backup.create_raw_backup(&bank.set, now).await {
            error!("Boot snapshot failed: {e}");
            return Err(e.into());
        }
        info!("Station booted with {} samples per vault", bank.set.head_count());
        Ok(report)
    }

    /// Vault lock, after waiting out a suspension.
    pub async fn lock_vaults(&self) -> MutexGuard<'_, CriticalSectionRawMutex, VaultBank<S, N>> {
        self.gate.wait_resumed().await;
        self.vault_lock.lock().await
    }

    /// State lock, after waiting out a suspension.
    pub async fn lock_state(&self) -> MutexGuard<'_, CriticalSectionRawMutex, UiState> {
        self.gate.wait_resumed().await;
        self.state_lock.lock().await
    }

    /// Both locks in the permitted order.
    pub async fn lock_both(
        &self,
    ) -> (
        MutexGuard<'_, CriticalSectionRawMutex, VaultBank<S, N>>,
        MutexGuard<'_, CriticalSectionRawMutex, UiState>,
    ) {
        self.gate.wait_resumed().await;
        let vaults = self.vault_lock.lock().await;
        let state = self.state_lock.lock().await;
        (vaults, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::time::Timestamp;
    use core::pin::pin;
    use embassy_futures::{block_on, poll_once};

    const CAP: usize = 32;

    fn station() -> Station<MemoryStore, CAP> {
        Station::new(MemoryStore::new(2048), StationConfig::default(), 0).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = StationConfig::default();
        config.periods.append_ms = 0;
        assert!(matches!(
            Station::<_, CAP>::new(MemoryStore::new(2048), config, 0),
            Err(StationError::Config(_))
        ));
    }

    #[test]
    fn test_boot_on_fresh_store_snapshots_empty_vaults() {
        let station = station();
        let now = DateTime::from_unix(1_700_000_000);
        assert_eq!(block_on(station.boot(&now)), Ok(None));

        let bank = block_on(station.vault_lock.lock());
        assert!(bank.backup.is_synced());
        assert_eq!(bank.set.head_count(), 0);
    }

    #[test]
    fn test_boot_restores_previous_run() {
        let now = DateTime::from_unix(1_700_000_000);
        let first = station();
        block_on(first.boot(&now)).unwrap();
        {
            let mut bank = block_on(first.vault_lock.lock());
            bank.set.co2.append_to_average(612);
            bank.set.append_all(now.timestamp());
            let bank = &mut *bank;
            block_on(bank.backup.finalize_backup(&bank.set, &now)).unwrap();
        }

        let store = first.vault_lock.into_inner().backup.into_store();
        let second = Station::<_, CAP>::new(store, StationConfig::default(), 0).unwrap();
        let later = DateTime::from_unix(1_700_000_000 + 13 * 60);
        let report = block_on(second.boot(&later)).unwrap().unwrap();
        assert_eq!(report.missing, 2);

        let bank = block_on(second.vault_lock.lock());
        assert_eq!(bank.set.co2.head_count(), 3);
        assert_eq!(bank.set.co2.last_value(), Ok(612));
        assert_eq!(
            bank.set.co2.last().map(|s| s.stamp),
            Some(Timestamp::new(later.weekday, later.hour, later.minute))
        );
    }

    #[test]
    fn test_suspended_gate_holds_back_locking() {
        let station = station();
        station.gate.suspend();
        {
            let mut lock = pin!(station.lock_both());
            assert!(poll_once(lock.as_mut()).is_pending());
            station.gate.resume();
            assert!(poll_once(lock.as_mut()).is_ready());
        }
        // the emergency path bypasses the gate
        station.gate.suspend();
        assert!(station.vault_lock.try_lock().is_ok());
    }
}
