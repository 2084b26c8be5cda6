//! Device identity kept in the counter store.

use dongle_error::Result;
use dongle_flash::{CounterKey, CounterStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::DongleConfig;

/// Provisioned identity and key sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceConfig {
    pub dongle_id: u32,
    pub t_init: u32,
    pub backend_pk_size: u32,
    pub dongle_sk_size: u32,
}

impl DeviceConfig {
    #[must_use]
    pub const fn from_config(config: &DongleConfig) -> Self {
        Self {
            dongle_id: config.dongle_id,
            t_init: config.t_init,
            backend_pk_size: config.backend_pk_size,
            dongle_sk_size: config.dongle_sk_size,
        }
    }

    /// Read the persisted identity. A partially written identity is treated
    /// as absent.
    pub fn load<C: CounterStore>(counters: &C) -> Result<Option<Self>> {
        let fields = (
            counters.read(CounterKey::DongleId)?,
            counters.read(CounterKey::TInit)?,
            counters.read(CounterKey::BackendPkSize)?,
            counters.read(CounterKey::DongleSkSize)?,
        );
        match fields {
            (Some(dongle_id), Some(t_init), Some(backend_pk_size), Some(dongle_sk_size)) => {
                Ok(Some(Self {
                    dongle_id,
                    t_init,
                    backend_pk_size,
                    dongle_sk_size,
                }))
            }
            (None, None, None, None) => Ok(None),
            _ => {
                warn!("persisted device identity incomplete, reprovisioning");
                Ok(None)
            }
        }
    }

    pub fn save<C: CounterStore>(&self, counters: &mut C) -> Result<()> {
        counters.write_batch(&[
            (CounterKey::DongleId, self.dongle_id),
            (CounterKey::TInit, self.t_init),
            (CounterKey::BackendPkSize, self.backend_pk_size),
            (CounterKey::DongleSkSize, self.dongle_sk_size),
        ])?;
        info!(dongle_id = self.dongle_id, t_init = self.t_init, "device identity saved");
        Ok(())
    }

    /// Use the persisted identity when there is one, otherwise provision
    /// from `config`.
    pub fn load_or_provision<C: CounterStore>(counters: &mut C, config: &DongleConfig) -> Result<Self> {
        if let Some(device) = Self::load(counters)? {
            return Ok(device);
        }
        let device = Self::from_config(config);
        device.save(counters)?;
        Ok(device)
    }

    /// Clock to resume from: the last persisted clock, unless it predates
    /// provisioning.
    pub fn resume_clock<C: CounterStore>(&self, counters: &C) -> Result<u32> {
        Ok(counters
            .read(CounterKey::TCur)?
            .filter(|&t| t >= self.t_init)
            .unwrap_or(self.t_init))
    }
}

#[cfg(test)]
mod tests {
    use dongle_flash::MemCounterStore;

    use super::*;

    fn config() -> DongleConfig {
        DongleConfig {
            dongle_id: 7,
            t_init: 1000,
            backend_pk_size: 91,
            dongle_sk_size: 32,
            ..DongleConfig::default()
        }
    }

    #[test]
    fn test_provision_then_load() {
        let mut counters = MemCounterStore::new();
        assert_eq!(DeviceConfig::load(&counters).unwrap(), None);
        let device = DeviceConfig::load_or_provision(&mut counters, &config()).unwrap();
        assert_eq!(device.dongle_id, 7);
        assert_eq!(counters.batch_count(), 1, "case=single_batch");

        let other = DongleConfig {
            dongle_id: 99,
            ..config()
        };
        let again = DeviceConfig::load_or_provision(&mut counters, &other).unwrap();
        assert_eq!(again.dongle_id, 7, "case=persisted_wins");
    }

    #[test]
    fn test_partial_identity_reprovisioned() {
        let mut counters = MemCounterStore::new();
        counters.write_batch(&[(CounterKey::DongleId, 3)]).unwrap();
        assert_eq!(DeviceConfig::load(&counters).unwrap(), None);
    }

    #[test]
    fn test_resume_clock() {
        let mut counters = MemCounterStore::new();
        let device = DeviceConfig::from_config(&config());
        assert_eq!(device.resume_clock(&counters).unwrap(), 1000, "case=fresh");
        counters.write_batch(&[(CounterKey::TCur, 1500)]).unwrap();
        assert_eq!(device.resume_clock(&counters).unwrap(), 1500, "case=resumed");
        counters.write_batch(&[(CounterKey::TCur, 10)]).unwrap();
        assert_eq!(device.resume_clock(&counters).unwrap(), 1000, "case=stale");
    }
}
