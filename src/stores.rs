use crate::bus::ChangeBus;
use crate::config::Config;
use crate::firewall::FirewallPolicyStore;
use crate::ledger::{open_ledger, Ledger, LedgerBackend};
use crate::settings::{AnalyticsSettings, GeneralSettings, SettingsStore};
use std::sync::Arc;

/// Every store wired to one shared ledger and change bus.
///
/// Construct one per process (or per test) and hand clones of the individual
/// stores to whoever needs them.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<Ledger>,
    pub bus: Arc<ChangeBus>,
    pub general: SettingsStore<GeneralSettings>,
    pub analytics: SettingsStore<AnalyticsSettings>,
    pub firewall: FirewallPolicyStore,
}

impl Stores {
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let ledger = open_ledger(config)?;
        let bus = ChangeBus::new(config.bus.event_capacity);
        Ok(Self::from_parts(Arc::new(ledger), Arc::new(bus)))
    }

    pub fn with_backend(backend: Arc<dyn LedgerBackend>) -> Self {
        Self::from_parts(
            Arc::new(Ledger::new(backend)),
            Arc::new(ChangeBus::default()),
        )
    }

    pub fn from_parts(ledger: Arc<Ledger>, bus: Arc<ChangeBus>) -> Self {
        Self {
            general: SettingsStore::new(Arc::clone(&ledger), Arc::clone(&bus)),
            analytics: SettingsStore::new(Arc::clone(&ledger), Arc::clone(&bus)),
            firewall: FirewallPolicyStore::new(Arc::clone(&ledger), Arc::clone(&bus)),
            ledger,
            bus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageBackendKind;
    use crate::ledger::MemoryBackend;
    use crate::settings::GeneralSettingsPatch;

    #[tokio::test]
    async fn stores_share_one_bus() {
        let stores = Stores::with_backend(Arc::new(MemoryBackend::new()));
        let mut events = stores.bus.events();

        stores
            .general
            .update_settings(GeneralSettingsPatch {
                max_failures: Some(4),
                ..GeneralSettingsPatch::default()
            })
            .await
            .unwrap();
        stores.firewall.add_to_deny_list("evil.com").await.unwrap();

        assert_eq!(events.recv().await.unwrap().key, "general");
        assert_eq!(events.recv().await.unwrap().key, "firewall");
    }

    #[tokio::test]
    async fn open_honours_configured_backend() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.config_path = tmp.path().join("config.toml");
        config.storage.backend = StorageBackendKind::File;

        let stores = Stores::open(&config).unwrap();
        assert_eq!(stores.ledger.backend_name(), "file");
    }
}
