//! ConfigStore - Fleet Configuration (Single Source of Truth)
//!
//! ## Responsibilities
//!
//! - Host / camera / detector inventory
//! - Device document import and export
//! - Persistence to the fleet file with backup and restore
//!
//! All configuration reads and writes go through here; the monitor and the
//! command client read hosts from the cache.

mod repository;
mod service;
mod types;

pub use repository::{FleetRepository, BACKUP_EXTENSION};
pub use service::ConfigService;
pub use types::*;

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::fleet::Host;

/// ConfigStore instance
pub struct ConfigStore {
    service: ConfigService,
    /// In-memory copy of the fleet for frequent reads
    cache: Arc<RwLock<Vec<Host>>>,
}

impl ConfigStore {
    /// Create new ConfigStore and load the fleet file
    pub async fn new(repo: FleetRepository) -> crate::Result<Self> {
        let store = Self {
            service: ConfigService::new(repo),
            cache: Arc::new(RwLock::new(Vec::new())),
        };

        store.refresh_cache().await?;

        Ok(store)
    }

    /// Get service reference
    pub fn service(&self) -> &ConfigService {
        &self.service
    }

    /// Reload the cache from the fleet file
    pub async fn refresh_cache(&self) -> crate::Result<()> {
        let hosts = self.service.list_hosts().await?;

        let mut cache = self.cache.write().await;
        *cache = hosts;

        tracing::info!("ConfigStore cache refreshed: {} hosts", cache.len());

        Ok(())
    }

    pub async fn get_cached_hosts(&self) -> Vec<Host> {
        self.cache.read().await.clone()
    }

    pub async fn get_cached_host(&self, host_id: &str) -> Option<Host> {
        self.cache
            .read()
            .await
            .iter()
            .find(|h| h.id == host_id)
            .cloned()
    }

    /// Host whose reply topics include `topic`
    pub async fn find_host_by_topic(&self, topic: &str) -> Option<Host> {
        self.cache
            .read()
            .await
            .iter()
            .find(|h| h.reply_topics().any(|t| t == topic))
            .cloned()
    }

    /// Host whose settings topic is `topic`
    pub async fn find_host_by_settings_topic(&self, topic: &str) -> Option<Host> {
        self.cache
            .read()
            .await
            .iter()
            .find(|h| !h.mqtt_settings_get_topic.is_empty() && h.mqtt_settings_get_topic == topic)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_follows_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(FleetRepository::new(dir.path().join("fleet.json")))
            .await
            .unwrap();
        assert!(store.get_cached_hosts().await.is_empty());

        let host = Host {
            id: "orin-01".to_string(),
            mqtt_ping_topic: "cs/orin-01/ping".to_string(),
            mqtt_settings_get_topic: "cs/orin-01/settings".to_string(),
            ..Host::default()
        };
        store.service().create_host(host).await.unwrap();
        assert!(store.get_cached_host("orin-01").await.is_none());

        store.refresh_cache().await.unwrap();
        assert!(store.get_cached_host("orin-01").await.is_some());
        assert_eq!(
            store.find_host_by_topic("cs/orin-01/ping").await.unwrap().id,
            "orin-01"
        );
        assert!(store.find_host_by_topic("cs/other").await.is_none());
        assert!(store
            .find_host_by_settings_topic("cs/orin-01/settings")
            .await
            .is_some());
    }
}
