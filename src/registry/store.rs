//! Channel registry implementation
//!
//! Maps channel keys to live hubs with get-or-create semantics and an
//! empty-reaper: when a hub's last client leaves, the hub closes itself and
//! asks the registry to forget it, so the next request builds a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use crate::error::{HubError, Result};
use crate::hub::config::HubConfig;
use crate::hub::stream::StreamHub;
use crate::stats::RegistryStats;

use super::key::hub_key;

/// Process-wide map from channel key to hub
///
/// Thread-safe via `RwLock`; the lock is never held while calling into a
/// hub, so hub shutdown cannot stall registry lookups.
pub struct ChannelRegistry {
    me: Weak<ChannelRegistry>,
    hubs: RwLock<HashMap<String, Arc<StreamHub>>>,
    config: HubConfig,
}

impl ChannelRegistry {
    /// Create a registry with the default hub configuration
    pub fn new() -> Arc<Self> {
        Self::with_config(HubConfig::default())
    }

    /// Create a registry whose hubs use `config`
    pub fn with_config(config: HubConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            hubs: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// The configuration handed to every hub this registry creates
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Return the live hub for `addr` + `ifaces`, creating one if the key
    /// is unknown or its hub has already closed.
    pub async fn get_or_create(&self, addr: &str, ifaces: &[String]) -> Result<Arc<StreamHub>> {
        let key = hub_key(addr, ifaces);

        {
            let hubs = self.hubs.read().await;
            if let Some(hub) = hubs.get(&key) {
                if !hub.is_closed() {
                    return Ok(Arc::clone(hub));
                }
            }
        }

        let hub = StreamHub::with_config(
            vec![addr.to_string()],
            ifaces.to_vec(),
            self.config.clone(),
        )?;
        self.install_reaper(&hub, addr, ifaces);

        let mut hubs = self.hubs.write().await;
        hubs.insert(key, Arc::clone(&hub));
        tracing::info!(addr = %addr, hubs = hubs.len(), "hub registered");

        Ok(hub)
    }

    /// Look up the hub currently registered for `addr` + `ifaces`
    pub async fn get(&self, addr: &str, ifaces: &[String]) -> Option<Arc<StreamHub>> {
        let key = hub_key(addr, ifaces);
        self.hubs.read().await.get(&key).cloned()
    }

    /// Remove the hub for `addr` + `ifaces` from the map, then close it
    /// outside the registry lock.
    pub async fn remove(&self, addr: &str, ifaces: &[String]) {
        let key = hub_key(addr, ifaces);

        let hub = { self.hubs.write().await.remove(&key) };
        if let Some(hub) = hub {
            hub.close().await;
            tracing::info!(addr = %addr, "hub removed");
        }
    }

    /// Remove an interface-less channel; see [`ChannelRegistry::remove`]
    pub async fn remove_addr(&self, addr: &str) {
        self.remove(addr, &[]).await
    }

    /// Rebind a registered hub to `new_ifaces` and rekey its entry.
    ///
    /// The hub keeps its clients, ring and last frame; only the sockets and
    /// the registry key change. Fails with [`HubError::HubClosed`] when no
    /// live hub is registered under the old key.
    pub async fn update_interfaces(
        &self,
        addr: &str,
        old_ifaces: &[String],
        new_ifaces: &[String],
    ) -> Result<Arc<StreamHub>> {
        let old_key = hub_key(addr, old_ifaces);

        let hub = {
            let hubs = self.hubs.read().await;
            hubs.get(&old_key).cloned()
        };
        let hub = match hub {
            Some(hub) if !hub.is_closed() => hub,
            _ => return Err(HubError::HubClosed),
        };

        hub.update_interfaces(new_ifaces).await?;

        {
            let mut hubs = self.hubs.write().await;
            hubs.remove(&old_key);
            hubs.insert(hub_key(addr, new_ifaces), Arc::clone(&hub));
        }
        // The reaper must remove the entry under its new key.
        self.install_reaper(&hub, addr, new_ifaces);

        tracing::info!(addr = %addr, ?new_ifaces, "hub rekeyed");
        Ok(hub)
    }

    /// Number of hubs currently registered
    pub async fn hub_count(&self) -> usize {
        self.hubs.read().await.len()
    }

    /// Registry-level snapshot
    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            hub_count: self.hub_count().await,
        }
    }

    fn install_reaper(&self, hub: &Arc<StreamHub>, addr: &str, ifaces: &[String]) {
        let registry = self.me.clone();
        let addr = addr.to_string();
        let ifaces = ifaces.to_vec();
        hub.set_on_empty(move || {
            if let Some(registry) = registry.upgrade() {
                tokio::spawn(async move {
                    registry.remove(&addr, &ifaces).await;
                });
            }
        });
    }
}
