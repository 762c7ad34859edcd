use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use self::config::{StoreBackend, StoreConfig};
use self::memory::MemoryStore;
use crate::redis::RedisClient;

mod config;
mod memory;

/// Server-side half of an installation `state` token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Frontend path to land on after the installation completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

/// Short-lived storage for installation states and webhook delivery ids.
#[derive(Clone)]
pub struct Store {
    backend: Backend,
    state_ttl: Duration,
    delivery_ttl: Duration,
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryStore>),
    Redis(RedisClient),
}

impl Store {
    pub fn memory(config: &StoreConfig) -> Self {
        Self::with_backend(config, Backend::Memory(Default::default()))
    }

    pub fn redis(config: &StoreConfig, client: RedisClient) -> Self {
        Self::with_backend(config, Backend::Redis(client))
    }

    fn with_backend(config: &StoreConfig, backend: Backend) -> Self {
        Self {
            backend,
            state_ttl: config.state_ttl,
            delivery_ttl: config.delivery_ttl,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis(_) => "redis",
        }
    }

    pub async fn store_install_state(&self, nonce: &str, record: &StateRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        match &self.backend {
            Backend::Memory(store) => {
                store.store_install_state(nonce, payload, self.state_ttl);
                Ok(())
            }
            Backend::Redis(client) => {
                client
                    .store_install_state(nonce, &payload, self.state_ttl)
                    .await
            }
        }
    }

    /// Removes the state and returns it if it was issued and has not expired.
    ///
    /// A state can be consumed at most once.
    pub async fn consume_install_state(&self, nonce: &str) -> Result<Option<StateRecord>> {
        let payload = match &self.backend {
            Backend::Memory(store) => store.consume_install_state(nonce),
            Backend::Redis(client) => client.consume_install_state(nonce).await?,
        };

        payload
            .map(|payload| serde_json::from_str(&payload).context("corrupted installation state"))
            .transpose()
    }

    /// Records a delivery id. Returns `false` for a repeat within the TTL.
    pub async fn mark_delivery(&self, delivery_id: &str) -> Result<bool> {
        match &self.backend {
            Backend::Memory(store) => Ok(store.mark_delivery(delivery_id, self.delivery_ttl)),
            Backend::Redis(client) => client.mark_delivery(delivery_id, self.delivery_ttl).await,
        }
    }

    /// Drops a delivery id so a redelivery is dispatched again. Callable from
    /// `Drop`: the memory backend forgets immediately, Redis in a spawned task.
    pub fn forget_delivery(&self, delivery_id: String) {
        match &self.backend {
            Backend::Memory(store) => store.forget_delivery(&delivery_id),
            Backend::Redis(client) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::error!(delivery_id = %delivery_id, "no runtime to forget webhook delivery");
                    return;
                };
                let client = client.clone();
                runtime.spawn(async move {
                    if let Err(e) = client.forget_delivery(&delivery_id).await {
                        tracing::error!(delivery_id = %delivery_id, "failed to forget webhook delivery: {e:#}");
                    }
                });
            }
        }
    }
}
