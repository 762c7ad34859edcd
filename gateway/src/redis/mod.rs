use std::time::Duration;

use anyhow::Context;
use redis::AsyncCommands;

pub use self::config::RedisConfig;

mod config;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::aio::ConnectionManager,
    key_prefix: String,
}

impl RedisClient {
    pub async fn new(url: &str, config: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("failed to create Redis client")?;

        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;

        Ok(Self {
            client: manager,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Store an installation state payload with a TTL.
    pub async fn store_install_state(
        &self,
        nonce: &str,
        payload: &str,
        ttl: Duration,
    ) -> anyhow::Result<()> {
        let mut conn = self.client.clone();
        let _: () = conn
            .set_ex(self.state_key(nonce), payload, ttl_secs(ttl))
            .await
            .context("failed to store installation state in Redis")?;
        Ok(())
    }

    /// Atomically fetch and delete an installation state payload.
    pub async fn consume_install_state(&self, nonce: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.client.clone();
        let payload: Option<String> = conn
            .get_del(self.state_key(nonce))
            .await
            .context("failed to consume installation state from Redis")?;
        Ok(payload)
    }

    /// Record a webhook delivery id. Returns `false` if it was already recorded.
    pub async fn mark_delivery(&self, delivery_id: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.client.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.delivery_key(delivery_id))
            .arg(1u8)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .context("failed to record webhook delivery in Redis")?;
        Ok(reply.is_some())
    }

    pub async fn forget_delivery(&self, delivery_id: &str) -> anyhow::Result<()> {
        let mut conn = self.client.clone();
        let _: i64 = conn
            .del(self.delivery_key(delivery_id))
            .await
            .context("failed to forget webhook delivery in Redis")?;
        Ok(())
    }

    fn state_key(&self, nonce: &str) -> String {
        state_key(&self.key_prefix, nonce)
    }

    fn delivery_key(&self, delivery_id: &str) -> String {
        delivery_key(&self.key_prefix, delivery_id)
    }
}

fn state_key(prefix: &str, nonce: &str) -> String {
    format!("{prefix}install_state:{nonce}")
}

fn delivery_key(prefix: &str, delivery_id: &str) -> String {
    format!("{prefix}delivery:{delivery_id}")
}

/// Redis expiries are whole seconds and must be positive.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
