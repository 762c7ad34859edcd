use std::sync::Arc;

use anyhow::Context;

use crate::api::config::{GitHubAppSecrets, GitHubAppSettings};
use crate::api::state::ApiState;
use crate::config::AppConfig;
use crate::events::LogEventHandler;
use crate::github::GitHubClient;
use crate::redis::RedisClient;
use crate::store::{Store, StoreBackend};

pub mod config;
pub mod controllers;
pub mod endpoint;
pub mod models;
pub mod state;

#[cfg(test)]
mod tests;

pub async fn http_service(config: AppConfig) -> anyhow::Result<()> {
    let settings = GitHubAppSettings::from_env()?;
    let secrets = GitHubAppSecrets::from_env()?;

    let store = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory state store; run a single replica only");
            Store::memory(&config.store)
        }
        StoreBackend::Redis => {
            let redis_url = std::env::var("REDIS_URL").context("REDIS_URL not set")?;
            tracing::info!("connecting to Redis...");
            let client = RedisClient::new(&redis_url, &config.store.redis)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("Redis connected");
            Store::redis(&config.store, client)
        }
    };

    let github_client = match (settings.app_id, secrets.private_key_pem.as_deref()) {
        (Some(app_id), Some(pem)) => Some(GitHubClient::new(
            &config.github,
            reqwest::Client::new(),
            app_id,
            pem,
        )?),
        (None, None) => {
            tracing::warn!("GITHUB_APP_ID and GITHUB_APP_PRIVATE_KEY not set; GitHub API disabled");
            None
        }
        (Some(_), None) => anyhow::bail!("GITHUB_APP_ID is set but GITHUB_APP_PRIVATE_KEY is not"),
        (None, Some(_)) => anyhow::bail!("GITHUB_APP_PRIVATE_KEY is set but GITHUB_APP_ID is not"),
    };

    if config.github.check_on_startup {
        if let Some(client) = &github_client {
            match client.fetch_app().await {
                Ok(app) => tracing::info!(app_id = app.id, slug = ?app.slug, "GitHub App credentials verified"),
                Err(e) => tracing::error!("GitHub upstream unreachable: {e:#}"),
            }
        }
    }

    tracing::info!(
        callback_url = %settings.callback_url(),
        webhook_url = %settings.webhook_url(),
        store = store.backend_name(),
        "GitHub App endpoints"
    );

    let state = ApiState::builder()
        .with_config(config.api)
        .with_github_config(config.github)
        .with_app(settings, secrets)
        .with_github_client(github_client)
        .with_store(store)
        .with_event_handler(Arc::new(LogEventHandler))
        .build()?;

    let endpoint = state.bind_endpoint().await?;
    tracing::info!(listen_addr = %endpoint.local_addr()?, "API server started");

    tokio::task::spawn(async move {
        if let Err(e) = endpoint.serve().await {
            tracing::error!("API server failed: {e:?}");
        }
        tracing::info!("API server stopped");
    });

    Ok(())
}
