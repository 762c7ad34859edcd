use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::api::config::{ApiConfig, GitHubAppSecrets, GitHubAppSettings};
use crate::api::endpoint::ApiEndpoint;
use crate::events::EventHandler;
use crate::github::{GitHubClient, GitHubConfig};
use crate::store::{StateRecord, Store};

pub struct ApiStateBuilder<MandatoryFields = (Store, Arc<dyn EventHandler>)> {
    config: ApiConfig,
    github: GitHubConfig,
    app: Option<(GitHubAppSettings, GitHubAppSecrets)>,
    github_client: Option<GitHubClient>,
    mandatory_fields: MandatoryFields,
}

impl ApiStateBuilder {
    /// Settings and secrets not supplied via [`Self::with_app`] are read from
    /// the environment.
    pub fn build(self) -> Result<ApiState> {
        let (store, event_handler) = self.mandatory_fields;

        let (settings, secrets) = match self.app {
            Some(app) => app,
            None => (GitHubAppSettings::from_env()?, GitHubAppSecrets::from_env()?),
        };

        Ok(ApiState {
            inner: Arc::new(Inner {
                config: self.config,
                github: self.github,
                settings,
                secrets,
                store,
                event_handler,
                github_client: self.github_client,
            }),
        })
    }
}

impl<T2> ApiStateBuilder<((), T2)> {
    pub fn with_store(self, store: Store) -> ApiStateBuilder<(Store, T2)> {
        let (_, event_handler) = self.mandatory_fields;

        ApiStateBuilder {
            config: self.config,
            github: self.github,
            app: self.app,
            github_client: self.github_client,
            mandatory_fields: (store, event_handler),
        }
    }
}

impl<T1> ApiStateBuilder<(T1, ())> {
    pub fn with_event_handler(
        self,
        event_handler: Arc<dyn EventHandler>,
    ) -> ApiStateBuilder<(T1, Arc<dyn EventHandler>)> {
        let (store, _) = self.mandatory_fields;

        ApiStateBuilder {
            config: self.config,
            github: self.github,
            app: self.app,
            github_client: self.github_client,
            mandatory_fields: (store, event_handler),
        }
    }
}

impl<T1, T2> ApiStateBuilder<(T1, T2)> {
    pub fn with_config(self, config: ApiConfig) -> ApiStateBuilder<(T1, T2)> {
        ApiStateBuilder { config, ..self }
    }

    pub fn with_github_config(self, github: GitHubConfig) -> ApiStateBuilder<(T1, T2)> {
        ApiStateBuilder { github, ..self }
    }

    pub fn with_app(
        self,
        settings: GitHubAppSettings,
        secrets: GitHubAppSecrets,
    ) -> ApiStateBuilder<(T1, T2)> {
        ApiStateBuilder {
            app: Some((settings, secrets)),
            ..self
        }
    }

    pub fn with_github_client(self, github_client: Option<GitHubClient>) -> ApiStateBuilder<(T1, T2)> {
        ApiStateBuilder {
            github_client,
            ..self
        }
    }
}

#[derive(Clone)]
#[repr(transparent)]
pub struct ApiState {
    inner: Arc<Inner>,
}

impl ApiState {
    pub fn builder() -> ApiStateBuilder<((), ())> {
        ApiStateBuilder {
            config: ApiConfig::default(),
            github: GitHubConfig::default(),
            app: None,
            github_client: None,
            mandatory_fields: ((), ()),
        }
    }

    pub async fn bind_socket(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.config().listen_addr).await
    }

    pub async fn bind_endpoint(&self) -> Result<ApiEndpoint> {
        ApiEndpoint::builder().bind(self.clone()).await
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn github_config(&self) -> &GitHubConfig {
        &self.inner.github
    }

    pub fn settings(&self) -> &GitHubAppSettings {
        &self.inner.settings
    }

    pub fn secrets(&self) -> &GitHubAppSecrets {
        &self.inner.secrets
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn event_handler(&self) -> &dyn EventHandler {
        self.inner.event_handler.as_ref()
    }

    pub fn github_client(&self) -> Option<&GitHubClient> {
        self.inner.github_client.as_ref()
    }

    /// Issues a fresh single-use installation state and returns its token.
    pub async fn issue_install_state(&self, return_to: Option<String>) -> Result<String> {
        let nonce = Uuid::new_v4().simple().to_string();
        self.inner
            .store
            .store_install_state(&nonce, &StateRecord { return_to })
            .await?;
        Ok(nonce)
    }

    /// Consumes an installation state. `None` means unknown, expired or reused.
    pub async fn consume_install_state(&self, nonce: &str) -> Result<Option<StateRecord>> {
        self.inner.store.consume_install_state(nonce).await
    }
}

struct Inner {
    config: ApiConfig,
    github: GitHubConfig,
    settings: GitHubAppSettings,
    secrets: GitHubAppSecrets,
    store: Store,
    event_handler: Arc<dyn EventHandler>,
    github_client: Option<GitHubClient>,
}
