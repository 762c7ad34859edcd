use std::sync::Arc;

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::github::GitHubConfig;
use crate::utils::time::now_sec;

/// Clock skew allowance applied to `iat`.
const JWT_BACKDATE_SECS: u64 = 60;
/// GitHub rejects app JWTs that live longer than ten minutes.
const JWT_LIFETIME_SECS: u64 = 9 * 60;

const USER_AGENT: &str = concat!("ghapp-gateway/", env!("CARGO_PKG_VERSION"));

/// Authenticates as the GitHub App itself (not as an installation).
#[derive(Clone)]
pub struct GitHubClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    api_url: String,
    app_id: u64,
    key: EncodingKey,
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

/// Subset of `GET /app`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: u64,
    pub slug: Option<String>,
    pub name: String,
}

impl GitHubClient {
    pub fn new(
        config: &GitHubConfig,
        http: reqwest::Client,
        app_id: u64,
        private_key_pem: &[u8],
    ) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .context("GITHUB_APP_PRIVATE_KEY is not a valid RSA private key")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                api_url: config.api_url.trim_end_matches('/').to_owned(),
                app_id,
                key,
            }),
        })
    }

    pub fn app_id(&self) -> u64 {
        self.inner.app_id
    }

    /// Mints a short-lived RS256 JWT identifying the app.
    pub fn app_jwt(&self) -> Result<String> {
        let now = now_sec();
        let claims = AppClaims {
            iat: now.saturating_sub(JWT_BACKDATE_SECS),
            exp: now + JWT_LIFETIME_SECS,
            iss: self.inner.app_id.to_string(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.inner.key)
            .context("failed to sign app JWT")
    }

    /// Fetches the app's own metadata; doubles as a reachability probe.
    pub async fn fetch_app(&self) -> Result<AppInfo> {
        let jwt = self.app_jwt()?;

        self.inner
            .http
            .get(format!("{}/app", self.inner.api_url))
            .bearer_auth(jwt)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .context("GitHub API unreachable")?
            .error_for_status()
            .context("GitHub API rejected the app JWT")?
            .json()
            .await
            .context("unexpected GitHub API response")
    }
}
