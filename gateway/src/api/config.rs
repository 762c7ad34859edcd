use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroize;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// TCP socket address to listen for incoming connections.
    ///
    /// Default: `0.0.0.0:8000`
    pub listen_addr: SocketAddr,

    /// Upper bound for handling a single request.
    ///
    /// Default: `25s`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: (Ipv4Addr::UNSPECIFIED, 8000).into(),
            request_timeout: Duration::from_secs(25),
        }
    }
}

pub const INSTALL_START_PATH: &str = "/auth/github/app/install/start";
pub const INSTALL_CALLBACK_PATH: &str = "/auth/github/app/install/callback";
pub const WEBHOOK_PATH: &str = "/webhooks/github";

/// Deployment-specific GitHub App settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct GitHubAppSettings {
    /// Base for every browser redirect, without a trailing slash.
    pub frontend_base_url: String,
    /// Externally reachable base URL of this service, without a trailing slash.
    pub public_base_url: String,
    pub app_slug: String,
    pub app_id: Option<u64>,
}

impl GitHubAppSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let frontend_base_url = required(&lookup, "FRONTEND_BASE_URL")?;
        check_base_url("FRONTEND_BASE_URL", &frontend_base_url, false)?;

        let public_base_url = required(&lookup, "PUBLIC_BASE_URL")?;
        check_base_url("PUBLIC_BASE_URL", &public_base_url, true)?;

        let app_slug = required(&lookup, "GITHUB_APP_SLUG")?;
        anyhow::ensure!(
            app_slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "GITHUB_APP_SLUG must contain only ASCII letters, digits and dashes"
        );

        let app_id = lookup("GITHUB_APP_ID")
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("GITHUB_APP_ID must be a positive integer")?;

        Ok(Self {
            frontend_base_url,
            public_base_url,
            app_slug,
            app_id,
        })
    }

    /// Setup URL to register as the app's "Callback URL".
    pub fn callback_url(&self) -> String {
        format!("{}{INSTALL_CALLBACK_PATH}", self.public_base_url)
    }

    /// URL to register as the app's "Webhook URL".
    pub fn webhook_url(&self) -> String {
        format!("{}{WEBHOOK_PATH}", self.public_base_url)
    }
}

/// Sensitive credentials, loaded exclusively from environment variables.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct GitHubAppSecrets {
    pub webhook_secret: String,
    /// Decoded PEM of the app private key.
    pub private_key_pem: Option<Vec<u8>>,
}

impl GitHubAppSecrets {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let webhook_secret = required(&lookup, "GITHUB_WEBHOOK_SECRET")?;

        if let Some(mut oauth_secret) = lookup("GITHUB_OAUTH_CLIENT_SECRET") {
            let reused = oauth_secret == webhook_secret;
            oauth_secret.zeroize();
            anyhow::ensure!(
                !reused,
                "GITHUB_WEBHOOK_SECRET must differ from GITHUB_OAUTH_CLIENT_SECRET"
            );
        }

        let private_key_pem = match lookup("GITHUB_APP_PRIVATE_KEY").filter(|s| !s.is_empty()) {
            Some(mut encoded) => {
                // Line breaks are common when the value is pasted from a file.
                encoded.retain(|c| !c.is_ascii_whitespace());
                let decoded = base64::engine::general_purpose::STANDARD.decode(&encoded);
                encoded.zeroize();
                Some(decoded.context("GITHUB_APP_PRIVATE_KEY must be base64-encoded PEM")?)
            }
            None => None,
        };

        Ok(Self {
            webhook_secret,
            private_key_pem,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{key} not set"))
}

fn check_base_url(key: &str, value: &str, require_https: bool) -> Result<()> {
    anyhow::ensure!(!value.ends_with('/'), "{key} must not end with a slash");

    let url = Url::parse(value).with_context(|| format!("{key} is not a valid URL"))?;
    anyhow::ensure!(
        url.query().is_none() && url.fragment().is_none(),
        "{key} must not carry a query or fragment"
    );

    match url.scheme() {
        "https" => Ok(()),
        "http" if !require_https => Ok(()),
        "http" if is_loopback(&url) => {
            tracing::warn!("{key} uses plain HTTP; GitHub only delivers to HTTPS endpoints");
            Ok(())
        }
        scheme => anyhow::bail!("{key} must use https, got '{scheme}'"),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
