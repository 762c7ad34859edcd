use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// REST API root.
    ///
    /// Default: `https://api.github.com`
    pub api_url: String,

    /// Web root used to build installation URLs.
    ///
    /// Default: `https://github.com`
    pub web_url: String,

    /// Query `GET /app` once at startup and log the outcome.
    pub check_on_startup: bool,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_owned(),
            web_url: "https://github.com".to_owned(),
            check_on_startup: true,
        }
    }
}

impl GitHubConfig {
    /// `{web_url}/apps/{slug}/installations/new`
    pub fn installation_url(&self, app_slug: &str) -> String {
        format!(
            "{}/apps/{app_slug}/installations/new",
            self.web_url.trim_end_matches('/')
        )
    }
}
