use serde::{Deserialize, Serialize};

use crate::api::config::ApiConfig;
use crate::github::GitHubConfig;
use crate::store::StoreConfig;
use crate::utils::logger::LoggerConfig;

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,

    pub store: StoreConfig,

    pub github: GitHubConfig,

    pub logger: LoggerConfig,
}
