use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LANDING_PATH: &str = "/dashboard";
pub const INSTALLED_FLAG: &str = "github_app_installed";

/// Optional body of `POST /auth/github/app/install/start`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartInstallRequest {
    /// Frontend path to return to after the installation.
    pub return_to: Option<String>,
}

/// Returned to the frontend, which performs the navigation itself.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartInstallResponse {
    pub install_url: String,
    pub state: String,
}

/// Query parameters GitHub appends to the setup (callback) URL.
///
/// Every field is optional: the endpoint must never reject a browser
/// navigation because of its query string.
#[derive(Debug, Default)]
pub struct InstallCallbackQuery {
    pub installation_id: Option<String>,
    pub state: Option<String>,
    pub setup_action: Option<String>,
}

impl InstallCallbackQuery {
    pub fn from_pairs(pairs: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| pairs.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            installation_id: get("installation_id"),
            state: get("state"),
            setup_action: get("setup_action"),
        }
    }
}

/// Outcome of an installation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Success {
        installation_id: u64,
        return_to: Option<String>,
    },
    /// No `installation_id`: the user backed out, or the URL was hit directly.
    Cancelled { return_to: Option<String> },
    Invalid(InvalidReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// `installation_id` without any `state`.
    MissingState,
    /// `state` was never issued, has expired, or was already consumed.
    UnknownState,
    MalformedInstallationId,
    /// The state store could not be reached.
    StoreUnavailable,
}

impl InvalidReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingState => "missing_state",
            Self::UnknownState => "invalid_state",
            Self::MalformedInstallationId => "invalid_installation_id",
            Self::StoreUnavailable => "state_unavailable",
        }
    }
}

/// What the state store said about the `state` parameter.
#[derive(Debug)]
pub enum StateLookup<T> {
    Absent,
    Found(T),
    NotFound,
    Failed,
}

impl CallbackResult {
    /// Decides the outcome. `installation_id` is only trusted together with a
    /// state this service issued.
    pub fn classify(
        installation_id: Option<&str>,
        state: StateLookup<Option<String>>,
    ) -> Self {
        let Some(raw_id) = installation_id else {
            let return_to = match state {
                StateLookup::Found(return_to) => return_to,
                _ => None,
            };
            return Self::Cancelled { return_to };
        };

        let Some(installation_id) = parse_installation_id(raw_id) else {
            return Self::Invalid(InvalidReason::MalformedInstallationId);
        };

        match state {
            StateLookup::Found(return_to) => Self::Success {
                installation_id,
                return_to,
            },
            StateLookup::Absent => Self::Invalid(InvalidReason::MissingState),
            StateLookup::NotFound => Self::Invalid(InvalidReason::UnknownState),
            StateLookup::Failed => Self::Invalid(InvalidReason::StoreUnavailable),
        }
    }

    /// Browser redirect target under `frontend_base_url`.
    pub fn redirect_url(&self, frontend_base_url: &str) -> Result<String, url::ParseError> {
        let (path, flags) = match self {
            Self::Success { return_to, .. } => (
                return_to.as_deref().unwrap_or(DEFAULT_LANDING_PATH),
                vec![(INSTALLED_FLAG, "true")],
            ),
            Self::Cancelled { return_to } => {
                (return_to.as_deref().unwrap_or(DEFAULT_LANDING_PATH), vec![])
            }
            Self::Invalid(reason) => (
                DEFAULT_LANDING_PATH,
                vec![(INSTALLED_FLAG, "false"), ("error", reason.code())],
            ),
        };

        let mut url = url::Url::parse(&format!("{frontend_base_url}{path}"))?;
        if !flags.is_empty() {
            url.query_pairs_mut().extend_pairs(flags);
        }
        Ok(url.into())
    }
}

/// Positive GitHub installation id.
pub fn parse_installation_id(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id > 0)
}

/// Accepts only paths on the frontend origin, to rule out open redirects.
pub fn validate_return_to(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("return_to must start with '/'");
    }
    if path.starts_with("//") {
        return Err("return_to must not be protocol-relative");
    }
    if path.contains('\\') || path.chars().any(char::is_control) {
        return Err("return_to contains forbidden characters");
    }
    if path.len() > 512 {
        return Err("return_to is too long");
    }
    Ok(())
}
