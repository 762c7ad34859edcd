use serde::Deserialize;

pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// A verified webhook delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// `X-GitHub-Delivery`, unique per delivery and reused on redelivery.
    pub id: Option<String>,
    pub event: GitHubEvent,
}

/// Webhook events routed by `X-GitHub-Event`. Only the fields needed for
/// routing are decoded.
#[derive(Debug, Clone)]
pub enum GitHubEvent {
    Ping(PingEvent),
    Installation(InstallationEvent),
    InstallationRepositories(InstallationRepositoriesEvent),
    Issues(IssuesEvent),
    PullRequest(PullRequestEvent),
    Push(PushEvent),
    Repository(RepositoryEvent),
    /// Any event this service does not route explicitly.
    Other { name: String },
}

impl GitHubEvent {
    pub fn parse(name: &str, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match name {
            "ping" => Self::Ping(serde_json::from_slice(body)?),
            "installation" => Self::Installation(serde_json::from_slice(body)?),
            "installation_repositories" => {
                Self::InstallationRepositories(serde_json::from_slice(body)?)
            }
            "issues" => Self::Issues(serde_json::from_slice(body)?),
            "pull_request" => Self::PullRequest(serde_json::from_slice(body)?),
            "push" => Self::Push(serde_json::from_slice(body)?),
            "repository" => Self::Repository(serde_json::from_slice(body)?),
            other => Self::Other {
                name: other.to_owned(),
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Ping(_) => "ping",
            Self::Installation(_) => "installation",
            Self::InstallationRepositories(_) => "installation_repositories",
            Self::Issues(_) => "issues",
            Self::PullRequest(_) => "pull_request",
            Self::Push(_) => "push",
            Self::Repository(_) => "repository",
            Self::Other { name } => name,
        }
    }

    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Installation(e) => Some(&e.action),
            Self::InstallationRepositories(e) => Some(&e.action),
            Self::Issues(e) => Some(&e.action),
            Self::PullRequest(e) => Some(&e.action),
            Self::Repository(e) => Some(&e.action),
            Self::Ping(_) | Self::Push(_) | Self::Other { .. } => None,
        }
    }

    pub fn installation_id(&self) -> Option<u64> {
        let installation = match self {
            Self::Installation(e) => Some(&e.installation),
            Self::InstallationRepositories(e) => Some(&e.installation),
            Self::Issues(e) => e.installation.as_ref(),
            Self::PullRequest(e) => e.installation.as_ref(),
            Self::Push(e) => e.installation.as_ref(),
            Self::Repository(e) => e.installation.as_ref(),
            Self::Ping(_) | Self::Other { .. } => None,
        };
        installation.map(|i| i.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRef {
    pub id: u64,
    #[serde(default)]
    pub account: Option<Account>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryRef {
    pub id: u64,
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    #[serde(default)]
    pub zen: Option<String>,
    #[serde(default)]
    pub hook_id: Option<u64>,
}

/// `created`, `deleted`, `suspend`, `unsuspend`, `new_permissions_accepted`.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationEvent {
    pub action: String,
    pub installation: InstallationRef,
    #[serde(default)]
    pub repositories: Vec<RepositoryRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRepositoriesEvent {
    /// `added` or `removed`.
    pub action: String,
    pub installation: InstallationRef,
    #[serde(default)]
    pub repositories_added: Vec<RepositoryRef>,
    #[serde(default)]
    pub repositories_removed: Vec<RepositoryRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuesEvent {
    pub action: String,
    pub issue: IssueRef,
    pub repository: RepositoryRef,
    #[serde(default)]
    pub installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub repository: RepositoryRef,
    #[serde(default)]
    pub installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub after: Option<String>,
    pub repository: RepositoryRef,
    #[serde(default)]
    pub installation: Option<InstallationRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryEvent {
    pub action: String,
    pub repository: RepositoryRef,
    #[serde(default)]
    pub installation: Option<InstallationRef>,
}
