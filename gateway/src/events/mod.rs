use anyhow::Result;
use futures_util::future::BoxFuture;

use crate::api::models::webhook::{Delivery, GitHubEvent};

/// Downstream consumer of verified webhook deliveries, e.g. a sync service.
///
/// An error makes the receiver answer `500` and forget the delivery id, so a
/// redelivery from GitHub is processed again.
pub trait EventHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<()>>;
}

/// Writes one structured log line per delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventHandler;

impl EventHandler for LogEventHandler {
    fn handle<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<()>> {
        log_delivery(delivery);
        Box::pin(futures_util::future::ready(Ok(())))
    }
}

fn log_delivery(delivery: &Delivery) {
    let delivery_id = delivery.id.as_deref().unwrap_or("-");

    match &delivery.event {
        GitHubEvent::Ping(e) => {
            tracing::info!(delivery_id, hook_id = ?e.hook_id, zen = ?e.zen, "webhook ping");
        }
        GitHubEvent::Installation(e) => {
            let account = e.installation.account.as_ref();
            tracing::info!(
                delivery_id,
                installation_id = e.installation.id,
                action = %e.action,
                account = ?account.map(|a| a.login.as_str()),
                account_type = ?account.and_then(|a| a.kind.as_deref()),
                repositories = e.repositories.len(),
                "installation event"
            );
        }
        GitHubEvent::InstallationRepositories(e) => {
            tracing::info!(
                delivery_id,
                installation_id = e.installation.id,
                action = %e.action,
                added = ?names(&e.repositories_added),
                removed = ?names(&e.repositories_removed),
                "installation repositories changed"
            );
        }
        GitHubEvent::Issues(e) => {
            tracing::info!(
                delivery_id,
                repo = %e.repository.full_name,
                repo_id = e.repository.id,
                issue = e.issue.number,
                title = %e.issue.title,
                action = %e.action,
                "issue event"
            );
        }
        GitHubEvent::PullRequest(e) => {
            tracing::info!(
                delivery_id,
                repo = %e.repository.full_name,
                repo_id = e.repository.id,
                pull_request = e.number,
                action = %e.action,
                "pull request event"
            );
        }
        GitHubEvent::Push(e) => {
            tracing::info!(
                delivery_id,
                repo = %e.repository.full_name,
                repo_id = e.repository.id,
                git_ref = %e.git_ref,
                after = ?e.after,
                "push event"
            );
        }
        GitHubEvent::Repository(e) => {
            tracing::info!(
                delivery_id,
                repo = %e.repository.full_name,
                repo_id = e.repository.id,
                action = %e.action,
                "repository event"
            );
        }
        GitHubEvent::Other { name } => {
            tracing::debug!(delivery_id, event = %name, "ignoring webhook event");
        }
    }
}

fn names(repos: &[crate::api::models::webhook::RepositoryRef]) -> Vec<&str> {
    repos.iter().map(|r| r.full_name.as_str()).collect()
}
