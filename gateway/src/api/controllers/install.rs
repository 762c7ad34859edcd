use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, RawQuery, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::api::models::install::{
    CallbackResult, InstallCallbackQuery, StartInstallRequest, StartInstallResponse, StateLookup,
    validate_return_to,
};
use crate::api::state::ApiState;

// ── Start ─────────────────────────────────────────────────────────────────────

/// `POST`: answers the installation URL as JSON for the frontend to follow.
pub async fn start(State(state): State<ApiState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartInstallRequest::default()
    } else {
        match serde_json::from_slice::<StartInstallRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("bad install start body: {e}");
                return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
            }
        }
    };

    match start_impl(&state, request.return_to).await {
        Ok(response) => Json(response).into_response(),
        Err(rejection) => rejection,
    }
}

/// `GET`: same as [`start`], but navigates the browser directly.
pub async fn start_redirect(
    State(state): State<ApiState>,
    Query(request): Query<StartInstallRequest>,
) -> Response {
    match start_impl(&state, request.return_to).await {
        Ok(response) => found(&response.install_url),
        Err(rejection) => rejection,
    }
}

async fn start_impl(
    state: &ApiState,
    return_to: Option<String>,
) -> Result<StartInstallResponse, Response> {
    let return_to = return_to.filter(|path| !path.is_empty());
    if let Some(path) = &return_to {
        validate_return_to(path).map_err(|e| (StatusCode::BAD_REQUEST, e).into_response())?;
    }

    let csrf_state = state
        .issue_install_state(return_to)
        .await
        .map_err(|e| {
            tracing::error!("failed to issue installation state: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start installation").into_response()
        })?;

    let install_url = state
        .github_config()
        .installation_url(&state.settings().app_slug);
    let mut install_url = Url::parse(&install_url).map_err(|e| {
        tracing::error!("invalid installation URL: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start installation").into_response()
    })?;
    install_url
        .query_pairs_mut()
        .append_pair("state", &csrf_state);

    tracing::info!("GitHub App installation initiated");

    Ok(StartInstallResponse {
        install_url: install_url.into(),
        state: csrf_state,
    })
}

// ── Callback ──────────────────────────────────────────────────────────────────

/// GitHub's browser redirect after the installation screen.
///
/// Always answers with a redirect to the frontend: the browser is mid
/// navigation and cannot render an API error.
pub async fn callback(State(state): State<ApiState>, RawQuery(raw): RawQuery) -> Response {
    let pairs: BTreeMap<String, String> = raw
        .as_deref()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    tracing::info!(query = ?pairs, "GitHub App installation callback received");

    let query = InstallCallbackQuery::from_pairs(&pairs);
    let result = callback_impl(&state, &query).await;

    let frontend = &state.settings().frontend_base_url;
    let location = result.redirect_url(frontend).unwrap_or_else(|e| {
        tracing::error!("failed to build redirect URL: {e}");
        frontend.clone()
    });

    match &result {
        CallbackResult::Success {
            installation_id, ..
        } => {
            tracing::info!(installation_id, setup_action = ?query.setup_action, "GitHub App installed");
        }
        CallbackResult::Cancelled { .. } => {
            tracing::info!(setup_action = ?query.setup_action, "GitHub App installation cancelled");
        }
        CallbackResult::Invalid(reason) => {
            tracing::warn!(
                reason = reason.code(),
                installation_id = ?query.installation_id,
                "GitHub App installation callback rejected"
            );
        }
    }

    found(&location)
}

async fn callback_impl(state: &ApiState, query: &InstallCallbackQuery) -> CallbackResult {
    // The state is burnt even on cancellation so it can never be replayed.
    let lookup = match &query.state {
        None => StateLookup::Absent,
        Some(nonce) => match state.consume_install_state(nonce).await {
            Ok(Some(record)) => StateLookup::Found(record.return_to),
            Ok(None) => StateLookup::NotFound,
            Err(e) => {
                tracing::error!("failed to consume installation state: {e:#}");
                StateLookup::Failed
            }
        },
    };

    CallbackResult::classify(query.installation_id.as_deref(), lookup)
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_owned())]).into_response()
}
