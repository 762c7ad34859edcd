use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::api::state::ApiState;
use crate::utils::time::now_millis;

/// Liveness probe: current Unix time in milliseconds.
pub async fn live() -> String {
    now_millis().to_string()
}

/// Checks that GitHub accepts the app credentials.
pub async fn github(State(state): State<ApiState>) -> Response {
    let Some(client) = state.github_client() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "GitHub App credentials not configured")
            .into_response();
    };

    match client.fetch_app().await {
        Ok(app) => Json(app).into_response(),
        Err(e) => {
            tracing::warn!(app_id = client.app_id(), "GitHub upstream unreachable: {e:#}");
            (StatusCode::SERVICE_UNAVAILABLE, "GitHub unreachable").into_response()
        }
    }
}
