use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::models::webhook::{
    DELIVERY_HEADER, Delivery, EVENT_HEADER, GitHubEvent, SIGNATURE_HEADER,
};
use crate::api::state::ApiState;
use crate::github::verify_signature;
use crate::store::Store;

/// Why a delivery was refused. Nothing is dispatched for any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRejection {
    MissingSignature,
    SignatureMismatch,
    MissingEventType,
    MalformedPayload,
    HandlerFailed,
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingSignature => (StatusCode::UNAUTHORIZED, "Missing signature"),
            Self::SignatureMismatch => (StatusCode::UNAUTHORIZED, "Invalid signature"),
            Self::MissingEventType => (StatusCode::BAD_REQUEST, "Missing event type"),
            Self::MalformedPayload => (StatusCode::BAD_REQUEST, "Malformed payload"),
            Self::HandlerFailed => (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed"),
        };
        (status, message).into_response()
    }
}

pub async fn receive(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    match receive_impl(&state, &headers, &body).await {
        Ok(status) => status.into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn receive_impl(
    state: &ApiState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, WebhookRejection> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let delivery_id = header(DELIVERY_HEADER).map(str::to_owned);

    let signature = header(SIGNATURE_HEADER).ok_or_else(|| {
        tracing::warn!(delivery_id = ?delivery_id, "webhook rejected: missing signature");
        WebhookRejection::MissingSignature
    })?;

    // Verified against the raw bytes, before any parsing.
    if !verify_signature(state.secrets().webhook_secret.as_bytes(), body, signature) {
        tracing::warn!(delivery_id = ?delivery_id, "webhook rejected: signature mismatch");
        return Err(WebhookRejection::SignatureMismatch);
    }

    let event_name = header(EVENT_HEADER).ok_or_else(|| {
        tracing::warn!(delivery_id = ?delivery_id, "webhook rejected: missing event type");
        WebhookRejection::MissingEventType
    })?;

    let event = GitHubEvent::parse(event_name, body).map_err(|e| {
        tracing::warn!(delivery_id = ?delivery_id, event = event_name, "malformed webhook payload: {e}");
        WebhookRejection::MalformedPayload
    })?;

    // Forgotten on every exit but handler success, including a timeout
    // dropping this future.
    let mut mark = None;
    if let Some(id) = &delivery_id {
        match state.store().mark_delivery(id).await {
            Ok(true) => mark = Some(DeliveryMark::new(state.store(), id)),
            Ok(false) => {
                tracing::info!(delivery_id = %id, event = event_name, "duplicate webhook delivery skipped");
                return Ok(StatusCode::OK);
            }
            // Dispatch anyway when the store is down.
            Err(e) => tracing::error!("failed to record webhook delivery: {e:#}"),
        }
    }

    let delivery = Delivery {
        id: delivery_id,
        event,
    };

    tracing::debug!(
        delivery_id = ?delivery.id,
        event = delivery.event.name(),
        action = ?delivery.event.action(),
        installation_id = ?delivery.event.installation_id(),
        "dispatching webhook"
    );

    if let Err(e) = state.event_handler().handle(&delivery).await {
        tracing::error!(
            delivery_id = ?delivery.id,
            event = delivery.event.name(),
            "webhook handler failed: {e:#}"
        );
        return Err(WebhookRejection::HandlerFailed);
    }

    if let Some(mark) = mark {
        mark.keep();
    }
    Ok(StatusCode::OK)
}

/// Recorded delivery id that is forgotten on drop unless kept.
struct DeliveryMark {
    store: Store,
    delivery_id: Option<String>,
}

impl DeliveryMark {
    fn new(store: &Store, delivery_id: &str) -> Self {
        Self {
            store: store.clone(),
            delivery_id: Some(delivery_id.to_owned()),
        }
    }

    fn keep(mut self) {
        self.delivery_id = None;
    }
}

impl Drop for DeliveryMark {
    fn drop(&mut self) {
        if let Some(delivery_id) = self.delivery_id.take() {
            tracing::debug!(delivery_id = %delivery_id, "forgetting unprocessed webhook delivery");
            self.store.forget_delivery(delivery_id);
        }
    }
}
