use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::api::config::{ApiConfig, GitHubAppSecrets, GitHubAppSettings};
use crate::api::endpoint::ApiEndpoint;
use crate::api::models::install::StartInstallResponse;
use crate::api::models::webhook::{Delivery, GitHubEvent};
use crate::api::state::ApiState;
use crate::events::EventHandler;
use crate::github::sign_payload;
use crate::store::{Store, StoreConfig};

const FRONTEND: &str = "https://frontend";
const WEBHOOK_SECRET: &str = "webhook-secret";

#[derive(Default)]
struct RecordingHandler {
    deliveries: Mutex<Vec<Delivery>>,
    fail: AtomicBool,
}

impl RecordingHandler {
    fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

impl EventHandler for RecordingHandler {
    fn handle<'a>(&'a self, delivery: &'a Delivery) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.deliveries.lock().unwrap().push(delivery.clone());
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("downstream unavailable");
            }
            Ok(())
        })
    }
}

struct TestApp {
    router: axum::Router,
    events: Arc<RecordingHandler>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_store_config(StoreConfig::default())
    }

    fn with_store_config(store_config: StoreConfig) -> Self {
        let events = Arc::new(RecordingHandler::default());
        let state = test_state(ApiConfig::default(), store_config, events.clone());

        Self {
            router: ApiEndpoint::builder().router(state),
            events,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn start(&self, body: &str) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/auth/github/app/install/start")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        self.send(request).await
    }

    async fn issue_state(&self, body: &str) -> String {
        let response = self.start(body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response: StartInstallResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        response.state
    }

    async fn webhook(
        &self,
        event: &str,
        delivery: Option<&str>,
        body: &[u8],
        signature: Option<String>,
    ) -> Response {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/github")
            .header(CONTENT_TYPE, "application/json")
            .header("X-GitHub-Event", event);
        if let Some(delivery) = delivery {
            request = request.header("X-GitHub-Delivery", delivery);
        }
        if let Some(signature) = signature {
            request = request.header("X-Hub-Signature-256", signature);
        }
        self.send(request.body(Body::from(body.to_vec())).unwrap())
            .await
    }
}

fn test_state(
    api_config: ApiConfig,
    store_config: StoreConfig,
    events: Arc<dyn EventHandler>,
) -> ApiState {
    let settings = GitHubAppSettings {
        frontend_base_url: FRONTEND.to_owned(),
        public_base_url: "https://api.example.com".to_owned(),
        app_slug: "acme-bot".to_owned(),
        app_id: None,
    };
    let secrets = GitHubAppSecrets {
        webhook_secret: WEBHOOK_SECRET.to_owned(),
        private_key_pem: None,
    };

    ApiState::builder()
        .with_config(api_config)
        .with_app(settings, secrets)
        .with_store(Store::memory(&store_config))
        .with_event_handler(events)
        .build()
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(LOCATION)
        .expect("redirect without Location")
        .to_str()
        .unwrap()
}

fn sign(body: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET.as_bytes(), body)
}

const INSTALLATION_CREATED: &[u8] =
    br#"{"action":"created","installation":{"id":123,"account":{"login":"octo-org"}}}"#;

// ── Start ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_returns_installation_url_with_state() {
    let app = TestApp::new();

    let response = app.start("").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: StartInstallResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.state.len(), 32);
    assert_eq!(
        body.install_url,
        format!(
            "https://github.com/apps/acme-bot/installations/new?state={}",
            body.state
        )
    );
}

#[tokio::test]
async fn start_issues_distinct_states() {
    let app = TestApp::new();
    let first = app.issue_state("{}").await;
    let second = app.issue_state("{}").await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn start_rejects_foreign_return_to() {
    let app = TestApp::new();

    for body in [
        r#"{"return_to":"https://evil.example"}"#,
        r#"{"return_to":"//evil.example"}"#,
        "not json",
    ] {
        let response = app.start(body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn start_via_get_redirects_to_github() {
    let app = TestApp::new();

    let response = app.get("/auth/github/app/install/start").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(
        location(&response)
            .starts_with("https://github.com/apps/acme-bot/installations/new?state="),
        "{}",
        location(&response)
    );
}

// ── Callback ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn callback_with_valid_state_redirects_to_dashboard() {
    let app = TestApp::new();
    let state = app.issue_state("").await;

    let response = app
        .get(&format!(
            "/auth/github/app/install/callback?installation_id=123&setup_action=install&state={state}"
        ))
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://frontend/dashboard?github_app_installed=true"
    );
}

#[tokio::test]
async fn callback_without_params_is_a_cancellation_redirect() {
    let app = TestApp::new();

    let response = app.get("/auth/github/app/install/callback").await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://frontend/dashboard");
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn replayed_state_is_not_a_second_success() {
    let app = TestApp::new();
    let state = app.issue_state("").await;
    let uri = format!("/auth/github/app/install/callback?installation_id=123&state={state}");

    let first = app.get(&uri).await;
    assert_eq!(
        location(&first),
        "https://frontend/dashboard?github_app_installed=true"
    );

    let second = app.get(&uri).await;
    assert_eq!(second.status(), StatusCode::FOUND);
    assert_eq!(
        location(&second),
        "https://frontend/dashboard?github_app_installed=false&error=invalid_state"
    );
}

#[tokio::test]
async fn callback_never_trusts_installation_id_without_state() {
    let app = TestApp::new();

    let missing = app
        .get("/auth/github/app/install/callback?installation_id=123")
        .await;
    assert_eq!(
        location(&missing),
        "https://frontend/dashboard?github_app_installed=false&error=missing_state"
    );

    let forged = app
        .get("/auth/github/app/install/callback?installation_id=123&state=forged")
        .await;
    assert_eq!(
        location(&forged),
        "https://frontend/dashboard?github_app_installed=false&error=invalid_state"
    );
}

#[tokio::test]
async fn expired_state_is_invalid() {
    let app = TestApp::with_store_config(StoreConfig {
        state_ttl: Duration::ZERO,
        ..Default::default()
    });
    let state = app.issue_state("").await;

    let response = app
        .get(&format!(
            "/auth/github/app/install/callback?installation_id=123&state={state}"
        ))
        .await;
    assert_eq!(
        location(&response),
        "https://frontend/dashboard?github_app_installed=false&error=invalid_state"
    );
}

#[tokio::test]
async fn cancellation_burns_the_state() {
    let app = TestApp::new();
    let state = app.issue_state("").await;

    let cancelled = app
        .get(&format!("/auth/github/app/install/callback?state={state}"))
        .await;
    assert_eq!(location(&cancelled), "https://frontend/dashboard");

    let late = app
        .get(&format!(
            "/auth/github/app/install/callback?installation_id=123&state={state}"
        ))
        .await;
    assert_eq!(
        location(&late),
        "https://frontend/dashboard?github_app_installed=false&error=invalid_state"
    );
}

#[tokio::test]
async fn callback_returns_to_requested_path() {
    let app = TestApp::new();
    let state = app
        .issue_state(r#"{"return_to":"/settings/integrations"}"#)
        .await;

    let response = app
        .get(&format!(
            "/auth/github/app/install/callback?installation_id=77&state={state}"
        ))
        .await;
    assert_eq!(
        location(&response),
        "https://frontend/settings/integrations?github_app_installed=true"
    );
}

#[tokio::test]
async fn malformed_installation_id_is_invalid() {
    let app = TestApp::new();
    let state = app.issue_state("").await;

    let response = app
        .get(&format!(
            "/auth/github/app/install/callback?installation_id=abc&state={state}"
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://frontend/dashboard?github_app_installed=false&error=invalid_installation_id"
    );
}

// ── Webhooks ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn signed_webhook_is_dispatched() {
    let app = TestApp::new();

    let response = app
        .webhook(
            "installation",
            Some("d-1"),
            INSTALLATION_CREATED,
            Some(sign(INSTALLATION_CREATED)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let deliveries = app.events.deliveries.lock().unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].id.as_deref(), Some("d-1"));
    assert!(matches!(
        &deliveries[0].event,
        GitHubEvent::Installation(e) if e.action == "created" && e.installation.id == 123
    ));
}

#[tokio::test]
async fn tampered_webhook_is_rejected() {
    let app = TestApp::new();
    let signature = sign(INSTALLATION_CREATED);

    let mut tampered = INSTALLATION_CREATED.to_vec();
    let last = tampered.len() - 2;
    tampered[last] = b'4';

    let response = app
        .webhook("installation", Some("d-1"), &tampered, Some(signature.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.events.count(), 0);
}

#[tokio::test]
async fn unsigned_webhook_is_rejected() {
    let app = TestApp::new();

    let response = app
        .webhook("installation", Some("d-1"), INSTALLATION_CREATED, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.events.count(), 0);
}

#[tokio::test]
async fn webhook_signed_with_another_secret_is_rejected() {
    let app = TestApp::new();
    let signature = sign_payload(b"oauth-client-secret", INSTALLATION_CREATED);

    let response = app
        .webhook("installation", None, INSTALLATION_CREATED, Some(signature.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.events.count(), 0);
}

#[tokio::test]
async fn duplicate_delivery_is_dispatched_once() {
    let app = TestApp::new();
    let signature = sign(INSTALLATION_CREATED);

    for _ in 0..2 {
        let response = app
            .webhook("installation", Some("d-7"), INSTALLATION_CREATED, Some(signature.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(app.events.count(), 1);
}

#[tokio::test]
async fn failed_delivery_can_be_redelivered() {
    let app = TestApp::new();
    let signature = sign(INSTALLATION_CREATED);

    app.events.fail.store(true, Ordering::SeqCst);
    let response = app
        .webhook("installation", Some("d-9"), INSTALLATION_CREATED, Some(signature.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    app.events.fail.store(false, Ordering::SeqCst);
    let response = app
        .webhook("installation", Some("d-9"), INSTALLATION_CREATED, Some(signature.clone()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.events.count(), 2);
}

/// Takes longer than the request timeout on its first call only.
#[derive(Default)]
struct SlowFirstHandler {
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl EventHandler for SlowFirstHandler {
    fn handle<'a>(&'a self, _delivery: &'a Delivery) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.started.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test]
async fn timed_out_delivery_can_be_redelivered() {
    let events = Arc::new(SlowFirstHandler::default());
    let api_config = ApiConfig {
        request_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let app = TestApp {
        router: ApiEndpoint::builder().router(test_state(
            api_config,
            StoreConfig::default(),
            events.clone(),
        )),
        events: Default::default(),
    };
    let signature = sign(INSTALLATION_CREATED);

    let first = app
        .webhook("installation", Some("d-slow"), INSTALLATION_CREATED, Some(signature.clone()))
        .await;
    assert_eq!(first.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(events.finished.load(Ordering::SeqCst), 0);

    let second = app
        .webhook("installation", Some("d-slow"), INSTALLATION_CREATED, Some(signature.clone()))
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(events.started.load(Ordering::SeqCst), 2);
    assert_eq!(events.finished.load(Ordering::SeqCst), 1);

    let third = app
        .webhook("installation", Some("d-slow"), INSTALLATION_CREATED, Some(signature))
        .await;
    assert_eq!(third.status(), StatusCode::OK);
    assert_eq!(events.started.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn malformed_known_event_is_rejected() {
    let app = TestApp::new();
    let body = br#"{"action":"opened"}"#;

    let response = app
        .webhook("pull_request", Some("d-2"), body, Some(sign(body)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.events.count(), 0);
}

#[tokio::test]
async fn unrouted_event_is_acknowledged() {
    let app = TestApp::new();
    let body = br#"{"action":"completed"}"#;

    let response = app
        .webhook("check_run", Some("d-3"), body, Some(sign(body)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let deliveries = app.events.deliveries.lock().unwrap();
    assert!(matches!(&deliveries[0].event, GitHubEvent::Other { name } if name == "check_run"));
}

#[tokio::test]
async fn webhook_without_event_type_is_rejected() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/github")
        .header("X-Hub-Signature-256", sign(INSTALLATION_CREATED))
        .body(Body::from(INSTALLATION_CREATED))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.events.count(), 0);
}

// ── Health ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn liveness_answers_timestamp() {
    let app = TestApp::new();

    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.parse::<u128>().is_ok(), "{body}");
}

#[tokio::test]
async fn github_health_without_credentials_is_unavailable() {
    let app = TestApp::new();

    let response = app.get("/health/github").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
