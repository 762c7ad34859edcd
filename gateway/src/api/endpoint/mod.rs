use anyhow::Result;
use axum::extract::{DefaultBodyLimit, FromRef};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::api::config::{INSTALL_CALLBACK_PATH, INSTALL_START_PATH, WEBHOOK_PATH};
use crate::api::controllers;
use crate::api::state::*;

pub struct ApiEndpointBuilder {
    common: ApiEndpointBuilderCommon,
}

impl Default for ApiEndpointBuilder {
    #[inline]
    fn default() -> Self {
        Self {
            common: Default::default(),
        }
    }
}

impl ApiEndpointBuilder {
    pub async fn bind(self, state: ApiState) -> Result<ApiEndpoint> {
        let listener = state.bind_socket().await?;
        Ok(ApiEndpoint::from_parts(listener, self.router(state)))
    }

    /// Complete router with middleware and state applied.
    pub fn router(self, state: ApiState) -> axum::Router<()> {
        use tower::ServiceBuilder;
        use tower_http::timeout::TimeoutLayer;

        let service = ServiceBuilder::new()
            .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
            .layer(cors_layer(&state.settings().frontend_base_url))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                state.config().request_timeout,
            ));

        #[cfg(feature = "compression")]
        let service = service.layer(tower_http::compression::CompressionLayer::new().gzip(true));

        self.common.build().layer(service).with_state(state)
    }
}

struct ApiEndpointBuilderCommon {
    healthcheck_route: Option<String>,
}

impl Default for ApiEndpointBuilderCommon {
    fn default() -> Self {
        Self {
            healthcheck_route: Some("/".to_owned()),
        }
    }
}

impl ApiEndpointBuilderCommon {
    fn build<S>(self) -> axum::Router<S>
    where
        ApiState: FromRef<S>,
        S: Clone + Send + Sync + 'static,
    {
        let mut router = axum::Router::new();

        if let Some(route) = self.healthcheck_route {
            router = router.route(&route, get(controllers::health::live));
        }

        router
            .route("/health/github", get(controllers::health::github))
            .merge(install_router())
            .merge(webhook_router())
    }
}

pub struct ApiEndpoint {
    listener: TcpListener,
    router: axum::Router<()>,
}

impl ApiEndpoint {
    pub fn builder() -> ApiEndpointBuilder {
        ApiEndpointBuilder::default()
    }

    pub fn from_parts(listener: TcpListener, router: axum::Router<()>) -> Self {
        Self { listener, router }
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }
}

fn install_router<S>() -> axum::Router<S>
where
    ApiState: FromRef<S>,
    S: Clone + Send + Sync + 'static,
{
    axum::Router::new()
        .route(
            INSTALL_START_PATH,
            post(controllers::install::start).get(controllers::install::start_redirect),
        )
        .route(INSTALL_CALLBACK_PATH, get(controllers::install::callback))
}

fn webhook_router<S>() -> axum::Router<S>
where
    ApiState: FromRef<S>,
    S: Clone + Send + Sync + 'static,
{
    axum::Router::new().route(WEBHOOK_PATH, post(controllers::webhook::receive))
}

/// Only the frontend calls the API from a browser.
fn cors_layer(frontend_base_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let origin = url::Url::parse(frontend_base_url)
        .ok()
        .map(|url| url.origin().ascii_serialization())
        .and_then(|origin| HeaderValue::from_str(&origin).ok());

    match origin {
        Some(origin) => layer.allow_origin(origin),
        None => layer,
    }
}

/// GitHub caps webhook payloads at 25 MB.
const MAX_REQUEST_SIZE: usize = 25 << 20;
