use crate::handlers;
use arc_swap::ArcSwapOption;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use portal_core::{RequestLogProvider, ServerMode};
use portal_exposure::ReadySummary;
use portal_observability::MetricsCollector;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

/// Shared state for the admin API.
pub struct AdminState {
    pub provider: Arc<dyn RequestLogProvider>,
    pub mode: ServerMode,
    /// Startup summary, set once the exposure is ready.
    pub endpoint: ArcSwapOption<ReadySummary>,
    pub metrics: Option<Arc<MetricsCollector>>,
}

impl AdminState {
    pub fn new(provider: Arc<dyn RequestLogProvider>, mode: ServerMode) -> Self {
        Self {
            provider,
            mode,
            endpoint: ArcSwapOption::empty(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn set_endpoint(&self, summary: ReadySummary) {
        self.endpoint.store(Some(Arc::new(summary)));
    }
}

/// Build the axum router with every admin route.
pub fn build_admin_router(state: Arc<AdminState>) -> Router {
    let api = Router::new()
        .route(
            "/requests",
            get(handlers::requests::list_requests).delete(handlers::requests::clear_requests),
        )
        .route("/stats", get(handlers::requests::stats))
        .route("/health", get(handlers::health::health_check))
        .route("/endpoint", get(handlers::health::endpoint))
        .layer(cors_layer());

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Browsers may only call the API from the page it serves.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(is_same_origin))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

fn is_same_origin(origin: &HeaderValue, parts: &Parts) -> bool {
    let Some(host) = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
    else {
        return false;
    };
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .is_some_and(|authority| authority.eq_ignore_ascii_case(host))
}

async fn metrics_handler(State(state): State<Arc<AdminState>>) -> Response {
    match &state.metrics {
        Some(metrics) if metrics.is_enabled() => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render(),
        )
            .into_response(),
        _ => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

// ── Server ──────────────────────────────────────────────────────

/// Admin API bound to a local port.
pub struct AdminServer {
    listener: TcpListener,
    state: Arc<AdminState>,
}

impl AdminServer {
    pub async fn bind(addr: SocketAddr, state: Arc<AdminState>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;
        let app = build_admin_router(self.state);
        info!(component = "admin", addr = %addr, "Starting admin API server");
        axum::serve(self.listener, app).with_graceful_shutdown(shutdown).await?;
        info!(component = "admin", "Admin API server stopped");
        Ok(())
    }
}
