//! Admin API handlers, called through `tower::ServiceExt::oneshot` against
//! in-memory state.

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use portal_admin::{AdminState, build_admin_router};
use portal_core::{AggregateStats, AppConfig, ConfigInput, ListenMode, RequestLogProvider, RequestRecord, ServerMode};
use portal_exposure::{ReadyInfo, ReadySummary, WebUi};
use portal_observability::MetricsCollector;
use std::sync::{Arc, Mutex};
use tower::ServiceExt; // .oneshot()

// ── Helper ────────────────────────────────────────────────────

#[derive(Default)]
struct StubProvider {
    records: Mutex<Vec<RequestRecord>>,
}

impl RequestLogProvider for StubProvider {
    fn snapshot(&self) -> Vec<RequestRecord> {
        self.records.lock().unwrap().clone()
    }

    fn reset(&self) {
        self.records.lock().unwrap().clear();
    }

    fn aggregate_stats(&self) -> AggregateStats {
        AggregateStats {
            total_requests: self.records.lock().unwrap().len() as u64,
            ..AggregateStats::default()
        }
    }
}

fn make_state(records: usize) -> (Arc<StubProvider>, Arc<AdminState>) {
    let provider = Arc::new(StubProvider::default());
    for i in 1..=records {
        provider
            .records
            .lock()
            .unwrap()
            .push(RequestRecord::new(format!("req_1_{i}"), "GET", format!("/item/{i}")));
    }
    let state = AdminState::new(provider.clone(), ServerMode::Proxy { target_port: 3000 });
    (provider, Arc::new(state))
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn summary() -> ReadySummary {
    let cfg = AppConfig::from_input(ConfigInput { port: Some(3000), ..Default::default() }).unwrap();
    let ready = ReadyInfo {
        service_url: "http://portal.portal.internal/".into(),
        configured_listen_mode: ListenMode::Listener,
        effective_listen_mode: ListenMode::Listener,
        service_name: None,
        service_fqdn: None,
    };
    ReadySummary::build(&cfg, "standalone", &ready, "http://localhost:5000", &WebUi::Disabled)
}

// ── Requests ──────────────────────────────────────────────────

#[tokio::test]
async fn list_requests_returns_snapshot_in_order() {
    let (_, state) = make_state(3);
    let resp = build_admin_router(state).oneshot(request(Method::GET, "/api/requests")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    let ids: Vec<&str> = json.as_array().unwrap().iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["req_1_1", "req_1_2", "req_1_3"]);
}

#[tokio::test]
async fn delete_requests_clears_log() {
    let (provider, state) = make_state(2);
    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(request(Method::DELETE, "/api/requests"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(provider.snapshot().is_empty());

    let resp = build_admin_router(state).oneshot(request(Method::GET, "/api/requests")).await.unwrap();
    assert_eq!(body_json(resp).await, serde_json::json!([]));
}

#[tokio::test]
async fn stats_reflect_provider() {
    let (_, state) = make_state(4);
    let resp = build_admin_router(state).oneshot(request(Method::GET, "/api/stats")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["total_requests"], 4);
}

// ── Health / endpoint ─────────────────────────────────────────

#[tokio::test]
async fn health_reports_backend_mode() {
    let (_, state) = make_state(0);
    let resp = build_admin_router(state).oneshot(request(Method::GET, "/api/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend_mode"], "proxy");
    assert_eq!(json["backend_url"], "http://localhost:3000");
    assert_eq!(json["ready"], false);
}

#[tokio::test]
async fn endpoint_unavailable_until_ready() {
    let (_, state) = make_state(0);
    let resp = build_admin_router(Arc::clone(&state))
        .oneshot(request(Method::GET, "/api/endpoint"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.set_endpoint(summary());
    let resp = build_admin_router(state).oneshot(request(Method::GET, "/api/endpoint")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["readiness"], "ready");
    assert_eq!(json["service_url"], "http://portal.portal.internal/");
    assert_eq!(json["web_ui_reason"], "disabled_by_configuration");
}

// ── CORS ──────────────────────────────────────────────────────

#[tokio::test]
async fn preflight_allows_same_origin_with_delete() {
    let (_, state) = make_state(0);
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/requests")
        .header(header::HOST, "portal.example.ts.net:8443")
        .header(header::ORIGIN, "http://portal.example.ts.net:8443")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
        .body(Body::empty())
        .unwrap();
    let resp = build_admin_router(state).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let origin = resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap();
    assert_eq!(origin, "http://portal.example.ts.net:8443");
    let methods = resp.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap().to_str().unwrap();
    for method in ["GET", "POST", "DELETE", "OPTIONS"] {
        assert!(methods.contains(method), "{methods}");
    }
}

#[tokio::test]
async fn cross_origin_is_not_allowed() {
    let (_, state) = make_state(0);
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/requests")
        .header(header::HOST, "portal.example.ts.net")
        .header(header::ORIGIN, "http://other.example.ts.net")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .unwrap();
    let resp = build_admin_router(state).oneshot(req).await.unwrap();
    assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

// ── Metrics ───────────────────────────────────────────────────

#[tokio::test]
async fn metrics_disabled_returns_404() {
    let (_, state) = make_state(0);
    let resp = build_admin_router(state).oneshot(request(Method::GET, "/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_render_prometheus_text() {
    let provider = Arc::new(StubProvider::default());
    let metrics = Arc::new(MetricsCollector::new(true).unwrap());
    metrics.record("GET", 200, 0.01, 42);
    let state = AdminState::new(provider, ServerMode::Mock).with_metrics(Arc::clone(&metrics));

    let resp = build_admin_router(Arc::new(state)).oneshot(request(Method::GET, "/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("portal_http_requests_total"), "{text}");
}
