use crate::BoxError;
use crate::access::{AccessDecision, AccessGate};
use crate::capture::{CaptureBody, CaptureSummary, GatewayBody, format_body_preview};
use crate::forward::Forwarder;
use crate::mock;
use crate::request_log::RequestLog;
use crate::source_ip;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::upgrade::OnUpgrade;
use portal_core::record::HeaderValues;
use portal_core::{
    AggregateStats, ConnectionContext, PortalError, RequestLogProvider, RequestObserver, RequestRecord,
    ResponseRecord, ServerMode,
};
use portal_observability::StatsTracker;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Request bodies at or above this size are forwarded but not logged.
pub const MAX_LOGGED_BODY: u64 = 10 * 1024 * 1024;

const PUMP_DEPTH: usize = 8;

// ── Gateway ─────────────────────────────────────────────────────

/// The capture pipeline: admission, mock or proxy dispatch, response
/// capture, then fan-out to the request log and observers.
///
/// Cheap to clone; every clone shares one request log and one ID counter.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    next_id: AtomicU64,
    mode: ServerMode,
    forwarder: Option<Forwarder>,
    gate: AccessGate,
    log: RequestLog,
    observers: RwLock<Vec<Arc<dyn RequestObserver>>>,
    stats: Arc<StatsTracker>,
}

impl Gateway {
    pub fn new(mode: ServerMode, gate: AccessGate, max_logs: usize) -> Result<Self, PortalError> {
        let forwarder = match mode {
            ServerMode::Mock => None,
            ServerMode::Proxy { target_port } => Some(Forwarder::new(target_port)?),
        };
        Ok(Self::with_forwarder(mode, forwarder, gate, max_logs))
    }

    fn with_forwarder(mode: ServerMode, forwarder: Option<Forwarder>, gate: AccessGate, max_logs: usize) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                next_id: AtomicU64::new(0),
                mode,
                forwarder,
                gate,
                log: RequestLog::new(max_logs),
                observers: RwLock::new(Vec::new()),
                stats: Arc::new(StatsTracker::new()),
            }),
        }
    }

    pub fn mode(&self) -> ServerMode {
        self.inner.mode
    }

    pub fn gate(&self) -> &AccessGate {
        &self.inner.gate
    }

    pub fn stats(&self) -> Arc<StatsTracker> {
        Arc::clone(&self.inner.stats)
    }

    /// Register an observer. Observers run in registration order.
    pub fn add_observer(&self, observer: Arc<dyn RequestObserver>) {
        match self.inner.observers.write() {
            Ok(mut list) => list.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// `req_<unix-secs>_<n>`, with `n` counting from 1 per gateway.
    pub fn next_request_id(&self) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!("req_{secs}_{n}")
    }

    /// Handle one request end to end.
    ///
    /// The record is published when the returned body completes or is
    /// dropped, so the captured size always matches what the client got.
    /// If this future is dropped first, the record is published with
    /// status 499.
    pub async fn serve<B>(&self, req: Request<B>, ctx: ConnectionContext) -> Response<CaptureBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + Send,
    {
        let (mut parts, body) = req.into_parts();

        let mut record = RequestRecord::new(self.next_request_id(), parts.method.as_str(), parts.uri.to_string());
        record.remote_addr = ctx.remote_addr.clone();
        record.headers = capture_headers(&parts.headers);
        record.user_agent = header_str(&parts.headers, header::USER_AGENT).to_string();
        record.content_type = header_str(&parts.headers, header::CONTENT_TYPE).to_string();
        let declared = declared_length(&parts.headers);
        record.size = declared;

        info!(
            component = "proxy_server",
            request_id = %record.id,
            method = %parts.method,
            path = %parts.uri.path(),
            remote_addr = %ctx.remote_addr,
            "Request received"
        );
        let mut in_flight = InFlight::start(Arc::clone(&self.inner), record);

        let inbound = read_inbound(body, declared).await;
        in_flight.record.body = String::from_utf8_lossy(&inbound.logged).into_owned();

        let decision = self.inner.gate.evaluate(&parts.headers, &ctx);
        decision.log(parts.method.as_str(), parts.uri.path());

        let response = match (&decision, self.inner.forwarder.as_ref()) {
            (AccessDecision::Denied { .. }, _) => forbidden(),
            (_, None) => mock::mock_response(&parts.method, &parts.uri, &parts.headers, inbound.logged.len()),
            (_, Some(forwarder)) => {
                let peer_ip = source_ip::parse_ip_value(&ctx.remote_addr);
                let client_upgrade = parts.extensions.remove::<OnUpgrade>();
                forwarder.forward(&parts, inbound.forward, peer_ip, client_upgrade).await
            }
        };

        let (resp_parts, resp_body) = response.into_parts();
        let status = resp_parts.status.as_u16();
        let resp_headers = capture_headers(&resp_parts.headers);
        let resp_content_type = header_str(&resp_parts.headers, header::CONTENT_TYPE).to_string();

        let (inner, start, mut record) = in_flight.hand_off();
        let body = CaptureBody::new(resp_body, move |summary: CaptureSummary| {
            record.status_code = status;
            record.response = ResponseRecord {
                status_code: status,
                headers: resp_headers,
                body: format_body_preview(&resp_content_type, &summary.preview),
                body_truncated: summary.truncated,
                size: summary.size,
            };
            record.duration = start.elapsed();
            inner.complete(record);
        });
        Response::from_parts(resp_parts, body)
    }
}

/// Status recorded for a request whose client went away before a response.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Owns a request's stats slot and record until the response body takes over.
///
/// Dropping it armed publishes the record as a 499.
struct InFlight {
    inner: Arc<GatewayInner>,
    record: RequestRecord,
    start: Instant,
    armed: bool,
}

impl InFlight {
    fn start(inner: Arc<GatewayInner>, record: RequestRecord) -> Self {
        inner.stats.request_started();
        Self { inner, record, start: Instant::now(), armed: true }
    }

    fn hand_off(mut self) -> (Arc<GatewayInner>, Instant, RequestRecord) {
        self.armed = false;
        let record = std::mem::replace(&mut self.record, RequestRecord::new("", "", ""));
        (Arc::clone(&self.inner), self.start, record)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut record = std::mem::replace(&mut self.record, RequestRecord::new("", "", ""));
        record.status_code = CLIENT_CLOSED_REQUEST;
        record.response.status_code = CLIENT_CLOSED_REQUEST;
        record.duration = self.start.elapsed();
        debug!(
            component = "proxy_server",
            request_id = %record.id,
            "Client went away before the response"
        );
        self.inner.complete(record);
    }
}

impl GatewayInner {
    fn complete(&self, record: RequestRecord) {
        self.stats.request_finished(record.duration);
        self.log.push(record.clone());

        // Snapshot so an observer may register another without deadlocking.
        let observers: Vec<Arc<dyn RequestObserver>> = match self.observers.read() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in observers {
            observer.notify(record.clone());
        }
    }
}

impl RequestLogProvider for Gateway {
    fn snapshot(&self) -> Vec<RequestRecord> {
        self.inner.log.snapshot()
    }

    fn reset(&self) {
        self.inner.log.clear();
        self.inner.stats.reset();
    }

    fn aggregate_stats(&self) -> AggregateStats {
        self.inner.stats.snapshot()
    }
}

// ── Responses ───────────────────────────────────────────────────

fn forbidden() -> Response<GatewayBody> {
    let mut resp = Response::new(
        Full::new(Bytes::from_static(b"Forbidden"))
            .map_err(|e: Infallible| match e {})
            .boxed_unsync(),
    );
    *resp.status_mut() = StatusCode::FORBIDDEN;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}

// ── Inbound body ────────────────────────────────────────────────

/// The request body as logged and as it will be forwarded.
struct Inbound {
    /// Empty when the body was too large to log.
    logged: Bytes,
    forward: reqwest::Body,
}

async fn read_inbound<B>(body: B, declared: Option<u64>) -> Inbound
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    let mut body = Box::pin(body);
    if declared.is_some_and(|n| n >= MAX_LOGGED_BODY) {
        return Inbound {
            logged: Bytes::new(),
            forward: pump(Bytes::new(), body),
        };
    }

    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                let Ok(data) = frame.into_data() else { continue };
                buf.extend_from_slice(&data);
                if buf.len() as u64 >= MAX_LOGGED_BODY {
                    debug!(read = buf.len(), "Request body exceeds log ceiling; streaming remainder");
                    return Inbound {
                        logged: Bytes::new(),
                        forward: pump(buf.freeze(), body),
                    };
                }
            }
            Err(e) => {
                let e: BoxError = e.into();
                debug!(error = %e, read = buf.len(), "Request body read failed");
                let prefix = buf.freeze();
                let (tx, forward) = channel_body();
                if !prefix.is_empty() {
                    let _ = tx.try_send(Ok(prefix.clone()));
                }
                let _ = tx.try_send(Err(e));
                return Inbound { logged: prefix, forward };
            }
        }
    }

    let logged = buf.freeze();
    Inbound {
        forward: reqwest::Body::from(logged.clone()),
        logged,
    }
}

/// Forward `prefix` followed by the rest of `body`, unmodified.
fn pump<B>(prefix: Bytes, mut body: Pin<Box<B>>) -> reqwest::Body
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError> + Send,
{
    let (tx, forward) = channel_body();
    tokio::spawn(async move {
        if !prefix.is_empty() && tx.send(Ok(prefix)).await.is_err() {
            return;
        }
        while let Some(frame) = body.frame().await {
            let item = match frame {
                Ok(frame) => match frame.into_data() {
                    Ok(data) => Ok(data),
                    Err(_) => continue,
                },
                Err(e) => Err(e.into()),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                return;
            }
        }
    });
    forward
}

type Chunk = Result<Bytes, BoxError>;

fn channel_body() -> (mpsc::Sender<Chunk>, reqwest::Body) {
    let (tx, rx) = mpsc::channel(PUMP_DEPTH);
    (tx, reqwest::Body::wrap_stream(ChunkStream(rx)))
}

struct ChunkStream(mpsc::Receiver<Chunk>);

impl Stream for ChunkStream {
    type Item = Chunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

// ── Header helpers ──────────────────────────────────────────────

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

pub(crate) fn capture_headers(headers: &HeaderMap) -> HeaderValues {
    let mut out = HeaderValues::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.entry(name.as_str().to_string())
            .and_modify(|joined: &mut String| {
                joined.push_str(", ");
                joined.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}
