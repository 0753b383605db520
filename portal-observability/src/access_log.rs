use portal_core::{RequestObserver, RequestRecord};
use serde::{Deserialize, Serialize};

/// Structured access log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: String,
    pub request_id: String,
    pub remote_addr: String,
    pub method: String,
    pub uri: String,
    pub response_status: u16,
    pub latency_ms: f64,
    pub response_bytes: u64,
    pub response_truncated: bool,
}

impl From<&RequestRecord> for AccessLogEntry {
    fn from(r: &RequestRecord) -> Self {
        Self {
            timestamp: r.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            request_id: r.id.clone(),
            remote_addr: r.remote_addr.clone(),
            method: r.method.clone(),
            uri: r.url.clone(),
            response_status: r.status_code,
            latency_ms: r.duration.as_secs_f64() * 1000.0,
            response_bytes: r.response.size,
            response_truncated: r.response.body_truncated,
        }
    }
}

/// Emits one `tracing` event per completed request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLogObserver;

impl RequestObserver for AccessLogObserver {
    fn notify(&self, record: RequestRecord) {
        let entry = AccessLogEntry::from(&record);
        tracing::info!(
            target: "portal::access",
            request_id = %entry.request_id,
            method = %entry.method,
            uri = %entry.uri,
            status = entry.response_status,
            latency_ms = entry.latency_ms,
            bytes = entry.response_bytes,
            remote_addr = %entry.remote_addr,
            "Request completed"
        );
    }
}
