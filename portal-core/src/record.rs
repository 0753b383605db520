use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Header map as captured: lowercase name → values joined with `", "` in arrival order.
pub type HeaderValues = BTreeMap<String, String>;

/// Captured response metadata for one exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status_code: u16,
    pub headers: HeaderValues,
    /// Text preview of the first bytes of the body, or the binary marker.
    pub body: String,
    pub body_truncated: bool,
    /// Total bytes written to the client.
    pub size: u64,
}

/// One captured request/response exchange.
///
/// Immutable once the gateway publishes it; observers receive their own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub remote_addr: String,
    pub headers: HeaderValues,
    pub body: String,
    pub user_agent: String,
    pub content_type: String,
    /// Declared request length; `None` when the client did not send one.
    pub size: Option<u64>,
    pub status_code: u16,
    pub response: ResponseRecord,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl RequestRecord {
    /// A record with request fields only; response fields are filled on completion.
    pub fn new(id: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            method: method.into(),
            url: url.into(),
            remote_addr: String::new(),
            headers: HeaderValues::new(),
            body: String::new(),
            user_agent: String::new(),
            content_type: String::new(),
            size: None,
            status_code: 0,
            response: ResponseRecord::default(),
            duration: Duration::ZERO,
        }
    }

    /// URL path without the query string.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

/// How the gateway answers admitted requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ServerMode {
    /// Synthesize a JSON acknowledgment.
    Mock,
    /// Forward to `http://localhost:<target_port>`.
    Proxy { target_port: u16 },
}

impl ServerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::Mock => "mock",
            ServerMode::Proxy { .. } => "proxy",
        }
    }

    pub fn backend_url(&self) -> Option<String> {
        match self {
            ServerMode::Mock => None,
            ServerMode::Proxy { target_port } => Some(format!("http://localhost:{target_port}")),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate latency and traffic figures, all latencies in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_requests: u64,
    pub open_connections: u64,
    pub avg_1m_ms: f64,
    pub avg_5m_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}
