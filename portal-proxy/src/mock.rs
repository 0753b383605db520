use crate::capture::GatewayBody;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Uri, header};
use http_body_util::{BodyExt, Full};
use serde_json::{Map, Value, json};
use std::convert::Infallible;

pub const MODE_HEADER: &str = "x-portal-mode";
pub const TIMESTAMP_HEADER: &str = "x-portal-timestamp";

/// JSON acknowledgment echoed by mock mode.
///
/// Keys serialize in sorted order; `query` and `content_type` appear only
/// when the request carried them.
pub fn mock_payload(method: &Method, uri: &Uri, headers: &HeaderMap, body_size: usize, now: &str) -> Value {
    let mut payload = Map::new();
    payload.insert("status".into(), json!("received"));
    payload.insert("timestamp".into(), json!(now));
    payload.insert("method".into(), json!(method.as_str()));
    payload.insert("path".into(), json!(uri.path()));
    payload.insert("headers".into(), json!(header_count(headers)));
    payload.insert("body_size".into(), json!(body_size));
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        payload.insert("query".into(), json!(query));
    }
    if let Some(ct) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        payload.insert("content_type".into(), json!(ct));
    }
    Value::Object(payload)
}

/// Distinct header names, not counting `Host`.
fn header_count(headers: &HeaderMap) -> usize {
    headers.keys().filter(|name| **name != header::HOST).count()
}

pub fn mock_response(method: &Method, uri: &Uri, headers: &HeaderMap, body_size: usize) -> Response<GatewayBody> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut body = mock_payload(method, uri, headers, body_size, &now).to_string();
    body.push('\n');

    let mut response = Response::new(
        Full::new(Bytes::from(body))
            .map_err(|e: Infallible| match e {})
            .boxed_unsync(),
    );
    *response.status_mut() = StatusCode::OK;
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    h.insert(MODE_HEADER, HeaderValue::from_static("mock"));
    if let Ok(ts) = HeaderValue::from_str(&now) {
        h.insert(TIMESTAMP_HEADER, ts);
    }
    response
}
