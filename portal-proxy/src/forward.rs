use crate::BoxError;
use crate::capture::GatewayBody;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::Frame;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use portal_core::PortalError;
use std::convert::Infallible;
use std::net::IpAddr;
use tracing::{debug, error};

static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Reverse proxy to a single local backend.
///
/// Redirects are passed through and content encodings are left untouched.
/// Protocol upgrades (WebSocket and friends) are tunnelled once the backend
/// answers 101.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    base: String,
}

impl Forwarder {
    pub fn new(target_port: u16) -> Result<Self, PortalError> {
        Self::with_base(format!("http://localhost:{target_port}"))
    }

    pub fn with_base(base: impl Into<String>) -> Result<Self, PortalError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_gzip()
            .no_proxy()
            .build()
            .map_err(|e| PortalError::Network(format!("failed to build backend client: {e}")))?;
        Ok(Self { client, base: base.into().trim_end_matches('/').to_string() })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Forward one request. Backend failures become a bare 502.
    ///
    /// `client_upgrade` is the inbound connection's upgrade handle, present
    /// only when the client asked to switch protocols.
    pub async fn forward(
        &self,
        parts: &Parts,
        body: reqwest::Body,
        peer_ip: Option<IpAddr>,
        client_upgrade: Option<OnUpgrade>,
    ) -> Response<GatewayBody> {
        match self.try_forward(parts, body, peer_ip, client_upgrade).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(
                    component = "proxy_server",
                    backend = %self.base,
                    path = %parts.uri.path(),
                    error = %e,
                    "Backend request failed"
                );
                bad_gateway()
            }
        }
    }

    async fn try_forward(
        &self,
        parts: &Parts,
        body: reqwest::Body,
        peer_ip: Option<IpAddr>,
        client_upgrade: Option<OnUpgrade>,
    ) -> Result<Response<GatewayBody>, PortalError> {
        let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let url = format!("{}{}", self.base, path_and_query);
        let headers = outbound_headers(parts, peer_ip);

        debug!(url = %url, method = %parts.method, "Forwarding to backend");

        let resp = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| PortalError::Forward(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::SWITCHING_PROTOCOLS {
            return tunnel(resp, client_upgrade, parts.uri.path());
        }

        let mut resp_headers = resp.headers().clone();
        strip_hop_by_hop(&mut resp_headers);

        let stream = resp
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| -> BoxError { Box::new(e) });
        let mut out = Response::new(StreamBody::new(stream).boxed_unsync());
        *out.status_mut() = status;
        *out.headers_mut() = resp_headers;
        Ok(out)
    }
}

/// Answer 101 to the client and splice both upgraded connections together.
fn tunnel(
    resp: reqwest::Response,
    client_upgrade: Option<OnUpgrade>,
    path: &str,
) -> Result<Response<GatewayBody>, PortalError> {
    let Some(client_upgrade) = client_upgrade else {
        return Err(PortalError::Forward(
            "backend switched protocols for a request that did not ask to upgrade".into(),
        ));
    };

    let mut resp_headers = resp.headers().clone();
    let protocol = upgrade_protocol(&resp_headers);
    strip_hop_by_hop(&mut resp_headers);
    restore_upgrade(&mut resp_headers, protocol);

    let path = path.to_string();
    tokio::spawn(async move {
        let mut backend = match resp.upgrade().await {
            Ok(io) => io,
            Err(e) => {
                debug!(component = "proxy_server", path = %path, error = %e, "Backend upgrade failed");
                return;
            }
        };
        let mut client = match client_upgrade.await {
            Ok(io) => TokioIo::new(io),
            Err(e) => {
                debug!(component = "proxy_server", path = %path, error = %e, "Client upgrade failed");
                return;
            }
        };
        match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
            Ok((up, down)) => debug!(component = "proxy_server", path = %path, up, down, "Upgraded connection closed"),
            Err(e) => debug!(component = "proxy_server", path = %path, error = %e, "Upgraded connection ended"),
        }
    });

    let mut out = Response::new(empty_body());
    *out.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *out.headers_mut() = resp_headers;
    Ok(out)
}

/// Request headers as sent to the backend. The client's `Host` is kept.
pub fn outbound_headers(parts: &Parts, peer_ip: Option<IpAddr>) -> HeaderMap {
    let mut headers = parts.headers.clone();
    let protocol = upgrade_protocol(&parts.headers);
    strip_hop_by_hop(&mut headers);
    restore_upgrade(&mut headers, protocol);

    let original_host = parts
        .headers
        .get(header::HOST)
        .cloned()
        .or_else(|| parts.uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()));

    headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
    if let Some(host) = original_host {
        headers.insert(header::HOST, host.clone());
        headers.insert("x-forwarded-host", host);
    }

    if let Some(ip) = peer_ip {
        let prior: Vec<&str> = parts
            .headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let chain = if prior.is_empty() {
            ip.to_string()
        } else {
            format!("{}, {ip}", prior.join(", "))
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert("x-forwarded-for", value);
        }
    }
    headers
}

/// The `Upgrade` value when `Connection` asks for one.
fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wants_upgrade { headers.get(header::UPGRADE).cloned() } else { None }
}

fn restore_upgrade(headers: &mut HeaderMap, protocol: Option<HeaderValue>) {
    if let Some(protocol) = protocol {
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        headers.insert(header::UPGRADE, protocol);
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new().map_err(|e: Infallible| match e {}).boxed_unsync()
}

pub fn bad_gateway() -> Response<GatewayBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = StatusCode::BAD_GATEWAY;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn parts(req: Request<()>) -> Parts {
        req.into_parts().0
    }

    #[test]
    fn sets_forwarding_headers() {
        let p = parts(
            Request::builder()
                .uri("/hook")
                .header("host", "portal.example.ts.net")
                .body(())
                .unwrap(),
        );
        let h = outbound_headers(&p, Some("203.0.113.10".parse().unwrap()));
        assert_eq!(h["x-forwarded-proto"], "https");
        assert_eq!(h["x-forwarded-host"], "portal.example.ts.net");
        assert_eq!(h["x-forwarded-for"], "203.0.113.10");
        assert_eq!(h[header::HOST], "portal.example.ts.net");
    }

    #[test]
    fn overwrites_client_supplied_proto_and_host() {
        let p = parts(
            Request::builder()
                .uri("/")
                .header("host", "real.host")
                .header("x-forwarded-proto", "http")
                .header("x-forwarded-host", "spoofed")
                .body(())
                .unwrap(),
        );
        let h = outbound_headers(&p, None);
        assert_eq!(h["x-forwarded-proto"], "https");
        assert_eq!(h["x-forwarded-host"], "real.host");
    }

    #[test]
    fn appends_to_existing_forwarded_for_chain() {
        let p = parts(
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", "198.51.100.1")
                .body(())
                .unwrap(),
        );
        let h = outbound_headers(&p, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(h["x-forwarded-for"], "198.51.100.1, 127.0.0.1");
    }

    #[test]
    fn strips_hop_by_hop_and_connection_listed_headers() {
        let p = parts(
            Request::builder()
                .uri("/")
                .header("connection", "keep-alive, x-session-hint")
                .header("keep-alive", "timeout=5")
                .header("x-session-hint", "1")
                .header("upgrade", "h2c")
                .header("x-kept", "yes")
                .body(())
                .unwrap(),
        );
        let h = outbound_headers(&p, None);
        for gone in ["connection", "keep-alive", "x-session-hint", "upgrade"] {
            assert!(!h.contains_key(gone), "{gone} should be stripped");
        }
        assert_eq!(h["x-kept"], "yes");
    }

    #[test]
    fn keeps_upgrade_request_headers() {
        let p = parts(
            Request::builder()
                .uri("/ws")
                .header("connection", "keep-alive, Upgrade")
                .header("upgrade", "websocket")
                .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                .body(())
                .unwrap(),
        );
        let h = outbound_headers(&p, None);
        assert_eq!(h[header::CONNECTION], "upgrade");
        assert_eq!(h[header::UPGRADE], "websocket");
        assert!(h.contains_key("sec-websocket-key"));
        assert!(!h.contains_key("keep-alive"));
    }

    #[test]
    fn bad_gateway_is_502() {
        assert_eq!(bad_gateway().status(), StatusCode::BAD_GATEWAY);
    }
}
