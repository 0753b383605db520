use http::HeaderMap;
use portal_core::ConnectionContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Header the overlay network sets on funnel ingress with the true client address.
pub const TRUSTED_CLIENT_IP_HEADER: &str = "tailscale-client-ip";

/// Provenance of a resolved client address. Audit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceSignal {
    ExplicitRemoteOverride,
    TrustedNetworkHeader,
    ForwardedHeader,
    XForwardedFor,
    XRealIp,
    RemoteAddress,
    Unresolved,
}

impl SourceSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSignal::ExplicitRemoteOverride => "explicit-remote-override",
            SourceSignal::TrustedNetworkHeader => "trusted-network-header",
            SourceSignal::ForwardedHeader => "forwarded-header",
            SourceSignal::XForwardedFor => "x-forwarded-for",
            SourceSignal::XRealIp => "x-real-ip",
            SourceSignal::RemoteAddress => "remote-address",
            SourceSignal::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for SourceSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of source resolution. `addr` is `None` when nothing parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub addr: Option<IpAddr>,
    pub signal: SourceSignal,
}

impl Resolution {
    pub fn ok(&self) -> bool {
        self.addr.is_some()
    }
}

/// One way of finding the client address, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStrategy {
    /// Address supplied by the network layer for this connection.
    ConnectionContext,
    /// `Tailscale-Client-IP` header.
    TrustedHeader,
    /// RFC 7239 `Forwarded: for=...`.
    Forwarded,
    XForwardedFor,
    XRealIp,
    RemoteAddress,
}

impl SourceStrategy {
    pub const PRECEDENCE: [SourceStrategy; 6] = [
        SourceStrategy::ConnectionContext,
        SourceStrategy::TrustedHeader,
        SourceStrategy::Forwarded,
        SourceStrategy::XForwardedFor,
        SourceStrategy::XRealIp,
        SourceStrategy::RemoteAddress,
    ];

    pub fn signal(self) -> SourceSignal {
        match self {
            SourceStrategy::ConnectionContext | SourceStrategy::TrustedHeader => {
                SourceSignal::TrustedNetworkHeader
            }
            SourceStrategy::Forwarded => SourceSignal::ForwardedHeader,
            SourceStrategy::XForwardedFor => SourceSignal::XForwardedFor,
            SourceStrategy::XRealIp => SourceSignal::XRealIp,
            SourceStrategy::RemoteAddress => SourceSignal::RemoteAddress,
        }
    }

    pub fn try_resolve(self, headers: &HeaderMap, ctx: &ConnectionContext) -> Option<IpAddr> {
        match self {
            SourceStrategy::ConnectionContext => ctx.client_ip.map(|ip| ip.to_canonical()),
            SourceStrategy::TrustedHeader => {
                header_str(headers, TRUSTED_CLIENT_IP_HEADER).and_then(parse_ip_value)
            }
            SourceStrategy::Forwarded => {
                header_str(headers, "forwarded").and_then(parse_forwarded_header)
            }
            SourceStrategy::XForwardedFor => header_str(headers, "x-forwarded-for")
                .and_then(first_csv_value)
                .and_then(parse_ip_value),
            SourceStrategy::XRealIp => header_str(headers, "x-real-ip").and_then(parse_ip_value),
            SourceStrategy::RemoteAddress => parse_ip_value(&ctx.remote_addr),
        }
    }
}

/// Resolve the client address.
///
/// With `prefer_remote` only the transport address is consulted and a parse
/// failure is final; headers may be attacker-controlled in that setup.
pub fn resolve(headers: &HeaderMap, ctx: &ConnectionContext, prefer_remote: bool) -> Resolution {
    if prefer_remote {
        return match parse_ip_value(&ctx.remote_addr) {
            Some(addr) => Resolution { addr: Some(addr), signal: SourceSignal::RemoteAddress },
            None => Resolution { addr: None, signal: SourceSignal::ExplicitRemoteOverride },
        };
    }

    SourceStrategy::PRECEDENCE
        .iter()
        .find_map(|strategy| {
            strategy
                .try_resolve(headers, ctx)
                .map(|addr| Resolution { addr: Some(addr), signal: strategy.signal() })
        })
        .unwrap_or(Resolution { addr: None, signal: SourceSignal::Unresolved })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Parse an address given bare, as `[v6]`, or as `host:port`; quotes are
/// stripped and IPv4-mapped IPv6 is unmapped.
pub fn parse_ip_value(value: &str) -> Option<IpAddr> {
    let candidate = value.trim().trim_matches('"');
    if candidate.is_empty() {
        return None;
    }
    if let Ok(addr) = candidate.parse::<IpAddr>() {
        return Some(addr.to_canonical());
    }
    if let Some(inner) = candidate.strip_prefix('[').and_then(|c| c.strip_suffix(']')) {
        if let Ok(addr) = inner.parse::<IpAddr>() {
            return Some(addr.to_canonical());
        }
    }
    candidate
        .parse::<SocketAddr>()
        .ok()
        .map(|sa| sa.ip().to_canonical())
}

/// First `for=` token that parses as an address. Obfuscated identifiers
/// (leading `_`) and `unknown` are skipped.
pub fn parse_forwarded_header(header: &str) -> Option<IpAddr> {
    header
        .split(',')
        .flat_map(|entry| entry.split(';'))
        .filter_map(|part| part.trim().split_once('='))
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("for"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|candidate| !candidate.starts_with('_'))
        .find_map(parse_ip_value)
}

fn first_csv_value(value: &str) -> Option<&str> {
    value.split(',').map(str::trim).find(|s| !s.is_empty())
}
