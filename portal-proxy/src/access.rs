use crate::source_ip::{self, Resolution, SourceSignal};
use http::HeaderMap;
use ipnet::IpNet;
use portal_core::{Allowlist, ConnectionContext, DenyReason};
use std::net::IpAddr;
use tracing::{info, warn};

/// Audit value returned for every request the gate sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Enforcement inactive; nothing was checked.
    Bypass,
    Allowed {
        addr: IpAddr,
        signal: SourceSignal,
        entry: IpNet,
    },
    Denied {
        addr: Option<IpAddr>,
        signal: SourceSignal,
        reason: DenyReason,
    },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AccessDecision::Denied { .. })
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            AccessDecision::Denied { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Emit the audit event for this decision.
    pub fn log(&self, method: &str, path: &str) {
        match self {
            AccessDecision::Bypass => {}
            AccessDecision::Allowed { addr, signal, entry } => info!(
                component = "funnel_allowlist",
                funnel_enabled = true,
                source_signal = %signal,
                source_ip = %addr,
                matched_allowlist_entry = %entry,
                method,
                path,
                "Funnel request allowed"
            ),
            AccessDecision::Denied { addr: Some(addr), signal, reason } => warn!(
                component = "funnel_allowlist",
                funnel_enabled = true,
                source_signal = %signal,
                source_ip = %addr,
                deny_reason = %reason,
                method,
                path,
                "Funnel request denied"
            ),
            AccessDecision::Denied { addr: None, signal, reason } => warn!(
                component = "funnel_allowlist",
                funnel_enabled = true,
                source_signal = %signal,
                deny_reason = %reason,
                method,
                path,
                "Funnel request denied"
            ),
        }
    }
}

/// Funnel allowlist enforcement.
///
/// Active only when funnel exposure is on and the allowlist is non-empty;
/// tailnet-only traffic is trusted.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    funnel_enabled: bool,
    allowlist: Allowlist,
    prefer_remote: bool,
}

impl AccessGate {
    /// `prefer_remote` is set when the transport address is authoritative
    /// (PROXY-protocol forwarding), so headers are never consulted.
    pub fn new(funnel_enabled: bool, allowlist: Allowlist, prefer_remote: bool) -> Self {
        Self { funnel_enabled, allowlist, prefer_remote }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enforcing(&self) -> bool {
        self.funnel_enabled && !self.allowlist.is_empty()
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub fn evaluate(&self, headers: &HeaderMap, ctx: &ConnectionContext) -> AccessDecision {
        if !self.is_enforcing() {
            return AccessDecision::Bypass;
        }
        let resolution = source_ip::resolve(headers, ctx, self.prefer_remote);
        decide(true, resolution, &self.allowlist)
    }
}

/// Pure admission rule over an already-resolved source.
pub fn decide(enforcing: bool, resolution: Resolution, allowlist: &Allowlist) -> AccessDecision {
    if !enforcing || allowlist.is_empty() {
        return AccessDecision::Bypass;
    }
    let Some(addr) = resolution.addr else {
        return AccessDecision::Denied {
            addr: None,
            signal: resolution.signal,
            reason: DenyReason::SourceIpUnresolved,
        };
    };
    match allowlist.matching_entry(addr) {
        Some(entry) => AccessDecision::Allowed { addr, signal: resolution.signal, entry: *entry },
        None => AccessDecision::Denied {
            addr: Some(addr),
            signal: resolution.signal,
            reason: DenyReason::SourceIpNotAllowlisted,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn allowlist(entries: &[&str]) -> Allowlist {
        Allowlist::parse(entries.iter().copied()).unwrap()
    }

    fn xff(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        h
    }

    fn loopback() -> ConnectionContext {
        ConnectionContext { remote_addr: "127.0.0.1:40000".into(), client_ip: None }
    }

    #[test]
    fn bypass_when_funnel_off() {
        let gate = AccessGate::new(false, allowlist(&["203.0.113.0/24"]), false);
        assert!(!gate.is_enforcing());
        assert_eq!(gate.evaluate(&xff("192.0.2.9"), &loopback()), AccessDecision::Bypass);
    }

    #[test]
    fn bypass_when_allowlist_empty() {
        let gate = AccessGate::new(true, Allowlist::default(), false);
        assert_eq!(gate.evaluate(&xff("192.0.2.9"), &loopback()), AccessDecision::Bypass);
    }

    #[test]
    fn admits_allowlisted_source() {
        let gate = AccessGate::new(true, allowlist(&["203.0.113.0/24"]), false);
        let decision = gate.evaluate(&xff("203.0.113.10"), &loopback());
        match decision {
            AccessDecision::Allowed { addr, signal, entry } => {
                assert_eq!(addr.to_string(), "203.0.113.10");
                assert_eq!(signal, SourceSignal::XForwardedFor);
                assert_eq!(entry.to_string(), "203.0.113.0/24");
            }
            other => panic!("expected Allowed, got {other:?}"),
        }
    }

    #[test]
    fn denies_source_outside_allowlist() {
        let gate = AccessGate::new(true, allowlist(&["203.0.113.0/24"]), false);
        let decision = gate.evaluate(&xff("192.0.2.9"), &loopback());
        assert!(!decision.is_allowed());
        assert_eq!(decision.deny_reason(), Some(DenyReason::SourceIpNotAllowlisted));
    }

    #[test]
    fn denies_unresolved_source() {
        let gate = AccessGate::new(true, allowlist(&["203.0.113.0/24"]), true);
        let ctx = ConnectionContext { remote_addr: "@unix".into(), client_ip: None };
        let decision = gate.evaluate(&xff("203.0.113.10"), &ctx);
        assert_eq!(decision.deny_reason(), Some(DenyReason::SourceIpUnresolved));
    }

    #[test]
    fn prefer_remote_ignores_spoofed_header() {
        let gate = AccessGate::new(true, allowlist(&["203.0.113.0/24"]), true);
        let ctx = ConnectionContext { remote_addr: "198.51.100.10:5555".into(), client_ip: None };
        let decision = gate.evaluate(&xff("203.0.113.9"), &ctx);
        assert_eq!(decision.deny_reason(), Some(DenyReason::SourceIpNotAllowlisted));
    }

    #[test]
    fn decide_reports_first_matching_entry() {
        let list = allowlist(&["10.0.0.0/8", "10.1.0.0/16"]);
        let resolution = Resolution {
            addr: Some("10.1.2.3".parse().unwrap()),
            signal: SourceSignal::RemoteAddress,
        };
        match decide(true, resolution, &list) {
            AccessDecision::Allowed { entry, .. } => assert_eq!(entry.to_string(), "10.0.0.0/8"),
            other => panic!("expected Allowed, got {other:?}"),
        }
    }
}
