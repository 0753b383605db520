use crate::rules::PublishConfig;
use async_trait::async_trait;
use portal_core::error::Result;
use portal_core::{OverlayListener, ServiceName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability that allows HTTPS certificates on a node.
pub const CAPABILITY_HTTPS: &str = "https";

/// Identity and capabilities of the local overlay node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Stable node identity (user login or tag owner).
    pub self_identity: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Fully qualified DNS name, without a trailing dot.
    pub dns_name: String,
    /// Tailnet DNS suffix; empty when MagicDNS is off.
    #[serde(default)]
    pub magic_dns_suffix: String,
    #[serde(default)]
    pub cert_domains: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl NodeStatus {
    /// The node is owned by an ACL tag rather than a person.
    pub fn has_tag_identity(&self) -> bool {
        self.tags.iter().any(|t| t.starts_with("tag:"))
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(cap))
    }

    /// A certificate domain exists for this node's host label.
    pub fn has_certificate_for(&self, dns_name: &str) -> bool {
        let label = dns_name.split('.').next().unwrap_or(dns_name);
        !label.is_empty() && self.cert_domains.iter().any(|d| d.contains(label))
    }
}

/// Kind of listener to bind on the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenKind {
    Plain,
    Tls,
    /// Reachable from the public internet.
    Funnel,
    /// Bound to a named service identity.
    Service(ServiceName),
}

impl ListenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenKind::Plain => "plain",
            ListenKind::Tls => "tls",
            ListenKind::Funnel => "funnel",
            ListenKind::Service(_) => "service",
        }
    }
}

impl fmt::Display for ListenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenRequest {
    pub kind: ListenKind,
    /// External port the overlay publishes.
    pub serve_port: u16,
    /// Local port to accept on; 0 lets the network choose.
    pub target_port: u16,
    /// Every connection starts with a PROXY header that must be consumed.
    pub proxy_protocol: bool,
}

/// Boundary with the overlay network client.
#[async_trait]
pub trait OverlayNetwork: Send + Sync {
    async fn status(&self) -> Result<NodeStatus>;

    async fn publish_config(&self) -> Result<PublishConfig>;

    /// Replace the rule set wholesale.
    async fn set_publish_config(&self, config: PublishConfig) -> Result<()>;

    async fn listen(&self, request: &ListenRequest) -> Result<Box<dyn OverlayListener>>;

    /// Advertise `name` from this node. Calling it twice is harmless.
    async fn advertise_service(&self, name: &ServiceName) -> Result<()>;
}
