use crate::network::ListenKind;
use portal_core::error::Result;
use portal_core::exposure::{normalize_mount_path, resolve_serve_port};
use portal_core::{ExposureConfig, ListenMode, PortalError, ServiceName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// External ports that accept public funnel traffic.
pub const FUNNEL_PORTS: [u16; 3] = [443, 8443, 10000];

/// How overlay traffic reaches the local listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Forwarding {
    /// HTTP reverse proxy, routed by mount path.
    Web,
    /// TLS-terminated TCP forward with a PROXY v2 header carrying the
    /// client address. No path routing.
    AddressTagging,
}

impl Forwarding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Forwarding::Web => "web",
            Forwarding::AddressTagging => "address_tagging",
        }
    }
}

impl fmt::Display for Forwarding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated exposure decision. Building one touches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposurePlan {
    pub listen_mode: ListenMode,
    pub service_name: Option<ServiceName>,
    pub funnel: bool,
    pub use_tls: bool,
    pub serve_port: u16,
    pub target_port: u16,
    pub mount_path: String,
    pub forwarding: Forwarding,
}

impl ExposurePlan {
    pub fn resolve(config: &ExposureConfig) -> Result<Self> {
        let service_name = match config.listen_mode {
            ListenMode::Service if config.funnel => {
                return Err(PortalError::config(
                    "unsupported operating mode combination: listen-mode=service cannot be combined with funnel=true",
                ));
            }
            ListenMode::Service => Some(config.service_name.clone().ok_or_else(|| {
                PortalError::config("listen-mode=service requires a non-empty service-name")
            })?),
            ListenMode::Listener => None,
        };

        let serve_port = resolve_serve_port(config.serve_port, config.funnel || config.use_tls);
        let use_tls = config.funnel || config.use_tls || serve_port == 443;

        if config.funnel {
            if !use_tls {
                return Err(PortalError::config("funnel requires HTTPS"));
            }
            if !FUNNEL_PORTS.contains(&serve_port) {
                return Err(PortalError::config(format!(
                    "funnel requires serve port 443, 8443, or 10000 (got {serve_port})"
                )));
            }
        }

        let mount_path = normalize_mount_path(&config.mount_path);
        let forwarding = if config.funnel && config.allowlist_active && mount_path == "/" {
            Forwarding::AddressTagging
        } else {
            Forwarding::Web
        };

        Ok(Self {
            listen_mode: config.listen_mode,
            service_name,
            funnel: config.funnel,
            use_tls,
            serve_port,
            target_port: config.target_port,
            mount_path,
            forwarding,
        })
    }

    pub fn listen_kind(&self) -> ListenKind {
        match (&self.service_name, self.funnel, self.use_tls) {
            (Some(name), _, _) => ListenKind::Service(name.clone()),
            (None, true, _) => ListenKind::Funnel,
            (None, false, true) => ListenKind::Tls,
            (None, false, false) => ListenKind::Plain,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_tls { "https" } else { "http" }
    }

    /// Host the URL is published under.
    pub fn public_host(&self, dns_name: &str, magic_dns_suffix: &str) -> String {
        match &self.service_name {
            Some(name) => service_fqdn(name, magic_dns_suffix),
            None => dns_name.to_string(),
        }
    }

    pub fn service_url(&self, host: &str) -> String {
        build_service_url(self.use_tls, host, self.serve_port, &self.mount_path)
    }
}

/// `scheme://host[:port]mount_path`; the port is left out when it is the
/// scheme default.
pub fn build_service_url(use_tls: bool, host: &str, port: u16, mount_path: &str) -> String {
    let scheme = if use_tls { "https" } else { "http" };
    let default_port = if use_tls { 443 } else { 80 };
    if port == default_port {
        format!("{scheme}://{host}{mount_path}")
    } else {
        format!("{scheme}://{host}:{port}{mount_path}")
    }
}

pub fn service_fqdn(name: &ServiceName, magic_dns_suffix: &str) -> String {
    format!("{}.{}", name.without_prefix(), magic_dns_suffix.trim_end_matches('.'))
}
