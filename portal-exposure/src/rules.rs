use portal_core::ServiceName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ports probed by [`PublishConfig::find_available_port`].
pub const PORT_SEARCH_SPAN: u16 = 200;

// ── Rule types ──────────────────────────────────────────────────

/// What a node- or service-level TCP port does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpHandler {
    /// Serve web handlers over HTTPS on this port.
    #[serde(default, skip_serializing_if = "is_false")]
    pub https: bool,
    /// Serve web handlers over plain HTTP on this port.
    #[serde(default, skip_serializing_if = "is_false")]
    pub http: bool,
    /// Raw TCP forward target, `host:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_forward: Option<String>,
    /// Terminate TLS for this SNI name before forwarding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_tls: Option<String>,
    /// PROXY protocol version prepended to forwarded connections (0 = none).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub proxy_protocol: u8,
}

impl TcpHandler {
    pub fn is_web(&self) -> bool {
        self.http || self.https
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHandler {
    /// Reverse-proxy target URL.
    pub proxy: String,
}

/// Handlers for one `host:port`, keyed by mount path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebServerConfig {
    #[serde(default)]
    pub handlers: BTreeMap<String, HttpHandler>,
}

/// Rules scoped to one named service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRules {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tcp: BTreeMap<u16, TcpHandler>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub web: BTreeMap<String, WebServerConfig>,
}

impl ServiceRules {
    fn is_empty(&self) -> bool {
        self.tcp.is_empty() && self.web.is_empty()
    }
}

/// Which rule table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Node,
    Service(&'a ServiceName),
}

/// The overlay's full forwarding and serving rule set.
///
/// Read, modified, and written back whole; nothing here talks to the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tcp: BTreeMap<u16, TcpHandler>,
    /// Keyed by `host:port`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub web: BTreeMap<String, WebServerConfig>,
    /// Keyed by `host:port`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allow_funnel: BTreeMap<String, bool>,
    /// Keyed by full service name (`svc:<label>`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceRules>,
}

pub fn host_port(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

// ── Queries ─────────────────────────────────────────────────────

impl PublishConfig {
    pub fn is_empty(&self) -> bool {
        self.tcp.is_empty() && self.web.is_empty() && self.allow_funnel.is_empty() && self.services.is_empty()
    }

    fn tcp_table(&self, scope: Scope<'_>) -> Option<&BTreeMap<u16, TcpHandler>> {
        match scope {
            Scope::Node => Some(&self.tcp),
            Scope::Service(name) => self.services.get(name.as_str()).map(|s| &s.tcp),
        }
    }

    /// A raw TCP handler (not web serving) owns `port`.
    pub fn is_tcp_forwarding_on_port(&self, port: u16, scope: Scope<'_>) -> bool {
        self.tcp_table(scope)
            .and_then(|t| t.get(&port))
            .is_some_and(|h| !h.is_web())
    }

    /// Web handlers are served on `port`.
    pub fn is_serving_web(&self, port: u16, scope: Scope<'_>) -> bool {
        self.tcp_table(scope)
            .and_then(|t| t.get(&port))
            .is_some_and(TcpHandler::is_web)
    }

    pub fn is_funnel_on(&self, host: &str, port: u16) -> bool {
        self.allow_funnel.get(&host_port(host, port)).copied().unwrap_or(false)
    }

    /// First port at or above `start` with no node-level TCP handler and no
    /// web host bound to it.
    pub fn find_available_port(&self, start: u16) -> Option<u16> {
        let end = start.saturating_add(PORT_SEARCH_SPAN);
        (start..end).find(|port| {
            let suffix = format!(":{port}");
            !self.tcp.contains_key(port) && !self.web.keys().any(|hp| hp.ends_with(&suffix))
        })
    }
}

// ── Mutations ───────────────────────────────────────────────────

impl PublishConfig {
    /// Serve `handler` at `mount_path` on `host:port`.
    pub fn set_web_handler(
        &mut self,
        handler: HttpHandler,
        host: &str,
        port: u16,
        mount_path: &str,
        use_tls: bool,
        scope: Scope<'_>,
    ) {
        let tcp = TcpHandler {
            https: use_tls,
            http: !use_tls,
            ..TcpHandler::default()
        };
        let (tcp_table, web_table) = match scope {
            Scope::Node => (&mut self.tcp, &mut self.web),
            Scope::Service(name) => {
                let svc = self.services.entry(name.as_str().to_string()).or_default();
                (&mut svc.tcp, &mut svc.web)
            }
        };
        tcp_table.insert(port, tcp);
        web_table
            .entry(host_port(host, port))
            .or_default()
            .handlers
            .insert(mount_path.to_string(), handler);
    }

    /// Forward raw TCP on `port` to `target`, optionally terminating TLS for
    /// `sni` and prepending a PROXY header.
    pub fn set_tcp_forwarding(&mut self, port: u16, target: &str, terminate_tls: bool, proxy_protocol: u8, sni: &str) {
        self.tcp.insert(
            port,
            TcpHandler {
                tcp_forward: Some(target.to_string()),
                terminate_tls: terminate_tls.then(|| sni.to_string()),
                proxy_protocol,
                ..TcpHandler::default()
            },
        );
    }

    pub fn set_funnel(&mut self, host: &str, port: u16, on: bool) {
        let key = host_port(host, port);
        if on {
            self.allow_funnel.insert(key, true);
        } else {
            self.allow_funnel.remove(&key);
        }
    }

    /// Drop the handler for `mount_path` on `host:port`, and the port itself
    /// once no web host uses it any more.
    pub fn remove_web_handler(&mut self, host: &str, port: u16, mount_path: &str, scope: Scope<'_>) {
        let key = host_port(host, port);
        let (tcp_table, web_table) = match scope {
            Scope::Node => (&mut self.tcp, &mut self.web),
            Scope::Service(name) => match self.services.get_mut(name.as_str()) {
                Some(svc) => (&mut svc.tcp, &mut svc.web),
                None => return,
            },
        };
        if let Some(web) = web_table.get_mut(&key) {
            web.handlers.remove(mount_path);
            if web.handlers.is_empty() {
                web_table.remove(&key);
            }
        }
        let suffix = format!(":{port}");
        if !web_table.keys().any(|hp| hp.ends_with(&suffix)) {
            tcp_table.remove(&port);
        }
        if let Scope::Service(name) = scope {
            if self.services.get(name.as_str()).is_some_and(ServiceRules::is_empty) {
                self.services.remove(name.as_str());
            }
        }
    }

    pub fn remove_tcp_forwarding(&mut self, port: u16) {
        if self.tcp.get(&port).is_some_and(|h| !h.is_web()) {
            self.tcp.remove(&port);
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u8) -> bool {
    *n == 0
}
