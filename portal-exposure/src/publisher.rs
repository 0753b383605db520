use crate::network::{CAPABILITY_HTTPS, ListenRequest, NodeStatus, OverlayNetwork};
use crate::plan::{ExposurePlan, Forwarding, build_service_url};
use crate::ready::{ReadyCallback, ReadyInfo, ReadyNotifier};
use crate::rules::{HttpHandler, PublishConfig, Scope};
use portal_core::error::Result;
use portal_core::{ExposureConfig, ListenMode, OverlayListener, PortalError, ServiceName};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Where the dashboard search for a free overlay port begins.
pub const DASHBOARD_START_PORT: u16 = 8080;

/// Facts about a successful publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Externally visible URL.
    pub url: String,
    /// Where the local listener accepts, `http://localhost:<port>`.
    pub local_url: String,
    pub dns_name: String,
    pub serve_port: u16,
    pub local_port: u16,
    pub funnel: bool,
    pub https: bool,
    pub mount_path: String,
    pub forwarding: Forwarding,
    pub listen_mode: ListenMode,
    pub service_name: Option<String>,
    pub service_fqdn: Option<String>,
}

/// The bound listener plus what was published for it.
pub struct Publication {
    pub info: ServiceInfo,
    pub listener: Box<dyn OverlayListener>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardInfo {
    pub serve_port: u16,
    pub url: String,
}

/// A rule this publisher installed, remembered for withdrawal.
#[derive(Debug, Clone)]
enum Installed {
    Web {
        host: String,
        port: u16,
        mount_path: String,
        service: Option<ServiceName>,
    },
    TcpForward {
        port: u16,
    },
    Funnel {
        host: String,
        port: u16,
    },
}

impl Installed {
    fn remove_from(&self, rules: &mut PublishConfig) {
        match self {
            Installed::Web { host, port, mount_path, service } => {
                let scope = match service {
                    Some(name) => Scope::Service(name),
                    None => Scope::Node,
                };
                rules.remove_web_handler(host, *port, mount_path, scope);
            }
            Installed::TcpForward { port } => rules.remove_tcp_forwarding(*port),
            Installed::Funnel { host, port } => rules.set_funnel(host, *port, false),
        }
    }
}

// ── Publisher ───────────────────────────────────────────────────

/// Validates an exposure, binds its listener, and installs the overlay
/// rules that route to it.
pub struct ExposurePublisher {
    network: Arc<dyn OverlayNetwork>,
    ready: ReadyNotifier,
    installed: Mutex<Vec<Installed>>,
}

impl ExposurePublisher {
    pub fn new(network: Arc<dyn OverlayNetwork>) -> Self {
        Self {
            network,
            ready: ReadyNotifier::new(),
            installed: Mutex::new(Vec::new()),
        }
    }

    pub fn network(&self) -> &Arc<dyn OverlayNetwork> {
        &self.network
    }

    /// Register the single ready callback.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: Fn(ReadyInfo) + Send + Sync + 'static,
    {
        let callback: ReadyCallback = Arc::new(callback);
        self.ready.set_callback(callback);
    }

    fn remember(&self, rules: Vec<Installed>) {
        match self.installed.lock() {
            Ok(mut installed) => installed.extend(rules),
            Err(poisoned) => poisoned.into_inner().extend(rules),
        }
    }

    fn take_installed(&self) -> Vec<Installed> {
        match self.installed.lock() {
            Ok(mut installed) => std::mem::take(&mut *installed),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Publish `config`.
    ///
    /// Every check runs before the rule set is written; a failure leaves the
    /// overlay's rules exactly as they were.
    pub async fn publish(&self, config: &ExposureConfig) -> Result<Publication> {
        let plan = ExposurePlan::resolve(config)?;
        info!(
            component = "exposure",
            phase = "plan",
            listen_mode = %plan.listen_mode,
            funnel = plan.funnel,
            use_tls = plan.use_tls,
            serve_port = plan.serve_port,
            forwarding = %plan.forwarding,
            "Exposure plan resolved"
        );
        if plan.funnel && config.allowlist_active && plan.forwarding == Forwarding::Web {
            warn!(
                component = "exposure",
                mount_path = %plan.mount_path,
                "Funnel allowlist on a non-root mount path relies on forwarded headers for client addresses"
            );
        }

        let status = self.network.status().await?;
        let dns_name = status.dns_name.trim_end_matches('.').to_string();
        if let Some(name) = &plan.service_name {
            check_service_identity(name, &status)?;
        }
        check_capabilities(&plan, &status, &dns_name)?;

        let mut rules = self.network.publish_config().await?;
        check_port_free(&rules, &plan)?;

        let request = ListenRequest {
            kind: plan.listen_kind(),
            serve_port: plan.serve_port,
            target_port: plan.target_port,
            proxy_protocol: plan.forwarding == Forwarding::AddressTagging,
        };
        let listener = self.network.listen(&request).await?;
        let local_port = listener.local_addr()?.port();
        info!(
            component = "exposure",
            phase = "listener_ready",
            kind = %request.kind,
            local_port,
            proxy_protocol = request.proxy_protocol,
            "Overlay listener bound"
        );

        let host = plan.public_host(&dns_name, &status.magic_dns_suffix);
        let installed = apply_rules(&mut rules, &plan, &dns_name, &host, local_port);

        if let Some(name) = &plan.service_name {
            self.network.advertise_service(name).await?;
            debug!(component = "exposure", service_name = %name, "Service advertised");
        }
        self.network.set_publish_config(rules).await?;
        self.remember(installed);

        let url = plan.service_url(&host);
        let service_fqdn = plan.service_name.as_ref().map(|_| host.clone());
        if plan.funnel {
            info!(component = "exposure", phase = "published", url = %url, "Exposure published - internet accessible");
        } else {
            info!(component = "exposure", phase = "published", url = %url, "Exposure published - tailnet only");
        }

        self.ready.emit(ReadyInfo {
            service_url: url.clone(),
            configured_listen_mode: config.listen_mode,
            effective_listen_mode: plan.listen_mode,
            service_name: plan.service_name.as_ref().map(|n| n.to_string()),
            service_fqdn: service_fqdn.clone(),
        });

        Ok(Publication {
            info: ServiceInfo {
                url,
                local_url: format!("http://localhost:{local_port}"),
                dns_name,
                serve_port: plan.serve_port,
                local_port,
                funnel: plan.funnel,
                https: plan.use_tls,
                mount_path: plan.mount_path.clone(),
                forwarding: plan.forwarding,
                listen_mode: plan.listen_mode,
                service_name: plan.service_name.as_ref().map(|n| n.to_string()),
                service_fqdn,
            },
            listener,
        })
    }

    /// Serve the local dashboard on the first free overlay port at or above
    /// `start_port`, plain HTTP, tailnet only.
    pub async fn publish_dashboard(&self, local_port: u16, start_port: u16) -> Result<DashboardInfo> {
        let status = self.network.status().await?;
        let dns_name = status.dns_name.trim_end_matches('.').to_string();
        let mut rules = self.network.publish_config().await?;

        let serve_port = rules.find_available_port(start_port).ok_or_else(|| {
            PortalError::Network(format!("no available overlay port found starting from {start_port}"))
        })?;
        rules.set_web_handler(local_handler(local_port), &dns_name, serve_port, "/", false, Scope::Node);
        self.network.set_publish_config(rules).await?;
        self.remember(vec![Installed::Web {
            host: dns_name.clone(),
            port: serve_port,
            mount_path: "/".into(),
            service: None,
        }]);

        let url = build_service_url(false, &dns_name, serve_port, "/");
        info!(component = "exposure", serve_port, local_port, url = %url, "Dashboard published");
        Ok(DashboardInfo { serve_port, url })
    }

    /// Remove the rules this publisher installed and start a new ready
    /// lifecycle.
    pub async fn withdraw(&self) -> Result<()> {
        let installed = self.take_installed();
        self.ready.reset();
        if installed.is_empty() {
            return Ok(());
        }
        let mut rules = self.network.publish_config().await?;
        for rule in installed.iter().rev() {
            rule.remove_from(&mut rules);
        }
        self.network.set_publish_config(rules).await?;
        info!(component = "exposure", phase = "shutdown", rules = installed.len(), "Exposure withdrawn");
        Ok(())
    }

    /// Replace the overlay rule set with an empty one, including rules other
    /// processes installed.
    pub async fn clear_all(&self) -> Result<()> {
        info!(component = "exposure", operation = "cleanup_all", "Clearing all publish rules");
        self.network.set_publish_config(PublishConfig::default()).await?;
        self.take_installed();
        info!(component = "exposure", status = "all_cleared", "All publish rules cleared");
        Ok(())
    }
}

// ── Checks ──────────────────────────────────────────────────────

fn check_service_identity(name: &ServiceName, status: &NodeStatus) -> Result<()> {
    if !status.has_tag_identity() {
        return Err(PortalError::config(format!(
            "cannot host service {name}: service hosts must be tagged nodes (e.g. tag:portal) and may require admin approval"
        )));
    }
    if status.magic_dns_suffix.trim().is_empty() {
        return Err(PortalError::config(format!(
            "cannot configure service {name}: missing tailnet MagicDNS suffix"
        )));
    }
    Ok(())
}

fn check_capabilities(plan: &ExposurePlan, status: &NodeStatus, dns_name: &str) -> Result<()> {
    let https = status.has_capability(CAPABILITY_HTTPS);
    if plan.use_tls && !https && !plan.funnel {
        warn!(
            component = "exposure",
            status = "https_may_not_work",
            "HTTPS capability not enabled; enable HTTPS in the overlay admin console"
        );
    }
    if !plan.funnel {
        return Ok(());
    }
    if !https {
        return Err(PortalError::Capability(
            "HTTPS certificates not enabled: enable the HTTPS capability in the overlay admin console before using funnel"
                .into(),
        ));
    }
    if status.cert_domains.is_empty() {
        return Err(PortalError::Capability(
            "cannot enable funnel: no certificate domains available".into(),
        ));
    }
    if !status.has_certificate_for(dns_name) {
        return Err(PortalError::Capability(format!(
            "cannot enable funnel: certificate not available for domain {dns_name}"
        )));
    }
    Ok(())
}

fn check_port_free(rules: &PublishConfig, plan: &ExposurePlan) -> Result<()> {
    let port = plan.serve_port;
    let mut in_use = rules.is_tcp_forwarding_on_port(port, Scope::Node) || rules.is_serving_web(port, Scope::Node);
    if let Some(name) = &plan.service_name {
        in_use = in_use
            || rules.is_tcp_forwarding_on_port(port, Scope::Service(name))
            || rules.is_serving_web(port, Scope::Service(name));
    }
    if in_use {
        warn!(
            component = "exposure",
            serve_port = port,
            listen_mode = %plan.listen_mode,
            "Port already in use for serve"
        );
        return Err(PortalError::Conflict { port });
    }
    Ok(())
}

// ── Rule construction ───────────────────────────────────────────

fn local_handler(port: u16) -> HttpHandler {
    HttpHandler { proxy: format!("http://localhost:{port}") }
}

fn apply_rules(
    rules: &mut PublishConfig,
    plan: &ExposurePlan,
    dns_name: &str,
    host: &str,
    local_port: u16,
) -> Vec<Installed> {
    let port = plan.serve_port;
    let mut installed = Vec::with_capacity(2);

    match (&plan.service_name, plan.forwarding) {
        (Some(name), _) => {
            rules.set_web_handler(local_handler(local_port), host, port, &plan.mount_path, plan.use_tls, Scope::Service(name));
            installed.push(Installed::Web {
                host: host.to_string(),
                port,
                mount_path: plan.mount_path.clone(),
                service: Some(name.clone()),
            });
        }
        (None, Forwarding::AddressTagging) => {
            info!(
                component = "exposure",
                serve_port = port,
                "Setting up TLS-terminated TCP forwarding with PROXY protocol v2"
            );
            rules.set_tcp_forwarding(port, &format!("127.0.0.1:{local_port}"), true, 2, dns_name);
            installed.push(Installed::TcpForward { port });
        }
        (None, Forwarding::Web) => {
            rules.set_web_handler(local_handler(local_port), dns_name, port, &plan.mount_path, plan.use_tls, Scope::Node);
            installed.push(Installed::Web {
                host: dns_name.to_string(),
                port,
                mount_path: plan.mount_path.clone(),
                service: None,
            });
        }
    }

    if plan.funnel {
        rules.set_funnel(dns_name, port, true);
        installed.push(Installed::Funnel { host: dns_name.to_string(), port });
    }
    installed
}
