use crate::network::{CAPABILITY_HTTPS, ListenRequest, NodeStatus, OverlayNetwork};
use crate::rules::PublishConfig;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use portal_core::error::Result;
use portal_core::{AppConfig, OverlayListener, PortalError, ServiceName};
use portal_proxy::TcpOverlayListener;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tracing::info;

/// In-process overlay network: loopback listeners, an in-memory rule set,
/// and a node identity taken from configuration.
pub struct StandaloneNetwork {
    status: NodeStatus,
    rules: ArcSwap<PublishConfig>,
    advertised: Mutex<Vec<ServiceName>>,
}

impl StandaloneNetwork {
    pub fn new(status: NodeStatus) -> Self {
        Self {
            status,
            rules: ArcSwap::from_pointee(PublishConfig::default()),
            advertised: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let dns_name = config.node_dns_name();
        let node = &config.node;
        let cert_domains = if node.cert_domains.is_empty() && node.capabilities.iter().any(|c| c == CAPABILITY_HTTPS) {
            vec![dns_name.clone()]
        } else {
            node.cert_domains.clone()
        };
        let self_identity = node
            .tags
            .first()
            .cloned()
            .unwrap_or_else(|| config.device_name.clone());

        Self::new(NodeStatus {
            self_identity,
            tags: node.tags.clone(),
            dns_name,
            magic_dns_suffix: node.magic_dns_suffix.clone(),
            cert_domains,
            capabilities: node.capabilities.clone(),
        })
    }

    /// Current rule set.
    pub fn rules(&self) -> Arc<PublishConfig> {
        self.rules.load_full()
    }

    pub fn advertised_services(&self) -> Vec<ServiceName> {
        match self.advertised.lock() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl OverlayNetwork for StandaloneNetwork {
    async fn status(&self) -> Result<NodeStatus> {
        Ok(self.status.clone())
    }

    async fn publish_config(&self) -> Result<PublishConfig> {
        Ok(PublishConfig::clone(&self.rules.load()))
    }

    async fn set_publish_config(&self, config: PublishConfig) -> Result<()> {
        self.rules.store(Arc::new(config));
        Ok(())
    }

    async fn listen(&self, request: &ListenRequest) -> Result<Box<dyn OverlayListener>> {
        let listener = TcpOverlayListener::bind((Ipv4Addr::LOCALHOST, request.target_port), request.proxy_protocol)
            .await
            .map_err(|e| {
                PortalError::Network(format!(
                    "failed to listen for {} exposure on 127.0.0.1:{}: {e}",
                    request.kind, request.target_port
                ))
            })?;
        Ok(Box::new(listener))
    }

    async fn advertise_service(&self, name: &ServiceName) -> Result<()> {
        let mut list = match self.advertised.lock() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !list.contains(name) {
            list.push(name.clone());
            info!(component = "exposure", service_name = %name, "Advertised service");
        }
        Ok(())
    }
}
