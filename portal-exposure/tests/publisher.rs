use portal_core::{ExposureConfig, ListenMode, PortalError, ServiceName};
use portal_exposure::network::NodeStatus;
use portal_exposure::publisher::DASHBOARD_START_PORT;
use portal_exposure::rules::{HttpHandler, PublishConfig, Scope};
use portal_exposure::{ExposurePublisher, Forwarding, OverlayNetwork, ReadyInfo, StandaloneNetwork};
use std::sync::{Arc, Mutex};

// ── Helpers ─────────────────────────────────────────────────────

const DNS: &str = "portal.example.ts.net";

fn status() -> NodeStatus {
    NodeStatus {
        self_identity: "tag:web".into(),
        tags: vec!["tag:web".into()],
        dns_name: format!("{DNS}."),
        magic_dns_suffix: "example.ts.net".into(),
        cert_domains: vec![DNS.into()],
        capabilities: vec!["https".into()],
    }
}

fn setup(status: NodeStatus) -> (Arc<StandaloneNetwork>, ExposurePublisher) {
    let network = Arc::new(StandaloneNetwork::new(status));
    let publisher = ExposurePublisher::new(network.clone() as Arc<dyn OverlayNetwork>);
    (network, publisher)
}

fn tailnet() -> ExposureConfig {
    ExposureConfig { target_port: 0, ..ExposureConfig::default() }
}

fn funnel() -> ExposureConfig {
    ExposureConfig { funnel: true, use_tls: true, ..tailnet() }
}

fn service() -> ServiceName {
    ServiceName::parse("svc:portal").unwrap()
}

fn occupied(port: u16) -> PublishConfig {
    let mut rules = PublishConfig::default();
    rules.set_web_handler(
        HttpHandler { proxy: "http://localhost:1".into() },
        "other.example.ts.net",
        port,
        "/",
        false,
        Scope::Node,
    );
    rules
}

fn ready_recorder(publisher: &ExposurePublisher) -> Arc<Mutex<Vec<ReadyInfo>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    publisher.on_ready(move |info| sink.lock().unwrap().push(info));
    seen
}

// ── Publishing ──────────────────────────────────────────────────

#[tokio::test]
async fn tailnet_publish_installs_web_handler() {
    let (network, publisher) = setup(status());
    let publication = publisher.publish(&tailnet()).await.unwrap();
    let info = &publication.info;

    assert_eq!(info.url, format!("http://{DNS}/"));
    assert_eq!(info.serve_port, 80);
    assert!(!info.https && !info.funnel);
    assert_eq!(info.forwarding, Forwarding::Web);
    assert_eq!(info.local_url, format!("http://localhost:{}", info.local_port));
    assert_eq!(publication.listener.local_addr().unwrap().port(), info.local_port);

    let rules = network.rules();
    assert!(rules.is_serving_web(80, Scope::Node));
    let web = &rules.web[&format!("{DNS}:80")];
    assert_eq!(web.handlers["/"].proxy, format!("http://localhost:{}", info.local_port));
    assert!(rules.allow_funnel.is_empty());
}

#[tokio::test]
async fn mount_path_appears_in_url_and_rule() {
    let (network, publisher) = setup(status());
    let cfg = ExposureConfig { mount_path: "hooks".into(), serve_port: 8080, ..tailnet() };
    let info = publisher.publish(&cfg).await.unwrap().info;

    assert_eq!(info.url, format!("http://{DNS}:8080/hooks"));
    assert!(network.rules().web[&format!("{DNS}:8080")].handlers.contains_key("/hooks"));
}

#[tokio::test]
async fn funnel_publish_enables_public_access() {
    let (network, publisher) = setup(status());
    let info = publisher.publish(&funnel()).await.unwrap().info;

    assert_eq!(info.url, format!("https://{DNS}/"));
    assert!(info.https && info.funnel);
    assert!(network.rules().is_funnel_on(DNS, 443));
}

#[tokio::test]
async fn allowlisted_funnel_uses_address_tagging() {
    let (network, publisher) = setup(status());
    let cfg = ExposureConfig { allowlist_active: true, ..funnel() };
    let publication = publisher.publish(&cfg).await.unwrap();
    let info = &publication.info;

    assert_eq!(info.forwarding, Forwarding::AddressTagging);
    let rules = network.rules();
    let handler = &rules.tcp[&443];
    assert_eq!(handler.tcp_forward.as_deref(), Some(format!("127.0.0.1:{}", info.local_port).as_str()));
    assert_eq!(handler.terminate_tls.as_deref(), Some(DNS));
    assert_eq!(handler.proxy_protocol, 2);
    assert!(rules.web.is_empty());
    assert!(rules.is_funnel_on(DNS, 443));
}

#[tokio::test]
async fn service_publish_uses_service_host() {
    let (network, publisher) = setup(status());
    let cfg = ExposureConfig {
        listen_mode: ListenMode::Service,
        service_name: Some(service()),
        use_tls: true,
        ..tailnet()
    };
    let seen = ready_recorder(&publisher);
    let info = publisher.publish(&cfg).await.unwrap().info;

    assert_eq!(info.url, "https://portal.example.ts.net/");
    assert_eq!(info.service_fqdn.as_deref(), Some("portal.example.ts.net"));
    assert_eq!(info.service_name.as_deref(), Some("svc:portal"));

    let rules = network.rules();
    assert!(rules.is_serving_web(443, Scope::Service(&service())));
    assert!(!rules.is_serving_web(443, Scope::Node));
    assert_eq!(network.advertised_services(), vec![service()]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].effective_listen_mode, ListenMode::Service);
    assert_eq!(seen[0].service_fqdn.as_deref(), Some("portal.example.ts.net"));
}

// ── Failures leave rules untouched ──────────────────────────────

#[tokio::test]
async fn node_conflict_is_reported_without_writing() {
    let (network, publisher) = setup(status());
    network.set_publish_config(occupied(80)).await.unwrap();

    let err = publisher.publish(&tailnet()).await.err().unwrap();
    assert!(matches!(err, PortalError::Conflict { port: 80 }));
    assert_eq!(*network.rules(), occupied(80));
}

#[tokio::test]
async fn service_conflict_is_reported_without_writing() {
    let (network, publisher) = setup(status());
    let mut rules = PublishConfig::default();
    rules.set_web_handler(
        HttpHandler { proxy: "http://localhost:1".into() },
        "portal.example.ts.net",
        80,
        "/",
        false,
        Scope::Service(&service()),
    );
    network.set_publish_config(rules.clone()).await.unwrap();

    let cfg = ExposureConfig { listen_mode: ListenMode::Service, service_name: Some(service()), ..tailnet() };
    let err = publisher.publish(&cfg).await.err().unwrap();
    assert!(matches!(err, PortalError::Conflict { port: 80 }));
    assert_eq!(*network.rules(), rules);
    assert!(network.advertised_services().is_empty());
}

#[tokio::test]
async fn funnel_requires_https_capability() {
    let (network, publisher) = setup(NodeStatus { capabilities: vec![], ..status() });
    let err = publisher.publish(&funnel()).await.err().unwrap();
    assert!(matches!(err, PortalError::Capability(_)));
    assert!(err.to_string().contains("HTTPS certificates not enabled"));
    assert!(network.rules().is_empty());
}

#[tokio::test]
async fn funnel_requires_certificate_domains() {
    let (_, publisher) = setup(NodeStatus { cert_domains: vec![], ..status() });
    let err = publisher.publish(&funnel()).await.err().unwrap();
    assert!(err.to_string().contains("no certificate domains available"), "{err}");

    let (_, publisher) = setup(NodeStatus { cert_domains: vec!["elsewhere.example.ts.net".into()], ..status() });
    let err = publisher.publish(&funnel()).await.err().unwrap();
    assert!(err.to_string().contains(&format!("certificate not available for domain {DNS}")), "{err}");
}

#[tokio::test]
async fn tls_without_https_capability_still_publishes() {
    let (_, publisher) = setup(NodeStatus { capabilities: vec![], ..status() });
    let cfg = ExposureConfig { use_tls: true, ..tailnet() };
    assert!(publisher.publish(&cfg).await.is_ok());
}

#[tokio::test]
async fn service_mode_requires_tagged_node() {
    let (network, publisher) = setup(NodeStatus { tags: vec![], ..status() });
    let cfg = ExposureConfig { listen_mode: ListenMode::Service, service_name: Some(service()), ..tailnet() };
    let err = publisher.publish(&cfg).await.err().unwrap();
    assert!(matches!(err, PortalError::Configuration(_)));
    assert!(err.to_string().contains("tagged"));
    assert!(network.rules().is_empty());
}

#[tokio::test]
async fn service_mode_requires_dns_suffix() {
    let (_, publisher) = setup(NodeStatus { magic_dns_suffix: String::new(), ..status() });
    let cfg = ExposureConfig { listen_mode: ListenMode::Service, service_name: Some(service()), ..tailnet() };
    let err = publisher.publish(&cfg).await.err().unwrap();
    assert!(err.to_string().contains("missing tailnet MagicDNS suffix"), "{err}");
}

// ── Ready, withdraw, cleanup ────────────────────────────────────

#[tokio::test]
async fn ready_fires_once_per_lifecycle() {
    let (_, publisher) = setup(status());
    let seen = ready_recorder(&publisher);

    publisher.publish(&tailnet()).await.unwrap();
    let second = ExposureConfig { serve_port: 8081, ..tailnet() };
    publisher.publish(&second).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    publisher.withdraw().await.unwrap();
    let third = ExposureConfig { serve_port: 8082, ..tailnet() };
    publisher.publish(&third).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn withdraw_removes_only_own_rules() {
    let (network, publisher) = setup(status());
    network.set_publish_config(occupied(9999)).await.unwrap();

    let cfg = ExposureConfig { allowlist_active: true, ..funnel() };
    publisher.publish(&cfg).await.unwrap();
    publisher.publish_dashboard(4040, DASHBOARD_START_PORT).await.unwrap();
    assert_ne!(*network.rules(), occupied(9999));

    publisher.withdraw().await.unwrap();
    assert_eq!(*network.rules(), occupied(9999));
}

#[tokio::test]
async fn clear_all_empties_rules() {
    let (network, publisher) = setup(status());
    network.set_publish_config(occupied(9999)).await.unwrap();
    publisher.publish(&tailnet()).await.unwrap();

    publisher.clear_all().await.unwrap();
    assert!(network.rules().is_empty());
    // Nothing left to withdraw.
    publisher.withdraw().await.unwrap();
    assert!(network.rules().is_empty());
}

#[tokio::test]
async fn dashboard_skips_used_ports() {
    let (network, publisher) = setup(status());
    network.set_publish_config(occupied(DASHBOARD_START_PORT)).await.unwrap();

    let dashboard = publisher.publish_dashboard(4040, DASHBOARD_START_PORT).await.unwrap();
    assert_eq!(dashboard.serve_port, DASHBOARD_START_PORT + 1);
    assert_eq!(dashboard.url, format!("http://{DNS}:8081/"));

    let rules = network.rules();
    let key = format!("{DNS}:8081");
    assert_eq!(rules.web[&key].handlers["/"].proxy, "http://localhost:4040");
    assert!(!rules.is_funnel_on(DNS, 8081));
}
