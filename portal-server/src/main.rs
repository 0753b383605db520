// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Portal — expose a local service on an overlay network
//
//  Data plane:  hyper HTTP/1.1 gateway on tokio (capture, mock, proxy)
//  Exposure:    publish rules + listener from the overlay network
//  Admin API:   axum, published as the tailnet-only dashboard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod cli;
mod logging;

use arc_swap::ArcSwapOption;
use clap::Parser;
use cli::Cli;
use portal_admin::{AdminServer, AdminState};
use portal_core::config::default_config_path;
use portal_core::{AppConfig, OverlayListener};
use portal_exposure::publisher::DASHBOARD_START_PORT;
use portal_exposure::{ExposurePublisher, OverlayNetwork, ReadyInfo, ReadySummary, StandaloneNetwork, WebUi};
use portal_observability::{AccessLogObserver, MetricsCollector, QueuedObserver};
use portal_proxy::{AccessGate, Gateway};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Overlay implementation reported in the ready summary.
const NETWORK_MODE: &str = "standalone";

/// Bounded queue in front of the metrics observer.
const METRICS_QUEUE_CAPACITY: usize = 4096;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = AppConfig::load(config_path.as_deref(), &cli.overrides())?;

    logging::init(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.server_mode(),
        funnel = config.funnel,
        listen_mode = %config.listen_mode,
        "Portal starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("portal-worker")
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let network: Arc<dyn OverlayNetwork> = Arc::new(StandaloneNetwork::from_config(&config));
    let publisher = Arc::new(ExposurePublisher::new(network));

    // ── Cleanup only ──
    if config.cleanup_serve {
        publisher.clear_all().await?;
        info!(component = "startup", "Publish rules cleared");
        return Ok(());
    }

    // ── Gateway + observers ──
    let gate = AccessGate::new(
        config.funnel,
        config.funnel_allowlist.clone(),
        config.use_address_tagging(),
    );
    let gateway = Gateway::new(config.server_mode(), gate, config.max_logs)?;
    gateway.add_observer(Arc::new(AccessLogObserver));

    let metrics = Arc::new(MetricsCollector::new(config.metrics)?);
    if metrics.is_enabled() {
        let queued = QueuedObserver::spawn("metrics", METRICS_QUEUE_CAPACITY, metrics.clone())?;
        gateway.add_observer(Arc::new(queued));
    }

    if let Some(backend) = config.server_mode().backend_url() {
        info!(component = "startup", backend = %backend, "Proxying requests to local backend");
    }

    // ── Ready hook ──
    let ready_slot: Arc<ArcSwapOption<ReadyInfo>> = Arc::new(ArcSwapOption::empty());
    {
        let slot = Arc::clone(&ready_slot);
        publisher.on_ready(move |ready| {
            info!(component = "exposure", url = %ready.service_url, "Exposure ready");
            slot.store(Some(Arc::new(ready)));
        });
    }

    // ── Publish ──
    let publication = publisher.publish(&config.exposure_config(0)).await?;
    let service = publication.info;
    let listener: Arc<dyn OverlayListener> = Arc::from(publication.listener);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway_task = tokio::spawn(portal_proxy::server::serve(
        listener,
        gateway.clone(),
        wait_for_shutdown(shutdown_rx.clone()),
    ));

    // ── Dashboard ──
    let mut admin_state = AdminState::new(Arc::new(gateway.clone()), config.server_mode());
    if metrics.is_enabled() {
        admin_state = admin_state.with_metrics(Arc::clone(&metrics));
    }
    let admin_state = Arc::new(admin_state);

    let mut admin_task = None;
    let web_ui = if config.no_ui {
        WebUi::Disabled
    } else {
        match start_dashboard(&config, &publisher, Arc::clone(&admin_state), shutdown_rx.clone()).await {
            Ok((url, task)) => {
                admin_task = Some(task);
                WebUi::Enabled { url }
            }
            Err(e) => {
                warn!(component = "startup", error = %e, "Web UI unavailable");
                WebUi::Unavailable
            }
        }
    };

    // ── Ready summary ──
    match ready_slot.load_full() {
        Some(ready) => {
            let summary = ReadySummary::build(&config, NETWORK_MODE, &ready, &service.local_url, &web_ui);
            summary.log();
            admin_state.set_endpoint(summary);
        }
        None => warn!(component = "startup", "Exposure published without a service URL"),
    }

    // ── Graceful shutdown ──
    shutdown_signal().await;
    info!(component = "shutdown", "Shutdown signal received, stopping...");
    let _ = shutdown_tx.send(true);

    if let Err(e) = publisher.withdraw().await {
        warn!(component = "shutdown", error = %e, "Failed to withdraw publish rules");
    }
    if let Err(e) = gateway_task.await {
        error!(component = "shutdown", error = %e, "Gateway task failed");
    }
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => error!(component = "shutdown", error = %e, "Admin API failed"),
            Err(e) => error!(component = "shutdown", error = %e, "Admin task failed"),
            Ok(Ok(())) => {}
        }
    }

    info!(component = "shutdown", "Portal stopped");
    Ok(())
}

/// Bind the admin API locally, publish it on the overlay, and start serving.
async fn start_dashboard(
    config: &AppConfig,
    publisher: &ExposurePublisher,
    state: Arc<AdminState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<(String, JoinHandle<anyhow::Result<()>>)> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.ui_port));
    let server = AdminServer::bind(addr, state).await?;
    let local_port = server.local_addr()?.port();

    let dashboard = publisher.publish_dashboard(local_port, DASHBOARD_START_PORT).await?;
    let task = tokio::spawn(server.serve(wait_for_shutdown(shutdown)));

    info!(component = "startup", url = %dashboard.url, local_port, "Web UI available");
    Ok((dashboard.url, task))
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// SIGINT (Ctrl+C) or SIGTERM (docker stop).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
