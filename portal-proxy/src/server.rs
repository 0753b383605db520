use crate::gateway::Gateway;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use portal_core::OverlayListener;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Back-off after a failed accept so a persistent error doesn't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Serve HTTP/1.1 on `listener` until `shutdown` resolves.
///
/// Each connection runs in its own task: listener handshake first (PROXY
/// header, if any), then a keep-alive hyper connection driving the gateway.
/// Upgraded connections stay open until the tunnel closes.
pub async fn serve<F>(listener: Arc<dyn OverlayListener>, gateway: Gateway, shutdown: F)
where
    F: Future<Output = ()>,
{
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    info!(component = "proxy_server", addr = %local, mode = %gateway.mode(), "Gateway serving");

    tokio::pin!(shutdown);
    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };

        let (io, ctx) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(component = "proxy_server", error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let listener = Arc::clone(&listener);
        let gateway = gateway.clone();
        tokio::task::spawn(async move {
            let peer = ctx.remote_addr.clone();
            let (io, ctx) = match listener.handshake(io, ctx).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(component = "proxy_server", peer = %peer, error = %e, "Connection rejected");
                    return;
                }
            };

            let service = service_fn(move |req| {
                let gateway = gateway.clone();
                let ctx = ctx.clone();
                async move { Ok::<_, Infallible>(gateway.serve(req, ctx).await) }
            });

            let conn = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(io), service)
                .with_upgrades();

            if let Err(e) = conn.await {
                // Client teardown mid-exchange is routine.
                let msg = e.to_string();
                if !msg.contains("connection closed")
                    && !msg.contains("Connection reset")
                    && !msg.contains("incomplete message")
                {
                    debug!(component = "proxy_server", peer = %peer, error = %e, "Connection error");
                }
            }
        });
    }

    info!(component = "proxy_server", addr = %local, "Gateway stopped accepting");
}
