use crossbeam_channel::{Sender, TrySendError, bounded};
use portal_core::{RequestObserver, RequestRecord};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::debug;

/// Decouples a slow observer from the request path.
///
/// `notify` never blocks: records go into a bounded channel drained by a
/// dedicated thread, and are dropped (and counted) when the channel is full.
pub struct QueuedObserver {
    name: String,
    sender: Option<Sender<RequestRecord>>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedObserver {
    pub fn spawn(
        name: &str,
        capacity: usize,
        inner: Arc<dyn RequestObserver>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<RequestRecord>(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name(format!("portal-observer-{name}"))
            .spawn(move || {
                for record in rx {
                    inner.notify(record);
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            sender: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
            worker: Some(worker),
        })
    }

    /// Records discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain what is queued and stop the worker.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl RequestObserver for QueuedObserver {
    fn notify(&self, record: RequestRecord) {
        let Some(ref sender) = self.sender else {
            return;
        };
        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(observer = %self.name, dropped = total, "Observer queue full, record dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for QueuedObserver {
    fn drop(&mut self) {
        self.close();
    }
}
