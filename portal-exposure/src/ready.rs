use portal_core::ListenMode;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Published once the exposure is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyInfo {
    pub service_url: String,
    pub configured_listen_mode: ListenMode,
    pub effective_listen_mode: ListenMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_fqdn: Option<String>,
}

pub type ReadyCallback = Arc<dyn Fn(ReadyInfo) + Send + Sync>;

#[derive(Default)]
struct ReadyState {
    callback: Option<ReadyCallback>,
    emitted: bool,
    /// Emitted before any callback was registered.
    pending: Option<ReadyInfo>,
}

/// One-shot delivery of [`ReadyInfo`] to a single callback.
///
/// Registration and emission share one lock, so an event is neither lost
/// nor delivered twice when the two race. Callbacks run outside the lock.
#[derive(Default)]
pub struct ReadyNotifier {
    state: Mutex<ReadyState>,
}

impl ReadyNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReadyState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register the callback, replacing any earlier one. An event emitted
    /// before registration is delivered now.
    pub fn set_callback(&self, callback: ReadyCallback) {
        let pending = {
            let mut state = self.lock();
            state.callback = Some(Arc::clone(&callback));
            state.pending.take()
        };
        if let Some(info) = pending {
            callback(info);
        }
    }

    /// Emit `info` unless something was already emitted this lifecycle.
    /// An empty service URL is never emitted. Returns whether the event was
    /// accepted.
    pub fn emit(&self, info: ReadyInfo) -> bool {
        if info.service_url.trim().is_empty() {
            return false;
        }
        let callback = {
            let mut state = self.lock();
            if state.emitted {
                return false;
            }
            state.emitted = true;
            match &state.callback {
                Some(cb) => Some(Arc::clone(cb)),
                None => {
                    state.pending = Some(info.clone());
                    None
                }
            }
        };
        if let Some(cb) = callback {
            cb(info);
        }
        true
    }

    pub fn has_emitted(&self) -> bool {
        self.lock().emitted
    }

    /// Start a new lifecycle. The registered callback is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.emitted = false;
        state.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(url: &str) -> ReadyInfo {
        ReadyInfo {
            service_url: url.into(),
            configured_listen_mode: ListenMode::Listener,
            effective_listen_mode: ListenMode::Listener,
            service_name: None,
            service_fqdn: None,
        }
    }

    fn recorder() -> (ReadyCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: ReadyCallback = Arc::new(move |i: ReadyInfo| sink.lock().unwrap().push(i.service_url));
        (cb, seen)
    }

    #[test]
    fn emits_once() {
        let notifier = ReadyNotifier::new();
        let (cb, seen) = recorder();
        notifier.set_callback(cb);

        assert!(notifier.emit(info("https://a/")));
        assert!(!notifier.emit(info("https://b/")));
        assert_eq!(*seen.lock().unwrap(), vec!["https://a/"]);
    }

    #[test]
    fn empty_url_is_skipped() {
        let notifier = ReadyNotifier::new();
        let (cb, seen) = recorder();
        notifier.set_callback(cb);

        assert!(!notifier.emit(info("  ")));
        assert!(!notifier.has_emitted());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn late_callback_receives_pending_event() {
        let notifier = ReadyNotifier::new();
        notifier.emit(info("https://late/"));

        let (cb, seen) = recorder();
        notifier.set_callback(cb);
        assert_eq!(*seen.lock().unwrap(), vec!["https://late/"]);
    }

    #[test]
    fn re_registration_does_not_double_fire() {
        let notifier = ReadyNotifier::new();
        notifier.emit(info("https://once/"));

        let (first, seen_first) = recorder();
        notifier.set_callback(first);
        let (second, seen_second) = recorder();
        notifier.set_callback(second);

        assert_eq!(seen_first.lock().unwrap().len(), 1);
        assert!(seen_second.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_allows_next_lifecycle() {
        let notifier = ReadyNotifier::new();
        let (cb, seen) = recorder();
        notifier.set_callback(cb);
        notifier.emit(info("https://one/"));
        notifier.reset();
        notifier.emit(info("https://two/"));
        assert_eq!(*seen.lock().unwrap(), vec!["https://one/", "https://two/"]);
    }
}
