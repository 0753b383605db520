use portal_core::AggregateStats;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const ONE_MINUTE: Duration = Duration::from_secs(60);
const FIVE_MINUTES: Duration = Duration::from_secs(300);
const MAX_SAMPLES: usize = 10_000;

/// Thread-safe request counters and rolling latency window.
///
/// Latency samples older than five minutes are pruned on every write;
/// percentiles are computed over whatever remains.
pub struct StatsTracker {
    total: AtomicU64,
    open: AtomicU64,
    samples: Mutex<VecDeque<(Instant, Duration)>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            open: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(1024)),
        }
    }

    /// A request entered the gateway.
    pub fn request_started(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.open.fetch_add(1, Ordering::Relaxed);
    }

    /// A request finished after `elapsed`.
    pub fn request_finished(&self, elapsed: Duration) {
        self.record_at(Instant::now(), elapsed);
    }

    pub(crate) fn record_at(&self, now: Instant, elapsed: Duration) {
        let _ = self
            .open
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));

        let Ok(mut samples) = self.samples.lock() else {
            return;
        };
        samples.push_back((now, elapsed));
        prune(&mut samples, now);
        while samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> AggregateStats {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> AggregateStats {
        let mut stats = AggregateStats {
            total_requests: self.total.load(Ordering::Relaxed),
            open_connections: self.open.load(Ordering::Relaxed),
            ..Default::default()
        };

        let Ok(samples) = self.samples.lock() else {
            return stats;
        };

        let window = |span: Duration| {
            samples
                .iter()
                .filter(move |(at, _)| now.saturating_duration_since(*at) <= span)
                .map(|(_, d)| d.as_secs_f64() * 1000.0)
        };

        stats.avg_1m_ms = mean(window(ONE_MINUTE));
        stats.avg_5m_ms = mean(window(FIVE_MINUTES));

        let mut sorted: Vec<f64> = window(FIVE_MINUTES).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        stats.p50_ms = percentile(&sorted, 0.50);
        stats.p90_ms = percentile(&sorted, 0.90);
        stats
    }

    /// Zero the request total and drop all samples. Requests still in
    /// flight keep their open count.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(samples: &mut VecDeque<(Instant, Duration)>, now: Instant) {
    while let Some((at, _)) = samples.front() {
        if now.saturating_duration_since(*at) > FIVE_MINUTES {
            samples.pop_front();
        } else {
            break;
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
