use portal_core::{RequestObserver, RequestRecord};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus collector fed from completed request records.
///
/// When `enabled = false` nothing is registered and `record` is a no-op.
pub struct MetricsCollector {
    enabled: bool,
    registry: Option<Registry>,
    pub http_requests_total: Option<IntCounterVec>,
    pub http_request_duration: Option<HistogramVec>,
    pub http_response_bytes: Option<IntCounter>,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self {
                enabled: false,
                registry: None,
                http_requests_total: None,
                http_request_duration: None,
                http_response_bytes: None,
            });
        }

        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Requests handled by the gateway").namespace("portal"),
            &["method", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "End-to-end request latency")
                .namespace("portal")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
            &["method"],
        )?;

        let http_response_bytes = IntCounter::with_opts(
            Opts::new("http_response_bytes_total", "Response bytes written to clients")
                .namespace("portal"),
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(http_response_bytes.clone()))?;

        Ok(Self {
            enabled: true,
            registry: Some(registry),
            http_requests_total: Some(http_requests_total),
            http_request_duration: Some(http_request_duration),
            http_response_bytes: Some(http_response_bytes),
        })
    }

    #[inline]
    pub fn record(&self, method: &str, status: u16, duration_secs: f64, response_bytes: u64) {
        if !self.enabled {
            return;
        }
        if let Some(ref counter) = self.http_requests_total {
            let mut buf = itoa::Buffer::new();
            counter.with_label_values(&[method, buf.format(status)]).inc();
        }
        if let Some(ref hist) = self.http_request_duration {
            hist.with_label_values(&[method]).observe(duration_secs);
        }
        if let Some(ref bytes) = self.http_response_bytes {
            bytes.inc_by(response_bytes);
        }
    }

    /// Prometheus text exposition format; empty when disabled.
    pub fn render(&self) -> String {
        let Some(ref registry) = self.registry else {
            return String::new();
        };
        let mut buffer = Vec::new();
        if TextEncoder::new().encode(&registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl RequestObserver for MetricsCollector {
    fn notify(&self, record: RequestRecord) {
        self.record(
            &record.method,
            record.status_code,
            record.duration.as_secs_f64(),
            record.response.size,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(method: &str, status: u16, size: u64) -> RequestRecord {
        let mut r = RequestRecord::new("req_1_1", method, "/");
        r.status_code = status;
        r.response.status_code = status;
        r.response.size = size;
        r.duration = Duration::from_millis(12);
        r
    }

    #[test]
    fn disabled_collector_is_inert() {
        let mc = MetricsCollector::new(false).unwrap();
        assert!(!mc.is_enabled());
        assert!(mc.http_requests_total.is_none());
        mc.notify(record("GET", 200, 10));
        assert_eq!(mc.render(), "");
    }

    #[test]
    fn enabled_collector_renders_families() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.notify(record("GET", 200, 10));
        let output = mc.render();
        assert!(output.contains("portal_http_requests_total"));
        assert!(output.contains("portal_http_request_duration_seconds"));
        assert!(output.contains("portal_http_response_bytes_total 10"));
    }

    #[test]
    fn counter_is_labelled_by_method_and_status() {
        let mc = MetricsCollector::new(true).unwrap();
        mc.notify(record("GET", 200, 1));
        mc.notify(record("GET", 200, 1));
        mc.notify(record("POST", 403, 9));

        let counter = mc.http_requests_total.as_ref().unwrap();
        assert_eq!(counter.with_label_values(&["GET", "200"]).get(), 2);
        assert_eq!(counter.with_label_values(&["POST", "403"]).get(), 1);
        assert_eq!(mc.http_response_bytes.as_ref().unwrap().get(), 11);
    }
}
