use crate::record::{AggregateStats, RequestRecord};

/// Receives every completed exchange, synchronously and in registration order.
///
/// Implementations must be cheap; slow consumers should sit behind a queue.
pub trait RequestObserver: Send + Sync {
    fn notify(&self, record: RequestRecord);
}

impl<F> RequestObserver for F
where
    F: Fn(RequestRecord) + Send + Sync,
{
    fn notify(&self, record: RequestRecord) {
        self(record)
    }
}

/// Read side of the request log, used by dashboards and the admin API.
pub trait RequestLogProvider: Send + Sync {
    /// Copy of every buffered record, oldest first.
    fn snapshot(&self) -> Vec<RequestRecord>;

    /// Clear buffered records and aggregate statistics.
    fn reset(&self);

    fn aggregate_stats(&self) -> AggregateStats;
}
