use portal_core::RequestRecord;
use std::collections::VecDeque;
use std::sync::RwLock;

/// Bounded, arrival-ordered buffer of captured exchanges.
///
/// Inserting into a full buffer evicts the oldest record. Readers always get
/// a copy; the backing storage never leaves this type.
pub struct RequestLog {
    capacity: usize,
    records: RwLock<VecDeque<RequestRecord>>,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, record: RequestRecord) {
        let mut records = match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Copy of every record, oldest first.
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        match self.records.read() {
            Ok(records) => records.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match self.records.write() {
            Ok(mut records) => records.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> RequestRecord {
        RequestRecord::new(format!("req_0_{n}"), "GET", "/")
    }

    fn ids(log: &RequestLog) -> Vec<String> {
        log.snapshot().into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn keeps_arrival_order() {
        let log = RequestLog::new(10);
        for n in 1..=3 {
            log.push(record(n));
        }
        assert_eq!(ids(&log), vec!["req_0_1", "req_0_2", "req_0_3"]);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let n = 5;
        let log = RequestLog::new(n);
        for i in 0..=n {
            log.push(record(i));
        }
        assert_eq!(log.len(), n);
        assert_eq!(ids(&log).first().map(String::as_str), Some("req_0_1"));
        assert_eq!(ids(&log).last().map(String::as_str), Some("req_0_5"));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let log = RequestLog::new(4);
        log.push(record(1));
        let mut snap = log.snapshot();
        snap.clear();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let log = RequestLog::new(4);
        log.push(record(1));
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let log = RequestLog::new(0);
        log.push(record(1));
        log.push(record(2));
        assert_eq!(ids(&log), vec!["req_0_2"]);
    }
}
