use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-pipeline request counters.
#[derive(Debug, Default)]
pub struct TransmissionStats {
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retries: AtomicU64,
    throttles: AtomicU64,
    exceptions: AtomicU64,
    total_duration_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmissionSnapshot {
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retries: u64,
    pub throttles: u64,
    pub exceptions: u64,
    pub total_duration_ms: u64,
}

impl TransmissionSnapshot {
    pub fn average_duration_ms(&self) -> f64 {
        let total = self.successful_requests + self.failed_requests;
        if total == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / total as f64
        }
    }
}

impl TransmissionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, success: bool, duration: Duration) {
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self) {
        self.throttles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransmissionSnapshot {
        TransmissionSnapshot {
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            throttles: self.throttles.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
        }
    }

    /// Returns the current counters and resets them to zero.
    pub fn take(&self) -> TransmissionSnapshot {
        TransmissionSnapshot {
            successful_requests: self.successful_requests.swap(0, Ordering::Relaxed),
            failed_requests: self.failed_requests.swap(0, Ordering::Relaxed),
            retries: self.retries.swap(0, Ordering::Relaxed),
            throttles: self.throttles.swap(0, Ordering::Relaxed),
            exceptions: self.exceptions.swap(0, Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_take() {
        let stats = TransmissionStats::new();
        stats.record_request(true, Duration::from_millis(30));
        stats.record_request(false, Duration::from_millis(10));
        stats.record_retry();

        let snapshot = stats.take();
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.average_duration_ms(), 20.0);

        assert_eq!(stats.snapshot(), TransmissionSnapshot::default());
    }
}
