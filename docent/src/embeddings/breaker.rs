use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Circuit breaker around the embedding provider.
///
/// After `threshold` consecutive failures the circuit opens and calls are
/// refused until `cooldown_secs` have elapsed, at which point one probe is
/// allowed through. A success closes the circuit; a failure re-opens it.
/// All state is atomic so the breaker can be shared across requests.
pub struct CircuitBreaker {
    /// Consecutive failure count.
    failures: AtomicU32,
    /// Timestamp of last failure (unix secs, 0 = never failed).
    last_failure: AtomicU64,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            failures: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            threshold: threshold.max(1),
            cooldown_secs,
        }
    }

    /// True when calls should be refused outright.
    pub fn is_open(&self) -> bool {
        let fails = self.failures.load(Ordering::Relaxed);
        if fails < self.threshold {
            return false;
        }
        let last = self.last_failure.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) <= self.cooldown_secs
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(now_secs(), Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
