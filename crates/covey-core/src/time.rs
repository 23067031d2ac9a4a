//! Injectable wall-clock reads.
//!
//! Interval timers and deadlines use tokio's (pausable) clock; timestamp
//! metadata goes through [`TimeProvider`] so tests can pin it.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if system time is before the Unix epoch rather than panicking.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Trait for injectable time sources.
pub trait TimeProvider: Send + Sync {
    /// Current Unix timestamp in milliseconds.
    fn now_unix_ms(&self) -> u64;
}

/// Production time provider backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Simulated time provider for deterministic tests.
///
/// Clones share the same underlying clock.
#[derive(Debug, Clone)]
pub struct SimulatedTimeProvider {
    current_time_ms: Arc<AtomicU64>,
}

impl SimulatedTimeProvider {
    /// Create a provider starting at the given timestamp.
    pub fn new(initial_time_ms: u64) -> SimulatedTimeProvider {
        SimulatedTimeProvider {
            current_time_ms: Arc::new(AtomicU64::new(initial_time_ms)),
        }
    }

    /// Advance time by `delta_ms` milliseconds.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.current_time_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the current time to a specific value.
    pub fn set_ms(&self, time_ms: u64) {
        self.current_time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl TimeProvider for SimulatedTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_is_monotonic_and_nonzero() {
        let t1 = current_time_ms();
        let t2 = current_time_ms();
        assert!(t1 > 0);
        assert!(t2 >= t1);
    }

    #[test]
    fn simulated_time_advances_and_shares_state() {
        let time = SimulatedTimeProvider::new(1_000_000);
        let alias = time.clone();
        time.advance_ms(500);
        assert_eq!(alias.now_unix_ms(), 1_000_500);
        alias.set_ms(2_000_000);
        assert_eq!(time.now_unix_ms(), 2_000_000);
    }
}
