//! Per-credential nonce allocation.
//!
//! Every signed action (orders and leverage updates alike) consumes one
//! nonce. Values are strictly increasing across all callers sharing a
//! `NonceManager`, follow the exchange clock once synced, and never move
//! backwards when the local clock does.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hlx_telemetry::Metrics;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NonceError {
    /// Local clock and exchange clock disagree by more than the exchange
    /// will accept.
    #[error("time drift too large: {0}ms")]
    TimeDriftTooLarge(i64),
}

/// Millisecond wall clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // Pre-epoch clocks clamp to zero; the counter still increases.
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Shared nonce source for one signing credential.
///
/// `next()` returns `max(last + 1, local_time + server_offset)` via a CAS
/// loop, so concurrent submissions for different assets never observe the
/// same value.
pub struct NonceManager {
    last: AtomicU64,
    /// server_time - local_time, positive when the exchange is ahead.
    server_offset_ms: AtomicI64,
    last_sync_ms: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl NonceManager {
    const DRIFT_WARN_MS: i64 = 2_000;
    const DRIFT_MAX_MS: i64 = 5_000;

    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            last: AtomicU64::new(now),
            server_offset_ms: AtomicI64::new(0),
            last_sync_ms: AtomicU64::new(0),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Local time corrected by the last measured exchange offset.
    pub fn approx_server_time_ms(&self) -> u64 {
        let local = self.clock.now_ms();
        let offset = self.server_offset_ms.load(Ordering::Acquire);
        if offset >= 0 {
            local.saturating_add(offset.unsigned_abs())
        } else {
            local.saturating_sub(offset.unsigned_abs())
        }
    }

    /// Allocate the next nonce.
    pub fn next(&self) -> u64 {
        let target = self.approx_server_time_ms();
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let candidate = current.saturating_add(1).max(target);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    Metrics::nonce_issued();
                    return candidate;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Record the exchange's clock reading.
    ///
    /// Fails without touching state when the drift exceeds 5s; logs a
    /// warning above 2s. The counter is fast-forwarded to `server_time_ms`.
    pub fn sync_with_server(&self, server_time_ms: u64) -> Result<(), NonceError> {
        let local = self.clock.now_ms();
        let offset = i64::try_from(i128::from(server_time_ms) - i128::from(local))
            .unwrap_or(i64::MAX);

        Metrics::server_time_offset(offset);
        if offset.abs() > Self::DRIFT_MAX_MS {
            return Err(NonceError::TimeDriftTooLarge(offset));
        }
        if offset.abs() > Self::DRIFT_WARN_MS {
            warn!(offset_ms = offset, "Exchange clock drift above warning threshold");
        } else {
            debug!(offset_ms = offset, "Synced nonce clock with exchange");
        }

        self.server_offset_ms.store(offset, Ordering::Release);
        self.last_sync_ms.store(local, Ordering::Release);
        self.last.fetch_max(server_time_ms, Ordering::AcqRel);
        Ok(())
    }

    pub fn server_offset_ms(&self) -> i64 {
        self.server_offset_ms.load(Ordering::Acquire)
    }

    /// Local time of the last successful sync, zero if never synced.
    pub fn last_sync_ms(&self) -> u64 {
        self.last_sync_ms.load(Ordering::Acquire)
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::with_system_clock()
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicU64,
}

impl FixedClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::Release);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    const T0: u64 = 1_769_339_470_576;

    fn manager_at(t: u64) -> (Arc<FixedClock>, NonceManager) {
        let clock = Arc::new(FixedClock::new(t));
        let manager = NonceManager::new(clock.clone());
        (clock, manager)
    }

    #[test]
    fn test_strictly_increasing_with_frozen_clock() {
        let (_, nonces) = manager_at(T0);
        let mut prev = 0;
        for _ in 0..500 {
            let n = nonces.next();
            assert!(n > prev);
            prev = n;
        }
    }

    #[test]
    fn test_unique_across_threads() {
        let (_, nonces) = manager_at(T0);
        let nonces = Arc::new(nonces);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let nonces = Arc::clone(&nonces);
                thread::spawn(move || (0..2_000).map(|_| nonces.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for n in handle.join().unwrap() {
                assert!(seen.insert(n), "duplicate nonce {n}");
            }
        }
        assert_eq!(seen.len(), 12_000);
    }

    #[test]
    fn test_clock_going_backwards_never_repeats() {
        let (clock, nonces) = manager_at(T0);
        let before = nonces.next();
        clock.set(T0 - 60_000);
        assert!(nonces.next() > before);
    }

    #[test]
    fn test_follows_clock_forward() {
        let (clock, nonces) = manager_at(T0);
        nonces.next();
        clock.advance(3_000);
        assert!(nonces.next() >= T0 + 3_000);
    }

    #[test]
    fn test_sync_applies_offset_and_fast_forwards() {
        let (_, nonces) = manager_at(T0);
        nonces.sync_with_server(T0 + 1_500).unwrap();
        assert_eq!(nonces.server_offset_ms(), 1_500);
        assert_eq!(nonces.last_sync_ms(), T0);
        assert!(nonces.next() > T0 + 1_500);

        let (_, behind) = manager_at(T0);
        behind.sync_with_server(T0 - 400).unwrap();
        assert_eq!(behind.approx_server_time_ms(), T0 - 400);
    }

    #[test]
    fn test_sync_rejects_large_drift() {
        let (_, nonces) = manager_at(T0);
        assert_eq!(
            nonces.sync_with_server(T0 + 5_001),
            Err(NonceError::TimeDriftTooLarge(5_001))
        );
        assert_eq!(
            nonces.sync_with_server(T0 - 5_001),
            Err(NonceError::TimeDriftTooLarge(-5_001))
        );
        assert_eq!(nonces.server_offset_ms(), 0);
    }

    #[test]
    fn test_warn_band_still_syncs() {
        let (_, nonces) = manager_at(T0);
        assert!(nonces.sync_with_server(T0 + 2_001).is_ok());
        assert_eq!(nonces.server_offset_ms(), 2_001);
    }
}
