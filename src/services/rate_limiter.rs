//! Sliding-window event counter keyed by an arbitrary string.
//!
//! `WindowCounterStore` keeps, per key, the timestamps (ms since epoch) of the
//! events it admitted. Every check lazily drops timestamps that fell out of the
//! window before counting. Limit and window are supplied per call so one store
//! can back several policies.
//!
//! State is in-memory and resets on process restart. Share it via
//! `Arc<WindowCounterStore>`; the read-filter-append sequence runs under one
//! lock, so two concurrent callers can never both take the last free slot.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::clock::Clock;

/// Outcome of [`WindowCounterStore::check_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    /// Under the limit; the event was recorded.
    Recorded,
    /// Limit already reached; nothing was recorded. `retry_after_ms` is the
    /// time until the oldest in-window event expires.
    Exceeded { retry_after_ms: i64 },
}

pub struct WindowCounterStore {
    entries: Mutex<HashMap<String, Vec<i64>>>,
    clock: Arc<dyn Clock>,
}

impl WindowCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Check `key` against `limit` events per `window_ms`, recording the event
    /// only when it is admitted.
    pub fn check_and_record(&self, key: &str, limit: usize, window_ms: i64) -> WindowCheck {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();

        let timestamps = entries.entry(key.to_string()).or_default();
        timestamps.retain(|t| now - *t < window_ms);

        if timestamps.len() >= limit {
            let retry_after_ms = match timestamps.first() {
                Some(oldest) => oldest + window_ms - now,
                None => window_ms,
            };
            return WindowCheck::Exceeded { retry_after_ms };
        }

        // Keep the list ordered even if the wall clock steps backwards.
        let stamp = timestamps.last().map_or(now, |last| now.max(*last));
        timestamps.push(stamp);
        WindowCheck::Recorded
    }

    /// Returns `true` when the limit was exceeded (event not recorded),
    /// `false` when the event was admitted and recorded.
    pub fn record_and_check(&self, key: &str, limit: usize, window_ms: i64) -> bool {
        matches!(
            self.check_and_record(key, limit, window_ms),
            WindowCheck::Exceeded { .. }
        )
    }

    /// Drop keys with no timestamps inside `window_ms`. Returns how many keys
    /// were removed.
    pub fn sweep(&self, window_ms: i64) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, timestamps| {
            timestamps.retain(|t| now - *t < window_ms);
            !timestamps.is_empty()
        });
        before - entries.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, WindowCounterStore) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = WindowCounterStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn allows_within_limit() {
        let (_, s) = store();
        assert!(!s.record_and_check("10.0.0.1", 3, 60_000));
        assert!(!s.record_and_check("10.0.0.1", 3, 60_000));
        assert!(!s.record_and_check("10.0.0.1", 3, 60_000));
    }

    #[test]
    fn blocks_over_limit_without_recording() {
        let (clock, s) = store();
        for _ in 0..3 {
            s.record_and_check("10.0.0.1", 3, 60_000);
        }
        assert!(s.record_and_check("10.0.0.1", 3, 60_000));

        // The rejected call must not extend the window: once the three
        // admitted events age out, the key is free again.
        clock.advance_ms(60_000);
        assert!(!s.record_and_check("10.0.0.1", 3, 60_000));
    }

    #[test]
    fn keys_are_independent() {
        let (_, s) = store();
        s.record_and_check("a", 2, 60_000);
        s.record_and_check("a", 2, 60_000);
        assert!(s.record_and_check("a", 2, 60_000));
        assert!(!s.record_and_check("b", 2, 60_000));
    }

    #[test]
    fn retry_after_follows_oldest_event() {
        let (clock, s) = store();
        s.check_and_record("ip", 2, 60_000);
        clock.advance_ms(20_000);
        s.check_and_record("ip", 2, 60_000);
        clock.advance_ms(10_000);

        // Oldest event is 30s old, so it leaves the window in 30s.
        assert_eq!(
            s.check_and_record("ip", 2, 60_000),
            WindowCheck::Exceeded { retry_after_ms: 30_000 }
        );

        clock.advance_ms(15_000);
        assert_eq!(
            s.check_and_record("ip", 2, 60_000),
            WindowCheck::Exceeded { retry_after_ms: 15_000 }
        );
    }

    #[test]
    fn sliding_window_frees_one_slot_at_a_time() {
        let (clock, s) = store();
        s.check_and_record("ip", 2, 60_000);
        clock.advance_ms(30_000);
        s.check_and_record("ip", 2, 60_000);
        clock.advance_ms(30_000);

        // First event just expired, second has 30s left.
        assert_eq!(s.check_and_record("ip", 2, 60_000), WindowCheck::Recorded);
        assert!(s.record_and_check("ip", 2, 60_000));
    }

    #[test]
    fn sweep_removes_only_stale_keys() {
        let (clock, s) = store();
        s.record_and_check("old", 5, 60_000);
        clock.advance_ms(45_000);
        s.record_and_check("fresh", 5, 60_000);
        clock.advance_ms(20_000);

        assert_eq!(s.sweep(60_000), 1);
        assert_eq!(s.tracked_keys(), 1);
    }

    #[test]
    fn timestamps_stay_ordered_when_clock_steps_back() {
        let (clock, s) = store();
        s.record_and_check("ip", 5, 60_000);
        clock.advance_ms(-5_000);
        s.record_and_check("ip", 5, 60_000);

        let entries = s.entries.lock();
        let list = &entries["ip"];
        assert!(list.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn concurrent_callers_never_exceed_limit() {
        let (_, s) = store();
        let s = Arc::new(s);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || !s.record_and_check("burst", 5, 60_000))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
    }
}
