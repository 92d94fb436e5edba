//! Session cooldown: a mandatory quiet period between two bookings from the
//! same person.
//!
//! Each identity (`email_phone`) owns one slot holding the time of its latest
//! accepted submission. The admission path does not read and write the slot in
//! two separate steps; it takes a [`CooldownReservation`] instead. Reserving
//! checks the slot and, when free, marks it pending under the same lock, so a
//! burst of simultaneous requests from one identity yields a single winner.
//! The reservation is committed after the booking is stored. Dropping it
//! uncommitted (store failure, cancellation) restores the previous slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::clock::Clock;

pub const DEFAULT_COOLDOWN_MS: i64 = 15 * 60 * 1000;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Committed(i64),
    /// A submission for this identity is in flight.
    Pending { reservation: u64, previous: Option<i64> },
}

struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    next_reservation: AtomicU64,
    clock: Arc<dyn Clock>,
    window_ms: i64,
}

/// Cheap to clone; all clones share the same slot map.
#[derive(Clone)]
pub struct SessionCooldown {
    inner: Arc<Inner>,
}

impl SessionCooldown {
    pub fn new(clock: Arc<dyn Clock>, window_ms: i64) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_reservation: AtomicU64::new(1),
                clock,
                window_ms,
            }),
        }
    }

    /// Remaining cooldown in ms, or `None` if `key` may submit now.
    /// An in-flight submission counts as a full window.
    pub fn is_restricted(&self, key: &str) -> Option<i64> {
        let now = self.inner.clock.now_ms();
        let slots = self.inner.slots.lock();
        slots.get(key).and_then(|slot| self.remaining(slot, now))
    }

    /// Unconditionally set the slot for `key` to now.
    pub fn commit(&self, key: &str) {
        let now = self.inner.clock.now_ms();
        self.inner.slots.lock().insert(key.to_string(), Slot::Committed(now));
    }

    /// Atomically check `key` and claim it. `Err` carries the remaining
    /// cooldown in ms.
    pub fn reserve(&self, key: &str) -> Result<CooldownReservation, i64> {
        let now = self.inner.clock.now_ms();
        let mut slots = self.inner.slots.lock();

        let previous = match slots.get(key) {
            Some(slot) => {
                if let Some(remaining) = self.remaining(slot, now) {
                    return Err(remaining);
                }
                match slot {
                    Slot::Committed(at) => Some(*at),
                    Slot::Pending { .. } => None,
                }
            }
            None => None,
        };

        let reservation = self.inner.next_reservation.fetch_add(1, Ordering::Relaxed);
        slots.insert(key.to_string(), Slot::Pending { reservation, previous });

        Ok(CooldownReservation {
            key: key.to_string(),
            reservation,
            cooldown: self.clone(),
            committed: false,
        })
    }

    /// Drop expired committed slots. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.inner.clock.now_ms();
        let window_ms = self.inner.window_ms;
        let mut slots = self.inner.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Committed(at) => now - *at < window_ms,
            Slot::Pending { .. } => true,
        });
        before - slots.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.inner.slots.lock().len()
    }

    fn remaining(&self, slot: &Slot, now: i64) -> Option<i64> {
        match slot {
            Slot::Committed(at) => {
                let elapsed = now - at;
                (elapsed < self.inner.window_ms).then(|| self.inner.window_ms - elapsed)
            }
            Slot::Pending { .. } => Some(self.inner.window_ms),
        }
    }

    fn release(&self, key: &str, reservation: u64) {
        let mut slots = self.inner.slots.lock();
        let previous = match slots.get(key) {
            Some(Slot::Pending { reservation: r, previous }) if *r == reservation => *previous,
            // Already overwritten by a direct commit.
            _ => return,
        };
        match previous {
            Some(at) => {
                slots.insert(key.to_string(), Slot::Committed(at));
            }
            None => {
                slots.remove(key);
            }
        }
    }
}

/// Claim on an identity's cooldown slot, held while a submission is persisted.
pub struct CooldownReservation {
    key: String,
    reservation: u64,
    cooldown: SessionCooldown,
    committed: bool,
}

impl CooldownReservation {
    /// Start the cooldown window for this identity now.
    pub fn commit(mut self) {
        self.cooldown.commit(&self.key);
        self.committed = true;
    }
}

impl Drop for CooldownReservation {
    fn drop(&mut self) {
        if !self.committed {
            self.cooldown.release(&self.key, self.reservation);
        }
    }
}

/// Whole minutes for display, rounded up.
pub fn remaining_minutes(remaining_ms: i64) -> u64 {
    (remaining_ms.max(0) as u64).div_ceil(60_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;

    const KEY: &str = "jana@gmail.com_420777123456";

    fn cooldown() -> (Arc<ManualClock>, SessionCooldown) {
        let clock = Arc::new(ManualClock::new(10_000_000));
        (clock.clone(), SessionCooldown::new(clock, DEFAULT_COOLDOWN_MS))
    }

    #[test]
    fn unknown_identity_is_not_restricted() {
        let (_, c) = cooldown();
        assert_eq!(c.is_restricted(KEY), None);
    }

    #[test]
    fn commit_starts_window() {
        let (clock, c) = cooldown();
        c.commit(KEY);
        clock.advance_ms(60_000);
        assert_eq!(c.is_restricted(KEY), Some(DEFAULT_COOLDOWN_MS - 60_000));

        clock.advance_ms(DEFAULT_COOLDOWN_MS - 60_000);
        assert_eq!(c.is_restricted(KEY), None);
    }

    #[test]
    fn reservation_blocks_concurrent_claim() {
        let (_, c) = cooldown();
        let first = c.reserve(KEY).unwrap();
        assert_eq!(c.reserve(KEY).err(), Some(DEFAULT_COOLDOWN_MS));
        first.commit();
        assert!(c.reserve(KEY).is_err());
    }

    #[test]
    fn dropped_reservation_frees_slot() {
        let (_, c) = cooldown();
        let r = c.reserve(KEY).unwrap();
        drop(r);
        assert_eq!(c.is_restricted(KEY), None);
        assert_eq!(c.tracked_identities(), 0);
    }

    #[test]
    fn dropped_reservation_restores_expired_previous_slot() {
        let (clock, c) = cooldown();
        c.commit(KEY);
        clock.advance_ms(DEFAULT_COOLDOWN_MS + 1);

        let r = c.reserve(KEY).unwrap();
        drop(r);

        // The old, expired stamp is back; still unrestricted.
        assert_eq!(c.tracked_identities(), 1);
        assert_eq!(c.is_restricted(KEY), None);
    }

    #[test]
    fn sweep_keeps_active_and_pending_slots() {
        let (clock, c) = cooldown();
        c.commit("old");
        clock.advance_ms(DEFAULT_COOLDOWN_MS);
        c.commit("recent");
        let _pending = c.reserve("pending").unwrap();

        assert_eq!(c.sweep(), 1);
        assert_eq!(c.tracked_identities(), 2);
    }

    #[test]
    fn remaining_minutes_rounds_up() {
        assert_eq!(remaining_minutes(DEFAULT_COOLDOWN_MS), 15);
        assert_eq!(remaining_minutes(60_001), 2);
        assert_eq!(remaining_minutes(1), 1);
        assert_eq!(remaining_minutes(0), 0);
    }

    #[test]
    fn concurrent_reservations_have_one_winner() {
        let (_, c) = cooldown();
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || match c.reserve(KEY) {
                    Ok(r) => {
                        r.commit();
                        true
                    }
                    Err(_) => false,
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
