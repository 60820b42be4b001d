use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use crate::node::events::Events;

/// Interrupt-safe mailbox of pending deferred work.
///
/// Producers (interrupt handlers) [`post`](Self::post) events, the main loop
/// [`drain`](Self::drain)s them. Pending work is a bitmask, so posting an
/// event that is already pending coalesces with it: handlers must be
/// idempotent and cannot count hardware occurrences through the scheduler.
/// Nothing about the order in which two pending events were posted survives.
pub struct Scheduler {
    pending: Mutex<Cell<u32>>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(0)),
        }
    }

    /// Discards all pending events.
    pub fn open(&self) {
        critical_section::with(|cs| self.pending.borrow(cs).set(0));
    }

    /// Marks `events` pending.
    pub fn post(&self, events: Events) {
        critical_section::with(|cs| self.post_in(cs, events));
    }

    /// Removes `events` from the pending set.
    pub fn clear(&self, events: Events) {
        critical_section::with(|cs| self.clear_in(cs, events));
    }

    /// Snapshot of the pending set.
    pub fn pending(&self) -> Events {
        critical_section::with(|cs| self.pending_in(cs))
    }

    /// [`post`](Self::post) for callers already inside a critical section.
    pub fn post_in(&self, cs: CriticalSection<'_>, events: Events) {
        let cell = self.pending.borrow(cs);
        cell.set(cell.get() | events.bits());
    }

    /// [`clear`](Self::clear) for callers already inside a critical section.
    pub fn clear_in(&self, cs: CriticalSection<'_>, events: Events) {
        let cell = self.pending.borrow(cs);
        cell.set(cell.get() & !events.bits());
    }

    /// [`pending`](Self::pending) for callers already inside a critical section.
    pub fn pending_in(&self, cs: CriticalSection<'_>) -> Events {
        Events::from_bits(self.pending.borrow(cs).get())
    }

    /// Runs `handler` once for every event pending at the time of the call.
    ///
    /// Events are visited lowest bit first. Each one is cleared only after
    /// its handler returns, so a producer that re-posts it while the handler
    /// runs is absorbed into the same occurrence. Events posted for the first
    /// time during the drain are left for the next call.
    ///
    /// Returns the set that was handled.
    pub fn drain(&self, mut handler: impl FnMut(Events)) -> Events {
        let snapshot = self.pending();
        for event in snapshot {
            handler(event);
            self.clear(event);
        }
        snapshot
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
