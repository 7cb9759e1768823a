//! Countdown clock announcing the next transmit activation to the host.

use crate::types::{IntervalFraction, NANOS_PER_SECOND};

/// Next-event bookkeeping for a countdown clock.
///
/// The host learns about a new event time exactly once: the first interval
/// query after a change reports [`Changed`](crate::types::IntervalQualifier::Changed),
/// every later query reports `Unchanged` until the time moves again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountdownClock {
    next_event_ns: u64,
    is_set: bool,
    changed: bool,
}

impl CountdownClock {
    /// Create a clock with no scheduled event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the next event. Only a different time (or a previously unset
    /// clock) counts as a change.
    pub fn schedule(&mut self, time_ns: u64) {
        if !self.is_set || self.next_event_ns != time_ns {
            self.next_event_ns = time_ns;
            self.is_set = true;
            self.changed = true;
        }
    }

    /// Mark the next event as unknown.
    pub fn unset(&mut self) {
        self.is_set = false;
    }

    /// Forget the scheduled event and any unreported change, as after the
    /// clock has ticked.
    pub fn invalidate(&mut self) {
        self.is_set = false;
        self.changed = false;
    }

    /// The scheduled event time, if known.
    pub fn next_event_ns(&self) -> Option<u64> {
        self.is_set.then_some(self.next_event_ns)
    }

    /// Whether a change is waiting to be reported.
    pub fn has_pending_change(&self) -> bool {
        self.is_set && self.changed
    }

    /// Answer an interval query at `now_ns`, consuming the change flag.
    pub fn query(&mut self, now_ns: u64) -> IntervalFraction {
        if !self.is_set {
            return IntervalFraction::not_yet_known();
        }
        if self.changed {
            self.changed = false;
            IntervalFraction::changed(
                self.next_event_ns.saturating_sub(now_ns),
                NANOS_PER_SECOND,
            )
        } else {
            IntervalFraction::unchanged()
        }
    }
}
