//! Shared types used across the bus models.
//!
//! This module contains the host-facing vocabulary of the stepping contract:
//! value references, clock kinds and interval qualifiers, plus the conversion
//! from the host's floating point time to integer nanoseconds.

/// Numeric handle of a model variable, as assigned by the host contract.
pub type ValueReference = u32;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Convert a host time in seconds to nanoseconds, rounding to nearest.
#[inline]
pub fn time_to_ns(time_s: f64) -> u64 {
    (time_s * 1.0e9 + 0.5) as u64
}

/// Convert nanoseconds to a host time in seconds.
#[inline]
pub fn ns_to_time(time_ns: u64) -> f64 {
    time_ns as f64 / 1.0e9
}

/// How a model's transmit clock is driven by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClockType {
    /// The model announces its next tick through interval queries.
    #[default]
    Countdown,
    /// The model raises the clock itself and the host reads it back.
    Triggered,
    /// The host ticks the clock at a fixed period.
    Periodic,
}

impl ClockType {
    /// Whether the host may activate this clock with `set_clock`.
    pub fn host_settable(self) -> bool {
        matches!(self, ClockType::Countdown | ClockType::Periodic)
    }
}

/// Qualifier attached to an interval query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalQualifier {
    /// No next tick is scheduled.
    #[default]
    NotYetKnown,
    /// The interval is unchanged since the previous query.
    Unchanged,
    /// The interval changed; `counter / resolution` seconds until the tick.
    Changed,
}

/// Result of an interval query on a countdown clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntervalFraction {
    /// Interval length in units of `1 / resolution` seconds.
    pub counter: u64,
    /// Number of counter units per second.
    pub resolution: u64,
    /// Whether the interval is known and whether it changed.
    pub qualifier: IntervalQualifier,
}

impl IntervalFraction {
    /// An interval that is not yet known.
    pub const fn not_yet_known() -> Self {
        Self {
            counter: 0,
            resolution: 0,
            qualifier: IntervalQualifier::NotYetKnown,
        }
    }

    /// An interval that has not changed since the last query.
    pub const fn unchanged() -> Self {
        Self {
            counter: 0,
            resolution: 0,
            qualifier: IntervalQualifier::Unchanged,
        }
    }

    /// A freshly changed interval.
    pub const fn changed(counter: u64, resolution: u64) -> Self {
        Self {
            counter,
            resolution,
            qualifier: IntervalQualifier::Changed,
        }
    }
}
