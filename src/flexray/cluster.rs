//! FlexRay cluster configuration and schedule arithmetic.
//!
//! A FlexRay cycle is laid out as
//!
//! ```text
//! | static slot 1 | ... | static slot N | minislot 1 ... minislot M | symbol window | NIT |
//! ```
//!
//! and cycles repeat `number_of_cycles` times per iteration. All schedule
//! positions are measured in macroticks from the cluster start time.
//!
//! # Example
//!
//! ```
//! use flexray_sim::flexray::ClusterConfig;
//!
//! let config = ClusterConfig::demo();
//! assert_eq!(config.slot_boundaries_mt(0, 0, 1), (0, 100));
//! assert_eq!(config.slot_boundaries_mt(0, 0, 2), (100, 200));
//! assert_eq!(config.slot_boundaries_mt(0, 0, 3).0, 200);
//! ```

use crate::{Error, Result};

/// Timing parameters of a FlexRay cluster.
///
/// Immutable once accepted by a node or bus; accept only values that pass
/// [`ClusterConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterConfig {
    /// Duration of one macrotick in nanoseconds.
    pub macrotick_duration_ns: u32,
    /// Number of macroticks in one cycle.
    pub macroticks_per_cycle: u16,
    /// Number of cycles in one iteration (cycle count max + 1).
    pub number_of_cycles: u8,
    /// Action point offset in macroticks.
    pub action_point_offset: u8,
    /// Length of a static slot in macroticks.
    pub static_slot_duration_mt: u16,
    /// Number of slots in the static segment.
    pub number_of_static_slots: u16,
    /// Payload length of static frames in two-byte words.
    pub static_payload_length: u8,
    /// Action point offset within a minislot.
    pub minislot_action_point_offset: u8,
    /// Number of minislots in the dynamic segment.
    pub number_of_minislots: u16,
    /// Length of a minislot in macroticks.
    pub minislot_duration_mt: u8,
    /// Action point offset within the symbol window.
    pub symbol_action_point_offset: u8,
    /// Length of the symbol window in macroticks.
    pub symbol_window_length: u8,
    /// Length of the network idle time in macroticks.
    pub nit_length: u8,
    /// Length of the network management vector in bytes.
    pub nm_vector_length: u8,
    /// Idle time after a dynamic slot in minislots.
    pub dynamic_slot_idle_time: u32,
}

impl ClusterConfig {
    /// The reference two-node cluster: 1 µs macroticks, 1 ms cycles, two
    /// static slots of 100 macroticks and ten minislots of 10 macroticks.
    pub const fn demo() -> Self {
        Self {
            macrotick_duration_ns: 1000,
            macroticks_per_cycle: 1000,
            number_of_cycles: 2,
            action_point_offset: 1,
            static_slot_duration_mt: 100,
            number_of_static_slots: 2,
            static_payload_length: 64,
            minislot_action_point_offset: 1,
            number_of_minislots: 10,
            minislot_duration_mt: 10,
            symbol_action_point_offset: 1,
            symbol_window_length: 10,
            nit_length: 2,
            nm_vector_length: 0,
            dynamic_slot_idle_time: 0,
        }
    }

    /// Check the schedule invariants.
    ///
    /// All durations must be positive and the static segment, dynamic
    /// segment, symbol window and NIT must fit into one cycle.
    pub fn validate(&self) -> Result<()> {
        if self.macrotick_duration_ns == 0 {
            return Err(Error::InvalidClusterConfig("macrotick duration is zero"));
        }
        if self.macroticks_per_cycle == 0 {
            return Err(Error::InvalidClusterConfig("cycle length is zero"));
        }
        if self.number_of_cycles == 0 || self.number_of_cycles > 64 {
            return Err(Error::InvalidClusterConfig(
                "number of cycles must be between 1 and 64",
            ));
        }
        if self.number_of_static_slots == 0 || self.static_slot_duration_mt == 0 {
            return Err(Error::InvalidClusterConfig("static segment is empty"));
        }
        if self.minislot_duration_mt == 0 {
            return Err(Error::InvalidClusterConfig("minislot duration is zero"));
        }

        let used = self.static_segment_mt()
            + self.dynamic_segment_mt()
            + self.symbol_window_length as u64
            + self.nit_length as u64;
        if used > self.macroticks_per_cycle as u64 {
            return Err(Error::InvalidClusterConfig(
                "segments exceed the cycle length",
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration from JSON.
    ///
    /// Requires the `std` feature.
    #[cfg(feature = "std")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClusterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// Requires the `std` feature.
    #[cfg(feature = "std")]
    pub fn load_from_file(path: &str) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Length of the static segment in macroticks.
    pub fn static_segment_mt(&self) -> u64 {
        self.number_of_static_slots as u64 * self.static_slot_duration_mt as u64
    }

    /// Length of the dynamic segment in macroticks.
    pub fn dynamic_segment_mt(&self) -> u64 {
        self.number_of_minislots as u64 * self.minislot_duration_mt as u64
    }

    /// Number of addressable slots per cycle (static slots plus minislots).
    pub fn slots_per_cycle(&self) -> u16 {
        self.number_of_static_slots
            .saturating_add(self.number_of_minislots)
    }

    /// Duration of one cycle in nanoseconds.
    pub fn cycle_duration_ns(&self) -> u64 {
        self.macroticks_per_cycle as u64 * self.macrotick_duration_ns as u64
    }

    /// Macrotick at which `cycle` of `iteration` starts.
    pub fn cycle_start_mt(&self, iteration: u64, cycle: u8) -> u64 {
        let per_cycle = self.macroticks_per_cycle as u64;
        iteration * self.number_of_cycles as u64 * per_cycle + cycle as u64 * per_cycle
    }

    /// Start and end macrotick of `slot` in `cycle` of `iteration`.
    ///
    /// Static slots are bounded individually. Every minislot ends with the
    /// dynamic segment, since a dynamic frame may occupy any number of
    /// minislots once it has started.
    pub fn slot_boundaries_mt(&self, iteration: u64, cycle: u8, slot: u16) -> (u64, u64) {
        let cycle_offset = self.cycle_start_mt(iteration, cycle);
        let static_slots = self.number_of_static_slots;

        if slot <= static_slots {
            let duration = self.static_slot_duration_mt as u64;
            let index = slot.saturating_sub(1) as u64;
            (
                cycle_offset + index * duration,
                cycle_offset + (index + 1) * duration,
            )
        } else {
            let dynamic_offset = cycle_offset + self.static_segment_mt();
            let minislot = (slot - static_slots - 1) as u64;
            (
                dynamic_offset + minislot * self.minislot_duration_mt as u64,
                dynamic_offset + self.dynamic_segment_mt(),
            )
        }
    }

    /// Convert simulation time to macroticks since `start_ns`, rounding to
    /// the nearest macrotick. Times before the start map to zero.
    pub fn time_to_mt(&self, now_ns: u64, start_ns: u64) -> u64 {
        let mt = self.macrotick_duration_ns as u64;
        (now_ns.saturating_sub(start_ns) + mt / 2) / mt
    }

    /// Convert a macrotick count since `start_ns` back to simulation time.
    pub fn mt_to_ns(&self, start_ns: u64, mt: u64) -> u64 {
        start_ns + mt * self.macrotick_duration_ns as u64
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::demo()
    }
}

/// Position in the bus schedule.
///
/// Only ever moves forward: slots wrap into the next cycle and cycles wrap
/// into the next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchedulePosition {
    /// Number of completed passes through all cycles.
    pub iteration: u64,
    /// Cycle within the iteration.
    pub cycle: u8,
    /// Slot within the cycle (1-based).
    pub slot: u16,
}

impl SchedulePosition {
    /// The first slot of the first cycle.
    pub const fn start() -> Self {
        Self {
            iteration: 0,
            cycle: 0,
            slot: 1,
        }
    }

    /// Boundaries of the current slot.
    pub fn slot_boundaries_mt(&self, config: &ClusterConfig) -> (u64, u64) {
        config.slot_boundaries_mt(self.iteration, self.cycle, self.slot)
    }

    /// Macrotick at which the current cycle ends.
    pub fn cycle_end_mt(&self, config: &ClusterConfig) -> u64 {
        config.cycle_start_mt(self.iteration, self.cycle) + config.macroticks_per_cycle as u64
    }

    /// Move to the next slot of the current cycle.
    ///
    /// Returns `false` and stays put on the last slot of the cycle; the cycle
    /// itself only ends through [`SchedulePosition::advance_cycle`].
    pub fn advance_slot(&mut self, config: &ClusterConfig) -> bool {
        if self.slot >= config.slots_per_cycle() {
            return false;
        }
        self.slot += 1;
        true
    }

    /// Move to the first slot of the next cycle, wrapping into the next
    /// iteration after the last cycle.
    pub fn advance_cycle(&mut self, config: &ClusterConfig) {
        self.slot = 1;
        self.cycle += 1;
        if self.cycle >= config.number_of_cycles {
            self.cycle = 0;
            self.iteration += 1;
        }
    }
}

impl Default for SchedulePosition {
    fn default() -> Self {
        Self::start()
    }
}
