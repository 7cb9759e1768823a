//! Coldstart state machine of a FlexRay node.
//!
//! A coldstart node listens until its collision avoidance time, sends a CAS
//! symbol, then announces the cluster start time one cycle later. A node
//! that hears another node's CAS first falls back to passive listening and
//! integrates once it receives the start time.
//!
//! ```text
//! WaitSendCas --CAS sent--> WaitStartComm --start sent--> CollisionResolution
//!      |                        |                               | 4 cycles with >= 1 startup frame
//!      +---- CAS received ------+--> ListenPassive               v
//!      |                                  |               ConsistencyCheck --+
//!      +-------- start received ----------+--> IntegrationColdstartCheck      |
//!                                                    | 4 cycles with >= 1    | 4 cycles with >= 2
//!                                                    v                       v
//!                                                   Join ---- 4 cycles with >= 2 ----> Complete
//! ```
//!
//! The state machine performs no I/O. [`Startup::poll`] reports the
//! operations the node has to send as [`StartupAction`] values.

use log::{info, warn};

use crate::flexray::frame::SymbolType;

/// Consecutive qualifying cycles required for each startup transition.
pub const STARTUP_CYCLES: u64 = 4;

/// Phase of the coldstart procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StartupPhase {
    /// Listening until the node's collision avoidance time.
    WaitSendCas,
    /// CAS sent, waiting for the announced start time.
    WaitStartComm,
    /// Another node claimed the bus; waiting for its start time.
    ListenPassive,
    /// Leading coldstart node sending startup frames alone.
    CollisionResolution,
    /// Leading coldstart node waiting for followers to join.
    ConsistencyCheck,
    /// Following node synchronizing to the schedule without sending.
    IntegrationColdstartCheck,
    /// Following node sending its own startup frames.
    Join,
    /// Startup finished; data frames may be sent.
    Complete,
}

impl StartupPhase {
    /// Whether the node is still listening for another node's startup.
    pub fn is_listening(self) -> bool {
        matches!(
            self,
            StartupPhase::WaitSendCas | StartupPhase::WaitStartComm | StartupPhase::ListenPassive
        )
    }

    /// Whether the node follows the cluster schedule.
    pub fn is_scheduled(self) -> bool {
        !self.is_listening()
    }

    /// Whether the node sends frames in its transmit slots.
    pub fn transmits(self) -> bool {
        self.is_scheduled() && self != StartupPhase::IntegrationColdstartCheck
    }
}

/// An operation the node has to send because of a startup transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupAction {
    /// Send a collision avoidance symbol on all channels.
    SendCas,
    /// Announce the start time of the first cycle.
    SendStartCommunication {
        /// Start of cycle 0 in nanoseconds.
        start_time_ns: u64,
    },
}

/// Startup progress of one node.
#[derive(Debug, Clone)]
pub struct Startup {
    phase: StartupPhase,
    next_transition_ns: u64,
    start_time_ns: u64,
    frames_in_cycle: u16,
    cycles_with_one: u64,
    cycles_with_two: u64,
}

impl Startup {
    /// A node that sends its CAS at `cas_time_ns` unless it hears another
    /// node first.
    pub fn new(cas_time_ns: u64) -> Self {
        Self {
            phase: StartupPhase::WaitSendCas,
            next_transition_ns: cas_time_ns,
            start_time_ns: 0,
            frames_in_cycle: 0,
            cycles_with_one: 0,
            cycles_with_two: 0,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> StartupPhase {
        self.phase
    }

    /// Start of cycle 0, valid once the node follows the schedule.
    pub fn start_time_ns(&self) -> u64 {
        self.start_time_ns
    }

    /// Time of the next timed transition, if one is pending.
    pub fn next_transition_ns(&self) -> Option<u64> {
        match self.phase {
            StartupPhase::WaitSendCas | StartupPhase::WaitStartComm => Some(self.next_transition_ns),
            _ => None,
        }
    }

    /// Startup frames counted in the running cycle.
    pub fn frames_in_cycle(&self) -> u16 {
        self.frames_in_cycle
    }

    /// Consecutive completed cycles with at least one startup frame.
    pub fn cycles_with_one_startup_frame(&self) -> u64 {
        self.cycles_with_one
    }

    /// Consecutive completed cycles with at least two startup frames.
    pub fn cycles_with_two_startup_frames(&self) -> u64 {
        self.cycles_with_two
    }

    /// Run the timed transitions due at `now_ns`.
    ///
    /// Returns at most one action per call; call until `None` to drain.
    pub fn poll(&mut self, now_ns: u64, cycle_duration_ns: u64) -> Option<StartupAction> {
        match self.phase {
            StartupPhase::WaitSendCas if now_ns >= self.next_transition_ns => {
                // Align the start to a cycle boundary at least one full cycle ahead.
                let start = now_ns + cycle_duration_ns + (cycle_duration_ns - now_ns % cycle_duration_ns);
                info!("Sending CAS symbol, start of communication at {} ns", start);
                self.phase = StartupPhase::WaitStartComm;
                self.next_transition_ns = start;
                Some(StartupAction::SendCas)
            }
            StartupPhase::WaitStartComm if now_ns >= self.next_transition_ns => {
                let start_time_ns = self.next_transition_ns;
                info!(
                    "Sending StartCommunication with start time {} ns, moving to COLDSTART_COLLISION_RESOLUTION",
                    start_time_ns
                );
                self.phase = StartupPhase::CollisionResolution;
                self.start_time_ns = start_time_ns;
                self.next_transition_ns = 0;
                Some(StartupAction::SendStartCommunication { start_time_ns })
            }
            _ => None,
        }
    }

    /// Handle a received symbol. Returns whether it changed the phase.
    pub fn on_symbol(&mut self, symbol: SymbolType) -> bool {
        if symbol != SymbolType::CollisionAvoidance {
            warn!("Received unexpected symbol {:?}", symbol);
            return false;
        }
        if !self.phase.is_listening() {
            warn!("Unexpected CAS symbol in phase {:?}", self.phase);
            return false;
        }
        info!("Received CAS symbol, moving to COLDSTART_LISTEN_PASSIVE");
        self.phase = StartupPhase::ListenPassive;
        self.next_transition_ns = 0;
        true
    }

    /// Handle a received start time announcement. Returns whether it was
    /// accepted.
    pub fn on_start_communication(&mut self, start_time_ns: u64) -> bool {
        if !self.phase.is_listening() {
            warn!(
                "Unexpected StartCommunication with start time {} ns in phase {:?}",
                start_time_ns, self.phase
            );
            return false;
        }
        info!(
            "Received StartCommunication with start time {} ns, moving to INTEGRATION_COLDSTART_CHECK",
            start_time_ns
        );
        self.phase = StartupPhase::IntegrationColdstartCheck;
        self.next_transition_ns = 0;
        self.start_time_ns = start_time_ns;
        true
    }

    /// Count a startup frame sent or received in the running cycle.
    pub fn count_startup_frame(&mut self) {
        self.frames_in_cycle = self.frames_in_cycle.saturating_add(1);
    }

    /// Close the running cycle and apply the cycle-boundary transitions.
    ///
    /// Returns the new phase if it changed.
    pub fn end_cycle(&mut self) -> Option<StartupPhase> {
        let before = self.phase;

        if self.frames_in_cycle >= 1 {
            self.cycles_with_one += 1;
        } else {
            self.cycles_with_one = 0;
        }
        if self.frames_in_cycle >= 2 {
            self.cycles_with_two += 1;
        } else {
            self.cycles_with_two = 0;
        }
        info!(
            "Seen {} startup frames in the last cycle. The last {} cycles had >= 1 startup frames. \
             The last {} cycles had >= 2 startup frames.",
            self.frames_in_cycle, self.cycles_with_one, self.cycles_with_two
        );
        self.frames_in_cycle = 0;

        if self.phase == StartupPhase::IntegrationColdstartCheck && self.cycles_with_one >= STARTUP_CYCLES {
            info!("Moving to startup phase COLDSTART_JOIN");
            self.phase = StartupPhase::Join;
        }
        if self.phase == StartupPhase::CollisionResolution && self.cycles_with_one >= STARTUP_CYCLES {
            info!("Moving to startup phase COLDSTART_CONSISTENCY_CHECK");
            self.phase = StartupPhase::ConsistencyCheck;
        }
        if matches!(self.phase, StartupPhase::Join | StartupPhase::ConsistencyCheck)
            && self.cycles_with_two >= STARTUP_CYCLES
        {
            info!("FlexRay startup completed");
            self.phase = StartupPhase::Complete;
        }

        (self.phase != before).then_some(self.phase)
    }
}
