//! FlexRay node model.
//!
//! A node runs the coldstart procedure against the other nodes of the
//! cluster, sends its static slots once it follows the schedule and fills
//! its receive buffers from frames forwarded by the bus.
//!
//! Operations from the bus are queued in a [`RingBuffer`] when the receive
//! clock ticks. Configuration, symbol, confirmation and start operations are
//! handled as soon as they reach the head of the queue; frames wait there
//! until the node's schedule reaches their slot.
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::flexray::{FlexRayNode, node};
//! use flexray_sim::types::ClockType;
//! use flexray_sim::{BusModel, Instance};
//!
//! let mut instance = Instance::new("node1", FlexRayNode::new(ClockType::Countdown));
//! instance.enter_initialization_mode()?;
//! instance.exit_initialization_mode()?;
//!
//! // The cluster configuration is waiting for the transmit clock.
//! instance.set_clock(node::vr::TX_CLOCK, true)?;
//! let config = instance.get_binary(node::vr::TX_DATA)?;
//! instance.update_discrete_states()?;
//! ```

pub mod slot_table;
pub mod startup;
pub mod task;

use alloc::vec::Vec;
use core::cmp::Ordering;

use log::{debug, info, trace, warn};

pub use slot_table::{SlotAssignment, SlotTable};
pub use startup::{Startup, StartupAction, StartupPhase};
pub use task::{CounterApplication, PeriodicTask};

use super::cluster::{ClusterConfig, SchedulePosition};
use super::frame::{FlexRayChannel, FlexRayFrame, SymbolType};
use super::operation::{ColdstartNodeType, FlexRayConfiguration, FlexRayOperation};
use crate::countdown::CountdownClock;
use crate::instance::BusModel;
use crate::port::Port;
use crate::ring_buffer::RingBuffer;
use crate::types::{ClockType, IntervalFraction, ValueReference};
use crate::{Error, Result};

/// Value references of a FlexRay node.
pub mod vr {
    use crate::types::ValueReference;

    /// Operations received from the bus.
    pub const RX_DATA: ValueReference = 0;
    /// Operations sent to the bus.
    pub const TX_DATA: ValueReference = 1;
    /// Receive clock.
    pub const RX_CLOCK: ValueReference = 2;
    /// Transmit clock.
    pub const TX_CLOCK: ValueReference = 3;
    /// Whether the bus delivers frames on slot boundaries.
    pub const DELIVERY_ON_BOUNDARY: ValueReference = 127;
    /// Whether the node waits for bus confirmations.
    pub const BUS_NOTIFICATIONS: ValueReference = 128;
    /// Whether the node takes the second node's schedule.
    pub const IS_SECOND_NODE: ValueReference = 129;
}

/// CAS time of the first demo node.
pub const FIRST_NODE_CAS_TIME_NS: u64 = 10_000_000;

/// CAS time of the second demo node.
pub const SECOND_NODE_CAS_TIME_NS: u64 = 20_000_000;

/// A FlexRay node taking part in the coldstart and exchanging data frames.
#[derive(Debug, Clone)]
pub struct FlexRayNode {
    clock_type: ClockType,
    second_node: bool,
    notifications: bool,
    delivery_on_boundary: bool,
    cas_time_ns: Option<u64>,
    custom_slots: bool,

    config: ClusterConfig,
    startup: Startup,
    slots: SlotTable,
    position: SchedulePosition,
    app: CounterApplication,
    rx_queue: RingBuffer<FlexRayOperation>,
    port: Port,
    countdown: CountdownClock,

    now_ns: u64,
    pending_confirmation: bool,
    evaluated: bool,
    tx_clock_reported: bool,
}

impl FlexRayNode {
    /// Create the first demo node with the given transmit clock type.
    pub fn new(clock_type: ClockType) -> Self {
        Self {
            clock_type,
            second_node: false,
            notifications: false,
            delivery_on_boundary: false,
            cas_time_ns: None,
            custom_slots: false,
            config: ClusterConfig::demo(),
            startup: Startup::new(FIRST_NODE_CAS_TIME_NS),
            slots: SlotTable::demo(true),
            position: SchedulePosition::start(),
            app: CounterApplication::new(),
            rx_queue: RingBuffer::new(),
            port: Port::new(),
            countdown: CountdownClock::new(),
            now_ns: 0,
            pending_confirmation: false,
            evaluated: false,
            tx_clock_reported: false,
        }
    }

    /// Take the schedule and CAS time of the second demo node.
    pub fn with_second_node(mut self, second_node: bool) -> Self {
        self.second_node = second_node;
        self
    }

    /// Override the time at which the node sends its CAS symbol.
    pub fn with_cas_time_ns(mut self, cas_time_ns: u64) -> Self {
        self.cas_time_ns = Some(cas_time_ns);
        self
    }

    /// Wait for a confirmation after every transmitted frame.
    pub fn with_notifications(mut self, notifications: bool) -> Self {
        self.notifications = notifications;
        self
    }

    /// Use a custom cluster configuration.
    ///
    /// # Errors
    /// [`Error::InvalidClusterConfig`] if the configuration is not valid.
    pub fn with_cluster_config(mut self, config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Use a custom slot table instead of the demo schedule.
    pub fn with_slot_table(mut self, slots: SlotTable) -> Self {
        self.slots = slots;
        self.custom_slots = true;
        self
    }

    /// The transmit clock type.
    pub fn clock_type(&self) -> ClockType {
        self.clock_type
    }

    /// Whether the node runs the second node's schedule.
    pub fn is_second_node(&self) -> bool {
        self.second_node
    }

    /// The cluster configuration announced by the node.
    pub fn cluster_config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current startup phase.
    pub fn phase(&self) -> StartupPhase {
        self.startup.phase()
    }

    /// Startup progress.
    pub fn startup(&self) -> &Startup {
        &self.startup
    }

    /// Slot assignments and buffers.
    pub fn slot_table(&self) -> &SlotTable {
        &self.slots
    }

    /// The application running on the node.
    pub fn application(&self) -> &CounterApplication {
        &self.app
    }

    /// Current position in the schedule.
    pub fn position(&self) -> SchedulePosition {
        self.position
    }

    /// Number of received operations not yet consumed.
    pub fn queued_operations(&self) -> usize {
        self.rx_queue.len()
    }

    /// Whether the node waits for a confirmation before sending again.
    pub fn pending_confirmation(&self) -> bool {
        self.pending_confirmation
    }

    fn send(&mut self, op: FlexRayOperation) -> bool {
        self.port.send(&op)
    }

    fn run_startup(&mut self) {
        while let Some(action) = self.startup.poll(self.now_ns, self.config.cycle_duration_ns()) {
            match action {
                StartupAction::SendCas => {
                    self.send(FlexRayOperation::Symbol {
                        cycle: 0,
                        channel: FlexRayChannel::AB,
                        symbol: SymbolType::CollisionAvoidance,
                    });
                }
                StartupAction::SendStartCommunication { start_time_ns } => {
                    self.send(FlexRayOperation::StartCommunication { start_time_ns });
                    self.position = SchedulePosition::start();
                }
            }
        }
    }

    /// Handle queued operations up to the first frame the node still waits
    /// for in one of its receive slots.
    fn process_non_data(&mut self) {
        loop {
            let awaited = match self.rx_queue.peek() {
                None => break,
                Some(FlexRayOperation::Transmit(frame)) => {
                    self.slots
                        .subscribes(frame.channel, frame.cycle, frame.slot_id)
                        && !self.slots.receive_passed(frame.cycle, frame.slot_id)
                }
                Some(_) => false,
            };
            if awaited {
                break;
            }
            let Some(op) = self.rx_queue.pop() else {
                break;
            };
            self.handle_operation(op);
        }
    }

    fn handle_operation(&mut self, op: FlexRayOperation) {
        match op {
            FlexRayOperation::Symbol { symbol, .. } => {
                self.startup.on_symbol(symbol);
            }
            FlexRayOperation::StartCommunication { start_time_ns } => {
                if self.startup.on_start_communication(start_time_ns) {
                    self.position = SchedulePosition::start();
                }
            }
            FlexRayOperation::Confirm {
                cycle,
                slot_id,
                channel,
            } => {
                trace!("Confirmed frame in cycle {} slot {} on {:?}", cycle, slot_id, channel);
                self.pending_confirmation = false;
            }
            FlexRayOperation::BusError {
                cycle,
                slot_id,
                channel,
                code,
            } => {
                warn!(
                    "Bus error {:?} in cycle {} slot {} on {:?}",
                    code, cycle, slot_id, channel
                );
                self.pending_confirmation = false;
            }
            FlexRayOperation::Configuration(_) => {
                debug!("Ignoring configuration operation");
            }
            FlexRayOperation::Transmit(frame) => {
                let reason = if self
                    .slots
                    .subscribes(frame.channel, frame.cycle, frame.slot_id)
                {
                    "passed"
                } else {
                    "unsubscribed"
                };
                warn!(
                    "Dropping frame for {} slot {} in cycle {}",
                    reason, frame.slot_id, frame.cycle
                );
            }
        }
    }

    fn process_schedule(&mut self) {
        let now_mt = self
            .config
            .time_to_mt(self.now_ns, self.startup.start_time_ns());
        loop {
            self.receive_slots(now_mt);
            self.transmit_slots(now_mt);

            if now_mt < self.position.cycle_end_mt(&self.config) {
                break;
            }
            if let Some(phase) = self.startup.end_cycle() {
                debug!("Startup phase is now {:?}", phase);
            }
            self.position.advance_cycle(&self.config);
        }
    }

    fn compare_to_position(&self, iteration: u64, cycle: u8) -> Ordering {
        (iteration, cycle).cmp(&(self.position.iteration, self.position.cycle))
    }

    fn receive_slots(&mut self, now_mt: u64) {
        while let Some((assignment, iteration)) = self.slots.next_receive() {
            match self.compare_to_position(iteration, assignment.cycle) {
                Ordering::Greater => break,
                Ordering::Less => {
                    debug!("Skipping missed receive slot {}", assignment.slot_id);
                    self.slots.advance_receive();
                    self.process_non_data();
                    continue;
                }
                Ordering::Equal => {}
            }

            let (start_mt, end_mt) =
                self.config
                    .slot_boundaries_mt(iteration, assignment.cycle, assignment.slot_id);
            if now_mt < start_mt {
                break;
            }

            let received = match self.rx_queue.peek() {
                Some(FlexRayOperation::Transmit(frame)) => {
                    assignment.matches(frame.channel, frame.cycle, frame.slot_id)
                }
                _ => false,
            };
            if received {
                if let Some(FlexRayOperation::Transmit(frame)) = self.rx_queue.pop() {
                    trace!(
                        "Received frame in cycle {} slot {} ({} bytes)",
                        frame.cycle,
                        frame.slot_id,
                        frame.payload_len()
                    );
                    if !frame.is_null_frame() {
                        self.slots.deliver(frame.payload());
                    }
                    if frame.is_startup() {
                        self.startup.count_startup_frame();
                    }
                }
                self.drop_duplicates(assignment);
            }

            if received || now_mt > end_mt {
                self.slots.advance_receive();
                self.process_non_data();
            } else {
                break;
            }
        }
    }

    /// Drop further frames queued for a slot that was already received.
    fn drop_duplicates(&mut self, assignment: SlotAssignment) {
        while let Some(FlexRayOperation::Transmit(frame)) = self.rx_queue.peek() {
            if !assignment.matches(frame.channel, frame.cycle, frame.slot_id) {
                break;
            }
            warn!(
                "Multiple frames in cycle {} slot {}, keeping the first",
                frame.cycle, frame.slot_id
            );
            self.rx_queue.pop();
        }
    }

    fn transmit_slots(&mut self, now_mt: u64) {
        while let Some((assignment, iteration)) = self.slots.next_transmit() {
            if self.pending_confirmation {
                break;
            }
            match self.compare_to_position(iteration, assignment.cycle) {
                Ordering::Greater => break,
                Ordering::Less => {
                    debug!("Skipping missed transmit slot {}", assignment.slot_id);
                    self.slots.advance_transmit();
                    continue;
                }
                Ordering::Equal => {}
            }

            let (start_mt, _) =
                self.config
                    .slot_boundaries_mt(iteration, assignment.cycle, assignment.slot_id);
            if now_mt < start_mt {
                break;
            }

            if self.startup.phase().transmits() {
                self.transmit(assignment);
            }
            self.slots.advance_transmit();
        }
    }

    fn transmit(&mut self, assignment: SlotAssignment) {
        let data = if self.startup.phase() == StartupPhase::Complete {
            self.slots.take_transmit()
        } else {
            None
        };
        let frame = match &data {
            Some(payload) => FlexRayFrame::new(
                assignment.cycle,
                assignment.slot_id,
                assignment.channel,
                payload,
            ),
            None => FlexRayFrame::null_frame(assignment.cycle, assignment.slot_id, assignment.channel),
        };
        let frame = match frame {
            Ok(frame) => frame.with_startup(assignment.is_startup),
            Err(e) => {
                warn!("Cannot build frame for slot {}: {}", assignment.slot_id, e);
                return;
            }
        };

        if frame.is_startup() {
            self.startup.count_startup_frame();
        }
        trace!(
            "Sending {} in cycle {} slot {}",
            if frame.is_null_frame() { "null frame" } else { "frame" },
            frame.cycle,
            frame.slot_id
        );
        if self.send(FlexRayOperation::Transmit(frame)) && self.notifications {
            self.pending_confirmation = true;
        }
    }

    fn update_countdown(&mut self) {
        if self.clock_type != ClockType::Countdown {
            return;
        }
        if self.port.tx_pending() {
            self.countdown.schedule(self.now_ns);
            return;
        }
        if let Some(time) = self.startup.next_transition_ns() {
            self.countdown.schedule(time);
            return;
        }
        if self.startup.phase().is_listening() {
            self.countdown.unset();
            return;
        }
        match self
            .slots
            .next_transmit_time_ns(&self.config, self.startup.start_time_ns(), self.now_ns)
        {
            Some(time) => self.countdown.schedule(time),
            None => self.countdown.unset(),
        }
    }

    fn reject_after_evaluation(&self, function: &'static str) -> Result<()> {
        if self.evaluated {
            return Err(Error::InvalidCall {
                function,
                reason: "inputs cannot change after discrete states were evaluated",
            });
        }
        Ok(())
    }
}

impl BusModel for FlexRayNode {
    fn initialize(&mut self) -> Result<()> {
        let cas_time_ns = self.cas_time_ns.unwrap_or(if self.second_node {
            SECOND_NODE_CAS_TIME_NS
        } else {
            FIRST_NODE_CAS_TIME_NS
        });
        info!(
            "Initializing {} node, CAS at {} ns",
            if self.second_node { "second" } else { "first" },
            cas_time_ns
        );

        self.startup = Startup::new(cas_time_ns);
        if !self.custom_slots {
            self.slots = SlotTable::demo(!self.second_node);
        }
        self.position = SchedulePosition::start();
        self.app = CounterApplication::new();
        self.pending_confirmation = false;

        self.send(FlexRayOperation::Configuration(FlexRayConfiguration::Cluster {
            config: self.config,
            coldstart_node_type: ColdstartNodeType::Coldstart,
        }));
        self.update_countdown();
        Ok(())
    }

    fn do_step(&mut self, _current_ns: u64, target_ns: u64) -> Result<bool> {
        self.now_ns = target_ns;

        self.app.run(self.now_ns, &mut self.slots);
        self.process_non_data();
        self.run_startup();

        if self.startup.phase().is_scheduled() && self.now_ns >= self.startup.start_time_ns() {
            self.process_schedule();
        }

        self.update_countdown();
        Ok(self.clock_type == ClockType::Triggered && self.port.tx_pending())
    }

    fn evaluate_discrete_states(&mut self) -> Result<()> {
        if self.evaluated {
            return Ok(());
        }
        if self.clock_type == ClockType::Triggered {
            let pending = self.port.tx_pending();
            self.port.set_tx_clock(pending);
        }
        for op in self.port.take_received::<FlexRayOperation>() {
            if let Err(op) = self.rx_queue.push(op) {
                warn!("Receive queue full, dropping {:?}", op);
            }
        }
        self.evaluated = true;
        Ok(())
    }

    fn update_discrete_states(&mut self) -> Result<()> {
        if !self.evaluated && (self.port.tx_clock() || self.port.rx_clock()) {
            warn!("Discrete states were not evaluated before update");
            self.evaluate_discrete_states()?;
        }
        if self.port.end_event() {
            self.countdown.invalidate();
            self.update_countdown();
        }
        self.tx_clock_reported = false;
        self.evaluated = false;
        Ok(())
    }

    fn set_binary(&mut self, vr: ValueReference, data: &[u8]) -> Result<()> {
        if vr != vr::RX_DATA {
            return Err(Error::UnknownVariable(vr));
        }
        self.reject_after_evaluation("set_binary")?;
        self.port.set_rx_data(data);
        Ok(())
    }

    fn get_binary(&mut self, vr: ValueReference) -> Result<Vec<u8>> {
        if vr != vr::TX_DATA {
            return Err(Error::UnknownVariable(vr));
        }
        self.evaluate_discrete_states()?;
        Ok(self.port.tx_bytes().to_vec())
    }

    fn set_clock(&mut self, vr: ValueReference, active: bool) -> Result<()> {
        match vr {
            vr::RX_CLOCK => {
                self.reject_after_evaluation("set_clock")?;
                self.port.set_rx_clock(active);
                Ok(())
            }
            vr::TX_CLOCK => {
                self.reject_after_evaluation("set_clock")?;
                if !self.clock_type.host_settable() {
                    return Err(Error::InvalidCall {
                        function: "set_clock",
                        reason: "a triggered clock is raised by the model",
                    });
                }
                self.port.set_tx_clock(active);
                Ok(())
            }
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn get_clock(&mut self, vr: ValueReference) -> Result<bool> {
        if vr != vr::TX_CLOCK {
            return Err(Error::UnknownVariable(vr));
        }
        if self.clock_type != ClockType::Triggered {
            return Err(Error::InvalidCall {
                function: "get_clock",
                reason: "only a triggered clock can be read",
            });
        }
        self.evaluate_discrete_states()?;
        let active = self.port.tx_clock() && !self.tx_clock_reported;
        self.tx_clock_reported = true;
        Ok(active)
    }

    fn get_interval_fraction(&mut self, vr: ValueReference) -> Result<IntervalFraction> {
        if vr != vr::TX_CLOCK {
            return Err(Error::UnknownVariable(vr));
        }
        if self.clock_type != ClockType::Countdown {
            return Err(Error::InvalidCall {
                function: "get_interval_fraction",
                reason: "only a countdown clock has an interval",
            });
        }
        Ok(self.countdown.query(self.now_ns))
    }

    fn set_boolean(&mut self, vr: ValueReference, value: bool) -> Result<()> {
        match vr {
            vr::DELIVERY_ON_BOUNDARY => {
                info!("Delivery on boundary set to {}", value);
                self.delivery_on_boundary = value;
            }
            vr::BUS_NOTIFICATIONS => self.notifications = value,
            vr::IS_SECOND_NODE => self.second_node = value,
            _ => return Err(Error::UnknownVariable(vr)),
        }
        Ok(())
    }

    fn get_boolean(&mut self, vr: ValueReference) -> Result<bool> {
        match vr {
            vr::DELIVERY_ON_BOUNDARY => Ok(self.delivery_on_boundary),
            vr::BUS_NOTIFICATIONS => Ok(self.notifications),
            vr::IS_SECOND_NODE => Ok(self.second_node),
            _ => Err(Error::UnknownVariable(vr)),
        }
    }
}
