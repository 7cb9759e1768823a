//! FlexRay bus simulation.
//!
//! The bus sits between all nodes of a cluster. It learns the cluster
//! configuration from the first node that announces one, relays the
//! coldstart symbols and the start time, and from then on walks the
//! schedule slot by slot: the frame a node sends in the current slot is
//! forwarded to every other node and confirmed to the sender, or replaced by
//! a bus error for everyone if the [`BusErrorInjector`] destroys it.
//!
//! Operations are processed as soon as they arrive, so a frame reaches the
//! other nodes in the same instant it was sent.
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::flexray::FlexRayBus;
//! use flexray_sim::port::PortVariable;
//! use flexray_sim::BusModel;
//!
//! let mut bus = FlexRayBus::new(2);
//! bus.set_binary(PortVariable::RxData.vr(0), &bytes_from_node_0)?;
//! bus.set_clock(PortVariable::RxClock.vr(0), true)?;
//! bus.evaluate_discrete_states()?;
//! bus.update_discrete_states()?;
//!
//! bus.set_clock(PortVariable::TxClock.vr(1), true)?;
//! let bytes_for_node_1 = bus.get_binary(PortVariable::TxData.vr(1))?;
//! bus.update_discrete_states()?;
//! ```

use alloc::vec::Vec;

use log::{debug, info, trace, warn};

use super::cluster::{ClusterConfig, SchedulePosition};
use super::frame::{FlexRayFrame, SymbolType};
use super::operation::{FlexRayConfiguration, FlexRayErrorCode, FlexRayOperation};
use crate::countdown::CountdownClock;
use crate::fault::{BusErrorInjector, DEFAULT_SEED};
use crate::instance::BusModel;
use crate::port::{Port, PortVariable};
use crate::ring_buffer::RingBuffer;
use crate::types::{IntervalFraction, ValueReference};
use crate::{Error, Result};

/// Value reference of the bus error probability.
pub const ERROR_PROBABILITY_VR: ValueReference = 255;

/// First value reference of the per-node boolean flags.
const FLAGS_VR_BASE: ValueReference = 10;

#[derive(Debug, Clone)]
struct Terminal {
    port: Port,
    rx_queue: RingBuffer<FlexRayOperation>,
    countdown: CountdownClock,
}

impl Terminal {
    fn new() -> Self {
        Self {
            port: Port::new(),
            rx_queue: RingBuffer::new(),
            countdown: CountdownClock::new(),
        }
    }
}

/// Bus simulation connecting a fixed number of FlexRay nodes.
#[derive(Debug, Clone)]
pub struct FlexRayBus {
    terminals: Vec<Terminal>,
    config: Option<ClusterConfig>,
    start_time_ns: Option<u64>,
    position: SchedulePosition,
    frame_in_slot: bool,
    injector: BusErrorInjector,
    now_ns: u64,
    evaluated: bool,
}

impl FlexRayBus {
    /// A bus for `node_count` nodes that never injects errors.
    pub fn new(node_count: usize) -> Self {
        Self {
            terminals: (0..node_count).map(|_| Terminal::new()).collect(),
            config: None,
            start_time_ns: None,
            position: SchedulePosition::start(),
            frame_in_slot: false,
            injector: BusErrorInjector::new(DEFAULT_SEED),
            now_ns: 0,
            evaluated: false,
        }
    }

    /// Reseed the error injector.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.injector = BusErrorInjector::with_probability(self.injector.probability(), seed);
        self
    }

    /// Destroy each forwarded frame with `probability`.
    pub fn with_error_probability(mut self, probability: f64) -> Self {
        self.injector.set_probability(probability);
        self
    }

    /// Number of attached nodes.
    pub fn node_count(&self) -> usize {
        self.terminals.len()
    }

    /// The learned cluster configuration.
    pub fn cluster_config(&self) -> Option<&ClusterConfig> {
        self.config.as_ref()
    }

    /// The announced start of cycle 0.
    pub fn start_time_ns(&self) -> Option<u64> {
        self.start_time_ns
    }

    /// The slot the bus is currently serving.
    pub fn position(&self) -> SchedulePosition {
        self.position
    }

    /// The error injector.
    pub fn injector(&self) -> &BusErrorInjector {
        &self.injector
    }

    /// Operations from `node` not yet served. 0 for an unknown node.
    pub fn queued_operations(&self, node: usize) -> usize {
        self.terminals.get(node).map_or(0, |t| t.rx_queue.len())
    }

    fn send_to(&mut self, node: usize, op: &FlexRayOperation) {
        if let Some(terminal) = self.terminals.get_mut(node) {
            terminal.port.send(op);
        }
    }

    fn send_to_others(&mut self, sender: usize, op: &FlexRayOperation) {
        for (index, terminal) in self.terminals.iter_mut().enumerate() {
            if index != sender {
                terminal.port.send(op);
            }
        }
    }

    fn send_to_all(&mut self, op: &FlexRayOperation) {
        for terminal in &mut self.terminals {
            terminal.port.send(op);
        }
    }

    fn ingest(&mut self) {
        for (index, terminal) in self.terminals.iter_mut().enumerate() {
            for op in terminal.port.take_received::<FlexRayOperation>() {
                if let Err(op) = terminal.rx_queue.push(op) {
                    warn!("Receive queue of node {} full, dropping {:?}", index, op);
                }
            }
        }
    }

    fn process_non_data(&mut self) {
        for node in 0..self.terminals.len() {
            self.process_non_data_of(node);
        }
    }

    fn process_non_data_of(&mut self, node: usize) {
        loop {
            match self.terminals[node].rx_queue.peek() {
                None => break,
                Some(op) if op.is_slot_bound() => break,
                Some(_) => {}
            }
            let Some(op) = self.terminals[node].rx_queue.pop() else {
                break;
            };
            self.handle_operation(node, op);
        }
    }

    fn handle_operation(&mut self, node: usize, op: FlexRayOperation) {
        match op {
            FlexRayOperation::Configuration(FlexRayConfiguration::Cluster { config, .. }) => {
                self.learn_config(node, config);
            }
            FlexRayOperation::Configuration(FlexRayConfiguration::Other { parameter_type, .. }) => {
                warn!(
                    "Node {} sent unsupported configuration parameter type {}",
                    node, parameter_type
                );
            }
            FlexRayOperation::Symbol {
                cycle,
                channel,
                symbol,
            } => {
                if cycle == 0
                    && symbol == SymbolType::CollisionAvoidance
                    && self.start_time_ns.is_none()
                {
                    info!("Forwarding CAS symbol from node {}", node);
                    self.send_to_others(
                        node,
                        &FlexRayOperation::Symbol {
                            cycle,
                            channel,
                            symbol,
                        },
                    );
                } else {
                    warn!(
                        "Ignoring {:?} from node {}: only CAS during startup supported",
                        symbol, node
                    );
                }
            }
            FlexRayOperation::StartCommunication { start_time_ns } => match self.start_time_ns {
                None => {
                    info!("Node {} starts communication at {} ns", node, start_time_ns);
                    self.start_time_ns = Some(start_time_ns);
                    self.position = SchedulePosition::start();
                    self.frame_in_slot = false;
                    self.send_to_others(node, &FlexRayOperation::StartCommunication { start_time_ns });
                }
                Some(known) => warn!(
                    "Ignoring start time {} ns from node {}, communication started at {} ns",
                    start_time_ns, node, known
                ),
            },
            FlexRayOperation::Confirm { .. } | FlexRayOperation::BusError { .. } => {
                warn!("Ignoring unexpected {:?} from node {}", op, node);
            }
            FlexRayOperation::Transmit(frame) => {
                warn!(
                    "Dropping frame for cycle {} slot {} from node {}",
                    frame.cycle, frame.slot_id, node
                );
            }
        }
    }

    fn learn_config(&mut self, node: usize, config: ClusterConfig) {
        match self.config {
            None => match config.validate() {
                Ok(()) => {
                    info!("Learned cluster configuration from node {}", node);
                    self.config = Some(config);
                }
                Err(e) => warn!("Rejecting configuration from node {}: {}", node, e),
            },
            Some(known) if known == config => {
                debug!("Reusing cluster configuration announced by node {}", node);
            }
            Some(_) => {
                warn!(
                    "Node {} announced a conflicting cluster configuration, keeping the first one",
                    node
                );
            }
        }
    }

    /// Serve every slot that has started by now.
    fn advance_schedule(&mut self) {
        let (Some(config), Some(start_ns)) = (self.config, self.start_time_ns) else {
            return;
        };
        if self.now_ns < start_ns {
            return;
        }
        let now_mt = config.time_to_mt(self.now_ns, start_ns);

        loop {
            loop {
                let (start_mt, end_mt) = self.position.slot_boundaries_mt(&config);
                if now_mt < start_mt {
                    break;
                }
                self.serve_slot(&config);
                if now_mt < end_mt && !self.frame_in_slot {
                    break;
                }
                if !self.position.advance_slot(&config) {
                    break;
                }
                self.frame_in_slot = false;
            }

            if now_mt < self.position.cycle_end_mt(&config) {
                break;
            }
            self.position.advance_cycle(&config);
            self.frame_in_slot = false;
        }
    }

    fn serve_slot(&mut self, config: &ClusterConfig) {
        let (cycle, slot) = (self.position.cycle, self.position.slot);

        for node in 0..self.terminals.len() {
            loop {
                let (frame_cycle, frame_slot) = match self.terminals[node].rx_queue.peek() {
                    Some(FlexRayOperation::Transmit(frame)) => (frame.cycle, frame.slot_id),
                    _ => break,
                };

                let outside = frame_slot == 0
                    || frame_slot > config.slots_per_cycle()
                    || frame_cycle >= config.number_of_cycles;
                let passed = (frame_cycle, frame_slot) < (cycle, slot);
                let current = frame_cycle == cycle && frame_slot == slot;
                if !(outside || passed || current) {
                    break;
                }

                let Some(FlexRayOperation::Transmit(frame)) = self.terminals[node].rx_queue.pop()
                else {
                    break;
                };
                if current {
                    self.forward(node, frame);
                } else {
                    warn!(
                        "Dropping frame for {} cycle {} slot {} from node {}",
                        if outside { "unscheduled" } else { "passed" },
                        frame.cycle,
                        frame.slot_id,
                        node
                    );
                }
                self.process_non_data_of(node);
            }
        }
    }

    fn forward(&mut self, sender: usize, frame: FlexRayFrame) {
        if self.frame_in_slot {
            warn!(
                "Multiple frames in cycle {} slot {}, dropping the one from node {}",
                frame.cycle, frame.slot_id, sender
            );
            return;
        }
        self.frame_in_slot = true;

        if self.injector.should_fail() {
            warn!(
                "Injecting bus error for cycle {} slot {} from node {}",
                frame.cycle, frame.slot_id, sender
            );
            self.send_to_all(&FlexRayOperation::BusError {
                cycle: frame.cycle,
                slot_id: frame.slot_id,
                channel: frame.channel,
                code: FlexRayErrorCode::ContentError,
            });
            return;
        }

        trace!(
            "Forwarding frame for cycle {} slot {} from node {}",
            frame.cycle, frame.slot_id, sender
        );
        self.send_to(sender, &FlexRayOperation::confirm_for(&frame));
        self.send_to_others(sender, &FlexRayOperation::Transmit(frame));
    }

    /// The next slot start or end after now, if the schedule is running.
    fn next_schedule_event_ns(&self) -> Option<u64> {
        let config = self.config?;
        let start_ns = self.start_time_ns?;
        if self.now_ns < start_ns {
            return Some(start_ns);
        }

        let mut position = self.position;
        loop {
            let (start_mt, end_mt) = position.slot_boundaries_mt(&config);
            for mt in [start_mt, end_mt] {
                let time = config.mt_to_ns(start_ns, mt);
                if time > self.now_ns {
                    return Some(time);
                }
            }
            if !position.advance_slot(&config) {
                position.advance_cycle(&config);
            }
        }
    }

    fn update_countdowns(&mut self) {
        let next = self.next_schedule_event_ns();
        let now = self.now_ns;
        for terminal in &mut self.terminals {
            if terminal.port.tx_pending() {
                terminal.countdown.schedule(now);
            } else if let Some(time) = next {
                terminal.countdown.schedule(time);
            } else {
                terminal.countdown.unset();
            }
        }
    }

    fn resolve(&self, vr: ValueReference) -> Result<(usize, PortVariable)> {
        PortVariable::resolve(vr, self.terminals.len()).ok_or(Error::UnknownVariable(vr))
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

impl Default for FlexRayBus {
    fn default() -> Self {
        Self::new(2)
    }
}

impl BusModel for FlexRayBus {
    fn do_step(&mut self, _current_ns: u64, target_ns: u64) -> Result<bool> {
        self.now_ns = target_ns;
        self.process_non_data();
        self.advance_schedule();
        self.update_countdowns();
        Ok(false)
    }

    fn evaluate_discrete_states(&mut self) -> Result<()> {
        if self.evaluated {
            return Ok(());
        }
        self.ingest();
        self.process_non_data();
        self.advance_schedule();
        self.update_countdowns();
        self.evaluated = true;
        Ok(())
    }

    fn update_discrete_states(&mut self) -> Result<()> {
        let clocks_active = self
            .terminals
            .iter()
            .any(|t| t.port.tx_clock() || t.port.rx_clock());
        if !self.evaluated && clocks_active {
            warn!("Discrete states were not evaluated before update");
            self.evaluate_discrete_states()?;
        }
        for terminal in &mut self.terminals {
            if terminal.port.end_event() {
                terminal.countdown.invalidate();
            }
        }
        self.update_countdowns();
        self.evaluated = false;
        Ok(())
    }

    fn set_binary(&mut self, vr: ValueReference, data: &[u8]) -> Result<()> {
        match self.resolve(vr)? {
            (node, PortVariable::RxData) => {
                self.reject_after_evaluation("set_binary")?;
                self.terminals[node].port.set_rx_data(data);
                Ok(())
            }
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn get_binary(&mut self, vr: ValueReference) -> Result<Vec<u8>> {
        match self.resolve(vr)? {
            (node, PortVariable::TxData) => {
                self.evaluate_discrete_states()?;
                Ok(self.terminals[node].port.tx_bytes().to_vec())
            }
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn set_clock(&mut self, vr: ValueReference, active: bool) -> Result<()> {
        match self.resolve(vr)? {
            (node, PortVariable::RxClock) => {
                self.reject_after_evaluation("set_clock")?;
                self.terminals[node].port.set_rx_clock(active);
                Ok(())
            }
            (node, PortVariable::TxClock) => {
                self.reject_after_evaluation("set_clock")?;
                self.terminals[node].port.set_tx_clock(active);
                Ok(())
            }
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn get_interval_fraction(&mut self, vr: ValueReference) -> Result<IntervalFraction> {
        match self.resolve(vr)? {
            (node, PortVariable::TxClock) => Ok(self.terminals[node].countdown.query(self.now_ns)),
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn get_boolean(&mut self, vr: ValueReference) -> Result<bool> {
        // Bus notifications (10 + 2n) and delivery on boundary (11 + 2n) are
        // always provided.
        let node = vr.checked_sub(FLAGS_VR_BASE).map(|offset| offset as usize / 2);
        match node {
            Some(node) if node < self.terminals.len() => Ok(true),
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn set_float64(&mut self, vr: ValueReference, value: f64) -> Result<()> {
        if vr != ERROR_PROBABILITY_VR {
            return Err(Error::UnknownVariable(vr));
        }
        if self.injector.set_probability(value) {
            info!("Bus error probability set to {}", value);
        }
        Ok(())
    }
}
