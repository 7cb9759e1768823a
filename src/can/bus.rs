//! CAN bus simulation.
//!
//! The bus collects the frames every node wants to send and arbitrates them
//! whenever the transmit clocks tick: the queue head with the lowest
//! identifier wins, its sender gets a confirmation and every other node
//! gets the frame. The transmit clocks are countdown clocks whose interval
//! is the bit time of the next frame, `44 + data length` bits at the bus
//! baud rate, so all of them must tick in the same instant.
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::can::CanBus;
//! use flexray_sim::port::PortVariable;
//! use flexray_sim::BusModel;
//!
//! let mut bus = CanBus::new(2).with_error_probability(0.01);
//! bus.set_binary(PortVariable::RxData.vr(0), &bytes_from_node_0)?;
//! bus.set_clock(PortVariable::RxClock.vr(0), true)?;
//! bus.evaluate_discrete_states()?;
//! bus.update_discrete_states()?;
//!
//! // Once the interval reported on the TX clocks has elapsed:
//! bus.set_clock(PortVariable::TxClock.vr(0), true)?;
//! bus.set_clock(PortVariable::TxClock.vr(1), true)?;
//! let bytes_for_node_0 = bus.get_binary(PortVariable::TxData.vr(0))?;
//! let bytes_for_node_1 = bus.get_binary(PortVariable::TxData.vr(1))?;
//! bus.update_discrete_states()?;
//! ```

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{debug, error, info, trace, warn};

use super::frame::CanFrame;
use super::operation::{
    ArbitrationLostBehavior, CanConfiguration, CanErrorCode, CanErrorFlag, CanOperation,
};
use crate::fault::{BusErrorInjector, DEFAULT_SEED};
use crate::instance::BusModel;
use crate::port::{Port, PortVariable};
use crate::types::{IntervalFraction, IntervalQualifier, ValueReference};
use crate::{Error, Result};

/// Value reference of the bus error probability.
pub const ERROR_PROBABILITY_VR: ValueReference = 255;

/// Frames a node can have waiting for arbitration.
pub const FRAME_QUEUE_CAPACITY: usize = 128;

/// Bits of a CAN frame besides its data.
pub const FRAME_OVERHEAD_BITS: u64 = 44;

#[derive(Debug, Clone)]
struct CanNode {
    port: Port,
    queue: VecDeque<CanFrame>,
    baud_rate: u32,
    behavior: ArbitrationLostBehavior,
    qualifier: IntervalQualifier,
}

impl CanNode {
    fn new() -> Self {
        Self {
            port: Port::new(),
            queue: VecDeque::with_capacity(FRAME_QUEUE_CAPACITY),
            baud_rate: 0,
            behavior: ArbitrationLostBehavior::default(),
            qualifier: IntervalQualifier::NotYetKnown,
        }
    }
}

/// Bus simulation arbitrating the frames of a fixed number of CAN nodes.
#[derive(Debug, Clone)]
pub struct CanBus {
    nodes: Vec<CanNode>,
    bus_baud_rate: u32,
    tx_clock_set: bool,
    tx_counter: u64,
    tx_resolution: u64,
    injector: BusErrorInjector,
    evaluated: bool,
}

impl CanBus {
    /// A bus for `node_count` nodes that never injects errors.
    pub fn new(node_count: usize) -> Self {
        Self {
            nodes: (0..node_count).map(|_| CanNode::new()).collect(),
            bus_baud_rate: 0,
            tx_clock_set: false,
            tx_counter: 0,
            tx_resolution: 0,
            injector: BusErrorInjector::new(DEFAULT_SEED),
            evaluated: false,
        }
    }

    /// Reseed the error injector.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.injector = BusErrorInjector::with_probability(self.injector.probability(), seed);
        self
    }

    /// Destroy each arbitrated frame with `probability`.
    pub fn with_error_probability(mut self, probability: f64) -> Self {
        self.injector.set_probability(probability);
        self
    }

    /// Number of attached nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The bus baud rate, 0 while communication is disabled.
    pub fn baud_rate(&self) -> u32 {
        self.bus_baud_rate
    }

    /// Frames of `node` waiting for arbitration.
    pub fn queued_frames(&self, node: usize) -> usize {
        self.nodes.get(node).map_or(0, |n| n.queue.len())
    }

    /// Arbitration lost behavior configured by `node`.
    pub fn arbitration_lost_behavior(&self, node: usize) -> Option<ArbitrationLostBehavior> {
        self.nodes.get(node).map(|n| n.behavior)
    }

    /// The error injector.
    pub fn injector(&self) -> &BusErrorInjector {
        &self.injector
    }

    fn ingest(&mut self) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            for op in node.port.take_received::<CanOperation>() {
                match op {
                    CanOperation::Transmit(frame) => {
                        if node.queue.len() >= FRAME_QUEUE_CAPACITY {
                            warn!(
                                "Frame queue of node {} full, dropping frame with ID {:#x}",
                                index,
                                frame.raw_id()
                            );
                            continue;
                        }
                        debug!(
                            "Received frame with ID {:#x} and length {} from node {}",
                            frame.raw_id(),
                            frame.len(),
                            index
                        );
                        node.queue.push_back(frame);
                    }
                    CanOperation::Configuration(CanConfiguration::ArbitrationLostBehavior(
                        behavior,
                    )) => {
                        info!("Node {} configured arbitration lost behavior {:?}", index, behavior);
                        node.behavior = behavior;
                    }
                    CanOperation::Configuration(config) => {
                        if let Some(baud) = config.baudrate() {
                            info!("Node {} configured baud rate {}", index, baud);
                            node.baud_rate = baud;
                        }
                    }
                    other => warn!("Ignoring unexpected {:?} from node {}", other, index),
                }
            }
        }
    }

    fn update_baud_rate(&mut self) {
        let mut rates = self.nodes.iter().map(|n| n.baud_rate);
        let first = rates.next().unwrap_or(0);
        let configured = self.nodes.iter().all(|n| n.baud_rate > 0);

        self.bus_baud_rate = if !configured {
            debug!("Not all nodes have configured a baud rate, bus communication is disabled");
            0
        } else if rates.all(|rate| rate == first) {
            first
        } else {
            warn!("Nodes have configured differing baud rates, bus communication is disabled");
            0
        };
    }

    /// Node whose queue head has the lowest identifier. The first node wins
    /// a tie.
    fn next_sender(&self) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(frame) = node.queue.front() {
                let id = frame.raw_id();
                if best.is_none_or(|(_, best_id)| id < best_id) {
                    best = Some((index, id));
                }
            }
        }
        best.map(|(index, _)| index)
    }

    fn arbitrate(&mut self) {
        if self.bus_baud_rate == 0 {
            warn!("TX clocks ticked while bus communication is disabled");
            return;
        }
        let Some(sender) = self.next_sender() else {
            warn!("TX clocks ticked but no frames to transmit");
            return;
        };
        let Some(frame) = self.nodes[sender].queue.pop_front() else {
            return;
        };
        let id = frame.raw_id();

        if self.injector.should_fail() {
            warn!("Injecting bus error for frame with ID {:#x} from node {}", id, sender);
            for (index, node) in self.nodes.iter_mut().enumerate() {
                node.port.send(&CanOperation::BusError {
                    id,
                    code: CanErrorCode::Crc,
                    flag: CanErrorFlag::Primary,
                    is_sender: index == sender,
                });
            }
        } else {
            trace!("Frame with ID {:#x} from node {} won arbitration", id, sender);
            for (index, node) in self.nodes.iter_mut().enumerate() {
                if index == sender {
                    node.port.send(&CanOperation::Confirm { id });
                } else {
                    node.port.send(&CanOperation::Transmit(frame));
                }
            }
        }

        for (index, node) in self.nodes.iter_mut().enumerate() {
            if node.behavior != ArbitrationLostBehavior::DiscardAndNotify {
                continue;
            }
            while let Some(lost) = node.queue.pop_front() {
                trace!(
                    "Frame with ID {:#x} from node {} lost arbitration",
                    lost.raw_id(),
                    index
                );
                node.port.send(&CanOperation::ArbitrationLost { id: lost.raw_id() });
            }
        }
    }

    /// Announce the transmission time of the next frame unless one is
    /// already announced.
    fn schedule_next(&mut self) {
        if self.tx_clock_set || self.bus_baud_rate == 0 {
            return;
        }
        let Some(sender) = self.next_sender() else {
            return;
        };
        let len = self.nodes[sender].queue.front().map_or(0, |f| f.len());
        self.tx_counter = FRAME_OVERHEAD_BITS + len as u64;
        self.tx_resolution = self.bus_baud_rate as u64;
        self.tx_clock_set = true;
        for node in &mut self.nodes {
            node.qualifier = IntervalQualifier::Changed;
        }
    }

    fn resolve(&self, vr: ValueReference) -> Result<(usize, PortVariable)> {
        PortVariable::resolve(vr, self.nodes.len()).ok_or(Error::UnknownVariable(vr))
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

impl Default for CanBus {
    fn default() -> Self {
        Self::new(2)
    }
}

impl BusModel for CanBus {
    fn do_step(&mut self, _current_ns: u64, _target_ns: u64) -> Result<bool> {
        Ok(false)
    }

    fn evaluate_discrete_states(&mut self) -> Result<()> {
        if self.evaluated {
            return Ok(());
        }
        self.ingest();
        self.update_baud_rate();

        let ticked = self.nodes.iter().filter(|n| n.port.tx_clock()).count();
        if ticked == self.nodes.len() && ticked > 0 {
            self.arbitrate();
            for node in &mut self.nodes {
                node.qualifier = IntervalQualifier::NotYetKnown;
            }
            self.tx_clock_set = false;
        } else if ticked > 0 {
            error!("TX clocks of the nodes ticked independently, skipping transmission");
        }

        self.schedule_next();
        self.evaluated = true;
        Ok(())
    }

    fn update_discrete_states(&mut self) -> Result<()> {
        let ticked = self.nodes.iter().any(|n| n.port.tx_clock());
        if !self.evaluated {
            if ticked {
                warn!("Discrete states were not evaluated before update");
            }
            self.evaluate_discrete_states()?;
        }
        for node in &mut self.nodes {
            node.port.end_event();
        }
        self.evaluated = false;
        Ok(())
    }

    fn set_binary(&mut self, vr: ValueReference, data: &[u8]) -> Result<()> {
        match self.resolve(vr)? {
            (node, PortVariable::RxData) => {
                self.reject_after_evaluation("set_binary")?;
                self.nodes[node].port.set_rx_data(data);
                Ok(())
            }
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn get_binary(&mut self, vr: ValueReference) -> Result<Vec<u8>> {
        match self.resolve(vr)? {
            (node, PortVariable::TxData) => {
                self.evaluate_discrete_states()?;
                Ok(self.nodes[node].port.tx_bytes().to_vec())
            }
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn set_clock(&mut self, vr: ValueReference, active: bool) -> Result<()> {
        match self.resolve(vr)? {
            (node, PortVariable::RxClock) => {
                self.reject_after_evaluation("set_clock")?;
                self.nodes[node].port.set_rx_clock(active);
                Ok(())
            }
            (node, PortVariable::TxClock) => {
                self.reject_after_evaluation("set_clock")?;
                self.nodes[node].port.set_tx_clock(active);
                Ok(())
            }
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn get_interval_fraction(&mut self, vr: ValueReference) -> Result<IntervalFraction> {
        let (node, variable) = self.resolve(vr)?;
        if variable != PortVariable::TxClock {
            return Err(Error::UnknownVariable(vr));
        }
        let node = &mut self.nodes[node];
        Ok(match node.qualifier {
            IntervalQualifier::NotYetKnown => IntervalFraction::not_yet_known(),
            IntervalQualifier::Unchanged => IntervalFraction::unchanged(),
            IntervalQualifier::Changed => {
                node.qualifier = IntervalQualifier::Unchanged;
                IntervalFraction::changed(self.tx_counter, self.tx_resolution)
            }
        })
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
