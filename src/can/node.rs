//! CAN node with a triggered transmit clock.
//!
//! The node announces its baud rate and arbitration lost behavior when it
//! is initialized and then sends one fixed frame per transmit interval.
//! Instead of announcing its next tick, it raises its transmit clock itself
//! whenever operations are waiting: `do_step` asks the host for an event,
//! and the host reads the clock with `get_clock` before fetching the data.
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::Instance;
//! use flexray_sim::can::{CanNode, node};
//!
//! let mut instance = Instance::new("can_node", CanNode::demo()?);
//! instance.enter_initialization_mode()?;
//! instance.exit_initialization_mode()?;
//!
//! if instance.get_clock(node::vr::TX_CLOCK)? {
//!     let config = instance.get_binary(node::vr::TX_DATA)?;
//! }
//! instance.update_discrete_states()?;
//! ```

use alloc::vec::Vec;

use embedded_can::StandardId;
use log::{debug, info, trace, warn};

use super::frame::CanFrame;
use super::operation::{ArbitrationLostBehavior, CanConfiguration, CanOperation};
use crate::instance::BusModel;
use crate::port::Port;
use crate::types::ValueReference;
use crate::{Error, Result};

/// Value references of a CAN node.
pub mod vr {
    use crate::types::ValueReference;

    /// Operations received from the bus.
    pub const RX_DATA: ValueReference = 0;
    /// Operations sent to the bus.
    pub const TX_DATA: ValueReference = 1;
    /// Receive clock.
    pub const RX_CLOCK: ValueReference = 2;
    /// Transmit clock, raised by the node.
    pub const TX_CLOCK: ValueReference = 3;
    /// Whether the bus sends confirmations and error notifications.
    pub const BUS_NOTIFICATIONS: ValueReference = 128;
}

/// Baud rate announced by the demo node.
pub const DEMO_BAUD_RATE: u32 = 100_000;

/// Interval between two frames of the demo node.
pub const DEMO_TRANSMIT_INTERVAL_NS: u64 = 300_000_000;

/// Identifier of the demo node's frame.
pub const DEMO_FRAME_ID: u16 = 0x1;

/// Payload of the demo node's frame.
pub const DEMO_PAYLOAD: [u8; 4] = [1, 2, 3, 4];

/// A CAN node sending one frame at a fixed interval.
#[derive(Debug, Clone)]
pub struct CanNode {
    frame: CanFrame,
    baud_rate: u32,
    behavior: ArbitrationLostBehavior,
    interval_ns: u64,
    notifications: bool,

    port: Port,
    next_transmit_ns: u64,
    evaluated: bool,
    tx_clock_reported: bool,

    frames_sent: u64,
    frames_received: u64,
    confirmations: u64,
    last_received_id: Option<u32>,
}

impl CanNode {
    /// A node sending `frame` every [`DEMO_TRANSMIT_INTERVAL_NS`] at
    /// [`DEMO_BAUD_RATE`], keeping frames that lost arbitration.
    pub fn new(frame: CanFrame) -> Self {
        Self {
            frame,
            baud_rate: DEMO_BAUD_RATE,
            behavior: ArbitrationLostBehavior::BufferAndRetransmit,
            interval_ns: DEMO_TRANSMIT_INTERVAL_NS,
            notifications: false,
            port: Port::new(),
            next_transmit_ns: DEMO_TRANSMIT_INTERVAL_NS,
            evaluated: false,
            tx_clock_reported: false,
            frames_sent: 0,
            frames_received: 0,
            confirmations: 0,
            last_received_id: None,
        }
    }

    /// The demo node sending [`DEMO_PAYLOAD`] with ID [`DEMO_FRAME_ID`].
    pub fn demo() -> Result<Self> {
        let id = StandardId::new(DEMO_FRAME_ID).ok_or(Error::InvalidField {
            field: "can_id",
            value: DEMO_FRAME_ID as u64,
        })?;
        Ok(Self::new(CanFrame::with_payload(id, &DEMO_PAYLOAD)?))
    }

    /// Announce `baud_rate` instead of the demo rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Announce `behavior` for frames that lose arbitration.
    pub fn with_arbitration_lost_behavior(mut self, behavior: ArbitrationLostBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Send every `interval_ns` instead of the demo interval.
    pub fn with_interval_ns(mut self, interval_ns: u64) -> Self {
        self.interval_ns = interval_ns.max(1);
        self
    }

    /// The frame the node sends.
    pub fn frame(&self) -> &CanFrame {
        &self.frame
    }

    /// Time at which the next frame is due.
    pub fn next_transmit_ns(&self) -> u64 {
        self.next_transmit_ns
    }

    /// Frames handed to the transmit buffer so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames of other nodes forwarded by the bus.
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Confirmations of the node's own frames.
    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Identifier of the most recent frame forwarded by the bus.
    pub fn last_received_id(&self) -> Option<u32> {
        self.last_received_id
    }

    fn handle_operation(&mut self, op: CanOperation) {
        match op {
            CanOperation::Transmit(frame) => {
                info!(
                    "Received CAN frame with ID {:#x} and length {}",
                    frame.raw_id(),
                    frame.len()
                );
                self.frames_received += 1;
                self.last_received_id = Some(frame.raw_id());
            }
            CanOperation::Confirm { id } => {
                trace!("Frame {:#x} confirmed", id);
                self.confirmations += 1;
            }
            CanOperation::ArbitrationLost { id } => {
                debug!("Frame {:#x} lost arbitration", id);
            }
            CanOperation::BusError { id, code, .. } => {
                warn!("Bus error {:?} on frame {:#x}", code, id);
            }
            CanOperation::Configuration(_) => {}
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

impl BusModel for CanNode {
    fn initialize(&mut self) -> Result<()> {
        info!(
            "Initializing CAN node at {} bit/s, sending {:#x} every {} ns",
            self.baud_rate,
            self.frame.raw_id(),
            self.interval_ns
        );
        self.next_transmit_ns = self.interval_ns;
        self.port.send(&CanOperation::Configuration(CanConfiguration::CanBaudrate(
            self.baud_rate,
        )));
        self.port
            .send(&CanOperation::Configuration(CanConfiguration::ArbitrationLostBehavior(
                self.behavior,
            )));
        Ok(())
    }

    fn do_step(&mut self, _current_ns: u64, target_ns: u64) -> Result<bool> {
        while self.next_transmit_ns <= target_ns {
            if !self.port.send(&CanOperation::Transmit(self.frame)) {
                break;
            }
            info!(
                "Transmitting CAN frame with ID {:#x} at {} ns",
                self.frame.raw_id(),
                self.next_transmit_ns
            );
            self.frames_sent += 1;
            self.next_transmit_ns += self.interval_ns;
        }
        Ok(self.port.tx_pending())
    }

    fn evaluate_discrete_states(&mut self) -> Result<()> {
        if self.evaluated {
            return Ok(());
        }
        let pending = self.port.tx_pending();
        self.port.set_tx_clock(pending);
        for op in self.port.take_received::<CanOperation>() {
            self.handle_operation(op);
        }
        self.evaluated = true;
        Ok(())
    }

    fn update_discrete_states(&mut self) -> Result<()> {
        if !self.evaluated && self.port.rx_clock() {
            warn!("Discrete states were not evaluated before update");
            self.evaluate_discrete_states()?;
        }
        self.port.end_event();
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
            vr::TX_CLOCK => Err(Error::InvalidCall {
                function: "set_clock",
                reason: "a triggered clock is raised by the model",
            }),
            _ => Err(Error::UnknownVariable(vr)),
        }
    }

    fn get_clock(&mut self, vr: ValueReference) -> Result<bool> {
        if vr != vr::TX_CLOCK {
            return Err(Error::UnknownVariable(vr));
        }
        self.evaluate_discrete_states()?;
        let active = self.port.tx_clock() && !self.tx_clock_reported;
        self.tx_clock_reported = true;
        Ok(active)
    }

    fn set_boolean(&mut self, vr: ValueReference, value: bool) -> Result<()> {
        if vr != vr::BUS_NOTIFICATIONS {
            return Err(Error::UnknownVariable(vr));
        }
        info!("Bus notifications set to {}", value);
        self.notifications = value;
        Ok(())
    }

    fn get_boolean(&mut self, vr: ValueReference) -> Result<bool> {
        if vr != vr::BUS_NOTIFICATIONS {
            return Err(Error::UnknownVariable(vr));
        }
        Ok(self.notifications)
    }
}
