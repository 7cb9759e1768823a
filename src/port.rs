//! Host-facing data and clock variables of one bus terminal.
//!
//! Every bus model exposes, per attached node, a receive buffer with its
//! clock and a transmit buffer with its clock. [`Port`] holds these four
//! variables and implements the parts of the event protocol that are the
//! same for every model: decoding what the host delivered and collecting
//! what the model wants to send.

use alloc::vec::Vec;
use core::fmt::Debug;

use log::{trace, warn};

use crate::types::ValueReference;
use crate::wire::{Framed, OperationReader, OperationWriter};

/// Variables of one terminal of a bus simulation.
///
/// Terminal `n` owns the value references `4n` to `4n + 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PortVariable {
    /// Operations received from the node.
    RxData = 0,
    /// Operations sent to the node.
    TxData = 1,
    /// Receive clock.
    RxClock = 2,
    /// Transmit clock.
    TxClock = 3,
}

impl PortVariable {
    /// Value reference of this variable on terminal `node`.
    pub const fn vr(self, node: u32) -> ValueReference {
        node * 4 + self as u32
    }

    /// Split a value reference into terminal index and variable.
    pub fn resolve(vr: ValueReference, node_count: usize) -> Option<(usize, PortVariable)> {
        let node = (vr / 4) as usize;
        if node >= node_count {
            return None;
        }
        let variable = match vr % 4 {
            0 => PortVariable::RxData,
            1 => PortVariable::TxData,
            2 => PortVariable::RxClock,
            _ => PortVariable::TxClock,
        };
        Some((node, variable))
    }
}

/// Receive and transmit variables of one bus terminal.
#[derive(Debug, Clone, Default)]
pub struct Port {
    rx_data: Vec<u8>,
    rx_clock: bool,
    tx: OperationWriter,
    tx_clock: bool,
}

impl Port {
    /// Create a port with empty buffers and inactive clocks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the bytes delivered by the host. They are decoded once the
    /// receive clock is active and the model evaluates its discrete states.
    pub fn set_rx_data(&mut self, data: &[u8]) {
        self.rx_data.clear();
        self.rx_data.extend_from_slice(data);
    }

    /// Activate or deactivate the receive clock.
    pub fn set_rx_clock(&mut self, active: bool) {
        self.rx_clock = active;
    }

    /// Whether the receive clock is active.
    pub fn rx_clock(&self) -> bool {
        self.rx_clock
    }

    /// Activate or deactivate the transmit clock.
    pub fn set_tx_clock(&mut self, active: bool) {
        self.tx_clock = active;
    }

    /// Whether the transmit clock is active.
    pub fn tx_clock(&self) -> bool {
        self.tx_clock
    }

    /// Decode the received operations if the receive clock is active.
    ///
    /// The receive buffer is consumed, so a second call in the same event
    /// yields nothing. Operations that fail to decode are logged and skipped.
    pub fn take_received<T: Framed>(&mut self) -> Vec<T> {
        if !self.rx_clock || self.rx_data.is_empty() {
            return Vec::new();
        }

        let mut ops = Vec::new();
        for op in OperationReader::<T>::new(&self.rx_data) {
            match op {
                Ok(op) => ops.push(op),
                Err(e) => warn!("Dropping malformed bus operation: {}", e),
            }
        }
        self.rx_data.clear();
        ops
    }

    /// Queue an operation for transmission to the host.
    ///
    /// Returns `false` and logs a warning if the transmit buffer is full.
    pub fn send<T: Framed + Debug>(&mut self, op: &T) -> bool {
        match self.tx.push(op) {
            Ok(()) => {
                trace!("Queued {:?}", op);
                true
            }
            Err(e) => {
                warn!("Dropping {:?}: {}", op, e);
                false
            }
        }
    }

    /// The encoded operations waiting for the transmit clock.
    pub fn tx_bytes(&self) -> &[u8] {
        self.tx.as_bytes()
    }

    /// Whether operations are waiting for the transmit clock.
    pub fn tx_pending(&self) -> bool {
        !self.tx.is_empty()
    }

    /// End the current event.
    ///
    /// Clears the transmit buffer if the transmit clock ticked and resets
    /// both clocks. Returns whether the transmit clock had ticked.
    pub fn end_event(&mut self) -> bool {
        let ticked = self.tx_clock;
        if ticked {
            self.tx.clear();
            self.tx_clock = false;
        }
        self.rx_clock = false;
        ticked
    }
}
