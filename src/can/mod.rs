//! CAN bus simulation.
//!
//! Nodes hand CAN frames to the bus as [`CanOperation::Transmit`]
//! operations. The [`CanBus`] arbitrates the queued frames by identifier,
//! confirms the winner to its sender, forwards it to everyone else and
//! optionally injects bus errors. [`CanNode`] is a node that sends one
//! frame periodically over a triggered transmit clock. Frames implement
//! [`embedded_can::Frame`](https://crates.io/crates/embedded-can), so
//! standard and extended identifiers are built with the usual types.
//!
//! # Example
//!
//! ```ignore
//! use embedded_can::{Frame, StandardId};
//! use flexray_sim::can::{CanFrame, CanOperation};
//! use flexray_sim::wire::Framed;
//!
//! let frame = CanFrame::new(StandardId::new(0x123).unwrap(), &[1, 2, 3]).unwrap();
//! let bytes = CanOperation::Transmit(frame).encode();
//! ```

pub mod bus;
pub mod frame;
pub mod node;
pub mod operation;

pub use bus::CanBus;
pub use frame::{CanFrame, MAX_CAN_DATA_LEN};
pub use node::CanNode;
pub use operation::{
    ArbitrationLostBehavior, CanConfiguration, CanErrorCode, CanErrorFlag, CanOperation,
};

pub use embedded_can::{ExtendedId, Id, StandardId};
