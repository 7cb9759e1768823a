#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

//! # flexray-sim
//!
//! A Rust library for co-simulating FlexRay and CAN bus clusters.
//!
//! Every participant of a simulated bus, the nodes as well as the bus
//! itself, is a model driven by a co-simulation host. Models exchange bus
//! operations (frames, symbols, confirmations, configuration) as encoded
//! byte buffers and tell the host through clocks when they have something
//! to send.
//!
//! ## Features
//!
//! - **FlexRay**: cluster schedule arithmetic, coldstart with CAS and
//!   startup frames, slot tables with static and dynamic slots, and a bus
//!   that forwards each slot's frame
//! - **CAN**: a bus arbitrating frames by identifier with configurable
//!   arbitration lost behavior
//! - **Fault injection**: seeded, reproducible bus errors
//! - **Host contract**: lifecycle state machine, countdown and triggered
//!   clocks, and value-reference based variable access
//!
//! ## Quick Start
//!
//! ```no_run
//! use flexray_sim::flexray::{FlexRayBus, FlexRayNode};
//! use flexray_sim::types::ClockType;
//! use flexray_sim::{Instance, Result};
//!
//! fn main() -> Result<()> {
//!     let mut node = Instance::new("node1", FlexRayNode::new(ClockType::Countdown));
//!     let mut bus = Instance::new("bus", FlexRayBus::new(2));
//!
//!     node.enter_initialization_mode()?;
//!     node.exit_initialization_mode()?;
//!     bus.enter_initialization_mode()?;
//!     bus.exit_initialization_mode()?;
//!
//!     // Exchange the node's pending operations with the bus.
//!     node.set_clock(3, true)?;
//!     let bytes = node.get_binary(1)?;
//!     node.update_discrete_states()?;
//!
//!     bus.set_binary(0, &bytes)?;
//!     bus.set_clock(2, true)?;
//!     bus.evaluate_discrete_states()?;
//!     bus.update_discrete_states()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`flexray`] | FlexRay cluster, node and bus models |
//! | `can` | CAN frames, operations, bus and node (with `can` feature) |
//! | [`instance`] | Host stepping contract and lifecycle |
//! | [`wire`] | Operation framing and buffer codecs |
//! | [`ring_buffer`] | Bounded queue of received operations |
//! | [`countdown`] | Countdown clock state |
//! | [`port`] | Per-terminal data and clock variables |
//! | [`fault`] | Bus error injection |
//! | [`error`] | Error types and [`Result`] alias |
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`], which is an alias for
//! `core::result::Result<T, Error>`. Bus-level anomalies are logged through
//! the [`log`] facade and absorbed; errors returned to an [`Instance`]
//! terminate it.

extern crate alloc;

#[cfg(feature = "can")]
pub mod can;
pub mod countdown;
pub mod error;
pub mod fault;
pub mod flexray;
pub mod instance;
pub mod port;
pub mod ring_buffer;
pub mod types;
pub mod wire;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
pub use instance::{BusModel, Instance, InstanceState};
