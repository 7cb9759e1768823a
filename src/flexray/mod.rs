//! FlexRay cluster simulation.
//!
//! A cluster consists of one [`FlexRayBus`] and any number of
//! [`FlexRayNode`]s exchanging [`FlexRayOperation`]s through the host. The
//! nodes share a [`ClusterConfig`] that defines the communication cycle:
//!
//! ```text
//! |<------------------------- cycle ------------------------->|
//! | static slots | dynamic minislots | symbol window |  NIT   |
//! ```
//!
//! Times inside a cycle are counted in macroticks. Cycle 0 of iteration 0
//! begins at the start time agreed on during the coldstart, and cycles
//! repeat `number_of_cycles` times per iteration.
//!
//! # Coldstart
//!
//! Coldstart nodes send a collision avoidance symbol (CAS), the first one to
//! do so announces the start time of cycle 0, and every node needs four
//! consecutive cycles with startup frames from itself and another node
//! before it sends data.
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::flexray::{ClusterConfig, FlexRayBus, FlexRayNode};
//! use flexray_sim::types::ClockType;
//!
//! let config = ClusterConfig::load_from_file("cluster.json")?;
//! let bus = FlexRayBus::new(2);
//! let first = FlexRayNode::new(ClockType::Countdown).with_cluster_config(config)?;
//! let second = FlexRayNode::new(ClockType::Countdown)
//!     .with_second_node(true)
//!     .with_cluster_config(config)?;
//! ```

pub mod bus;
pub mod cluster;
pub mod frame;
pub mod node;
pub mod operation;

pub use bus::FlexRayBus;
pub use cluster::{ClusterConfig, SchedulePosition};
pub use frame::{
    FlexRayChannel, FlexRayFrame, FrameIndicators, MAX_CYCLE_COUNT, MAX_FLEXRAY_PAYLOAD,
    MAX_SLOT_ID, SymbolType,
};
pub use node::{FlexRayNode, SlotAssignment, SlotTable, StartupPhase};
pub use operation::{
    ColdstartNodeType, FlexRayConfiguration, FlexRayErrorCode, FlexRayOperation,
};
