//! FlexRay bus operations and their wire encoding.
//!
//! All multi-byte fields are little-endian and follow the common
//! [header](crate::wire). Layouts after the header:
//!
//! | Operation | Opcode | Fields |
//! |---|---|---|
//! | Transmit | `0x10` | cycle u8, slot u16, channel u8, startup u8, sync u8, null u8, preamble u8, length u8, data |
//! | Confirm | `0x20` | cycle u8, slot u16, channel u8 |
//! | Symbol | `0x30` | cycle u8, channel u8, type u8 |
//! | BusError | `0x31` | cycle u8, slot u16, channel u8, code u8 |
//! | Configuration | `0x40` | parameter type u8, parameters |
//! | StartCommunication | `0x50` | start time u64 (ns) |

use alloc::vec::Vec;

use super::cluster::ClusterConfig;
use super::frame::{FlexRayChannel, FlexRayFrame, FrameIndicators, MAX_FLEXRAY_PAYLOAD, SymbolType};
use crate::wire::{FieldReader, Framed, HEADER_SIZE};
use crate::{Error, Result};

/// FlexRay opcodes.
pub mod opcode {
    /// Frame transmission.
    pub const TRANSMIT: u32 = 0x10;
    /// Transmission confirmation.
    pub const CONFIRM: u32 = 0x20;
    /// Symbol transmission.
    pub const SYMBOL: u32 = 0x30;
    /// Bus error indication.
    pub const BUS_ERROR: u32 = 0x31;
    /// Configuration.
    pub const CONFIGURATION: u32 = 0x40;
    /// Start of communication.
    pub const START_COMMUNICATION: u32 = 0x50;
}

/// Configuration parameter type carrying a full cluster configuration.
pub const CONFIG_PARAM_FLEXRAY_CONFIG: u8 = 1;

const TRANSMIT_FIXED_LEN: usize = 9;
const CONFIRM_FIXED_LEN: usize = 4;
const SYMBOL_FIXED_LEN: usize = 3;
const BUS_ERROR_FIXED_LEN: usize = 5;
const CLUSTER_CONFIG_LEN: usize = 26;

/// Role of the sending node in the cluster startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ColdstartNodeType {
    /// Node may initiate the cluster startup.
    #[default]
    Coldstart = 1,
    /// Node sends sync frames but does not initiate startup.
    Sync = 2,
    /// Node only integrates into a running cluster.
    NonSync = 3,
}

impl ColdstartNodeType {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Coldstart),
            2 => Some(Self::Sync),
            3 => Some(Self::NonSync),
            _ => None,
        }
    }
}

/// Slot status error reported by a bus error operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlexRayErrorCode {
    /// Decoding error in the slot.
    SyntaxError = 1,
    /// Frame decoded but its content is inconsistent (e.g. CRC).
    ContentError = 2,
    /// Activity across a slot boundary.
    BoundaryViolation = 3,
    /// Transmission conflict with another node.
    TxConflict = 4,
}

impl FlexRayErrorCode {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::SyntaxError),
            2 => Some(Self::ContentError),
            3 => Some(Self::BoundaryViolation),
            4 => Some(Self::TxConflict),
            _ => None,
        }
    }
}

/// Payload of a configuration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlexRayConfiguration {
    /// Full cluster timing configuration.
    Cluster {
        /// The cluster configuration.
        config: ClusterConfig,
        /// Role of the sending node.
        coldstart_node_type: ColdstartNodeType,
    },
    /// A parameter type this crate does not interpret, kept verbatim.
    Other {
        /// Raw parameter type.
        parameter_type: u8,
        /// Raw parameter bytes.
        payload: Vec<u8>,
    },
}

impl FlexRayConfiguration {
    fn body_len(&self) -> usize {
        1 + match self {
            FlexRayConfiguration::Cluster { .. } => CLUSTER_CONFIG_LEN,
            FlexRayConfiguration::Other { payload, .. } => payload.len(),
        }
    }
}

/// A decoded FlexRay bus operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlexRayOperation {
    /// A frame sent in a slot.
    Transmit(FlexRayFrame),
    /// Confirmation that a frame was delivered.
    Confirm {
        /// Cycle of the confirmed frame.
        cycle: u8,
        /// Slot of the confirmed frame.
        slot_id: u16,
        /// Channel of the confirmed frame.
        channel: FlexRayChannel,
    },
    /// A symbol sent in the symbol window.
    Symbol {
        /// Cycle in which the symbol was sent.
        cycle: u8,
        /// Channels the symbol was sent on.
        channel: FlexRayChannel,
        /// The symbol.
        symbol: SymbolType,
    },
    /// Error indication for a slot.
    BusError {
        /// Cycle of the failed slot.
        cycle: u8,
        /// The failed slot.
        slot_id: u16,
        /// Channel of the failed slot.
        channel: FlexRayChannel,
        /// What went wrong.
        code: FlexRayErrorCode,
    },
    /// Configuration parameters.
    Configuration(FlexRayConfiguration),
    /// Announces the start time of the first cycle.
    StartCommunication {
        /// Simulation time of the start of cycle 0, in nanoseconds.
        start_time_ns: u64,
    },
}

impl FlexRayOperation {
    /// Confirmation answering a transmitted frame.
    pub fn confirm_for(frame: &FlexRayFrame) -> Self {
        FlexRayOperation::Confirm {
            cycle: frame.cycle,
            slot_id: frame.slot_id,
            channel: frame.channel,
        }
    }

    /// Whether the operation is bound to a schedule slot.
    ///
    /// Slot-bound operations are consumed by the schedule; everything else is
    /// handled as soon as it reaches the head of the receive queue.
    pub fn is_slot_bound(&self) -> bool {
        matches!(self, FlexRayOperation::Transmit(_))
    }
}

impl Framed for FlexRayOperation {
    fn opcode(&self) -> u32 {
        match self {
            FlexRayOperation::Transmit(_) => opcode::TRANSMIT,
            FlexRayOperation::Confirm { .. } => opcode::CONFIRM,
            FlexRayOperation::Symbol { .. } => opcode::SYMBOL,
            FlexRayOperation::BusError { .. } => opcode::BUS_ERROR,
            FlexRayOperation::Configuration(_) => opcode::CONFIGURATION,
            FlexRayOperation::StartCommunication { .. } => opcode::START_COMMUNICATION,
        }
    }

    fn framed_len(&self) -> usize {
        HEADER_SIZE
            + match self {
                FlexRayOperation::Transmit(frame) => TRANSMIT_FIXED_LEN + frame.payload_len(),
                FlexRayOperation::Confirm { .. } => CONFIRM_FIXED_LEN,
                FlexRayOperation::Symbol { .. } => SYMBOL_FIXED_LEN,
                FlexRayOperation::BusError { .. } => BUS_ERROR_FIXED_LEN,
                FlexRayOperation::Configuration(config) => config.body_len(),
                FlexRayOperation::StartCommunication { .. } => 8,
            }
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            FlexRayOperation::Transmit(frame) => {
                out.push(frame.cycle);
                out.extend_from_slice(&frame.slot_id.to_le_bytes());
                out.push(frame.channel as u8);
                out.push(frame.indicators.is_startup() as u8);
                out.push(frame.indicators.is_sync() as u8);
                out.push(frame.indicators.is_null_frame() as u8);
                out.push(frame.indicators.has_payload_preamble() as u8);
                out.push(frame.payload.len() as u8);
                out.extend_from_slice(&frame.payload);
            }
            FlexRayOperation::Confirm {
                cycle,
                slot_id,
                channel,
            } => {
                out.push(*cycle);
                out.extend_from_slice(&slot_id.to_le_bytes());
                out.push(*channel as u8);
            }
            FlexRayOperation::Symbol {
                cycle,
                channel,
                symbol,
            } => {
                out.push(*cycle);
                out.push(*channel as u8);
                out.push(*symbol as u8);
            }
            FlexRayOperation::BusError {
                cycle,
                slot_id,
                channel,
                code,
            } => {
                out.push(*cycle);
                out.extend_from_slice(&slot_id.to_le_bytes());
                out.push(*channel as u8);
                out.push(*code as u8);
            }
            FlexRayOperation::Configuration(FlexRayConfiguration::Cluster {
                config,
                coldstart_node_type,
            }) => {
                out.push(CONFIG_PARAM_FLEXRAY_CONFIG);
                encode_cluster_config(config, out);
                out.push(*coldstart_node_type as u8);
            }
            FlexRayOperation::Configuration(FlexRayConfiguration::Other {
                parameter_type,
                payload,
            }) => {
                out.push(*parameter_type);
                out.extend_from_slice(payload);
            }
            FlexRayOperation::StartCommunication { start_time_ns } => {
                out.extend_from_slice(&start_time_ns.to_le_bytes());
            }
        }
    }

    fn decode(code: u32, body: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(body);
        match code {
            opcode::TRANSMIT => {
                let cycle = r.u8()?;
                let slot_id = r.u16()?;
                let channel = FlexRayChannel::decode(r.u8()?)?;
                let indicators = FrameIndicators::default()
                    .with_startup(r.bool()?)
                    .with_sync(r.bool()?)
                    .with_null_frame(r.bool()?)
                    .with_payload_preamble(r.bool()?);
                let len = r.u8()? as usize;
                if len > MAX_FLEXRAY_PAYLOAD {
                    return Err(Error::PayloadTooLarge {
                        len,
                        max: MAX_FLEXRAY_PAYLOAD,
                    });
                }
                let mut frame = FlexRayFrame::new(cycle, slot_id, channel, r.bytes(len)?)?;
                frame.indicators = indicators;
                Ok(FlexRayOperation::Transmit(frame))
            }
            opcode::CONFIRM => Ok(FlexRayOperation::Confirm {
                cycle: r.u8()?,
                slot_id: r.u16()?,
                channel: FlexRayChannel::decode(r.u8()?)?,
            }),
            opcode::SYMBOL => {
                let cycle = r.u8()?;
                let channel = FlexRayChannel::decode(r.u8()?)?;
                let raw = r.u8()?;
                let symbol = SymbolType::from_u8(raw).ok_or(Error::InvalidField {
                    field: "symbol",
                    value: raw as u64,
                })?;
                Ok(FlexRayOperation::Symbol {
                    cycle,
                    channel,
                    symbol,
                })
            }
            opcode::BUS_ERROR => {
                let cycle = r.u8()?;
                let slot_id = r.u16()?;
                let channel = FlexRayChannel::decode(r.u8()?)?;
                let raw = r.u8()?;
                let code = FlexRayErrorCode::from_u8(raw).ok_or(Error::InvalidField {
                    field: "error_code",
                    value: raw as u64,
                })?;
                Ok(FlexRayOperation::BusError {
                    cycle,
                    slot_id,
                    channel,
                    code,
                })
            }
            opcode::CONFIGURATION => {
                let parameter_type = r.u8()?;
                if parameter_type == CONFIG_PARAM_FLEXRAY_CONFIG {
                    let config = decode_cluster_config(&mut r)?;
                    let raw = r.u8()?;
                    let coldstart_node_type =
                        ColdstartNodeType::from_u8(raw).ok_or(Error::InvalidField {
                            field: "coldstart_node_type",
                            value: raw as u64,
                        })?;
                    Ok(FlexRayOperation::Configuration(FlexRayConfiguration::Cluster {
                        config,
                        coldstart_node_type,
                    }))
                } else {
                    Ok(FlexRayOperation::Configuration(FlexRayConfiguration::Other {
                        parameter_type,
                        payload: r.rest().to_vec(),
                    }))
                }
            }
            opcode::START_COMMUNICATION => Ok(FlexRayOperation::StartCommunication {
                start_time_ns: r.u64()?,
            }),
            other => Err(Error::UnknownOpcode(other)),
        }
    }
}

fn encode_cluster_config(config: &ClusterConfig, out: &mut Vec<u8>) {
    out.extend_from_slice(&config.macrotick_duration_ns.to_le_bytes());
    out.extend_from_slice(&config.macroticks_per_cycle.to_le_bytes());
    out.push(config.number_of_cycles.saturating_sub(1));
    out.push(config.action_point_offset);
    out.extend_from_slice(&config.static_slot_duration_mt.to_le_bytes());
    out.extend_from_slice(&config.number_of_static_slots.to_le_bytes());
    out.push(config.static_payload_length);
    out.push(config.minislot_action_point_offset);
    out.extend_from_slice(&config.number_of_minislots.to_le_bytes());
    out.push(config.minislot_duration_mt);
    out.push(config.symbol_action_point_offset);
    out.push(config.symbol_window_length);
    out.push(config.nit_length);
    out.push(config.nm_vector_length);
    out.extend_from_slice(&config.dynamic_slot_idle_time.to_le_bytes());
}

fn decode_cluster_config(r: &mut FieldReader<'_>) -> Result<ClusterConfig> {
    let macrotick_duration_ns = r.u32()?;
    let macroticks_per_cycle = r.u16()?;
    let cycle_count_max = r.u8()?;
    let number_of_cycles = cycle_count_max.checked_add(1).ok_or(Error::InvalidField {
        field: "cycle_count_max",
        value: cycle_count_max as u64,
    })?;
    Ok(ClusterConfig {
        macrotick_duration_ns,
        macroticks_per_cycle,
        number_of_cycles,
        action_point_offset: r.u8()?,
        static_slot_duration_mt: r.u16()?,
        number_of_static_slots: r.u16()?,
        static_payload_length: r.u8()?,
        minislot_action_point_offset: r.u8()?,
        number_of_minislots: r.u16()?,
        minislot_duration_mt: r.u8()?,
        symbol_action_point_offset: r.u8()?,
        symbol_window_length: r.u8()?,
        nit_length: r.u8()?,
        nm_vector_length: r.u8()?,
        dynamic_slot_idle_time: r.u32()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::OperationReader;

    #[test]
    fn test_transmit_layout() {
        let frame = FlexRayFrame::new(1, 3, FlexRayChannel::A, &[0xAA, 0xBB])
            .unwrap()
            .with_startup(true);
        let bytes = FlexRayOperation::Transmit(frame).encode();
        assert_eq!(
            bytes,
            vec![
                0x10, 0, 0, 0, // opcode
                19, 0, 0, 0, // length
                1, // cycle
                3, 0, // slot
                1, // channel A
                1, 1, 0, 0, // startup, sync, null, preamble
                2, 0xAA, 0xBB,
            ]
        );
    }

    #[test]
    fn test_fixed_lengths() {
        let confirm = FlexRayOperation::Confirm {
            cycle: 0,
            slot_id: 1,
            channel: FlexRayChannel::A,
        };
        assert_eq!(confirm.encode().len(), 12);
        let symbol = FlexRayOperation::Symbol {
            cycle: 0,
            channel: FlexRayChannel::AB,
            symbol: SymbolType::CollisionAvoidance,
        };
        assert_eq!(symbol.encode().len(), 11);
        let start = FlexRayOperation::StartCommunication {
            start_time_ns: 30_000_000,
        };
        assert_eq!(start.encode().len(), 16);
        let config = FlexRayOperation::Configuration(FlexRayConfiguration::Cluster {
            config: ClusterConfig::demo(),
            coldstart_node_type: ColdstartNodeType::Coldstart,
        });
        assert_eq!(config.framed_len(), 35);
        assert_eq!(config.encode().len(), 35);
    }

    #[test]
    fn test_cluster_config_survives_wire() {
        let op = FlexRayOperation::Configuration(FlexRayConfiguration::Cluster {
            config: ClusterConfig::demo(),
            coldstart_node_type: ColdstartNodeType::Coldstart,
        });
        let bytes = op.encode();
        // cycle count max is transmitted, not the number of cycles
        assert_eq!(bytes[15], 1);
        let decoded = OperationReader::<FlexRayOperation>::new(&bytes)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn test_unknown_configuration_kept_raw() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&opcode::CONFIGURATION.to_le_bytes());
        bytes.extend_from_slice(&12u32.to_le_bytes());
        bytes.extend_from_slice(&[7, 1, 2, 3]);
        let op = OperationReader::<FlexRayOperation>::new(&bytes)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(
            op,
            FlexRayOperation::Configuration(FlexRayConfiguration::Other {
                parameter_type: 7,
                payload: vec![1, 2, 3],
            })
        );
        assert_eq!(op.encode(), bytes);
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        let mut bytes = FlexRayOperation::Symbol {
            cycle: 0,
            channel: FlexRayChannel::A,
            symbol: SymbolType::Wakeup,
        }
        .encode();
        bytes[9] = 0;
        let result = OperationReader::<FlexRayOperation>::new(&bytes).next().unwrap();
        assert!(matches!(
            result,
            Err(Error::InvalidField {
                field: "channel",
                value: 0
            })
        ));

        let mut bytes = FlexRayOperation::StartCommunication { start_time_ns: 1 }.encode();
        bytes[0] = 0x77;
        let result = OperationReader::<FlexRayOperation>::new(&bytes).next().unwrap();
        assert!(matches!(result, Err(Error::UnknownOpcode(0x77))));
    }

    #[test]
    fn test_truncated_transmit() {
        let frame = FlexRayFrame::new(0, 1, FlexRayChannel::A, &[1, 2, 3, 4]).unwrap();
        let mut bytes = FlexRayOperation::Transmit(frame).encode();
        // Claim 4 payload bytes but shrink the operation by two.
        bytes.truncate(bytes.len() - 2);
        bytes[4] -= 2;
        let result = OperationReader::<FlexRayOperation>::new(&bytes).next().unwrap();
        assert!(matches!(result, Err(Error::TooShortBuffer { .. })));
    }

    #[test]
    fn test_slot_bound() {
        let frame = FlexRayFrame::null_frame(0, 1, FlexRayChannel::A).unwrap();
        assert!(FlexRayOperation::Transmit(frame.clone()).is_slot_bound());
        assert!(!FlexRayOperation::confirm_for(&frame).is_slot_bound());
    }
}
