//! CAN bus operations and their wire encoding.
//!
//! Layouts after the common [header](crate::wire), little-endian:
//!
//! | Operation | Opcode | Fields |
//! |---|---|---|
//! | Transmit | `0x10` | id u32, ide u8, rtr u8, length u16, data |
//! | Confirm | `0x20` | id u32 |
//! | ArbitrationLost | `0x30` | id u32 |
//! | BusError | `0x31` | id u32, error code u8, error flag u8, is sender u8 |
//! | Configuration | `0x40` | parameter type u8, baud rate u32 or behavior u8 |

use alloc::vec::Vec;

use embedded_can::Frame;

use super::frame::{CanFrame, MAX_CAN_DATA_LEN, id_from_raw};
use crate::wire::{FieldReader, Framed, HEADER_SIZE};
use crate::{Error, Result};

/// CAN opcodes.
pub mod opcode {
    /// Frame transmission.
    pub const TRANSMIT: u32 = 0x10;
    /// Transmission confirmation.
    pub const CONFIRM: u32 = 0x20;
    /// Arbitration lost notification.
    pub const ARBITRATION_LOST: u32 = 0x30;
    /// Bus error indication.
    pub const BUS_ERROR: u32 = 0x31;
    /// Configuration.
    pub const CONFIGURATION: u32 = 0x40;
}

/// Configuration parameter types.
pub mod config_param {
    /// Classic CAN baud rate.
    pub const CAN_BAUDRATE: u8 = 1;
    /// CAN FD data phase baud rate.
    pub const CAN_FD_BAUDRATE: u8 = 2;
    /// CAN XL data phase baud rate.
    pub const CAN_XL_BAUDRATE: u8 = 3;
    /// Arbitration lost behavior.
    pub const ARBITRATION_LOST_BEHAVIOR: u8 = 4;
}

const TRANSMIT_FIXED_LEN: usize = 8;
const ID_LEN: usize = 4;
const BUS_ERROR_FIXED_LEN: usize = 7;

/// Error detected on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CanErrorCode {
    /// Bit error.
    Bit = 1,
    /// Bit stuffing error.
    Stuff = 2,
    /// Form error.
    Form = 3,
    /// CRC error.
    Crc = 4,
    /// Missing acknowledgement.
    Ack = 5,
    /// Broken error frame.
    Broken = 6,
}

impl CanErrorCode {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Bit),
            2 => Some(Self::Stuff),
            3 => Some(Self::Form),
            4 => Some(Self::Crc),
            5 => Some(Self::Ack),
            6 => Some(Self::Broken),
            _ => None,
        }
    }
}

/// Whether the node detected the error itself or reacted to an error flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CanErrorFlag {
    /// The node detected the error.
    Primary = 1,
    /// The node reacted to another node's error flag.
    Secondary = 2,
}

impl CanErrorFlag {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Primary),
            2 => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// What happens to a node's queued frames when it loses arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ArbitrationLostBehavior {
    /// Keep the frames queued and retry in the next arbitration.
    #[default]
    BufferAndRetransmit = 0,
    /// Drop the frames and notify the node for each one.
    DiscardAndNotify = 1,
}

impl ArbitrationLostBehavior {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::BufferAndRetransmit),
            1 => Some(Self::DiscardAndNotify),
            _ => None,
        }
    }
}

/// Payload of a configuration operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanConfiguration {
    /// Classic CAN baud rate in bit/s.
    CanBaudrate(u32),
    /// CAN FD data phase baud rate in bit/s.
    CanFdBaudrate(u32),
    /// CAN XL data phase baud rate in bit/s.
    CanXlBaudrate(u32),
    /// Arbitration lost behavior of the sending node.
    ArbitrationLostBehavior(ArbitrationLostBehavior),
}

impl CanConfiguration {
    fn parameter_type(&self) -> u8 {
        match self {
            CanConfiguration::CanBaudrate(_) => config_param::CAN_BAUDRATE,
            CanConfiguration::CanFdBaudrate(_) => config_param::CAN_FD_BAUDRATE,
            CanConfiguration::CanXlBaudrate(_) => config_param::CAN_XL_BAUDRATE,
            CanConfiguration::ArbitrationLostBehavior(_) => config_param::ARBITRATION_LOST_BEHAVIOR,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            CanConfiguration::ArbitrationLostBehavior(_) => 2,
            _ => 5,
        }
    }

    /// The configured baud rate, if this is a baud rate parameter.
    pub fn baudrate(&self) -> Option<u32> {
        match *self {
            CanConfiguration::CanBaudrate(baud)
            | CanConfiguration::CanFdBaudrate(baud)
            | CanConfiguration::CanXlBaudrate(baud) => Some(baud),
            CanConfiguration::ArbitrationLostBehavior(_) => None,
        }
    }
}

/// A decoded CAN bus operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanOperation {
    /// A frame to be arbitrated or a frame forwarded by the bus.
    Transmit(CanFrame),
    /// The node's frame won arbitration and was delivered.
    Confirm {
        /// Identifier of the delivered frame.
        id: u32,
    },
    /// The node's frame lost arbitration and was discarded.
    ArbitrationLost {
        /// Identifier of the discarded frame.
        id: u32,
    },
    /// The frame on the bus was destroyed by an error.
    BusError {
        /// Identifier of the destroyed frame.
        id: u32,
        /// Kind of error.
        code: CanErrorCode,
        /// Whether the receiving node detected the error itself.
        flag: CanErrorFlag,
        /// Whether the receiving node sent the destroyed frame.
        is_sender: bool,
    },
    /// Configuration parameters.
    Configuration(CanConfiguration),
}

impl Framed for CanOperation {
    fn opcode(&self) -> u32 {
        match self {
            CanOperation::Transmit(_) => opcode::TRANSMIT,
            CanOperation::Confirm { .. } => opcode::CONFIRM,
            CanOperation::ArbitrationLost { .. } => opcode::ARBITRATION_LOST,
            CanOperation::BusError { .. } => opcode::BUS_ERROR,
            CanOperation::Configuration(_) => opcode::CONFIGURATION,
        }
    }

    fn framed_len(&self) -> usize {
        HEADER_SIZE
            + match self {
                CanOperation::Transmit(frame) => TRANSMIT_FIXED_LEN + frame.len(),
                CanOperation::Confirm { .. } | CanOperation::ArbitrationLost { .. } => ID_LEN,
                CanOperation::BusError { .. } => BUS_ERROR_FIXED_LEN,
                CanOperation::Configuration(config) => config.body_len(),
            }
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            CanOperation::Transmit(frame) => {
                out.extend_from_slice(&frame.raw_id().to_le_bytes());
                out.push(frame.is_extended() as u8);
                out.push(frame.is_remote_frame() as u8);
                out.extend_from_slice(&(frame.len() as u16).to_le_bytes());
                if frame.is_remote_frame() {
                    out.resize(out.len() + frame.len(), 0);
                } else {
                    out.extend_from_slice(frame.payload());
                }
            }
            CanOperation::Confirm { id } | CanOperation::ArbitrationLost { id } => {
                out.extend_from_slice(&id.to_le_bytes());
            }
            CanOperation::BusError {
                id,
                code,
                flag,
                is_sender,
            } => {
                out.extend_from_slice(&id.to_le_bytes());
                out.push(*code as u8);
                out.push(*flag as u8);
                out.push(*is_sender as u8);
            }
            CanOperation::Configuration(config) => {
                out.push(config.parameter_type());
                match config {
                    CanConfiguration::ArbitrationLostBehavior(behavior) => out.push(*behavior as u8),
                    CanConfiguration::CanBaudrate(baud)
                    | CanConfiguration::CanFdBaudrate(baud)
                    | CanConfiguration::CanXlBaudrate(baud) => {
                        out.extend_from_slice(&baud.to_le_bytes())
                    }
                }
            }
        }
    }

    fn decode(code: u32, body: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(body);
        match code {
            opcode::TRANSMIT => {
                let raw_id = r.u32()?;
                let extended = r.bool()?;
                let remote = r.bool()?;
                let len = r.u16()? as usize;
                if len > MAX_CAN_DATA_LEN {
                    return Err(Error::PayloadTooLarge {
                        len,
                        max: MAX_CAN_DATA_LEN,
                    });
                }
                let frame = CanFrame::with_payload(id_from_raw(raw_id, extended)?, r.bytes(len)?)?;
                Ok(CanOperation::Transmit(if remote {
                    frame.into_remote()
                } else {
                    frame
                }))
            }
            opcode::CONFIRM => Ok(CanOperation::Confirm { id: r.u32()? }),
            opcode::ARBITRATION_LOST => Ok(CanOperation::ArbitrationLost { id: r.u32()? }),
            opcode::BUS_ERROR => {
                let id = r.u32()?;
                let raw = r.u8()?;
                let code = CanErrorCode::from_u8(raw).ok_or(Error::InvalidField {
                    field: "error_code",
                    value: raw as u64,
                })?;
                let raw = r.u8()?;
                let flag = CanErrorFlag::from_u8(raw).ok_or(Error::InvalidField {
                    field: "error_flag",
                    value: raw as u64,
                })?;
                Ok(CanOperation::BusError {
                    id,
                    code,
                    flag,
                    is_sender: r.bool()?,
                })
            }
            opcode::CONFIGURATION => {
                let parameter_type = r.u8()?;
                let config = match parameter_type {
                    config_param::CAN_BAUDRATE => CanConfiguration::CanBaudrate(r.u32()?),
                    config_param::CAN_FD_BAUDRATE => CanConfiguration::CanFdBaudrate(r.u32()?),
                    config_param::CAN_XL_BAUDRATE => CanConfiguration::CanXlBaudrate(r.u32()?),
                    config_param::ARBITRATION_LOST_BEHAVIOR => {
                        let raw = r.u8()?;
                        CanConfiguration::ArbitrationLostBehavior(
                            ArbitrationLostBehavior::from_u8(raw).ok_or(Error::InvalidField {
                                field: "arbitration_lost_behavior",
                                value: raw as u64,
                            })?,
                        )
                    }
                    other => {
                        return Err(Error::InvalidField {
                            field: "parameter_type",
                            value: other as u64,
                        });
                    }
                };
                Ok(CanOperation::Configuration(config))
            }
            other => Err(Error::UnknownOpcode(other)),
        }
    }
}
