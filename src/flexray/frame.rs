//! FlexRay frame types and constants.
//!
//! This module defines the frame carried by a FlexRay transmit operation
//! together with the channel and symbol vocabulary shared by nodes and the
//! bus simulation.

use alloc::vec::Vec;

use crate::{Error, Result};

/// Maximum payload carried by a simulated FlexRay frame.
pub const MAX_FLEXRAY_PAYLOAD: usize = 64;

/// Maximum FlexRay slot ID (2047, 11 bits).
pub const MAX_SLOT_ID: u16 = 2047;

/// Maximum FlexRay cycle count (63, 6 bits).
pub const MAX_CYCLE_COUNT: u8 = 63;

/// FlexRay channel selection, encoded as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FlexRayChannel {
    /// Channel A.
    #[default]
    A = 1,
    /// Channel B.
    B = 2,
    /// Both channels (A and B).
    AB = 3,
}

impl FlexRayChannel {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::A),
            2 => Some(Self::B),
            3 => Some(Self::AB),
            _ => None,
        }
    }

    /// Decode a channel field, rejecting unknown masks.
    pub(crate) fn decode(value: u8) -> Result<Self> {
        Self::from_u8(value).ok_or(Error::InvalidField {
            field: "channel",
            value: value as u64,
        })
    }

    /// Whether every channel of `other` is also part of `self`.
    pub fn contains(self, other: FlexRayChannel) -> bool {
        (self as u8) & (other as u8) == other as u8
    }
}

/// Symbols exchanged on the bus outside of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolType {
    /// Collision avoidance symbol, sent by a coldstart node before startup.
    CollisionAvoidance = 1,
    /// Wakeup symbol.
    Wakeup = 2,
    /// Wakeup during operation pattern.
    WakeupDuringOperation = 3,
}

impl SymbolType {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::CollisionAvoidance),
            2 => Some(Self::Wakeup),
            3 => Some(Self::WakeupDuringOperation),
            _ => None,
        }
    }
}

/// Indicator bits of a FlexRay frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameIndicators(u8);

impl FrameIndicators {
    /// Startup frame indicator.
    pub const STARTUP: u8 = 0x01;
    /// Sync frame indicator.
    pub const SYNC: u8 = 0x02;
    /// Null frame indicator (payload not valid).
    pub const NULL_FRAME: u8 = 0x04;
    /// Payload preamble indicator.
    pub const PAYLOAD_PREAMBLE: u8 = 0x08;

    /// Create indicators from raw bits.
    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// Get raw bits.
    pub fn to_u8(self) -> u8 {
        self.0
    }

    /// Check if this is a startup frame.
    pub fn is_startup(self) -> bool {
        self.0 & Self::STARTUP != 0
    }

    /// Check if this is a sync frame.
    pub fn is_sync(self) -> bool {
        self.0 & Self::SYNC != 0
    }

    /// Check if this is a null frame.
    pub fn is_null_frame(self) -> bool {
        self.0 & Self::NULL_FRAME != 0
    }

    /// Check if payload preamble is present.
    pub fn has_payload_preamble(self) -> bool {
        self.0 & Self::PAYLOAD_PREAMBLE != 0
    }

    fn with(self, bit: u8, on: bool) -> Self {
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    /// Set the startup flag.
    pub fn with_startup(self, startup: bool) -> Self {
        self.with(Self::STARTUP, startup)
    }

    /// Set the sync flag.
    pub fn with_sync(self, sync: bool) -> Self {
        self.with(Self::SYNC, sync)
    }

    /// Set the null frame flag.
    pub fn with_null_frame(self, null_frame: bool) -> Self {
        self.with(Self::NULL_FRAME, null_frame)
    }

    /// Set the payload preamble flag.
    pub fn with_payload_preamble(self, preamble: bool) -> Self {
        self.with(Self::PAYLOAD_PREAMBLE, preamble)
    }
}

/// A FlexRay frame as carried by a transmit operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexRayFrame {
    /// Cycle count (0-63).
    pub cycle: u8,
    /// Slot ID (1-2047).
    pub slot_id: u16,
    /// Channel (A, B, or AB).
    pub channel: FlexRayChannel,
    /// Header indicator bits.
    pub indicators: FrameIndicators,
    /// Payload data (up to 64 bytes).
    pub payload: Vec<u8>,
}

impl FlexRayFrame {
    /// Create a new data frame.
    ///
    /// # Errors
    /// Returns [`Error::PayloadTooLarge`] for more than [`MAX_FLEXRAY_PAYLOAD`] bytes
    /// and [`Error::InvalidField`] for an out-of-range slot or cycle.
    pub fn new(cycle: u8, slot_id: u16, channel: FlexRayChannel, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_FLEXRAY_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_FLEXRAY_PAYLOAD,
            });
        }
        if slot_id == 0 || slot_id > MAX_SLOT_ID {
            return Err(Error::InvalidField {
                field: "slot_id",
                value: slot_id as u64,
            });
        }
        if cycle > MAX_CYCLE_COUNT {
            return Err(Error::InvalidField {
                field: "cycle",
                value: cycle as u64,
            });
        }
        Ok(Self {
            cycle,
            slot_id,
            channel,
            indicators: FrameIndicators::default(),
            payload: payload.to_vec(),
        })
    }

    /// Create a null frame (no valid payload).
    pub fn null_frame(cycle: u8, slot_id: u16, channel: FlexRayChannel) -> Result<Self> {
        let mut frame = Self::new(cycle, slot_id, channel, &[])?;
        frame.indicators = frame.indicators.with_null_frame(true);
        Ok(frame)
    }

    /// Mark the frame as startup frame. Startup frames are always sync frames.
    pub fn with_startup(mut self, startup: bool) -> Self {
        self.indicators = self.indicators.with_startup(startup).with_sync(startup);
        self
    }

    /// Check if this is a startup frame.
    pub fn is_startup(&self) -> bool {
        self.indicators.is_startup()
    }

    /// Check if this is a null frame.
    pub fn is_null_frame(&self) -> bool {
        self.indicators.is_null_frame()
    }

    /// Get the payload slice.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get payload length.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
