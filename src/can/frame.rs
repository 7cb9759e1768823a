//! CAN frame carried by a transmit operation.
//!
//! [`CanFrame`] implements [`embedded_can::Frame`], so frames can be built
//! and inspected with the usual hardware-agnostic API. Payloads above 8
//! bytes (CAN FD sizes) are created with [`CanFrame::with_payload`].
//!
//! # Data Length to DLC Mapping
//!
//! - 0-8 bytes: DLC = data length
//! - 12, 16, 20, 24, 32, 48, 64 bytes: DLC 9-15, rounding up

use embedded_can::{ExtendedId, Id, StandardId};

use crate::{Error, Result};

/// Maximum CAN payload carried by a transmit operation.
pub const MAX_CAN_DATA_LEN: usize = 64;

/// Maximum payload of a classic CAN frame.
pub const MAX_CLASSIC_DATA_LEN: usize = 8;

/// Returns the smallest DLC that can hold `len` bytes.
#[inline]
pub const fn len_to_dlc(len: usize) -> u8 {
    match len {
        0..=8 => len as u8,
        9..=12 => 9,
        13..=16 => 10,
        17..=20 => 11,
        21..=24 => 12,
        25..=32 => 13,
        33..=48 => 14,
        _ => 15,
    }
}

/// Numeric value of a CAN identifier, used for arbitration.
#[inline]
pub fn raw_id(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

/// Build an identifier from its numeric value and IDE flag.
pub fn id_from_raw(raw: u32, extended: bool) -> Result<Id> {
    let id = if extended {
        ExtendedId::new(raw).map(Id::Extended)
    } else {
        u16::try_from(raw)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };
    id.ok_or(Error::InvalidField {
        field: "can_id",
        value: raw as u64,
    })
}

/// A CAN frame with up to [`MAX_CAN_DATA_LEN`] bytes of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    data: [u8; MAX_CAN_DATA_LEN],
    len: usize,
    remote: bool,
}

impl CanFrame {
    /// Create a data frame with up to [`MAX_CAN_DATA_LEN`] bytes.
    ///
    /// # Errors
    /// [`Error::PayloadTooLarge`] for longer payloads.
    pub fn with_payload(id: impl Into<Id>, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_CAN_DATA_LEN {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: MAX_CAN_DATA_LEN,
            });
        }
        let mut frame_data = [0u8; MAX_CAN_DATA_LEN];
        frame_data[..data.len()].copy_from_slice(data);
        Ok(Self {
            id: id.into(),
            data: frame_data,
            len: data.len(),
            remote: false,
        })
    }

    /// Turn a decoded frame into a remote request of the same length.
    pub(crate) fn into_remote(mut self) -> Self {
        self.data = [0u8; MAX_CAN_DATA_LEN];
        self.remote = true;
        self
    }

    /// Numeric identifier; the lower value wins arbitration.
    pub fn raw_id(&self) -> u32 {
        raw_id(self.id)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the frame carries no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The payload, including bytes past the classic 8-byte limit.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_CLASSIC_DATA_LEN {
            return None;
        }
        Self::with_payload(id, data).ok()
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_CLASSIC_DATA_LEN {
            return None;
        }
        Some(Self {
            id: id.into(),
            data: [0u8; MAX_CAN_DATA_LEN],
            len: dlc,
            remote: true,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        len_to_dlc(self.len) as usize
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.len]
        }
    }
}
