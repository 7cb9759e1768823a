//! Error types for bus simulation operations.
//!
//! This module defines the [`Error`] enum which represents every failure that
//! can propagate to the co-simulation host. Bus-level anomalies (dropped
//! frames, unexpected symbols, full buffers) are logged and absorbed by the
//! simulation models; only malformed wire data and API-contract violations
//! surface here.
//!
//! # Example
//!
//! ```no_run
//! use flexray_sim::{Error, Result};
//! use flexray_sim::flexray::FlexRayOperation;
//! use flexray_sim::wire::OperationReader;
//!
//! fn count_transmits(bytes: &[u8]) -> Result<usize> {
//!     let mut count = 0;
//!     for op in OperationReader::<FlexRayOperation>::new(bytes) {
//!         match op {
//!             Ok(FlexRayOperation::Transmit(_)) => count += 1,
//!             Ok(_) => {}
//!             Err(Error::UnknownOpcode(code)) => {
//!                 eprintln!("Skipping unknown opcode {code:#x}");
//!             }
//!             Err(e) => return Err(e),
//!         }
//!     }
//!     Ok(count)
//! }
//! ```

use core::fmt;

/// Errors that can occur while decoding operations or driving a simulation.
#[derive(Debug)]
pub enum Error {
    /// Buffer provided for decoding was too small.
    TooShortBuffer {
        /// Actual number of bytes available
        actual: usize,
        /// Minimum number of bytes required
        expected: usize,
    },

    /// An operation header declared a length that cannot be framed.
    ///
    /// Either the declared length is smaller than the header itself or it
    /// reaches past the end of the buffer.
    InvalidLength {
        /// Length declared in the operation header
        declared: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },

    /// The opcode is not known for this bus type.
    UnknownOpcode(u32),

    /// A field carried a value outside its permitted range.
    InvalidField {
        /// Name of the offending field
        field: &'static str,
        /// The raw value that was found
        value: u64,
    },

    /// A frame payload exceeds the maximum for its bus.
    PayloadTooLarge {
        /// Payload length that was supplied
        len: usize,
        /// Maximum payload length permitted
        max: usize,
    },

    /// A cluster configuration violates a schedule invariant.
    InvalidClusterConfig(&'static str),

    /// An operation did not fit into a fixed-size transmit buffer.
    BufferOverflow {
        /// Bytes needed by the operation
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// The host called a function in a way the model does not allow.
    ///
    /// Examples are setting inputs after discrete states were evaluated or
    /// querying a clock with an incompatible clock type.
    InvalidCall {
        /// Name of the function that was called
        function: &'static str,
        /// Why the call was rejected
        reason: &'static str,
    },

    /// A lifecycle function was called in the wrong instance state.
    InvalidState {
        /// Name of the function that was called
        function: &'static str,
        /// State required by the function
        expected: &'static str,
        /// State the instance was in
        actual: &'static str,
    },

    /// The value reference does not name a variable of this model.
    UnknownVariable(u32),

    /// The instance was terminated and accepts no further calls.
    Terminated,

    /// An I/O error occurred while loading configuration.
    ///
    /// Only available with the `std` feature.
    #[cfg(feature = "std")]
    IOError(std::io::Error),

    /// A JSON configuration could not be parsed.
    ///
    /// Only available with the `std` feature.
    #[cfg(feature = "std")]
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TooShortBuffer { actual, expected } => write!(
                f,
                "Buffer too small: need at least {expected} bytes, got {actual}"
            ),
            Error::InvalidLength {
                declared,
                available,
            } => write!(
                f,
                "Invalid operation length {declared} with {available} bytes remaining"
            ),
            Error::UnknownOpcode(code) => write!(f, "Unknown opcode {code:#x}"),
            Error::InvalidField { field, value } => {
                write!(f, "Invalid value {value} for field {field}")
            }
            Error::PayloadTooLarge { len, max } => {
                write!(f, "Payload of {len} bytes exceeds maximum of {max}")
            }
            Error::InvalidClusterConfig(reason) => {
                write!(f, "Invalid cluster configuration: {reason}")
            }
            Error::BufferOverflow { needed, available } => write!(
                f,
                "Buffer overflow: operation needs {needed} bytes, {available} available"
            ),
            Error::InvalidCall { function, reason } => {
                write!(f, "{function}: Invalid call: {reason}")
            }
            Error::InvalidState {
                function,
                expected,
                actual,
            } => write!(
                f,
                "Must be in state {expected} to call {function}, instance is in {actual}"
            ),
            Error::UnknownVariable(vr) => write!(f, "Unknown value reference {vr}"),
            Error::Terminated => write!(f, "Instance has been terminated"),
            #[cfg(feature = "std")]
            Error::IOError(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "std")]
            Error::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IOError(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IOError(err)
    }
}

#[cfg(feature = "std")]
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

/// A specialized Result type for bus simulation operations.
///
/// This is defined as `core::result::Result<T, Error>` for convenience.
pub type Result<T> = core::result::Result<T, Error>;
