//! Binary framing of bus operations.
//!
//! Every operation exchanged with the host starts with the same header:
//!
//! - Bytes 0-3: Opcode (little-endian u32)
//! - Bytes 4-7: Total operation length including the header (little-endian u32)
//!
//! The length is the only framing mechanism; a buffer is a plain
//! concatenation of operations. [`OperationReader`] walks such a buffer
//! lazily and [`OperationWriter`] builds one with a fixed capacity.
//!
//! # Example
//!
//! ```ignore
//! use flexray_sim::wire::{OperationReader, OperationWriter};
//! use flexray_sim::flexray::FlexRayOperation;
//!
//! let mut writer = OperationWriter::new();
//! writer.push(&FlexRayOperation::StartCommunication { start_time_ns: 30_000_000 })?;
//!
//! for op in OperationReader::<FlexRayOperation>::new(writer.as_bytes()) {
//!     println!("{:?}", op?);
//! }
//! ```

use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::{Error, Result};

/// Size of the common operation header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Default capacity of a transmit buffer variable.
pub const TX_BUFFER_SIZE: usize = 2048;

/// An operation that can be framed with the common header.
pub trait Framed: Sized {
    /// Opcode written into the header.
    fn opcode(&self) -> u32;

    /// Total encoded length including the header.
    fn framed_len(&self) -> usize;

    /// Append the opcode-specific fields (everything after the header).
    fn encode_body(&self, out: &mut Vec<u8>);

    /// Decode an operation from its opcode and the bytes after the header.
    fn decode(opcode: u32, body: &[u8]) -> Result<Self>;

    /// Encode the complete operation including the header.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.framed_len());
        self.encode_into(&mut out);
        out
    }

    /// Append the complete operation including the header.
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.opcode().to_le_bytes());
        out.extend_from_slice(&(self.framed_len() as u32).to_le_bytes());
        self.encode_body(out);
    }
}

/// Cursor over the fields of an operation body.
///
/// Every read is bounds-checked and fails with [`Error::TooShortBuffer`].
pub struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Start reading at the beginning of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(Error::TooShortBuffer {
                actual: self.bytes.len(),
                expected: end,
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian u16.
    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u32.
    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian u64.
    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a boolean encoded as a single byte.
    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    /// Read `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// All bytes that have not been read yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }
}

/// Lazy iterator over the operations in a received buffer.
///
/// Yields one `Result` per framed operation. An operation with a bad body
/// (unknown opcode, truncated fields) yields an error but does not stop the
/// walk, since its header still frames it. A header whose length cannot be
/// framed yields [`Error::InvalidLength`] once and ends the iteration.
/// Trailing bytes shorter than a header are ignored.
pub struct OperationReader<'a, T> {
    bytes: &'a [u8],
    pos: usize,
    done: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: Framed> OperationReader<'a, T> {
    /// Create a reader over a concatenation of operations.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Number of bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

impl<T: Framed> Iterator for OperationReader<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining() < HEADER_SIZE {
            return None;
        }

        let mut header = FieldReader::new(&self.bytes[self.pos..self.pos + HEADER_SIZE]);
        let (opcode, length) = match (header.u32(), header.u32()) {
            (Ok(opcode), Ok(length)) => (opcode, length as usize),
            _ => return None,
        };

        let available = self.remaining();
        if length < HEADER_SIZE || length > available {
            self.done = true;
            return Some(Err(Error::InvalidLength {
                declared: length,
                available,
            }));
        }

        let body = &self.bytes[self.pos + HEADER_SIZE..self.pos + length];
        self.pos += length;
        Some(T::decode(opcode, body))
    }
}

/// A bounded buffer collecting operations for transmission to the host.
#[derive(Debug, Clone)]
pub struct OperationWriter {
    buffer: Vec<u8>,
    capacity: usize,
}

impl OperationWriter {
    /// Create a writer with the default [`TX_BUFFER_SIZE`] capacity.
    pub fn new() -> Self {
        Self::with_capacity(TX_BUFFER_SIZE)
    }

    /// Create a writer with a custom byte capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an operation, failing if it does not fit.
    pub fn push<T: Framed>(&mut self, op: &T) -> Result<()> {
        let needed = op.framed_len();
        let available = self.capacity - self.buffer.len();
        if needed > available {
            return Err(Error::BufferOverflow { needed, available });
        }
        op.encode_into(&mut self.buffer);
        Ok(())
    }

    /// The encoded operations written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no operation has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all written operations.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for OperationWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal operation used to exercise the framing in isolation.
    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    impl Framed for Ping {
        fn opcode(&self) -> u32 {
            0x01
        }

        fn framed_len(&self) -> usize {
            HEADER_SIZE + 4
        }

        fn encode_body(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.0.to_le_bytes());
        }

        fn decode(opcode: u32, body: &[u8]) -> Result<Self> {
            if opcode != 0x01 {
                return Err(Error::UnknownOpcode(opcode));
            }
            Ok(Ping(FieldReader::new(body).u32()?))
        }
    }

    #[test]
    fn test_reader_walks_concatenated_operations() {
        let mut writer = OperationWriter::new();
        writer.push(&Ping(1)).unwrap();
        writer.push(&Ping(2)).unwrap();

        let ops: Vec<Ping> = OperationReader::new(writer.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(ops, vec![Ping(1), Ping(2)]);
    }

    #[test]
    fn test_reader_stops_on_bad_length() {
        let mut bytes = Ping(7).encode();
        // Declare 64 bytes with only 12 present.
        bytes[4] = 64;
        let mut reader = OperationReader::<Ping>::new(&bytes);
        assert!(matches!(
            reader.next(),
            Some(Err(Error::InvalidLength {
                declared: 64,
                available: 12
            }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_reader_continues_after_unknown_opcode() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x99u32.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        Ping(3).encode_into(&mut bytes);

        let mut reader = OperationReader::<Ping>::new(&bytes);
        assert!(matches!(reader.next(), Some(Err(Error::UnknownOpcode(0x99)))));
        assert_eq!(reader.next().unwrap().unwrap(), Ping(3));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_reader_ignores_trailing_bytes() {
        let mut bytes = Ping(4).encode();
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        let ops: Vec<_> = OperationReader::<Ping>::new(&bytes).collect();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_writer_rejects_overflow() {
        let mut writer = OperationWriter::with_capacity(20);
        writer.push(&Ping(1)).unwrap();
        assert!(matches!(
            writer.push(&Ping(2)),
            Err(Error::BufferOverflow {
                needed: 12,
                available: 8
            })
        ));
        assert_eq!(writer.len(), 12);
        writer.clear();
        assert!(writer.is_empty());
    }

    #[test]
    fn test_field_reader_bounds() {
        let mut r = FieldReader::new(&[1, 2, 3]);
        assert_eq!(r.u16().unwrap(), 0x0201);
        assert!(matches!(
            r.u16(),
            Err(Error::TooShortBuffer {
                actual: 3,
                expected: 4
            })
        ));
    }
}
