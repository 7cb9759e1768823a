//! Static transmit and receive assignments of a node.
//!
//! Each assignment owns a payload buffer. The application writes transmit
//! buffers and reads receive buffers; the schedule walks both lists with a
//! cursor per list. A cursor remembers the iteration it is in, so the same
//! (cycle, slot) pair is served once per iteration.

use alloc::vec::Vec;

use crate::flexray::cluster::ClusterConfig;
use crate::flexray::frame::{FlexRayChannel, MAX_FLEXRAY_PAYLOAD};
use crate::{Error, Result};

/// A (channel, cycle, slot) pair a node sends or listens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotAssignment {
    /// Channel the frame travels on.
    pub channel: FlexRayChannel,
    /// Cycle within the iteration.
    pub cycle: u8,
    /// Slot within the cycle.
    pub slot_id: u16,
    /// Whether frames in this slot are startup (and sync) frames.
    pub is_startup: bool,
}

impl SlotAssignment {
    /// A data slot on `channel`.
    pub const fn new(channel: FlexRayChannel, cycle: u8, slot_id: u16) -> Self {
        Self {
            channel,
            cycle,
            slot_id,
            is_startup: false,
        }
    }

    /// A startup slot on `channel`.
    pub const fn startup(channel: FlexRayChannel, cycle: u8, slot_id: u16) -> Self {
        Self {
            channel,
            cycle,
            slot_id,
            is_startup: true,
        }
    }

    /// Whether a frame sent in (`channel`, `cycle`, `slot_id`) belongs here.
    pub fn matches(&self, channel: FlexRayChannel, cycle: u8, slot_id: u16) -> bool {
        self.cycle == cycle && self.slot_id == slot_id && channel.contains(self.channel)
    }
}

#[derive(Debug, Clone)]
struct SlotEntry {
    assignment: SlotAssignment,
    data: [u8; MAX_FLEXRAY_PAYLOAD],
    len: usize,
    valid: bool,
}

impl SlotEntry {
    fn new(assignment: SlotAssignment) -> Self {
        Self {
            assignment,
            data: [0; MAX_FLEXRAY_PAYLOAD],
            len: 0,
            valid: false,
        }
    }

    fn store(&mut self, data: &[u8]) {
        let len = data.len().min(MAX_FLEXRAY_PAYLOAD);
        self.data[..len].copy_from_slice(&data[..len]);
        self.len = len;
        self.valid = true;
    }

    fn take(&mut self) -> Option<Vec<u8>> {
        if !self.valid {
            return None;
        }
        self.valid = false;
        Some(self.data[..self.len].to_vec())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    index: usize,
    iteration: u64,
}

impl Cursor {
    fn advance(&mut self, len: usize) {
        self.index += 1;
        if self.index >= len {
            self.index = 0;
            self.iteration += 1;
        }
    }
}

/// Transmit and receive assignments of one node with their buffers.
#[derive(Debug, Clone)]
pub struct SlotTable {
    transmit: Vec<SlotEntry>,
    receive: Vec<SlotEntry>,
    tx_cursor: Cursor,
    rx_cursor: Cursor,
}

impl SlotTable {
    /// Build a table from assignments given in schedule order.
    pub fn new(transmit: &[SlotAssignment], receive: &[SlotAssignment]) -> Self {
        Self {
            transmit: transmit.iter().copied().map(SlotEntry::new).collect(),
            receive: receive.iter().copied().map(SlotEntry::new).collect(),
            tx_cursor: Cursor::default(),
            rx_cursor: Cursor::default(),
        }
    }

    /// The reference schedule of the two-node demo cluster.
    ///
    /// The first node sends in slot 1 and 3 of cycle 0 and slot 1 of cycle 1
    /// and listens in the slots of the second node, which mirrors it on
    /// slots 2 and 4.
    pub fn demo(first_node: bool) -> Self {
        use FlexRayChannel::A;

        let (own, other) = if first_node { (1, 2) } else { (2, 1) };
        Self::new(
            &[
                SlotAssignment::startup(A, 0, own),
                SlotAssignment::new(A, 0, own + 2),
                SlotAssignment::startup(A, 1, own),
            ],
            &[
                SlotAssignment::new(A, 0, other),
                SlotAssignment::new(A, 0, other + 2),
                SlotAssignment::new(A, 1, other),
            ],
        )
    }

    /// Number of transmit assignments.
    pub fn transmit_len(&self) -> usize {
        self.transmit.len()
    }

    /// Number of receive assignments.
    pub fn receive_len(&self) -> usize {
        self.receive.len()
    }

    /// Store application data for transmit buffer `index`.
    ///
    /// # Errors
    /// [`Error::InvalidField`] for an unknown buffer and
    /// [`Error::PayloadTooLarge`] for more than [`MAX_FLEXRAY_PAYLOAD`] bytes.
    pub fn write_transmit(&mut self, index: usize, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FLEXRAY_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: MAX_FLEXRAY_PAYLOAD,
            });
        }
        let entry = self.transmit.get_mut(index).ok_or(Error::InvalidField {
            field: "transmit buffer",
            value: index as u64,
        })?;
        entry.store(data);
        Ok(())
    }

    /// Read and invalidate receive buffer `index`. `None` if no new data
    /// arrived since the last read.
    pub fn take_received(&mut self, index: usize) -> Option<Vec<u8>> {
        self.receive.get_mut(index).and_then(SlotEntry::take)
    }

    /// The transmit assignment under the cursor and the iteration it is due in.
    pub fn next_transmit(&self) -> Option<(SlotAssignment, u64)> {
        self.transmit
            .get(self.tx_cursor.index)
            .map(|entry| (entry.assignment, self.tx_cursor.iteration))
    }

    /// The receive assignment under the cursor and the iteration it is due in.
    pub fn next_receive(&self) -> Option<(SlotAssignment, u64)> {
        self.receive
            .get(self.rx_cursor.index)
            .map(|entry| (entry.assignment, self.rx_cursor.iteration))
    }

    /// Take the payload of the transmit buffer under the cursor, leaving
    /// the buffer invalid. `None` if the application wrote nothing new.
    pub fn take_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmit
            .get_mut(self.tx_cursor.index)
            .and_then(SlotEntry::take)
    }

    /// Store a received payload in the receive buffer under the cursor.
    pub fn deliver(&mut self, payload: &[u8]) {
        if let Some(entry) = self.receive.get_mut(self.rx_cursor.index) {
            entry.store(payload);
        }
    }

    /// Move the transmit cursor to the next assignment.
    pub fn advance_transmit(&mut self) {
        self.tx_cursor.advance(self.transmit.len());
    }

    /// Move the receive cursor to the next assignment.
    pub fn advance_receive(&mut self) {
        self.rx_cursor.advance(self.receive.len());
    }

    /// Whether any receive assignment covers (`channel`, `cycle`, `slot_id`).
    pub fn subscribes(&self, channel: FlexRayChannel, cycle: u8, slot_id: u16) -> bool {
        self.receive
            .iter()
            .any(|entry| entry.assignment.matches(channel, cycle, slot_id))
    }

    /// Whether (`cycle`, `slot_id`) lies before the receive assignment under
    /// the cursor, so a frame for it can no longer be received this
    /// iteration.
    pub fn receive_passed(&self, cycle: u8, slot_id: u16) -> bool {
        self.receive.get(self.rx_cursor.index).is_some_and(|entry| {
            (cycle, slot_id) < (entry.assignment.cycle, entry.assignment.slot_id)
        })
    }

    /// Start of the first pending transmit slot strictly after `now_ns`.
    ///
    /// Starts at the cursor and walks forward through the list, wrapping
    /// into the next iteration, without moving the cursor itself.
    pub fn next_transmit_time_ns(
        &self,
        config: &ClusterConfig,
        start_ns: u64,
        now_ns: u64,
    ) -> Option<u64> {
        if self.transmit.is_empty() {
            return None;
        }

        let mut cursor = self.tx_cursor;
        loop {
            let assignment = self.transmit[cursor.index].assignment;
            let (start_mt, _) =
                config.slot_boundaries_mt(cursor.iteration, assignment.cycle, assignment.slot_id);
            let time = config.mt_to_ns(start_ns, start_mt);
            if time > now_ns {
                return Some(time);
            }
            cursor.advance(self.transmit.len());
        }
    }
}
