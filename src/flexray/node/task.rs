//! Application tasks running on a node.

use log::{info, warn};

use super::slot_table::SlotTable;

/// Period of the node's application tasks in nanoseconds.
pub const TASK_INTERVAL_NS: u64 = 1_000_000;

/// A task that becomes due at a fixed period.
///
/// A late task runs once and is rescheduled one period after its previous
/// due time; missed activations are not replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTask {
    next_run_ns: u64,
    interval_ns: u64,
}

impl PeriodicTask {
    /// A task first due after one `interval_ns`.
    pub fn new(interval_ns: u64) -> Self {
        Self {
            next_run_ns: interval_ns,
            interval_ns,
        }
    }

    /// Time at which the task is next due.
    pub fn next_run_ns(&self) -> u64 {
        self.next_run_ns
    }

    /// Whether the task is due at `now_ns`. Reschedules the task if it is.
    pub fn poll(&mut self, now_ns: u64) -> bool {
        if now_ns < self.next_run_ns {
            return false;
        }
        self.next_run_ns += self.interval_ns;
        true
    }
}

/// The demo application: sends a running counter and keeps the last value
/// the other node sent.
///
/// The transmit task writes the counter into transmit buffers 0 and 1, the
/// receive task reads receive buffers 0 and 1.
#[derive(Debug, Clone)]
pub struct CounterApplication {
    tx_task: PeriodicTask,
    rx_task: PeriodicTask,
    tx_counter: u8,
    last_received: Option<u8>,
    received_count: u64,
}

impl CounterApplication {
    /// Buffers the application writes and reads.
    const BUFFERS: [usize; 2] = [0, 1];

    /// Create the application with both tasks first due after one period.
    pub fn new() -> Self {
        Self {
            tx_task: PeriodicTask::new(TASK_INTERVAL_NS),
            rx_task: PeriodicTask::new(TASK_INTERVAL_NS),
            tx_counter: 0,
            last_received: None,
            received_count: 0,
        }
    }

    /// Run the tasks due at `now_ns`.
    pub fn run(&mut self, now_ns: u64, table: &mut SlotTable) {
        if self.tx_task.poll(now_ns) {
            for index in Self::BUFFERS {
                match table.write_transmit(index, &[self.tx_counter]) {
                    Ok(()) => info!("Wrote {} to buffer {}", self.tx_counter, index),
                    Err(e) => warn!("Cannot write buffer {}: {}", index, e),
                }
            }
            self.tx_counter = self.tx_counter.wrapping_add(1);
        }

        if self.rx_task.poll(now_ns) {
            for index in Self::BUFFERS {
                if let Some(data) = table.take_received(index) {
                    match data.first() {
                        Some(&value) => {
                            info!("Read {} from buffer {}", value, index);
                            self.last_received = Some(value);
                            self.received_count += 1;
                        }
                        None => info!("Read empty frame from buffer {}", index),
                    }
                }
            }
        }
    }

    /// The counter value the next transmit task will write.
    pub fn tx_counter(&self) -> u8 {
        self.tx_counter
    }

    /// The most recent counter value read from a receive buffer.
    pub fn last_received(&self) -> Option<u8> {
        self.last_received
    }

    /// Number of counter values read so far.
    pub fn received_count(&self) -> u64 {
        self.received_count
    }
}

impl Default for CounterApplication {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_task() {
        let mut task = PeriodicTask::new(1_000);
        assert!(!task.poll(999));
        assert!(task.poll(1_000));
        assert!(!task.poll(1_500));
        // Late by several periods: runs once, next due one period later.
        assert!(task.poll(5_000));
        assert_eq!(task.next_run_ns(), 3_000);
    }

    #[test]
    fn test_counter_written_and_read() {
        let mut app = CounterApplication::new();
        let mut table = SlotTable::demo(true);

        app.run(0, &mut table);
        assert_eq!(table.take_transmit(), None);

        app.run(TASK_INTERVAL_NS, &mut table);
        assert_eq!(app.tx_counter(), 1);
        assert_eq!(table.take_transmit(), Some(vec![0]));

        table.deliver(&[42]);
        app.run(2 * TASK_INTERVAL_NS, &mut table);
        assert_eq!(app.last_received(), Some(42));
        assert_eq!(app.received_count(), 1);
        assert_eq!(app.tx_counter(), 2);

        // Nothing new: the last value stays, the count does not move.
        app.run(3 * TASK_INTERVAL_NS, &mut table);
        assert_eq!(app.last_received(), Some(42));
        assert_eq!(app.received_count(), 1);

        table.deliver(&[43]);
        app.run(4 * TASK_INTERVAL_NS, &mut table);
        assert_eq!(app.last_received(), Some(43));
        assert_eq!(app.received_count(), 2);
    }
}
