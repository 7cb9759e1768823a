//! Co-simulation integration test module
//!
//! These tests drive the bus and node models through the host stepping
//! contract the way a co-simulation master does:
//! - `flexray_cluster`: two FlexRay nodes coldstarting and exchanging data over a bus
//! - `can_arbitration`: CAN arbitration, arbitration lost policies, bus errors and a
//!   triggered CAN node
//! - `lifecycle`: instance state machine, clock rules and configuration loading

mod can_arbitration;
mod flexray_cluster;
mod lifecycle;

// Shared test utilities
use flexray_sim::flexray::node::vr;
use flexray_sim::flexray::{FlexRayBus, FlexRayNode};
use flexray_sim::port::PortVariable;
use flexray_sim::types::{ClockType, IntervalFraction, IntervalQualifier, NANOS_PER_SECOND, ns_to_time};
use flexray_sim::{Instance, Result};

/// Longest time the host advances without an event.
pub const MAX_STEP_NS: u64 = 1_000_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Update the host's view of a countdown clock after an interval query.
pub fn track(next: &mut Option<u64>, now_ns: u64, fraction: IntervalFraction) {
    match fraction.qualifier {
        IntervalQualifier::Changed if fraction.resolution > 0 => {
            *next = Some(now_ns + fraction.counter * NANOS_PER_SECOND / fraction.resolution);
        }
        IntervalQualifier::Changed | IntervalQualifier::NotYetKnown => *next = None,
        IntervalQualifier::Unchanged => {}
    }
}

/// Two demo FlexRay nodes connected through a bus, driven like a host
/// with countdown clocks would drive them.
pub struct FlexRayCluster {
    pub bus: Instance<FlexRayBus>,
    pub nodes: Vec<Instance<FlexRayNode>>,
    node_next: Vec<Option<u64>>,
    bus_next: Vec<Option<u64>>,
    now_ns: u64,
}

impl FlexRayCluster {
    pub fn new(bus: FlexRayBus) -> Self {
        let nodes = vec![
            Instance::new("node1", FlexRayNode::new(ClockType::Countdown)),
            Instance::new(
                "node2",
                FlexRayNode::new(ClockType::Countdown).with_second_node(true),
            ),
        ];
        let count = nodes.len();
        Self {
            bus: Instance::new("bus", bus),
            nodes,
            node_next: vec![None; count],
            bus_next: vec![None; count],
            now_ns: 0,
        }
    }

    /// Initialize every instance and handle the events at time zero.
    pub fn start(&mut self) -> Result<()> {
        self.bus.enter_initialization_mode()?;
        self.bus.exit_initialization_mode()?;
        for node in &mut self.nodes {
            node.enter_initialization_mode()?;
            node.exit_initialization_mode()?;
        }
        self.handle_events()?;
        self.enter_step_mode()
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    pub fn node(&self, index: usize) -> &FlexRayNode {
        self.nodes[index].model()
    }

    /// Step all instances to the next event until `end_ns`.
    pub fn run_until(&mut self, end_ns: u64) -> Result<()> {
        while self.now_ns < end_ns {
            let next = self
                .node_next
                .iter()
                .chain(self.bus_next.iter())
                .flatten()
                .copied()
                .filter(|&t| t > self.now_ns)
                .fold(self.now_ns + MAX_STEP_NS, u64::min)
                .min(end_ns);

            let current = ns_to_time(self.now_ns);
            let step = ns_to_time(next) - current;
            self.bus.do_step(current, step)?;
            for node in &mut self.nodes {
                node.do_step(current, step)?;
            }
            self.now_ns = next;

            self.bus.enter_event_mode()?;
            for node in &mut self.nodes {
                node.enter_event_mode()?;
            }
            self.handle_events()?;
            self.enter_step_mode()?;
        }
        Ok(())
    }

    fn enter_step_mode(&mut self) -> Result<()> {
        self.bus.enter_step_mode()?;
        for node in &mut self.nodes {
            node.enter_step_mode()?;
        }
        Ok(())
    }

    fn refresh_intervals(&mut self) -> Result<()> {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let fraction = node.get_interval_fraction(vr::TX_CLOCK)?;
            track(&mut self.node_next[index], self.now_ns, fraction);
        }
        for index in 0..self.nodes.len() {
            let fraction = self
                .bus
                .get_interval_fraction(PortVariable::TxClock.vr(index as u32))?;
            track(&mut self.bus_next[index], self.now_ns, fraction);
        }
        Ok(())
    }

    fn is_due(next: Option<u64>, now_ns: u64) -> bool {
        next.is_some_and(|t| t <= now_ns)
    }

    /// Tick every clock due now, repeating until no clock is due.
    fn handle_events(&mut self) -> Result<()> {
        loop {
            self.refresh_intervals()?;
            let mut ticked = false;

            for index in 0..self.nodes.len() {
                if !Self::is_due(self.node_next[index], self.now_ns) {
                    continue;
                }
                ticked = true;
                self.node_next[index] = None;

                let node = &mut self.nodes[index];
                node.set_clock(vr::TX_CLOCK, true)?;
                let bytes = node.get_binary(vr::TX_DATA)?;
                node.update_discrete_states()?;

                let terminal = index as u32;
                self.bus.set_binary(PortVariable::RxData.vr(terminal), &bytes)?;
                self.bus.set_clock(PortVariable::RxClock.vr(terminal), true)?;
                self.bus.evaluate_discrete_states()?;
                self.bus.update_discrete_states()?;
            }

            for index in 0..self.nodes.len() {
                if !Self::is_due(self.bus_next[index], self.now_ns) {
                    continue;
                }
                ticked = true;
                self.bus_next[index] = None;

                let terminal = index as u32;
                self.bus.set_clock(PortVariable::TxClock.vr(terminal), true)?;
                let bytes = self.bus.get_binary(PortVariable::TxData.vr(terminal))?;
                self.bus.update_discrete_states()?;

                let node = &mut self.nodes[index];
                node.set_binary(vr::RX_DATA, &bytes)?;
                node.set_clock(vr::RX_CLOCK, true)?;
                node.evaluate_discrete_states()?;
                node.update_discrete_states()?;
            }

            if !ticked {
                return Ok(());
            }
        }
    }
}
