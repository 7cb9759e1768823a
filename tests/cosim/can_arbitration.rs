//! CAN bus arbitration tests
//!
//! The test plays the role of the CAN nodes: it encodes their operations,
//! hands them to the bus and waits for the transmit clocks like a host
//! would.

use crate::{init_logging, track};
use embedded_can::{ExtendedId, Frame, Id, StandardId};
use flexray_sim::can::bus::ERROR_PROBABILITY_VR;
use flexray_sim::can::node::{self, DEMO_PAYLOAD};
use flexray_sim::can::{
    ArbitrationLostBehavior, CanBus, CanConfiguration, CanErrorCode, CanErrorFlag, CanFrame,
    CanNode, CanOperation,
};
use flexray_sim::port::PortVariable;
use flexray_sim::types::ns_to_time;
use flexray_sim::wire::{Framed, OperationReader};
use flexray_sim::{Error, Instance, InstanceState, Result};

const BAUD_RATE: u32 = 500_000;

fn standard(id: u16, data: &[u8]) -> CanFrame {
    CanFrame::new(Id::Standard(StandardId::new(id).unwrap()), data).unwrap()
}

fn extended(id: u32, data: &[u8]) -> CanFrame {
    CanFrame::new(Id::Extended(ExtendedId::new(id).unwrap()), data).unwrap()
}

/// A CAN bus under host control with the nodes' side simulated by the test.
struct CanHarness {
    bus: Instance<CanBus>,
    next_tx_ns: Option<u64>,
    now_ns: u64,
}

impl CanHarness {
    fn new(bus: CanBus) -> Self {
        init_logging();
        let mut bus = Instance::new("can_bus", bus);
        bus.enter_initialization_mode().unwrap();
        bus.exit_initialization_mode().unwrap();
        Self {
            bus,
            next_tx_ns: None,
            now_ns: 0,
        }
    }

    /// Two nodes at the same baud rate with the given arbitration lost behavior.
    fn configured(behavior: ArbitrationLostBehavior) -> Self {
        let mut harness = Self::new(CanBus::new(2));
        for node in 0..2 {
            harness
                .send(
                    node,
                    &[
                        CanOperation::Configuration(CanConfiguration::CanBaudrate(BAUD_RATE)),
                        CanOperation::Configuration(CanConfiguration::ArbitrationLostBehavior(
                            behavior,
                        )),
                    ],
                )
                .unwrap();
        }
        harness
    }

    fn send(&mut self, node: u32, ops: &[CanOperation]) -> Result<()> {
        let mut bytes = Vec::new();
        for op in ops {
            op.encode_into(&mut bytes);
        }
        self.send_bytes(node, &bytes)
    }

    fn send_bytes(&mut self, node: u32, bytes: &[u8]) -> Result<()> {
        self.bus.set_binary(PortVariable::RxData.vr(node), bytes)?;
        self.bus.set_clock(PortVariable::RxClock.vr(node), true)?;
        self.bus.evaluate_discrete_states()?;
        self.bus.update_discrete_states()?;
        self.refresh()
    }

    fn refresh(&mut self) -> Result<()> {
        // Both TX clocks report the same interval.
        let first = self.bus.get_interval_fraction(PortVariable::TxClock.vr(0))?;
        let second = self.bus.get_interval_fraction(PortVariable::TxClock.vr(1))?;
        assert_eq!(first, second);
        track(&mut self.next_tx_ns, self.now_ns, first);
        Ok(())
    }

    /// Advance to the next transmission, tick both TX clocks and return
    /// what each node receives. `None` if no transmission is announced.
    fn transmit(&mut self) -> Result<Option<[Vec<CanOperation>; 2]>> {
        let Some(next) = self.next_tx_ns else {
            return Ok(None);
        };
        self.bus.enter_step_mode()?;
        let current = ns_to_time(self.now_ns);
        self.bus.do_step(current, ns_to_time(next) - current)?;
        self.bus.enter_event_mode()?;
        self.now_ns = next;

        self.bus.set_clock(PortVariable::TxClock.vr(0), true)?;
        self.bus.set_clock(PortVariable::TxClock.vr(1), true)?;
        let first = self.bus.get_binary(PortVariable::TxData.vr(0))?;
        let second = self.bus.get_binary(PortVariable::TxData.vr(1))?;
        self.bus.update_discrete_states()?;
        self.refresh()?;

        let decode = |bytes: &[u8]| {
            OperationReader::<CanOperation>::new(bytes)
                .collect::<Result<Vec<_>>>()
                .unwrap()
        };
        Ok(Some([decode(first.as_slice()), decode(second.as_slice())]))
    }
}

#[test]
fn test_lowest_id_wins_with_retransmit() {
    let mut harness = CanHarness::configured(ArbitrationLostBehavior::BufferAndRetransmit);
    harness
        .send(0, &[CanOperation::Transmit(standard(0x1, &[1, 2, 3, 4]))])
        .unwrap();
    harness
        .send(1, &[CanOperation::Transmit(standard(0x2, &[9]))])
        .unwrap();

    // 44 + 4 bits at 500 kbit/s.
    assert_eq!(harness.next_tx_ns, Some(96_000));
    let [to_first, to_second] = harness.transmit().unwrap().unwrap();
    assert_eq!(to_first, vec![CanOperation::Confirm { id: 0x1 }]);
    assert_eq!(
        to_second,
        vec![CanOperation::Transmit(standard(0x1, &[1, 2, 3, 4]))]
    );

    // The losing frame goes out next, 44 + 1 bits later.
    assert_eq!(harness.next_tx_ns, Some(96_000 + 90_000));
    let [to_first, to_second] = harness.transmit().unwrap().unwrap();
    assert_eq!(to_first, vec![CanOperation::Transmit(standard(0x2, &[9]))]);
    assert_eq!(to_second, vec![CanOperation::Confirm { id: 0x2 }]);

    assert_eq!(harness.next_tx_ns, None);
    assert!(harness.transmit().unwrap().is_none());
}

#[test]
fn test_lowest_id_wins_with_discard() {
    let mut harness = CanHarness::configured(ArbitrationLostBehavior::DiscardAndNotify);
    harness
        .send(0, &[CanOperation::Transmit(standard(0x1, &[1, 2, 3, 4]))])
        .unwrap();
    harness
        .send(
            1,
            &[
                CanOperation::Transmit(standard(0x2, &[9])),
                CanOperation::Transmit(standard(0x3, &[])),
            ],
        )
        .unwrap();

    let [to_first, to_second] = harness.transmit().unwrap().unwrap();
    assert_eq!(to_first, vec![CanOperation::Confirm { id: 0x1 }]);
    assert_eq!(
        to_second,
        vec![
            CanOperation::Transmit(standard(0x1, &[1, 2, 3, 4])),
            CanOperation::ArbitrationLost { id: 0x2 },
            CanOperation::ArbitrationLost { id: 0x3 },
        ]
    );
    assert_eq!(harness.bus.model().queued_frames(1), 0);
    assert_eq!(harness.next_tx_ns, None);
}

#[test]
fn test_extended_and_standard_ids_compete_numerically() {
    let mut harness = CanHarness::configured(ArbitrationLostBehavior::BufferAndRetransmit);
    harness
        .send(0, &[CanOperation::Transmit(standard(0x7FF, &[1]))])
        .unwrap();
    harness
        .send(1, &[CanOperation::Transmit(extended(0x10, &[2]))])
        .unwrap();

    let [to_first, to_second] = harness.transmit().unwrap().unwrap();
    assert_eq!(to_first, vec![CanOperation::Transmit(extended(0x10, &[2]))]);
    assert_eq!(to_second, vec![CanOperation::Confirm { id: 0x10 }]);
    assert!(matches!(&to_first[0], CanOperation::Transmit(f) if f.is_extended()));
}

#[test]
fn test_bus_error_probability_variable() {
    let mut harness = CanHarness::configured(ArbitrationLostBehavior::BufferAndRetransmit);
    harness.bus.set_float64(ERROR_PROBABILITY_VR, 1.0).unwrap();
    harness
        .send(1, &[CanOperation::Transmit(standard(0x42, &[0xAB]))])
        .unwrap();

    let [to_first, to_second] = harness.transmit().unwrap().unwrap();
    let error = |is_sender| CanOperation::BusError {
        id: 0x42,
        code: CanErrorCode::Crc,
        flag: CanErrorFlag::Primary,
        is_sender,
    };
    assert_eq!(to_first, vec![error(false)]);
    assert_eq!(to_second, vec![error(true)]);
}

#[test]
fn test_unconfigured_node_disables_bus() {
    let mut harness = CanHarness::new(CanBus::new(2));
    harness
        .send(
            0,
            &[
                CanOperation::Configuration(CanConfiguration::CanBaudrate(BAUD_RATE)),
                CanOperation::Transmit(standard(0x1, &[])),
            ],
        )
        .unwrap();
    assert_eq!(harness.bus.model().baud_rate(), 0);
    assert_eq!(harness.next_tx_ns, None);

    // Once the second node configures the same rate the frame is announced.
    harness
        .send(
            1,
            &[CanOperation::Configuration(CanConfiguration::CanBaudrate(BAUD_RATE))],
        )
        .unwrap();
    assert_eq!(harness.bus.model().baud_rate(), BAUD_RATE);
    assert_eq!(harness.next_tx_ns, Some(88_000));
}

#[test]
fn test_independent_tick_is_not_fatal() {
    let mut harness = CanHarness::configured(ArbitrationLostBehavior::BufferAndRetransmit);
    harness
        .send(0, &[CanOperation::Transmit(standard(0x1, &[]))])
        .unwrap();

    harness.bus.set_clock(PortVariable::TxClock.vr(1), true).unwrap();
    let bytes = harness.bus.get_binary(PortVariable::TxData.vr(1)).unwrap();
    harness.bus.update_discrete_states().unwrap();
    assert!(bytes.is_empty());
    assert_eq!(harness.bus.state(), InstanceState::EventMode);
    assert_eq!(harness.bus.model().queued_frames(0), 1);
}

#[test]
fn test_input_after_evaluation_terminates() {
    let mut harness = CanHarness::configured(ArbitrationLostBehavior::BufferAndRetransmit);
    harness.bus.evaluate_discrete_states().unwrap();
    let result = harness.bus.set_binary(PortVariable::RxData.vr(0), &[]);
    assert!(matches!(result, Err(Error::InvalidCall { .. })));
    assert_eq!(harness.bus.state(), InstanceState::Terminated);
    assert!(matches!(
        harness.bus.update_discrete_states(),
        Err(Error::Terminated)
    ));
}

#[test]
fn test_triggered_node_reaches_the_bus() {
    let mut harness = CanHarness::new(CanBus::new(2));
    let mut can_node = Instance::new("can_node", CanNode::demo().unwrap());
    can_node.enter_initialization_mode().unwrap();
    can_node.exit_initialization_mode().unwrap();

    // Hand whatever the node raised its clock for to terminal 0.
    let forward = |can_node: &mut Instance<CanNode>, harness: &mut CanHarness| {
        assert!(can_node.get_clock(node::vr::TX_CLOCK).unwrap());
        let bytes = can_node.get_binary(node::vr::TX_DATA).unwrap();
        can_node.update_discrete_states().unwrap();
        harness.send_bytes(0, &bytes).unwrap();
    };

    forward(&mut can_node, &mut harness);
    harness
        .send(
            1,
            &[CanOperation::Configuration(CanConfiguration::CanBaudrate(
                node::DEMO_BAUD_RATE,
            ))],
        )
        .unwrap();
    assert_eq!(harness.bus.model().baud_rate(), node::DEMO_BAUD_RATE);
    assert_eq!(harness.next_tx_ns, None);

    can_node.enter_step_mode().unwrap();
    assert!(can_node.do_step(0.0, 0.3).unwrap());
    can_node.enter_event_mode().unwrap();
    forward(&mut can_node, &mut harness);

    // 44 + 4 bits at 100 kbit/s.
    assert_eq!(harness.next_tx_ns, Some(480_000));
    let [to_node, to_other] = harness.transmit().unwrap().unwrap();
    assert_eq!(to_node, vec![CanOperation::Confirm { id: 0x1 }]);
    assert_eq!(to_other, vec![CanOperation::Transmit(standard(0x1, &DEMO_PAYLOAD))]);

    // The confirmation goes back to the node.
    let mut bytes = Vec::new();
    for op in &to_node {
        op.encode_into(&mut bytes);
    }
    can_node.set_binary(node::vr::RX_DATA, &bytes).unwrap();
    can_node.set_clock(node::vr::RX_CLOCK, true).unwrap();
    can_node.update_discrete_states().unwrap();
    assert_eq!(can_node.model().confirmations(), 1);
    assert_eq!(can_node.model().frames_sent(), 1);
}
