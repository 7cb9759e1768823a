//! Lifecycle and host contract tests
//!
//! Checks the instance state machine, clock type rules and cluster
//! configuration loading through the public API.

use crate::init_logging;
use flexray_sim::flexray::node::vr;
use flexray_sim::flexray::{ClusterConfig, FlexRayConfiguration, FlexRayNode, FlexRayOperation};
use flexray_sim::types::{ClockType, IntervalFraction, NANOS_PER_SECOND};
use flexray_sim::wire::OperationReader;
use flexray_sim::{Error, Instance, InstanceState, Result};

fn initialized(node: FlexRayNode) -> Instance<FlexRayNode> {
    init_logging();
    let mut instance = Instance::new("node", node);
    instance.enter_initialization_mode().unwrap();
    instance.exit_initialization_mode().unwrap();
    instance
}

#[test]
fn test_node_announces_configuration_after_initialization() {
    let mut node = initialized(FlexRayNode::new(ClockType::Countdown));
    assert_eq!(node.state(), InstanceState::EventMode);
    assert_eq!(
        node.get_interval_fraction(vr::TX_CLOCK).unwrap(),
        IntervalFraction::changed(0, NANOS_PER_SECOND)
    );

    node.set_clock(vr::TX_CLOCK, true).unwrap();
    let bytes = node.get_binary(vr::TX_DATA).unwrap();
    node.update_discrete_states().unwrap();

    let ops = OperationReader::<FlexRayOperation>::new(&bytes)
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert!(matches!(
        ops.as_slice(),
        [FlexRayOperation::Configuration(FlexRayConfiguration::Cluster { config, .. })]
            if *config == ClusterConfig::demo()
    ));

    // Next wakeup is the CAS of the first node.
    assert_eq!(
        node.get_interval_fraction(vr::TX_CLOCK).unwrap(),
        IntervalFraction::changed(10_000_000, NANOS_PER_SECOND)
    );
}

#[test]
fn test_step_outside_step_mode_terminates() {
    let mut node = initialized(FlexRayNode::new(ClockType::Countdown));
    let err = node.do_step(0.0, 0.001).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            function: "do_step",
            expected: "StepMode",
            actual: "EventMode"
        }
    ));
    assert_eq!(node.state(), InstanceState::Terminated);
    assert!(matches!(node.get_binary(vr::TX_DATA), Err(Error::Terminated)));
}

#[test]
fn test_terminate_from_any_state() {
    let mut fresh = Instance::new("fresh", FlexRayNode::new(ClockType::Countdown));
    fresh.terminate();
    assert_eq!(fresh.state(), InstanceState::Terminated);

    let mut stepping = initialized(FlexRayNode::new(ClockType::Countdown));
    stepping.enter_step_mode().unwrap();
    stepping.do_step(0.0, 0.001).unwrap();
    assert_eq!(stepping.time(), 0.001);
    stepping.terminate();
    assert!(matches!(stepping.do_step(0.001, 0.001), Err(Error::Terminated)));
}

#[test]
fn test_triggered_clock_is_raised_by_the_node() {
    let mut node = initialized(FlexRayNode::new(ClockType::Triggered));
    assert!(node.get_clock(vr::TX_CLOCK).unwrap());
    assert!(!node.get_clock(vr::TX_CLOCK).unwrap());
    assert!(!node.get_binary(vr::TX_DATA).unwrap().is_empty());
    node.update_discrete_states().unwrap();

    assert!(matches!(
        node.set_clock(vr::TX_CLOCK, true),
        Err(Error::InvalidCall {
            function: "set_clock",
            ..
        })
    ));
    assert_eq!(node.state(), InstanceState::Terminated);
}

#[test]
fn test_countdown_interval_only_for_countdown_clocks() {
    let mut node = initialized(FlexRayNode::new(ClockType::Periodic));
    assert!(matches!(
        node.get_interval_fraction(vr::TX_CLOCK),
        Err(Error::InvalidCall { .. })
    ));
    assert_eq!(node.state(), InstanceState::Terminated);
}

#[test]
fn test_parameters_set_during_initialization() {
    init_logging();
    let mut node = Instance::new("node2", FlexRayNode::new(ClockType::Countdown));
    node.enter_initialization_mode().unwrap();
    node.set_boolean(vr::IS_SECOND_NODE, true).unwrap();
    node.set_boolean(vr::BUS_NOTIFICATIONS, true).unwrap();
    node.exit_initialization_mode().unwrap();

    assert!(node.get_boolean(vr::IS_SECOND_NODE).unwrap());
    assert!(node.get_boolean(vr::BUS_NOTIFICATIONS).unwrap());
    assert!(node.model().is_second_node());

    // The second node's CAS is due later.
    assert_eq!(
        node.get_interval_fraction(vr::TX_CLOCK).unwrap(),
        IntervalFraction::changed(0, NANOS_PER_SECOND)
    );
    node.set_clock(vr::TX_CLOCK, true).unwrap();
    node.get_binary(vr::TX_DATA).unwrap();
    node.update_discrete_states().unwrap();
    assert_eq!(
        node.get_interval_fraction(vr::TX_CLOCK).unwrap(),
        IntervalFraction::changed(20_000_000, NANOS_PER_SECOND)
    );
}

#[test]
fn test_cluster_config_from_file() {
    let config = ClusterConfig {
        number_of_cycles: 4,
        ..ClusterConfig::demo()
    };
    let path = std::env::temp_dir().join("flexray_sim_cluster_config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let loaded = ClusterConfig::load_from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded, config);
    let node = FlexRayNode::new(ClockType::Countdown)
        .with_cluster_config(loaded)
        .unwrap();
    assert_eq!(node.cluster_config().number_of_cycles, 4);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_invalid_cluster_config_rejected() {
    let invalid = ClusterConfig {
        macroticks_per_cycle: 100,
        ..ClusterConfig::demo()
    };
    let json = serde_json::to_string(&invalid).unwrap();
    assert!(matches!(
        ClusterConfig::from_json(&json),
        Err(Error::InvalidClusterConfig(_))
    ));
    assert!(
        FlexRayNode::new(ClockType::Countdown)
            .with_cluster_config(invalid)
            .is_err()
    );
    assert!(matches!(
        ClusterConfig::from_json("{ not json"),
        Err(Error::Json(_))
    ));
    assert!(matches!(
        ClusterConfig::load_from_file("/nonexistent/cluster.json"),
        Err(Error::IOError(_))
    ));
}
