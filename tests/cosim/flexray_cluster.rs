//! Two-node FlexRay cluster tests
//!
//! Runs the demo cluster through coldstart and data exchange.

use crate::{FlexRayCluster, init_logging};
use flexray_sim::flexray::{FlexRayBus, StartupPhase};
use flexray_sim::BusModel;

const MS: u64 = 1_000_000;

fn started_cluster(bus: FlexRayBus) -> FlexRayCluster {
    init_logging();
    let mut cluster = FlexRayCluster::new(bus);
    cluster.start().unwrap();
    cluster
}

#[test]
fn test_first_cas_silences_second_node() {
    let mut cluster = started_cluster(FlexRayBus::new(2));
    assert!(cluster.bus.model().cluster_config().is_some());

    cluster.run_until(11 * MS).unwrap();
    assert_eq!(cluster.node(0).phase(), StartupPhase::WaitStartComm);
    assert_eq!(cluster.node(1).phase(), StartupPhase::ListenPassive);
    assert_eq!(cluster.bus.model().start_time_ns(), None);
}

#[test]
fn test_start_time_shared_by_all() {
    let mut cluster = started_cluster(FlexRayBus::new(2));
    cluster.run_until(12 * MS + MS / 2).unwrap();

    assert_eq!(cluster.node(0).phase(), StartupPhase::CollisionResolution);
    assert_eq!(
        cluster.node(1).phase(),
        StartupPhase::IntegrationColdstartCheck
    );
    assert_eq!(cluster.bus.model().start_time_ns(), Some(12 * MS));
    assert_eq!(cluster.node(0).startup().start_time_ns(), 12 * MS);
    assert_eq!(cluster.node(1).startup().start_time_ns(), 12 * MS);
}

#[test]
fn test_startup_completes_and_data_flows() {
    let mut cluster = started_cluster(FlexRayBus::new(2));
    cluster.run_until(40 * MS).unwrap();
    assert_eq!(cluster.now_ns(), 40 * MS);

    for index in 0..2 {
        assert_eq!(cluster.node(index).phase(), StartupPhase::Complete);
    }

    // Each node only ever reads values the other one already wrote.
    for (reader, writer) in [(0, 1), (1, 0)] {
        let app = cluster.node(reader).application();
        let sent = cluster.node(writer).application().tx_counter();
        assert!(app.received_count() > 0, "node {} received nothing", reader);
        assert!(app.last_received().is_some_and(|value| value < sent));
    }
}

#[test]
fn test_bus_errors_stall_startup() {
    let mut cluster = started_cluster(FlexRayBus::new(2).with_error_probability(1.0));
    cluster.run_until(40 * MS).unwrap();

    // The leader only ever counts its own startup frames, the follower none.
    assert_eq!(cluster.node(0).phase(), StartupPhase::ConsistencyCheck);
    assert_eq!(
        cluster.node(1).phase(),
        StartupPhase::IntegrationColdstartCheck
    );
    assert_eq!(cluster.node(0).application().received_count(), 0);
    assert_eq!(cluster.node(1).application().received_count(), 0);
}

#[test]
fn test_same_seed_reproduces_run() {
    let run = |seed| {
        let bus = FlexRayBus::new(2).with_seed(seed).with_error_probability(0.2);
        let mut cluster = started_cluster(bus);
        cluster.run_until(30 * MS).unwrap();
        (
            cluster.node(0).phase(),
            cluster.node(1).phase(),
            cluster.node(0).application().last_received(),
            cluster.node(1).application().received_count(),
        )
    };
    assert_eq!(run(7), run(7));
}

#[test]
fn test_bus_flags_always_set() {
    let mut cluster = started_cluster(FlexRayBus::new(2));
    for vr in 10..14 {
        assert!(cluster.bus.get_boolean(vr).unwrap());
    }
    assert!(cluster.bus.model_mut().get_boolean(14).is_err());
}
