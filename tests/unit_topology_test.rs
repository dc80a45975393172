// tests/unit_topology_test.rs

mod common;

use common::*;
use opal_meta::core::errors::{ErrCode, MetaError};
use opal_meta::core::types::{InstanceState, TopologyOp};

fn add_logical(cluster: &TestCluster, rooms: &[&str]) -> Result<(), MetaError> {
    cluster.manager.submit(TopologyOp::AddLogical {
        rooms: rooms.iter().map(|r| r.to_string()).collect(),
    })
}

fn drop_logical(cluster: &TestCluster, rooms: &[&str]) -> Result<(), MetaError> {
    cluster.manager.submit(TopologyOp::DropLogical {
        rooms: rooms.iter().map(|r| r.to_string()).collect(),
    })
}

fn add_physical(cluster: &TestCluster, logical: &str, rooms: &[&str]) -> Result<(), MetaError> {
    cluster.manager.submit(TopologyOp::AddPhysical {
        logical_room: logical.to_string(),
        rooms: rooms.iter().map(|r| r.to_string()).collect(),
    })
}

#[test]
fn test_add_then_drop_logical_room() {
    let cluster = cluster();
    add_logical(&cluster, &["L1"]).unwrap();
    assert!(cluster.manager.logical_rooms().contains_key("L1"));

    drop_logical(&cluster, &["L1"]).unwrap();
    assert!(!cluster.manager.logical_rooms().contains_key("L1"));

    // A reload sees no trace of L1 either.
    let reopened = reopen(&cluster);
    assert!(!reopened.manager.logical_rooms().contains_key("L1"));

    // Dropping again is an input error.
    let err = drop_logical(&cluster, &["L1"]).unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);
}

#[test]
fn test_add_logical_duplicate_rejected() {
    let cluster = cluster();
    add_logical(&cluster, &["L1"]).unwrap();
    let err = add_logical(&cluster, &["L1"]).unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);
}

#[test]
fn test_validate_rejects_empty_operands() {
    let cluster = cluster();
    let err = cluster
        .manager
        .submit(TopologyOp::AddLogical { rooms: vec![] })
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);
    let err = cluster
        .manager
        .submit(TopologyOp::UpdateInstanceParam { params: vec![] })
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);
}

#[test]
fn test_physical_room_lifecycle() {
    let cluster = cluster();
    add_logical(&cluster, &["L1"]).unwrap();

    // Unknown parent is rejected.
    let err = add_physical(&cluster, "L9", &["P1"]).unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);

    add_physical(&cluster, "L1", &["P1", "P2"]).unwrap();
    let expected: std::collections::BTreeSet<String> =
        ["P1", "P2"].iter().map(|s| s.to_string()).collect();
    assert_eq!(cluster.manager.logical_rooms()["L1"], expected);

    // Duplicate physical name anywhere is rejected.
    add_logical(&cluster, &["L2"]).unwrap();
    let err = add_physical(&cluster, "L2", &["P1"]).unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);

    // A logical room with physicals cannot be dropped.
    let err = drop_logical(&cluster, &["L1"]).unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);

    cluster
        .manager
        .submit(TopologyOp::DropPhysical {
            logical_room: "L1".to_string(),
            rooms: vec!["P1".to_string(), "P2".to_string()],
        })
        .unwrap();
    drop_logical(&cluster, &["L1"]).unwrap();
}

#[test]
fn test_drop_physical_with_instances_rejected() {
    let cluster = cluster();
    add_logical(&cluster, &["L1"]).unwrap();
    add_physical(&cluster, "L1", &["P1"]).unwrap();
    cluster
        .manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.1.1:8010",
            "t",
            "P1",
        )))
        .unwrap();

    let err = cluster
        .manager
        .submit(TopologyOp::DropPhysical {
            logical_room: "L1".to_string(),
            rooms: vec!["P1".to_string()],
        })
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);

    cluster
        .manager
        .submit(TopologyOp::DropInstance {
            address: "10.1.1.1:8010".to_string(),
        })
        .unwrap();
    cluster
        .manager
        .submit(TopologyOp::DropPhysical {
            logical_room: "L1".to_string(),
            rooms: vec!["P1".to_string()],
        })
        .unwrap();
}

#[test]
fn test_move_physical_reparents_room_and_instances() {
    let cluster = cluster();
    add_logical(&cluster, &["L1", "L2"]).unwrap();
    add_physical(&cluster, "L1", &["P1"]).unwrap();
    add_physical(&cluster, "L2", &["P2"]).unwrap();
    cluster
        .manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.1.1:8010",
            "t",
            "P1",
        )))
        .unwrap();

    cluster
        .manager
        .submit(TopologyOp::MovePhysical {
            physical_room: "P1".to_string(),
            old_logical_room: "L1".to_string(),
            new_logical_room: "L2".to_string(),
        })
        .unwrap();

    let rooms = cluster.manager.logical_rooms();
    assert!(rooms["L1"].is_empty());
    assert_eq!(rooms["L2"].len(), 2);
    assert!(rooms["L2"].contains("P1") && rooms["L2"].contains("P2"));

    // The hosted instance follows its room's new parent.
    let record = cluster.manager.instance_record("10.1.1.1:8010").unwrap();
    assert_eq!(record.logical_room, "L2");

    // Moving from the wrong old parent is rejected.
    let err = cluster
        .manager
        .submit(TopologyOp::MovePhysical {
            physical_room: "P1".to_string(),
            old_logical_room: "L1".to_string(),
            new_logical_room: "L2".to_string(),
        })
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);

    // Both records land durably: a reload agrees.
    let reopened = reopen(&cluster);
    let rooms = reopened.manager.logical_rooms();
    assert!(rooms["L1"].is_empty());
    assert!(rooms["L2"].contains("P1"));
    assert_eq!(
        reopened
            .manager
            .instance_record("10.1.1.1:8010")
            .unwrap()
            .logical_room,
        "L2"
    );
}

#[test]
fn test_add_instance_validations() {
    let cluster = cluster();
    // Unknown physical room.
    let err = cluster
        .manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.1.1:8010",
            "t",
            "nowhere",
        )))
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);

    // Empty room with no resolver configured.
    let err = cluster
        .manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.1.1:8010",
            "t",
            "",
        )))
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InternalError);

    add_instances(&cluster, "t", &["10.1.1.1:8010"]);
    // Duplicate address.
    let err = cluster
        .manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.1.1:8010",
            "t",
            "default",
        )))
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);
}

#[test]
fn test_drop_instance_is_idempotent() {
    let cluster = cluster();
    cluster
        .manager
        .submit(TopologyOp::DropInstance {
            address: "10.9.9.9:8010".to_string(),
        })
        .unwrap();
}

#[test]
fn test_update_instance_preserves_state_and_room() {
    let cluster = cluster();
    add_logical(&cluster, &["L1"]).unwrap();
    add_physical(&cluster, "L1", &["P1"]).unwrap();
    add_instances(&cluster, "t", &["10.1.1.1:8010"]);
    cluster
        .manager
        .set_instance_status("10.1.1.1:8010", InstanceState::Migrate)
        .unwrap();

    // The update asks for a different room; it must not stick.
    let mut update = instance_info("10.1.1.1:8010", "t2", "P1");
    update.capacity = 200_000;
    cluster
        .manager
        .submit(TopologyOp::UpdateInstance(update))
        .unwrap();

    let record = cluster.manager.instance_record("10.1.1.1:8010").unwrap();
    assert_eq!(record.physical_room, "default");
    assert_eq!(record.resource_tag, "t2");
    assert_eq!(record.capacity, 200_000);
    assert_eq!(
        cluster.manager.instance_state("10.1.1.1:8010"),
        Some(InstanceState::Migrate)
    );

    // Updating an unknown instance is an input error.
    let err = cluster
        .manager
        .submit(TopologyOp::UpdateInstance(instance_info(
            "10.9.9.9:8010",
            "t",
            "",
        )))
        .unwrap_err();
    assert_eq!(err.code(), ErrCode::InputParamError);
}

#[test]
fn test_resource_tag_change_moves_indexes() {
    let cluster = cluster();
    add_instances(&cluster, "old", &["10.1.1.1:8010", "10.1.1.2:8010"]);
    cluster
        .manager
        .submit(TopologyOp::UpdateInstance(instance_info(
            "10.1.1.1:8010",
            "new",
            "",
        )))
        .unwrap();

    let old_segments = cluster.manager.segments_of("old");
    let old_members: Vec<&String> = old_segments.iter().flat_map(|(_, v)| v).collect();
    assert_eq!(old_members, ["10.1.1.2:8010"]);

    let new_segments = cluster.manager.segments_of("new");
    let new_members: Vec<&String> = new_segments.iter().flat_map(|(_, v)| v).collect();
    assert_eq!(new_members, ["10.1.1.1:8010"]);
}

#[test]
fn test_submit_on_follower_rejected() {
    let cluster = cluster();
    cluster.switches.set_leader(false);
    let err = add_logical(&cluster, &["L1"]).unwrap_err();
    assert_eq!(err.code(), ErrCode::NotLeader);
    assert!(matches!(err, MetaError::NotLeader { .. }));
    // Nothing changed, nothing persisted.
    cluster.switches.set_leader(true);
    assert!(!cluster.manager.logical_rooms().contains_key("L1"));
    assert!(!reopen(&cluster).manager.logical_rooms().contains_key("L1"));
}

#[test]
fn test_reload_rebuilds_identical_maps() {
    let cluster = cluster();
    add_logical(&cluster, &["L1", "L2"]).unwrap();
    add_physical(&cluster, "L1", &["P1"]).unwrap();
    add_physical(&cluster, "L2", &["P2", "P3"]).unwrap();
    cluster
        .manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.1.1:8010",
            "t",
            "P1",
        )))
        .unwrap();
    cluster
        .manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.2.1:8010",
            "t",
            "P2",
        )))
        .unwrap();
    cluster
        .manager
        .submit(TopologyOp::MovePhysical {
            physical_room: "P1".to_string(),
            old_logical_room: "L1".to_string(),
            new_logical_room: "L2".to_string(),
        })
        .unwrap();

    let reopened = reopen(&cluster);
    assert_eq!(
        cluster.manager.logical_rooms(),
        reopened.manager.logical_rooms()
    );
    assert_eq!(
        cluster.manager.topology_snapshot(),
        reopened.manager.topology_snapshot()
    );
    for address in ["10.1.1.1:8010", "10.1.2.1:8010"] {
        assert_eq!(
            cluster.manager.instance_record(address),
            reopened.manager.instance_record(address)
        );
        // Health state is not persisted: everything comes back NORMAL.
        assert_eq!(
            reopened.manager.instance_state(address),
            Some(InstanceState::Normal)
        );
    }
    // Derived segment indexes are rebuilt identically.
    assert_eq!(
        cluster.manager.segments_of("t"),
        reopened.manager.segments_of("t")
    );
}

#[test]
fn test_add_instance_resolves_room_via_mapping() {
    use opal_meta::ClusterManager;
    use opal_meta::config::MetaConfig;
    use opal_meta::core::fsm::StaticSwitches;
    use opal_meta::core::metastore::MemoryMetaStore;
    use opal_meta::core::topology::HostRoomMapping;
    use std::sync::Arc;

    struct FixedMapping;
    impl HostRoomMapping for FixedMapping {
        fn physical_room_of(&self, _address: &str) -> Option<String> {
            Some("default".to_string())
        }
    }

    let manager = ClusterManager::new(
        MetaConfig::default(),
        Arc::new(MemoryMetaStore::new()),
        Arc::new(StaticSwitches::leader()),
        Arc::new(RecordingRegionManager::default()),
        Arc::new(StaticTableManager::default()),
    )
    .with_room_mapping(Arc::new(FixedMapping));
    manager.load_snapshot().unwrap();

    manager
        .submit(TopologyOp::AddInstance(instance_info(
            "10.1.1.1:8010",
            "t",
            "",
        )))
        .unwrap();
    let record = manager.instance_record("10.1.1.1:8010").unwrap();
    assert_eq!(record.physical_room, "default");
    assert_eq!(record.logical_room, "default");
}

#[test]
fn test_empty_deployment_has_default_rooms() {
    let cluster = cluster();
    let rooms = cluster.manager.logical_rooms();
    assert!(rooms["default"].contains("default"));
    // The default rooms are usable without any operator setup.
    add_instances(&cluster, "t", &["10.1.1.1:8010"]);
    assert_eq!(
        cluster.manager.instance_record("10.1.1.1:8010").unwrap().logical_room,
        "default"
    );
}
