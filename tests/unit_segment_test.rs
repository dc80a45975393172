// tests/unit_segment_test.rs

mod common;

use common::*;
use opal_meta::config::MetaConfig;
use opal_meta::core::types::TopologyOp;

#[test]
fn test_one_subnet_steps_deep_into_host_bits() {
    // 30 stores in one /24: every prefix up to /30 leaves either too few
    // segments or an over-full one, so the engine steps into the host bits
    // until both constraints hold.
    let cluster = cluster();
    let addresses: Vec<String> = (1..=30).map(|i| format!("10.0.0.{i}:8010")).collect();
    for address in &addresses {
        cluster
            .manager
            .submit(TopologyOp::AddInstance(instance_info(address, "t", "default")))
            .unwrap();
    }
    // /31 is the first prefix with >= 10 segments and <= ceil(30 * 20%) = 6
    // stores in any one of them.
    assert_eq!(cluster.manager.network_prefix_of("t"), Some(31));
    let segments = cluster.manager.segments_of("t");
    assert!(segments.len() >= 10);
    assert!(segments.iter().all(|(_, stores)| stores.len() <= 6));
    let members: usize = segments.iter().map(|(_, stores)| stores.len()).sum();
    assert_eq!(members, 30);
}

#[test]
fn test_spread_subnets_settle_at_24() {
    // Ten /24 subnets with three hosts each: at p=24 there are ten distinct
    // segments and no segment exceeds ceil(30 * 20%) = 6 stores.
    let cluster = cluster();
    for subnet in 1..=10 {
        for host in 1..=3 {
            cluster
                .manager
                .submit(TopologyOp::AddInstance(instance_info(
                    &format!("10.0.{subnet}.{host}:8010"),
                    "t",
                    "default",
                )))
                .unwrap();
        }
    }
    assert_eq!(cluster.manager.network_prefix_of("t"), Some(24));
    let segments = cluster.manager.segments_of("t");
    assert_eq!(segments.len(), 10);
    assert!(segments.iter().all(|(_, stores)| stores.len() == 3));
}

#[test]
fn test_min_segments_or_full_prefix() {
    // Too few stores to ever reach ten segments: the engine must land on
    // p=32 rather than loop.
    let cluster = cluster();
    add_instances(&cluster, "t", &["10.0.0.1:8010", "10.0.0.2:8010"]);
    assert_eq!(cluster.manager.network_prefix_of("t"), Some(32));
}

#[test]
fn test_operator_override_wins() {
    let mut config = MetaConfig::default();
    config.min_network_segments_per_resource_tag = 2;
    config.network_segment_max_stores_percent = 100;
    let cluster = cluster_with(config, StaticTableManager::default());

    let mut pinned = instance_info("10.0.1.1:8010", "t", "default");
    pinned.network_segment = "rack-7".to_string();
    cluster
        .manager
        .submit(TopologyOp::AddInstance(pinned))
        .unwrap();
    add_instances(&cluster, "t", &["10.0.2.1:8010"]);

    assert_eq!(
        cluster.manager.network_segment_of("10.0.1.1:8010").as_deref(),
        Some("rack-7")
    );
    let segments = cluster.manager.segments_of("t");
    assert!(segments.iter().any(|(label, stores)| {
        label == "rack-7" && stores == &["10.0.1.1:8010".to_string()]
    }));
}

#[test]
fn test_membership_change_rebuilds_index() {
    let cluster = cluster();
    add_instances(&cluster, "t", &["10.0.0.1:8010", "10.0.0.2:8010"]);
    cluster
        .manager
        .submit(TopologyOp::DropInstance {
            address: "10.0.0.1:8010".to_string(),
        })
        .unwrap();
    let members: Vec<String> = cluster
        .manager
        .segments_of("t")
        .into_iter()
        .flat_map(|(_, stores)| stores)
        .collect();
    assert_eq!(members, ["10.0.0.2:8010"]);

    // Dropping the last instance clears the tag's index entirely.
    cluster
        .manager
        .submit(TopologyOp::DropInstance {
            address: "10.0.0.2:8010".to_string(),
        })
        .unwrap();
    assert!(cluster.manager.segments_of("t").is_empty());
    assert_eq!(cluster.manager.network_prefix_of("t"), None);
}
