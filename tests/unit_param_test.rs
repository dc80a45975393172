// tests/unit_param_test.rs

mod common;

use common::*;
use opal_meta::core::types::{InstanceParam, ParamDesc, TopologyOp};

fn param(key: &str, value: &str, is_meta_param: bool) -> ParamDesc {
    ParamDesc {
        key: key.to_string(),
        value: value.to_string(),
        is_meta_param,
    }
}

fn set_params(cluster: &TestCluster, scope: &str, params: Vec<ParamDesc>) {
    cluster
        .manager
        .submit(TopologyOp::UpdateInstanceParam {
            params: vec![InstanceParam {
                resource_tag_or_address: scope.to_string(),
                params,
            }],
        })
        .unwrap();
}

#[test]
fn test_update_merges_by_key() {
    let cluster = cluster();
    set_params(
        &cluster,
        "tag-a",
        vec![param("rocksdb_block_cache", "8G", false), param("slow_query_ms", "100", false)],
    );
    set_params(
        &cluster,
        "tag-a",
        vec![param("slow_query_ms", "250", false), param("compaction_threads", "4", false)],
    );

    let applying = cluster.manager.params_for_store("10.1.1.1:8010", "tag-a");
    assert_eq!(applying.len(), 1);
    let merged = &applying[0].params;
    assert_eq!(merged.len(), 3);
    let value_of = |key: &str| {
        merged
            .iter()
            .find(|desc| desc.key == key)
            .map(|desc| desc.value.clone())
    };
    // Overwritten, preserved, and added entries all survive the merge.
    assert_eq!(value_of("slow_query_ms").as_deref(), Some("250"));
    assert_eq!(value_of("rocksdb_block_cache").as_deref(), Some("8G"));
    assert_eq!(value_of("compaction_threads").as_deref(), Some("4"));
}

#[test]
fn test_tag_scope_precedes_address_scope() {
    let cluster = cluster();
    set_params(&cluster, "tag-a", vec![param("slow_query_ms", "100", false)]);
    set_params(
        &cluster,
        "10.1.1.1:8010",
        vec![param("slow_query_ms", "50", false)],
    );

    let applying = cluster.manager.params_for_store("10.1.1.1:8010", "tag-a");
    assert_eq!(applying.len(), 2);
    assert_eq!(applying[0].resource_tag_or_address, "tag-a");
    assert_eq!(applying[1].resource_tag_or_address, "10.1.1.1:8010");

    // A store of another tag only sees its own address scope, if any.
    let applying = cluster.manager.params_for_store("10.1.1.2:8010", "tag-b");
    assert!(applying.is_empty());
}

#[test]
fn test_params_survive_reload() {
    let cluster = cluster();
    set_params(
        &cluster,
        "tag-a",
        vec![param("migrate_concurrency", "1", true)],
    );
    let reopened = reopen(&cluster);
    let applying = reopened.manager.params_for_store("x", "tag-a");
    assert_eq!(applying.len(), 1);
    assert_eq!(applying[0].params[0].key, "migrate_concurrency");
    assert!(applying[0].params[0].is_meta_param);
}
