// tests/common/mod.rs

//! Shared fixtures: a recording region manager, a table manager with static
//! answers, and a cluster builder wired to the in-memory meta store.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use opal_meta::ClusterManager;
use opal_meta::config::MetaConfig;
use opal_meta::core::fsm::StaticSwitches;
use opal_meta::core::metastore::MemoryMetaStore;
use opal_meta::core::region::{
    LearnerBalancePlan, PeerBalancePlan, PkPrefixBalancePlan, RegionManager,
};
use opal_meta::core::table::TableManager;
use opal_meta::core::types::{
    InstanceInfo, InstanceState, PeerReport, StoreHeartbeatRequest, TopologyOp,
};

/// A region manager that records every call for later assertions.
#[derive(Default)]
pub struct RecordingRegionManager {
    pub regions_by_store: Mutex<HashMap<String, Vec<i64>>>,
    pub cleared_leader_counts: Mutex<Vec<String>>,
    pub deleted_stores: Mutex<Vec<(String, InstanceState)>>,
    pub migrated_stores: Mutex<Vec<(String, InstanceState)>>,
    pub peer_plans: Mutex<Vec<PeerBalancePlan>>,
    pub learner_plans: Mutex<Vec<LearnerBalancePlan>>,
    pub pk_prefix_plans: Mutex<Vec<PkPrefixBalancePlan>>,
}

impl RecordingRegionManager {
    pub fn set_regions(&self, address: &str, ids: Vec<i64>) {
        self.regions_by_store.lock().insert(address.to_string(), ids);
    }

    pub fn deleted_addresses(&self) -> Vec<String> {
        self.deleted_stores
            .lock()
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }

    pub fn migrated_addresses(&self) -> Vec<String> {
        self.migrated_stores
            .lock()
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }
}

impl RegionManager for RecordingRegionManager {
    fn region_ids(&self, address: &str) -> Vec<i64> {
        self.regions_by_store
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    fn clear_instance_leader_count(&self, address: &str) {
        self.cleared_leader_counts.lock().push(address.to_string());
    }

    fn delete_all_regions_for_store(&self, address: &str, state: InstanceState) {
        self.deleted_stores.lock().push((address.to_string(), state));
    }

    fn add_peer_for_store(&self, address: &str, state: InstanceState) {
        self.migrated_stores.lock().push((address.to_string(), state));
    }

    fn peer_load_balance(&self, plan: PeerBalancePlan) {
        self.peer_plans.lock().push(plan);
    }

    fn learner_load_balance(&self, plan: LearnerBalancePlan) {
        self.learner_plans.lock().push(plan);
    }

    fn pk_prefix_load_balance(&self, plan: PkPrefixBalancePlan) {
        self.pk_prefix_plans.lock().push(plan);
    }
}

/// A table manager answering from fixed tables. Pk prefix keys are derived
/// as `<table_id>_<start_key>`.
#[derive(Default)]
pub struct StaticTableManager {
    pub dimensions: HashMap<i64, i32>,
    pub replica_dist_tables: HashSet<i64>,
    pub pk_prefix_balance: bool,
}

impl TableManager for StaticTableManager {
    fn pk_prefix_dimensions(&self) -> HashMap<i64, i32> {
        self.dimensions.clone()
    }

    fn pk_prefix_key(&self, table_id: i64, _dimension: i32, start_key: &[u8]) -> Option<String> {
        Some(format!(
            "{table_id}_{}",
            String::from_utf8_lossy(start_key)
        ))
    }

    fn replica_dist_by_logical_room(&self, table_id: i64) -> bool {
        self.replica_dist_tables.contains(&table_id)
    }

    fn can_do_pk_prefix_balance(&self) -> bool {
        self.pk_prefix_balance
    }
}

pub struct TestCluster {
    pub manager: Arc<ClusterManager>,
    pub store: Arc<MemoryMetaStore>,
    pub switches: Arc<StaticSwitches>,
    pub regions: Arc<RecordingRegionManager>,
}

pub fn cluster() -> TestCluster {
    cluster_with(MetaConfig::default(), StaticTableManager::default())
}

pub fn cluster_with(config: MetaConfig, tables: StaticTableManager) -> TestCluster {
    let store = Arc::new(MemoryMetaStore::new());
    let switches = Arc::new(StaticSwitches::leader());
    let regions = Arc::new(RecordingRegionManager::default());
    let manager = Arc::new(ClusterManager::new(
        config,
        store.clone(),
        switches.clone(),
        regions.clone(),
        Arc::new(tables),
    ));
    manager.load_snapshot().expect("load empty snapshot");
    TestCluster {
        manager,
        store,
        switches,
        regions,
    }
}

/// Reopen the same meta store with a fresh manager, as a restart would.
pub fn reopen(cluster: &TestCluster) -> TestCluster {
    let switches = Arc::new(StaticSwitches::leader());
    let regions = Arc::new(RecordingRegionManager::default());
    let manager = Arc::new(ClusterManager::new(
        cluster.manager.config().clone(),
        cluster.store.clone(),
        switches.clone(),
        regions.clone(),
        Arc::new(StaticTableManager::default()),
    ));
    manager.load_snapshot().expect("reload snapshot");
    TestCluster {
        manager,
        store: cluster.store.clone(),
        switches,
        regions,
    }
}

pub fn instance_info(address: &str, resource_tag: &str, physical_room: &str) -> InstanceInfo {
    InstanceInfo {
        address: address.to_string(),
        capacity: 100_000,
        used_size: 1_000,
        resource_tag: resource_tag.to_string(),
        physical_room: physical_room.to_string(),
        logical_room: String::new(),
        network_segment: String::new(),
    }
}

/// Register stores in the default physical room under one resource tag.
pub fn add_instances(cluster: &TestCluster, resource_tag: &str, addresses: &[&str]) {
    for address in addresses {
        cluster
            .manager
            .submit(TopologyOp::AddInstance(instance_info(
                address,
                resource_tag,
                "default",
            )))
            .expect("add instance");
    }
}

pub fn peer(table_id: i64, region_id: i64, start_key: &str, is_learner: bool) -> PeerReport {
    PeerReport {
        table_id,
        region_id,
        start_key: Bytes::copy_from_slice(start_key.as_bytes()),
        is_learner,
    }
}

pub fn heartbeat(info: InstanceInfo, peers: Vec<PeerReport>) -> StoreHeartbeatRequest {
    StoreHeartbeatRequest {
        instance: info,
        need_peer_balance: true,
        peers,
    }
}

/// Report `count` plain peers of one table from a store, numbering regions
/// from `first_region`.
pub fn report_table_peers(
    cluster: &TestCluster,
    info: InstanceInfo,
    table_id: i64,
    first_region: i64,
    count: i64,
) {
    let peers = (0..count)
        .map(|i| peer(table_id, first_region + i, &format!("rk{}", first_region + i), false))
        .collect();
    cluster.manager.process_store_heartbeat(&heartbeat(info, peers));
}
