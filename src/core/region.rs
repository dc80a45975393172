// src/core/region.rs

//! The interface to the peer reconfiguration executor. The core only hands
//! balancing plans over; the region manager owns the actual add-peer,
//! add-learner, and remove-peer traffic.

use std::collections::HashMap;

use crate::core::types::InstanceState;

/// Budgeted plan for table-dimension peer rebalancing away from one store.
#[derive(Debug, Clone, Default)]
pub struct PeerBalancePlan {
    /// table id -> how many peers should move off the reporting store.
    pub add_peer_counts: HashMap<i64, i64>,
    /// table id -> region ids the reporting store hosts for that table.
    pub table_regions: HashMap<i64, Vec<i64>>,
    /// The reporting store.
    pub instance: String,
    pub resource_tag: String,
    /// table id -> logical room the rebalance is confined to; empty means
    /// cluster-wide.
    pub logical_rooms: HashMap<i64, String>,
    pub table_average_counts: HashMap<i64, i64>,
    /// Tables with a pk-prefix balancing dimension, and that dimension.
    pub table_pk_prefix_dimensions: HashMap<i64, i32>,
    pub pk_prefix_average_counts: HashMap<String, i64>,
}

/// Same shape as [`PeerBalancePlan`] for learner replicas.
#[derive(Debug, Clone, Default)]
pub struct LearnerBalancePlan {
    pub add_learner_counts: HashMap<i64, i64>,
    pub table_regions: HashMap<i64, Vec<i64>>,
    pub instance: String,
    pub resource_tag: String,
    pub logical_rooms: HashMap<i64, String>,
    pub table_average_counts: HashMap<i64, i64>,
}

/// Budgeted plan for pk-prefix-dimension rebalancing.
#[derive(Debug, Clone, Default)]
pub struct PkPrefixBalancePlan {
    /// pk prefix key -> how many peers should move off the reporting store.
    pub add_peer_counts: HashMap<String, i64>,
    /// pk prefix key -> region ids the reporting store hosts under it.
    pub pk_prefix_regions: HashMap<String, Vec<i64>>,
    pub instance: String,
    pub resource_tag: String,
    pub logical_rooms: HashMap<i64, String>,
    pub pk_prefix_average_counts: HashMap<String, i64>,
    pub table_average_counts: HashMap<i64, i64>,
}

/// The region manager contract. Implementations must not block: the health
/// monitor and heartbeat pipeline call these to enqueue work, never to wait
/// on it. The core guarantees it holds no topology lock across these calls.
pub trait RegionManager: Send + Sync {
    /// Region ids currently hosted by a store.
    fn region_ids(&self, address: &str) -> Vec<i64>;

    /// Forget a store's leader counts so migration can proceed once the
    /// store is FAULTY.
    fn clear_instance_leader_count(&self, address: &str);

    /// Schedule removal of every region replica on a DEAD store.
    fn delete_all_regions_for_store(&self, address: &str, state: InstanceState);

    /// Schedule replacement peers for a MIGRATE store.
    fn add_peer_for_store(&self, address: &str, state: InstanceState);

    fn peer_load_balance(&self, plan: PeerBalancePlan);

    fn learner_load_balance(&self, plan: LearnerBalancePlan);

    fn pk_prefix_load_balance(&self, plan: PkPrefixBalancePlan);
}
