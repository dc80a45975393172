// src/core/scheduling/balance.rs

//! The heartbeat-driven rebalancing pipeline. A store heartbeat refreshes
//! the instance record and the scheduling view, then computes per-table and
//! per-pk-prefix add-peer budgets and hands the resulting plans to the
//! region manager. A client heartbeat only reads the topology.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use tracing::{debug, warn};

use crate::core::region::{LearnerBalancePlan, PeerBalancePlan, PkPrefixBalancePlan};
use crate::core::topology::ClusterManager;
use crate::core::topology::instance::HeartbeatRouting;
use crate::core::types::{
    StoreHeartbeatRequest, StoreHeartbeatResponse, TopologyOp, TopologySnapshot,
};

/// Peer averages round up: a store is only over-loaded once it exceeds the
/// ceiling of the even split.
fn ceil_div(total: i64, count: i64) -> i64 {
    let mut average = total / count;
    if total % count != 0 {
        average += 1;
    }
    average
}

/// The 5% slack on top of the average before a budget is queued.
fn over_threshold(reported: i64, average: i64) -> bool {
    reported > average + average * 5 / 100
}

impl ClusterManager {
    /// Store heartbeat entry point: route the instance report, answer the
    /// applying params, and when asked run the rebalancing pass.
    pub fn process_store_heartbeat(
        &self,
        request: &StoreHeartbeatRequest,
    ) -> StoreHeartbeatResponse {
        match self.update_instance_info(&request.instance, Instant::now()) {
            HeartbeatRouting::UpToDate => {}
            HeartbeatRouting::NeedsAdd => {
                if let Err(e) = self.submit(TopologyOp::AddInstance(request.instance.clone())) {
                    warn!(
                        "self-register instance {} fail: {e}",
                        request.instance.address
                    );
                }
            }
            HeartbeatRouting::NeedsUpdate => {
                if let Err(e) = self.submit(TopologyOp::UpdateInstance(request.instance.clone())) {
                    warn!(
                        "update instance {} from heartbeat fail: {e}",
                        request.instance.address
                    );
                }
            }
        }

        let response = StoreHeartbeatResponse {
            instance_params: self
                .params_for_store(&request.instance.address, &request.instance.resource_tag),
        };
        if request.need_peer_balance {
            self.process_peer_heartbeat(request);
        }
        response
    }

    /// Client heartbeat entry point: a read-only topology snapshot.
    pub fn process_client_heartbeat(&self) -> TopologySnapshot {
        self.topology_snapshot()
    }

    fn process_peer_heartbeat(&self, request: &StoreHeartbeatRequest) {
        let instance = request.instance.address.clone();
        let resource_tag = request.instance.resource_tag.clone();
        let logical_room = self.get_logical_room(&instance).unwrap_or_default();

        let table_pk_prefix_dimensions = self.table_manager.pk_prefix_dimensions();
        let mut table_regions: HashMap<i64, Vec<i64>> = HashMap::new();
        let mut is_learner_table: HashMap<i64, bool> = HashMap::new();
        let mut pk_prefix_regions: HashMap<String, Vec<i64>> = HashMap::new();
        let mut pk_prefix_region_counts: HashMap<String, i64> = HashMap::new();
        for peer in &request.peers {
            table_regions
                .entry(peer.table_id)
                .or_default()
                .push(peer.region_id);
            is_learner_table.insert(peer.table_id, peer.is_learner);
            let Some(dimension) = table_pk_prefix_dimensions.get(&peer.table_id) else {
                continue;
            };
            match self
                .table_manager
                .pk_prefix_key(peer.table_id, *dimension, &peer.start_key)
            {
                Some(key) => {
                    pk_prefix_regions
                        .entry(key.clone())
                        .or_default()
                        .push(peer.region_id);
                    *pk_prefix_region_counts.entry(key).or_insert(0) += 1;
                }
                None => warn!(
                    "decode pk_prefix key fail, table_id: {}, region_id: {}",
                    peer.table_id, peer.region_id
                ),
            }
        }
        let table_region_counts: HashMap<i64, i64> = table_regions
            .iter()
            .map(|(table_id, regions)| (*table_id, regions.len() as i64))
            .collect();
        self.scheduling.set_instance_regions(
            &instance,
            table_regions.clone(),
            table_region_counts,
            pk_prefix_region_counts.clone(),
        );

        if !self.fsm.whether_can_decide() {
            warn!(
                "meta state machine can not make decision, resource_tag: {resource_tag}, \
                 instance: {instance}"
            );
            return;
        }
        if !self.fsm.load_balance(&resource_tag) {
            warn!(
                "peer load balance closed, resource_tag: {resource_tag}, instance: {instance}"
            );
            return;
        }
        debug!("peer load balance, instance: {instance}, resource_tag: {resource_tag}");
        let instance_count_for_logical =
            self.scheduling.instance_count(&resource_tag, &logical_room);
        let instance_count = self.scheduling.instance_count(&resource_tag, "");

        // Rebalancing adds peers first and lets the source drop its surplus
        // afterwards, so the budgets below are pure add-peer counts.
        let mut add_peer_counts: HashMap<i64, i64> = HashMap::new();
        let mut add_learner_counts: HashMap<i64, i64> = HashMap::new();
        let mut logical_rooms: HashMap<i64, String> = HashMap::new();
        let mut table_average_counts: HashMap<i64, i64> = HashMap::new();
        for (table_id, regions) in &table_regions {
            let replica_dists = self.table_manager.replica_dist_by_logical_room(*table_id);
            let room = if replica_dists {
                logical_room.as_str()
            } else {
                ""
            };
            let total_peer_count = self.scheduling.peer_count(*table_id, room);
            let total_instance_count = if replica_dists {
                instance_count_for_logical
            } else {
                instance_count
            };
            if total_instance_count == 0 {
                continue;
            }
            let average = ceil_div(total_peer_count, total_instance_count);
            table_average_counts.insert(*table_id, average);
            let reported = regions.len() as i64;
            if over_threshold(reported, average) {
                if is_learner_table.get(table_id).copied().unwrap_or(false) {
                    add_learner_counts.insert(*table_id, reported - average);
                } else {
                    add_peer_counts.insert(*table_id, reported - average);
                }
                logical_rooms.insert(*table_id, room.to_string());
            }
        }

        let mut pk_prefix_add_peer_counts: HashMap<String, i64> = HashMap::new();
        let mut pk_prefix_average_counts: HashMap<String, i64> = HashMap::new();
        if !pk_prefix_region_counts.is_empty() && self.table_manager.can_do_pk_prefix_balance() {
            self.process_pk_prefix_load_balance(
                &pk_prefix_region_counts,
                &mut add_peer_counts,
                &logical_rooms,
                &mut pk_prefix_add_peer_counts,
                &mut pk_prefix_average_counts,
                instance_count_for_logical,
                instance_count,
            );
        }

        if pk_prefix_add_peer_counts.is_empty() {
            debug!("instance {instance} has been pk_prefix_load_balance, no need migrate");
        } else {
            self.region_manager
                .pk_prefix_load_balance(PkPrefixBalancePlan {
                    add_peer_counts: pk_prefix_add_peer_counts,
                    pk_prefix_regions,
                    instance: instance.clone(),
                    resource_tag: resource_tag.clone(),
                    logical_rooms: logical_rooms.clone(),
                    pk_prefix_average_counts: pk_prefix_average_counts.clone(),
                    table_average_counts: table_average_counts.clone(),
                });
        }

        for (table_id, count) in &add_peer_counts {
            debug!(
                "instance {instance} should add peer count for peer_load_balance, \
                 table_id: {table_id}, add_peer_count: {count}"
            );
        }
        if add_peer_counts.is_empty() {
            debug!("instance {instance} has been peer_load_balance, no need migrate");
        } else {
            self.region_manager.peer_load_balance(PeerBalancePlan {
                add_peer_counts,
                table_regions: table_regions.clone(),
                instance: instance.clone(),
                resource_tag: resource_tag.clone(),
                logical_rooms: logical_rooms.clone(),
                table_average_counts: table_average_counts.clone(),
                table_pk_prefix_dimensions,
                pk_prefix_average_counts,
            });
        }

        if add_learner_counts.is_empty() {
            debug!("instance {instance} has been learner_load_balance, no need migrate");
        } else {
            self.region_manager.learner_load_balance(LearnerBalancePlan {
                add_learner_counts,
                table_regions,
                instance,
                resource_tag,
                logical_rooms,
                table_average_counts,
            });
        }
    }

    /// Compute pk-prefix budgets. A table that gets a pk-prefix budget has
    /// its table-level budget suppressed for this cycle: rebalancing the
    /// finer dimension implies subsequent table balance.
    #[allow(clippy::too_many_arguments)]
    fn process_pk_prefix_load_balance(
        &self,
        pk_prefix_region_counts: &HashMap<String, i64>,
        table_add_peer_counts: &mut HashMap<i64, i64>,
        logical_rooms: &HashMap<i64, String>,
        pk_prefix_add_peer_counts: &mut HashMap<String, i64>,
        pk_prefix_average_counts: &mut HashMap<String, i64>,
        instance_count_for_logical: i64,
        instance_count: i64,
    ) {
        let mut do_not_peer_balance_table: BTreeSet<i64> = BTreeSet::new();
        for (key, reported) in pk_prefix_region_counts {
            // pk prefix keys lead with the decimal table id and `_`.
            let Some(position) = key.find('_') else {
                continue;
            };
            let Ok(table_id) = key[..position].parse::<i64>() else {
                continue;
            };
            let room = logical_rooms.get(&table_id).cloned().unwrap_or_default();
            let total_peer_count = self.scheduling.pk_prefix_peer_count(key, &room);
            let total_instance_count = if room.is_empty() {
                instance_count
            } else {
                instance_count_for_logical
            };
            if total_instance_count <= 0 {
                continue;
            }
            let average = ceil_div(total_peer_count, total_instance_count);
            debug!(
                "handle pk_prefix key: {key}, total_peer: {total_peer_count}, \
                 instance: {total_instance_count}, average_peer_count: {average}, \
                 heartbeat report: {reported}"
            );
            pk_prefix_average_counts.insert(key.clone(), average);
            if over_threshold(*reported, average) {
                pk_prefix_add_peer_counts.insert(key.clone(), reported - average);
                do_not_peer_balance_table.insert(table_id);
            }
        }
        for table_id in do_not_peer_balance_table {
            table_add_peer_counts.remove(&table_id);
        }
    }
}
