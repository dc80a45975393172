// src/core/health.rs

//! The store health monitor: a periodic scan over heartbeat timestamps that
//! drives the NORMAL -> FAULTY -> DEAD state machine, suppresses mass
//! failures that look like a control-plane outage, and enqueues replica
//! work at the region manager for DEAD and MIGRATE stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::core::topology::ClusterManager;
use crate::core::types::InstanceState;

#[derive(Debug, Default)]
struct TagHealth {
    total: i64,
    faulty: i64,
    /// DEAD stores that still host regions; empty DEAD stores cost nothing
    /// and do not count toward the suppression gate.
    dead_with_regions: i64,
    dead_stores: Vec<String>,
    migrate_stores: Vec<String>,
}

impl ClusterManager {
    /// One health scan. Pure in-memory state transitions plus region-manager
    /// enqueues; holds no lock across any region-manager call.
    pub fn store_healthy_check(&self, now: Instant) {
        let faulty_after = self.config.faulty_after();
        let dead_after = self.config.dead_after();

        let mut by_tag: HashMap<String, TagHealth> = HashMap::new();
        let mut newly_faulty: Vec<String> = Vec::new();
        {
            let mut instances = self.instances.lock();
            for (address, inst) in instances.instance_info.iter_mut() {
                let health = by_tag.entry(inst.resource_tag.clone()).or_default();
                health.total += 1;
                if inst.status.state == InstanceState::Migrate {
                    health.migrate_stores.push(address.clone());
                    continue;
                }
                let age = now.saturating_duration_since(inst.status.last_heartbeat);
                if age > dead_after {
                    inst.status.state = InstanceState::Dead;
                    warn!(
                        "instance {address} is DEAD, resource_tag: {}",
                        inst.resource_tag
                    );
                    health.dead_stores.push(address.clone());
                    continue;
                }
                if age > faulty_after {
                    inst.status.state = InstanceState::Faulty;
                    warn!(
                        "instance {address} is FAULTY, resource_tag: {}",
                        inst.resource_tag
                    );
                    health.faulty += 1;
                    newly_faulty.push(address.clone());
                    continue;
                }
            }
        }

        // Clear leader counts of FAULTY stores so a later MIGRATE can move
        // their regions without waiting on leadership accounting.
        for address in &newly_faulty {
            self.region_manager.clear_instance_leader_count(address);
        }
        for health in by_tag.values_mut() {
            health.dead_with_regions = health
                .dead_stores
                .iter()
                .filter(|address| !self.region_manager.region_ids(address).is_empty())
                .count() as i64;
        }

        // Mass-failure gate: when too much of a tag looks unhealthy at
        // once, the likelier explanation is a meta-side outage. Skip all
        // reconfiguration for that tag this cycle; the stores stay DEAD or
        // MIGRATE and are retried next cycle.
        for (resource_tag, health) in by_tag.iter_mut() {
            if health.dead_stores.is_empty() || health.total == 0 {
                continue;
            }
            let unhealthy = health.dead_with_regions + health.faulty;
            if unhealthy * 100 / health.total >= self.config.error_judge_percent as i64
                && unhealthy >= self.config.error_judge_number as i64
            {
                error!(
                    "too many dead and faulty instances, may be error judge, \
                     resource_tag: {resource_tag}"
                );
                health.dead_stores.clear();
                health.migrate_stores.clear();
            }
        }

        for (resource_tag, health) in &by_tag {
            for address in &health.dead_stores {
                warn!("store {address} is dead, resource_tag: {resource_tag}");
                self.region_manager
                    .delete_all_regions_for_store(address, InstanceState::Dead);
            }
        }
        for (resource_tag, health) in &by_tag {
            if health.migrate_stores.is_empty() {
                continue;
            }
            // Bound concurrent migrations per tag; a tag-scope meta param
            // overrides the configured default.
            let mut concurrency = self
                .meta_param_value(resource_tag, "migrate_concurrency")
                .unwrap_or(self.config.migrate_concurrency);
            for address in &health.migrate_stores {
                warn!("store {address} is migrating, resource_tag: {resource_tag}");
                if self.fsm.migrate_enabled(resource_tag) && concurrency > 0 {
                    concurrency -= 1;
                    self.region_manager
                        .add_peer_for_store(address, InstanceState::Migrate);
                }
            }
        }
    }
}

/// The periodic driver of [`ClusterManager::store_healthy_check`], one tick
/// per heartbeat interval.
pub struct HealthMonitor {
    manager: Arc<ClusterManager>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ClusterManager>) -> Self {
        Self { manager }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = self.manager.config().store_heart_beat_interval;
        info!("store health monitor started with period {period:?}");
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.manager.store_healthy_check(Instant::now());
                }
                _ = shutdown_rx.recv() => {
                    info!("store health monitor shutting down.");
                    return;
                }
            }
        }
    }
}
