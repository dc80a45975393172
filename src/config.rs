// src/config.rs

//! Manages the meta-service configuration: recognized options, their
//! defaults, and loading from a TOML file.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

/// All recognized tunables of the placement and balancing engine.
///
/// Every field carries a serde default so a partial (or empty) TOML file is
/// a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Disk usage percentage that would trigger capacity migration. Parsed
    /// and carried, but no code path consumes it yet.
    #[serde(default = "default_migrate_percent")]
    pub migrate_percent: u64,

    /// Selector disk ceiling: stores above this used/capacity percentage
    /// are not eligible placement targets.
    #[serde(default = "default_disk_used_percent")]
    pub disk_used_percent: u64,

    /// Mass-failure suppression: minimum percentage of unhealthy stores in
    /// a resource tag before the health monitor suspects its own judgement.
    #[serde(default = "default_error_judge_percent")]
    pub error_judge_percent: u64,

    /// Mass-failure suppression: minimum absolute number of unhealthy
    /// stores, applied together with `error_judge_percent`.
    #[serde(default = "default_error_judge_number")]
    pub error_judge_number: u64,

    #[serde(default = "default_min_network_segments")]
    pub min_network_segments_per_resource_tag: usize,

    #[serde(default = "default_network_segment_max_stores_percent")]
    pub network_segment_max_stores_percent: usize,

    /// When true, exclusion sets reject candidates sharing an IP with any
    /// excluded store, not just the exact address. Keeps replicas on
    /// distinct hosts when stores are co-deployed.
    #[serde(default)]
    pub peer_balance_by_ip: bool,

    #[serde(with = "humantime_serde", default = "default_store_heart_beat_interval")]
    pub store_heart_beat_interval: Duration,

    /// A store is FAULTY after missing this many heartbeat intervals.
    #[serde(default = "default_store_faulty_interval_times")]
    pub store_faulty_interval_times: u32,

    /// A store is DEAD after missing this many heartbeat intervals.
    #[serde(default = "default_store_dead_interval_times")]
    pub store_dead_interval_times: u32,

    /// Concurrent MIGRATE-driven add-peer operations per resource tag and
    /// health cycle. A tag-scope instance param of the same name overrides.
    #[serde(default = "default_migrate_concurrency")]
    pub migrate_concurrency: u64,

    #[serde(default = "default_logical_room")]
    pub default_logical_room: String,

    #[serde(default = "default_physical_room")]
    pub default_physical_room: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            migrate_percent: default_migrate_percent(),
            disk_used_percent: default_disk_used_percent(),
            error_judge_percent: default_error_judge_percent(),
            error_judge_number: default_error_judge_number(),
            min_network_segments_per_resource_tag: default_min_network_segments(),
            network_segment_max_stores_percent: default_network_segment_max_stores_percent(),
            peer_balance_by_ip: false,
            store_heart_beat_interval: default_store_heart_beat_interval(),
            store_faulty_interval_times: default_store_faulty_interval_times(),
            store_dead_interval_times: default_store_dead_interval_times(),
            migrate_concurrency: default_migrate_concurrency(),
            default_logical_room: default_logical_room(),
            default_physical_room: default_physical_room(),
        }
    }
}

impl MetaConfig {
    pub async fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: MetaConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Heartbeat age beyond which a store is considered FAULTY.
    pub fn faulty_after(&self) -> Duration {
        self.store_heart_beat_interval * self.store_faulty_interval_times
    }

    /// Heartbeat age beyond which a store is considered DEAD.
    pub fn dead_after(&self) -> Duration {
        self.store_heart_beat_interval * self.store_dead_interval_times
    }
}

fn default_migrate_percent() -> u64 {
    60
}
fn default_disk_used_percent() -> u64 {
    80
}
fn default_error_judge_percent() -> u64 {
    10
}
fn default_error_judge_number() -> u64 {
    3
}
fn default_min_network_segments() -> usize {
    10
}
fn default_network_segment_max_stores_percent() -> usize {
    20
}
fn default_store_heart_beat_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_store_faulty_interval_times() -> u32 {
    3
}
fn default_store_dead_interval_times() -> u32 {
    60
}
fn default_migrate_concurrency() -> u64 {
    2
}
fn default_logical_room() -> String {
    "default".to_string()
}
fn default_physical_room() -> String {
    "default".to_string()
}
