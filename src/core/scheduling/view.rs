// src/core/scheduling/view.rs

//! The double-buffered scheduling view: a snapshot-consistent projection of
//! per-store aggregates that selectors read without taking topology locks.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-instance aggregates consulted by the selectors.
#[derive(Debug, Clone, Default)]
pub struct InstanceSchedulingInfo {
    pub resource_tag: String,
    pub logical_room: String,
    /// table id -> region ids present on this store.
    pub regions_map: HashMap<i64, Vec<i64>>,
    /// table id -> region count on this store.
    pub regions_count_map: HashMap<i64, i64>,
    /// pk prefix key -> region count on this store.
    pub pk_prefix_region_count: HashMap<String, i64>,
}

/// A double-buffered value: readers pin the published snapshot by cloning
/// an `Arc`, writers mutate the back buffer under a mutex and republish.
/// A reader never observes a half-applied modification, and the only lock
/// it touches is a read lock held for the duration of one `Arc` clone.
#[derive(Debug)]
pub struct DoubleBuffered<T: Clone> {
    front: RwLock<Arc<T>>,
    back: Mutex<T>,
}

impl<T: Clone + Default> Default for DoubleBuffered<T> {
    fn default() -> Self {
        Self {
            front: RwLock::new(Arc::new(T::default())),
            back: Mutex::new(T::default()),
        }
    }
}

impl<T: Clone> DoubleBuffered<T> {
    /// Pin the current snapshot. The pin must be dropped promptly; holding
    /// it only delays memory reclamation, not writers.
    pub fn read(&self) -> Arc<T> {
        self.front.read().clone()
    }

    /// Apply a modification and publish the result as the new snapshot.
    /// Writers serialize on the back buffer.
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut back = self.back.lock();
        let out = f(&mut back);
        *self.front.write() = Arc::new(back.clone());
        out
    }
}

pub type SchedulingInfoMap = HashMap<String, InstanceSchedulingInfo>;

/// The scheduling view proper: address -> [`InstanceSchedulingInfo`].
///
/// It is a strict projection of the topology store. Entries appear on
/// instance add, vanish on drop, are replaced wholesale by heartbeats, and
/// are optimistically bumped by selector successes.
#[derive(Debug, Default)]
pub struct SchedulingView {
    inner: DoubleBuffered<SchedulingInfoMap>,
}

impl SchedulingView {
    pub fn read(&self) -> Arc<SchedulingInfoMap> {
        self.inner.read()
    }

    pub fn clear(&self) {
        self.inner.modify(|map| map.clear());
    }

    pub fn insert_empty(&self, address: &str, resource_tag: &str, logical_room: &str) {
        self.inner.modify(|map| {
            map.insert(
                address.to_string(),
                InstanceSchedulingInfo {
                    resource_tag: resource_tag.to_string(),
                    logical_room: logical_room.to_string(),
                    ..Default::default()
                },
            );
        });
    }

    pub fn remove(&self, address: &str) {
        self.inner.modify(|map| {
            map.remove(address);
        });
    }

    pub fn set_logical_room(&self, address: &str, logical_room: &str) {
        self.inner.modify(|map| {
            if let Some(info) = map.get_mut(address) {
                info.logical_room = logical_room.to_string();
            }
        });
    }

    pub fn set_resource_tag(&self, address: &str, resource_tag: &str) {
        self.inner.modify(|map| {
            if let Some(info) = map.get_mut(address) {
                info.resource_tag = resource_tag.to_string();
            }
        });
    }

    /// Replace a store's aggregates wholesale from a heartbeat report.
    pub fn set_instance_regions(
        &self,
        address: &str,
        regions_map: HashMap<i64, Vec<i64>>,
        regions_count_map: HashMap<i64, i64>,
        pk_prefix_region_count: HashMap<String, i64>,
    ) {
        self.inner.modify(|map| match map.get_mut(address) {
            Some(info) => {
                info.regions_map = regions_map;
                info.regions_count_map = regions_count_map;
                info.pk_prefix_region_count = pk_prefix_region_count;
            }
            None => {
                debug!("heartbeat from {address} not present in scheduling view");
            }
        });
    }

    /// Optimistically reflect a pending add-peer plan on the chosen store.
    /// Converges with the store's next heartbeat.
    pub fn add_peer_count(&self, address: &str, table_id: i64) {
        self.inner.modify(|map| {
            if let Some(info) = map.get_mut(address) {
                *info.regions_count_map.entry(table_id).or_insert(0) += 1;
            }
        });
    }

    /// As [`add_peer_count`], additionally bumping the pk-prefix dimension.
    pub fn add_peer_count_on_pk_prefix(&self, address: &str, table_id: i64, pk_prefix_key: &str) {
        self.inner.modify(|map| {
            if let Some(info) = map.get_mut(address) {
                *info.regions_count_map.entry(table_id).or_insert(0) += 1;
                *info
                    .pk_prefix_region_count
                    .entry(pk_prefix_key.to_string())
                    .or_insert(0) += 1;
            }
        });
    }

    /// Number of instances under a resource tag, optionally confined to a
    /// logical room. Counts every instance regardless of health state so
    /// averages stay stable while a store is briefly FAULTY.
    pub fn instance_count(&self, resource_tag: &str, logical_room: &str) -> i64 {
        self.read()
            .values()
            .filter(|info| {
                info.resource_tag == resource_tag
                    && (logical_room.is_empty() || info.logical_room == logical_room)
            })
            .count() as i64
    }

    /// Total peer count of a table across the cluster, optionally confined
    /// to a logical room.
    pub fn peer_count(&self, table_id: i64, logical_room: &str) -> i64 {
        self.read()
            .values()
            .filter(|info| logical_room.is_empty() || info.logical_room == logical_room)
            .filter_map(|info| info.regions_count_map.get(&table_id))
            .sum()
    }

    /// Total peer count under a pk-prefix key, optionally confined to a
    /// logical room.
    pub fn pk_prefix_peer_count(&self, pk_prefix_key: &str, logical_room: &str) -> i64 {
        self.read()
            .values()
            .filter(|info| logical_room.is_empty() || info.logical_room == logical_room)
            .filter_map(|info| info.pk_prefix_region_count.get(pk_prefix_key))
            .sum()
    }
}
