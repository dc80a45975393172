// src/core/topology/snapshot.rs

//! Rebuilds all in-memory state from the meta store, at startup and after a
//! consensus snapshot install. Malformed or unresolvable records are logged
//! and skipped so one bad row cannot keep the whole service down.

use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{info, warn};

use super::segment::auto_network_segments_division;
use super::{ClusterManager, InstanceTopology, keys};
use crate::core::MetaError;
use crate::core::types::{
    Instance, InstanceInfo, InstanceParam, LogicalRoomSet, PhysicalRoomRecord, decode_record,
};

impl ClusterManager {
    /// Clear everything, install the default rooms so an empty deployment
    /// is valid, then replay every persisted record. Must complete before
    /// any RPC is served.
    pub fn load_snapshot(&self) -> Result<(), MetaError> {
        info!("cluster manager begin load snapshot");
        self.scheduling.clear();
        {
            let mut rooms = self.rooms.lock();
            rooms.logical_physical_map.clear();
            rooms.physical_info.clear();
            rooms.physical_info.insert(
                self.config.default_physical_room.clone(),
                self.config.default_logical_room.clone(),
            );
            rooms.logical_physical_map.insert(
                self.config.default_logical_room.clone(),
                BTreeSet::from([self.config.default_physical_room.clone()]),
            );
        }
        {
            let mut instances = self.instances.lock();
            *instances = InstanceTopology::default();
            instances
                .physical_instance_map
                .insert(self.config.default_physical_room.clone(), BTreeSet::new());
        }
        self.instance_params.lock().clear();

        self.load_logical_records()?;
        self.load_physical_records()?;
        self.load_instance_records()?;
        self.load_param_records()?;

        let mut guard = self.instances.lock();
        let topo = &mut *guard;
        let tags: Vec<String> = topo.resource_tag_instance_map.keys().cloned().collect();
        for tag in tags {
            auto_network_segments_division(topo, &tag, &self.config);
        }
        info!("cluster manager load snapshot done");
        Ok(())
    }

    fn load_logical_records(&self) -> Result<(), MetaError> {
        for (key, value) in self.meta_store.scan_prefix(&keys::logical_prefix())? {
            let record: LogicalRoomSet = match decode_record(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!("skip malformed logical record {key:?}: {e}");
                    continue;
                }
            };
            let mut rooms = self.rooms.lock();
            for logical in record.logical_rooms {
                rooms
                    .logical_physical_map
                    .entry(logical)
                    .or_insert_with(BTreeSet::new);
            }
        }
        Ok(())
    }

    fn load_physical_records(&self) -> Result<(), MetaError> {
        for (key, value) in self.meta_store.scan_prefix(&keys::physical_prefix())? {
            let record: PhysicalRoomRecord = match decode_record(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!("skip malformed physical record {key:?}: {e}");
                    continue;
                }
            };
            let mut rooms = self.rooms.lock();
            let mut physicals = BTreeSet::new();
            for physical in record.physical_rooms {
                rooms
                    .physical_info
                    .insert(physical.clone(), record.logical_room.clone());
                self.instances
                    .lock()
                    .physical_instance_map
                    .entry(physical.clone())
                    .or_insert_with(BTreeSet::new);
                physicals.insert(physical);
            }
            rooms
                .logical_physical_map
                .insert(record.logical_room, physicals);
        }
        Ok(())
    }

    fn load_instance_records(&self) -> Result<(), MetaError> {
        let now = Instant::now();
        for (key, value) in self.meta_store.scan_prefix(&keys::instance_prefix())? {
            let mut record: InstanceInfo = match decode_record(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!("skip malformed instance record {key:?}: {e}");
                    continue;
                }
            };
            if record.physical_room.is_empty() {
                record.physical_room = self.config.default_physical_room.clone();
            }
            // The room maps are authoritative for the parent; a stale
            // persisted logical room is corrected here.
            record.logical_room = {
                let rooms = self.rooms.lock();
                match rooms.physical_info.get(&record.physical_room) {
                    Some(logical) => logical.clone(),
                    None => {
                        warn!(
                            "skip instance {} with unknown physical room {}",
                            record.address, record.physical_room
                        );
                        continue;
                    }
                }
            };
            let instance = Instance::from_record(&record, now);
            {
                let mut guard = self.instances.lock();
                let topo = &mut *guard;
                topo.instance_physical_map
                    .insert(record.address.clone(), record.physical_room.clone());
                topo.physical_instance_map
                    .entry(record.physical_room.clone())
                    .or_default()
                    .insert(record.address.clone());
                topo.resource_tag_instance_map
                    .entry(record.resource_tag.clone())
                    .or_default()
                    .insert(record.address.clone());
                topo.instance_info.insert(record.address.clone(), instance);
            }
            self.scheduling
                .insert_empty(&record.address, &record.resource_tag, &record.logical_room);
        }
        Ok(())
    }

    fn load_param_records(&self) -> Result<(), MetaError> {
        let prefix = keys::instance_param_prefix();
        for (key, value) in self.meta_store.scan_prefix(&prefix)? {
            let record: InstanceParam = match decode_record(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!("skip malformed instance param record {key:?}: {e}");
                    continue;
                }
            };
            if keys::key_suffix(&key, &prefix) != Some(record.resource_tag_or_address.as_str()) {
                warn!(
                    "instance param key {key:?} does not match record scope {}",
                    record.resource_tag_or_address
                );
                continue;
            }
            self.instance_params
                .lock()
                .insert(record.resource_tag_or_address.clone(), record);
        }
        Ok(())
    }
}
