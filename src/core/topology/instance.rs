// src/core/topology/instance.rs

//! Store instance lifecycle: operator add/drop/update, the heartbeat fast
//! path, and the operator status entry points.

use std::time::Instant;
use tracing::{info, warn};

use super::segment::auto_network_segments_division;
use super::{ClusterManager, keys};
use crate::core::MetaError;
use crate::core::types::{
    Instance, InstanceInfo, InstanceState, MigrateDecision, encode_record,
};

/// Where a store heartbeat's instance report has to be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatRouting {
    /// Timestamp and used size refreshed in memory; nothing to persist.
    UpToDate,
    /// Unknown address: self-register through an add-instance op.
    NeedsAdd,
    /// Capacity, resource tag, or segment override changed: route through
    /// an update-instance op so the change is replicated and persisted.
    NeedsUpdate,
}

impl ClusterManager {
    pub(crate) fn add_instance(&self, mut info: InstanceInfo) -> Result<(), MetaError> {
        let address = info.address.clone();
        if info.physical_room.is_empty() {
            match self
                .room_mapping
                .as_ref()
                .and_then(|mapping| mapping.physical_room_of(&address))
            {
                Some(room) => info.physical_room = room,
                None => {
                    warn!("get physical room fail when add instance {address}");
                    return Err(MetaError::Internal("instance to physical room fail".into()));
                }
            }
        }
        {
            let rooms = self.rooms.lock();
            match rooms.physical_info.get(&info.physical_room) {
                Some(logical) => info.logical_room = logical.clone(),
                None => {
                    warn!(
                        "physical room {} not exist, instance {address}",
                        info.physical_room
                    );
                    return Err(MetaError::InvalidInput("physical room not exist".into()));
                }
            }
        }
        if self.instances.lock().instance_info.contains_key(&address) {
            warn!("instance {address} already exists");
            return Err(MetaError::InvalidInput("instance already exist".into()));
        }

        let value = encode_record(&info)?;
        self.meta_store.put(keys::instance_key(&address), value)?;

        let instance = Instance::from_record(&info, Instant::now());
        {
            let mut guard = self.instances.lock();
            let topo = &mut *guard;
            topo.instance_physical_map
                .insert(address.clone(), info.physical_room.clone());
            topo.physical_instance_map
                .entry(info.physical_room.clone())
                .or_default()
                .insert(address.clone());
            topo.resource_tag_instance_map
                .entry(info.resource_tag.clone())
                .or_default()
                .insert(address.clone());
            topo.instance_info.insert(address.clone(), instance);
            auto_network_segments_division(topo, &info.resource_tag, &self.config);
        }
        self.scheduling
            .insert_empty(&address, &info.resource_tag, &info.logical_room);
        info!("add instance success: {address}");
        Ok(())
    }

    /// Dropping an unknown instance succeeds: decommission retries must be
    /// harmless.
    pub(crate) fn drop_instance(&self, address: &str) -> Result<(), MetaError> {
        let (physical_room, resource_tag) = {
            let instances = self.instances.lock();
            match instances.instance_info.get(address) {
                None => {
                    warn!("drop unknown instance {address}, nothing to do");
                    return Ok(());
                }
                Some(inst) => (inst.physical_room.clone(), inst.resource_tag.clone()),
            }
        };

        self.meta_store.delete(vec![keys::instance_key(address)])?;

        {
            let mut guard = self.instances.lock();
            let topo = &mut *guard;
            topo.instance_physical_map.remove(address);
            topo.instance_info.remove(address);
            if let Some(set) = topo.resource_tag_instance_map.get_mut(&resource_tag) {
                set.remove(address);
            }
            if let Some(set) = topo.physical_instance_map.get_mut(&physical_room) {
                set.remove(address);
            }
            auto_network_segments_division(topo, &resource_tag, &self.config);
        }
        self.scheduling.remove(address);
        info!("drop instance success: {address}");
        Ok(())
    }

    /// Update the mutable attributes of an instance: capacity, used size,
    /// resource tag, and the operator segment override. State and physical
    /// room are never touched here; replacing those means drop plus add.
    pub(crate) fn update_instance(&self, info: InstanceInfo) -> Result<(), MetaError> {
        let address = info.address.clone();
        let record = {
            let instances = self.instances.lock();
            let Some(existing) = instances.instance_info.get(&address) else {
                warn!("instance {address} not exist");
                return Err(MetaError::InvalidInput("instance not exist".into()));
            };
            InstanceInfo {
                address: address.clone(),
                capacity: info.capacity,
                used_size: info.used_size,
                resource_tag: info.resource_tag.clone(),
                physical_room: existing.physical_room.clone(),
                logical_room: existing.logical_room.clone(),
                network_segment: info.network_segment.clone(),
            }
        };
        let value = encode_record(&record)?;
        self.meta_store.put(keys::instance_key(&address), value)?;

        let tag_changed = {
            let mut guard = self.instances.lock();
            let topo = &mut *guard;
            let (tag_changed, old_tag, segment_changed) = {
                let Some(existing) = topo.instance_info.get_mut(&address) else {
                    return Err(MetaError::Internal(format!(
                        "instance {address} vanished during update"
                    )));
                };
                existing.capacity = info.capacity;
                existing.used_size = info.used_size;
                if existing.resource_tag != info.resource_tag {
                    let old_tag = existing.resource_tag.clone();
                    existing.resource_tag = info.resource_tag.clone();
                    existing.network_segment_self_defined = info.network_segment.clone();
                    (true, old_tag, false)
                } else if existing.network_segment_self_defined != info.network_segment {
                    existing.network_segment_self_defined = info.network_segment.clone();
                    (false, String::new(), true)
                } else {
                    (false, String::new(), false)
                }
            };
            if tag_changed {
                if let Some(set) = topo.resource_tag_instance_map.get_mut(&old_tag) {
                    set.remove(&address);
                }
                auto_network_segments_division(topo, &old_tag, &self.config);
                topo.resource_tag_instance_map
                    .entry(info.resource_tag.clone())
                    .or_default()
                    .insert(address.clone());
                auto_network_segments_division(topo, &info.resource_tag, &self.config);
            } else if segment_changed {
                auto_network_segments_division(topo, &info.resource_tag, &self.config);
            }
            tag_changed
        };
        if tag_changed {
            self.scheduling.set_resource_tag(&address, &info.resource_tag);
        }
        info!("update instance success: {address}");
        Ok(())
    }

    /// Heartbeat fast path: refresh the timestamp (and used size) in place,
    /// and report whether the heartbeat carries a change that must travel
    /// through the replicated update path instead.
    pub(crate) fn update_instance_info(
        &self,
        info: &InstanceInfo,
        now: Instant,
    ) -> HeartbeatRouting {
        let mut instances = self.instances.lock();
        match instances.instance_info.get_mut(&info.address) {
            None => HeartbeatRouting::NeedsAdd,
            Some(existing) => {
                existing.status.last_heartbeat = now;
                // A live heartbeat revives FAULTY/DEAD stores; MIGRATE is
                // operator-owned and sticks until cleared.
                if existing.status.state != InstanceState::Migrate {
                    existing.status.state = InstanceState::Normal;
                }
                if existing.resource_tag != info.resource_tag
                    || existing.capacity != info.capacity
                    || existing.network_segment_self_defined != info.network_segment
                {
                    HeartbeatRouting::NeedsUpdate
                } else {
                    existing.used_size = info.used_size;
                    HeartbeatRouting::UpToDate
                }
            }
        }
    }

    /// Operator entry: force an instance's health state. Health transitions
    /// are otherwise owned by the monitor; this exists for MIGRATE and for
    /// putting a store back to NORMAL.
    pub fn set_instance_status(
        &self,
        address: &str,
        state: InstanceState,
    ) -> Result<(), MetaError> {
        if !self.fsm.is_leader() {
            return Err(MetaError::NotLeader {
                leader: self.fsm.leader_hint(),
            });
        }
        let mut instances = self.instances.lock();
        match instances.instance_info.get_mut(address) {
            None => Err(MetaError::InvalidInput("instance not exist".into())),
            Some(inst) => {
                info!(
                    "instance {address} status {} -> {state} by operator",
                    inst.status.state
                );
                inst.status.state = state;
                Ok(())
            }
        }
    }

    /// Operator entry: mark an instance MIGRATE and report decommission
    /// progress. `Processing` while the store still hosts regions.
    pub fn set_instance_migrate(&self, address: &str) -> Result<MigrateDecision, MetaError> {
        if !self.fsm.is_leader() {
            return Err(MetaError::NotLeader {
                leader: self.fsm.leader_hint(),
            });
        }
        {
            let mut instances = self.instances.lock();
            let Some(inst) = instances.instance_info.get_mut(address) else {
                return Ok(MigrateDecision::Allowed);
            };
            inst.status.state = InstanceState::Migrate;
        }
        if self.region_manager.region_ids(address).is_empty() {
            Ok(MigrateDecision::Allowed)
        } else {
            Ok(MigrateDecision::Processing)
        }
    }
}
