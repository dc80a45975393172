// src/core/topology/rooms.rs

//! Logical and physical room operations. Each op validates against the
//! in-memory maps, persists the updated records, and only then swaps the
//! memory state, so a failed write leaves no trace.

use std::collections::BTreeSet;
use tracing::{info, warn};

use super::ClusterManager;
use super::keys;
use crate::core::MetaError;
use crate::core::types::{LogicalRoomSet, PhysicalRoomRecord, encode_record};

impl ClusterManager {
    pub(crate) fn add_logical(&self, add_rooms: &[String]) -> Result<(), MetaError> {
        let record = {
            let rooms = self.rooms.lock();
            let mut names = Vec::with_capacity(add_rooms.len() + rooms.logical_physical_map.len());
            for room in add_rooms {
                if rooms.logical_physical_map.contains_key(room) {
                    warn!("logical room {room} already exists");
                    return Err(MetaError::InvalidInput("logical room already exist".into()));
                }
                names.push(room.clone());
            }
            names.extend(rooms.logical_physical_map.keys().cloned());
            LogicalRoomSet {
                logical_rooms: names,
            }
        };
        let value = encode_record(&record)?;
        self.meta_store.put(keys::logical_key(), value)?;

        let mut rooms = self.rooms.lock();
        for room in add_rooms {
            rooms
                .logical_physical_map
                .insert(room.clone(), BTreeSet::new());
        }
        info!("add logical room success: {add_rooms:?}");
        Ok(())
    }

    pub(crate) fn drop_logical(&self, drop_rooms: &[String]) -> Result<(), MetaError> {
        let record = {
            let rooms = self.rooms.lock();
            for room in drop_rooms {
                match rooms.logical_physical_map.get(room) {
                    None => {
                        warn!("logical room {room} not exist");
                        return Err(MetaError::InvalidInput("logical room not exist".into()));
                    }
                    Some(physicals) if !physicals.is_empty() => {
                        warn!("logical room {room} still has physical rooms");
                        return Err(MetaError::InvalidInput("logical has physical".into()));
                    }
                    Some(_) => {}
                }
            }
            LogicalRoomSet {
                logical_rooms: rooms
                    .logical_physical_map
                    .keys()
                    .filter(|name| !drop_rooms.contains(*name))
                    .cloned()
                    .collect(),
            }
        };
        let value = encode_record(&record)?;
        let delete_keys = drop_rooms.iter().map(|r| keys::physical_key(r)).collect();
        self.meta_store
            .write(vec![(keys::logical_key(), value)], delete_keys)?;

        let mut rooms = self.rooms.lock();
        for room in drop_rooms {
            rooms.logical_physical_map.remove(room);
        }
        info!("drop logical room success: {drop_rooms:?}");
        Ok(())
    }

    pub(crate) fn add_physical(
        &self,
        logical_room: &str,
        add_rooms: &[String],
    ) -> Result<(), MetaError> {
        let record = {
            let rooms = self.rooms.lock();
            let Some(existing) = rooms.logical_physical_map.get(logical_room) else {
                warn!("logical room {logical_room} not exist");
                return Err(MetaError::InvalidInput("logical not exist".into()));
            };
            let mut names = Vec::with_capacity(add_rooms.len() + existing.len());
            for room in add_rooms {
                if rooms.physical_info.contains_key(room) {
                    warn!("physical room {room} already exists");
                    return Err(MetaError::InvalidInput("physical already exist".into()));
                }
                names.push(room.clone());
            }
            names.extend(existing.iter().cloned());
            PhysicalRoomRecord {
                logical_room: logical_room.to_string(),
                physical_rooms: names,
            }
        };
        let value = encode_record(&record)?;
        self.meta_store
            .put(keys::physical_key(logical_room), value)?;

        {
            let mut rooms = self.rooms.lock();
            for room in add_rooms {
                if let Some(physicals) = rooms.logical_physical_map.get_mut(logical_room) {
                    physicals.insert(room.clone());
                }
                rooms
                    .physical_info
                    .insert(room.clone(), logical_room.to_string());
            }
        }
        {
            let mut instances = self.instances.lock();
            for room in add_rooms {
                instances
                    .physical_instance_map
                    .insert(room.clone(), BTreeSet::new());
            }
        }
        info!("add physical room success: {logical_room} -> {add_rooms:?}");
        Ok(())
    }

    pub(crate) fn drop_physical(
        &self,
        logical_room: &str,
        drop_rooms: &[String],
    ) -> Result<(), MetaError> {
        let record = {
            let rooms = self.rooms.lock();
            let Some(existing) = rooms.logical_physical_map.get(logical_room) else {
                warn!("logical room {logical_room} not exist");
                return Err(MetaError::InvalidInput("logical not exist".into()));
            };
            for room in drop_rooms {
                match rooms.physical_info.get(room) {
                    None => {
                        warn!("physical room {room} not exist");
                        return Err(MetaError::InvalidInput("physical not exist".into()));
                    }
                    Some(parent) if parent != logical_room => {
                        warn!("physical room {room} not under logical room {logical_room}");
                        return Err(MetaError::InvalidInput("physical not exist".into()));
                    }
                    Some(_) => {}
                }
            }
            PhysicalRoomRecord {
                logical_room: logical_room.to_string(),
                physical_rooms: existing
                    .iter()
                    .filter(|name| !drop_rooms.contains(*name))
                    .cloned()
                    .collect(),
            }
        };
        {
            let instances = self.instances.lock();
            for room in drop_rooms {
                if instances
                    .physical_instance_map
                    .get(room)
                    .is_some_and(|set| !set.is_empty())
                {
                    warn!("physical room {room} still has instances");
                    return Err(MetaError::InvalidInput("physical has instance".into()));
                }
            }
        }
        let value = encode_record(&record)?;
        self.meta_store
            .put(keys::physical_key(logical_room), value)?;

        {
            let mut rooms = self.rooms.lock();
            for room in drop_rooms {
                rooms.physical_info.remove(room);
                if let Some(physicals) = rooms.logical_physical_map.get_mut(logical_room) {
                    physicals.remove(room);
                }
            }
        }
        {
            let mut instances = self.instances.lock();
            for room in drop_rooms {
                instances.physical_instance_map.remove(room);
            }
        }
        info!("drop physical room success: {logical_room} -> {drop_rooms:?}");
        Ok(())
    }

    /// Reparent a physical room. Both logical-room records go to the meta
    /// store in one batch so a reload can never observe the room in neither
    /// or both parents.
    pub(crate) fn move_physical(
        &self,
        physical_room: &str,
        old_logical_room: &str,
        new_logical_room: &str,
    ) -> Result<(), MetaError> {
        let (old_record, new_record) = {
            let rooms = self.rooms.lock();
            let Some(old_physicals) = rooms.logical_physical_map.get(old_logical_room) else {
                warn!("old logical room {old_logical_room} not exist");
                return Err(MetaError::InvalidInput("logical not exist".into()));
            };
            let Some(new_physicals) = rooms.logical_physical_map.get(new_logical_room) else {
                warn!("new logical room {new_logical_room} not exist");
                return Err(MetaError::InvalidInput("logical not exist".into()));
            };
            match rooms.physical_info.get(physical_room) {
                None => {
                    warn!("physical room {physical_room} not exist");
                    return Err(MetaError::InvalidInput("physical room not exist".into()));
                }
                Some(parent) if parent != old_logical_room => {
                    warn!(
                        "physical room {physical_room} not under logical room {old_logical_room}"
                    );
                    return Err(MetaError::InvalidInput(
                        "physical room not belong to old logical room".into(),
                    ));
                }
                Some(_) => {}
            }
            let old_record = PhysicalRoomRecord {
                logical_room: old_logical_room.to_string(),
                physical_rooms: old_physicals
                    .iter()
                    .filter(|name| name.as_str() != physical_room)
                    .cloned()
                    .collect(),
            };
            let mut moved = new_physicals.iter().cloned().collect::<Vec<_>>();
            moved.push(physical_room.to_string());
            let new_record = PhysicalRoomRecord {
                logical_room: new_logical_room.to_string(),
                physical_rooms: moved,
            };
            (old_record, new_record)
        };
        self.meta_store.put_batch(vec![
            (keys::physical_key(old_logical_room), encode_record(&old_record)?),
            (keys::physical_key(new_logical_room), encode_record(&new_record)?),
        ])?;

        {
            let mut rooms = self.rooms.lock();
            rooms
                .physical_info
                .insert(physical_room.to_string(), new_logical_room.to_string());
            if let Some(physicals) = rooms.logical_physical_map.get_mut(new_logical_room) {
                physicals.insert(physical_room.to_string());
            }
            if let Some(physicals) = rooms.logical_physical_map.get_mut(old_logical_room) {
                physicals.remove(physical_room);
            }
        }
        // Instances follow their physical room's parent.
        let moved_instances = {
            let mut instances = self.instances.lock();
            let addresses = instances
                .physical_instance_map
                .get(physical_room)
                .cloned()
                .unwrap_or_default();
            for address in &addresses {
                if let Some(inst) = instances.instance_info.get_mut(address) {
                    inst.logical_room = new_logical_room.to_string();
                }
            }
            addresses
        };
        for address in &moved_instances {
            self.scheduling
                .set_logical_room(address, new_logical_room);
        }
        info!(
            "move physical room success: {physical_room} from {old_logical_room} to {new_logical_room}"
        );
        Ok(())
    }
}
