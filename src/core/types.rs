// src/core/types.rs

//! Shared data types: persisted topology records, in-memory instance state,
//! heartbeat requests and responses, and the serialized mutation set.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use strum_macros::Display;

use crate::core::MetaError;

/// The health state of a store instance. Never persisted: every instance
/// starts NORMAL after a reload and the heartbeat timeouts take it from
/// there. MIGRATE is only ever set by an operator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display,
)]
pub enum InstanceState {
    #[default]
    Normal,
    Faulty,
    Dead,
    Migrate,
}

/// Runtime health of an instance: its state plus the last heartbeat arrival.
#[derive(Debug, Clone, Copy)]
pub struct InstanceStatus {
    pub state: InstanceState,
    pub last_heartbeat: Instant,
}

/// The persisted record for a store instance. `network_segment` here is the
/// operator-chosen override; the derived segment label lives only in memory.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct InstanceInfo {
    pub address: String,
    pub capacity: u64,
    pub used_size: u64,
    pub resource_tag: String,
    pub physical_room: String,
    pub logical_room: String,
    pub network_segment: String,
}

/// The in-memory representation of a store instance.
#[derive(Debug, Clone)]
pub struct Instance {
    pub address: String,
    pub capacity: u64,
    pub used_size: u64,
    pub resource_tag: String,
    pub physical_room: String,
    pub logical_room: String,
    /// Derived IP-prefix label, rebuilt by the segmentation engine.
    pub network_segment: String,
    /// Operator override; empty means use the derived label.
    pub network_segment_self_defined: String,
    pub status: InstanceStatus,
}

impl Instance {
    pub fn from_record(info: &InstanceInfo, now: Instant) -> Self {
        Self {
            address: info.address.clone(),
            capacity: info.capacity,
            used_size: info.used_size,
            resource_tag: info.resource_tag.clone(),
            physical_room: info.physical_room.clone(),
            logical_room: info.logical_room.clone(),
            network_segment: String::new(),
            network_segment_self_defined: info.network_segment.clone(),
            status: InstanceStatus {
                state: InstanceState::Normal,
                last_heartbeat: now,
            },
        }
    }

    /// The persistable projection of this instance.
    pub fn record(&self) -> InstanceInfo {
        InstanceInfo {
            address: self.address.clone(),
            capacity: self.capacity,
            used_size: self.used_size,
            resource_tag: self.resource_tag.clone(),
            physical_room: self.physical_room.clone(),
            logical_room: self.logical_room.clone(),
            network_segment: self.network_segment_self_defined.clone(),
        }
    }
}

/// One key/value tunable inside an instance param set. `is_meta_param`
/// marks options consumed by the meta-service itself rather than forwarded
/// to the store.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct ParamDesc {
    pub key: String,
    pub value: String,
    pub is_meta_param: bool,
}

/// A recognized option set, keyed by either a resource tag or an instance
/// address. Instance scope overrides tag scope when both match a store.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct InstanceParam {
    pub resource_tag_or_address: String,
    pub params: Vec<ParamDesc>,
}

/// Persisted record holding the full set of logical room names under one key.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct LogicalRoomSet {
    pub logical_rooms: Vec<String>,
}

/// Persisted record listing the physical rooms of one logical room.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct PhysicalRoomRecord {
    pub logical_room: String,
    pub physical_rooms: Vec<String>,
}

/// One region replica reported by a store heartbeat.
#[derive(Debug, Clone)]
pub struct PeerReport {
    pub table_id: i64,
    pub region_id: i64,
    pub start_key: Bytes,
    pub is_learner: bool,
}

#[derive(Debug, Clone)]
pub struct StoreHeartbeatRequest {
    pub instance: InstanceInfo,
    pub need_peer_balance: bool,
    pub peers: Vec<PeerReport>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreHeartbeatResponse {
    /// Param sets applying to the reporting store, tag scope first.
    pub instance_params: Vec<InstanceParam>,
}

/// The topology snapshot served to data-plane clients on their pings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologySnapshot {
    pub logical_physical_map: BTreeMap<String, BTreeSet<String>>,
    pub instance_physical_map: BTreeMap<String, String>,
}

/// Answer to an operator's migrate request: `Processing` while the store
/// still hosts regions, `Allowed` once it is unknown or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MigrateDecision {
    Allowed,
    Processing,
}

/// The enumerated mutation set. Operations are validated, proposed through
/// the state machine, and then applied in consensus log order.
#[derive(Debug, Clone)]
pub enum TopologyOp {
    AddLogical { rooms: Vec<String> },
    DropLogical { rooms: Vec<String> },
    AddPhysical { logical_room: String, rooms: Vec<String> },
    DropPhysical { logical_room: String, rooms: Vec<String> },
    MovePhysical {
        physical_room: String,
        old_logical_room: String,
        new_logical_room: String,
    },
    AddInstance(InstanceInfo),
    DropInstance { address: String },
    UpdateInstance(InstanceInfo),
    UpdateInstanceParam { params: Vec<InstanceParam> },
}

pub(crate) fn encode_record<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, MetaError> {
    Ok(bincode::encode_to_vec(value, bincode::config::standard())?)
}

pub(crate) fn decode_record<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, MetaError> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}
