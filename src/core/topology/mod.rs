// src/core/topology/mod.rs

//! The authoritative topology store: logical and physical rooms, store
//! instances, per-scope params, and the derived indexes the selectors walk.
//! All mutations are validated here, proposed through the state machine,
//! and applied in log order with persistence preceding the memory swap.

pub mod instance;
pub mod keys;
pub mod params;
pub mod rooms;
pub mod segment;
pub mod snapshot;

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::MetaConfig;
use crate::core::MetaError;
use crate::core::fsm::MetaStateMachine;
use crate::core::metastore::MetaStore;
use crate::core::region::RegionManager;
use crate::core::scheduling::SchedulingView;
use crate::core::table::TableManager;
use crate::core::types::{Instance, InstanceParam, InstanceState, TopologyOp, TopologySnapshot};

/// Resolves a store address to its physical room when a registration does
/// not name one. Typically backed by a hostname or CMDB lookup.
pub trait HostRoomMapping: Send + Sync {
    fn physical_room_of(&self, address: &str) -> Option<String>;
}

/// The logical <-> physical room maps, guarded by the physical mutex.
#[derive(Debug, Default)]
pub(crate) struct RoomTopology {
    /// logical room -> physical rooms under it.
    pub(crate) logical_physical_map: HashMap<String, BTreeSet<String>>,
    /// physical room -> its parent logical room.
    pub(crate) physical_info: HashMap<String, String>,
}

/// The rolling selector's per-tag cursor. `segment: None` means the tag has
/// never been rolled; the first probe then starts at the first segment's
/// first tier instead of advancing past it.
#[derive(Debug, Default, Clone)]
pub(crate) struct RollingCursor {
    pub(crate) segment: Option<String>,
    pub(crate) position: usize,
}

/// Per-tag network segmentation state: the chosen prefix length and the
/// segment -> ordered instance index, plus the rolling cursor that walks it.
#[derive(Debug, Default)]
pub(crate) struct TagNetwork {
    pub(crate) prefix: u32,
    pub(crate) by_segment: IndexMap<String, Vec<String>>,
    pub(crate) rolling: RollingCursor,
}

/// Instance maps and every index derived from them, guarded by the instance
/// mutex. Selectors hold this lock for the duration of a call.
#[derive(Debug, Default)]
pub(crate) struct InstanceTopology {
    pub(crate) instance_info: HashMap<String, Instance>,
    pub(crate) instance_physical_map: HashMap<String, String>,
    pub(crate) physical_instance_map: HashMap<String, BTreeSet<String>>,
    pub(crate) resource_tag_instance_map: HashMap<String, BTreeSet<String>>,
    pub(crate) network: HashMap<String, TagNetwork>,
}

/// The cluster control plane core.
pub struct ClusterManager {
    pub(crate) config: MetaConfig,
    pub(crate) meta_store: Arc<dyn MetaStore>,
    pub(crate) fsm: Arc<dyn MetaStateMachine>,
    pub(crate) region_manager: Arc<dyn RegionManager>,
    pub(crate) table_manager: Arc<dyn TableManager>,
    pub(crate) room_mapping: Option<Arc<dyn HostRoomMapping>>,

    pub(crate) rooms: Mutex<RoomTopology>,
    pub(crate) instances: Mutex<InstanceTopology>,
    pub(crate) instance_params: Mutex<HashMap<String, InstanceParam>>,
    pub(crate) scheduling: SchedulingView,

    pub(crate) rolling_count: AtomicU64,
    pub(crate) rolling_fallback_count: AtomicU64,
    pub(crate) min_count: AtomicU64,
    pub(crate) min_fallback_count: AtomicU64,
}

impl ClusterManager {
    pub fn new(
        config: MetaConfig,
        meta_store: Arc<dyn MetaStore>,
        fsm: Arc<dyn MetaStateMachine>,
        region_manager: Arc<dyn RegionManager>,
        table_manager: Arc<dyn TableManager>,
    ) -> Self {
        Self {
            config,
            meta_store,
            fsm,
            region_manager,
            table_manager,
            room_mapping: None,
            rooms: Mutex::new(RoomTopology::default()),
            instances: Mutex::new(InstanceTopology::default()),
            instance_params: Mutex::new(HashMap::new()),
            scheduling: SchedulingView::default(),
            rolling_count: AtomicU64::new(0),
            rolling_fallback_count: AtomicU64::new(0),
            min_count: AtomicU64::new(0),
            min_fallback_count: AtomicU64::new(0),
        }
    }

    pub fn with_room_mapping(mut self, mapping: Arc<dyn HostRoomMapping>) -> Self {
        self.room_mapping = Some(mapping);
        self
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    pub fn scheduling_view(&self) -> &SchedulingView {
        &self.scheduling
    }

    /// Validate an operation, check leadership, linearize it through the
    /// state machine, then apply it locally. This is the RPC-facing entry;
    /// consensus followers replay committed operations via [`apply`].
    ///
    /// [`apply`]: ClusterManager::apply
    pub fn submit(&self, op: TopologyOp) -> Result<(), MetaError> {
        Self::validate(&op)?;
        if !self.fsm.is_leader() {
            return Err(MetaError::NotLeader {
                leader: self.fsm.leader_hint(),
            });
        }
        self.fsm.propose(&op)?;
        self.apply(op)
    }

    /// Apply a committed operation to the persistent and in-memory state.
    /// Callers must invoke this from the serialized apply path.
    pub fn apply(&self, op: TopologyOp) -> Result<(), MetaError> {
        match op {
            TopologyOp::AddLogical { rooms } => self.add_logical(&rooms),
            TopologyOp::DropLogical { rooms } => self.drop_logical(&rooms),
            TopologyOp::AddPhysical {
                logical_room,
                rooms,
            } => self.add_physical(&logical_room, &rooms),
            TopologyOp::DropPhysical {
                logical_room,
                rooms,
            } => self.drop_physical(&logical_room, &rooms),
            TopologyOp::MovePhysical {
                physical_room,
                old_logical_room,
                new_logical_room,
            } => self.move_physical(&physical_room, &old_logical_room, &new_logical_room),
            TopologyOp::AddInstance(info) => self.add_instance(info),
            TopologyOp::DropInstance { address } => self.drop_instance(&address),
            TopologyOp::UpdateInstance(info) => self.update_instance(info),
            TopologyOp::UpdateInstanceParam { params } => self.update_instance_param(&params),
        }
    }

    fn validate(op: &TopologyOp) -> Result<(), MetaError> {
        let fail = |msg: &str| Err(MetaError::InvalidInput(msg.to_string()));
        match op {
            TopologyOp::AddLogical { rooms } | TopologyOp::DropLogical { rooms } => {
                if rooms.is_empty() {
                    return fail("no logical room");
                }
            }
            TopologyOp::AddPhysical {
                logical_room,
                rooms,
            }
            | TopologyOp::DropPhysical {
                logical_room,
                rooms,
            } => {
                if logical_room.is_empty() || rooms.is_empty() {
                    return fail("no physical room");
                }
            }
            TopologyOp::MovePhysical {
                physical_room,
                old_logical_room,
                new_logical_room,
            } => {
                if physical_room.is_empty()
                    || old_logical_room.is_empty()
                    || new_logical_room.is_empty()
                {
                    return fail("no move physical request");
                }
            }
            TopologyOp::AddInstance(info) | TopologyOp::UpdateInstance(info) => {
                if info.address.is_empty() {
                    return fail("no instance info");
                }
            }
            TopologyOp::DropInstance { address } => {
                if address.is_empty() {
                    return fail("no instance info");
                }
            }
            TopologyOp::UpdateInstanceParam { params } => {
                if params.is_empty() {
                    return fail("no instance params");
                }
            }
        }
        Ok(())
    }

    /// The read-only topology snapshot served on client heartbeats.
    pub fn topology_snapshot(&self) -> TopologySnapshot {
        let mut snapshot = TopologySnapshot::default();
        {
            let rooms = self.rooms.lock();
            for (logical, physicals) in &rooms.logical_physical_map {
                snapshot
                    .logical_physical_map
                    .insert(logical.clone(), physicals.clone());
            }
        }
        {
            let instances = self.instances.lock();
            for (address, physical) in &instances.instance_physical_map {
                snapshot
                    .instance_physical_map
                    .insert(address.clone(), physical.clone());
            }
        }
        snapshot
    }

    // --- Read-side accessors, mostly for operators and tests ---

    pub fn logical_rooms(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.rooms
            .lock()
            .logical_physical_map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn get_logical_room(&self, address: &str) -> Option<String> {
        self.instances
            .lock()
            .instance_info
            .get(address)
            .map(|inst| inst.logical_room.clone())
    }

    pub fn instance_state(&self, address: &str) -> Option<InstanceState> {
        self.instances
            .lock()
            .instance_info
            .get(address)
            .map(|inst| inst.status.state)
    }

    pub fn instance_record(&self, address: &str) -> Option<crate::core::types::InstanceInfo> {
        self.instances
            .lock()
            .instance_info
            .get(address)
            .map(Instance::record)
    }

    pub fn network_segment_of(&self, address: &str) -> Option<String> {
        self.instances
            .lock()
            .instance_info
            .get(address)
            .map(|inst| inst.network_segment.clone())
    }

    /// The chosen IP-prefix length for a resource tag, if segmented.
    pub fn network_prefix_of(&self, resource_tag: &str) -> Option<u32> {
        self.instances
            .lock()
            .network
            .get(resource_tag)
            .map(|net| net.prefix)
    }

    /// The segment -> instances index of a resource tag, in rolling order.
    pub fn segments_of(&self, resource_tag: &str) -> Vec<(String, Vec<String>)> {
        self.instances
            .lock()
            .network
            .get(resource_tag)
            .map(|net| {
                net.by_segment
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rolling_fallbacks(&self) -> u64 {
        self.rolling_fallback_count.load(Ordering::Relaxed)
    }

    pub fn min_fallbacks(&self) -> u64 {
        self.min_fallback_count.load(Ordering::Relaxed)
    }
}
