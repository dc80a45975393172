// src/core/fsm.rs

//! The interface to the replicated state machine that linearizes topology
//! mutations, and a standalone switch table for embedders without one.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::MetaError;
use crate::core::types::TopologyOp;

/// The consensus-side contract. `propose` returns once the operation is
/// committed in log order; the caller then applies it locally. The predicate
/// methods gate rebalancing decisions per resource tag.
pub trait MetaStateMachine: Send + Sync {
    fn propose(&self, op: &TopologyOp) -> Result<(), MetaError>;

    fn is_leader(&self) -> bool;

    fn leader_hint(&self) -> Option<String> {
        None
    }

    /// Whether this replica has been leader long enough to trust its view
    /// and emit rebalancing plans.
    fn whether_can_decide(&self) -> bool;

    fn load_balance(&self, resource_tag: &str) -> bool;

    fn network_segment_balance(&self, resource_tag: &str) -> bool;

    fn migrate_enabled(&self, resource_tag: &str) -> bool;
}

/// A `MetaStateMachine` whose propose is a local no-op and whose switches
/// are plain in-process toggles. Suitable for single-replica deployments
/// and tests.
#[derive(Debug, Default)]
pub struct StaticSwitches {
    leader: AtomicBool,
    can_decide: AtomicBool,
    load_balance: DashMap<String, bool>,
    network_segment_balance: DashMap<String, bool>,
    migrate: DashMap<String, bool>,
}

impl StaticSwitches {
    /// A leader that may decide, with per-tag switches at their defaults
    /// (load balance on, segment balance off, migrate on).
    pub fn leader() -> Self {
        let switches = Self::default();
        switches.leader.store(true, Ordering::Relaxed);
        switches.can_decide.store(true, Ordering::Relaxed);
        switches
    }

    pub fn set_leader(&self, on: bool) {
        self.leader.store(on, Ordering::Relaxed);
    }

    pub fn set_can_decide(&self, on: bool) {
        self.can_decide.store(on, Ordering::Relaxed);
    }

    pub fn set_load_balance(&self, resource_tag: &str, on: bool) {
        self.load_balance.insert(resource_tag.to_string(), on);
    }

    pub fn set_network_segment_balance(&self, resource_tag: &str, on: bool) {
        self.network_segment_balance
            .insert(resource_tag.to_string(), on);
    }

    pub fn set_migrate(&self, resource_tag: &str, on: bool) {
        self.migrate.insert(resource_tag.to_string(), on);
    }
}

impl MetaStateMachine for StaticSwitches {
    fn propose(&self, _op: &TopologyOp) -> Result<(), MetaError> {
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::Relaxed)
    }

    fn whether_can_decide(&self) -> bool {
        self.can_decide.load(Ordering::Relaxed)
    }

    fn load_balance(&self, resource_tag: &str) -> bool {
        self.load_balance
            .get(resource_tag)
            .map(|v| *v)
            .unwrap_or(true)
    }

    fn network_segment_balance(&self, resource_tag: &str) -> bool {
        self.network_segment_balance
            .get(resource_tag)
            .map(|v| *v)
            .unwrap_or(false)
    }

    fn migrate_enabled(&self, resource_tag: &str) -> bool {
        self.migrate.get(resource_tag).map(|v| *v).unwrap_or(true)
    }
}
