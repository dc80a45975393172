// src/core/table.rs

//! The interface to the table manager: replica-distribution policy and the
//! pk-prefix balancing dimension.

use std::collections::HashMap;

/// Table metadata the balancer consults. The pk-prefix key derived here is
/// expected to start with the decimal table id followed by `_`; the balance
/// pass recovers the table id from that prefix.
pub trait TableManager: Send + Sync {
    /// All tables with pk-prefix balancing enabled, and their dimension
    /// (how many leading primary-key columns form the prefix).
    fn pk_prefix_dimensions(&self) -> HashMap<i64, i32>;

    /// Derive the pk-prefix key for a region from its start key. `None`
    /// when the start key cannot be decoded under the dimension.
    fn pk_prefix_key(&self, table_id: i64, dimension: i32, start_key: &[u8]) -> Option<String>;

    /// Whether the table's replica-distribution policy confines balancing
    /// to the reporting store's logical room.
    fn replica_dist_by_logical_room(&self, table_id: i64) -> bool;

    /// Global switch for the pk-prefix balance pass.
    fn can_do_pk_prefix_balance(&self) -> bool;
}
