// src/core/scheduling/select.rs

//! The three placement strategies. All of them walk the tag's segment index
//! under the instance mutex, filter through the shared legality predicate,
//! and read region counts from a pinned scheduling-view snapshot.

use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

use crate::core::scheduling::view::SchedulingInfoMap;
use crate::core::topology::ClusterManager;
use crate::core::topology::segment::ip_of;
use crate::core::types::{Instance, InstanceState};

/// Accumulator for one min-selection walk.
#[derive(Default)]
struct MinWalk {
    /// Instances strictly below the table average.
    candidates: Vec<String>,
    /// The eligible instance with the fewest regions, kept as a fallback.
    min_instance: Option<String>,
    min_region_count: i64,
    /// Set when `average == 0` and a zero-count instance was found.
    short_circuit: Option<String>,
}

impl MinWalk {
    fn new() -> Self {
        Self {
            min_region_count: i64::MAX,
            ..Default::default()
        }
    }

    fn found_nothing(&self) -> bool {
        self.short_circuit.is_none() && self.min_instance.is_none() && self.candidates.is_empty()
    }
}

/// Accumulator for one pk-prefix walk: candidates below both averages, and
/// candidates below only the pk-prefix average.
#[derive(Default)]
struct PkPrefixWalk {
    both_below: Vec<String>,
    pk_prefix_only: Vec<String>,
}

fn random_pick(candidates: &[String]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates[index].clone())
}

impl ClusterManager {
    /// The legality predicate shared by every selector: the candidate must
    /// exist, be NORMAL, carry the tag, have capacity headroom under the
    /// disk ceiling, match the caller's logical room when one is given, and
    /// not collide with the exclusion set (by address, or by IP when
    /// `peer_balance_by_ip` is set).
    fn is_legal_for_select_instance(
        &self,
        instance_info: &HashMap<String, Instance>,
        candidate: &str,
        resource_tag: &str,
        exclude_stores: &BTreeSet<String>,
        logical_room: &str,
    ) -> bool {
        let Some(inst) = instance_info.get(candidate) else {
            return false;
        };
        if !logical_room.is_empty() && inst.logical_room != logical_room {
            return false;
        }
        if inst.status.state != InstanceState::Normal
            || inst.resource_tag != resource_tag
            || inst.capacity == 0
        {
            return false;
        }
        if self.config.peer_balance_by_ip {
            let candidate_ip = ip_of(candidate);
            if exclude_stores.iter().any(|excluded| ip_of(excluded) == candidate_ip) {
                return false;
            }
        } else if exclude_stores.contains(candidate) {
            return false;
        }
        if inst.used_size * 100 / inst.capacity > self.config.disk_used_percent {
            debug!(
                "instance {candidate} left size is not enough, used_size: {}, capacity: {}",
                inst.used_size, inst.capacity
            );
            return false;
        }
        true
    }

    /// The network segments of an exclusion set, used to prefer segments
    /// that do not already host one of the excluded peers.
    fn exclude_segments(
        instance_info: &HashMap<String, Instance>,
        exclude_stores: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        exclude_stores
            .iter()
            .filter_map(|address| instance_info.get(address))
            .map(|inst| inst.network_segment.clone())
            .collect()
    }

    /// Round-robin selection across the tag's network segments. The cursor
    /// advances one step per call, so consecutive calls with similar inputs
    /// spread placements; one full traversal of the tag bounds the walk.
    pub fn select_instance_rolling(
        &self,
        resource_tag: &str,
        exclude_stores: &BTreeSet<String>,
        logical_room: &str,
    ) -> Option<String> {
        let mut guard = self.instances.lock();
        let topo = &mut *guard;
        let instance_count = match topo.resource_tag_instance_map.get(resource_tag) {
            Some(set) if !set.is_empty() => set.len(),
            _ => {
                warn!("there is no instance, resource_tag: {resource_tag}");
                return None;
            }
        };
        self.rolling_count.fetch_add(1, Ordering::Relaxed);

        let filter_by_network = self.fsm.network_segment_balance(resource_tag);
        let exclude_segments = if filter_by_network {
            Self::exclude_segments(&topo.instance_info, exclude_stores)
        } else {
            BTreeSet::new()
        };

        let instance_info = &topo.instance_info;
        let Some(net) = topo.network.get_mut(resource_tag) else {
            warn!("no segment index for resource_tag: {resource_tag}");
            return None;
        };
        let seg_count = net.by_segment.len();
        if seg_count == 0 {
            return None;
        }

        // Advance the cursor one step from its last value. A tag that has
        // never been rolled starts at the first segment's first tier.
        let mut seg_idx = match &net.rolling.segment {
            None => 0,
            Some(segment) => match net.by_segment.get_index_of(segment) {
                Some(index) if index + 1 < seg_count => index + 1,
                _ => {
                    net.rolling.position += 1;
                    0
                }
            },
        };

        let mut selected: Option<(String, String)> = None;
        let mut fallback: Option<(String, usize, String)> = None;
        let mut rolling_times = 0usize;
        let mut any_instance_on_tier = true;
        while rolling_times < instance_count {
            if seg_idx >= seg_count {
                seg_idx = 0;
                if any_instance_on_tier {
                    net.rolling.position += 1;
                } else {
                    net.rolling.position = 0;
                }
                any_instance_on_tier = false;
            }
            let (segment, addresses) = net
                .by_segment
                .get_index(seg_idx)
                .expect("segment index in range");
            let position = net.rolling.position;
            if position < addresses.len() {
                rolling_times += 1;
                any_instance_on_tier = true;
                let candidate = &addresses[position];
                if self.is_legal_for_select_instance(
                    instance_info,
                    candidate,
                    resource_tag,
                    exclude_stores,
                    logical_room,
                ) {
                    if !filter_by_network || !exclude_segments.contains(segment.as_str()) {
                        selected = Some((segment.clone(), candidate.clone()));
                        break;
                    } else if fallback.is_none() {
                        fallback = Some((segment.clone(), position, candidate.clone()));
                    }
                }
            }
            seg_idx += 1;
        }

        let address = match selected {
            Some((segment, address)) => {
                net.rolling.segment = Some(segment);
                address
            }
            None => {
                // No candidate outside the excluded segments; fall back to
                // the first overlapping-but-eligible one we remembered.
                let (segment, position, address) = match fallback {
                    Some(found) => found,
                    None => {
                        warn!(
                            "select instance fail, has no legal store, resource_tag: {resource_tag}"
                        );
                        return None;
                    }
                };
                self.rolling_fallback_count.fetch_add(1, Ordering::Relaxed);
                warn!("rolling fallback: resource_tag: {resource_tag}");
                net.rolling.segment = Some(segment);
                net.rolling.position = position;
                address
            }
        };
        debug!(
            "select instance rolling, resource_tag: {resource_tag}, logical_room: {logical_room}, \
             selected_instance: {address}"
        );
        Some(address)
    }

    fn walk_min_segment(
        &self,
        instance_info: &HashMap<String, Instance>,
        view: &SchedulingInfoMap,
        addresses: &[String],
        resource_tag: &str,
        exclude_stores: &BTreeSet<String>,
        logical_room: &str,
        table_id: i64,
        average_count: i64,
        state: &mut MinWalk,
    ) -> bool {
        for candidate in addresses {
            if !self.is_legal_for_select_instance(
                instance_info,
                candidate,
                resource_tag,
                exclude_stores,
                logical_room,
            ) {
                continue;
            }
            let Some(info) = view.get(candidate) else {
                continue;
            };
            let region_count = info.regions_count_map.get(&table_id).copied().unwrap_or(0);
            if region_count == 0 {
                if average_count == 0 {
                    state.short_circuit = Some(candidate.clone());
                    return true;
                }
                state.candidates.push(candidate.clone());
                continue;
            }
            if average_count != 0 && region_count < average_count {
                state.candidates.push(candidate.clone());
            }
            if region_count < state.min_region_count {
                state.min_instance = Some(candidate.clone());
                state.min_region_count = region_count;
            }
        }
        false
    }

    /// Pick a store whose region count for `table_id` sits below the table
    /// average, uniformly at random; fall back to the overall minimum when
    /// nothing is below average. With `average_count == 0`, any zero-count
    /// store wins immediately.
    pub fn select_instance_min(
        &self,
        resource_tag: &str,
        exclude_stores: &BTreeSet<String>,
        table_id: i64,
        logical_room: &str,
        average_count: i64,
    ) -> Option<String> {
        let selected = {
            let guard = self.instances.lock();
            let topo = &*guard;
            if topo
                .resource_tag_instance_map
                .get(resource_tag)
                .is_none_or(|set| set.is_empty())
            {
                warn!("there is no instance, resource_tag: {resource_tag}");
                return None;
            }
            let Some(net) = topo.network.get(resource_tag) else {
                warn!("no segment index for resource_tag: {resource_tag}");
                return None;
            };
            self.min_count.fetch_add(1, Ordering::Relaxed);
            let view = self.scheduling.read();
            let mut state = MinWalk::new();

            if self.fsm.network_segment_balance(resource_tag) {
                let exclude_segments =
                    Self::exclude_segments(&topo.instance_info, exclude_stores);
                for (segment, addresses) in &net.by_segment {
                    if exclude_segments.contains(segment) {
                        continue;
                    }
                    if self.walk_min_segment(
                        &topo.instance_info,
                        &view,
                        addresses,
                        resource_tag,
                        exclude_stores,
                        logical_room,
                        table_id,
                        average_count,
                        &mut state,
                    ) {
                        break;
                    }
                }
                if state.found_nothing() {
                    warn!("min fallback: resource_tag: {resource_tag}");
                    self.min_fallback_count.fetch_add(1, Ordering::Relaxed);
                    for segment in &exclude_segments {
                        let Some(addresses) = net.by_segment.get(segment) else {
                            continue;
                        };
                        if self.walk_min_segment(
                            &topo.instance_info,
                            &view,
                            addresses,
                            resource_tag,
                            exclude_stores,
                            logical_room,
                            table_id,
                            average_count,
                            &mut state,
                        ) {
                            break;
                        }
                    }
                }
            } else {
                for addresses in net.by_segment.values() {
                    if self.walk_min_segment(
                        &topo.instance_info,
                        &view,
                        addresses,
                        resource_tag,
                        exclude_stores,
                        logical_room,
                        table_id,
                        average_count,
                        &mut state,
                    ) {
                        break;
                    }
                }
            }

            state
                .short_circuit
                .or_else(|| random_pick(&state.candidates))
                .or(state.min_instance)?
        };
        self.scheduling.add_peer_count(&selected, table_id);
        debug!(
            "select instance min, resource_tag: {resource_tag}, table_id: {table_id}, \
             logical_room: {logical_room}, average_count: {average_count}, \
             selected_instance: {selected}"
        );
        Some(selected)
    }

    fn walk_pk_prefix_segment(
        &self,
        instance_info: &HashMap<String, Instance>,
        view: &SchedulingInfoMap,
        addresses: &[String],
        resource_tag: &str,
        exclude_stores: &BTreeSet<String>,
        logical_room: &str,
        table_id: i64,
        pk_prefix_key: &str,
        pk_prefix_average_count: i64,
        table_average_count: i64,
        state: &mut PkPrefixWalk,
    ) {
        for candidate in addresses {
            if !self.is_legal_for_select_instance(
                instance_info,
                candidate,
                resource_tag,
                exclude_stores,
                logical_room,
            ) {
                continue;
            }
            let Some(info) = view.get(candidate) else {
                continue;
            };
            let region_count = info.regions_count_map.get(&table_id).copied().unwrap_or(0);
            let pk_prefix_count = info
                .pk_prefix_region_count
                .get(pk_prefix_key)
                .copied()
                .unwrap_or(0);
            if pk_prefix_count < pk_prefix_average_count && region_count < table_average_count {
                state.both_below.push(candidate.clone());
            } else if pk_prefix_count < pk_prefix_average_count {
                state.pk_prefix_only.push(candidate.clone());
            }
        }
    }

    /// Pick a store below the pk-prefix average, preferring stores that are
    /// also below the table average so the finer dimension never degrades
    /// the coarser one. `need_both_below` rejects the pk-only pool.
    #[allow(clippy::too_many_arguments)]
    pub fn select_instance_min_on_pk_prefix(
        &self,
        resource_tag: &str,
        exclude_stores: &BTreeSet<String>,
        table_id: i64,
        pk_prefix_key: &str,
        logical_room: &str,
        pk_prefix_average_count: i64,
        table_average_count: i64,
        need_both_below_average: bool,
    ) -> Option<String> {
        let selected = {
            let guard = self.instances.lock();
            let topo = &*guard;
            if topo
                .resource_tag_instance_map
                .get(resource_tag)
                .is_none_or(|set| set.is_empty())
            {
                warn!("there is no instance, resource_tag: {resource_tag}");
                return None;
            }
            let Some(net) = topo.network.get(resource_tag) else {
                warn!("no segment index for resource_tag: {resource_tag}");
                return None;
            };
            self.min_count.fetch_add(1, Ordering::Relaxed);
            let view = self.scheduling.read();
            let mut state = PkPrefixWalk::default();

            if self.fsm.network_segment_balance(resource_tag) {
                let exclude_segments =
                    Self::exclude_segments(&topo.instance_info, exclude_stores);
                for (segment, addresses) in &net.by_segment {
                    if exclude_segments.contains(segment) {
                        continue;
                    }
                    self.walk_pk_prefix_segment(
                        &topo.instance_info,
                        &view,
                        addresses,
                        resource_tag,
                        exclude_stores,
                        logical_room,
                        table_id,
                        pk_prefix_key,
                        pk_prefix_average_count,
                        table_average_count,
                        &mut state,
                    );
                }
                if state.both_below.is_empty() {
                    warn!("min fallback: resource_tag: {resource_tag}");
                    self.min_fallback_count.fetch_add(1, Ordering::Relaxed);
                    for segment in &exclude_segments {
                        let Some(addresses) = net.by_segment.get(segment) else {
                            continue;
                        };
                        self.walk_pk_prefix_segment(
                            &topo.instance_info,
                            &view,
                            addresses,
                            resource_tag,
                            exclude_stores,
                            logical_room,
                            table_id,
                            pk_prefix_key,
                            pk_prefix_average_count,
                            table_average_count,
                            &mut state,
                        );
                    }
                }
            } else {
                for addresses in net.by_segment.values() {
                    self.walk_pk_prefix_segment(
                        &topo.instance_info,
                        &view,
                        addresses,
                        resource_tag,
                        exclude_stores,
                        logical_room,
                        table_id,
                        pk_prefix_key,
                        pk_prefix_average_count,
                        table_average_count,
                        &mut state,
                    );
                }
            }

            let mut selected = random_pick(&state.both_below);
            if selected.is_none() && !need_both_below_average {
                selected = random_pick(&state.pk_prefix_only);
            }
            selected?
        };
        self.scheduling
            .add_peer_count_on_pk_prefix(&selected, table_id, pk_prefix_key);
        debug!(
            "select instance min on pk_prefix dimension, resource_tag: {resource_tag}, \
             table_id: {table_id}, logical_room: {logical_room}, \
             pk_prefix_average_count: {pk_prefix_average_count}, \
             table_average_count: {table_average_count}, selected_instance: {selected}"
        );
        Some(selected)
    }
}
