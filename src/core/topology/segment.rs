// src/core/topology/segment.rs

//! The network-segmentation engine. For a resource tag, pick the smallest
//! IP-prefix length in [16, 32] that yields enough distinct segments without
//! concentrating too many stores in any one of them, then rebuild the
//! segment -> ordered instance index the selectors walk.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

use super::InstanceTopology;
use crate::config::MetaConfig;

/// The 32-character bit string of an address's IPv4 host part. Empty when
/// the host does not parse as IPv4; such stores collapse into one shared
/// segment label.
pub(crate) fn ip_bit_string(address: &str) -> String {
    let host = ip_of(address);
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            let value = u32::from(ip);
            (0..32)
                .map(|i| if value & (1u32 << (31 - i)) != 0 { '1' } else { '0' })
                .collect()
        }
        Err(_) => String::new(),
    }
}

/// The host part of a `host:port` address.
pub(crate) fn ip_of(address: &str) -> &str {
    address.split(':').next().unwrap_or_default()
}

/// Recompute segment labels and the segment index for one resource tag.
/// Invoked under the instance mutex on every membership change of the tag;
/// O(|tag| * 17), which operator-paced changes can afford.
pub(crate) fn auto_network_segments_division(
    topo: &mut InstanceTopology,
    resource_tag: &str,
    config: &MetaConfig,
) {
    let addresses: Vec<String> = match topo.resource_tag_instance_map.get(resource_tag) {
        Some(set) if !set.is_empty() => set.iter().cloned().collect(),
        _ => {
            warn!("no such resource tag: {resource_tag} or no instance in it");
            topo.network.remove(resource_tag);
            return;
        }
    };

    let total = addresses.len();
    let mut max_stores_in_one_segment =
        total * config.network_segment_max_stores_percent / 100;
    if (total * config.network_segment_max_stores_percent) % 100 != 0 {
        max_stores_in_one_segment += 1;
    }

    let bit_strings: Vec<String> = addresses.iter().map(|a| ip_bit_string(a)).collect();

    let mut prefix = 16u32;
    while prefix <= 32 {
        let mut count_per_segment: HashMap<&str, usize> = HashMap::new();
        let mut max_in_one_segment = 0usize;
        for bits in &bit_strings {
            let label = &bits[..bits.len().min(prefix as usize)];
            let count = count_per_segment.entry(label).or_insert(0);
            *count += 1;
            max_in_one_segment = max_in_one_segment.max(*count);
        }
        if count_per_segment.len() >= config.min_network_segments_per_resource_tag
            && max_in_one_segment <= max_stores_in_one_segment
        {
            break;
        }
        prefix += 1;
    }
    if prefix > 32 {
        prefix = 32;
    }

    // Assign effective labels (operator overrides win) and rebuild the
    // ordered index.
    let mut by_segment: IndexMap<String, Vec<String>> = IndexMap::new();
    for (address, bits) in addresses.iter().zip(bit_strings.iter()) {
        let Some(instance) = topo.instance_info.get_mut(address) else {
            warn!("no such instance {address} while segmenting {resource_tag}");
            continue;
        };
        let derived: String = bits[..bits.len().min(prefix as usize)].to_string();
        instance.network_segment = if instance.network_segment_self_defined.is_empty() {
            derived
        } else {
            instance.network_segment_self_defined.clone()
        };
        by_segment
            .entry(instance.network_segment.clone())
            .or_default()
            .push(address.clone());
    }
    by_segment.sort_keys();

    let net = topo.network.entry(resource_tag.to_string()).or_default();
    net.prefix = prefix;
    net.by_segment = by_segment;
    debug!("finish network segment division for resource tag {resource_tag}, prefix {prefix}");
}
