// src/core/topology/keys.rs

//! Key construction for the meta store. Every entity class lives under the
//! cluster identify byte plus its own kind byte; the suffix is empty for the
//! logical-room set, the logical room name for physical records, the address
//! for instances, and the tag-or-address for instance params.

pub const CLUSTER_IDENTIFY: u8 = 0x01;
pub const LOGICAL_CLUSTER_IDENTIFY: u8 = 0x01;
pub const PHYSICAL_CLUSTER_IDENTIFY: u8 = 0x02;
pub const INSTANCE_CLUSTER_IDENTIFY: u8 = 0x03;
pub const INSTANCE_PARAM_CLUSTER_IDENTIFY: u8 = 0x04;

fn kind_prefix(kind: u8) -> Vec<u8> {
    vec![CLUSTER_IDENTIFY, kind]
}

fn kind_key(kind: u8, suffix: &str) -> Vec<u8> {
    let mut key = kind_prefix(kind);
    key.extend_from_slice(suffix.as_bytes());
    key
}

pub fn logical_key() -> Vec<u8> {
    kind_prefix(LOGICAL_CLUSTER_IDENTIFY)
}

pub fn physical_key(logical_room: &str) -> Vec<u8> {
    kind_key(PHYSICAL_CLUSTER_IDENTIFY, logical_room)
}

pub fn instance_key(address: &str) -> Vec<u8> {
    kind_key(INSTANCE_CLUSTER_IDENTIFY, address)
}

pub fn instance_param_key(resource_tag_or_address: &str) -> Vec<u8> {
    kind_key(INSTANCE_PARAM_CLUSTER_IDENTIFY, resource_tag_or_address)
}

pub fn logical_prefix() -> Vec<u8> {
    kind_prefix(LOGICAL_CLUSTER_IDENTIFY)
}

pub fn physical_prefix() -> Vec<u8> {
    kind_prefix(PHYSICAL_CLUSTER_IDENTIFY)
}

pub fn instance_prefix() -> Vec<u8> {
    kind_prefix(INSTANCE_CLUSTER_IDENTIFY)
}

pub fn instance_param_prefix() -> Vec<u8> {
    kind_prefix(INSTANCE_PARAM_CLUSTER_IDENTIFY)
}

/// The suffix of a scanned key, as UTF-8. `None` when the key is shorter
/// than the prefix or the suffix is not valid UTF-8.
pub fn key_suffix<'a>(key: &'a [u8], prefix: &[u8]) -> Option<&'a str> {
    key.strip_prefix(prefix)
        .and_then(|suffix| std::str::from_utf8(suffix).ok())
}
