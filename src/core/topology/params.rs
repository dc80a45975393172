// src/core/topology/params.rs

//! Instance param sets: recognized option lists keyed by resource tag or by
//! instance address, merged on update and served back on store heartbeats.

use std::collections::BTreeMap;
use tracing::info;

use super::{ClusterManager, keys};
use crate::core::MetaError;
use crate::core::types::{InstanceParam, ParamDesc, encode_record};

/// Merge a new param list into an existing one: an entry with the same key
/// overwrites, everything else is preserved.
fn merge_params(old: &InstanceParam, new: &InstanceParam) -> InstanceParam {
    let mut by_key: BTreeMap<String, ParamDesc> = BTreeMap::new();
    for desc in old.params.iter().chain(new.params.iter()) {
        by_key.insert(desc.key.clone(), desc.clone());
    }
    InstanceParam {
        resource_tag_or_address: new.resource_tag_or_address.clone(),
        params: by_key.into_values().collect(),
    }
}

impl ClusterManager {
    pub(crate) fn update_instance_param(
        &self,
        updates: &[InstanceParam],
    ) -> Result<(), MetaError> {
        let merged: Vec<InstanceParam> = {
            let params = self.instance_params.lock();
            updates
                .iter()
                .map(|update| {
                    match params.get(&update.resource_tag_or_address) {
                        Some(existing) => merge_params(existing, update),
                        None => update.clone(),
                    }
                })
                .collect()
        };
        let mut entries = Vec::with_capacity(merged.len());
        for param in &merged {
            entries.push((
                keys::instance_param_key(&param.resource_tag_or_address),
                encode_record(param)?,
            ));
        }
        self.meta_store.put_batch(entries)?;

        let mut params = self.instance_params.lock();
        for param in merged {
            info!("update instance param for {}", param.resource_tag_or_address);
            params.insert(param.resource_tag_or_address.clone(), param);
        }
        Ok(())
    }

    /// The param sets applying to a store: tag scope first, then the
    /// store's own address scope so per-instance settings win.
    pub fn params_for_store(&self, address: &str, resource_tag: &str) -> Vec<InstanceParam> {
        let params = self.instance_params.lock();
        let mut applying = Vec::with_capacity(2);
        if let Some(param) = params.get(resource_tag) {
            applying.push(param.clone());
        }
        if let Some(param) = params.get(address) {
            applying.push(param.clone());
        }
        applying
    }

    /// A tag-scope meta param consumed by the control plane itself, parsed
    /// as an integer.
    pub(crate) fn meta_param_value(&self, scope: &str, key: &str) -> Option<u64> {
        let params = self.instance_params.lock();
        params.get(scope).and_then(|param| {
            param
                .params
                .iter()
                .find(|desc| desc.is_meta_param && desc.key == key)
                .and_then(|desc| desc.value.parse().ok())
        })
    }
}
