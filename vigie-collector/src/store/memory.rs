/**
 * MEMORY STORE - Registre en mémoire (tests, déploiements éphémères)
 *
 * Une entrée DashMap par device_id contient l'appareil ET son statut : le
 * verrou du shard tenu pendant apply_report rend les deux upserts atomiques
 * pour cet appareil, sans bloquer les appareils des autres shards.
 */

use super::{RegistryStore, StoreError};
use crate::models::{Device, LatestStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct DeviceEntry {
    /// Ordre de première apparition
    seq: u64,
    device: Option<Device>,
    status: Option<LatestStatus>,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, DeviceEntry>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn merge_device(&self, entry: &mut DeviceEntry, device: &Device, force_update: bool) {
        match entry.device.as_mut() {
            None => {
                entry.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                entry.device = Some(device.clone());
            }
            Some(existing) if force_update => {
                existing.name = device.name.clone();
                existing.device_type = device.device_type.clone();
                existing.hardware = device.hardware.clone();
                existing.os = device.os.clone();
            }
            Some(_) => {}
        }
    }
}

impl RegistryStore for MemoryStore {
    fn upsert_device(&self, device: &Device, force_update: bool) -> Result<(), StoreError> {
        let mut entry = self.entries.entry(device.device_id.clone()).or_default();
        self.merge_device(&mut entry, device, force_update);
        Ok(())
    }

    fn upsert_latest_status(&self, device_id: &str, status: &LatestStatus) -> Result<(), StoreError> {
        self.entries.entry(device_id.to_string()).or_default().status = Some(status.clone());
        Ok(())
    }

    fn apply_report(
        &self,
        device: &Device,
        force_update: bool,
        status: &LatestStatus,
    ) -> Result<(), StoreError> {
        let mut entry = self.entries.entry(device.device_id.clone()).or_default();
        self.merge_device(&mut entry, device, force_update);
        entry.status = Some(status.clone());
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let mut devices: Vec<(u64, Device)> = self
            .entries
            .iter()
            .filter_map(|e| e.device.clone().map(|d| (e.seq, d)))
            .collect();
        devices.sort_by_key(|(seq, _)| *seq);
        Ok(devices.into_iter().map(|(_, d)| d).collect())
    }

    fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.entries.get(device_id).and_then(|e| e.device.clone()))
    }

    fn get_latest_status(&self, device_id: &str) -> Result<Option<LatestStatus>, StoreError> {
        Ok(self.entries.get(device_id).and_then(|e| e.status.clone()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use std::sync::Arc;

    #[test]
    fn insert_only_keeps_first_metadata() {
        contract::insert_only_keeps_first_metadata(&MemoryStore::new());
    }

    #[test]
    fn force_update_replaces_metadata() {
        contract::force_update_replaces_metadata(&MemoryStore::new());
    }

    #[test]
    fn force_update_inserts_unknown_device() {
        contract::force_update_inserts_unknown_device(&MemoryStore::new());
    }

    #[test]
    fn status_is_replaced_not_merged() {
        contract::status_is_replaced_not_merged(&MemoryStore::new());
    }

    #[test]
    fn replay_is_idempotent() {
        contract::replay_is_idempotent(&MemoryStore::new());
    }

    #[test]
    fn list_in_first_seen_order() {
        contract::list_in_first_seen_order(&MemoryStore::new());
    }

    #[test]
    fn concurrent_devices_do_not_bleed() {
        contract::concurrent_devices_do_not_bleed(Arc::new(MemoryStore::new()));
    }

    #[test]
    fn status_accepted_before_registration() {
        contract::status_accepted_before_registration(&MemoryStore::new());
    }

    #[test]
    fn same_device_reports_are_never_torn() {
        contract::same_device_reports_are_never_torn(Arc::new(MemoryStore::new()));
    }
}
