/**
 * REGISTRY STORE - Persistance du registre des appareils et du dernier état
 *
 * RÔLE :
 * Interface commune (trait RegistryStore) que le collecteur utilise pour
 * enregistrer les appareils et leur dernier statut, quel que soit le backend.
 *
 * FONCTIONNEMENT :
 * - upsert_device : insertion si inconnu, écrasement des métadonnées seulement si force_update
 * - upsert_latest_status : remplacement pur de l'unique ligne de statut (pas de fusion)
 * - apply_report : les deux upserts, visibles ensemble ou pas du tout
 * - list_devices / get_latest_status : projection pour l'API de lecture
 *
 * BACKENDS :
 * - SqliteStore : fichier unique (devices.db), contrainte UNIQUE sur device_id
 * - MemoryStore : DashMap shardée, verrou par appareil, pas de persistance
 */

pub mod memory;
pub mod sqlite;

use crate::config::{StorageBackend, StorageConf};
use crate::models::{Device, LatestStatus};
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Erreurs possibles lors des opérations sur le registre
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt record for {device_id}: {reason}")]
    Corrupt { device_id: String, reason: String },
    #[error("Blocking store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub trait RegistryStore: Send + Sync {
    /// Insère l'appareil s'il est inconnu ; avec `force_update`, écrase
    /// name/type/hardware/os d'un appareil existant (created_at conservé)
    fn upsert_device(&self, device: &Device, force_update: bool) -> Result<(), StoreError>;

    /// Remplace intégralement la ligne de statut de l'appareil
    fn upsert_latest_status(&self, device_id: &str, status: &LatestStatus) -> Result<(), StoreError>;

    /// Applique un rapport complet de manière atomique
    fn apply_report(
        &self,
        device: &Device,
        force_update: bool,
        status: &LatestStatus,
    ) -> Result<(), StoreError>;

    /// Appareils connus, dans l'ordre de première apparition
    fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError>;

    fn get_latest_status(&self, device_id: &str) -> Result<Option<LatestStatus>, StoreError>;

    /// Nom du backend pour les logs
    fn backend(&self) -> &'static str;
}

pub type SharedStore = Arc<dyn RegistryStore>;

/// Ouvre le backend choisi dans la configuration
pub fn open_store(conf: &StorageConf) -> Result<SharedStore, StoreError> {
    match conf.backend {
        StorageBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&conf.path)?)),
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
