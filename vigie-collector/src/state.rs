use crate::config::CollectorConfig;
use crate::store::SharedStore;
use std::sync::Arc;

/// État unique partagé par les handlers Axum (config figée au démarrage)
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub cfg: Arc<CollectorConfig>,
}

impl AppState {
    pub fn new(store: SharedStore, cfg: CollectorConfig) -> Self {
        Self { store, cfg: Arc::new(cfg) }
    }
}
