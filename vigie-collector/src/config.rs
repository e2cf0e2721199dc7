use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CollectorConfig {
    pub server: ServerConf,
    pub frontend: FrontendConf,
    pub storage: StorageConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConf {
    pub host: String,
    pub port: u16,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FrontendConf {
    pub title: String,
    /// secondes entre deux rafraîchissements du dashboard
    pub refresh_interval: u64,
    /// secondes sans rapport avant qu'un appareil soit affiché hors ligne
    pub offline_interval: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConf {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid config {path}: {source}")]
    Parse { path: String, source: serde_yaml::Error },
    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },
    #[error("server token must not be empty")]
    EmptyToken,
}

impl Default for ServerConf {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 8080, token: String::new() }
    }
}

impl Default for FrontendConf {
    fn default() -> Self {
        Self { title: "Vigie".into(), refresh_interval: 5, offline_interval: 30 }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self { backend: StorageBackend::Sqlite, path: PathBuf::from("devices.db") }
    }
}

impl CollectorConfig {
    /// Applique les surcharges d'environnement (l'environnement gagne sur le fichier)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COLLECTOR_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("COLLECTOR_PORT") {
            self.server.port = parse_env("COLLECTOR_PORT", v)?;
        }
        if let Some(v) = lookup("COLLECTOR_TOKEN") {
            self.server.token = v;
        }
        if let Some(v) = lookup("COLLECTOR_REFRESH_INTERVAL") {
            self.frontend.refresh_interval = parse_env("COLLECTOR_REFRESH_INTERVAL", v)?;
        }
        if let Some(v) = lookup("COLLECTOR_OFFLINE_INTERVAL") {
            self.frontend.offline_interval = parse_env("COLLECTOR_OFFLINE_INTERVAL", v)?;
        }
        if let Some(v) = lookup("COLLECTOR_DB_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env { key, value })
}

pub fn parse_config(txt: &str, path: &str) -> Result<CollectorConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(CollectorConfig::default());
    }
    serde_yaml::from_str(txt).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
}

/// Fichier YAML (`$VIGIE_COLLECTOR_CONFIG` ou collector.yaml) puis environnement
pub async fn load_config() -> Result<CollectorConfig, ConfigError> {
    let path = std::env::var("VIGIE_COLLECTOR_CONFIG").unwrap_or_else(|_| "collector.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        parse_config(&txt, &path)?
    } else {
        tracing::warn!("no {path}, using default config");
        CollectorConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
