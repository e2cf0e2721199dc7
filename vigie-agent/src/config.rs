//! Agent configuration
//!
//! Handles:
//! - TOML file lookup (env path, working directory, OS config dir)
//! - Environment overrides on top of the file
//! - Host-derived defaults for the device identity

use crate::metrics::Platform;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_WINDOW_SECS: f64 = 1.0;

/// Fixed identity sent with every report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub id: String,
    pub device_type: String,
    pub hardware: String,
    pub os: String,
}

/// Resolved configuration, built once in `main`
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub server_url: String,
    pub token: String,
    pub report_interval: Duration,
    pub sampling_window: Duration,
    pub platform: Platform,
    pub identity: DeviceIdentity,
}

/// On-disk layout; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub platform: Option<Platform>,
    pub report: ReportSection,
    pub device: DeviceSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub server: Option<String>,
    pub token: Option<String>,
    /// seconds
    pub interval: Option<u64>,
    /// seconds, fractional allowed
    pub sampling_window: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub display_name: Option<String>,
    pub id_name: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub hardware: Option<String>,
    pub os: Option<String>,
}

/// What the host says about itself when nothing is configured
#[derive(Debug, Clone)]
pub struct HostDefaults {
    pub hostname: String,
    pub os: String,
    pub arch: String,
}

impl HostDefaults {
    pub fn detect() -> Self {
        Self {
            hostname: gethostname::gethostname().to_string_lossy().trim().to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config {}: {source}", .path.display())]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("{0}")]
    Invalid(String),
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env { key, value })
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AgentConfig {
    /// Merge file values, environment overrides and host defaults.
    /// The environment wins over the file.
    pub fn resolve<F>(file: FileConfig, env: F, host: &HostDefaults) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let FileConfig { platform, report, device } = file;

        let server_url = non_empty(env("SERVER_URL").or(report.server))
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or(ConfigError::Missing("report.server / SERVER_URL"))?;
        let token = non_empty(env("TOKEN").or(report.token)).ok_or(ConfigError::Missing("report.token / TOKEN"))?;

        let interval_secs = match env("REPORT_INTERVAL") {
            Some(v) => parse_env("REPORT_INTERVAL", v)?,
            None => report.interval.unwrap_or(DEFAULT_INTERVAL_SECS),
        };
        let window_secs = match env("SAMPLING_WINDOW") {
            Some(v) => parse_env("SAMPLING_WINDOW", v)?,
            None => report.sampling_window.unwrap_or(DEFAULT_WINDOW_SECS),
        };
        let platform = match env("AGENT_PLATFORM") {
            Some(v) => v.parse().map_err(|_| ConfigError::Env { key: "AGENT_PLATFORM", value: v })?,
            None => platform.unwrap_or_default(),
        };

        if interval_secs < 1 {
            return Err(ConfigError::Invalid(format!("report interval must be at least 1 s, got {interval_secs}")));
        }
        if !window_secs.is_finite() || window_secs <= 0.0 {
            return Err(ConfigError::Invalid(format!("sampling window must be positive, got {window_secs}")));
        }

        let id = non_empty(env("DEVICE_ID").or(device.id_name)).unwrap_or_else(|| host.hostname.clone());
        let identity = DeviceIdentity {
            name: non_empty(env("DEVICE_NAME").or(device.display_name)).unwrap_or_else(|| host.hostname.clone()),
            device_type: non_empty(env("DEVICE_TYPE").or(device.device_type)).unwrap_or_else(|| "unknown".into()),
            hardware: non_empty(env("DEVICE_HARDWARE").or(device.hardware)).unwrap_or_else(|| host.arch.clone()),
            os: non_empty(env("DEVICE_OS").or(device.os)).unwrap_or_else(|| host.os.clone()),
            id,
        };
        if identity.id.is_empty() {
            return Err(ConfigError::Missing("device.id_name / DEVICE_ID"));
        }

        Ok(Self {
            server_url,
            token,
            report_interval: Duration::from_secs(interval_secs),
            sampling_window: Duration::from_secs_f64(window_secs),
            platform,
            identity,
        })
    }

    /// Load from the first config file found, then the process environment
    pub async fn load() -> Result<Self, ConfigError> {
        let file = match Self::config_file_path(|k| std::env::var(k).ok()) {
            Some(path) => {
                tracing::info!("Loading config from {}", path.display());
                read_file_config(&path).await?
            }
            None => {
                tracing::warn!("No agent.toml found, relying on environment");
                FileConfig::default()
            }
        };
        Self::resolve(file, |k| std::env::var(k).ok(), &HostDefaults::detect())
    }

    /// `$VIGIE_AGENT_CONFIG`, else `./agent.toml`, else `<config_dir>/vigie-agent/agent.toml`
    pub fn config_file_path<F>(env: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(explicit) = non_empty(env("VIGIE_AGENT_CONFIG")) {
            return Some(PathBuf::from(explicit));
        }
        let local = PathBuf::from("agent.toml");
        if local.exists() {
            return Some(local);
        }
        let mut path = dirs::config_dir()?;
        path.push("vigie-agent");
        path.push("agent.toml");
        path.exists().then_some(path)
    }

    /// Token as it may appear in logs
    pub fn masked_token(&self) -> String {
        mask_token(&self.token)
    }
}

pub fn parse_file_config(txt: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    toml::from_str(txt).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

async fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let txt = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    parse_file_config(&txt, path)
}

/// Keep at most the first two characters
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(2).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
