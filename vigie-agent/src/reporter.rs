//! Report delivery to the collector
//!
//! Builds the `POST /api/report` body from a snapshot and the fixed device
//! identity, sends it, and drives the periodic reporting loop. Every failure
//! is logged and the next cycle is the retry: no queue, no backoff.

use crate::config::DeviceIdentity;
use crate::metrics::MetricsSource;
use crate::sampler::{Sampler, StatusSnapshot};
use crate::schedule::Cadence;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wire body of `POST /api/report`
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub token: String,
    pub device: DevicePayload,
    pub status: StatusPayload,
    /// Seconds since the Unix epoch, agent clock
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevicePayload {
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub hardware: String,
    pub os: String,
    pub force_update: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub cpu_percent: Option<f32>,
    pub memory_percent: Option<f32>,
    pub disk_percent: Option<f64>,
    pub network_recv_speed: Option<f64>,
    pub network_send_speed: Option<f64>,
    pub battery: BatteryPayload,
}

/// Always present on the wire; both fields null when there is no battery
#[derive(Debug, Clone, Serialize)]
pub struct BatteryPayload {
    pub percent: Option<f32>,
    pub plugged: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Ack {
    success: bool,
    error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector answered {code}: {body}")]
    Status { code: u16, body: String },
    #[error("collector rejected the report: {}", .0.as_deref().unwrap_or("no reason given"))]
    Rejected(Option<String>),
    #[error("malformed collector response: {0}")]
    MalformedResponse(String),
}

pub struct Reporter {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    identity: DeviceIdentity,
}

impl Reporter {
    pub fn new(server_url: &str, token: &str, identity: DeviceIdentity) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/report", server_url.trim_end_matches('/')),
            token: token.to_string(),
            identity,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Routine reports never force a metadata update
    pub fn build_report(&self, snapshot: StatusSnapshot, timestamp: f64) -> Report {
        let battery = snapshot.battery;
        Report {
            token: self.token.clone(),
            device: DevicePayload {
                name: self.identity.name.clone(),
                id: self.identity.id.clone(),
                device_type: self.identity.device_type.clone(),
                hardware: self.identity.hardware.clone(),
                os: self.identity.os.clone(),
                force_update: false,
            },
            status: StatusPayload {
                cpu_percent: snapshot.cpu_percent,
                memory_percent: snapshot.memory_percent,
                disk_percent: snapshot.disk_percent,
                network_recv_speed: snapshot.network_recv_rate,
                network_send_speed: snapshot.network_send_rate,
                battery: BatteryPayload {
                    percent: battery.and_then(|b| b.percent),
                    plugged: battery.and_then(|b| b.plugged),
                },
            },
            timestamp,
        }
    }

    /// POST one report and interpret the answer
    pub async fn send(&self, report: &Report) -> Result<(), ReportError> {
        let resp = self.client.post(&self.endpoint).json(report).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(ReportError::Status { code: status.as_u16(), body });
        }

        let ack: Ack = serde_json::from_str(&body).map_err(|e| ReportError::MalformedResponse(e.to_string()))?;
        if ack.success {
            Ok(())
        } else {
            Err(ReportError::Rejected(ack.error))
        }
    }

    /// Send and log the outcome; never fails
    pub async fn deliver(&self, report: &Report) -> bool {
        match self.send(report).await {
            Ok(()) => {
                info!("Reported current device status");
                true
            }
            Err(ReportError::Rejected(reason)) => {
                error!("Failed reporting to the server: {}", reason.as_deref().unwrap_or("no reason given"));
                false
            }
            Err(e @ ReportError::Status { .. }) => {
                warn!("{}", e);
                false
            }
            Err(e) => {
                error!("Error reporting: {}", e);
                false
            }
        }
    }
}

pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

/// Sample, report, idle; until shutdown
pub async fn run<S: MetricsSource>(
    mut sampler: Sampler<S>,
    reporter: Reporter,
    cadence: Cadence,
    cancel: CancellationToken,
) {
    info!(
        "Reporting to {} every {:?} (sampling window {:?})",
        reporter.endpoint(),
        cadence.report_interval,
        cadence.sampling_window
    );

    loop {
        let cycle = async {
            let snapshot = sampler.sample().await;
            let report = reporter.build_report(snapshot, unix_timestamp());
            reporter.deliver(&report).await;
        };

        select! {
            _ = cycle => {}
            _ = cancel.cancelled() => break,
        }

        select! {
            _ = tokio::time::sleep(cadence.idle()) => {}
            _ = cancel.cancelled() => break,
        }
    }

    debug!("Reporting loop stopped");
}
