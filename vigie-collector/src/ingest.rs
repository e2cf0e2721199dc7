/**
 * INGESTION DES RAPPORTS - Réconciliation d'un POST /api/report
 *
 * Ordre strict :
 * 1. vérification du token partagé (avant toute lecture du reste du corps)
 * 2. validation des champs obligatoires (device.id, status, timestamp)
 * 3. apply_report : upsert appareil (conditionnel) + upsert statut (remplacement pur)
 *
 * Un rapport est appliqué entièrement ou pas du tout.
 */

use crate::models::{unix_now, Device, LatestStatus, ReportIn};
use crate::store::{RegistryStore, StoreError};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReportRejection {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Malformed report: {0}")]
    Malformed(String),
    #[error("Storage failure")]
    Storage(#[from] StoreError),
}

/// Rapport validé, prêt à être appliqué au registre
#[derive(Debug)]
pub struct AcceptedReport {
    pub device: Device,
    pub force_update: bool,
    pub status: LatestStatus,
}

/// Compare le token présenté au secret partagé
pub fn check_token(body: &Value, expected: &str) -> Result<(), ReportRejection> {
    match body.get("token").and_then(Value::as_str) {
        Some(token) if !expected.is_empty() && token == expected => Ok(()),
        _ => Err(ReportRejection::InvalidToken),
    }
}

pub fn validate(report: ReportIn, received_at: f64) -> Result<AcceptedReport, ReportRejection> {
    let device = report
        .device
        .ok_or_else(|| ReportRejection::Malformed("missing device".into()))?;
    let device_id = device
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ReportRejection::Malformed("missing device.id".into()))?;
    let status = report
        .status
        .ok_or_else(|| ReportRejection::Malformed("missing status".into()))?;
    let timestamp = report
        .timestamp
        .filter(|ts| ts.is_finite())
        .ok_or_else(|| ReportRejection::Malformed("missing timestamp".into()))?;

    let battery = status.battery.unwrap_or_default();

    Ok(AcceptedReport {
        device: Device {
            device_id,
            name: device.name,
            device_type: device.device_type,
            hardware: device.hardware,
            os: device.os,
            created_at: OffsetDateTime::now_utc(),
        },
        force_update: device.force_update,
        status: LatestStatus {
            cpu_percent: status.cpu_percent,
            memory_percent: status.memory_percent,
            disk_percent: status.disk_percent,
            network_recv_speed: status.network_recv_speed,
            network_send_speed: status.network_send_speed,
            battery_percent: battery.percent,
            battery_plugged: battery.plugged,
            report_timestamp: timestamp,
            received_at: Some(received_at),
        },
    })
}

/// Traite un corps de rapport complet : auth, validation, upserts
pub fn handle_report(
    store: &dyn RegistryStore,
    expected_token: &str,
    body: Value,
) -> Result<AcceptedReport, ReportRejection> {
    if let Err(e) = check_token(&body, expected_token) {
        let device_id = body.pointer("/device/id").and_then(Value::as_str).unwrap_or("?");
        warn!(device_id, "report rejected: invalid token");
        return Err(e);
    }

    let report: ReportIn =
        serde_json::from_value(body).map_err(|e| ReportRejection::Malformed(e.to_string()))?;
    let accepted = validate(report, unix_now())?;

    store.apply_report(&accepted.device, accepted.force_update, &accepted.status)?;
    debug!(
        device_id = %accepted.device.device_id,
        force_update = accepted.force_update,
        "report applied"
    );
    Ok(accepted)
}
