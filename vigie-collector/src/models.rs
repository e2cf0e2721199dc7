/**
 * MODÈLES VIGIE - Entités du registre et format filaire des rapports
 *
 * RÔLE : Device (identité + métadonnées), LatestStatus (dernier état connu,
 * une seule ligne par appareil) et ReportIn (corps JSON de POST /api/report).
 *
 * COMPATIBILITÉ : les anciens agents envoient certains champs numériques sous
 * forme de chaînes formatées ("12.3") ou vides (""). Le désérialiseur
 * `lenient_f64` accepte les deux formes, une chaîne vide vaut absent.
 */

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// Identité d'un appareil dans le registre
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub hardware: Option<String>,
    pub os: Option<String>,
    /// Fixé à la première apparition, jamais modifié ensuite
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Dernier état connu d'un appareil (écrasé à chaque rapport, pas d'historique)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestStatus {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub network_recv_speed: Option<f64>,
    pub network_send_speed: Option<f64>,
    pub battery_percent: Option<f64>,
    pub battery_plugged: Option<bool>,
    /// Horloge de l'agent (secondes Unix)
    pub report_timestamp: f64,
    /// Horloge du collecteur (secondes Unix)
    pub received_at: Option<f64>,
}

// ===== Format filaire entrant =====

#[derive(Debug, Deserialize)]
pub struct ReportIn {
    pub device: Option<DeviceIn>,
    pub status: Option<StatusIn>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceIn {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub hardware: Option<String>,
    pub os: Option<String>,
    #[serde(default)]
    pub force_update: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusIn {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cpu_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub memory_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub disk_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub network_recv_speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub network_send_speed: Option<f64>,
    #[serde(default)]
    pub battery: Option<BatteryIn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatteryIn {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub percent: Option<f64>,
    #[serde(default)]
    pub plugged: Option<bool>,
}

/// Nombre JSON, chaîne numérique, chaîne vide ou null
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(v)) => Ok(Some(v)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s:?}"))),
    }
}

/// Un appareil est hors ligne si son dernier rapport date de plus de
/// `offline_after_secs`, ou s'il n'a jamais rapporté.
pub fn is_offline(now: f64, last_report: Option<f64>, offline_after_secs: f64) -> bool {
    match last_report {
        Some(ts) => now - ts > offline_after_secs,
        None => true,
    }
}

pub fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accepts_numbers_strings_and_blanks() {
        let status: StatusIn = serde_json::from_str(
            r#"{"cpu_percent": 12, "memory_percent": "45.5", "disk_percent": "",
                "network_recv_speed": "0.3", "network_send_speed": null}"#,
        )
        .unwrap();
        assert_eq!(status.cpu_percent, Some(12.0));
        assert_eq!(status.memory_percent, Some(45.5));
        assert_eq!(status.disk_percent, None);
        assert_eq!(status.network_recv_speed, Some(0.3));
        assert_eq!(status.network_send_speed, None);
        assert!(status.battery.is_none());
    }

    #[test]
    fn status_rejects_garbage_numbers() {
        let res = serde_json::from_str::<StatusIn>(r#"{"cpu_percent": "lots"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn force_update_defaults_to_false() {
        let device: DeviceIn = serde_json::from_str(r#"{"id": "pc", "name": "PC"}"#).unwrap();
        assert!(!device.force_update);
        assert_eq!(device.device_type, None);
    }

    #[test]
    fn offline_threshold() {
        assert!(!is_offline(100.0, Some(80.0), 30.0));
        assert!(!is_offline(100.0, Some(70.0), 30.0));
        assert!(is_offline(100.0, Some(69.9), 30.0));
        assert!(is_offline(100.0, None, 30.0));
    }
}
