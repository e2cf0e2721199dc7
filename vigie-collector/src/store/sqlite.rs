/**
 * SQLITE STORE - Registre persistant dans un fichier unique (devices.db)
 *
 * Tables :
 * - device : une ligne par device_id (UNIQUE), created_time fixé à l'insertion
 * - device_status : device_id PRIMARY KEY, donc une seule ligne de statut par appareil
 *
 * Une seule connexion protégée par un Mutex : SQLite sérialise de toute façon
 * les écritures au niveau du fichier. Chaque rapport est appliqué dans une
 * transaction, les lecteurs ne voient jamais un rapport à moitié écrit.
 */

use super::{RegistryStore, StoreError};
use crate::models::{Device, LatestStatus};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS device (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL UNIQUE,
    name TEXT,
    type TEXT,
    hardware TEXT,
    os TEXT,
    created_time TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS device_status (
    device_id TEXT PRIMARY KEY,
    cpu_percent REAL,
    memory_percent REAL,
    disk_percent REAL,
    network_recv_speed REAL,
    network_send_speed REAL,
    timestamp REAL NOT NULL,
    battery_percent REAL,
    battery_plugged BOOLEAN,
    received_at REAL
);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "registry store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn write_device(conn: &Connection, device: &Device, force_update: bool) -> Result<(), StoreError> {
    let created = device
        .created_at
        .format(&Rfc3339)
        .map_err(|e| StoreError::Corrupt {
            device_id: device.device_id.clone(),
            reason: e.to_string(),
        })?;

    let sql = if force_update {
        "INSERT INTO device (device_id, name, type, hardware, os, created_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(device_id) DO UPDATE SET
             name=excluded.name,
             type=excluded.type,
             hardware=excluded.hardware,
             os=excluded.os"
    } else {
        "INSERT OR IGNORE INTO device (device_id, name, type, hardware, os, created_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    };
    conn.execute(
        sql,
        params![
            device.device_id,
            device.name,
            device.device_type,
            device.hardware,
            device.os,
            created
        ],
    )?;
    Ok(())
}

fn write_status(conn: &Connection, device_id: &str, status: &LatestStatus) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO device_status (
             device_id, cpu_percent, memory_percent, disk_percent, network_recv_speed,
             network_send_speed, timestamp, battery_percent, battery_plugged, received_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(device_id) DO UPDATE SET
             cpu_percent=excluded.cpu_percent,
             memory_percent=excluded.memory_percent,
             disk_percent=excluded.disk_percent,
             network_recv_speed=excluded.network_recv_speed,
             network_send_speed=excluded.network_send_speed,
             timestamp=excluded.timestamp,
             battery_percent=excluded.battery_percent,
             battery_plugged=excluded.battery_plugged,
             received_at=excluded.received_at",
        params![
            device_id,
            status.cpu_percent,
            status.memory_percent,
            status.disk_percent,
            status.network_recv_speed,
            status.network_send_speed,
            status.report_timestamp,
            status.battery_percent,
            status.battery_plugged,
            status.received_at
        ],
    )?;
    Ok(())
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<(Device, String)> {
    let created: String = row.get(5)?;
    let device = Device {
        device_id: row.get(0)?,
        name: row.get(1)?,
        device_type: row.get(2)?,
        hardware: row.get(3)?,
        os: row.get(4)?,
        created_at: OffsetDateTime::UNIX_EPOCH,
    };
    Ok((device, created))
}

fn parse_created(mut device: Device, created: String) -> Result<Device, StoreError> {
    device.created_at = OffsetDateTime::parse(&created, &Rfc3339).map_err(|e| StoreError::Corrupt {
        device_id: device.device_id.clone(),
        reason: format!("created_time {created:?}: {e}"),
    })?;
    Ok(device)
}

impl RegistryStore for SqliteStore {
    fn upsert_device(&self, device: &Device, force_update: bool) -> Result<(), StoreError> {
        write_device(&self.conn.lock(), device, force_update)
    }

    fn upsert_latest_status(&self, device_id: &str, status: &LatestStatus) -> Result<(), StoreError> {
        write_status(&self.conn.lock(), device_id, status)
    }

    fn apply_report(
        &self,
        device: &Device,
        force_update: bool,
        status: &LatestStatus,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        write_device(&tx, device, force_update)?;
        write_status(&tx, &device.device_id, status)?;
        tx.commit()?;
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT device_id, name, type, hardware, os, created_time FROM device ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], device_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(device, created)| parse_created(device, created))
            .collect()
    }

    fn get_device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT device_id, name, type, hardware, os, created_time FROM device WHERE device_id=?1",
                params![device_id],
                device_from_row,
            )
            .optional()?;
        row.map(|(device, created)| parse_created(device, created)).transpose()
    }

    fn get_latest_status(&self, device_id: &str) -> Result<Option<LatestStatus>, StoreError> {
        let conn = self.conn.lock();
        let status = conn
            .query_row(
                "SELECT cpu_percent, memory_percent, disk_percent, network_recv_speed,
                        network_send_speed, timestamp, battery_percent, battery_plugged, received_at
                 FROM device_status WHERE device_id=?1",
                params![device_id],
                |row| {
                    Ok(LatestStatus {
                        cpu_percent: row.get(0)?,
                        memory_percent: row.get(1)?,
                        disk_percent: row.get(2)?,
                        network_recv_speed: row.get(3)?,
                        network_send_speed: row.get(4)?,
                        report_timestamp: row.get(5)?,
                        battery_percent: row.get(6)?,
                        battery_plugged: row.get(7)?,
                        received_at: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
