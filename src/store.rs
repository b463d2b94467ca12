use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::info;

/// SQLite-backed record store for applied parameters and captured
/// measurements. Rows are append-only; nothing here updates or deletes.
pub struct PwmStore {
    connection: Connection,
}

impl PwmStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open pwm store at {}", path.display()))?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS pwm_set (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                period_ms REAL NOT NULL,
                frequency_hz REAL NOT NULL,
                voltage REAL NOT NULL,
                duty_percent REAL NOT NULL,
                apply_seq INTEGER NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;
        connection.execute(
            "CREATE TABLE IF NOT EXISTS pwm_derived (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                period_ms REAL NOT NULL,
                frequency_hz REAL NOT NULL,
                voltage REAL NOT NULL,
                duty_percent REAL NOT NULL,
                set_id INTEGER NOT NULL REFERENCES pwm_set(id),
                apply_seq INTEGER NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;
        Ok(Self { connection })
    }

    /// Record one applied parameter set; returns the new row id.
    pub fn insert_set_record(
        &self,
        period_ms: f64,
        frequency_hz: f64,
        voltage: f64,
        duty_percent: f64,
        apply_seq: i64,
    ) -> Result<i64> {
        self.connection
            .execute(
                "INSERT INTO pwm_set (period_ms, frequency_hz, voltage, duty_percent, apply_seq)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![period_ms, frequency_hz, voltage, duty_percent, apply_seq],
            )
            .context("failed to insert set record")?;
        let id = self.connection.last_insert_rowid();
        info!("stored set record {} (seq {})", id, apply_seq);
        Ok(id)
    }

    /// Record one captured measurement, referencing the set record that was
    /// in force when the capture happened.
    pub fn insert_derived_record(
        &self,
        period_ms: f64,
        frequency_hz: f64,
        voltage: f64,
        duty_percent: f64,
        set_id: i64,
        apply_seq: i64,
    ) -> Result<i64> {
        self.connection
            .execute(
                "INSERT INTO pwm_derived (period_ms, frequency_hz, voltage, duty_percent, set_id, apply_seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![period_ms, frequency_hz, voltage, duty_percent, set_id, apply_seq],
            )
            .context("failed to insert derived record")?;
        let id = self.connection.last_insert_rowid();
        info!("stored derived record {} referencing set {}", id, set_id);
        Ok(id)
    }

    /// Id of the most recently inserted set record, if any.
    pub fn latest_set_record_id(&self) -> Result<Option<i64>> {
        let id = self
            .connection
            .query_row("SELECT MAX(id) FROM pwm_set", [], |row| row.get(0))
            .context("failed to query latest set record id")?;
        Ok(id)
    }
}
