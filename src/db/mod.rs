//! SQLite-backed farm store.
//!
//! The database lives at `~/.agro-insight/agro.db` unless the config points
//! elsewhere. It stands in for the farm-management system's relational
//! schema: organizations own properties, properties own plots, and every
//! observation (operations, weather, vegetation index, images) hangs off a
//! plot. The insight engine only reads from it, except for forecast upserts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

pub mod types;
pub use types::*;

pub mod activity;
pub mod farm;
pub mod observations;

/// Connection shared between the assistant, the insight paths and the
/// weather sync. Never hold the guard across an `.await`.
pub type SharedDb = Arc<Mutex<FarmDb>>;

pub struct FarmDb {
    conn: Connection,
}

impl FarmDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Wrap the store for sharing across tasks.
    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at the default path and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // Set after migrations so table rebuilds in future migrations can
        // toggle it off.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.agro-insight/agro.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".agro-insight").join("agro.db"))
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use rusqlite::params;

    use super::FarmDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    /// FK enforcement is disabled so that unit tests can insert rows without
    /// satisfying every foreign key constraint.
    pub fn test_db() -> FarmDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        let db = FarmDb::open_at(path).expect("Failed to open test database");
        db.conn_ref()
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .expect("disable FK for tests");
        db
    }

    /// Organization `org1` with property `prop1`.
    pub fn seed_org(db: &FarmDb) {
        db.conn_ref()
            .execute_batch(
                "INSERT INTO organizations (id, name, created_at)
                 VALUES ('org1', 'Fazenda Boa Vista', '2026-01-01T00:00:00Z');
                 INSERT INTO properties (id, organization_id, name, city, state, total_area)
                 VALUES ('prop1', 'org1', 'Sede', 'Rio Verde', 'GO', 120.0);",
            )
            .expect("seed org");
    }

    pub fn insert_plot(db: &FarmDb, id: &str, name: &str, area: f64, geometry: Option<&str>) {
        db.conn_ref()
            .execute(
                "INSERT INTO plots (id, property_id, name, area, geometry)
                 VALUES (?1, 'prop1', ?2, ?3, ?4)",
                params![id, name, area, geometry],
            )
            .expect("insert plot");
    }

    pub fn insert_crop(db: &FarmDb, plot_id: &str, name: &str) {
        db.conn_ref()
            .execute(
                "INSERT INTO crops (id, plot_id, name, status, planted_on)
                 VALUES (?1, ?2, ?3, 'active', '2026-09-01')",
                params![format!("crop-{}", plot_id), plot_id, name],
            )
            .expect("insert crop");
    }

    pub fn insert_ndvi(db: &FarmDb, plot_id: &str, value: f64, observed_on: &str) {
        db.conn_ref()
            .execute(
                "INSERT INTO vegetation_indices (id, plot_id, index_type, value, observed_on)
                 VALUES (?1, ?2, 'ndvi', ?3, ?4)",
                params![format!("vi-{}-{}", plot_id, observed_on), plot_id, value, observed_on],
            )
            .expect("insert ndvi");
    }

    pub fn insert_operation(db: &FarmDb, plot_id: &str, kind: &str, performed_on: &str) {
        db.conn_ref()
            .execute(
                "INSERT INTO operations (id, plot_id, kind, description, performed_on)
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                params![
                    format!("op-{}-{}-{}", plot_id, kind, performed_on),
                    plot_id,
                    kind,
                    performed_on
                ],
            )
            .expect("insert operation");
    }

    pub fn insert_task(
        db: &FarmDb,
        id: &str,
        title: &str,
        status: &str,
        planned_end: Option<&str>,
    ) {
        db.conn_ref()
            .execute(
                "INSERT INTO tasks (id, organization_id, plot_id, title, status, planned_end)
                 VALUES (?1, 'org1', NULL, ?2, ?3, ?4)",
                params![id, title, status, planned_end],
            )
            .expect("insert task");
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_weather(
        db: &FarmDb,
        plot_id: &str,
        date: &str,
        source: &str,
        precipitation: Option<f64>,
        precipitation_probability: Option<f64>,
        wind_speed: Option<f64>,
        temp_avg: Option<f64>,
    ) {
        db.conn_ref()
            .execute(
                "INSERT INTO weather_records
                    (id, plot_id, date, source, temp_avg, precipitation,
                     precipitation_probability, wind_speed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    format!("wr-{}-{}-{}", plot_id, date, source),
                    plot_id,
                    date,
                    source,
                    temp_avg,
                    precipitation,
                    precipitation_probability,
                    wind_speed,
                    format!("{}T06:00:00Z", date),
                ],
            )
            .expect("insert weather");
    }
}
