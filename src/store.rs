//! Preference store
//!
//! A small SQLite-backed key/value store. The only durable state in the
//! system is the last-chosen synthesis voice: read at startup, written on
//! every voice change.

use std::path::Path;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};

use crate::{Error, Result};

/// Connection pool for the preference store
pub type StorePool = Pool<SqliteConnectionManager>;

/// Preference key for the persisted synthesis voice identifier
pub const VOICE_PREF_KEY: &str = "voice.id";

/// Key/value persistence for user preferences
#[derive(Clone)]
pub struct PreferenceStore {
    pool: StorePool,
}

impl PreferenceStore {
    /// Open (or create) a preference store at the given path
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or initialized
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(2)
            .build(manager)
            .map_err(|e| Error::Store(e.to_string()))?;

        let conn = pool.get().map_err(|e| Error::Store(e.to_string()))?;
        init_schema(&conn)?;

        tracing::debug!("preference store opened");
        Ok(Self { pool })
    }

    /// Open an in-memory preference store (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn open_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| Error::Store(e.to_string()))?;

        let conn = pool.get().map_err(|e| Error::Store(e.to_string()))?;
        init_schema(&conn)?;

        Ok(Self { pool })
    }

    /// Read a preference value
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get().map_err(|e| Error::Store(e.to_string()))?;

        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// Write a preference value, replacing any existing one
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Store(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            [key, value, &now],
        )?;

        tracing::debug!(key, "preference written");
        Ok(())
    }

    /// Read the persisted synthesis voice identifier
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn voice(&self) -> Result<Option<String>> {
        self.get(VOICE_PREF_KEY)
    }

    /// Persist the synthesis voice identifier
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn set_voice(&self, voice_id: &str) -> Result<()> {
        self.set(VOICE_PREF_KEY, voice_id)
    }
}

/// Initialize the store schema
fn init_schema(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            PRAGMA user_version = 1;
            ",
        )?;
    }

    Ok(())
}
