use chrono::{DateTime, Local, TimeZone};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, RwLock};

use super::CacheEntry;
use crate::error::OverviewError;
use crate::event::AggregationResult;
use crate::today::is_today;

/// Identifier the single overview entry is stored under.
pub const CACHE_KEY: &str = "daily_overview";

/// Holds at most one entry; `save` replaces it wholesale.
pub trait CacheStore: Send + Sync {
    fn load(&self, now: &DateTime<Local>) -> Result<Option<CacheEntry>, OverviewError>;
    fn save(&self, entry: &CacheEntry) -> Result<(), OverviewError>;
    fn clear(&self) -> Result<(), OverviewError>;
}

/// In-process slot.
#[derive(Default)]
pub struct MemoryStore {
    slot: RwLock<Option<CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, _now: &DateTime<Local>) -> Result<Option<CacheEntry>, OverviewError> {
        let slot = self
            .slot
            .read()
            .map_err(|_| OverviewError::Store("memory slot poisoned".into()))?;
        Ok(slot.clone())
    }

    fn save(&self, entry: &CacheEntry) -> Result<(), OverviewError> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| OverviewError::Store("memory slot poisoned".into()))?;
        *slot = Some(entry.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), OverviewError> {
        let mut slot = self
            .slot
            .write()
            .map_err(|_| OverviewError::Store("memory slot poisoned".into()))?;
        *slot = None;
        Ok(())
    }
}

/// SQLite-backed slot, so a later process can reuse today's overview.
///
/// Rows written on an earlier day are deleted when read.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, OverviewError> {
        let store = Self { conn: Mutex::new(Connection::open(path)?) };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), OverviewError> {
        self.conn()?.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS overview_cache (
                key TEXT PRIMARY KEY,
                computed_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, OverviewError> {
        self.conn
            .lock()
            .map_err(|_| OverviewError::Store("sqlite connection poisoned".into()))
    }
}

impl CacheStore for SqliteStore {
    fn load(&self, now: &DateTime<Local>) -> Result<Option<CacheEntry>, OverviewError> {
        let conn = self.conn()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT computed_at, payload FROM overview_cache WHERE key = ?1",
                params![CACHE_KEY],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((millis, payload)) = row else {
            return Ok(None);
        };
        let computed_at = Local
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| OverviewError::Store(format!("bad computed_at {}", millis)))?;
        if !is_today(&computed_at, now) {
            conn.execute("DELETE FROM overview_cache WHERE key = ?1", params![CACHE_KEY])?;
            return Ok(None);
        }
        let result: AggregationResult = serde_json::from_str(&payload)?;
        Ok(Some(CacheEntry {
            result: Arc::new(result),
            computed_at,
        }))
    }

    fn save(&self, entry: &CacheEntry) -> Result<(), OverviewError> {
        let payload = serde_json::to_string(entry.result.as_ref())?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO overview_cache (key, computed_at, payload) VALUES (?1, ?2, ?3)",
            params![CACHE_KEY, entry.computed_at.timestamp_millis(), payload],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), OverviewError> {
        self.conn()?
            .execute("DELETE FROM overview_cache WHERE key = ?1", params![CACHE_KEY])?;
        Ok(())
    }
}
