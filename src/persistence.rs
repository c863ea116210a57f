//! Database persistence layer for DeltaLedger

use crate::error::{LedgerError, Result};
use crate::store::{
    decode_counter, CountedBuild, CursorTracker, Entry, KeyRange, KvStore, WriteBatch,
};
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed store. Keys and values are stored as BLOBs so ordering is
/// plain byte order, matching the in-memory store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    cursors: CursorTracker,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| LedgerError::Store(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS state (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| LedgerError::Store(format!("Failed to create state table: {}", e)))?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
            cursors: CursorTracker::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Store("Mutex poisoned".to_string()))
    }
}

fn put_row(conn: &Connection, key: &str, value: &[u8]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO state (key, value) VALUES (?1, ?2)",
        params![key.as_bytes(), value],
    )
    .map_err(|e| LedgerError::Store(format!("Failed to put state: {}", e)))?;
    Ok(())
}

fn get_row(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT value FROM state WHERE key = ?1",
        params![key.as_bytes()],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .optional()
    .map_err(|e| LedgerError::Store(format!("Failed to read state: {}", e)))
}

fn decode_key(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| LedgerError::Store(format!("Stored key is not valid UTF-8: {}", e)))
}

impl KvStore for SqliteStore {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        get_row(&conn, key)
    }

    fn put_state(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.lock()?;
        put_row(&conn, key, value)
    }

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
        let conn_guard = self.lock()?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(|e| LedgerError::Store(format!("Failed to start transaction: {}", e)))?;

        for (key, value) in batch.iter() {
            put_row(&tx, key, value)?;
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()
            .map_err(|e| LedgerError::Store(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    fn apply_counted(&self, counter_key: &str, build: &mut CountedBuild<'_>) -> Result<()> {
        let conn_guard = self.lock()?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(|e| LedgerError::Store(format!("Failed to start transaction: {}", e)))?;

        let current = decode_counter(counter_key, get_row(&tx, counter_key)?)?;
        let (batch, next) = build(current)?;
        for (key, value) in batch.iter() {
            put_row(&tx, key, value)?;
        }
        if next != current {
            put_row(&tx, counter_key, next.to_string().as_bytes())?;
        }

        tx.commit()
            .map_err(|e| LedgerError::Store(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    fn read_page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let conn_guard = self.lock()?;
        let mut stmt = conn_guard
            .prepare_cached(
                "SELECT key, value FROM state
                 WHERE key >= ?1 AND key < ?2 AND (?3 IS NULL OR key > ?3)
                 ORDER BY key ASC
                 LIMIT ?4",
            )
            .map_err(|e| LedgerError::Store(format!("Failed to prepare range query: {}", e)))?;

        let rows = stmt
            .query_map(
                params![
                    range.start.as_bytes(),
                    range.end.as_bytes(),
                    after.map(str::as_bytes),
                    limit as i64,
                ],
                |row| {
                    let key: Vec<u8> = row.get(0)?;
                    let value: Vec<u8> = row.get(1)?;
                    Ok((key, value))
                },
            )
            .map_err(|e| LedgerError::Store(format!("Failed to query range: {}", e)))?;

        let mut page = Vec::new();
        for row_result in rows {
            let (key, value) = row_result
                .map_err(|e| LedgerError::Store(format!("Failed to read row: {}", e)))?;
            page.push((decode_key(key)?, value));
        }
        Ok(page)
    }

    fn cursors(&self) -> &CursorTracker {
        &self.cursors
    }
}

/// Simple in-memory store useful for tests and ephemeral runs. Clones share
/// the same underlying map.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    cursors: CursorTracker,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for InMemoryStore {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put_state(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn apply_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut entries = self.entries.write();
        for (key, value) in batch.iter() {
            entries.insert(key.to_string(), value.to_vec());
        }
        Ok(())
    }

    fn apply_counted(&self, counter_key: &str, build: &mut CountedBuild<'_>) -> Result<()> {
        let mut entries = self.entries.write();
        let current = decode_counter(counter_key, entries.get(counter_key).cloned())?;
        let (batch, next) = build(current)?;
        for (key, value) in batch.iter() {
            entries.insert(key.to_string(), value.to_vec());
        }
        if next != current {
            entries.insert(counter_key.to_string(), next.to_string().into_bytes());
        }
        Ok(())
    }

    fn read_page(
        &self,
        range: &KeyRange,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        let lower = match after {
            Some(after) if after >= range.start.as_str() => after,
            _ => range.start.as_str(),
        };
        if lower >= range.end.as_str() {
            return Ok(Vec::new());
        }
        let lower_bound = match after {
            Some(after) if after >= range.start.as_str() => Bound::Excluded(lower),
            _ => Bound::Included(lower),
        };

        let entries = self.entries.read();
        let page = entries
            .range::<str, _>((lower_bound, Bound::Excluded(range.end.as_str())))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(page)
    }

    fn cursors(&self) -> &CursorTracker {
        &self.cursors
    }
}
