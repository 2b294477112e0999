use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::app::ports::RecordStorePort;
use crate::domain::{EnrichmentStatus, RestaurantRecord};
use crate::error::{EnrichError, Result};

/// SQLite-backed record store: one row per record with its status, JSON body and content hash.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

impl SqliteRecordStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| EnrichError::StoreUnavailable(format!("{}: {}", path.display(), e)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS restaurants (
                id                 TEXT PRIMARY KEY,
                enrichment_status  TEXT NOT NULL,
                body               TEXT NOT NULL,
                content_hash       TEXT NOT NULL,
                updated_at         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_restaurants_status
                ON restaurants (enrichment_status, id);
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EnrichError::StoreUnavailable("sqlite connection lock poisoned".to_string()))
    }

    /// Parses a stored body. Rows that no longer parse are logged and left out so one bad
    /// row cannot stall a batch or a validation run.
    fn decode(id: &str, body: &str) -> Option<RestaurantRecord> {
        match serde_json::from_str(body) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(record_id = %id, "skipping stored record whose body does not parse: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl RecordStorePort for SqliteRecordStore {
    async fn fetch_pending(
        &self,
        limit: usize,
        include_partial: bool,
        after: Option<&str>,
    ) -> Result<Vec<RestaurantRecord>> {
        let conn = self.conn()?;
        // No LIMIT: rows are read lazily until `limit` of them decode.
        let mut stmt = conn.prepare(
            "SELECT id, body FROM restaurants
             WHERE (enrichment_status = 'pending'
                    OR (?1 AND enrichment_status = 'partially_enriched'))
               AND id > ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![include_partial, after.unwrap_or("")], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            if records.len() >= limit {
                break;
            }
            let (id, body) = row?;
            records.extend(Self::decode(&id, &body));
        }
        Ok(records)
    }

    async fn update(&self, record: &RestaurantRecord) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let hash = content_hash(&body);
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT INTO restaurants (id, enrichment_status, body, content_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    enrichment_status = excluded.enrichment_status,
                    body = excluded.body,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at
                 WHERE restaurants.content_hash <> excluded.content_hash",
                params![
                    record.id,
                    record.enrichment_status.as_str(),
                    body,
                    hash,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| EnrichError::Persistence {
                record_id: record.id.clone(),
                message: e.to_string(),
            })?;
        if changed == 0 {
            debug!(record_id = %record.id, "content unchanged, write skipped");
        }
        Ok(())
    }

    async fn count_by_status(&self) -> Result<BTreeMap<EnrichmentStatus, u64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT enrichment_status, COUNT(*) FROM restaurants GROUP BY enrichment_status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            match EnrichmentStatus::parse(&status) {
                Some(status) => {
                    counts.insert(status, count as u64);
                }
                None => warn!(status = %status, "ignoring unknown status in store"),
            }
        }
        Ok(counts)
    }

    async fn snapshot(&self) -> Result<Vec<RestaurantRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, body FROM restaurants ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, body) = row?;
            records.extend(Self::decode(&id, &body));
        }
        Ok(records)
    }

    async fn insert_many(&self, records: &[RestaurantRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO restaurants (id, enrichment_status, body, content_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO NOTHING",
            )?;
            let now = Utc::now().to_rfc3339();
            for record in records {
                let body = serde_json::to_string(record)?;
                let hash = content_hash(&body);
                inserted += stmt.execute(params![
                    record.id,
                    record.enrichment_status.as_str(),
                    body,
                    hash,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}

impl SqliteRecordStore {
    /// Stored content hash of a record, if present.
    pub fn stored_hash(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT content_hash FROM restaurants WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Timestamp of the last content-changing write, if present.
    pub fn updated_at(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT updated_at FROM restaurants WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}
