use crate::app::ports::RecordStorePort;
use crate::domain::{EnrichmentStatus, RestaurantRecord};
use crate::error::{EnrichError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// In-memory record store for development and testing.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<Mutex<BTreeMap<String, RestaurantRecord>>>,
    writes: Arc<AtomicU64>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<RestaurantRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.lock() {
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Number of updates that actually changed a stored record.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn get(&self, id: &str) -> Option<RestaurantRecord> {
        self.records.lock().ok().and_then(|map| map.get(id).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, RestaurantRecord>>> {
        self.records
            .lock()
            .map_err(|_| EnrichError::StoreUnavailable("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStorePort for InMemoryRecordStore {
    async fn fetch_pending(
        &self,
        limit: usize,
        include_partial: bool,
        after: Option<&str>,
    ) -> Result<Vec<RestaurantRecord>> {
        let map = self.lock()?;
        let batch = map
            .values()
            .filter(|r| after.map_or(true, |cursor| r.id.as_str() > cursor))
            .filter(|r| match r.enrichment_status {
                EnrichmentStatus::Pending => true,
                EnrichmentStatus::PartiallyEnriched => include_partial,
                _ => false,
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(batch)
    }

    async fn update(&self, record: &RestaurantRecord) -> Result<()> {
        let mut map = self.lock()?;
        if map.get(&record.id) == Some(record) {
            debug!(record_id = %record.id, "update is a no-op");
            return Ok(());
        }
        map.insert(record.id.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn count_by_status(&self) -> Result<BTreeMap<EnrichmentStatus, u64>> {
        let map = self.lock()?;
        let mut counts = BTreeMap::new();
        for record in map.values() {
            *counts.entry(record.enrichment_status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn snapshot(&self) -> Result<Vec<RestaurantRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn insert_many(&self, records: &[RestaurantRecord]) -> Result<usize> {
        let mut map = self.lock()?;
        let mut inserted = 0;
        for record in records {
            if !map.contains_key(&record.id) {
                map.insert(record.id.clone(), record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
