use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::domain::{EnrichmentStatus, RestaurantRecord};
use crate::error::{ExternalError, Result};
use crate::pipeline::validation::QualityReport;

/// Persistent record storage consumed by the pipeline and the validation engine.
#[async_trait]
pub trait RecordStorePort: Send + Sync {
    /// Records in `Pending` (and `PartiallyEnriched` when `include_partial`) state, ordered by
    /// ID and strictly after the `after` cursor.
    async fn fetch_pending(
        &self,
        limit: usize,
        include_partial: bool,
        after: Option<&str>,
    ) -> Result<Vec<RestaurantRecord>>;

    /// Idempotent upsert of one record.
    async fn update(&self, record: &RestaurantRecord) -> Result<()>;

    async fn count_by_status(&self) -> Result<BTreeMap<EnrichmentStatus, u64>>;

    async fn snapshot(&self) -> Result<Vec<RestaurantRecord>>;

    /// Insert records that do not exist yet; returns how many were new.
    async fn insert_many(&self, records: &[RestaurantRecord]) -> Result<usize>;
}

#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<HttpGetResult, ExternalError>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self { status: 200, bytes: body.into(), content_type: "text/html".to_string() }
    }

    pub fn with_status(status: u16) -> Self {
        Self { status, bytes: Vec::new(), content_type: "text/plain".to_string() }
    }
}

#[async_trait]
pub trait ReportOutputPort: Send + Sync {
    async fn write_report(&self, report: &QualityReport) -> Result<()>;
}
