use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::app::ports::{RecordStorePort, ReportOutputPort};
use crate::pipeline::validation::{QualityReport, ValidationEngine};

/// Scores the full record set held by the store and optionally exports the report.
pub struct ValidateUseCase {
    store: Arc<dyn RecordStorePort>,
    engine: ValidationEngine,
    output: Option<Box<dyn ReportOutputPort>>,
}

impl ValidateUseCase {
    pub fn new(store: Arc<dyn RecordStorePort>, engine: ValidationEngine) -> Self {
        Self { store, engine, output: None }
    }

    pub fn with_output(mut self, output: Box<dyn ReportOutputPort>) -> Self {
        self.output = Some(output);
        self
    }

    pub async fn run(&self) -> Result<QualityReport> {
        let records = self.store.snapshot().await.context("loading records for validation")?;
        let report = self.evaluate_snapshot(&records);
        if let Some(output) = &self.output {
            output.write_report(&report).await.context("writing quality report")?;
        }
        Ok(report)
    }

    /// Scores a caller-supplied snapshot without touching the store.
    pub fn evaluate_snapshot(&self, records: &[crate::domain::RestaurantRecord]) -> QualityReport {
        let report = self.engine.evaluate(records);
        crate::metrics::validation::quality_score(report.overall_score);
        info!(
            records = report.total_records,
            score = report.overall_score,
            errors = report.error_count,
            warnings = report.warning_count,
            "validation finished"
        );
        report
    }
}
