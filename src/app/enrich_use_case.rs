use anyhow::Result;

use crate::app::validate_use_case::ValidateUseCase;
use crate::pipeline::enrichment::{BatchRun, EnrichmentPipeline, PipelineSummary};
use crate::pipeline::validation::QualityReport;

pub struct EnrichRunResult {
    pub summary: PipelineSummary,
    pub report: Option<QualityReport>,
}

/// Runs the enrichment pipeline, then validates the enriched set when a validator is attached.
pub struct EnrichUseCase {
    pipeline: EnrichmentPipeline,
    validate: Option<ValidateUseCase>,
}

impl EnrichUseCase {
    pub fn new(pipeline: EnrichmentPipeline) -> Self {
        Self { pipeline, validate: None }
    }

    pub fn with_validation(mut self, validate: ValidateUseCase) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn pipeline(&self) -> &EnrichmentPipeline {
        &self.pipeline
    }

    pub async fn run(&self, batch: &BatchRun) -> Result<EnrichRunResult> {
        let summary = self.pipeline.run(batch).await?;
        let report = match &self.validate {
            Some(validate) if !summary.cancelled => Some(validate.run().await?),
            _ => None,
        };
        Ok(EnrichRunResult { summary, report })
    }
}
