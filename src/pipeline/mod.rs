// Enrichment orchestration and dataset validation

pub mod backoff;
pub mod enrichment;
pub mod rate_limiter;
pub mod steps;
pub mod validation;

pub use enrichment::{BatchRun, EnrichmentPipeline, PipelineSummary};
pub use validation::{QualityReport, ValidationEngine};
