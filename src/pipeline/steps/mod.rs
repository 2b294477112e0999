//! The closed set of enrichment steps.
//!
//! Each step sees only a [`RecordInput`], routes every external lookup through its own
//! [`BackoffController`], and always returns a [`StepOutcome`].

pub mod concept;
pub mod population;
pub mod square_footage;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::app::ports::HttpClientPort;
use crate::config::AppConfig;
use crate::domain::{RecordInput, StepFields, StepKind, StepOutcome};
use crate::error::{ErrorKind, ExternalError};
use crate::pipeline::backoff::{BackoffController, CallFailure};
use crate::pipeline::rate_limiter::RateLimiter;

pub use concept::ConceptClassifier;
pub use population::PopulationAnalyzer;
pub use square_footage::SquareFootageScraper;

pub enum EnrichmentStep {
    Concept(ConceptClassifier),
    Population(PopulationAnalyzer),
    SquareFootage(SquareFootageScraper),
}

impl EnrichmentStep {
    pub fn kind(&self) -> StepKind {
        match self {
            EnrichmentStep::Concept(_) => StepKind::ConceptClassification,
            EnrichmentStep::Population(_) => StepKind::PopulationAnalysis,
            EnrichmentStep::SquareFootage(_) => StepKind::SquareFootage,
        }
    }

    pub async fn apply(&self, input: &RecordInput) -> StepOutcome {
        match self {
            EnrichmentStep::Concept(step) => step.apply(input).await,
            EnrichmentStep::Population(step) => step.apply(input).await,
            EnrichmentStep::SquareFootage(step) => step.apply(input).await,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        match self {
            EnrichmentStep::Concept(step) => step.controller().limiter(),
            EnrichmentStep::Population(step) => step.controller().limiter(),
            EnrichmentStep::SquareFootage(step) => step.controller().limiter(),
        }
    }
}

/// Build the enabled steps, in priority order, each with its own controller.
pub fn build_steps(
    config: &AppConfig,
    http: Arc<dyn HttpClientPort>,
    cancel: &CancellationToken,
) -> Vec<EnrichmentStep> {
    config
        .pipeline
        .enabled_steps()
        .into_iter()
        .map(|kind| match kind {
            StepKind::ConceptClassification => EnrichmentStep::Concept(ConceptClassifier::new(
                &config.concept,
                http.clone(),
                BackoffController::from_config("listing", &config.concept.dependency, cancel.clone()),
            )),
            StepKind::PopulationAnalysis => EnrichmentStep::Population(PopulationAnalyzer::new(
                &config.population,
                http.clone(),
                BackoffController::from_config(
                    "demographics",
                    &config.population.dependency,
                    cancel.clone(),
                ),
            )),
            StepKind::SquareFootage => EnrichmentStep::SquareFootage(SquareFootageScraper::new(
                &config.square_footage,
                http.clone(),
                BackoffController::from_config(
                    "property_pages",
                    &config.square_footage.dependency,
                    cancel.clone(),
                ),
            )),
        })
        .collect()
}

/// GET `url` and return the body as text; non-2xx statuses are classified.
pub(crate) async fn fetch_text(http: &dyn HttpClientPort, url: &str) -> Result<String, ExternalError> {
    let response = http.get(url).await?;
    if let Some(err) = ExternalError::from_status(response.status) {
        return Err(err);
    }
    String::from_utf8(response.bytes)
        .map_err(|_| ExternalError::malformed(format!("response from {} is not UTF-8", url)))
}

pub(crate) fn build_url(base: &str, params: &[(&str, &str)]) -> Result<String, ExternalError> {
    reqwest::Url::parse_with_params(base, params)
        .map(|url| url.to_string())
        .map_err(|e| ExternalError::permanent(ErrorKind::ClientError, format!("invalid URL '{}': {}", base, e)))
}

pub(crate) fn success(fields: StepFields, confidence: f64, threshold: f64) -> StepOutcome {
    let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
    StepOutcome::Success { fields, confidence, low_confidence: confidence < threshold }
}

pub(crate) fn failed(failure: CallFailure) -> StepOutcome {
    StepOutcome::Failed { error_kind: failure.error_kind, attempts: failure.attempts }
}

/// A URL that could not be built never reached the dependency.
pub(crate) fn invalid_request(err: ExternalError) -> StepOutcome {
    tracing::warn!(error_kind = %err.kind(), "could not build request: {}", err);
    StepOutcome::Failed { error_kind: err.kind(), attempts: 0 }
}
