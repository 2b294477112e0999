//! Batch orchestration of the enrichment steps.
//!
//! Records are pulled from the store in ID order with a keyset cursor, processed with bounded
//! concurrency, and written back one at a time. A step that panics is isolated in its own task
//! and recorded as `Failed(internal, 0)`; a record that cannot be persisted keeps its stored state
//! and stays eligible for the next run.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{HttpClientPort, RecordStorePort};
use crate::config::{AppConfig, PipelineConfig};
use crate::domain::{EnrichmentStatus, RestaurantRecord, StepKind, StepOutcome};
use crate::error::{EnrichError, Result};
use crate::pipeline::steps::{build_steps, EnrichmentStep};

/// Parameters of one pipeline invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRun {
    pub batch_size: usize,
    pub limit: Option<usize>,
    pub include_partial: bool,
    pub worker_concurrency: usize,
    pub skip_concept_classification: bool,
    pub skip_population_analysis: bool,
    pub skip_square_footage: bool,
    pub run_timeout: Option<Duration>,
}

impl BatchRun {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            limit: config.limit,
            include_partial: config.include_partial,
            worker_concurrency: config.worker_concurrency,
            skip_concept_classification: config.skip_concept_classification,
            skip_population_analysis: config.skip_population_analysis,
            skip_square_footage: config.skip_square_footage,
            run_timeout: config.run_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn is_enabled(&self, step: StepKind) -> bool {
        match step {
            StepKind::ConceptClassification => !self.skip_concept_classification,
            StepKind::PopulationAnalysis => !self.skip_population_analysis,
            StepKind::SquareFootage => !self.skip_square_footage,
        }
    }
}

impl Default for BatchRun {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Outcome tallies for one step over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: u64,
    /// Subset of `success` flagged low-confidence
    pub low_confidence: u64,
    pub skipped: u64,
    pub failed: u64,
    pub not_attempted: u64,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Success { low_confidence, .. } => {
                self.success += 1;
                if *low_confidence {
                    self.low_confidence += 1;
                }
            }
            StepOutcome::Skipped { .. } => self.skipped += 1,
            StepOutcome::Failed { .. } => self.failed += 1,
            StepOutcome::NotAttempted => self.not_attempted += 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub records_processed: u64,
    pub status_counts: BTreeMap<EnrichmentStatus, u64>,
    pub step_outcomes: BTreeMap<StepKind, OutcomeCounts>,
    pub external_calls: u64,
    pub persistence_failures: u64,
    pub batches: u64,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl PipelineSummary {
    /// Success / (Success + Failed) for a step this run, `None` when nothing was decided.
    pub fn step_success_rate(&self, step: StepKind) -> Option<f64> {
        let counts = self.step_outcomes.get(&step)?;
        let denominator = counts.success + counts.failed;
        if denominator == 0 {
            None
        } else {
            Some(counts.success as f64 / denominator as f64)
        }
    }

    pub fn status_count(&self, status: EnrichmentStatus) -> u64 {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }
}

/// What happened to one record during a run.
#[derive(Debug)]
struct RecordReport {
    record_id: String,
    status: EnrichmentStatus,
    ran: Vec<(StepKind, StepOutcome)>,
    persisted: bool,
}

pub struct EnrichmentPipeline {
    store: Arc<dyn RecordStorePort>,
    steps: Arc<Vec<EnrichmentStep>>,
    cancel: CancellationToken,
}

impl EnrichmentPipeline {
    /// `steps` must be in priority order; the token should be the one their controllers observe.
    pub fn new(store: Arc<dyn RecordStorePort>, steps: Vec<EnrichmentStep>, cancel: CancellationToken) -> Self {
        Self { store, steps: Arc::new(steps), cancel }
    }

    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn RecordStorePort>,
        http: Arc<dyn HttpClientPort>,
        cancel: CancellationToken,
    ) -> Self {
        let steps = build_steps(config, http, &cancel);
        Self::new(store, steps, cancel)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Calls handed out by each step's rate limiter since the pipeline was built.
    pub fn limiter_calls(&self) -> BTreeMap<StepKind, u64> {
        self.steps.iter().map(|s| (s.kind(), s.limiter().calls())).collect()
    }

    fn total_limiter_calls(&self) -> u64 {
        self.steps.iter().map(|s| s.limiter().calls()).sum()
    }

    pub async fn run(&self, batch: &BatchRun) -> Result<PipelineSummary> {
        let enabled: Vec<StepKind> = self
            .steps
            .iter()
            .map(|s| s.kind())
            .filter(|kind| batch.is_enabled(*kind))
            .collect();
        if enabled.is_empty() {
            return Err(EnrichError::Config("no enrichment step is enabled for this run".into()));
        }
        if batch.batch_size == 0 || batch.worker_concurrency == 0 {
            return Err(EnrichError::Config("batch size and worker concurrency must be positive".into()));
        }

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("enrichment_run", run_id = %run_id);
        self.run_batches(batch, enabled, run_id).instrument(span).await
    }

    async fn run_batches(
        &self,
        batch: &BatchRun,
        enabled: Vec<StepKind>,
        run_id: String,
    ) -> Result<PipelineSummary> {
        let started = tokio::time::Instant::now();
        let calls_before = self.total_limiter_calls();
        let enabled = Arc::new(enabled);
        let mut summary = PipelineSummary { run_id, ..PipelineSummary::default() };

        info!(
            batch_size = batch.batch_size,
            limit = ?batch.limit,
            steps = ?enabled,
            "starting enrichment run"
        );

        let timeout_guard = batch.run_timeout.map(|timeout| {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "run timeout reached, cancelling");
                cancel.cancel();
            })
        });

        let semaphore = Arc::new(Semaphore::new(batch.worker_concurrency));
        let mut cursor: Option<String> = None;
        let mut processed = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let want = match batch.limit {
                Some(limit) if processed >= limit => break,
                Some(limit) => batch.batch_size.min(limit - processed),
                None => batch.batch_size,
            };

            let records = match self
                .store
                .fetch_pending(want, batch.include_partial, cursor.as_deref())
                .await
            {
                Ok(records) => records,
                Err(e) if summary.batches == 0 => {
                    error!("record store unavailable: {}", e);
                    if let Some(guard) = &timeout_guard {
                        guard.abort();
                    }
                    return Err(EnrichError::StoreUnavailable(e.to_string()));
                }
                Err(e) => {
                    error!(batch = summary.batches, "failed to fetch next batch, stopping: {}", e);
                    break;
                }
            };
            if records.is_empty() {
                break;
            }

            summary.batches += 1;
            cursor = records.last().map(|r| r.id.clone());
            debug!(batch = summary.batches, records = records.len(), "processing batch");

            let mut tasks: JoinSet<RecordReport> = JoinSet::new();
            for record in records {
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                let permit = semaphore.clone().acquire_owned().await.ok();
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                processed += 1;

                let store = self.store.clone();
                let steps = self.steps.clone();
                let enabled = enabled.clone();
                tasks.spawn(
                    async move {
                        let _permit = permit;
                        process_record(store, steps, enabled, record).await
                    }
                    .in_current_span(),
                );
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(report) => summary.absorb(report),
                    Err(e) => {
                        error!("record task ended abnormally: {}", e);
                        summary.persistence_failures += 1;
                    }
                }
            }

            if summary.cancelled {
                break;
            }
        }

        if let Some(guard) = timeout_guard {
            guard.abort();
        }

        summary.external_calls = self.total_limiter_calls().saturating_sub(calls_before);
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            records = summary.records_processed,
            batches = summary.batches,
            external_calls = summary.external_calls,
            persistence_failures = summary.persistence_failures,
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed_ms,
            "enrichment run finished"
        );
        Ok(summary)
    }
}

impl PipelineSummary {
    fn absorb(&mut self, report: RecordReport) {
        self.records_processed += 1;
        for (step, outcome) in &report.ran {
            self.step_outcomes.entry(*step).or_default().record(outcome);
            crate::metrics::pipeline::step_outcome(step.as_str(), outcome.label());
        }
        if report.persisted {
            *self.status_counts.entry(report.status).or_insert(0) += 1;
            crate::metrics::pipeline::record_persisted(report.status.as_str());
        } else {
            self.persistence_failures += 1;
            crate::metrics::pipeline::persistence_failure();
            debug!(record_id = %report.record_id, "outcome discarded");
        }
    }
}

/// Run every enabled, unsettled step on a working copy of `record`, then persist it.
async fn process_record(
    store: Arc<dyn RecordStorePort>,
    steps: Arc<Vec<EnrichmentStep>>,
    enabled: Arc<Vec<StepKind>>,
    record: RestaurantRecord,
) -> RecordReport {
    let input = record.input();
    let mut working = record.clone();
    let mut ran = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        let kind = step.kind();
        if !enabled.contains(&kind) || working.outcome(kind).is_settled() {
            continue;
        }
        let outcome = run_step_isolated(steps.clone(), index, input.clone()).await;
        if outcome.is_cancelled() {
            // keep the previous outcome so the record stays eligible for the next run
            debug!(record_id = %record.id, step = %kind, "step interrupted by cancellation");
            ran.push((kind, StepOutcome::NotAttempted));
            continue;
        }
        working.outcomes.insert(kind, outcome.clone());
        ran.push((kind, outcome));
    }

    working.recompute_status(&enabled);
    if ran.iter().any(|(_, outcome)| *outcome != StepOutcome::NotAttempted) {
        working.last_enriched_at = Some(Utc::now());
    }

    let persisted = match store.update(&working).await {
        Ok(()) => true,
        Err(e) => {
            error!(record_id = %record.id, "failed to persist record, outcome discarded: {}", e);
            false
        }
    };

    debug!(record_id = %record.id, status = %working.enrichment_status, steps_run = ran.len(), "record processed");
    RecordReport { record_id: record.id, status: working.enrichment_status, ran, persisted }
}

/// Run one step in its own task so a panic becomes `Failed(internal, 0)`.
async fn run_step_isolated(
    steps: Arc<Vec<EnrichmentStep>>,
    index: usize,
    input: crate::domain::RecordInput,
) -> StepOutcome {
    let record_id = input.id.clone();
    let kind = steps[index].kind();
    let handle = tokio::spawn(async move { steps[index].apply(&input).await }.in_current_span());
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(record_id = %record_id, step = %kind, "step aborted unexpectedly: {}", e);
            StepOutcome::internal_failure()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_run_from_config() {
        let mut config = PipelineConfig::default();
        config.skip_square_footage = true;
        config.limit = Some(25);
        config.run_timeout_secs = Some(60);
        let batch = BatchRun::from_config(&config);
        assert_eq!(batch.limit, Some(25));
        assert_eq!(batch.run_timeout, Some(Duration::from_secs(60)));
        assert!(batch.is_enabled(StepKind::ConceptClassification));
        assert!(!batch.is_enabled(StepKind::SquareFootage));
    }

    #[test]
    fn test_step_success_rate_excludes_skipped() {
        let mut summary = PipelineSummary::default();
        summary.step_outcomes.insert(
            StepKind::PopulationAnalysis,
            OutcomeCounts { success: 2, low_confidence: 0, skipped: 5, failed: 1, not_attempted: 0 },
        );
        summary.step_outcomes.insert(
            StepKind::SquareFootage,
            OutcomeCounts { skipped: 3, ..OutcomeCounts::default() },
        );
        let rate = summary.step_success_rate(StepKind::PopulationAnalysis).unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(summary.step_success_rate(StepKind::SquareFootage), None);
        assert_eq!(summary.step_success_rate(StepKind::ConceptClassification), None);
    }
}
