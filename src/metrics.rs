//! Pipeline metrics through the `metrics` facade.
//!
//! Nothing here installs a recorder; without one every call is a no-op.

/// Every metric the crate emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricName {
    StepOutcomes,
    ExternalCalls,
    Retries,
    RecordsPersisted,
    PersistenceFailures,
    QualityScore,
}

impl MetricName {
    pub const ALL: [MetricName; 6] = [
        MetricName::StepOutcomes,
        MetricName::ExternalCalls,
        MetricName::Retries,
        MetricName::RecordsPersisted,
        MetricName::PersistenceFailures,
        MetricName::QualityScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::StepOutcomes => "tabc_enrich_step_outcomes_total",
            MetricName::ExternalCalls => "tabc_enrich_external_calls_total",
            MetricName::Retries => "tabc_enrich_retries_total",
            MetricName::RecordsPersisted => "tabc_enrich_records_persisted_total",
            MetricName::PersistenceFailures => "tabc_enrich_persistence_failures_total",
            MetricName::QualityScore => "tabc_enrich_quality_score",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            MetricName::StepOutcomes => "Step outcomes by step and outcome kind",
            MetricName::ExternalCalls => "Calls admitted by a dependency's rate limiter",
            MetricName::Retries => "Retries scheduled after transient failures",
            MetricName::RecordsPersisted => "Records written back, by resulting status",
            MetricName::PersistenceFailures => "Record writes that failed",
            MetricName::QualityScore => "Overall score of the last validation run",
        }
    }
}

/// Registers descriptions with whatever recorder is installed.
pub fn describe_all() {
    for name in MetricName::ALL {
        match name {
            MetricName::QualityScore => ::metrics::describe_gauge!(name.as_str(), name.help()),
            _ => ::metrics::describe_counter!(name.as_str(), name.help()),
        }
    }
}

pub mod steps {
    use super::MetricName;

    pub fn external_call(dependency: &str) {
        ::metrics::counter!(MetricName::ExternalCalls.as_str(), "dependency" => dependency.to_string())
            .increment(1);
    }

    pub fn retry(dependency: &str) {
        ::metrics::counter!(MetricName::Retries.as_str(), "dependency" => dependency.to_string())
            .increment(1);
    }
}

pub mod pipeline {
    use super::MetricName;

    pub fn step_outcome(step: &'static str, outcome: &'static str) {
        ::metrics::counter!(MetricName::StepOutcomes.as_str(), "step" => step, "outcome" => outcome)
            .increment(1);
    }

    pub fn record_persisted(status: &'static str) {
        ::metrics::counter!(MetricName::RecordsPersisted.as_str(), "status" => status).increment(1);
    }

    pub fn persistence_failure() {
        ::metrics::counter!(MetricName::PersistenceFailures.as_str()).increment(1);
    }
}

pub mod validation {
    use super::MetricName;

    pub fn quality_score(score: f64) {
        ::metrics::gauge!(MetricName::QualityScore.as_str()).set(score);
    }
}
