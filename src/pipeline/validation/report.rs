use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rules::Severity;
use crate::domain::StepKind;

/// One class of problem, with every record that exhibits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub issue_type: String,
    pub field: String,
    /// Rule that raised the issue; "duplicate_detection" and "outlier_detection" for the
    /// dataset-level checks.
    pub rule: String,
    pub severity: Severity,
    pub count: usize,
    pub record_ids: Vec<String>,
}

/// Dataset-level quality summary. Contains no timestamps so identical input yields an
/// identical report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_records: usize,
    pub overall_score: f64,
    pub field_fill_rates: BTreeMap<String, f64>,
    /// `None` when no record attempted the step.
    pub step_success_rates: BTreeMap<StepKind, Option<f64>>,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub errors_by_field: BTreeMap<String, usize>,
    pub duplicate_record_ids: Vec<String>,
    pub outlier_record_ids: Vec<String>,
    pub top_issues: Vec<QualityIssue>,
    pub recommendations: Vec<String>,
}

impl QualityReport {
    pub fn empty() -> Self {
        Self {
            total_records: 0,
            overall_score: 0.0,
            field_fill_rates: BTreeMap::new(),
            step_success_rates: StepKind::ALL.iter().map(|s| (*s, None)).collect(),
            error_count: 0,
            warning_count: 0,
            info_count: 0,
            errors_by_field: BTreeMap::new(),
            duplicate_record_ids: Vec::new(),
            outlier_record_ids: Vec::new(),
            top_issues: Vec::new(),
            recommendations: vec!["No records to validate.".to_string()],
        }
    }

    /// Mean fill rate across reported fields.
    pub fn completeness(&self) -> f64 {
        if self.field_fill_rates.is_empty() {
            return 0.0;
        }
        self.field_fill_rates.values().sum::<f64>() / self.field_fill_rates.len() as f64
    }

    pub fn step_success_rate(&self, step: StepKind) -> Option<f64> {
        self.step_success_rates.get(&step).copied().flatten()
    }
}
