//! Dataset quality scoring over enriched restaurant records.
//!
//! [`ValidationEngine::evaluate`] is a pure function of the records, the rule set and the
//! scoring configuration.

pub mod report;
pub mod rules;

pub use report::{QualityIssue, QualityReport};
pub use rules::{default_rules, FieldValue, RecordField, RuleCheck, RuleResult, Severity, ValidationRule};

use std::collections::{BTreeMap, BTreeSet};

use crate::config::ValidationConfig;
use crate::domain::{RestaurantRecord, StepKind, StepOutcome};

pub struct ValidationEngine {
    rules: Vec<ValidationRule>,
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(rules: Vec<ValidationRule>, config: ValidationConfig) -> Self {
        Self { rules, config }
    }

    pub fn with_default_rules(config: ValidationConfig) -> Self {
        Self::new(default_rules(&config), config)
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    pub fn evaluate(&self, records: &[RestaurantRecord]) -> QualityReport {
        evaluate(records, &self.rules, &self.config)
    }
}

/// Scores a record set. Records are visited in ID order so the report does not depend on
/// the order the store returned them in.
pub fn evaluate(
    records: &[RestaurantRecord],
    rules: &[ValidationRule],
    config: &ValidationConfig,
) -> QualityReport {
    if records.is_empty() {
        return QualityReport::empty();
    }

    let mut sorted: Vec<&RestaurantRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let total = sorted.len();

    let field_fill_rates = fill_rates(&sorted);
    let step_success_rates = step_success_rates(&sorted);

    let mut issues = Vec::new();
    let (mut error_count, mut warning_count, mut info_count) = (0, 0, 0);
    let mut errors_by_field: BTreeMap<String, usize> = BTreeMap::new();

    for rule in rules {
        let failing: Vec<String> = sorted
            .iter()
            .filter(|r| rule.check.evaluate(r) == RuleResult::Fail)
            .map(|r| r.id.clone())
            .collect();
        if failing.is_empty() {
            continue;
        }
        match rule.severity {
            Severity::Error => {
                error_count += failing.len();
                *errors_by_field.entry(rule.check.field_name().to_string()).or_insert(0) += failing.len();
            }
            Severity::Warning => warning_count += failing.len(),
            Severity::Info => info_count += failing.len(),
        }
        issues.push(QualityIssue {
            issue_type: rule.check.issue_type().to_string(),
            field: rule.check.field_name().to_string(),
            rule: rule.name.clone(),
            severity: rule.severity,
            count: failing.len(),
            record_ids: failing,
        });
    }

    let duplicate_record_ids = duplicates(&sorted);
    if !duplicate_record_ids.is_empty() {
        warning_count += duplicate_record_ids.len();
        issues.push(QualityIssue {
            issue_type: "duplicate".to_string(),
            field: "multiple".to_string(),
            rule: "duplicate_detection".to_string(),
            severity: Severity::Warning,
            count: duplicate_record_ids.len(),
            record_ids: duplicate_record_ids.clone(),
        });
    }

    let mut outlier_ids = BTreeSet::new();
    for field in RecordField::OUTLIER_FIELDS {
        let ids = outliers(&sorted, field, config);
        if ids.is_empty() {
            continue;
        }
        info_count += ids.len();
        outlier_ids.extend(ids.iter().cloned());
        issues.push(QualityIssue {
            issue_type: "outlier".to_string(),
            field: field.as_str().to_string(),
            rule: "outlier_detection".to_string(),
            severity: Severity::Info,
            count: ids.len(),
            record_ids: ids,
        });
    }
    let outlier_record_ids: Vec<String> = outlier_ids.into_iter().collect();

    issues.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.field.cmp(&b.field))
            .then_with(|| a.issue_type.cmp(&b.issue_type))
            .then_with(|| a.rule.cmp(&b.rule))
    });
    issues.truncate(config.top_n);

    let overall_score = overall_score(&field_fill_rates, &step_success_rates, config);

    let mut report = QualityReport {
        total_records: total,
        overall_score,
        field_fill_rates,
        step_success_rates,
        error_count,
        warning_count,
        info_count,
        errors_by_field,
        duplicate_record_ids,
        outlier_record_ids,
        top_issues: issues,
        recommendations: Vec::new(),
    };
    report.recommendations = recommendations(&report);
    report
}

fn fill_rates(records: &[&RestaurantRecord]) -> BTreeMap<String, f64> {
    let total = records.len() as f64;
    RecordField::FILL_RATE_FIELDS
        .iter()
        .map(|field| {
            let present = records.iter().filter(|r| field.value(r).is_present()).count();
            (field.as_str().to_string(), present as f64 / total)
        })
        .collect()
}

fn step_success_rates(records: &[&RestaurantRecord]) -> BTreeMap<StepKind, Option<f64>> {
    StepKind::ALL
        .iter()
        .map(|step| {
            let (mut success, mut failed) = (0usize, 0usize);
            for record in records {
                match record.outcome(*step) {
                    StepOutcome::Success { .. } => success += 1,
                    StepOutcome::Failed { .. } => failed += 1,
                    _ => {}
                }
            }
            let attempted = success + failed;
            let rate = (attempted > 0).then(|| success as f64 / attempted as f64);
            (*step, rate)
        })
        .collect()
}

/// Weighted average of mean fill rate and mean step success rate. A component with no data
/// drops out and the remaining weights are renormalized.
fn overall_score(
    fill_rates: &BTreeMap<String, f64>,
    step_rates: &BTreeMap<StepKind, Option<f64>>,
    config: &ValidationConfig,
) -> f64 {
    let mean = |values: Vec<f64>| {
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };
    let components = [
        (mean(fill_rates.values().copied().collect()), config.fill_rate_weight),
        (mean(step_rates.values().filter_map(|r| *r).collect()), config.step_success_weight),
    ];

    let (weighted, weights) = components
        .iter()
        .filter_map(|(value, weight)| value.map(|v| (v * weight, *weight)))
        .fold((0.0, 0.0), |(s, w), (v, wt)| (s + v, w + wt));
    if weights <= 0.0 {
        return 0.0;
    }
    (weighted / weights).clamp(0.0, 1.0)
}

fn normalize(value: &Option<String>) -> Option<String> {
    let joined = value
        .as_deref()?
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!joined.is_empty()).then_some(joined)
}

/// IDs of every record sharing normalized name, address and city with another record.
fn duplicates(records: &[&RestaurantRecord]) -> Vec<String> {
    let mut groups: BTreeMap<(String, String, String), Vec<&str>> = BTreeMap::new();
    for record in records {
        let (Some(name), Some(address)) = (normalize(&record.location_name), normalize(&record.location_address))
        else {
            continue;
        };
        let city = normalize(&record.location_city).unwrap_or_default();
        groups.entry((name, address, city)).or_default().push(&record.id);
    }

    let mut ids: Vec<String> = groups
        .into_values()
        .filter(|ids| ids.len() > 1)
        .flatten()
        .map(str::to_string)
        .collect();
    ids.sort();
    ids
}

/// Linear-interpolated quantile over sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = (sorted.len() - 1) as f64 * q;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

fn outliers(records: &[&RestaurantRecord], field: RecordField, config: &ValidationConfig) -> Vec<String> {
    let values: Vec<(&str, f64)> = records
        .iter()
        .filter_map(|r| match field.value(r) {
            FieldValue::Number(n) => Some((r.id.as_str(), n)),
            _ => None,
        })
        .collect();
    if values.len() <= config.outlier_min_values {
        return Vec::new();
    }

    let mut sorted: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - config.outlier_iqr_multiplier * iqr;
    let upper = q3 + config.outlier_iqr_multiplier * iqr;

    values
        .into_iter()
        .filter(|(_, v)| *v < lower || *v > upper)
        .map(|(id, _)| id.to_string())
        .collect()
}

fn recommendations(report: &QualityReport) -> Vec<String> {
    let total = report.total_records as f64;
    let mut out = Vec::new();

    if report.overall_score < 0.7 {
        out.push("Overall data quality is low. Review data collection and enrichment sources.".to_string());
    }
    if report.completeness() < 0.8 {
        out.push("Data completeness is below 80%. Focus on collecting the missing key fields.".to_string());
    }
    for (field, errors) in &report.errors_by_field {
        if *errors as f64 / total > 0.1 {
            out.push(format!("High error rate in field '{}'. Consider data cleansing or a source review.", field));
        }
    }
    if report.outlier_record_ids.len() as f64 / total > 0.05 {
        out.push("High number of outliers detected. Review data for anomalies.".to_string());
    }
    for (step, rate) in &report.step_success_rates {
        if matches!(rate, Some(r) if *r < 0.5) {
            out.push(format!("Step '{}' fails for most attempted records. Check its external source.", step));
        }
    }

    if out.is_empty() {
        out.push("Data quality is good. Continue monitoring for consistency.".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PopulationFields, StepFields};
    use crate::error::ErrorKind;

    fn record(id: &str, name: &str, address: &str, city: &str) -> RestaurantRecord {
        let mut r = RestaurantRecord::new(id);
        r.location_name = Some(name.to_string());
        r.location_address = Some(address.to_string());
        r.location_city = Some(city.to_string());
        r
    }

    fn population(pop: u64) -> StepOutcome {
        StepOutcome::Success {
            fields: StepFields::Population(PopulationFields {
                latitude: 29.76,
                longitude: -95.37,
                population_1_mile: pop,
                population_3_mile: pop * 9,
                population_5_mile: pop * 25,
                population_10_mile: pop * 100,
                drinking_age_1_mile: pop * 3 / 4,
                drinking_age_3_mile: pop * 27 / 4,
                drinking_age_5_mile: pop * 75 / 4,
                drinking_age_10_mile: pop * 75,
                median_income: Some(52_000.0),
                median_age: Some(34.0),
                average_household_size: Some(2.4),
                source: "zip_estimation".to_string(),
            }),
            confidence: 0.8,
            low_confidence: false,
        }
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.25), 2.0);
        assert_eq!(quantile(&values, 0.5), 3.0);
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&values, 0.25) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_duplicates_normalize_case_and_spacing() {
        let a = record("a", "Joe's  Tavern", "100 Main St", "Houston");
        let b = record("b", "joe's tavern", "100 MAIN ST", "houston");
        let c = record("c", "Joe's Tavern", "200 Main St", "Houston");
        let ids = duplicates(&[&a, &b, &c]);
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_outliers_require_enough_values() {
        let config = ValidationConfig::default();
        let mut records: Vec<RestaurantRecord> = (0..10)
            .map(|i| {
                let mut r = record(&format!("r{:02}", i), "x", "y", "z");
                r.total_receipts = Some(10_000.0 + i as f64 * 100.0);
                r
            })
            .collect();
        records[9].total_receipts = Some(9_000_000.0);
        let refs: Vec<&RestaurantRecord> = records.iter().collect();
        assert!(outliers(&refs, RecordField::TotalReceipts, &config).is_empty());

        let mut extra = record("r10", "x", "y", "z");
        extra.total_receipts = Some(10_450.0);
        records.push(extra);
        let refs: Vec<&RestaurantRecord> = records.iter().collect();
        assert_eq!(outliers(&refs, RecordField::TotalReceipts, &config), vec!["r09"]);
    }

    #[test]
    fn test_step_rates_exclude_skipped() {
        let mut a = record("a", "A", "1 St", "Austin");
        a.outcomes.insert(StepKind::PopulationAnalysis, population(5_000));
        let mut b = record("b", "B", "2 St", "Austin");
        b.outcomes.insert(
            StepKind::PopulationAnalysis,
            StepOutcome::Failed { error_kind: ErrorKind::Network, attempts: 3 },
        );
        let mut c = record("c", "C", "3 St", "Austin");
        c.outcomes.insert(StepKind::PopulationAnalysis, StepOutcome::skipped_missing("address"));

        let rates = step_success_rates(&[&a, &b, &c]);
        assert_eq!(rates[&StepKind::PopulationAnalysis], Some(0.5));
        assert_eq!(rates[&StepKind::SquareFootage], None);
    }

    #[test]
    fn test_score_renormalizes_without_step_data() {
        let config = ValidationConfig::default();
        let mut fill = BTreeMap::new();
        fill.insert("a".to_string(), 1.0);
        fill.insert("b".to_string(), 0.5);
        let steps: BTreeMap<StepKind, Option<f64>> = StepKind::ALL.iter().map(|s| (*s, None)).collect();
        assert!((overall_score(&fill, &steps, &config) - 0.75).abs() < 1e-12);

        let mut steps = steps;
        steps.insert(StepKind::ConceptClassification, Some(0.0));
        let expected = (0.75 * config.fill_rate_weight) / (config.fill_rate_weight + config.step_success_weight);
        assert!((overall_score(&fill, &steps, &config) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_population_coordinates_fill_location() {
        let mut a = record("a", "A", "1 St", "Houston");
        a.outcomes.insert(StepKind::PopulationAnalysis, population(5_000));
        let b = record("b", "B", "2 St", "Houston");
        let report = evaluate(&[a, b], &default_rules(&ValidationConfig::default()), &ValidationConfig::default());
        assert_eq!(report.field_fill_rates["latitude"], 0.5);
        assert_eq!(report.field_fill_rates["population_1_mile"], 0.5);
        assert_eq!(report.field_fill_rates["location_name"], 1.0);
    }

    #[test]
    fn test_good_data_recommendation() {
        let mut report = QualityReport::empty();
        report.total_records = 1;
        report.overall_score = 0.95;
        report.field_fill_rates.insert("location_name".to_string(), 1.0);
        assert_eq!(
            recommendations(&report),
            vec!["Data quality is good. Continue monitoring for consistency.".to_string()]
        );
    }
}
