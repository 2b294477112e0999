use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ValidationConfig;
use crate::domain::{RestaurantRecord, StepKind, StepOutcome};

/// A value-bearing attribute of a record, including enrichment outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    LocationName,
    LocationAddress,
    LocationCity,
    LocationState,
    LocationZip,
    LocationCounty,
    Latitude,
    Longitude,
    TotalReceipts,
    PrimaryConcept,
    ConceptConfidence,
    Population1Mile,
    MedianIncome,
    SquareFootage,
}

impl RecordField {
    /// Fields whose fill rate is reported and scored.
    pub const FILL_RATE_FIELDS: [RecordField; 14] = [
        RecordField::LocationName,
        RecordField::LocationAddress,
        RecordField::LocationCity,
        RecordField::LocationState,
        RecordField::LocationZip,
        RecordField::LocationCounty,
        RecordField::Latitude,
        RecordField::Longitude,
        RecordField::TotalReceipts,
        RecordField::PrimaryConcept,
        RecordField::ConceptConfidence,
        RecordField::Population1Mile,
        RecordField::MedianIncome,
        RecordField::SquareFootage,
    ];

    /// Numeric fields screened for IQR outliers.
    pub const OUTLIER_FIELDS: [RecordField; 5] = [
        RecordField::TotalReceipts,
        RecordField::Latitude,
        RecordField::Longitude,
        RecordField::Population1Mile,
        RecordField::SquareFootage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::LocationName => "location_name",
            RecordField::LocationAddress => "location_address",
            RecordField::LocationCity => "location_city",
            RecordField::LocationState => "location_state",
            RecordField::LocationZip => "location_zip",
            RecordField::LocationCounty => "location_county",
            RecordField::Latitude => "latitude",
            RecordField::Longitude => "longitude",
            RecordField::TotalReceipts => "total_receipts",
            RecordField::PrimaryConcept => "primary_concept",
            RecordField::ConceptConfidence => "concept_confidence",
            RecordField::Population1Mile => "population_1_mile",
            RecordField::MedianIncome => "median_income",
            RecordField::SquareFootage => "square_footage",
        }
    }

    pub fn value(&self, record: &RestaurantRecord) -> FieldValue {
        let text = |v: &Option<String>| match v.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => FieldValue::Text(s.to_string()),
            _ => FieldValue::Missing,
        };
        let number = |v: Option<f64>| match v {
            Some(n) if n.is_finite() => FieldValue::Number(n),
            _ => FieldValue::Missing,
        };

        match self {
            RecordField::LocationName => text(&record.location_name),
            RecordField::LocationAddress => text(&record.location_address),
            RecordField::LocationCity => text(&record.location_city),
            RecordField::LocationState => text(&record.location_state),
            RecordField::LocationZip => text(&record.location_zip),
            RecordField::LocationCounty => text(&record.location_county),
            RecordField::Latitude => {
                number(record.latitude.or(record.population().map(|(p, _)| p.latitude)))
            }
            RecordField::Longitude => {
                number(record.longitude.or(record.population().map(|(p, _)| p.longitude)))
            }
            RecordField::TotalReceipts => number(record.total_receipts),
            RecordField::PrimaryConcept => match record.concept() {
                Some((c, _)) if c.primary_concept != "unknown" => {
                    FieldValue::Text(c.primary_concept.clone())
                }
                _ => FieldValue::Missing,
            },
            RecordField::ConceptConfidence => number(record.concept().map(|(_, conf)| conf)),
            RecordField::Population1Mile => {
                number(record.population().map(|(p, _)| p.population_1_mile as f64))
            }
            RecordField::MedianIncome => number(record.population().and_then(|(p, _)| p.median_income)),
            RecordField::SquareFootage => {
                number(record.square_footage().map(|(s, _)| s.square_footage as f64))
            }
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Text(String),
    Number(f64),
}

impl FieldValue {
    pub fn is_present(&self) -> bool {
        !matches!(self, FieldValue::Missing)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.replace(',', "").parse().ok(),
            FieldValue::Missing => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Number(n) => Some(n.to_string()),
            FieldValue::Missing => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleResult {
    Pass,
    Fail,
    NotApplicable,
}

/// The declarative check a rule performs.
#[derive(Debug, Clone)]
pub enum RuleCheck {
    Required(RecordField),
    Pattern(RecordField, Regex),
    OneOf(RecordField, Vec<String>),
    Range { field: RecordField, min: Option<f64>, max: Option<f64> },
    MinConfidence(RecordField, f64),
    /// When the street address embeds a locality, it must mention the record's city.
    CityInAddress,
    StepSucceeded(StepKind),
    NotLowConfidence(StepKind),
}

impl RuleCheck {
    pub fn field_name(&self) -> &'static str {
        match self {
            RuleCheck::Required(f)
            | RuleCheck::Pattern(f, _)
            | RuleCheck::OneOf(f, _)
            | RuleCheck::Range { field: f, .. }
            | RuleCheck::MinConfidence(f, _) => f.as_str(),
            RuleCheck::CityInAddress => RecordField::LocationAddress.as_str(),
            RuleCheck::StepSucceeded(step) | RuleCheck::NotLowConfidence(step) => step.as_str(),
        }
    }

    pub fn issue_type(&self) -> &'static str {
        match self {
            RuleCheck::Required(_) => "missing_value",
            RuleCheck::Pattern(..) | RuleCheck::OneOf(..) => "invalid_format",
            RuleCheck::Range { .. } => "out_of_range",
            RuleCheck::MinConfidence(..) | RuleCheck::NotLowConfidence(_) => "low_confidence",
            RuleCheck::CityInAddress => "inconsistent",
            RuleCheck::StepSucceeded(_) => "step_failed",
        }
    }

    pub fn evaluate(&self, record: &RestaurantRecord) -> RuleResult {
        let verdict = |ok: bool| if ok { RuleResult::Pass } else { RuleResult::Fail };
        match self {
            RuleCheck::Required(field) => verdict(field.value(record).is_present()),
            RuleCheck::Pattern(field, regex) => match field.value(record).as_text() {
                Some(text) => verdict(regex.is_match(&text)),
                None => RuleResult::NotApplicable,
            },
            RuleCheck::OneOf(field, allowed) => match field.value(record).as_text() {
                Some(text) => verdict(allowed.iter().any(|a| a.eq_ignore_ascii_case(&text))),
                None => RuleResult::NotApplicable,
            },
            RuleCheck::Range { field, min, max } => {
                let value = field.value(record);
                if !value.is_present() {
                    return RuleResult::NotApplicable;
                }
                match value.as_number() {
                    Some(n) => verdict(min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m)),
                    None => RuleResult::Fail,
                }
            }
            RuleCheck::MinConfidence(field, threshold) => match field.value(record).as_number() {
                Some(n) => verdict(n >= *threshold),
                None => RuleResult::NotApplicable,
            },
            RuleCheck::CityInAddress => {
                let address = RecordField::LocationAddress.value(record).as_text();
                let city = RecordField::LocationCity.value(record).as_text();
                match (address, city) {
                    (Some(address), Some(city)) if address.contains(',') => {
                        verdict(address.to_lowercase().contains(&city.to_lowercase()))
                    }
                    _ => RuleResult::NotApplicable,
                }
            }
            RuleCheck::StepSucceeded(step) => match record.outcome(*step) {
                StepOutcome::Success { .. } => RuleResult::Pass,
                StepOutcome::Failed { .. } => RuleResult::Fail,
                _ => RuleResult::NotApplicable,
            },
            RuleCheck::NotLowConfidence(step) => match record.outcome(*step) {
                StepOutcome::Success { low_confidence, .. } => verdict(!low_confidence),
                _ => RuleResult::NotApplicable,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub name: String,
    pub description: String,
    pub check: RuleCheck,
    pub severity: Severity,
}

impl ValidationRule {
    pub fn new(name: &str, description: &str, check: RuleCheck, severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            check,
            severity,
        }
    }
}

static ZIP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("static ZIP pattern"));

const US_STATES: [&str; 50] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA", "KS",
    "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ", "NM", "NY",
    "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA", "WV",
    "WI", "WY",
];

/// The standard rule set for licensed restaurant records.
pub fn default_rules(config: &ValidationConfig) -> Vec<ValidationRule> {
    let mut rules = vec![
        ValidationRule::new(
            "required_location_name",
            "Location name is required",
            RuleCheck::Required(RecordField::LocationName),
            Severity::Error,
        ),
        ValidationRule::new(
            "required_address",
            "Street address is required",
            RuleCheck::Required(RecordField::LocationAddress),
            Severity::Error,
        ),
        ValidationRule::new(
            "required_receipts",
            "Receipt data should be present",
            RuleCheck::Required(RecordField::TotalReceipts),
            Severity::Warning,
        ),
        ValidationRule::new(
            "valid_zip_format",
            "ZIP code must be 5 digits, optionally ZIP+4",
            RuleCheck::Pattern(RecordField::LocationZip, ZIP_PATTERN.clone()),
            Severity::Error,
        ),
        ValidationRule::new(
            "valid_state_format",
            "State must be a valid two-letter code",
            RuleCheck::OneOf(
                RecordField::LocationState,
                US_STATES.iter().map(|s| s.to_string()).collect(),
            ),
            Severity::Error,
        ),
        ValidationRule::new(
            "reasonable_receipts",
            "Total receipts should be reasonable for a restaurant",
            RuleCheck::Range { field: RecordField::TotalReceipts, min: Some(0.0), max: Some(10_000_000.0) },
            Severity::Warning,
        ),
        ValidationRule::new(
            "valid_latitude",
            "Latitude must be within [-90, 90]",
            RuleCheck::Range { field: RecordField::Latitude, min: Some(-90.0), max: Some(90.0) },
            Severity::Error,
        ),
        ValidationRule::new(
            "valid_longitude",
            "Longitude must be within [-180, 180]",
            RuleCheck::Range { field: RecordField::Longitude, min: Some(-180.0), max: Some(180.0) },
            Severity::Error,
        ),
        ValidationRule::new(
            "address_city_consistency",
            "City should be consistent with the address",
            RuleCheck::CityInAddress,
            Severity::Warning,
        ),
        ValidationRule::new(
            "concept_confidence_threshold",
            "Concept classification confidence should meet threshold",
            RuleCheck::MinConfidence(RecordField::ConceptConfidence, config.min_concept_confidence),
            Severity::Warning,
        ),
        ValidationRule::new(
            "reasonable_population",
            "Population within 1 mile should be reasonable",
            RuleCheck::Range { field: RecordField::Population1Mile, min: Some(0.0), max: Some(100_000.0) },
            Severity::Warning,
        ),
        ValidationRule::new(
            "reasonable_square_footage",
            "Square footage should be reasonable for a restaurant",
            RuleCheck::Range { field: RecordField::SquareFootage, min: Some(100.0), max: Some(50_000.0) },
            Severity::Warning,
        ),
    ];

    for step in StepKind::ALL {
        rules.push(ValidationRule::new(
            &format!("{}_succeeded", step.as_str()),
            "Enrichment step should not fail",
            RuleCheck::StepSucceeded(step),
            Severity::Info,
        ));
        rules.push(ValidationRule::new(
            &format!("{}_confident", step.as_str()),
            "Enrichment result should not be low-confidence",
            RuleCheck::NotLowConfidence(step),
            Severity::Info,
        ));
    }
    rules
}
