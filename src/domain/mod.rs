//! Record and outcome types shared by the pipeline, the validation engine and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ErrorKind;

/// The closed set of enrichment steps, in fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ConceptClassification,
    PopulationAnalysis,
    SquareFootage,
}

impl StepKind {
    /// Priority order: cheaper, more reliable steps run first.
    pub const ALL: [StepKind; 3] = [
        StepKind::ConceptClassification,
        StepKind::PopulationAnalysis,
        StepKind::SquareFootage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ConceptClassification => "concept_classification",
            StepKind::PopulationAnalysis => "population_analysis",
            StepKind::SquareFootage => "square_footage",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall enrichment progress of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    #[default]
    Pending,
    PartiallyEnriched,
    Enriched,
    Failed,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Pending => "pending",
            EnrichmentStatus::PartiallyEnriched => "partially_enriched",
            EnrichmentStatus::Enriched => "enriched",
            EnrichmentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrichmentStatus::Pending),
            "partially_enriched" => Some(EnrichmentStatus::PartiallyEnriched),
            "enriched" => Some(EnrichmentStatus::Enriched),
            "failed" => Some(EnrichmentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields written by the concept classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptFields {
    pub primary_concept: String,
    pub secondary_concepts: Vec<String>,
    pub keywords_found: Vec<String>,
    pub price_range: Option<String>,
    pub service_style: Option<String>,
    /// How the concept was derived, e.g. "web_listing" or "name_analysis"
    pub source: String,
    pub web_data_sources: Vec<String>,
}

/// Fields written by the population analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationFields {
    pub latitude: f64,
    pub longitude: f64,
    pub population_1_mile: u64,
    pub population_3_mile: u64,
    pub population_5_mile: u64,
    pub population_10_mile: u64,
    pub drinking_age_1_mile: u64,
    pub drinking_age_3_mile: u64,
    pub drinking_age_5_mile: u64,
    pub drinking_age_10_mile: u64,
    pub median_income: Option<f64>,
    pub median_age: Option<f64>,
    pub average_household_size: Option<f64>,
    /// "census_api", "zip_estimation" or "national_average"
    pub source: String,
}

/// Fields written by the square footage scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquareFootageFields {
    pub square_footage: u32,
    pub source: String,
    pub source_url: Option<String>,
    pub sources_tried: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFields {
    Concept(ConceptFields),
    Population(PopulationFields),
    SquareFootage(SquareFootageFields),
}

/// Result of one step on one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Success {
        fields: StepFields,
        confidence: f64,
        low_confidence: bool,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error_kind: ErrorKind,
        attempts: u32,
    },
    NotAttempted,
}

impl StepOutcome {
    pub fn skipped_missing(field: &str) -> Self {
        StepOutcome::Skipped { reason: format!("missing-input:{}", field) }
    }

    pub fn internal_failure() -> Self {
        StepOutcome::Failed { error_kind: ErrorKind::Internal, attempts: 0 }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }

    /// A retry wait aborted by a stop signal. Says nothing about the record itself.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepOutcome::Failed { error_kind: ErrorKind::Cancelled, .. })
    }

    /// Success and Skipped are terminal for a record: the step is not rerun.
    pub fn is_settled(&self) -> bool {
        matches!(self, StepOutcome::Success { .. } | StepOutcome::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Success { .. } => "success",
            StepOutcome::Skipped { .. } => "skipped",
            StepOutcome::Failed { .. } => "failed",
            StepOutcome::NotAttempted => "not_attempted",
        }
    }
}

/// A licensed establishment as persisted by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantRecord {
    /// Source registry ID, immutable
    pub id: String,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub location_address: Option<String>,
    #[serde(default)]
    pub location_city: Option<String>,
    #[serde(default)]
    pub location_state: Option<String>,
    #[serde(default)]
    pub location_zip: Option<String>,
    #[serde(default)]
    pub location_county: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub total_receipts: Option<f64>,
    #[serde(default)]
    pub outcomes: BTreeMap<StepKind, StepOutcome>,
    #[serde(default)]
    pub enrichment_status: EnrichmentStatus,
    #[serde(default)]
    pub last_enriched_at: Option<DateTime<Utc>>,
}

impl RestaurantRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location_name: None,
            location_address: None,
            location_city: None,
            location_state: None,
            location_zip: None,
            location_county: None,
            latitude: None,
            longitude: None,
            total_receipts: None,
            outcomes: BTreeMap::new(),
            enrichment_status: EnrichmentStatus::Pending,
            last_enriched_at: None,
        }
    }

    /// The read-only inputs a step is allowed to see.
    pub fn input(&self) -> RecordInput {
        RecordInput {
            id: self.id.clone(),
            name: non_blank(&self.location_name),
            address: non_blank(&self.location_address),
            city: non_blank(&self.location_city),
            state: non_blank(&self.location_state),
            zip: non_blank(&self.location_zip),
            county: non_blank(&self.location_county),
            coordinates: match (self.latitude, self.longitude) {
                (Some(lat), Some(lon)) => Some((lat, lon)),
                _ => None,
            },
        }
    }

    pub fn outcome(&self, step: StepKind) -> &StepOutcome {
        self.outcomes.get(&step).unwrap_or(&StepOutcome::NotAttempted)
    }

    /// Successful fields of a step together with their confidence and low-confidence flag.
    pub fn fields(&self, step: StepKind) -> Option<(&StepFields, f64, bool)> {
        match self.outcomes.get(&step) {
            Some(StepOutcome::Success { fields, confidence, low_confidence }) => {
                Some((fields, *confidence, *low_confidence))
            }
            _ => None,
        }
    }

    pub fn concept(&self) -> Option<(&ConceptFields, f64)> {
        match self.fields(StepKind::ConceptClassification) {
            Some((StepFields::Concept(c), confidence, _)) => Some((c, confidence)),
            _ => None,
        }
    }

    pub fn population(&self) -> Option<(&PopulationFields, f64)> {
        match self.fields(StepKind::PopulationAnalysis) {
            Some((StepFields::Population(p), confidence, _)) => Some((p, confidence)),
            _ => None,
        }
    }

    pub fn square_footage(&self) -> Option<(&SquareFootageFields, f64)> {
        match self.fields(StepKind::SquareFootage) {
            Some((StepFields::SquareFootage(s), confidence, _)) => Some((s, confidence)),
            _ => None,
        }
    }

    pub fn recompute_status(&mut self, enabled: &[StepKind]) {
        self.enrichment_status = derive_status(&self.outcomes, enabled);
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Owned copy of a record's input fields, handed to steps.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInput {
    pub id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub county: Option<String>,
    pub coordinates: Option<(f64, f64)>,
}

impl RecordInput {
    /// "street, city, state zip" with missing parts left out.
    pub fn full_address(&self) -> Option<String> {
        let street = self.address.as_deref()?;
        let mut out = street.to_string();
        if let Some(city) = &self.city {
            out.push_str(", ");
            out.push_str(city);
        }
        match (&self.state, &self.zip) {
            (Some(state), Some(zip)) => out.push_str(&format!(", {} {}", state, zip)),
            (Some(state), None) => out.push_str(&format!(", {}", state)),
            (None, Some(zip)) => out.push_str(&format!(" {}", zip)),
            (None, None) => {}
        }
        Some(out)
    }
}

/// Status invariant over the steps enabled for a run.
///
/// `Enriched` iff every enabled step is Success or Skipped; `PartiallyEnriched` when at
/// least one succeeded and at least one failed; `Failed` when something failed and nothing
/// succeeded; `Pending` otherwise (nothing attempted yet, or attempts still outstanding).
pub fn derive_status(
    outcomes: &BTreeMap<StepKind, StepOutcome>,
    enabled: &[StepKind],
) -> EnrichmentStatus {
    if enabled.is_empty() {
        return EnrichmentStatus::Pending;
    }

    let (mut success, mut failed, mut not_attempted) = (0usize, 0usize, 0usize);
    for step in enabled {
        match outcomes.get(step).unwrap_or(&StepOutcome::NotAttempted) {
            StepOutcome::Success { .. } => success += 1,
            StepOutcome::Skipped { .. } => {}
            StepOutcome::Failed { .. } => failed += 1,
            StepOutcome::NotAttempted => not_attempted += 1,
        }
    }

    if not_attempted == enabled.len() {
        EnrichmentStatus::Pending
    } else if failed == 0 && not_attempted == 0 {
        EnrichmentStatus::Enriched
    } else if success > 0 && failed > 0 {
        EnrichmentStatus::PartiallyEnriched
    } else if failed > 0 {
        EnrichmentStatus::Failed
    } else {
        EnrichmentStatus::Pending
    }
}
