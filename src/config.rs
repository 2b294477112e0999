use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::domain::StepKind;
use crate::error::{EnrichError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Immutable configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub concept: ConceptConfig,
    pub population: PopulationConfig,
    pub square_footage: SquareFootageConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "tabc_data.db".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Maximum records processed per run, unbounded when absent
    pub limit: Option<usize>,
    pub worker_concurrency: usize,
    pub include_partial: bool,
    pub skip_concept_classification: bool,
    pub skip_population_analysis: bool,
    pub skip_square_footage: bool,
    /// Run-level timeout; cancellation is observed between records
    pub run_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            limit: None,
            worker_concurrency: 4,
            include_partial: true,
            skip_concept_classification: false,
            skip_population_analysis: false,
            skip_square_footage: false,
            run_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Enabled steps in fixed priority order.
    pub fn enabled_steps(&self) -> Vec<StepKind> {
        StepKind::ALL
            .into_iter()
            .filter(|step| match step {
                StepKind::ConceptClassification => !self.skip_concept_classification,
                StepKind::PopulationAnalysis => !self.skip_population_analysis,
                StepKind::SquareFootage => !self.skip_square_footage,
            })
            .collect()
    }
}

/// Throttling and retry parameters for one external dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub min_interval_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the computed delay added as random jitter
    pub jitter_ratio: f64,
    pub call_timeout_ms: u64,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
            call_timeout_ms: 10_000,
        }
    }
}

impl DependencyConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(EnrichError::Config(format!("{}.max_attempts must be at least 1", name)));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(EnrichError::Config(format!("{}.backoff_multiplier must be >= 1.0", name)));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(EnrichError::Config(format!("{}.jitter_ratio must be in [0, 1)", name)));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(EnrichError::Config(format!(
                "{}.max_delay_ms must not be below base_delay_ms",
                name
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(EnrichError::Config(format!("{}.call_timeout_ms must be positive", name)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConceptConfig {
    /// Business listing search endpoint; classification falls back to name analysis when unset
    pub listing_url: Option<String>,
    pub low_confidence_threshold: f64,
    pub dependency: DependencyConfig,
}

impl Default for ConceptConfig {
    fn default() -> Self {
        Self {
            listing_url: None,
            low_confidence_threshold: 0.3,
            dependency: DependencyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub geocode_url: String,
    pub census_url: String,
    pub census_api_key: Option<String>,
    pub low_confidence_threshold: f64,
    pub dependency: DependencyConfig,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            geocode_url: "https://nominatim.openstreetmap.org/search".to_string(),
            census_url: "https://api.census.gov/data/2021/acs/acs5".to_string(),
            census_api_key: None,
            low_confidence_threshold: 0.5,
            dependency: DependencyConfig {
                min_interval_ms: 1200,
                ..DependencyConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SquareFootageConfig {
    /// Web search endpoint used to discover property pages
    pub search_url: Option<String>,
    pub max_result_links: usize,
    pub max_input_len: usize,
    pub low_confidence_threshold: f64,
    pub dependency: DependencyConfig,
}

impl Default for SquareFootageConfig {
    fn default() -> Self {
        Self {
            search_url: None,
            max_result_links: 3,
            max_input_len: 200,
            low_confidence_threshold: 0.6,
            dependency: DependencyConfig {
                min_interval_ms: 2000,
                call_timeout_ms: 15_000,
                ..DependencyConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub top_n: usize,
    pub fill_rate_weight: f64,
    pub step_success_weight: f64,
    /// Outlier detection only runs on fields with more values than this
    pub outlier_min_values: usize,
    pub outlier_iqr_multiplier: f64,
    /// Concept confidence below this is flagged by the validation rules
    pub min_concept_confidence: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            fill_rate_weight: 0.6,
            step_success_weight: 0.4,
            outlier_min_values: 10,
            outlier_iqr_multiplier: 1.5,
            min_concept_confidence: 0.3,
        }
    }
}

impl AppConfig {
    /// Load from `path` (or `config.toml`), then apply `.env` and process environment overrides.
    ///
    /// A missing default file yields built-in defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EnrichError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply the supported environment overrides using `lookup` for variable access.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("TABC_DB_PATH") {
            self.database.path = path;
        }
        if let Some(raw) = lookup("TABC_SCRAPING_DELAY") {
            let secs: f64 = raw.trim().parse().map_err(|_| {
                EnrichError::Config(format!("TABC_SCRAPING_DELAY is not a number: '{}'", raw))
            })?;
            if !secs.is_finite() || secs < 0.0 {
                return Err(EnrichError::Config(format!(
                    "TABC_SCRAPING_DELAY must be a non-negative number of seconds, got '{}'",
                    raw
                )));
            }
            self.square_footage.dependency.min_interval_ms = (secs * 1000.0).round() as u64;
        }
        if let Some(key) = lookup("CENSUS_API_KEY") {
            let key = key.trim().to_string();
            self.population.census_api_key = if key.is_empty() { None } else { Some(key) };
        }
        if let Some(url) = lookup("TABC_LISTING_URL") {
            let url = url.trim().to_string();
            self.concept.listing_url = if url.is_empty() { None } else { Some(url) };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.batch_size < 1 {
            return Err(EnrichError::Config("pipeline.batch_size must be at least 1".into()));
        }
        if p.worker_concurrency < 1 {
            return Err(EnrichError::Config("pipeline.worker_concurrency must be at least 1".into()));
        }
        if p.enabled_steps().is_empty() {
            return Err(EnrichError::Config("at least one enrichment step must be enabled".into()));
        }

        self.concept.dependency.validate("concept.dependency")?;
        self.population.dependency.validate("population.dependency")?;
        self.square_footage.dependency.validate("square_footage.dependency")?;

        for (name, value) in [
            ("concept.low_confidence_threshold", self.concept.low_confidence_threshold),
            ("population.low_confidence_threshold", self.population.low_confidence_threshold),
            ("square_footage.low_confidence_threshold", self.square_footage.low_confidence_threshold),
            ("validation.min_concept_confidence", self.validation.min_concept_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EnrichError::Config(format!("{} must be in [0, 1]", name)));
            }
        }

        let v = &self.validation;
        if v.fill_rate_weight < 0.0 || v.step_success_weight < 0.0 {
            return Err(EnrichError::Config("validation weights must be non-negative".into()));
        }
        if v.fill_rate_weight + v.step_success_weight <= 0.0 {
            return Err(EnrichError::Config("validation weights must not both be zero".into()));
        }
        if v.outlier_iqr_multiplier <= 0.0 {
            return Err(EnrichError::Config("validation.outlier_iqr_multiplier must be positive".into()));
        }
        Ok(())
    }
}
