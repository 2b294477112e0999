use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::app::ports::HttpClientPort;
use crate::config::PopulationConfig;
use crate::domain::{PopulationFields, RecordInput, StepFields, StepOutcome};
use crate::error::{ErrorKind, ExternalError};
use crate::pipeline::backoff::BackoffController;

use super::{build_url, failed, fetch_text, invalid_request, success};

/// Assumed land area of a ZIP code, in square miles.
const ZIP_AREA_SQ_MI: f64 = 5.0;
const DRINKING_AGE_RATIO: f64 = 0.75;
const RADII_MILES: [f64; 4] = [1.0, 3.0, 5.0, 10.0];

/// Base demographics for one area.
#[derive(Debug, Clone, PartialEq)]
pub struct Demographics {
    pub total_population: u64,
    pub median_age: Option<f64>,
    pub median_income: Option<f64>,
    pub household_size: Option<f64>,
    pub source: &'static str,
    pub confidence: f64,
}

struct ZipEntry {
    zip: &'static str,
    population: u64,
    median_age: f64,
    median_income: f64,
    household_size: f64,
}

static ZIP_REFERENCE: &[ZipEntry] = &[
    ZipEntry { zip: "77001", population: 8500, median_age: 31.2, median_income: 42500.0, household_size: 2.3 },
    ZipEntry { zip: "77002", population: 15200, median_age: 34.8, median_income: 58200.0, household_size: 2.1 },
    ZipEntry { zip: "77003", population: 10800, median_age: 32.5, median_income: 49800.0, household_size: 2.4 },
    ZipEntry { zip: "77004", population: 18900, median_age: 29.8, median_income: 35600.0, household_size: 2.2 },
    ZipEntry { zip: "77005", population: 25600, median_age: 38.2, median_income: 89200.0, household_size: 2.6 },
    ZipEntry { zip: "77006", population: 19800, median_age: 35.1, median_income: 67200.0, household_size: 1.9 },
    ZipEntry { zip: "77007", population: 32400, median_age: 33.9, median_income: 75800.0, household_size: 2.3 },
    ZipEntry { zip: "77008", population: 28900, median_age: 34.7, median_income: 69500.0, household_size: 2.4 },
    ZipEntry { zip: "77009", population: 41200, median_age: 32.8, median_income: 52800.0, household_size: 2.7 },
    ZipEntry { zip: "77010", population: 1200, median_age: 42.1, median_income: 125000.0, household_size: 1.8 },
];

/// Demographics from the built-in ZIP table, or national averages for an unknown ZIP.
pub fn zip_demographics(zip: Option<&str>) -> Demographics {
    let key = zip.map(|z| z.chars().take(5).collect::<String>());
    match key.and_then(|k| ZIP_REFERENCE.iter().find(|e| e.zip == k)) {
        Some(entry) => Demographics {
            total_population: entry.population,
            median_age: Some(entry.median_age),
            median_income: Some(entry.median_income),
            household_size: Some(entry.household_size),
            source: "zip_estimation",
            confidence: 0.8,
        },
        None => Demographics {
            total_population: 15000,
            median_age: Some(33.5),
            median_income: Some(55000.0),
            household_size: Some(2.3),
            source: "national_average",
            confidence: 0.4,
        },
    }
}

/// Population within `radius` miles, assuming uniform density over the base area.
///
/// Capped at three times the base population.
pub fn population_in_radius(base_population: u64, radius_miles: f64) -> u64 {
    let density = base_population as f64 / ZIP_AREA_SQ_MI;
    let estimate = (density * std::f64::consts::PI * radius_miles * radius_miles) as u64;
    estimate.min(base_population.saturating_mul(3))
}

pub fn drinking_age_population(population: u64) -> u64 {
    (population as f64 * DRINKING_AGE_RATIO) as u64
}

#[derive(Debug, Deserialize)]
struct GeocodeHit {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct CensusResponse {
    total_population: u64,
    #[serde(default)]
    median_age: Option<f64>,
    #[serde(default)]
    median_household_income: Option<f64>,
    #[serde(default)]
    average_household_size: Option<f64>,
}

pub struct PopulationAnalyzer {
    http: Arc<dyn HttpClientPort>,
    controller: BackoffController,
    geocode_url: String,
    census_url: String,
    census_api_key: Option<String>,
    threshold: f64,
}

impl PopulationAnalyzer {
    pub fn new(config: &PopulationConfig, http: Arc<dyn HttpClientPort>, controller: BackoffController) -> Self {
        Self {
            http,
            controller,
            geocode_url: config.geocode_url.clone(),
            census_url: config.census_url.clone(),
            census_api_key: config.census_api_key.clone(),
            threshold: config.low_confidence_threshold,
        }
    }

    pub fn controller(&self) -> &BackoffController {
        &self.controller
    }

    pub async fn apply(&self, input: &RecordInput) -> StepOutcome {
        let Some(full_address) = input.full_address() else {
            return StepOutcome::skipped_missing("address");
        };

        let (latitude, longitude) = match input.coordinates {
            Some(coords) => coords,
            None => {
                let url = match build_url(
                    &self.geocode_url,
                    &[("q", full_address.as_str()), ("format", "json"), ("limit", "1")],
                ) {
                    Ok(url) => url,
                    Err(err) => return invalid_request(err),
                };
                match self.controller.execute(|| self.geocode(&url)).await {
                    Ok(coords) => coords,
                    Err(failure) => return failed(failure),
                }
            }
        };

        let demographics = match &self.census_api_key {
            Some(key) => {
                let (lat, lon) = (latitude.to_string(), longitude.to_string());
                let zip = input.zip.clone().unwrap_or_default();
                let url = match build_url(
                    &self.census_url,
                    &[
                        ("lat", lat.as_str()),
                        ("lon", lon.as_str()),
                        ("zip", zip.as_str()),
                        ("key", key.as_str()),
                    ],
                ) {
                    Ok(url) => url,
                    Err(err) => return invalid_request(err),
                };
                match self.controller.execute(|| self.census(&url)).await {
                    Ok(d) => d,
                    Err(failure) => return failed(failure),
                }
            }
            None => zip_demographics(input.zip.as_deref()),
        };

        let [p1, p3, p5, p10] =
            RADII_MILES.map(|r| population_in_radius(demographics.total_population, r));

        debug!(
            record_id = %input.id,
            source = demographics.source,
            population_1_mile = p1,
            "estimated population"
        );

        let fields = PopulationFields {
            latitude,
            longitude,
            population_1_mile: p1,
            population_3_mile: p3,
            population_5_mile: p5,
            population_10_mile: p10,
            drinking_age_1_mile: drinking_age_population(p1),
            drinking_age_3_mile: drinking_age_population(p3),
            drinking_age_5_mile: drinking_age_population(p5),
            drinking_age_10_mile: drinking_age_population(p10),
            median_income: demographics.median_income,
            median_age: demographics.median_age,
            average_household_size: demographics.household_size,
            source: demographics.source.to_string(),
        };
        success(StepFields::Population(fields), demographics.confidence, self.threshold)
    }

    async fn geocode(&self, url: &str) -> Result<(f64, f64), ExternalError> {
        let body = fetch_text(self.http.as_ref(), url).await?;
        parse_geocode(&body)
    }

    async fn census(&self, url: &str) -> Result<Demographics, ExternalError> {
        let body = fetch_text(self.http.as_ref(), url).await?;
        let parsed: CensusResponse = serde_json::from_str(&body)
            .map_err(|e| ExternalError::malformed(format!("census response: {}", e)))?;
        Ok(Demographics {
            total_population: parsed.total_population,
            median_age: parsed.median_age,
            median_income: parsed.median_household_income,
            household_size: parsed.average_household_size,
            source: "census_api",
            confidence: 0.8,
        })
    }
}

/// Parse a Nominatim-style response; an empty result set is `no_data`.
fn parse_geocode(body: &str) -> Result<(f64, f64), ExternalError> {
    let hits: Vec<GeocodeHit> = serde_json::from_str(body)
        .map_err(|e| ExternalError::malformed(format!("geocoder response: {}", e)))?;
    let hit = hits
        .first()
        .ok_or_else(|| ExternalError::permanent(ErrorKind::NoData, "address not found by geocoder"))?;
    let lat: f64 = hit
        .lat
        .parse()
        .map_err(|_| ExternalError::malformed(format!("latitude '{}'", hit.lat)))?;
    let lon: f64 = hit
        .lon
        .parse()
        .map_err(|_| ExternalError::malformed(format!("longitude '{}'", hit.lon)))?;
    Ok((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_table_and_fallback() {
        let known = zip_demographics(Some("77002-1234"));
        assert_eq!(known.total_population, 15200);
        assert_eq!(known.source, "zip_estimation");
        assert_eq!(known.confidence, 0.8);

        let unknown = zip_demographics(Some("90210"));
        assert_eq!(unknown.total_population, 15000);
        assert_eq!(unknown.source, "national_average");
        assert_eq!(unknown.confidence, 0.4);

        assert_eq!(zip_demographics(None).source, "national_average");
    }

    #[test]
    fn test_radius_population_is_capped() {
        // 10000 / 5 * pi = 6283
        assert_eq!(population_in_radius(10_000, 1.0), 6283);
        // larger radii hit the 3x cap
        assert_eq!(population_in_radius(10_000, 3.0), 30_000);
        assert_eq!(population_in_radius(10_000, 10.0), 30_000);
        assert_eq!(drinking_age_population(6283), 4712);
    }

    #[test]
    fn test_parse_geocode() {
        let coords = parse_geocode(r#"[{"lat": "29.7604", "lon": "-95.3698", "display_name": "Houston"}]"#).unwrap();
        assert_eq!(coords, (29.7604, -95.3698));

        let err = parse_geocode("[]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoData);
        assert!(!err.is_transient());

        let err = parse_geocode("<html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }
}
