use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::ports::HttpClientPort;
use crate::config::SquareFootageConfig;
use crate::domain::{RecordInput, SquareFootageFields, StepFields, StepOutcome};
use crate::error::{ErrorKind, ExternalError};
use crate::pipeline::backoff::{BackoffController, CallFailure};

use super::{build_url, fetch_text, invalid_request, success};

const MIN_PLAUSIBLE_SQFT: u32 = 100;
const MAX_PLAUSIBLE_SQFT: u32 = 100_000;

/// Texas county appraisal district search pages.
static COUNTY_APPRAISERS: &[(&str, &str)] = &[
    ("harris", "https://www.hcad.org/property-search/"),
    ("dallas", "https://www.dcad.org/search/"),
    ("tarrant", "https://www.tad.org/search/"),
    ("travis", "https://www.traviscad.org/property-search/"),
    ("collin", "https://www.collincad.org/property-search/"),
    ("bexar", "https://www.bcad.org/search/"),
    ("el paso", "https://www.epcad.org/search/"),
    ("hidalgo", "https://www.hidalgocad.org/search/"),
    ("fort bend", "https://www.fbcad.org/search/"),
    ("montgomery", "https://www.mcad-tx.org/search/"),
    ("williamson", "https://www.wcad.org/search/"),
    ("galveston", "https://www.galvestoncad.org/search/"),
    ("denton", "https://www.dentoncad.com/search/"),
    ("cameron", "https://www.cameroncad.org/search/"),
    ("nueces", "https://www.nuecescad.org/search/"),
];

static COMMERCIAL_LISTING_DOMAINS: &[&str] =
    &["loopnet.com", "crexi.com", "showcase.com", "costar.com", "properties.com"];

static SQFT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(\d{1,3}(?:,\d{3})*)\s*(?:sq\.?\s*ft\.?|square\s+feet?|sqft)",
        r"(\d{1,3}(?:,\d{3})*)\s*(?:sf|square\s+foot)\b",
        r"building\s+size[:\s]+(\d{1,3}(?:,\d{3})*)",
        r"property\s+size[:\s]+(\d{1,3}(?:,\d{3})*)",
        r"restaurant\s+size[:\s]+(\d{1,3}(?:,\d{3})*)",
        r"total\s+area[:\s]+(\d{1,3}(?:,\d{3})*)",
        r"floor\s+area[:\s]+(\d{1,3}(?:,\d{3})*)",
        r"leasable\s+area[:\s]+(\d{1,3}(?:,\d{3})*)",
        r"building\s+area[:\s]+(\d{1,3}(?:,\d{3})*)",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("square footage patterns are static"))
    .collect()
});

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Largest plausible floor-area figure mentioned in `text`.
pub fn extract_square_footage(text: &str) -> Option<u32> {
    SQFT_PATTERNS
        .iter()
        .flat_map(|pattern| pattern.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().replace(',', "").parse::<u32>().ok())
        .filter(|v| (MIN_PLAUSIBLE_SQFT..=MAX_PLAUSIBLE_SQFT).contains(v))
        .max()
}

/// Base confidence of a source, discounted for implausibly large or small figures.
pub fn source_confidence(source: &str, square_footage: u32) -> f64 {
    let base = match source {
        "county_records" => 0.9,
        "commercial_real_estate" => 0.8,
        "website" => 0.7,
        "web_search" => 0.5,
        _ => 0.3,
    };
    if square_footage > 50_000 || square_footage < 500 {
        base * 0.7
    } else {
        base
    }
}

/// Strip characters that have no business in a search query, trim, and cap the length.
pub fn sanitize(value: &str, max_len: usize) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect::<String>()
        .trim()
        .chars()
        .take(max_len)
        .collect()
}

fn county_appraiser_url(county: &str) -> Option<&'static str> {
    let normalized = county.trim().to_lowercase();
    let normalized = normalized.strip_suffix(" county").unwrap_or(&normalized);
    COUNTY_APPRAISERS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, url)| *url)
}

fn is_commercial_listing(url: &str) -> bool {
    let lower = url.to_lowercase();
    COMMERCIAL_LISTING_DOMAINS.iter().any(|d| lower.contains(d))
}

fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Absolute result links on a search page, excluding links back to the search host.
fn result_links(html: &str, search_host: Option<&str>, max: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links: Vec<String> = Vec::new();
    for href in document.select(&LINK_SELECTOR).filter_map(|a| a.value().attr("href")) {
        let Ok(url) = reqwest::Url::parse(href) else { continue };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        if search_host.is_some() && url.host_str() == search_host {
            continue;
        }
        let url = url.to_string();
        if !links.contains(&url) {
            links.push(url);
        }
        if links.len() >= max {
            break;
        }
    }
    links
}

/// No source produced a figure. The last lookup failure wins over `no_data`, which is kept
/// for the case where every source answered without one. `attempts` covers all lookups.
fn exhausted(last_failure: Option<CallFailure>, attempts: u32) -> StepOutcome {
    let error_kind = last_failure.map_or(ErrorKind::NoData, |f| f.error_kind);
    StepOutcome::Failed { error_kind, attempts }
}

pub struct SquareFootageScraper {
    http: Arc<dyn HttpClientPort>,
    controller: BackoffController,
    search_url: Option<String>,
    max_result_links: usize,
    max_input_len: usize,
    threshold: f64,
}

struct Found {
    square_footage: u32,
    source: &'static str,
    url: String,
}

impl SquareFootageScraper {
    pub fn new(config: &SquareFootageConfig, http: Arc<dyn HttpClientPort>, controller: BackoffController) -> Self {
        Self {
            http,
            controller,
            search_url: config.search_url.clone(),
            max_result_links: config.max_result_links,
            max_input_len: config.max_input_len,
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
        let address = sanitize(&full_address, self.max_input_len);
        let name = input.name.as_deref().map(|n| sanitize(n, self.max_input_len));
        let appraiser = input.county.as_deref().and_then(county_appraiser_url);

        if appraiser.is_none() && self.search_url.is_none() {
            return StepOutcome::Skipped { reason: "no-source".to_string() };
        }

        let mut sources_tried: Vec<String> = Vec::new();
        let mut attempts = 0u32;
        let mut last_failure: Option<CallFailure> = None;

        if let Some(base) = appraiser {
            sources_tried.push("county_records".to_string());
            match build_url(base, &[("address", address.as_str())]) {
                Ok(url) => {
                    let (result, made) = self.controller.execute_counted(|| self.fetch_figure(&url)).await;
                    attempts += made;
                    match result {
                        Ok(Some(sqft)) => {
                            let found = Found { square_footage: sqft, source: "county_records", url };
                            return self.found(found, sources_tried);
                        }
                        Ok(None) => debug!(record_id = %input.id, "no figure on county page"),
                        Err(failure) if failure.error_kind == ErrorKind::Cancelled => {
                            return exhausted(Some(failure), attempts);
                        }
                        Err(failure) => {
                            warn!(
                                record_id = %input.id,
                                error_kind = %failure.error_kind,
                                attempts = failure.attempts,
                                "county appraiser lookup failed"
                            );
                            last_failure = Some(failure);
                        }
                    }
                }
                Err(err) => warn!(record_id = %input.id, "skipping county lookup: {}", err),
            }
        }

        let Some(search_base) = &self.search_url else {
            return exhausted(last_failure, attempts);
        };

        let query = match &name {
            Some(name) => format!("\"{}\" {} square footage OR building size", name, address),
            None => format!("{} square footage OR building size", address),
        };
        let search_page_url = match build_url(search_base, &[("q", query.as_str())]) {
            Ok(url) => url,
            Err(err) => return invalid_request(err),
        };
        sources_tried.push("web_search".to_string());
        let (result, made) = self
            .controller
            .execute_counted(|| fetch_text(self.http.as_ref(), &search_page_url))
            .await;
        attempts += made;
        let search_page = match result {
            Ok(body) => body,
            Err(failure) => return exhausted(Some(failure), attempts),
        };

        let search_host = reqwest::Url::parse(search_base)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let links = result_links(&search_page, search_host.as_deref(), self.max_result_links);

        for link in links {
            let source = if is_commercial_listing(&link) { "commercial_real_estate" } else { "website" };
            if !sources_tried.iter().any(|s| s == source) {
                sources_tried.push(source.to_string());
            }
            let (result, made) = self.controller.execute_counted(|| self.fetch_figure(&link)).await;
            attempts += made;
            match result {
                Ok(Some(sqft)) => {
                    return self.found(Found { square_footage: sqft, source, url: link }, sources_tried);
                }
                Ok(None) => {}
                Err(failure) if failure.error_kind == ErrorKind::Cancelled => {
                    return exhausted(Some(failure), attempts);
                }
                Err(failure) => {
                    debug!(
                        record_id = %input.id,
                        url = %link,
                        error_kind = %failure.error_kind,
                        "result page lookup failed"
                    );
                    last_failure = Some(failure);
                }
            }
        }

        if let Some(sqft) = extract_square_footage(&page_text(&search_page)) {
            return self.found(
                Found { square_footage: sqft, source: "web_search", url: search_page_url },
                sources_tried,
            );
        }

        debug!(record_id = %input.id, attempts, "no square footage found");
        exhausted(last_failure, attempts)
    }

    async fn fetch_figure(&self, url: &str) -> Result<Option<u32>, ExternalError> {
        let body = fetch_text(self.http.as_ref(), url).await?;
        Ok(extract_square_footage(&page_text(&body)))
    }

    fn found(&self, found: Found, sources_tried: Vec<String>) -> StepOutcome {
        let confidence = source_confidence(found.source, found.square_footage);
        let fields = SquareFootageFields {
            square_footage: found.square_footage,
            source: found.source.to_string(),
            source_url: Some(found.url),
            sources_tried,
        };
        success(StepFields::SquareFootage(fields), confidence, self.threshold)
    }
}
