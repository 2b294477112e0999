use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::app::ports::HttpClientPort;
use crate::config::ConceptConfig;
use crate::domain::{ConceptFields, RecordInput, StepFields, StepOutcome};
use crate::error::ExternalError;
use crate::pipeline::backoff::BackoffController;

use super::{build_url, failed, fetch_text, invalid_request, success};

const MAX_SECONDARY_CONCEPTS: usize = 3;
const MAX_LISTING_CATEGORIES: usize = 3;

struct ConceptDefinition {
    name: &'static str,
    keywords: &'static [&'static str],
    price_range: &'static str,
    service_style: &'static str,
}

/// Declaration order decides the primary concept when several match.
static CONCEPTS: &[ConceptDefinition] = &[
    ConceptDefinition {
        name: "fast_food",
        keywords: &[
            "fast food", "quick service", "drive thru", "burger", "pizza", "fried chicken",
            "taco bell", "mcdonalds", "wendys", "burger king", "fast casual", "quick bite",
            "grab and go",
        ],
        price_range: "$",
        service_style: "counter_service",
    },
    ConceptDefinition {
        name: "fine_dining",
        keywords: &[
            "fine dining", "upscale", "white tablecloth", "sommelier", "degustation",
            "tasting menu", "haute cuisine", "michelin", "award winning", "chef driven", "gourmet",
        ],
        price_range: "$$$$",
        service_style: "formal_service",
    },
    ConceptDefinition {
        name: "casual_dining",
        keywords: &[
            "casual dining", "family restaurant", "american food", "comfort food", "pub", "grill",
            "bistro", "neighborhood spot", "local favorite", "traditional",
        ],
        price_range: "$$",
        service_style: "table_service",
    },
    ConceptDefinition {
        name: "ethnic",
        keywords: &[
            "mexican", "italian", "chinese", "japanese", "indian", "thai", "mediterranean",
            "greek", "french", "vietnamese", "korean", "middle eastern", "latin american", "fusion",
        ],
        price_range: "$$",
        service_style: "table_service",
    },
    ConceptDefinition {
        name: "seafood",
        keywords: &[
            "seafood", "fish", "lobster", "crab", "oyster", "sushi", "raw bar", "shellfish",
            "fresh catch", "seafood restaurant", "fish house", "oyster bar",
        ],
        price_range: "$$$",
        service_style: "table_service",
    },
    ConceptDefinition {
        name: "steakhouse",
        keywords: &[
            "steakhouse", "steak house", "prime rib", "chophouse", "butcher", "aged beef",
            "steak and seafood", "cattle", "meat house", "steak specialist",
        ],
        price_range: "$$$$",
        service_style: "formal_service",
    },
    ConceptDefinition {
        name: "cafe",
        keywords: &[
            "cafe", "coffee shop", "bakery", "sandwich shop", "deli", "breakfast", "brunch",
            "coffee house", "pastry shop", "breakfast spot",
        ],
        price_range: "$",
        service_style: "counter_service",
    },
    ConceptDefinition {
        name: "bar",
        keywords: &[
            "bar", "pub", "tavern", "lounge", "sports bar", "nightclub", "cocktail bar",
            "brewery", "taproom", "brewpub", "gastropub", "dive bar",
        ],
        price_range: "$$",
        service_style: "bar_service",
    },
    ConceptDefinition {
        name: "fast_casual",
        keywords: &[
            "chipotle", "panera", "sweetgreen", "cava", "dig", "fresh casual", "healthy fast",
            "build your own", "customizable", "assembly line",
        ],
        price_range: "$$",
        service_style: "counter_service",
    },
    ConceptDefinition {
        name: "food_truck",
        keywords: &["food truck", "mobile kitchen", "street food", "food cart", "popup", "mobile eatery"],
        price_range: "$",
        service_style: "counter_service",
    },
];

static CONCEPT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    CONCEPTS
        .iter()
        .map(|concept| {
            let alternatives: Vec<String> =
                concept.keywords.iter().map(|k| regex::escape(k)).collect();
            Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
                .expect("concept keyword patterns are escaped literals")
        })
        .collect()
});

static CATEGORY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href*="/category/"]"#).expect("static selector"));
static DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="description"], meta[property="og:description"]"#)
        .expect("static selector")
});
static PRICE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="priceRange"]"#).expect("static selector"));

/// Result of the keyword model over a block of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub primary_concept: String,
    pub secondary_concepts: Vec<String>,
    pub keywords_found: Vec<String>,
    pub confidence: f64,
    pub price_range: Option<String>,
    pub service_style: Option<String>,
}

/// Classify free text against the keyword model.
///
/// Confidence is 0.2 per keyword hit across all concepts, capped at 1.0.
pub fn classify_text(text: &str) -> Classification {
    let mut matched: Vec<&ConceptDefinition> = Vec::new();
    let mut hits = 0usize;
    let mut keywords = BTreeSet::new();

    for (concept, pattern) in CONCEPTS.iter().zip(CONCEPT_PATTERNS.iter()) {
        let found: Vec<String> = pattern
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        if !found.is_empty() {
            hits += found.len();
            keywords.extend(found);
            matched.push(concept);
        }
    }

    let primary = matched.first();
    Classification {
        primary_concept: primary.map(|c| c.name).unwrap_or("unknown").to_string(),
        secondary_concepts: matched
            .iter()
            .skip(1)
            .take(MAX_SECONDARY_CONCEPTS)
            .map(|c| c.name.to_string())
            .collect(),
        keywords_found: keywords.into_iter().collect(),
        confidence: (hits as f64 * 0.2).min(1.0),
        price_range: primary.map(|c| c.price_range.to_string()),
        service_style: primary.map(|c| c.service_style.to_string()),
    }
}

/// Fields pulled from a business listing page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingData {
    pub categories: Vec<String>,
    pub description: String,
    pub price_range: Option<String>,
}

impl ListingData {
    fn text(&self) -> String {
        format!("{} {}", self.categories.join(" "), self.description)
    }
}

pub fn parse_listing(html: &str) -> ListingData {
    let document = Html::parse_document(html);

    let categories = document
        .select(&CATEGORY_SELECTOR)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .take(MAX_LISTING_CATEGORIES)
        .collect();

    let description = document
        .select(&DESCRIPTION_SELECTOR)
        .filter_map(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_default();

    let price_range = document
        .select(&PRICE_SELECTOR)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|s| !s.is_empty());

    ListingData { categories, description, price_range }
}

pub struct ConceptClassifier {
    http: Arc<dyn HttpClientPort>,
    controller: BackoffController,
    listing_url: Option<String>,
    threshold: f64,
}

impl ConceptClassifier {
    pub fn new(config: &ConceptConfig, http: Arc<dyn HttpClientPort>, controller: BackoffController) -> Self {
        Self {
            http,
            controller,
            listing_url: config.listing_url.clone(),
            threshold: config.low_confidence_threshold,
        }
    }

    pub fn controller(&self) -> &BackoffController {
        &self.controller
    }

    pub async fn apply(&self, input: &RecordInput) -> StepOutcome {
        let Some(name) = input.name.as_deref() else {
            return StepOutcome::skipped_missing("name");
        };
        let address = input.full_address().unwrap_or_default();

        let listing = match &self.listing_url {
            Some(base) => {
                let location = match (&input.city, &input.state) {
                    (Some(city), Some(state)) => format!("{}, {}", city, state),
                    (Some(city), None) => city.clone(),
                    _ => address.clone(),
                };
                let url = match build_url(base, &[("q", name), ("location", location.as_str())]) {
                    Ok(url) => url,
                    Err(err) => return invalid_request(err),
                };
                match self.controller.execute(|| self.fetch_listing(&url)).await {
                    Ok(listing) => Some(listing),
                    Err(failure) => return failed(failure),
                }
            }
            None => None,
        };

        let (text, source, web_sources) = match &listing {
            Some(data) => (
                format!("{} {} {}", name, address, data.text()),
                "web_listing",
                vec!["listing".to_string()],
            ),
            None => (format!("{} {}", name, address), "name_analysis", Vec::new()),
        };

        let result = classify_text(&text);
        debug!(
            record_id = %input.id,
            concept = %result.primary_concept,
            confidence = result.confidence,
            source,
            "classified concept"
        );

        let fields = ConceptFields {
            primary_concept: result.primary_concept,
            secondary_concepts: result.secondary_concepts,
            keywords_found: result.keywords_found,
            price_range: listing.and_then(|l| l.price_range).or(result.price_range),
            service_style: result.service_style,
            source: source.to_string(),
            web_data_sources: web_sources,
        };
        success(StepFields::Concept(fields), result.confidence, self.threshold)
    }

    async fn fetch_listing(&self, url: &str) -> Result<ListingData, ExternalError> {
        let body = fetch_text(self.http.as_ref(), url).await?;
        Ok(parse_listing(&body))
    }
}
