use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tabc_enrich::app::ports::{HttpClientPort, HttpGetResult, RecordStorePort};
use tabc_enrich::config::AppConfig;
use tabc_enrich::domain::{EnrichmentStatus, RestaurantRecord, StepKind, StepOutcome};
use tabc_enrich::error::{EnrichError, ErrorKind, ExternalError, Result};
use tabc_enrich::infra::record_store::InMemoryRecordStore;
use tabc_enrich::pipeline::enrichment::{BatchRun, EnrichmentPipeline};

const LISTING_PAGE: &str = r#"<html><head>
<meta name="description" content="Neighborhood grill and bar with burgers and craft beer">
</head><body><a class="category" href="/c/bars">Bars</a></body></html>"#;

const GEOCODE_HIT: &str = r#"[{"lat": "29.7604", "lon": "-95.3698"}]"#;

#[derive(Clone)]
enum Reply {
    Body(&'static str),
    Status(u16),
    Panic,
}

/// Answers with the first route whose pattern is a substring of the URL.
struct MockHttp {
    routes: Vec<(&'static str, Reply)>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockHttp {
    fn new(routes: Vec<(&'static str, Reply)>) -> Self {
        Self { routes, calls: Arc::new(Mutex::new(Vec::new())) }
    }
}

#[async_trait]
impl HttpClientPort for MockHttp {
    async fn get(&self, url: &str) -> std::result::Result<HttpGetResult, ExternalError> {
        self.calls.lock().await.push(url.to_string());
        let reply = self
            .routes
            .iter()
            .find(|(pattern, _)| url.contains(pattern))
            .map(|(_, reply)| reply.clone());
        match reply {
            Some(Reply::Body(body)) => Ok(HttpGetResult::ok(body)),
            Some(Reply::Status(status)) => Ok(HttpGetResult::with_status(status)),
            Some(Reply::Panic) => panic!("mock dependency blew up for {}", url),
            None => Ok(HttpGetResult::with_status(404)),
        }
    }
}

/// Delegates to an in-memory store but refuses writes for selected IDs.
struct FlakyStore {
    inner: InMemoryRecordStore,
    reject_updates: Vec<&'static str>,
    fail_fetch: bool,
}

#[async_trait]
impl RecordStorePort for FlakyStore {
    async fn fetch_pending(
        &self,
        limit: usize,
        include_partial: bool,
        after: Option<&str>,
    ) -> Result<Vec<RestaurantRecord>> {
        if self.fail_fetch {
            return Err(EnrichError::StoreUnavailable("database is locked".to_string()));
        }
        self.inner.fetch_pending(limit, include_partial, after).await
    }

    async fn update(&self, record: &RestaurantRecord) -> Result<()> {
        if self.reject_updates.contains(&record.id.as_str()) {
            return Err(EnrichError::Persistence {
                record_id: record.id.clone(),
                message: "disk full".to_string(),
            });
        }
        self.inner.update(record).await
    }

    async fn count_by_status(&self) -> Result<BTreeMap<EnrichmentStatus, u64>> {
        self.inner.count_by_status().await
    }

    async fn snapshot(&self) -> Result<Vec<RestaurantRecord>> {
        self.inner.snapshot().await
    }

    async fn insert_many(&self, records: &[RestaurantRecord]) -> Result<usize> {
        self.inner.insert_many(records).await
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.batch_size = 2;
    config.pipeline.skip_square_footage = true;
    config.concept.listing_url = Some("http://listing.test/search".to_string());
    config.population.geocode_url = "http://geo.test/search".to_string();
    config.population.census_api_key = None;
    config.square_footage.search_url = Some("http://property.test/find".to_string());
    for dep in [
        &mut config.concept.dependency,
        &mut config.population.dependency,
        &mut config.square_footage.dependency,
    ] {
        dep.min_interval_ms = 0;
        dep.base_delay_ms = 1;
        dep.max_delay_ms = 5;
        dep.jitter_ratio = 0.0;
    }
    config
}

fn restaurant(id: &str, name: &str) -> RestaurantRecord {
    let mut record = RestaurantRecord::new(id);
    record.location_name = Some(name.to_string());
    record.location_address = Some("100 Main St".to_string());
    record.location_city = Some("Houston".to_string());
    record.location_state = Some("TX".to_string());
    record.location_zip = Some("77002".to_string());
    record.location_county = Some("Harris".to_string());
    record
}

fn standard_routes() -> Vec<(&'static str, Reply)> {
    vec![
        ("q=Closed", Reply::Status(404)),
        ("listing.test", Reply::Body(LISTING_PAGE)),
        ("geo.test", Reply::Body(GEOCODE_HIT)),
    ]
}

fn pipeline_for(
    config: &AppConfig,
    store: Arc<dyn RecordStorePort>,
    http: Arc<dyn HttpClientPort>,
) -> EnrichmentPipeline {
    EnrichmentPipeline::from_config(config, store, http, CancellationToken::new())
}

#[tokio::test]
async fn test_mixed_outcomes_without_square_footage() {
    let config = test_config();
    let store = InMemoryRecordStore::with_records(vec![
        restaurant("r1", "Alpha"),
        restaurant("r2", "Bravo"),
        restaurant("r3", "Closed"),
    ]);
    let http = Arc::new(MockHttp::new(standard_routes()));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http.clone());

    let summary = pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    assert_eq!(summary.records_processed, 3);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.external_calls, 6);
    assert_eq!(summary.status_count(EnrichmentStatus::Enriched), 2);
    assert_eq!(summary.status_count(EnrichmentStatus::PartiallyEnriched), 1);
    let rate = summary.step_success_rate(StepKind::ConceptClassification).unwrap();
    assert!((rate - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(summary.step_success_rate(StepKind::PopulationAnalysis), Some(1.0));

    assert_eq!(store.get("r1").unwrap().enrichment_status, EnrichmentStatus::Enriched);
    assert_eq!(store.get("r2").unwrap().enrichment_status, EnrichmentStatus::Enriched);
    let r3 = store.get("r3").unwrap();
    assert_eq!(r3.enrichment_status, EnrichmentStatus::PartiallyEnriched);
    assert_eq!(
        r3.outcome(StepKind::ConceptClassification),
        &StepOutcome::Failed { error_kind: ErrorKind::ClientError, attempts: 1 }
    );
    assert!(r3.outcome(StepKind::PopulationAnalysis).is_success());
    assert_eq!(r3.outcome(StepKind::SquareFootage), &StepOutcome::NotAttempted);
    assert!(r3.last_enriched_at.is_some());

    let (population, _) = store.get("r1").unwrap().population().map(|(p, c)| (p.clone(), c)).unwrap();
    assert_eq!(population.source, "zip_estimation");
    assert!((population.latitude - 29.7604).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_address_skips_without_calls() {
    let mut config = test_config();
    config.pipeline.skip_square_footage = false;
    let mut record = RestaurantRecord::new("r1");
    record.location_name = Some("Lonely Tavern".to_string());
    record.location_city = Some("Houston".to_string());
    let store = InMemoryRecordStore::with_records(vec![record]);
    let http = Arc::new(MockHttp::new(standard_routes()));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http.clone());

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let stored = store.get("r1").unwrap();
    let missing = StepOutcome::skipped_missing("address");
    assert_eq!(stored.outcome(StepKind::PopulationAnalysis), &missing);
    assert_eq!(stored.outcome(StepKind::SquareFootage), &missing);
    assert!(stored.outcome(StepKind::ConceptClassification).is_success());
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Enriched);

    let calls = pipeline.limiter_calls();
    assert_eq!(calls[&StepKind::PopulationAnalysis], 0);
    assert_eq!(calls[&StepKind::SquareFootage], 0);
    assert_eq!(calls[&StepKind::ConceptClassification], 1);
    assert!(http.calls.lock().await.iter().all(|url| url.contains("listing.test")));
}

#[tokio::test]
async fn test_rerun_does_not_repeat_completed_work() {
    let config = test_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha"), restaurant("r2", "Bravo")]);
    let batch = BatchRun::from_config(&config.pipeline);

    let first_http = Arc::new(MockHttp::new(standard_routes()));
    pipeline_for(&config, Arc::new(store.clone()), first_http.clone()).run(&batch).await.unwrap();
    assert_eq!(store.write_count(), 2);
    let after_first = store.snapshot().await.unwrap();

    let second_http = Arc::new(MockHttp::new(standard_routes()));
    let summary = pipeline_for(&config, Arc::new(store.clone()), second_http.clone())
        .run(&batch)
        .await
        .unwrap();

    assert_eq!(summary.records_processed, 0);
    assert_eq!(summary.external_calls, 0);
    assert!(second_http.calls.lock().await.is_empty());
    assert_eq!(store.write_count(), 2);
    assert_eq!(store.snapshot().await.unwrap(), after_first);
}

#[tokio::test]
async fn test_rerun_retries_only_failed_steps() {
    let config = test_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r3", "Closed")]);
    let batch = BatchRun::from_config(&config.pipeline);

    let first_http = Arc::new(MockHttp::new(standard_routes()));
    pipeline_for(&config, Arc::new(store.clone()), first_http).run(&batch).await.unwrap();
    assert_eq!(store.get("r3").unwrap().enrichment_status, EnrichmentStatus::PartiallyEnriched);

    let recovered = Arc::new(MockHttp::new(vec![
        ("listing.test", Reply::Body(LISTING_PAGE)),
        ("geo.test", Reply::Body(GEOCODE_HIT)),
    ]));
    let summary = pipeline_for(&config, Arc::new(store.clone()), recovered.clone())
        .run(&batch)
        .await
        .unwrap();

    assert_eq!(summary.records_processed, 1);
    let calls = recovered.calls.lock().await.clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("listing.test"));
    assert_eq!(store.get("r3").unwrap().enrichment_status, EnrichmentStatus::Enriched);
}

#[tokio::test]
async fn test_panicking_step_is_isolated() {
    let config = test_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha"), restaurant("r2", "Bravo")]);
    let http = Arc::new(MockHttp::new(vec![
        ("listing.test", Reply::Panic),
        ("geo.test", Reply::Body(GEOCODE_HIT)),
    ]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http);

    let summary = pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    assert_eq!(summary.records_processed, 2);
    for id in ["r1", "r2"] {
        let record = store.get(id).unwrap();
        assert_eq!(record.outcome(StepKind::ConceptClassification), &StepOutcome::internal_failure());
        assert!(record.outcome(StepKind::PopulationAnalysis).is_success());
        assert_eq!(record.enrichment_status, EnrichmentStatus::PartiallyEnriched);
    }
}

#[tokio::test]
async fn test_persistence_failure_discards_outcome() {
    let config = test_config();
    let inner = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha"), restaurant("r2", "Bravo")]);
    let store = Arc::new(FlakyStore { inner: inner.clone(), reject_updates: vec!["r2"], fail_fetch: false });
    let http = Arc::new(MockHttp::new(standard_routes()));
    let pipeline = pipeline_for(&config, store, http);

    let summary = pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    assert_eq!(summary.records_processed, 2);
    assert_eq!(summary.persistence_failures, 1);
    assert_eq!(summary.status_count(EnrichmentStatus::Enriched), 1);
    assert_eq!(inner.get("r1").unwrap().enrichment_status, EnrichmentStatus::Enriched);
    let r2 = inner.get("r2").unwrap();
    assert_eq!(r2, restaurant("r2", "Bravo"));
}

#[tokio::test]
async fn test_unavailable_store_is_a_hard_stop() {
    let config = test_config();
    let store = Arc::new(FlakyStore {
        inner: InMemoryRecordStore::new(),
        reject_updates: Vec::new(),
        fail_fetch: true,
    });
    let http = Arc::new(MockHttp::new(standard_routes()));
    let pipeline = pipeline_for(&config, store, http);

    let result = pipeline.run(&BatchRun::from_config(&config.pipeline)).await;
    assert!(matches!(result, Err(EnrichError::StoreUnavailable(_))));
}

#[tokio::test]
async fn test_cancelled_run_leaves_records_untouched() {
    let config = test_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha")]);
    let http = Arc::new(MockHttp::new(standard_routes()));
    let cancel = CancellationToken::new();
    let pipeline = EnrichmentPipeline::from_config(&config, Arc::new(store.clone()), http.clone(), cancel.clone());

    cancel.cancel();
    let summary = pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.records_processed, 0);
    assert!(http.calls.lock().await.is_empty());
    assert_eq!(store.get("r1").unwrap().enrichment_status, EnrichmentStatus::Pending);
}

#[tokio::test]
async fn test_limit_caps_processed_records() {
    let config = test_config();
    let store = InMemoryRecordStore::with_records(vec![
        restaurant("r1", "Alpha"),
        restaurant("r2", "Bravo"),
        restaurant("r4", "Delta"),
    ]);
    let http = Arc::new(MockHttp::new(standard_routes()));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http);

    let mut batch = BatchRun::from_config(&config.pipeline);
    batch.limit = Some(1);
    let summary = pipeline.run(&batch).await.unwrap();

    assert_eq!(summary.records_processed, 1);
    assert_eq!(store.get("r1").unwrap().enrichment_status, EnrichmentStatus::Enriched);
    assert_eq!(store.get("r4").unwrap().enrichment_status, EnrichmentStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_retry_wait_keeps_record_pending() {
    let mut config = test_config();
    config.pipeline.skip_population_analysis = true;
    config.concept.dependency.base_delay_ms = 10_000;
    config.concept.dependency.max_delay_ms = 10_000;
    config.concept.dependency.max_attempts = 3;
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha")]);
    let http = Arc::new(MockHttp::new(vec![("listing.test", Reply::Status(503))]));
    let cancel = CancellationToken::new();
    let pipeline = EnrichmentPipeline::from_config(&config, Arc::new(store.clone()), http.clone(), cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let summary = pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.records_processed, 1);
    assert_eq!(summary.step_outcomes[&StepKind::ConceptClassification].not_attempted, 1);
    assert_eq!(http.calls.lock().await.len(), 1);

    let stored = store.get("r1").unwrap();
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Pending);
    assert_eq!(stored.outcome(StepKind::ConceptClassification), &StepOutcome::NotAttempted);
    assert!(stored.last_enriched_at.is_none());
    let ids: Vec<String> = store.fetch_pending(10, true, None).await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["r1"]);
}

const SEARCH_WITH_LINKS: &str = r#"<html><body>
<a href="https://joesgrill.test/about">About us</a>
<a href="https://www.loopnet.com/listing/1">Listing</a>
</body></html>"#;

const SEARCH_WITHOUT_RESULTS: &str = "<html><body><p>No results</p></body></html>";

fn square_footage_config() -> AppConfig {
    let mut config = test_config();
    config.pipeline.skip_concept_classification = true;
    config.pipeline.skip_population_analysis = true;
    config.pipeline.skip_square_footage = false;
    config
}

fn without_county_appraiser(id: &str) -> RestaurantRecord {
    let mut record = restaurant(id, "Alpha");
    record.location_county = Some("Loving".to_string());
    record
}

#[tokio::test]
async fn test_square_footage_from_county_appraiser() {
    let config = square_footage_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha")]);
    let http = Arc::new(MockHttp::new(vec![("hcad.org", Reply::Body("<p>Building area: 2,400 sq ft</p>"))]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http.clone());

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let stored = store.get("r1").unwrap();
    let (fields, confidence) = stored.square_footage().unwrap();
    assert_eq!(fields.square_footage, 2_400);
    assert_eq!(fields.source, "county_records");
    assert_eq!(confidence, 0.9);
    assert!(fields.source_url.as_deref().unwrap().contains("hcad.org"));
    assert_eq!(fields.sources_tried, vec!["county_records"]);
    assert_eq!(http.calls.lock().await.len(), 1);
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Enriched);
}

#[tokio::test]
async fn test_square_footage_from_commercial_listing_link() {
    let config = square_footage_config();
    let store = InMemoryRecordStore::with_records(vec![without_county_appraiser("r1")]);
    let http = Arc::new(MockHttp::new(vec![
        ("joesgrill.test", Reply::Body("<p>Family owned since 1990</p>")),
        ("loopnet.com", Reply::Body("<p>Retail space of 3,200 square feet</p>")),
        ("property.test", Reply::Body(SEARCH_WITH_LINKS)),
    ]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http.clone());

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let stored = store.get("r1").unwrap();
    let (fields, confidence) = stored.square_footage().unwrap();
    assert_eq!(fields.square_footage, 3_200);
    assert_eq!(fields.source, "commercial_real_estate");
    assert_eq!(confidence, 0.8);
    assert_eq!(fields.source_url.as_deref(), Some("https://www.loopnet.com/listing/1"));
    assert_eq!(fields.sources_tried, vec!["web_search", "website", "commercial_real_estate"]);

    let calls = http.calls.lock().await.clone();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with("http://property.test/find?q=%22Alpha%22+100+Main+St"));
}

#[tokio::test]
async fn test_square_footage_from_restaurant_website_link() {
    let config = square_footage_config();
    let store = InMemoryRecordStore::with_records(vec![without_county_appraiser("r1")]);
    let http = Arc::new(MockHttp::new(vec![
        ("joesgrill.test", Reply::Body("<p>Our 2,800 sq ft dining room seats 90</p>")),
        ("loopnet.com", Reply::Body("<p>Retail space of 3,200 square feet</p>")),
        ("property.test", Reply::Body(SEARCH_WITH_LINKS)),
    ]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http.clone());

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let (fields, confidence) = store.get("r1").unwrap().square_footage().map(|(f, c)| (f.clone(), c)).unwrap();
    assert_eq!(fields.square_footage, 2_800);
    assert_eq!(fields.source, "website");
    assert_eq!(confidence, 0.7);
    assert!(http.calls.lock().await.iter().all(|url| !url.contains("loopnet.com")));
}

#[tokio::test]
async fn test_square_footage_without_figure_is_no_data() {
    let config = square_footage_config();
    let store = InMemoryRecordStore::with_records(vec![without_county_appraiser("r1")]);
    let http = Arc::new(MockHttp::new(vec![("property.test", Reply::Body(SEARCH_WITHOUT_RESULTS))]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http);

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let stored = store.get("r1").unwrap();
    assert_eq!(
        stored.outcome(StepKind::SquareFootage),
        &StepOutcome::Failed { error_kind: ErrorKind::NoData, attempts: 1 }
    );
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Failed);
}

#[tokio::test]
async fn test_square_footage_reports_county_failure_kind() {
    let mut config = square_footage_config();
    config.square_footage.search_url = None;
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha")]);
    let http = Arc::new(MockHttp::new(vec![("hcad.org", Reply::Status(503))]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http);

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    assert_eq!(
        store.get("r1").unwrap().outcome(StepKind::SquareFootage),
        &StepOutcome::Failed { error_kind: ErrorKind::ServerError, attempts: 3 }
    );
    assert_eq!(pipeline.limiter_calls()[&StepKind::SquareFootage], 3);
}

#[tokio::test]
async fn test_square_footage_county_failure_outranks_empty_search() {
    let config = square_footage_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha")]);
    let http = Arc::new(MockHttp::new(vec![
        ("hcad.org", Reply::Status(503)),
        ("property.test", Reply::Body(SEARCH_WITHOUT_RESULTS)),
    ]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http);

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let stored = store.get("r1").unwrap();
    assert_eq!(
        stored.outcome(StepKind::SquareFootage),
        &StepOutcome::Failed { error_kind: ErrorKind::ServerError, attempts: 4 }
    );
    assert_eq!(pipeline.limiter_calls()[&StepKind::SquareFootage], 4);
}

fn census_config() -> AppConfig {
    let mut config = test_config();
    config.pipeline.skip_concept_classification = true;
    config.population.census_api_key = Some("k".to_string());
    config.population.census_url = "http://census.test/data".to_string();
    config
}

#[tokio::test]
async fn test_population_from_census() {
    let config = census_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha")]);
    let http = Arc::new(MockHttp::new(vec![
        (
            "census.test",
            Reply::Body(
                r#"{"total_population": 30000, "median_age": 35.0, "median_household_income": 60000.0, "average_household_size": 2.5}"#,
            ),
        ),
        ("geo.test", Reply::Body(GEOCODE_HIT)),
    ]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http.clone());

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let stored = store.get("r1").unwrap();
    let (population, confidence) = stored.population().unwrap();
    assert_eq!(population.source, "census_api");
    assert_eq!(confidence, 0.8);
    assert_eq!(population.median_income, Some(60_000.0));
    assert_eq!(population.average_household_size, Some(2.5));
    assert!(population.population_1_mile > 15_200);

    let calls = http.calls.lock().await.clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].contains("zip=77002") && calls[1].contains("key=k"));
}

#[tokio::test]
async fn test_malformed_census_response_fails_without_retry() {
    let config = census_config();
    let store = InMemoryRecordStore::with_records(vec![restaurant("r1", "Alpha")]);
    let http = Arc::new(MockHttp::new(vec![
        ("census.test", Reply::Body("{not json")),
        ("geo.test", Reply::Body(GEOCODE_HIT)),
    ]));
    let pipeline = pipeline_for(&config, Arc::new(store.clone()), http);

    pipeline.run(&BatchRun::from_config(&config.pipeline)).await.unwrap();

    let stored = store.get("r1").unwrap();
    assert_eq!(
        stored.outcome(StepKind::PopulationAnalysis),
        &StepOutcome::Failed { error_kind: ErrorKind::MalformedResponse, attempts: 1 }
    );
    assert_eq!(stored.enrichment_status, EnrichmentStatus::Failed);
}
