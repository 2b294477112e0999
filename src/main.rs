use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tabc_enrich::app::enrich_use_case::EnrichUseCase;
use tabc_enrich::app::ports::RecordStorePort;
use tabc_enrich::app::validate_use_case::ValidateUseCase;
use tabc_enrich::config::AppConfig;
use tabc_enrich::domain::{EnrichmentStatus, RestaurantRecord, StepKind};
use tabc_enrich::infra::http_client::ReqwestHttp;
use tabc_enrich::infra::report_output_adapter::FileReportOutputAdapter;
use tabc_enrich::infra::sqlite_store::SqliteRecordStore;
use tabc_enrich::logging;
use tabc_enrich::pipeline::enrichment::{BatchRun, EnrichmentPipeline, PipelineSummary};
use tabc_enrich::pipeline::validation::{QualityReport, ValidationEngine};

#[derive(Parser)]
#[command(name = "tabc_enrich")]
#[command(about = "Enrich TABC restaurant records and score their data quality")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path, overrides the configured one
    #[arg(long, global = true)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enrichment pipeline over pending records
    Enrich {
        /// Maximum number of records to process
        #[arg(long)]
        limit: Option<usize>,
        /// Records pulled per batch
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        skip_concept: bool,
        #[arg(long)]
        skip_population: bool,
        #[arg(long)]
        skip_square_footage: bool,
        /// Leave partially enriched records alone
        #[arg(long)]
        pending_only: bool,
        /// Score the record set once the run finishes
        #[arg(long)]
        validate: bool,
    },
    /// Score the stored record set
    Validate {
        /// Write the quality report as JSON
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print every top issue with its record IDs
        #[arg(long)]
        detailed: bool,
    },
    /// Print record counts by enrichment status
    Status,
    /// Load a JSON array of records into the store
    Import { file: PathBuf },
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    Ok(config)
}

fn open_store(config: &AppConfig) -> Result<Arc<SqliteRecordStore>> {
    let store = SqliteRecordStore::open(&config.database.path)
        .with_context(|| format!("opening record store at {}", config.database.path))?;
    Ok(Arc::new(store))
}

fn print_summary(summary: &PipelineSummary) {
    println!("\n📊 Enrichment Results (run {}):", summary.run_id);
    println!("   Records processed: {}", summary.records_processed);
    println!("   Batches: {}", summary.batches);
    println!("   External calls: {}", summary.external_calls);
    println!("   Elapsed: {:.1}s", summary.elapsed_ms as f64 / 1000.0);
    for (status, count) in &summary.status_counts {
        println!("   {}: {}", status, count);
    }
    for step in StepKind::ALL {
        if let Some(counts) = summary.step_outcomes.get(&step) {
            let rate = summary
                .step_success_rate(step)
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "   {}: {} ok ({} low confidence), {} skipped, {} failed, success rate {}",
                step, counts.success, counts.low_confidence, counts.skipped, counts.failed, rate
            );
        }
    }
    if summary.persistence_failures > 0 {
        println!("\n⚠️  {} records could not be saved and stay eligible for the next run", summary.persistence_failures);
    }
    if summary.cancelled {
        println!("\n🛑 Run was cancelled before all records were processed");
    }
}

fn print_report(report: &QualityReport, detailed: bool) {
    println!("\n🔍 Data Quality Report:");
    println!("   Records: {}", report.total_records);
    println!("   Overall score: {:.3}", report.overall_score);
    println!("   Errors: {}  Warnings: {}", report.error_count, report.warning_count);
    println!("   Duplicates: {}  Outliers: {}", report.duplicate_record_ids.len(), report.outlier_record_ids.len());

    println!("\n   Field fill rates:");
    for (field, rate) in &report.field_fill_rates {
        println!("     {:<20} {:>6.1}%", field, rate * 100.0);
    }
    println!("\n   Step success rates:");
    for (step, rate) in &report.step_success_rates {
        match rate {
            Some(r) => println!("     {:<24} {:>6.1}%", step, r * 100.0),
            None => println!("     {:<24} {:>7}", step, "n/a"),
        }
    }

    if !report.top_issues.is_empty() {
        println!("\n   Top issues:");
        for issue in &report.top_issues {
            println!("     {} on {} ({}): {}", issue.issue_type, issue.field, issue.rule, issue.count);
            if detailed {
                println!("       {}", issue.record_ids.join(", "));
            }
        }
    }

    println!("\n💡 Recommendations:");
    for recommendation in &report.recommendations {
        println!("   - {}", recommendation);
    }
}

async fn run_enrich(config: AppConfig, validate: bool) -> Result<()> {
    let store = open_store(&config)?;
    let client_timeout = [
        config.concept.dependency.call_timeout(),
        config.population.dependency.call_timeout(),
        config.square_footage.dependency.call_timeout(),
    ]
    .into_iter()
    .max()
    .unwrap_or_default();
    let http = Arc::new(ReqwestHttp::new(client_timeout).context("building HTTP client")?);

    let cancel = CancellationToken::new();
    let pipeline = EnrichmentPipeline::from_config(&config, store.clone(), http, cancel.clone());
    let mut use_case = EnrichUseCase::new(pipeline);
    if validate {
        use_case = use_case.with_validation(ValidateUseCase::new(
            store,
            ValidationEngine::with_default_rules(config.validation.clone()),
        ));
    }

    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop signal received, finishing in-flight records");
            signal.cancel();
        }
    });

    println!("🔄 Running enrichment pipeline...");
    let batch = BatchRun::from_config(&config.pipeline);
    let result = use_case.run(&batch).await?;
    print_summary(&result.summary);
    if let Some(report) = &result.report {
        print_report(report, false);
    }
    Ok(())
}

async fn run_validate(config: AppConfig, output: Option<PathBuf>, detailed: bool) -> Result<()> {
    let store = open_store(&config)?;
    let mut use_case =
        ValidateUseCase::new(store, ValidationEngine::with_default_rules(config.validation.clone()));
    if let Some(path) = &output {
        use_case = use_case.with_output(Box::new(FileReportOutputAdapter::new(path)));
    }

    println!("🔍 Validating record set...");
    let report = use_case.run().await?;
    print_report(&report, detailed);
    if let Some(path) = output {
        println!("\n📝 Report written to {}", path.display());
    }
    Ok(())
}

async fn run_status(config: AppConfig) -> Result<()> {
    let store = open_store(&config)?;
    let counts = store.count_by_status().await?;
    let total: u64 = counts.values().sum();

    println!("📋 Record store: {}", config.database.path);
    println!("   Total records: {}", total);
    for status in [
        EnrichmentStatus::Pending,
        EnrichmentStatus::PartiallyEnriched,
        EnrichmentStatus::Enriched,
        EnrichmentStatus::Failed,
    ] {
        println!("   {}: {}", status, counts.get(&status).copied().unwrap_or(0));
    }

    println!("\n⚙️  Configuration:");
    println!("   Batch size: {}", config.pipeline.batch_size);
    println!("   Worker concurrency: {}", config.pipeline.worker_concurrency);
    let steps: Vec<&str> = config.pipeline.enabled_steps().iter().map(|s| s.as_str()).collect();
    println!("   Enabled steps: {}", steps.join(", "));
    println!(
        "   Listing source: {}",
        config.concept.listing_url.as_deref().unwrap_or("none (name analysis only)")
    );
    println!(
        "   Census API key: {}",
        if config.population.census_api_key.is_some() { "configured" } else { "not set (ZIP estimates)" }
    );
    println!(
        "   Property search: {}",
        config.square_footage.search_url.as_deref().unwrap_or("none (county appraisers only)")
    );
    Ok(())
}

async fn run_import(config: AppConfig, file: PathBuf) -> Result<()> {
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let records: Vec<RestaurantRecord> =
        serde_json::from_str(&content).with_context(|| format!("parsing records from {}", file.display()))?;

    let store = open_store(&config)?;
    let inserted = store.insert_many(&records).await?;
    info!(read = records.len(), inserted, "import finished");
    println!("📥 Imported {} new records ({} already present)", inserted, records.len() - inserted);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    tabc_enrich::metrics::describe_all();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    let outcome = match cli.command {
        Commands::Enrich {
            limit,
            batch_size,
            skip_concept,
            skip_population,
            skip_square_footage,
            pending_only,
            validate,
        } => {
            let pipeline = &mut config.pipeline;
            if limit.is_some() {
                pipeline.limit = limit;
            }
            if let Some(size) = batch_size {
                pipeline.batch_size = size;
            }
            pipeline.skip_concept_classification |= skip_concept;
            pipeline.skip_population_analysis |= skip_population;
            pipeline.skip_square_footage |= skip_square_footage;
            if pending_only {
                pipeline.include_partial = false;
            }
            config.validate().context("invalid run options")?;
            run_enrich(config, validate).await
        }
        Commands::Validate { output, detailed } => run_validate(config, output, detailed).await,
        Commands::Status => run_status(config).await,
        Commands::Import { file } => run_import(config, file).await,
    };

    if let Err(e) = &outcome {
        error!("command failed: {:#}", e);
    }
    outcome
}
