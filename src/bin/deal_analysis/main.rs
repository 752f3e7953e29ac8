//! Deal analysis run - fetch, parse, analyze, write and notify

use anyhow::{Context, Result};
use clap::Parser;
use deal_scout::analysis::market::{CityAverageSource, InventorySource, NoMarketData, SourceChain};
use deal_scout::analysis::{
    BatchAnalysisRunner, BatchReport, BatchSummary, CancelFlag, DealAnalyzer, MarketStatsProvider,
};
use deal_scout::config::{AnalysisConfig, RunConfig};
use deal_scout::ingestion::{enrich, fetch, parse, write, Listing, RawData};
use deal_scout::notify::{self, NotifyStats, TelegramNotifier};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "deal-analysis", about = "Analyze collected property listings for deals")]
struct Args {
    /// Collector output on disk (.json or .csv)
    #[arg(long, conflicts_with = "feed", required_unless_present = "feed")]
    input: Option<PathBuf>,

    /// Collector JSON feed URL
    #[arg(long)]
    feed: Option<String>,

    /// Collector name, used to prefix listing ids
    #[arg(long, default_value = "collector")]
    source: String,

    /// Analysis config TOML (overrides ANALYSIS_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Analyze and log only, no database or notifications
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    no_notify: bool,

    /// Repeat the run every N hours until interrupted
    #[arg(
        long,
        value_name = "HOURS",
        conflicts_with = "dry_run",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    info!("🚀 Starting deal analysis run");

    let run_config = RunConfig::from_env()?;
    let config_path = args
        .config
        .clone()
        .or_else(|| run_config.analysis_config_path.clone());
    let config = AnalysisConfig::load(config_path.as_deref())
        .context("Invalid analysis configuration")?;
    info!("Configuration loaded");

    if args.dry_run {
        return dry_run(&args, &config).await;
    }

    info!("📦 Connecting to database...");
    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(run_config.require_database_url()?)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("Failed to run migrations")?;

    let Some(hours) = args.interval else {
        run_once(&db, &args, &run_config, &config).await?;
        info!("🎉 Deal analysis run finished");
        return Ok(());
    };

    info!("Running every {}h until interrupted", hours);
    loop {
        match run_once(&db, &args, &run_config, &config).await {
            Ok(summary) if summary.cancelled => break,
            Ok(_) => {}
            Err(e) => error!("Run failed, retrying at the next interval: {:#}", e),
        }

        info!("Next run in {}h", hours);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(hours.saturating_mul(3600))) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping");
                break;
            }
        }
    }

    info!("🎉 Deal analysis stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .init();
    }
}

/// Steps 1 and 2: collector output to listings
async fn load_listings(args: &Args) -> Result<Vec<Listing>> {
    // Step 1: Fetch collector output
    info!("Step 1/5: Fetching listings...");
    let raw = fetch_raw(args).await?;
    info!("✓ Fetch complete");

    // Step 2: Parse into Listing structs
    info!("Step 2/5: Parsing listings...");
    let parsed = parse::parse_listings(raw, &args.source)?;
    info!(
        "✓ Parsed {} listings ({} rejected)",
        parsed.listings.len(),
        parsed.rejected
    );

    Ok(parsed.listings)
}

async fn dry_run(args: &Args, config: &AnalysisConfig) -> Result<()> {
    let listings = load_listings(args).await?;

    warn!("Dry run: using placeholder market data, nothing is written or sent");
    let analyzer = DealAnalyzer::new(MarketStatsProvider::new(NoMarketData, &config.market), config);
    let (report, _) = analyze(analyzer, listings).await?;
    for failure in &report.failures {
        info!("Failed: {} ({})", failure.external_id, failure.error);
    }
    for analysis in &report.analyses {
        info!(
            "{}: {} score={} vs market={:?}%",
            analysis.property_id,
            analysis.deal_type,
            analysis.investment_score,
            analysis.price_vs_market_percent
        );
    }
    info!("🎉 Dry run finished: {}", report.summary());
    Ok(())
}

/// One logged run: fetch, parse, analyze, write and notify
async fn run_once(
    db: &PgPool,
    args: &Args,
    run_config: &RunConfig,
    config: &AnalysisConfig,
) -> Result<BatchSummary> {
    let listings = load_listings(args).await?;

    if let Some(previous) = write::latest_run(db).await? {
        info!(
            "Previous run {} ({}) analyzed {}/{} listings",
            previous.id, previous.status, previous.listings_analyzed, previous.listings_total
        );
    }

    let run_id = write::log_run_start(db, listings.len()).await?;

    match run_pipeline(db, args, run_config, config, listings).await {
        Ok(report) => {
            let summary = report.summary();
            if summary.cancelled {
                warn!("⚠️ Run cancelled: {}", summary);
            } else {
                info!("✅ Run completed: {}", summary);
            }
            write::log_run_complete(db, run_id, &summary).await?;
            Ok(summary)
        }
        Err(e) => {
            error!("❌ Run failed: {:#}", e);
            write::log_run_failed(db, run_id, &format!("{:#}", e)).await?;
            Err(e)
        }
    }
}

async fn fetch_raw(args: &Args) -> Result<RawData> {
    match (&args.input, &args.feed) {
        (Some(path), _) => fetch::load_file(path),
        (None, Some(url)) => fetch::fetch_feed(url).await,
        (None, None) => Err(anyhow::anyhow!("Either --input or --feed is required")),
    }
}

/// Run the batch on a blocking thread so Ctrl-C can cancel it between listings
async fn analyze(analyzer: DealAnalyzer, listings: Vec<Listing>) -> Result<(BatchReport, Vec<Listing>)> {
    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current listing");
            on_signal.cancel();
        }
    });

    let result = tokio::task::spawn_blocking(move || {
        let report = BatchAnalysisRunner::new(&analyzer)
            .with_cancel(cancel)
            .run(&listings);
        (report, listings)
    })
    .await
    .context("Analysis task panicked")?;

    signal_task.abort();
    Ok(result)
}

async fn run_pipeline(
    db: &PgPool,
    args: &Args,
    run_config: &RunConfig,
    config: &AnalysisConfig,
    listings: Vec<Listing>,
) -> Result<BatchReport> {
    // Step 3: Analyze against stored inventory
    info!("Step 3/5: Analyzing listings...");
    let inventory = write::load_inventory(db).await?;
    let averages = write::city_averages(db).await?;
    let source = SourceChain::new()
        .with(InventorySource::new(inventory, config.market.min_segment_sample))
        .with(CityAverageSource::new(averages));
    let analyzer = DealAnalyzer::new(MarketStatsProvider::new(source, &config.market), config);

    let (report, listings) = analyze(analyzer, listings).await?;
    info!("✓ Analysis complete: {}", report.summary());

    // Step 4: Write to database
    info!("Step 4/5: Writing to database...");
    let analyzed = enrich::attach_analyses(listings, report.analyses.clone());
    let writes = write::write_analyzed(db, &analyzed).await?;
    info!("✓ Write complete");

    // Step 5: Notify subscribers
    info!("Step 5/5: Sending alerts...");
    let token = match (&run_config.telegram_bot_token, args.no_notify) {
        (_, true) => {
            info!("Notifications disabled (--no-notify)");
            return Ok(report);
        }
        (None, false) => {
            warn!("TELEGRAM_BOT_TOKEN not set, skipping alerts");
            return Ok(report);
        }
        (Some(token), false) => token.clone(),
    };

    let notifier = TelegramNotifier::new(token)?;
    let stats = match write::load_subscriptions(db).await {
        Ok(subs) => {
            let mut stats = notifier.send_alerts(&subs, &analyzed).await;
            stats += notifier
                .send_price_drops(&subs, &analyzed, &writes.price_drops)
                .await;
            stats
        }
        Err(e) => {
            warn!("Could not load subscriptions, skipping alerts: {:#}", e);
            NotifyStats::default()
        }
    };

    if let Some(admin) = run_config.admin_chat_id {
        let text = notify::summary_text(&report.summary(), Some(&writes), &stats);
        notifier.send_summary(admin, &text).await;
    }
    info!("✓ Alerts complete");

    Ok(report)
}
