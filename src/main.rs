use anyhow::Context;
use car_scout::config::Config;
use car_scout::crawl::{
    CancellationController, DelayPolicy, LeaseOfferFilter, PaginationController, PoliteDelayScheduler,
};
use car_scout::scrapers::BytbilScraper;
use car_scout::storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::from_env()?;

    info!("🚗 Car Scout - Bytbil listing tracker");
    info!("======================================");

    let storage = Storage::connect(&cfg.database_url)
        .await
        .context("Failed to open database")?;
    let scraper = BytbilScraper::with_config(&cfg.base_url, cfg.request_timeout)?;

    let cancel = CancellationController::new();
    cancel.stop_on_signals();

    let controller = PaginationController::new(
        scraper,
        storage,
        LeaseOfferFilter::new(&cfg.lease_markers),
        PoliteDelayScheduler::new(DelayPolicy::default(), cancel.clone()),
        cancel,
    )
    .with_max_pages(cfg.max_pages);

    let summary = controller.run(&cfg.search).await?;

    info!(
        "✅ Run {} finished: {} new, {} updated, {} price changes",
        summary.run_id, summary.created, summary.updated, summary.price_changes
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
