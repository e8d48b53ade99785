use listing_scout::config::ScoutConfig;
use listing_scout::http::HttpClient;
use listing_scout::liveness::LivenessChecker;
use listing_scout::scrapers::{run_scanner, scanner_for, Pipeline};
use listing_scout::storage::Database;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🏠 Listing Scout");

    let config = ScoutConfig::from_env();
    let db = Database::connect(&config.database_url, config.database_max_connections).await?;
    let http = HttpClient::from_config(&config)?;
    info!(
        identities = http.identities(),
        sources = ?config.enabled_sources,
        liveness = config.liveness_enabled,
        "pipeline configured"
    );

    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for source in config.enabled_sources.iter().copied() {
        let mut scanner = scanner_for(source, Pipeline::new(http.clone(), &db));
        let pause = config.parser_pause;
        let token = token.clone();
        tasks.spawn(async move { run_scanner(scanner.as_mut(), pause, token).await });
    }

    if config.liveness_enabled {
        let checker = LivenessChecker::from_config(&config, http.clone(), db.listings());
        let token = token.clone();
        tasks.spawn(async move { checker.run(token).await });
    }

    if tasks.is_empty() {
        warn!("no scanners enabled and liveness disabled, nothing to do");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, waiting for workers");
    token.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "worker task failed");
        }
    }

    info!("✅ stopped");
    Ok(())
}
