use clap::Parser;
use healthwatch::collection::CollectionService;
use healthwatch::config::Config;
use healthwatch::http::{self, AppState};
use healthwatch::setup;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect monitoring metrics on a schedule and serve application health over HTTP", long_about = None)]
struct Args {
    /// Path to the TOML config (falls back to $HEALTHWATCH_CONFIG, then healthwatch.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address from the config
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("healthwatch=info".parse()?))
        .init();

    let args = Args::parse();
    let config_path = Config::resolve_path(args.config.as_deref());
    let config = Config::load(Path::new(&config_path))?;
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());

    let repository = setup::open_repository(&config.storage)?;
    let collectors = setup::build_collectors(&config)?;
    let collection = Arc::new(CollectionService::new(collectors, Arc::clone(&repository)));
    tracing::info!(
        collectors = ?collection.collector_names(),
        interval_ms = config.collection.interval_ms,
        "Starting scheduled collection"
    );
    let scheduler = Arc::clone(&collection).spawn_scheduler(config.collection.interval());

    let app = http::router(AppState::new(repository, collection));
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(addr = %bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    scheduler.abort();
    Ok(())
}
