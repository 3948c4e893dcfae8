use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod api;
mod config;
mod db;
mod error;
mod pipeline;
mod source;
mod tasks;

use api::AppState;
use config::Config;
use pipeline::{Extractor, NoProgress, Scope};
use source::{SofaScoreClient, StatsSource};
use tasks::jobs::{JobContext, SourceFactory};
use tasks::TaskManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let client_settings = config.client_settings();
    let source_factory: SourceFactory = Arc::new(move || -> Result<Arc<dyn StatsSource>> {
        let client = SofaScoreClient::new(client_settings.clone())?;
        Ok(Arc::new(client) as Arc<dyn StatsSource>)
    });

    if let Some(season_id) = config.extract_season {
        return extract_once(&config, source_factory, season_id).await;
    }

    // Open database (read side of the API)
    let db = config.database_settings().open()?;
    info!(
        "Database opened: {} (collection '{}', {:?})",
        config.database_path,
        config.collection,
        db.dedup_policy()
    );

    let tasks = TaskManager::new(config.task_settings());
    let state = AppState {
        db: db.clone(),
        jobs: JobContext {
            source_factory,
            database: config.database_settings(),
            max_rounds: config.max_rounds,
            default_tournament: config.default_tournament(),
            base_url: config.source_base_url.clone(),
            cutoff_year: config.cutoff(),
        },
        tasks: tasks.clone(),
    };
    let app = api::router(state);

    let addr: SocketAddr = config.api_addr.parse()?;
    info!(
        "API listening on http://{} ({} worker slot(s))",
        addr, config.worker_concurrency
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
        })
        .await?;

    tasks.shutdown();
    db.disconnect()?;
    info!("Stopped");
    Ok(())
}

/// Run the season pipeline in the foreground and print a JSON summary.
async fn extract_once(config: &Config, source_factory: SourceFactory, season_id: i64) -> Result<()> {
    let extractor = Extractor::new(source_factory()?, config.max_rounds);
    let scope = Scope::Season {
        tournament_id: config.tournament_id,
        season_id,
    };
    let store = config.persist.then(|| config.database_settings());
    info!(
        "Extracting season {} of tournament {}{}",
        season_id,
        config.tournament_id,
        if store.is_some() { " (storing results)" } else { "" }
    );

    let report = pipeline::run(&extractor, &scope, store.as_ref(), &NoProgress).await?;
    let summary = serde_json::json!({
        "season_id": season_id,
        "total_games": report.games.len(),
        "stored": report.stored,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
