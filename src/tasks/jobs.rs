//! Pipeline jobs run by the task executor.
//!
//! Every job builds its own source session from the factory and, when it
//! stores games, opens its own database connection.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::db::models::TournamentRef;
use crate::db::DatabaseSettings;
use crate::pipeline::{self, Extractor, ProgressHook, RunReport, Scope};
use crate::source::StatsSource;

/// Builds a fresh source session per job.
pub type SourceFactory = Arc<dyn Fn() -> Result<Arc<dyn StatsSource>> + Send + Sync>;

#[derive(Clone)]
pub struct JobContext {
    pub source_factory: SourceFactory,
    pub database: DatabaseSettings,
    pub max_rounds: u32,
    pub default_tournament: TournamentRef,
    pub base_url: String,
    pub cutoff_year: Option<i32>,
}

impl JobContext {
    pub fn extractor(&self) -> Result<Extractor> {
        let source = (self.source_factory)().context("Failed to start source session")?;
        Ok(Extractor::new(source, self.max_rounds))
    }

    /// The given tournament, or the configured default.
    pub fn tournament(&self, requested: Option<TournamentRef>) -> TournamentRef {
        requested.unwrap_or_else(|| self.default_tournament.clone())
    }

    pub fn competition_url(&self, tournament: &TournamentRef) -> String {
        tournament.competition_url(&self.base_url)
    }

    fn store(&self, transform: bool) -> Option<&DatabaseSettings> {
        transform.then_some(&self.database)
    }
}

fn report_fields(report: RunReport, result: &mut Map<String, Value>) -> Result<()> {
    result.insert("total_games".into(), json!(report.games.len()));
    result.insert(
        "games".into(),
        serde_json::to_value(&report.games).context("Failed to serialize games")?,
    );
    if let Some(stored) = report.stored {
        result.insert("inserted".into(), json!(stored.inserted));
        result.insert("skipped".into(), json!(stored.skipped));
    }
    Ok(())
}

/// Seasons of `tournament` that pass the configured cutoff year.
pub async fn seasons_job(
    ctx: JobContext,
    tournament: TournamentRef,
    hook: Arc<dyn ProgressHook>,
) -> Result<Value> {
    hook.report(pipeline::Progress::new(0, 100, "Fetching seasons"));
    let extractor = ctx.extractor()?;
    let seasons = extractor
        .seasons(&ctx.competition_url(&tournament), ctx.cutoff_year)
        .await?;
    Ok(json!({
        "status": "success",
        "seasons": seasons,
    }))
}

/// Games of one season; normalized and stored when `transform` is set.
pub async fn season_games_job(
    ctx: JobContext,
    season_id: i64,
    tournament_id: i64,
    transform: bool,
    hook: Arc<dyn ProgressHook>,
) -> Result<Value> {
    let extractor = ctx.extractor()?;
    let scope = Scope::Season {
        tournament_id,
        season_id,
    };
    let report = pipeline::run(&extractor, &scope, ctx.store(transform), hook.as_ref()).await?;

    let mut result = Map::new();
    result.insert("status".into(), json!("success"));
    result.insert("season_id".into(), json!(season_id));
    report_fields(report, &mut result)?;
    Ok(Value::Object(result))
}

/// Games of every wanted season of `tournament`.
pub async fn all_games_job(
    ctx: JobContext,
    tournament: TournamentRef,
    transform: bool,
    hook: Arc<dyn ProgressHook>,
) -> Result<Value> {
    let extractor = ctx.extractor()?;
    let scope = Scope::AllSeasons {
        competition_url: ctx.competition_url(&tournament),
        tournament_id: tournament.id,
        cutoff_year: ctx.cutoff_year,
    };
    let report = pipeline::run(&extractor, &scope, ctx.store(transform), hook.as_ref()).await?;

    let mut result = Map::new();
    result.insert("status".into(), json!("success"));
    result.insert("total_seasons".into(), json!(report.total_seasons.unwrap_or(0)));
    report_fields(report, &mut result)?;
    Ok(Value::Object(result))
}
