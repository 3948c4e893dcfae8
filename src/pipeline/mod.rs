pub mod games;
pub mod progress;
pub mod seasons;
pub mod transform;

pub use games::{collect_games_for_seasons, collect_season_games, DEFAULT_MAX_ROUNDS};
pub use progress::{NoProgress, Progress, ProgressHook};
pub use seasons::discover_seasons;

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::db::models::{Game, InsertSummary, Season, Tournament, TransformedGame};
use crate::db::DatabaseSettings;
use crate::error::EtlError;
use crate::source::StatsSource;

/// The extraction side of the pipeline, bound to one source session.
#[derive(Clone)]
pub struct Extractor {
    source: Arc<dyn StatsSource>,
    /// Round bound used when the source has no round metadata
    max_rounds: u32,
}

impl Extractor {
    pub fn new(source: Arc<dyn StatsSource>, max_rounds: u32) -> Self {
        Extractor { source, max_rounds }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub async fn tournaments(&self) -> Result<Vec<Tournament>, EtlError> {
        self.source.fetch_tournaments().await
    }

    pub async fn seasons(
        &self,
        competition_url: &str,
        cutoff_year: Option<i32>,
    ) -> Result<Vec<Season>, EtlError> {
        discover_seasons(self.source.as_ref(), competition_url, cutoff_year).await
    }

    pub async fn season_games(&self, tournament_id: i64, season_id: i64) -> Result<Vec<Game>, EtlError> {
        collect_season_games(self.source.as_ref(), tournament_id, season_id, self.max_rounds).await
    }

    /// Games of the given seasons, in season order.
    pub async fn seasons_games(&self, tournament_id: i64, seasons: &[Season]) -> Result<Vec<Game>, EtlError> {
        collect_games_for_seasons(self.source.as_ref(), tournament_id, seasons, self.max_rounds).await
    }
}

/// What a pipeline run extracts.
#[derive(Debug, Clone)]
pub enum Scope {
    Season {
        tournament_id: i64,
        season_id: i64,
    },
    AllSeasons {
        competition_url: String,
        tournament_id: i64,
        cutoff_year: Option<i32>,
    },
}

/// Games returned by a run: raw when nothing was stored, normalized otherwise.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RunGames {
    Raw(Vec<Game>),
    Transformed(Vec<TransformedGame>),
}

impl RunGames {
    pub fn len(&self) -> usize {
        match self {
            RunGames::Raw(games) => games.len(),
            RunGames::Transformed(games) => games.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Wanted seasons, for all-season runs
    pub total_seasons: Option<usize>,
    pub games: RunGames,
    pub stored: Option<InsertSummary>,
}

/// Extract `scope`; when `store` is given, normalize and persist the games too.
///
/// Milestones are reported on a 0–100 scale.
pub async fn run(
    extractor: &Extractor,
    scope: &Scope,
    store: Option<&DatabaseSettings>,
    hook: &dyn ProgressHook,
) -> Result<RunReport> {
    hook.report(Progress::new(0, 100, "Starting extraction"));

    let (games, total_seasons) = match scope {
        Scope::Season {
            tournament_id,
            season_id,
        } => {
            hook.report(Progress::new(
                5,
                100,
                format!("{} extractor ready", extractor.source_name()),
            ));
            let games = extractor.season_games(*tournament_id, *season_id).await?;
            hook.report(Progress::new(90, 100, format!("{} games extracted", games.len())));
            (games, None)
        }
        Scope::AllSeasons {
            competition_url,
            tournament_id,
            cutoff_year,
        } => {
            let seasons = extractor.seasons(competition_url, *cutoff_year).await?;
            hook.report(Progress::new(
                5,
                100,
                format!("Found {} seasons, starting extraction", seasons.len()),
            ));
            let games = extractor.seasons_games(*tournament_id, &seasons).await?;
            hook.report(Progress::new(
                90,
                100,
                format!("{} games extracted from {} seasons", games.len(), seasons.len()),
            ));
            (games, Some(seasons.len()))
        }
    };

    let Some(settings) = store else {
        return Ok(RunReport {
            total_seasons,
            games: RunGames::Raw(games),
            stored: None,
        });
    };

    let transformed = transform::normalize(&games);
    hook.report(Progress::new(
        93,
        100,
        format!(
            "{} games transformed ({} without statistics dropped)",
            transformed.len(),
            games.len() - transformed.len()
        ),
    ));

    let stored = if transformed.is_empty() {
        InsertSummary::default()
    } else {
        let db = settings.open()?;
        let summary = db.insert_games(&transformed)?;
        db.disconnect()?;
        summary
    };
    hook.report(Progress::new(
        97,
        100,
        format!(
            "Saved to database: {} inserted, {} already stored",
            stored.inserted, stored.skipped
        ),
    ));
    info!(
        "Run finished: {} games extracted, {} normalized, {} inserted",
        games.len(),
        transformed.len(),
        stored.inserted
    );

    Ok(RunReport {
        total_seasons,
        games: RunGames::Transformed(transformed),
        stored: Some(stored),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DedupPolicy;
    use crate::source::fake::{event, season, shots_group, FakeSource};
    use std::sync::Mutex;

    fn source() -> Arc<dyn StatsSource> {
        Arc::new(
            FakeSource {
                seasons: vec![season(2, "2024"), season(1, "2023")],
                ..FakeSource::default()
            }
            .with_round(2, 1, vec![event(21, "Flamengo", "Palmeiras", 3, 1), event(22, "Santos", "Bahia", 0, 0)])
            .with_round(1, 1, vec![event(11, "Flamengo", "Palmeiras", 1, 1)])
            .with_stats(21, vec![shots_group()])
            .with_stats(11, vec![shots_group()]),
        )
    }

    fn settings(dir: &tempfile::TempDir) -> DatabaseSettings {
        DatabaseSettings {
            path: dir.path().join("stats.db").to_string_lossy().into_owned(),
            collection: "football_stats".into(),
            dedup: DedupPolicy::SkipExisting,
        }
    }

    #[tokio::test]
    async fn test_raw_run_stores_nothing() {
        let extractor = Extractor::new(source(), 1);
        let scope = Scope::Season {
            tournament_id: 325,
            season_id: 2,
        };
        let report = run(&extractor, &scope, None, &NoProgress).await.unwrap();
        assert!(report.stored.is_none());
        assert!(matches!(report.games, RunGames::Raw(ref g) if g.len() == 2));
    }

    #[tokio::test]
    async fn test_stored_run_reports_milestones() {
        let dir = tempfile::tempdir().unwrap();
        let store = settings(&dir);
        let extractor = Extractor::new(source(), 1);
        let scope = Scope::AllSeasons {
            competition_url: "https://example.test/t".into(),
            tournament_id: 325,
            cutoff_year: Some(2013),
        };
        let seen = Mutex::new(Vec::new());
        let hook = |p: Progress| seen.lock().unwrap().push(p);

        let report = run(&extractor, &scope, Some(&store), &hook).await.unwrap();

        assert_eq!(report.total_seasons, Some(2));
        // game 22 has no statistics and is dropped
        assert_eq!(report.games.len(), 2);
        assert_eq!(report.stored.unwrap().inserted, 2);

        let steps: Vec<u32> = seen.lock().unwrap().iter().map(|p| p.current).collect();
        assert_eq!(steps, vec![0, 5, 90, 93, 97]);

        // a second run finds everything already stored
        let again = run(&extractor, &scope, Some(&store), &NoProgress).await.unwrap();
        assert_eq!(again.stored.unwrap().inserted, 0);
        assert_eq!(store.open().unwrap().read_games(&[]).unwrap().len(), 2);
    }
}
