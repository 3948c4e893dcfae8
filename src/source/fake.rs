//! In-memory [`StatsSource`] for pipeline, task and router tests.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::provider::StatsSource;
use crate::db::models::{Season, StatGroup, Tournament};
use crate::error::EtlError;

#[derive(Default)]
pub struct FakeSource {
    pub tournaments: Vec<Tournament>,
    pub seasons: Vec<Season>,
    /// (season id, round) → events
    pub rounds: HashMap<(i64, u32), Vec<Value>>,
    /// Rounds answered with a 404
    pub missing_rounds: HashSet<(i64, u32)>,
    /// Rounds answered with a 500
    pub failing_rounds: HashSet<(i64, u32)>,
    /// Games without an entry have no statistics block
    pub stats: HashMap<i64, Vec<StatGroup>>,
    pub round_count: Option<u32>,
    /// Every round request, in call order
    pub round_calls: Mutex<Vec<(i64, u32)>>,
}

impl FakeSource {
    pub fn with_round(mut self, season_id: i64, round: u32, events: Vec<Value>) -> Self {
        self.rounds.insert((season_id, round), events);
        self
    }

    pub fn with_stats(mut self, game_id: i64, groups: Vec<StatGroup>) -> Self {
        self.stats.insert(game_id, groups);
        self
    }

    pub fn requested_rounds(&self) -> Vec<(i64, u32)> {
        self.round_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

pub fn season(id: i64, year: &str) -> Season {
    Season {
        id,
        year: year.to_string(),
        extra: Map::new(),
    }
}

pub fn event(id: i64, home: &str, away: &str, home_score: i64, away_score: i64) -> Value {
    json!({
        "id": id,
        "homeTeam": {"name": home, "slug": home.to_lowercase()},
        "awayTeam": {"name": away, "slug": away.to_lowercase()},
        "homeScore": {"current": home_score, "display": home_score},
        "awayScore": {"current": away_score, "display": away_score},
        "status": {"type": "finished"}
    })
}

pub fn shots_group() -> StatGroup {
    StatGroup {
        group_name: "Shots".into(),
        statistics_items: vec![
            item(json!({"name": "Total shots", "home": "14", "away": "9", "homeValue": 14, "awayValue": 9, "compareCode": 1, "key": "totalShotsOnGoal"})),
            item(json!({"name": "Shots on target", "home": "5", "away": "3", "homeValue": 5, "awayValue": 3})),
        ],
    }
}

pub fn item(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl StatsSource for FakeSource {
    fn name(&self) -> &str {
        "Fake"
    }

    async fn fetch_tournaments(&self) -> Result<Vec<Tournament>, EtlError> {
        Ok(self.tournaments.clone())
    }

    async fn fetch_seasons_page(&self, _competition_url: &str) -> Result<Vec<Season>, EtlError> {
        Ok(self.seasons.clone())
    }

    async fn fetch_round_games(
        &self,
        _tournament_id: i64,
        season_id: i64,
        round: u32,
    ) -> Result<Vec<Value>, EtlError> {
        if let Ok(mut calls) = self.round_calls.lock() {
            calls.push((season_id, round));
        }
        if self.missing_rounds.contains(&(season_id, round)) {
            return Err(EtlError::not_found("round"));
        }
        if self.failing_rounds.contains(&(season_id, round)) {
            return Err(EtlError::Status {
                url: format!("fake://round/{}", round),
                status: 500,
            });
        }
        Ok(self
            .rounds
            .get(&(season_id, round))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_game_statistics(&self, game_id: i64) -> Result<Vec<StatGroup>, EtlError> {
        self.stats
            .get(&game_id)
            .cloned()
            .ok_or_else(|| EtlError::not_found("statistics block"))
    }

    async fn fetch_round_count(
        &self,
        _tournament_id: i64,
        _season_id: i64,
    ) -> Result<Option<u32>, EtlError> {
        Ok(self.round_count)
    }
}
