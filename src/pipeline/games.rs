use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

use crate::db::models::{Game, Season, StatGroup};
use crate::error::EtlError;
use crate::source::StatsSource;

/// Round bound used when the source does not say how many rounds a season has
/// (single round-robin, 20 teams).
pub const DEFAULT_MAX_ROUNDS: u32 = 38;

/// Why an event of a round listing produced no game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Field absent or null, e.g. `homeScore.current` of a game not yet played
    MissingField(&'static str),
    /// Field present with an unexpected type
    InvalidField(&'static str),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing field '{}'", field),
            SkipReason::InvalidField(field) => write!(f, "invalid field '{}'", field),
        }
    }
}

/// Result of handling one raw event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Basic info extracted; `stats` is `None` when statistics were unavailable
    Collected(Game),
    Skipped {
        event_id: Option<i64>,
        reason: SkipReason,
    },
}

fn nested<'a>(event: &'a Value, field: &'static str) -> Result<&'a Value, SkipReason> {
    field
        .split('.')
        .try_fold(event, |value, key| value.get(key))
        .filter(|value| !value.is_null())
        .ok_or(SkipReason::MissingField(field))
}

fn nested_str(event: &Value, field: &'static str) -> Result<String, SkipReason> {
    nested(event, field)?
        .as_str()
        .map(str::to_string)
        .ok_or(SkipReason::InvalidField(field))
}

fn nested_i64(event: &Value, field: &'static str) -> Result<i64, SkipReason> {
    nested(event, field)?
        .as_i64()
        .ok_or(SkipReason::InvalidField(field))
}

/// Basic game info out of a raw event; `stats` is left empty.
pub fn extract_basic_info(event: &Value, season_id: i64, round: u32) -> Result<Game, SkipReason> {
    Ok(Game {
        season: season_id,
        round,
        id: nested_i64(event, "id")?,
        home_team: nested_str(event, "homeTeam.name")?,
        away_team: nested_str(event, "awayTeam.name")?,
        home_score: nested_i64(event, "homeScore.current")?,
        away_score: nested_i64(event, "awayScore.current")?,
        stats: None,
    })
}

/// Statistics of one game. Any failure left after the client's retries stays
/// local to the game and becomes `None`.
async fn fetch_stats(source: &dyn StatsSource, game_id: i64) -> Option<Vec<StatGroup>> {
    match source.fetch_game_statistics(game_id).await {
        Ok(groups) => Some(groups),
        Err(e) if e.is_missing_data() => {
            debug!("No statistics for game {}: {}", game_id, e);
            None
        }
        Err(e) => {
            warn!("Statistics unavailable for game {}: {}", game_id, e);
            None
        }
    }
}

/// Collect one round. A 404 or an empty listing yields no outcomes.
pub async fn collect_round(
    source: &dyn StatsSource,
    tournament_id: i64,
    season_id: i64,
    round: u32,
) -> Result<Vec<EventOutcome>, EtlError> {
    let events = match source.fetch_round_games(tournament_id, season_id, round).await {
        Ok(events) => events,
        Err(EtlError::NotFound(msg)) => {
            debug!("Season {} round {} not found: {}", season_id, round, msg);
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let mut outcomes = Vec::with_capacity(events.len());
    for event in &events {
        match extract_basic_info(event, season_id, round) {
            Ok(mut game) => {
                game.stats = fetch_stats(source, game.id).await;
                outcomes.push(EventOutcome::Collected(game));
            }
            Err(reason) => {
                let event_id = event.get("id").and_then(Value::as_i64);
                debug!(
                    "Skipping event {:?} (season {} round {}): {}",
                    event_id, season_id, round, reason
                );
                outcomes.push(EventOutcome::Skipped { event_id, reason });
            }
        }
    }
    Ok(outcomes)
}

/// Round bound for a season: the source's round metadata, else `fallback`.
pub async fn resolve_round_count(
    source: &dyn StatsSource,
    tournament_id: i64,
    season_id: i64,
    fallback: u32,
) -> u32 {
    match source.fetch_round_count(tournament_id, season_id).await {
        Ok(Some(rounds)) if rounds > 0 => rounds,
        Ok(_) => fallback,
        Err(e) => {
            debug!(
                "Round metadata unavailable for season {} ({}); using {} rounds",
                season_id, e, fallback
            );
            fallback
        }
    }
}

/// Every game of a season, rounds ascending, events in source order.
pub async fn collect_season_games(
    source: &dyn StatsSource,
    tournament_id: i64,
    season_id: i64,
    max_rounds: u32,
) -> Result<Vec<Game>, EtlError> {
    let rounds = resolve_round_count(source, tournament_id, season_id, max_rounds).await;
    let mut games = Vec::new();
    let mut skipped = 0usize;

    for round in 1..=rounds {
        for outcome in collect_round(source, tournament_id, season_id, round).await? {
            match outcome {
                EventOutcome::Collected(game) => games.push(game),
                EventOutcome::Skipped { .. } => skipped += 1,
            }
        }
    }

    let without_stats = games.iter().filter(|g| g.stats.is_none()).count();
    info!(
        "Season {}: {} game(s) over {} round(s), {} without statistics, {} event(s) skipped",
        season_id,
        games.len(),
        rounds,
        without_stats,
        skipped
    );
    Ok(games)
}

/// Games of the given seasons, concatenated in season order.
pub async fn collect_games_for_seasons(
    source: &dyn StatsSource,
    tournament_id: i64,
    seasons: &[Season],
    max_rounds: u32,
) -> Result<Vec<Game>, EtlError> {
    let mut games = Vec::new();
    for season in seasons {
        games.extend(collect_season_games(source, tournament_id, season.id, max_rounds).await?);
    }
    Ok(games)
}
