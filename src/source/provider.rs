use async_trait::async_trait;
use serde_json::Value;

use crate::db::models::{Season, StatGroup, Tournament};
use crate::error::EtlError;

/// Trait that every remote statistics source must implement.
///
/// One value owns one network session; the pipeline drives it sequentially.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Competitions offered by the source's default tournament listing.
    async fn fetch_tournaments(&self) -> Result<Vec<Tournament>, EtlError>;

    /// Seasons embedded in a competition page, in source order.
    async fn fetch_seasons_page(&self, competition_url: &str) -> Result<Vec<Season>, EtlError>;

    /// Raw events of one round. An absent event list is an empty `Vec`.
    async fn fetch_round_games(
        &self,
        tournament_id: i64,
        season_id: i64,
        round: u32,
    ) -> Result<Vec<Value>, EtlError>;

    /// Groups of the first statistics block of a game.
    async fn fetch_game_statistics(&self, game_id: i64) -> Result<Vec<StatGroup>, EtlError>;

    /// Number of rounds the season declares, when the source exposes it.
    async fn fetch_round_count(
        &self,
        _tournament_id: i64,
        _season_id: i64,
    ) -> Result<Option<u32>, EtlError> {
        Ok(None)
    }

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
