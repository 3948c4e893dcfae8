use tracing::info;

use crate::db::models::Season;
use crate::error::EtlError;
use crate::source::StatsSource;

/// Numeric form of a season year: every `/` removed, then parsed ("24/25" → 2425).
pub fn season_year_number(year: &str) -> Result<i64, EtlError> {
    let digits = year.replace('/', "");
    digits
        .trim()
        .parse::<i64>()
        .map_err(|_| EtlError::parse(format!("season year {:?} is not numeric", year)))
}

/// Whether `season` passes the year cutoff.
pub fn is_wanted(season: &Season, cutoff_year: i32) -> Result<bool, EtlError> {
    Ok(season_year_number(&season.year)? >= i64::from(cutoff_year))
}

/// Keep wanted seasons in source order. Without a cutoff every season is kept.
/// A single unclassifiable year fails the whole list.
pub fn filter_wanted(seasons: Vec<Season>, cutoff_year: Option<i32>) -> Result<Vec<Season>, EtlError> {
    let Some(cutoff) = cutoff_year else {
        return Ok(seasons);
    };
    let mut wanted = Vec::with_capacity(seasons.len());
    for season in seasons {
        if is_wanted(&season, cutoff)? {
            wanted.push(season);
        }
    }
    Ok(wanted)
}

/// Fetch the competition page and return its wanted seasons.
pub async fn discover_seasons(
    source: &dyn StatsSource,
    competition_url: &str,
    cutoff_year: Option<i32>,
) -> Result<Vec<Season>, EtlError> {
    let seasons = source.fetch_seasons_page(competition_url).await?;
    let found = seasons.len();
    let wanted = filter_wanted(seasons, cutoff_year)?;
    info!(
        "{}: {} season(s) found, {} wanted (cutoff {:?})",
        source.name(),
        found,
        wanted.len(),
        cutoff_year
    );
    Ok(wanted)
}
