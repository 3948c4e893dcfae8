use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A competition as listed by the source's default-tournaments config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub name: String,
    pub slug: String,
    pub id: i64,
    /// Slug of the tournament's category, e.g. "brazil"
    pub country: String,
}

/// The three values needed to address a competition page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentRef {
    pub slug: String,
    pub id: i64,
    pub country: String,
}

impl TournamentRef {
    /// `<base>/pt/football/tournament/<country>/<slug>/<id>`
    pub fn competition_url(&self, base_url: &str) -> String {
        format!(
            "{}/pt/football/tournament/{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.country,
            self.slug,
            self.id
        )
    }
}

impl From<&Tournament> for TournamentRef {
    fn from(t: &Tournament) -> Self {
        TournamentRef {
            slug: t.slug.clone(),
            id: t.id,
            country: t.country.clone(),
        }
    }
}

/// One edition of a tournament. Keys other than `id`/`year` are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: i64,
    /// "2024", "24/25", ...
    pub year: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A raw statistics group as served by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatGroup {
    pub group_name: String,
    #[serde(default)]
    pub statistics_items: Vec<Map<String, Value>>,
}

/// A game as collected from a round listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub season: i64,
    pub round: u32,
    pub id: i64,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i64,
    pub away_score: i64,
    /// `None` when the source had no usable statistics block for this game
    pub stats: Option<Vec<StatGroup>>,
}

/// Group name → ordered `{metric: {fields}}` wrappers, in source group order.
pub type NormalizedStats = Map<String, Value>;

/// A game whose statistics went through the allow-list normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedGame {
    pub season: i64,
    pub round: u32,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i64,
    pub away_score: i64,
    pub stats: NormalizedStats,
}

/// A persisted game with its generated record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredGame {
    pub id: String,
    #[serde(flatten)]
    pub game: TransformedGame,
}

/// Outcome of a batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// Scalar used in an equality filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FilterValue {
    /// Query-string coercion: all digits → integer, digits with a single `.` →
    /// float, anything else stays text.
    pub fn coerce(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            return match raw.parse::<i64>() {
                Ok(v) => FilterValue::Int(v),
                // too large for i64
                Err(_) => raw
                    .parse::<f64>()
                    .map(FilterValue::Float)
                    .unwrap_or_else(|_| FilterValue::Text(raw.to_string())),
            };
        }

        let without_dot = raw.replacen('.', "", 1);
        if raw.contains('.')
            && !without_dot.is_empty()
            && without_dot.bytes().all(|b| b.is_ascii_digit())
        {
            if let Ok(v) = raw.parse::<f64>() {
                return FilterValue::Float(v);
            }
        }

        FilterValue::Text(raw.to_string())
    }
}

impl ToSql for FilterValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FilterValue::Int(v) => ToSqlOutput::from(*v),
            FilterValue::Float(v) => ToSqlOutput::from(*v),
            FilterValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}
