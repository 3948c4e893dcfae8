//! Statistics normalizer.
//!
//! Every statistics group is reduced to the metrics of its allow-list, and
//! each kept metric is reshaped to `{<name>: {name, home, away, homeValue, awayValue}}`
//! with only the fields the source actually sent.

use serde_json::{Map, Value};

use crate::db::models::{Game, NormalizedStats, StatGroup, TransformedGame};

pub const MATCH_OVERVIEW: &[&str] = &[
    "Ball possession",
    "Expected goals",
    "Big chances",
    "Total shots",
    "Goalkeeper saves",
    "Corner kicks",
    "Fouls",
    "Passes",
    "Tackles",
    "Free kicks",
    "Yellow cards",
    "Red cards",
];

pub const SHOTS: &[&str] = &[
    "Total shots",
    "Shots on target",
    "Hit woodwork",
    "Shots off target",
    "Blocked shots",
    "Shots inside box",
    "Shots outside box",
];

pub const PASSES: &[&str] = &[
    "Accurate passes",
    "Throw-ins",
    "Final third entries",
    "Long balls",
    "Crosses",
];

pub const DUELS: &[&str] = &["Dispossessed", "Ground duels", "Aerial duels", "Dribbles"];

pub const DEFENDING: &[&str] = &[
    "Tackles won",
    "Total tackles",
    "Interceptions",
    "Recoveries",
    "Clearances",
    "Errors lead to a shot",
];

pub const GOALKEEPING: &[&str] = &[
    "Total saves",
    "Goals prevented",
    "Big saves",
    "High claims",
    "Punches",
    "Goal kicks",
];

/// Fields copied from a kept statistic item, when present.
pub const KEPT_FIELDS: [&str; 5] = ["name", "home", "away", "homeValue", "awayValue"];

/// Allowed metric names of a group; unknown groups allow nothing.
pub fn allow_list(group_name: &str) -> &'static [&'static str] {
    match group_name {
        "Match overview" => MATCH_OVERVIEW,
        "Shots" => SHOTS,
        "Passes" => PASSES,
        "Duels" => DUELS,
        "Defending" => DEFENDING,
        "Goalkeeping" => GOALKEEPING,
        _ => &[],
    }
}

fn filter_items(items: &[Map<String, Value>], allowed: &[&str]) -> Vec<Value> {
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?;
            if !allowed.contains(&name) {
                return None;
            }
            let kept: Map<String, Value> = KEPT_FIELDS
                .iter()
                .filter_map(|key| item.get(*key).map(|v| (key.to_string(), v.clone())))
                .collect();
            let mut wrapper = Map::new();
            wrapper.insert(name.to_string(), Value::Object(kept));
            Some(Value::Object(wrapper))
        })
        .collect()
}

/// Group name → kept metrics, in input group order. Groups left with no
/// metrics still appear with an empty list.
pub fn normalize_statistics(groups: &[StatGroup]) -> NormalizedStats {
    let mut stats = NormalizedStats::new();
    for group in groups {
        let items = filter_items(&group.statistics_items, allow_list(&group.group_name));
        stats.insert(group.group_name.clone(), Value::Array(items));
    }
    stats
}

/// Normalize every game that has statistics; the rest are dropped.
pub fn normalize(games: &[Game]) -> Vec<TransformedGame> {
    games
        .iter()
        .filter_map(|game| {
            let groups = game.stats.as_ref()?;
            Some(TransformedGame {
                season: game.season,
                round: game.round,
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                home_score: game.home_score,
                away_score: game.away_score,
                stats: normalize_statistics(groups),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fake::{item, shots_group};
    use serde_json::json;

    fn game(id: i64, stats: Option<Vec<StatGroup>>) -> Game {
        Game {
            season: 58766,
            round: 1,
            id,
            home_team: "Flamengo".into(),
            away_team: "Palmeiras".into(),
            home_score: 2,
            away_score: 1,
            stats,
        }
    }

    fn group(name: &str, items: Vec<Value>) -> StatGroup {
        StatGroup {
            group_name: name.into(),
            statistics_items: items.into_iter().map(item).collect(),
        }
    }

    /// Rebuild raw groups from normalized output by unwrapping each metric.
    fn as_raw_groups(stats: &NormalizedStats) -> Vec<StatGroup> {
        stats
            .iter()
            .map(|(name, items)| StatGroup {
                group_name: name.clone(),
                statistics_items: items
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|wrapper| {
                        let inner = wrapper.as_object().unwrap().values().next().unwrap();
                        inner.as_object().unwrap().clone()
                    })
                    .collect(),
            })
            .collect()
    }

    #[test]
    fn test_games_without_stats_are_dropped() {
        let games = vec![
            game(1, Some(vec![shots_group()])),
            game(2, None),
            game(3, Some(vec![])),
        ];
        let out = normalize(&games);
        assert_eq!(out.len(), 2);
        assert!(out.len() <= games.len());
        assert_eq!(out[0].stats.len(), 1);
        assert!(out[1].stats.is_empty());
    }

    #[test]
    fn test_kept_items_are_wrapped_with_field_subset() {
        let stats = normalize_statistics(&[shots_group()]);
        let shots = stats["Shots"].as_array().unwrap();
        assert_eq!(shots.len(), 2);
        assert_eq!(
            shots[0],
            json!({"Total shots": {"name": "Total shots", "home": "14", "away": "9", "homeValue": 14, "awayValue": 9}})
        );
    }

    #[test]
    fn test_items_outside_allow_list_are_dropped() {
        let stats = normalize_statistics(&[group(
            "Passes",
            vec![
                json!({"name": "Accurate passes", "home": "400 (85%)", "away": "300 (80%)"}),
                json!({"name": "Touches in penalty area", "home": "20", "away": "12"}),
                json!({"home": "1", "away": "2"}),
            ],
        )]);
        let passes = stats["Passes"].as_array().unwrap();
        assert_eq!(passes.len(), 1);
        for wrapper in passes {
            let name = wrapper.as_object().unwrap().keys().next().unwrap();
            assert!(allow_list("Passes").contains(&name.as_str()));
        }
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let stats = normalize_statistics(&[group(
            "Duels",
            vec![json!({"name": "Dribbles", "home": "5/9", "statisticsType": "positive"})],
        )]);
        assert_eq!(
            stats["Duels"][0],
            json!({"Dribbles": {"name": "Dribbles", "home": "5/9"}})
        );
    }

    #[test]
    fn test_unknown_group_yields_empty_list() {
        let stats = normalize_statistics(&[group(
            "Attack",
            vec![json!({"name": "Big chances scored", "home": "1", "away": "0"})],
        )]);
        assert_eq!(stats["Attack"], json!([]));
    }

    #[test]
    fn test_group_order_is_preserved() {
        let groups = vec![
            group("Goalkeeping", vec![]),
            group("Match overview", vec![json!({"name": "Ball possession", "home": "55%", "away": "45%"})]),
            group("Defending", vec![]),
        ];
        let stats = normalize_statistics(&groups);
        let names: Vec<&str> = stats.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Goalkeeping", "Match overview", "Defending"]);
        assert_eq!(stats["Defending"], json!([]));
    }

    #[test]
    fn test_repeated_group_overwrites_in_place() {
        let groups = vec![
            group("Shots", vec![json!({"name": "Total shots", "home": "1"})]),
            group("Passes", vec![]),
            group("Shots", vec![json!({"name": "Blocked shots", "home": "2"})]),
        ];
        let stats = normalize_statistics(&groups);
        let names: Vec<&str> = stats.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Shots", "Passes"]);
        assert_eq!(stats["Shots"], json!([{"Blocked shots": {"name": "Blocked shots", "home": "2"}}]));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let groups = vec![
            shots_group(),
            group(
                "Match overview",
                vec![
                    json!({"name": "Ball possession", "home": "61%", "away": "39%", "homeValue": 61, "awayValue": 39, "key": "ballPossession"}),
                    json!({"name": "Touches", "home": "600", "away": "450"}),
                ],
            ),
            group("Attack", vec![json!({"name": "Big chances scored", "home": "2"})]),
        ];
        let once = normalize_statistics(&groups);
        let twice = normalize_statistics(&as_raw_groups(&once));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_game_fields_are_carried() {
        let out = normalize(&[game(1, Some(vec![shots_group()]))]);
        let g = &out[0];
        assert_eq!((g.season, g.round), (58766, 1));
        assert_eq!((g.home_team.as_str(), g.away_team.as_str()), ("Flamengo", "Palmeiras"));
        assert_eq!((g.home_score, g.away_score), (2, 1));
    }
}
