use async_trait::async_trait;
use rand::Rng;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, Response, StatusCode,
};
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::provider::StatsSource;
use crate::db::models::{Season, StatGroup, Tournament};
use crate::error::EtlError;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
const SEASONS_SCRIPT_SELECTOR: &str = "script#__NEXT_DATA__";
const SEASONS_POINTER: &str = "/props/pageProps/initialProps/seasons";
const MAX_BACKOFF_MS: u64 = 30_000;

/// Connection parameters for [`SofaScoreClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Page visited before JSON calls so the session carries the site cookies
    pub warmup_path: String,
    /// Country code of the default-tournaments listing, e.g. "BR"
    pub tournaments_country: String,
    pub timeout_secs: u64,
    /// Extra attempts on transient failures
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            base_url: "https://www.sofascore.com".to_string(),
            warmup_path: "/pt/".to_string(),
            tournaments_country: "BR".to_string(),
            timeout_secs: 10,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// SofaScore web/API client holding one cookie-carrying session.
pub struct SofaScoreClient {
    http: Client,
    settings: ClientSettings,
}

impl SofaScoreClient {
    pub fn new(settings: ClientSettings) -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-BR,pt;q=0.9,en;q=0.8"),
        );

        let http = Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|source| EtlError::Http {
                url: settings.base_url.clone(),
                source,
            })?;

        Ok(SofaScoreClient { http, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// Visit the home page so later API calls are accepted.
    async fn warm_up(&self) -> Result<(), EtlError> {
        let url = self.url(&self.settings.warmup_path);
        debug!("Warming up session at {}", url);
        self.send(&url).await.map(|_| ())
    }

    /// GET with bounded exponential backoff on transient failures.
    async fn send(&self, url: &str) -> Result<Response, EtlError> {
        let mut attempt = 0u32;
        let mut backoff_ms = self.settings.retry_backoff_ms.max(1);

        loop {
            let err = match self.http.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    return Err(EtlError::not_found(format!("{} returned 404", url)));
                }
                Ok(resp) => EtlError::Status {
                    url: url.to_string(),
                    status: resp.status().as_u16(),
                },
                Err(source) => EtlError::Http {
                    url: url.to_string(),
                    source,
                },
            };

            if !err.is_transient() || attempt >= self.settings.max_retries {
                return Err(err);
            }
            attempt += 1;

            let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 2);
            warn!(
                "{} (attempt {}/{}), retrying in {}ms",
                err,
                attempt,
                self.settings.max_retries,
                backoff_ms + jitter
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
        }
    }

    async fn get_text(&self, url: &str) -> Result<String, EtlError> {
        self.send(url)
            .await?
            .text()
            .await
            .map_err(|source| EtlError::Http {
                url: url.to_string(),
                source,
            })
    }

    async fn get_json(&self, url: &str) -> Result<Value, EtlError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body)
            .map_err(|e| EtlError::parse(format!("{} did not return JSON: {}", url, e)))
    }
}

#[async_trait]
impl StatsSource for SofaScoreClient {
    fn name(&self) -> &str {
        "SofaScore"
    }

    async fn fetch_tournaments(&self) -> Result<Vec<Tournament>, EtlError> {
        self.warm_up().await?;
        let url = self.url(&format!(
            "/api/v1/config/default-unique-tournaments/{}/football",
            self.settings.tournaments_country
        ));
        let raw = self.get_json(&url).await?;
        parse_tournaments(&raw)
    }

    async fn fetch_seasons_page(&self, competition_url: &str) -> Result<Vec<Season>, EtlError> {
        Url::parse(competition_url).map_err(|e| {
            EtlError::parse(format!("invalid competition URL {:?}: {}", competition_url, e))
        })?;
        self.warm_up().await?;
        let html = self.get_text(competition_url).await?;
        parse_seasons_html(&html)
    }

    async fn fetch_round_games(
        &self,
        tournament_id: i64,
        season_id: i64,
        round: u32,
    ) -> Result<Vec<Value>, EtlError> {
        let url = self.url(&format!(
            "/api/v1/unique-tournament/{}/season/{}/events/round/{}",
            tournament_id, season_id, round
        ));
        let raw = self.get_json(&url).await?;
        Ok(parse_round_events(&raw))
    }

    async fn fetch_game_statistics(&self, game_id: i64) -> Result<Vec<StatGroup>, EtlError> {
        let url = self.url(&format!("/api/v1/event/{}/statistics", game_id));
        let raw = self.get_json(&url).await?;
        parse_statistics(&raw)
    }

    async fn fetch_round_count(
        &self,
        tournament_id: i64,
        season_id: i64,
    ) -> Result<Option<u32>, EtlError> {
        let url = self.url(&format!(
            "/api/v1/unique-tournament/{}/season/{}/rounds",
            tournament_id, season_id
        ));
        let raw = self.get_json(&url).await?;
        Ok(parse_round_count(&raw))
    }
}

// ── Parsing helpers ────────────────────────────────────────────────────────────

fn parse_tournaments(raw: &Value) -> Result<Vec<Tournament>, EtlError> {
    let items = raw
        .get("uniqueTournaments")
        .and_then(Value::as_array)
        .ok_or_else(|| EtlError::parse("tournament listing without 'uniqueTournaments'"))?;

    items
        .iter()
        .map(|t| {
            let text = |pointer: &str| {
                t.pointer(pointer)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| EtlError::parse(format!("tournament without '{}'", pointer)))
            };
            Ok(Tournament {
                name: text("/name")?,
                slug: text("/slug")?,
                id: t
                    .get("id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| EtlError::parse("tournament without numeric 'id'"))?,
                country: text("/category/slug")?,
            })
        })
        .collect()
}

fn parse_seasons_html(html: &str) -> Result<Vec<Season>, EtlError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(SEASONS_SCRIPT_SELECTOR)
        .map_err(|e| EtlError::parse(format!("bad selector: {}", e)))?;
    let script = document
        .select(&selector)
        .next()
        .ok_or_else(|| EtlError::not_found("__NEXT_DATA__ script element"))?;
    let text: String = script.text().collect();

    let data: Value = serde_json::from_str(&text)
        .map_err(|e| EtlError::parse(format!("__NEXT_DATA__ is not valid JSON: {}", e)))?;
    let seasons = data
        .pointer(SEASONS_POINTER)
        .ok_or_else(|| EtlError::parse(format!("page data has no {}", SEASONS_POINTER)))?;

    serde_json::from_value(seasons.clone())
        .map_err(|e| EtlError::parse(format!("malformed season list: {}", e)))
}

fn parse_round_events(raw: &Value) -> Vec<Value> {
    raw.get("events")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn parse_statistics(raw: &Value) -> Result<Vec<StatGroup>, EtlError> {
    let block = raw
        .get("statistics")
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.first())
        .ok_or_else(|| EtlError::not_found("statistics block"))?;
    let groups = block
        .get("groups")
        .ok_or_else(|| EtlError::not_found("statistics groups"))?;

    serde_json::from_value(groups.clone())
        .map_err(|e| EtlError::parse(format!("malformed statistics groups: {}", e)))
}

fn parse_round_count(raw: &Value) -> Option<u32> {
    raw.get("rounds")?
        .as_array()?
        .iter()
        .filter_map(|r| r.get("round").and_then(Value::as_u64))
        .max()
        .and_then(|n| u32::try_from(n).ok())
}
