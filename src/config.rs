use clap::Parser;
use std::time::Duration;

use crate::db::models::TournamentRef;
use crate::db::{validate_collection_name, DatabaseSettings, DedupPolicy};
use crate::pipeline::DEFAULT_MAX_ROUNDS;
use crate::source::ClientSettings;
use crate::tasks::TaskSettings;

/// Football statistics ETL: SofaScore extraction, normalization and storage
#[derive(Parser, Debug, Clone)]
#[command(name = "football-stats-etl", version, about)]
pub struct Config {
    /// API listen address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8000")]
    pub api_addr: String,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "football_stats.db")]
    pub database_path: String,

    /// Collection (table) that normalized games are stored in
    #[arg(long, env = "COLLECTION", default_value = "football_stats")]
    pub collection: String,

    /// What to do with a game whose (season, round, home, away) is already stored
    #[arg(long, env = "DEDUP_POLICY", value_enum, default_value = "skip-existing")]
    pub dedup_policy: DedupPolicy,

    /// Source website base URL
    #[arg(long, env = "SOURCE_BASE_URL", default_value = "https://www.sofascore.com")]
    pub source_base_url: String,

    /// Page requested once per session to obtain cookies
    #[arg(long, env = "WARMUP_PATH", default_value = "/pt/")]
    pub warmup_path: String,

    /// Country code used to list the default tournaments
    #[arg(long, env = "TOURNAMENTS_COUNTRY", default_value = "BR")]
    pub tournaments_country: String,

    /// Default tournament id
    #[arg(long, env = "TOURNAMENT_ID", default_value = "325")]
    pub tournament_id: i64,

    /// Default tournament slug
    #[arg(long, env = "TOURNAMENT_SLUG", default_value = "brasileirao-serie-a")]
    pub tournament_slug: String,

    /// Default tournament country slug
    #[arg(long, env = "TOURNAMENT_COUNTRY", default_value = "brazil")]
    pub tournament_country: String,

    /// Seasons older than this year are ignored
    #[arg(long, env = "CUTOFF_YEAR", default_value = "2013")]
    pub cutoff_year: i32,

    /// Keep every season regardless of CUTOFF_YEAR
    #[arg(long, env = "ALL_SEASONS", default_value = "false")]
    pub all_seasons: bool,

    /// Rounds scanned per season when the source has no round metadata
    #[arg(long, env = "MAX_ROUNDS", default_value_t = DEFAULT_MAX_ROUNDS)]
    pub max_rounds: u32,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    /// Retries per request after a transient failure
    #[arg(long, env = "FETCH_RETRIES", default_value = "3")]
    pub fetch_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt)
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "500")]
    pub retry_backoff_ms: u64,

    /// Background jobs run at the same time
    #[arg(long, env = "WORKER_CONCURRENCY", default_value = "2")]
    pub worker_concurrency: usize,

    /// Hard time limit per background job, in seconds
    #[arg(long, env = "TASK_TIME_LIMIT_SECS", default_value = "3600")]
    pub task_time_limit_secs: u64,

    /// How long finished job results are kept, in seconds
    #[arg(long, env = "TASK_RESULT_TTL_SECS", default_value = "86400")]
    pub task_result_ttl_secs: u64,

    /// Extract one season in the foreground, print a JSON summary and exit
    #[arg(long, value_name = "SEASON_ID")]
    pub extract_season: Option<i64>,

    /// With --extract-season, normalize and store the games too
    #[arg(long, requires = "extract_season")]
    pub persist: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_collection_name(&self.collection)?;
        if url::Url::parse(&self.source_base_url).is_err() {
            anyhow::bail!("SOURCE_BASE_URL is not a valid URL: {}", self.source_base_url);
        }
        if !self.warmup_path.starts_with('/') {
            anyhow::bail!("WARMUP_PATH must start with '/'");
        }
        if self.tournament_slug.is_empty() || self.tournament_country.is_empty() {
            anyhow::bail!("TOURNAMENT_SLUG and TOURNAMENT_COUNTRY must not be empty");
        }
        if self.max_rounds == 0 {
            anyhow::bail!("max_rounds must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("http_timeout_secs must be positive");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("worker_concurrency must be at least 1");
        }
        if self.task_time_limit_secs == 0 {
            anyhow::bail!("task_time_limit_secs must be positive");
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.source_base_url.clone(),
            warmup_path: self.warmup_path.clone(),
            tournaments_country: self.tournaments_country.clone(),
            timeout_secs: self.http_timeout_secs,
            max_retries: self.fetch_retries,
            retry_backoff_ms: self.retry_backoff_ms,
        }
    }

    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            path: self.database_path.clone(),
            collection: self.collection.clone(),
            dedup: self.dedup_policy,
        }
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            concurrency: self.worker_concurrency,
            time_limit: Duration::from_secs(self.task_time_limit_secs),
            result_ttl: Duration::from_secs(self.task_result_ttl_secs),
        }
    }

    pub fn default_tournament(&self) -> TournamentRef {
        TournamentRef {
            slug: self.tournament_slug.clone(),
            id: self.tournament_id,
            country: self.tournament_country.clone(),
        }
    }

    /// `None` when every season is wanted.
    pub fn cutoff(&self) -> Option<i32> {
        (!self.all_seasons).then_some(self.cutoff_year)
    }
}
