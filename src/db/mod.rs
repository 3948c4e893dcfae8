use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, params_from_iter, types::ToSql, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EtlError;

pub mod models;
use models::*;

/// How `insert_games` treats a game whose key is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DedupPolicy {
    /// Skip games whose (season, round, home_team, away_team) already exists
    #[default]
    SkipExisting,
    /// Insert every game unconditionally
    InsertAll,
}

/// Where a pipeline invocation stores its games. Each invocation opens its own
/// connection from these settings.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub path: String,
    pub collection: String,
    pub dedup: DedupPolicy,
}

impl DatabaseSettings {
    pub fn open(&self) -> Result<Database> {
        Database::open(&self.path, &self.collection, self.dedup)
    }
}

/// SQLite-backed document store for normalized games.
///
/// Each collection is a table carrying the dedup key columns next to the
/// JSON document; arbitrary-key filters go through `json_extract`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    dedup: DedupPolicy,
}

impl Database {
    /// Open (or create) the database at `path` and make sure the collection exists.
    pub fn open(path: &str, collection: &str, dedup: DedupPolicy) -> Result<Self> {
        validate_collection_name(collection)?;
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
            collection: collection.to_string(),
            dedup,
        };
        db.run_migrations()?;
        debug!("Collection '{}' ready ({:?})", collection, dedup);
        Ok(db)
    }

    /// Create the collection table and its key index (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(&schema_sql(&self.collection))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Store a batch of normalized games in a single transaction.
    pub fn insert_games(&self, games: &[TransformedGame]) -> Result<InsertSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let sql = match self.dedup {
            DedupPolicy::SkipExisting => format!(
                "INSERT INTO {c} (id, season, round, home_team, away_team, document, inserted_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
                 WHERE NOT EXISTS (
                    SELECT 1 FROM {c}
                    WHERE season=?2 AND round=?3 AND home_team=?4 AND away_team=?5
                 )",
                c = self.collection
            ),
            DedupPolicy::InsertAll => format!(
                "INSERT INTO {} (id, season, round, home_team, away_team, document, inserted_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                self.collection
            ),
        };

        let mut summary = InsertSummary::default();
        {
            let mut stmt = tx.prepare(&sql)?;
            let now = Utc::now();
            for game in games {
                let document = serde_json::to_string(game)?;
                let changed = stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    game.season,
                    game.round,
                    game.home_team,
                    game.away_team,
                    document,
                    now,
                ])?;
                if changed == 0 {
                    debug!(
                        "Skipping stored game: season={} round={} {} x {}",
                        game.season, game.round, game.home_team, game.away_team
                    );
                    summary.skipped += 1;
                } else {
                    summary.inserted += 1;
                }
            }
        }
        tx.commit()?;

        info!(
            "Inserted {} game(s) into '{}' ({} already stored)",
            summary.inserted, self.collection, summary.skipped
        );
        Ok(summary)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Every stored game matching all `(key, value)` pairs, in insertion order.
    /// Keys address document fields; dots descend into nested objects. `id`
    /// matches the record id.
    pub fn read_games(&self, filter: &[(String, FilterValue)]) -> Result<Vec<StoredGame>> {
        let mut clauses = Vec::with_capacity(filter.len());
        let mut values: Vec<Box<dyn ToSql>> = Vec::with_capacity(filter.len() * 2);
        for (key, value) in filter {
            // record ids live in their own column, not in the document
            if key == "id" {
                values.push(Box::new(value.clone()));
                clauses.push(format!("id = ?{}", values.len()));
                continue;
            }
            values.push(Box::new(json_path(key)?));
            values.push(Box::new(value.clone()));
            clauses.push(format!(
                "json_extract(document, ?{}) = ?{}",
                values.len() - 1,
                values.len()
            ));
        }

        let mut sql = format!("SELECT id, document FROM {}", self.collection);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, document)| {
                let game: TransformedGame = serde_json::from_str(&document)
                    .with_context(|| format!("Corrupt document for record {}", id))?;
                Ok(StoredGame { id, game })
            })
            .collect()
    }

    /// Close the connection. Clones still held elsewhere keep it open until dropped.
    pub fn disconnect(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex
                    .into_inner()
                    .map_err(|_| anyhow!("database connection mutex poisoned"))?;
                conn.close().map_err(|(_, e)| e)?;
                debug!("Database connection for '{}' closed", self.collection);
            }
            Err(_) => debug!(
                "Released handle on '{}'; connection still shared",
                self.collection
            ),
        }
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

/// Collection names end up in SQL text, so only plain identifiers are accepted.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        anyhow::bail!("invalid collection name {:?}: use letters, digits and '_'", name);
    }
    Ok(())
}

/// `stats.Shots` → `$."stats"."Shots"`
fn json_path(key: &str) -> Result<String, EtlError> {
    let mut path = String::from("$");
    for segment in key.split('.') {
        if segment.is_empty() || segment.contains('"') || segment.contains('\\') {
            return Err(EtlError::InvalidFilter(key.to_string()));
        }
        path.push_str(".\"");
        path.push_str(segment);
        path.push('"');
    }
    Ok(path)
}

fn schema_sql(collection: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {c} (
    id          TEXT    PRIMARY KEY,
    season      INTEGER NOT NULL,
    round       INTEGER NOT NULL,
    home_team   TEXT    NOT NULL,
    away_team   TEXT    NOT NULL,
    document    TEXT    NOT NULL,
    inserted_at TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_{c}_game_key ON {c}(season, round, home_team, away_team);
"#,
        c = collection
    )
}
