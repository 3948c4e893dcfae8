use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::db::models::{FilterValue, TournamentRef};
use crate::db::Database;
use crate::error::EtlError;
use crate::pipeline::Extractor;
use crate::tasks::jobs::{self, JobContext};
use crate::tasks::{TaskManager, TaskState};

#[derive(Clone)]
pub struct AppState {
    /// Read side of the store; jobs open their own connections
    pub db: Database,
    pub jobs: JobContext,
    pub tasks: TaskManager,
}

type ApiError = (StatusCode, String);

/// Build the Axum router for the ETL API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/tournaments", get(tournaments_handler))
        .route("/seasons", get(seasons_handler))
        .route("/games", get(games_handler))
        .route("/async/seasons", post(seasons_async_handler))
        .route("/async/games", post(all_games_async_handler))
        .route("/async/games/:season_id", post(season_games_async_handler))
        .route(
            "/tasks/:task_id",
            get(task_status_handler).delete(cancel_task_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// ── Error mapping ────────────────────────────────────────────────────────────

fn status_for(err: &EtlError) -> StatusCode {
    match err {
        EtlError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
        EtlError::NotFound(_) => StatusCode::NOT_FOUND,
        EtlError::Parse(_) => StatusCode::BAD_GATEWAY,
        EtlError::Http { .. } | EtlError::Status { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn etl_error(err: EtlError) -> ApiError {
    (status_for(&err), err.to_string())
}

fn app_error(err: anyhow::Error) -> ApiError {
    let status = err
        .downcast_ref::<EtlError>()
        .map(status_for)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {:#}", err);
    }
    (status, format!("{:#}", err))
}

fn extractor(state: &AppState) -> Result<Extractor, ApiError> {
    state
        .jobs
        .extractor()
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, format!("Extractor not available: {:#}", e)))
}

// ── Query parameters ─────────────────────────────────────────────────────────

/// All three tournament parameters, or none for the configured default.
fn tournament_from(
    slug: Option<String>,
    id: Option<i64>,
    country: Option<String>,
) -> Result<Option<TournamentRef>, ApiError> {
    match (slug, id, country) {
        (Some(slug), Some(id), Some(country)) => Ok(Some(TournamentRef { slug, id, country })),
        (None, None, None) => Ok(None),
        _ => Err((
            StatusCode::BAD_REQUEST,
            "slug_tournament, id_tournament and country must be given together".into(),
        )),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TournamentQuery {
    pub slug_tournament: Option<String>,
    pub id_tournament: Option<i64>,
    pub country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllGamesQuery {
    pub slug_tournament: Option<String>,
    pub id_tournament: Option<i64>,
    pub country: Option<String>,
    #[serde(default)]
    pub transform_data: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SeasonGamesQuery {
    #[serde(default)]
    pub transform_data: bool,
    pub id_tournament: Option<i64>,
}

fn store_note(transform_data: bool) -> &'static str {
    if transform_data {
        "Games will be normalized and stored."
    } else {
        "Games will not be stored."
    }
}

// ── Sync endpoints ───────────────────────────────────────────────────────────

/// GET /
async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "message": "Football statistics ETL API",
        "endpoints": {
            "sync": ["/tournaments", "/seasons", "/games", "/health"],
            "async": ["/async/seasons", "/async/games/{season_id}", "/async/games"],
            "status": ["/tasks/{task_id}"],
        }
    }))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "extractor_ready": state.jobs.extractor().is_ok(),
        "worker_ready": state.tasks.is_accepting(),
    }))
}

/// GET /tournaments
async fn tournaments_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let tournaments = extractor(&state)?
        .tournaments()
        .await
        .map_err(etl_error)?;
    Ok(Json(json!({ "tournaments": tournaments })))
}

/// GET /seasons?slug_tournament=&id_tournament=&country=
async fn seasons_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TournamentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let requested = tournament_from(q.slug_tournament, q.id_tournament, q.country)?;
    let tournament = state.jobs.tournament(requested);
    let seasons = extractor(&state)?
        .seasons(&state.jobs.competition_url(&tournament), state.jobs.cutoff_year)
        .await
        .map_err(etl_error)?;
    Ok(Json(json!({ "seasons": seasons })))
}

/// GET /games?<key>=<value>... (dotted keys reach into nested fields)
async fn games_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, ApiError> {
    let filter: Vec<(String, FilterValue)> = params
        .into_iter()
        .map(|(key, raw)| {
            let value = FilterValue::coerce(&raw);
            (key, value)
        })
        .collect();
    let games = state.db.read_games(&filter).map_err(app_error)?;

    let echoed: Map<String, Value> = filter
        .iter()
        .map(|(key, value)| (key.clone(), json!(value)))
        .collect();
    Ok(Json(json!({
        "count": games.len(),
        "filters": echoed,
        "games": games,
    })))
}

// ── Async endpoints ──────────────────────────────────────────────────────────

/// POST /async/seasons
async fn seasons_async_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TournamentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let requested = tournament_from(q.slug_tournament, q.id_tournament, q.country)?;
    let tournament = state.jobs.tournament(requested);
    let ctx = state.jobs.clone();
    let job_tournament = tournament.clone();
    let task_id = state
        .tasks
        .submit("seasons", move |hook| jobs::seasons_job(ctx, job_tournament, hook));
    info!("Queued seasons task {} for tournament {}", task_id, tournament.id);

    Ok(Json(json!({
        "task_id": task_id,
        "tournament": tournament,
        "status": "processing",
        "message": "Task started. Use GET /tasks/{task_id} to check its status",
    })))
}

/// POST /async/games/:season_id?transform_data=&id_tournament=
async fn season_games_async_handler(
    State(state): State<Arc<AppState>>,
    Path(season_id): Path<i64>,
    Query(q): Query<SeasonGamesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tournament_id = q
        .id_tournament
        .unwrap_or(state.jobs.default_tournament.id);
    let transform = q.transform_data;
    let ctx = state.jobs.clone();
    let task_id = state.tasks.submit("season_games", move |hook| {
        jobs::season_games_job(ctx, season_id, tournament_id, transform, hook)
    });
    info!("Queued games task {} for season {}", task_id, season_id);

    Ok(Json(json!({
        "task_id": task_id,
        "season_id": season_id,
        "id_tournament": tournament_id,
        "transform_data": transform,
        "status": "processing",
        "message": format!(
            "Task started. {} Use GET /tasks/{{task_id}} to check its status",
            store_note(transform)
        ),
    })))
}

/// POST /async/games?slug_tournament=&id_tournament=&country=&transform_data=
async fn all_games_async_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AllGamesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let requested = tournament_from(q.slug_tournament, q.id_tournament, q.country)?;
    let tournament = state.jobs.tournament(requested);
    let transform = q.transform_data;
    let ctx = state.jobs.clone();
    let job_tournament = tournament.clone();
    let task_id = state.tasks.submit("all_games", move |hook| {
        jobs::all_games_job(ctx, job_tournament, transform, hook)
    });
    info!("Queued all-games task {} for tournament {}", task_id, tournament.id);

    Ok(Json(json!({
        "task_id": task_id,
        "tournament": tournament,
        "transform_data": transform,
        "status": "processing",
        "message": format!(
            "Task started. This may take a while. {} Use GET /tasks/{{task_id}} to check its status",
            store_note(transform)
        ),
    })))
}

// ── Task status ──────────────────────────────────────────────────────────────

fn task_body(task_id: &str, name: Option<&str>, state: &TaskState) -> Value {
    let mut body = json!({ "task_id": task_id, "state": state.label() });
    match state {
        TaskState::Pending => {
            body["status"] = json!("Task is waiting to be processed or does not exist");
        }
        TaskState::Progress(progress) => body["progress"] = json!(progress),
        TaskState::Success(result) => body["result"] = result.clone(),
        TaskState::Failure(message) => body["error"] = json!(message),
        TaskState::Started => body["info"] = json!({ "task": name, "status": "running" }),
        TaskState::Revoked => body["info"] = json!({ "task": name, "status": "terminated" }),
    }
    body
}

fn revoke_message(after: &TaskState) -> &'static str {
    match after {
        TaskState::Revoked => "Task revoked",
        TaskState::Pending => "Task does not exist or has expired",
        _ => "Task already finished; nothing to revoke",
    }
}

/// GET /tasks/:task_id
async fn task_status_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let current = state.tasks.state(&task_id);
    let name = state.tasks.name(&task_id);
    Json(task_body(&task_id, name.as_deref(), &current))
}

/// DELETE /tasks/:task_id
async fn cancel_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let after = state.tasks.revoke(&task_id);
    Json(json!({
        "task_id": task_id,
        "state": after.label(),
        "message": revoke_message(&after),
    }))
}
