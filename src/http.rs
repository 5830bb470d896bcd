//! The JSON HTTP API. Spec §4.F.
//!
//! A deliberately small surface compared to the teacher's `web/` (no UI, no
//! auth, no sessions — Playdar's API has never had any of those): `/api`
//! dispatches on a `method` query parameter the way the original
//! implementation's HTTP resolver does, `/sid/:sid` streams content, and
//! `/lan/roster` is a introspection addition for operators and tests.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::model::{Candidate, Qid, Query as PlaydarQuery, QueryMode, Ri, Sid};
use crate::pipeline;
use crate::platform::Platform;
use crate::stream;

pub fn router(platform: Platform) -> Router {
    Router::new()
        .route("/api", post(resolve).get(api_get))
        .route("/sid/{sid}", get(sid_stream))
        .route("/lan/roster", get(lan_roster))
        .layer(TraceLayer::new_for_http())
        .with_state(platform)
}

/// Wall-clock cap on `get_results_long`, per spec §5.
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiGetParams {
    method: String,
    qid: Option<String>,
    /// Client's last-seen poll timestamp, echoed back by real Playdar
    /// clients; purely informational here since `subscribe`'s snapshot-
    /// then-tail semantics already give a correct wake-up without needing
    /// to compare against it.
    #[serde(default)]
    #[allow(dead_code)]
    lastpoll: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ApiErrorBody { error: self.1 })).into_response()
    }
}

fn parse_qid(raw: &str) -> Result<Qid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(StatusCode::BAD_REQUEST, format!("invalid qid: {raw}")))
}

/// `GET /api?method=get_results|get_results_long&qid=...`
async fn api_get(
    State(platform): State<Platform>,
    Query(params): Query<ApiGetParams>,
) -> Result<Response, ApiError> {
    match params.method.as_str() {
        "get_results" => get_results(platform, params).await,
        "get_results_long" => get_results_long(platform, params).await,
        other => Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("unknown method: {other}"),
        )),
    }
}

/// Suggested client re-poll interval for the plain (non-long-poll)
/// `get_results`, in milliseconds. Purely a hint; the registry doesn't
/// enforce it.
const POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct ResultsResponse {
    qid: Qid,
    results: Vec<Ri>,
    solved: bool,
    poll_interval: u64,
}

async fn results_response(platform: &Platform, qid: Qid) -> Result<Response, ApiError> {
    let results = platform
        .registry()
        .results(qid)
        .await
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, "unknown or expired qid".to_string()))?;
    let solved = results
        .iter()
        .any(|ri| ri.score >= platform.config().solve_threshold);
    Ok(Json(ResultsResponse {
        qid,
        results,
        solved,
        poll_interval: POLL_INTERVAL_MS,
    })
    .into_response())
}

async fn get_results(platform: Platform, params: ApiGetParams) -> Result<Response, ApiError> {
    let qid = parse_qid(
        params
            .qid
            .as_deref()
            .ok_or_else(|| ApiError(StatusCode::BAD_REQUEST, "missing qid".to_string()))?,
    )?;
    results_response(&platform, qid).await
}

/// Blocks until at least one new result arrives or 30s elapses (spec §5),
/// then returns the current result set. This is the long-poll variant real
/// Playdar clients use to avoid busy re-fetching `get_results`.
async fn get_results_long(platform: Platform, params: ApiGetParams) -> Result<Response, ApiError> {
    let qid = parse_qid(
        params
            .qid
            .as_deref()
            .ok_or_else(|| ApiError(StatusCode::BAD_REQUEST, "missing qid".to_string()))?,
    )?;

    if let Some((prefix, mut rx)) = platform.registry().subscribe(qid).await {
        if prefix.is_empty() {
            let _ = tokio::time::timeout(LONG_POLL_TIMEOUT, rx.recv()).await;
        }
    }
    results_response(&platform, qid).await
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    artist: String,
    #[serde(default)]
    album: Option<String>,
    track: String,
    #[serde(default)]
    mode: QueryMode,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    qid: Qid,
}

/// `POST /api?method=resolve`, body `{"artist":..,"track":..,"album":..}`.
/// Normal-mode queries return as soon as they're registered and dispatched;
/// redirect-mode queries block for up to [`pipeline::REDIRECT_WAIT`] and
/// return the winning result's `qid` directly.
async fn resolve(
    State(platform): State<Platform>,
    Json(req): Json<ResolveRequest>,
) -> Result<Response, ApiError> {
    let candidate = Candidate {
        artist: req.artist,
        album: req.album,
        track: req.track,
    };
    let mut query = PlaydarQuery::new(candidate);
    query.mode = req.mode;

    match query.mode {
        QueryMode::Normal => {
            let qid = pipeline::dispatch(&platform, query, None).await;
            Ok(Json(ResolveResponse { qid }).into_response())
        }
        QueryMode::Redirect => {
            let qid = query.qid();
            match pipeline::resolve_redirect(&platform, query).await {
                Some(ri) => Ok(Json(ri).into_response()),
                None => Ok(Json(ResolveResponse { qid }).into_response()),
            }
        }
    }
}

async fn sid_stream(
    State(platform): State<Platform>,
    Path(sid): Path<String>,
) -> Result<Response, stream::StreamError> {
    stream::stream(&platform, &Sid(sid)).await
}

async fn lan_roster(State(platform): State<Platform>) -> Response {
    use crate::lan::node_table::RosterEntry;

    let Some(node_table) = platform.lan_roster() else {
        warn!("roster requested but no LAN resolver is running");
        return Json(Vec::<RosterEntry>::new()).into_response();
    };
    Json(node_table.roster_snapshot().await).into_response()
}
