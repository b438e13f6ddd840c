use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::audit;
use crate::consts::VERSION;
use crate::job::{JobId, JobResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/store-job", post(store_job))
        .route("/result/{job_id}", get(get_result))
        .route("/audit/orphans", get(orphans))
        // Paths the social service already calls.
        .route("/api/store-post-data", post(store_post_data))
        .route("/ai-response/{job_id}", get(ai_response))
}

// --- Health ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: VERSION,
    })
}

// --- Jobs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: JobId,
}

/// POST /store-job: accepts any JSON, answers once the trigger is queued.
async fn store_job(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<SubmitResponse>> {
    let Json(payload) = payload?;
    let job_id = state.producer.submit(payload).await?;
    Ok(Json(SubmitResponse { job_id }))
}

async fn store_post_data(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(payload) = payload?;
    let job_id = state.producer.submit(payload).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Post data stored and trigger queued.",
        "dataId": job_id,
    })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultBody {
    text: String,
    produced_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultResponse {
    job_id: JobId,
    result: ResultBody,
}

/// Malformed ids are reported exactly like unknown ones.
async fn lookup(state: &AppState, raw_id: &str) -> ApiResult<JobResult> {
    let not_found = || ApiError::NotFound(format!("no result for job {raw_id}"));
    let job_id: JobId = raw_id.parse().map_err(|_| not_found())?;
    state.results.lookup(&job_id).await?.ok_or_else(not_found)
}

async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ResultResponse>> {
    let result = lookup(&state, &job_id).await?;
    Ok(Json(ResultResponse {
        job_id: result.job_id,
        result: ResultBody {
            text: result.text,
            produced_at: result.produced_at,
        },
    }))
}

async fn ai_response(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let result = lookup(&state, &job_id).await?;
    Ok(Json(json!({
        "success": true,
        "dataId": result.job_id,
        "aiResponse": {
            "response": result.text,
            "timestamp": result.produced_at.timestamp_millis(),
        },
    })))
}

// --- Audit ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrphanQuery {
    #[serde(default)]
    older_than_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Orphan {
    job_id: JobId,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct OrphansResponse {
    orphans: Vec<Orphan>,
}

async fn orphans(
    State(state): State<AppState>,
    Query(query): Query<OrphanQuery>,
) -> ApiResult<Json<OrphansResponse>> {
    let entries = audit::find_orphans(
        state.payloads.as_ref(),
        state.results.as_ref(),
        Duration::from_secs(query.older_than_secs),
    )
    .await?;
    Ok(Json(OrphansResponse {
        orphans: entries
            .into_iter()
            .map(|entry| Orphan {
                job_id: entry.job_id,
                created_at: entry.created_at,
            })
            .collect(),
    }))
}
