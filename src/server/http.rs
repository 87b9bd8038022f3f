//! Route handlers. AI endpoints authenticate and pass the quota gate
//! before any paid call; the assembly and crash endpoints stream progress
//! events over SSE with a keep-alive heartbeat.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::auth::authenticate;
use super::SharedState;
use crate::categorizer::{Categorizer, SortInputMod};
use crate::crash::CrashRequest;
use crate::error::{AppError, AppResult};
use crate::pipeline::BuildRequest;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::store::FeedbackRecord;
use crate::trace::PipelineTrace;

/// Heartbeat interval keeping intermediary proxies from closing the stream.
const KEEP_ALIVE_SECS: u64 = 25;

/// Build the application router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/ai/build-board", post(build_board))
        .route("/api/ai/auto-sort", post(auto_sort))
        .route("/api/ai/crash-doctor/analyze", post(crash_analyze))
        .route("/api/get-mod-tags", post(get_mod_tags))
        .route("/api/feedback", post(feedback_build))
        .route("/api/feedback/categorization", post(feedback_categorization))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn error_response(err: &AppError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "error": err.wire_code(), "message": err.to_string() });
    (status, Json(body)).into_response()
}

/// Aborts the pipeline task when the SSE stream is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn sse_from(rx: tokio::sync::mpsc::Receiver<ProgressEvent>, guard: AbortOnDrop) -> Response {
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let data = event.to_json().to_string();
            yield Ok::<_, Infallible>(Event::default().data(data));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS)))
        .into_response()
}

/// POST /api/ai/build-board
async fn build_board(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<BuildRequest>,
) -> Response {
    // Auth and quota run before the stream opens and before any paid call.
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = request.validate() {
        return error_response(&e);
    }
    let gate = state.quota_gate();
    if let Err(e) = gate
        .check(&user.user_id, request.max_mods, Utc::now().date_naive())
        .await
    {
        return error_response(&e);
    }

    let (mut progress, rx) = ProgressSender::channel(64);
    let budget = Duration::from_secs(state.config.budgets.assembly_budget_s);
    let pipeline_state = state.clone();
    let user_id = user.user_id.clone();

    let handle = tokio::spawn(async move {
        let pipeline = pipeline_state.assembly_pipeline();
        let mut trace = PipelineTrace::new(uuid::Uuid::new_v4().to_string());

        let result = tokio::time::timeout(
            budget,
            pipeline.run(&user_id, &request, &mut progress, &mut trace),
        )
        .await;

        match result {
            Ok(Ok(outcome)) => {
                let tokens = trace.total_tokens();
                let mut payload = serde_json::to_value(&outcome).unwrap_or_default();
                payload["_pipeline"] = trace.to_value();
                if progress.complete(payload).await.is_ok() {
                    // Counters move only on a delivered terminal complete.
                    if let Err(e) = pipeline_state
                        .quota_gate()
                        .commit(&user_id, tokens, Utc::now().date_naive())
                        .await
                    {
                        error!(error = %e, "failed to commit usage");
                    }
                }
            }
            Ok(Err(AppError::Cancelled)) => {
                info!(user_id = %user_id, "assembly cancelled by client");
            }
            Ok(Err(e)) => {
                error!(error = %e, "assembly pipeline failed");
                let _ = progress.error(e.wire_code(), &e.to_string()).await;
            }
            Err(_) => {
                let _ = progress
                    .error("internal", "request budget exceeded")
                    .await;
            }
        }
    });

    sse_from(rx, AbortOnDrop(handle))
}

/// POST /api/ai/crash-doctor/analyze
async fn crash_analyze(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<CrashRequest>,
) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(&e),
    };
    if request.crash_log.trim().is_empty() {
        return error_response(&AppError::InvalidRequest {
            message: "crash_log is required".to_string(),
        });
    }
    let gate = state.quota_gate();
    if let Err(e) = gate.check(&user.user_id, 0, Utc::now().date_naive()).await {
        return error_response(&e);
    }

    let (mut progress, rx) = ProgressSender::channel(64);
    let budget = Duration::from_secs(state.config.budgets.crash_budget_s);
    let pipeline_state = state.clone();
    let user_id = user.user_id.clone();

    let handle = tokio::spawn(async move {
        let pipeline = pipeline_state.crash_pipeline();
        let mut trace = PipelineTrace::new(uuid::Uuid::new_v4().to_string());

        let result = tokio::time::timeout(
            budget,
            pipeline.run(&user_id, &request, &mut progress, &mut trace),
        )
        .await;

        match result {
            Ok(Ok(report)) => {
                let tokens = trace.total_tokens();
                let mut payload = serde_json::to_value(&report).unwrap_or_default();
                payload["_pipeline"] = trace.to_value();
                if progress.complete(payload).await.is_ok() {
                    if let Err(e) = pipeline_state
                        .quota_gate()
                        .commit(&user_id, tokens, Utc::now().date_naive())
                        .await
                    {
                        error!(error = %e, "failed to commit usage");
                    }
                }
            }
            Ok(Err(AppError::Cancelled)) => {
                info!(user_id = %user_id, "crash analysis cancelled by client");
            }
            Ok(Err(e)) => {
                error!(error = %e, "crash pipeline failed");
                let _ = progress.error(e.wire_code(), &e.to_string()).await;
            }
            Err(_) => {
                let _ = progress
                    .error("internal", "request budget exceeded")
                    .await;
            }
        }
    });

    sse_from(rx, AbortOnDrop(handle))
}

#[derive(Debug, Deserialize)]
struct AutoSortRequest {
    mods: Vec<SortInputMod>,
    #[serde(default)]
    max_categories: Option<usize>,
    #[serde(default)]
    creativity: Option<f32>,
}

/// POST /api/ai/auto-sort
async fn auto_sort(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<AutoSortRequest>,
) -> Response {
    let result = async {
        let user = authenticate(&state, &headers).await?;
        if request.mods.is_empty() {
            return Err(AppError::InvalidRequest {
                message: "mods list is required".to_string(),
            });
        }
        let gate = state.quota_gate();
        gate.check(&user.user_id, 0, Utc::now().date_naive()).await?;

        let categorizer = Categorizer::new(state.gateway.clone());
        let outcome = categorizer
            .auto_sort(&request.mods, request.max_categories, request.creativity)
            .await?;

        gate.commit(&user.user_id, outcome.usage.total(), Utc::now().date_naive())
            .await?;

        Ok(json!({
            "success": true,
            "categories": outcome.value.categories,
            "mod_to_category": outcome.value.mod_to_category,
            "stats": {
                "mods": request.mods.len(),
                "tokens_used": outcome.usage.total(),
                "cost_usd": outcome.cost_usd,
            },
        }))
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ModTagsRequest {
    source_ids: Vec<String>,
}

/// POST /api/get-mod-tags (public)
async fn get_mod_tags(
    State(state): State<SharedState>,
    Json(request): Json<ModTagsRequest>,
) -> Response {
    if request.source_ids.is_empty() || request.source_ids.len() > 200 {
        return error_response(&AppError::InvalidRequest {
            message: "source_ids must contain 1-200 entries".to_string(),
        });
    }

    match state.store.get_mods_batch(&request.source_ids).await {
        Ok(mods) => {
            let tags: serde_json::Map<String, serde_json::Value> = mods
                .into_iter()
                .map(|m| {
                    (
                        m.source_id.clone(),
                        json!({
                            "tags": m.tags,
                            "capabilities": m.capabilities,
                            "modrinth_categories": m.modrinth_categories,
                        }),
                    )
                })
                .collect();
            Json(json!({ "success": true, "mods": tags })).into_response()
        }
        Err(e) => error_response(&AppError::Store(e)),
    }
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    build_id: String,
    #[serde(default)]
    rating: Option<i32>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

async fn record_feedback(
    state: &SharedState,
    headers: &HeaderMap,
    request: FeedbackRequest,
    kind: &str,
) -> AppResult<()> {
    let user = authenticate(state, headers).await?;
    if request.build_id.trim().is_empty() {
        return Err(AppError::InvalidRequest {
            message: "build_id is required".to_string(),
        });
    }

    let record = FeedbackRecord {
        build_id: request.build_id,
        kind: kind.to_string(),
        payload: json!({
            "user_id": user.user_id,
            "rating": request.rating,
            "comment": request.comment,
            "details": request.payload,
        }),
        created_at: Utc::now(),
    };
    state.store.record_feedback(&record).await?;
    Ok(())
}

/// POST /api/feedback
async fn feedback_build(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<FeedbackRequest>,
) -> Response {
    match record_feedback(&state, &headers, request, "build").await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/feedback/categorization
async fn feedback_categorization(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<FeedbackRequest>,
) -> Response {
    match record_feedback(&state, &headers, request, "categorization").await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => error_response(&e),
    }
}
