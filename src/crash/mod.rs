//! Crash-analysis pipeline: sanitize, validate freshness, deduplicate,
//! diagnose via the gateway, plan validated fixes, patch the board and
//! record the session.

pub mod analyzer;
pub mod cache;
pub mod fixes;
pub mod patcher;
pub mod sanitizer;
pub mod validator;

pub use analyzer::{
    CrashAnalysis, CrashAnalyzer, CrashErrorKind, FixAction, FixPriority, ProblematicMod,
    SuggestedFix,
};
pub use cache::{fingerprint, DedupCache};
pub use fixes::{FixPlan, FixPlanner, Operation};
pub use patcher::{apply_operations, PatchResult};
pub use sanitizer::{sanitize, SanitizedLog, MAX_LOG_CHARS};
pub use validator::{is_stale, STALE_LOG_WARNING};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::board::BoardState;
use crate::error::AppResult;
use crate::progress::ProgressSender;
use crate::store::ModStore;
use crate::trace::PipelineTrace;

/// Crash-analysis request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CrashRequest {
    pub crash_log: String,
    #[serde(default)]
    pub game_log: Option<String>,
    pub board_state: BoardState,
    pub mc_version: String,
    pub mod_loader: String,
}

/// Terminal crash-analysis payload.
#[derive(Debug, Clone, Serialize)]
pub struct CrashReport {
    pub success: bool,
    pub root_cause: String,
    pub error_kind: CrashErrorKind,
    pub confidence: f64,
    pub suggestions: Vec<Operation>,
    pub warnings: Vec<String>,
    pub patched_board_state: Option<BoardState>,
    pub session_id: String,
    pub tokens_used: u64,
}

/// Persisted record of one crash analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashSession {
    pub id: String,
    pub user_id: String,
    pub crash_log_sanitized: String,
    pub board_state_snapshot: serde_json::Value,
    pub root_cause: String,
    pub error_kind: String,
    pub confidence: f64,
    pub suggestions: serde_json::Value,
    pub warnings: Vec<String>,
    pub patched_board_state: serde_json::Value,
    pub token_usage: u64,
    pub created_at: DateTime<Utc>,
}

/// The crash pipeline with its injected capabilities.
pub struct CrashPipeline {
    store: Arc<dyn ModStore>,
    analyzer: CrashAnalyzer,
    planner: FixPlanner,
    cache: Arc<DedupCache>,
    limiter: Arc<Semaphore>,
}

impl CrashPipeline {
    pub fn new(
        store: Arc<dyn ModStore>,
        analyzer: CrashAnalyzer,
        planner: FixPlanner,
        cache: Arc<DedupCache>,
        limiter: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            analyzer,
            planner,
            cache,
            limiter,
        }
    }

    /// Run the pipeline. Stage progress goes to `progress`; the terminal
    /// event is the caller's responsibility.
    pub async fn run(
        &self,
        user_id: &str,
        request: &CrashRequest,
        progress: &mut ProgressSender,
        trace: &mut PipelineTrace,
    ) -> AppResult<CrashReport> {
        // Dedup: an identical normalized log within the TTL replays the
        // recorded result byte for byte.
        trace.stage_start("dedup");
        progress.stage("dedup", 5, None).await?;
        let log_md5 = fingerprint(&request.crash_log);
        if let Some(cached) = self.cache.get(user_id, &log_md5) {
            info!(user_id = %user_id, "crash analysis served from dedup cache");
            trace.stage_end(true);
            return Ok(cached);
        }
        trace.stage_end(true);

        trace.stage_start("sanitize");
        progress.stage("sanitize", 15, None).await?;
        let sanitized = sanitize(&request.crash_log, MAX_LOG_CHARS);
        let game_log = request
            .game_log
            .as_deref()
            .map(|g| sanitize(g, MAX_LOG_CHARS / 2));
        trace.stage_end(true);

        trace.stage_start("validate");
        progress.stage("validate", 20, None).await?;
        let mut warnings = Vec::new();
        if is_stale(&sanitized.extracted.mods_in_log, &request.board_state) {
            warn!(user_id = %user_id, "crash log mod list barely overlaps the board");
            warnings.push(STALE_LOG_WARNING.to_string());
        }
        trace.stage_end(true);

        trace.stage_start("analyze");
        progress
            .stage("analyze", 35, Some("diagnosing crash".to_string()))
            .await?;
        let analysis = self
            .analyzer
            .analyze(
                &sanitized,
                game_log.as_ref().map(|g| g.text.as_str()),
                &request.board_state,
                &request.mc_version,
                &request.mod_loader,
            )
            .await;
        let analysis = match analysis {
            Ok(outcome) => {
                trace.record_llm("crash_analyzer", outcome.usage, outcome.cost_usd);
                trace.stage_end(true);
                outcome.value
            }
            Err(e) => {
                trace.stage_end(false);
                return Err(e);
            }
        };

        trace.stage_start("plan_fixes");
        progress.stage("plan_fixes", 65, None).await?;
        let fix_plan = self
            .planner
            .plan(
                &analysis.suggested_fixes,
                &request.board_state,
                &request.mc_version,
                &request.mod_loader,
                &self.limiter,
            )
            .await;
        warnings.extend(fix_plan.warnings);
        trace.stage_end(true);

        trace.stage_start("patch_board");
        progress.stage("patch_board", 80, None).await?;
        let patch = apply_operations(&request.board_state, &fix_plan.operations);
        trace.stage_end(true);

        trace.stage_start("record");
        progress.stage("record", 90, None).await?;
        let session_id = Uuid::new_v4().to_string();
        let session = CrashSession {
            id: session_id.clone(),
            user_id: user_id.to_string(),
            crash_log_sanitized: sanitized.text.clone(),
            board_state_snapshot: serde_json::to_value(&request.board_state)
                .unwrap_or_default(),
            root_cause: analysis.root_cause.clone(),
            error_kind: serde_json::to_value(analysis.error_kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "unknown".to_string()),
            confidence: analysis.confidence,
            suggestions: serde_json::to_value(&fix_plan.operations).unwrap_or_default(),
            warnings: warnings.clone(),
            patched_board_state: serde_json::to_value(&patch.board).unwrap_or_default(),
            token_usage: trace.total_tokens(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_crash_session(&session).await {
            // Recording is not worth failing the analysis over.
            warn!(error = %e, "failed to record crash session");
            trace.stage_end(false);
        } else {
            trace.stage_end(true);
        }

        let report = CrashReport {
            success: true,
            root_cause: analysis.root_cause,
            error_kind: analysis.error_kind,
            confidence: analysis.confidence,
            suggestions: fix_plan.operations,
            warnings,
            patched_board_state: Some(patch.board),
            session_id,
            tokens_used: trace.total_tokens(),
        };
        self.cache.insert(user_id, &log_md5, report.clone());

        Ok(report)
    }
}
