//! Per-request pipeline trace: stage spans, LLM call stats and totals.
//! Attached to the final payload as `_pipeline`; purely observational.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::TokenUsage;

/// One pipeline stage span.
#[derive(Debug, Clone, Serialize)]
pub struct StageSpan {
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub ok: bool,
}

/// Accounting for one gateway call.
#[derive(Debug, Clone, Serialize)]
pub struct LlmCallStat {
    pub name: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

/// Totals over all gateway calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceTotals {
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Request-scoped trace accumulator.
#[derive(Debug, Serialize)]
pub struct PipelineTrace {
    pub pipeline_id: String,
    pub stages: Vec<StageSpan>,
    pub llm_calls: Vec<LlmCallStat>,
    pub totals: TraceTotals,
}

impl PipelineTrace {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            stages: Vec::new(),
            llm_calls: Vec::new(),
            totals: TraceTotals::default(),
        }
    }

    /// Open a new stage span. Any still-open span is closed as ok first.
    pub fn stage_start(&mut self, name: &str) {
        self.close_open_stage(true);
        self.stages.push(StageSpan {
            name: name.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            ok: false,
        });
    }

    /// Close the open stage span.
    pub fn stage_end(&mut self, ok: bool) {
        self.close_open_stage(ok);
    }

    fn close_open_stage(&mut self, ok: bool) {
        if let Some(span) = self.stages.last_mut() {
            if span.ended_at.is_none() {
                span.ended_at = Some(Utc::now());
                span.ok = ok;
            }
        }
    }

    /// Record a completed gateway call.
    pub fn record_llm(&mut self, name: &str, usage: TokenUsage, cost_usd: f64) {
        self.llm_calls.push(LlmCallStat {
            name: name.to_string(),
            tokens_in: usage.input_tokens,
            tokens_out: usage.output_tokens,
            cost_usd,
        });
        self.totals.tokens += usage.total();
        self.totals.cost_usd += cost_usd;
    }

    pub fn total_tokens(&self) -> u64 {
        self.totals.tokens
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.totals.cost_usd
    }

    /// Serialize for the `_pipeline` field of the final payload.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
