//! LLM gateway: structured JSON-mode calls to the external language model
//! with retry, token accounting and cost tracking.
//!
//! Raw model output never crosses this boundary — callers go through
//! [`call_structured`] and receive typed values, with one repair retry when
//! the model emits JSON that fails to parse or deserialize.

mod client;
mod types;

pub use client::HttpLlmGateway;
pub use types::{ChatMessage, LlmCall, LlmOutcome, TokenUsage};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{LlmError, LlmResult};

/// Capability interface over the language model. Returns parsed JSON plus
/// token usage and cost for the completed call.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn call_json(&self, call: LlmCall) -> LlmResult<LlmOutcome<serde_json::Value>>;
}

/// Call the gateway and deserialize the response into `T`.
///
/// Parse/shape failures are recovered exactly once: the follow-up call
/// echoes the error so the model can repair its output. A second failure
/// surfaces as `llm_invalid_output`.
pub async fn call_structured<T: DeserializeOwned>(
    gateway: &dyn LlmGateway,
    call: LlmCall,
) -> LlmResult<LlmOutcome<T>> {
    let repair_base = call.clone();

    let first = gateway.call_json(call).await;
    let (error_text, mut usage) = match first {
        Ok(outcome) => match serde_json::from_value::<T>(outcome.value.clone()) {
            Ok(value) => {
                return Ok(LlmOutcome {
                    value,
                    usage: outcome.usage,
                    cost_usd: outcome.cost_usd,
                })
            }
            Err(e) => (e.to_string(), outcome.usage),
        },
        Err(LlmError::InvalidOutput { message }) => (message, TokenUsage::default()),
        Err(other) => return Err(other),
    };

    warn!(error = %error_text, call = %repair_base.name, "LLM output invalid, retrying with repair prompt");

    let repair = repair_base.with_repair_note(&error_text);
    let outcome = gateway.call_json(repair).await?;
    usage += outcome.usage;

    match serde_json::from_value::<T>(outcome.value) {
        Ok(value) => Ok(LlmOutcome {
            value,
            usage,
            cost_usd: outcome.cost_usd,
        }),
        Err(e) => Err(LlmError::InvalidOutput {
            message: format!("repair attempt still invalid: {e}"),
        }),
    }
}
