use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use tracing::{debug, error, info, warn};

use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, LlmCall, LlmOutcome, ResponseFormat,
    TokenUsage,
};
use super::LlmGateway;
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{LlmError, LlmResult};

/// Total wall-clock budget for one gateway call including retries.
const CALL_BUDGET: Duration = Duration::from_secs(30);

/// Gateway speaking the OpenAI-compatible chat completions API in strict
/// JSON mode.
#[derive(Clone)]
pub struct HttpLlmGateway {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    input_cost_per_mtok: f64,
    output_cost_per_mtok: f64,
    request_config: RequestConfig,
}

impl HttpLlmGateway {
    pub fn new(config: &LlmConfig, request_config: RequestConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            input_cost_per_mtok: config.input_cost_per_mtok,
            output_cost_per_mtok: config.output_cost_per_mtok,
            request_config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn cost_usd(&self, usage: TokenUsage) -> f64 {
        usage.input_tokens as f64 * self.input_cost_per_mtok / 1_000_000.0
            + usage.output_tokens as f64 * self.output_cost_per_mtok / 1_000_000.0
    }

    async fn execute_request(&self, call: &LlmCall) -> LlmResult<(String, TokenUsage)> {
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(call.system.clone()),
                ChatMessage::user(call.user.clone()),
            ],
            temperature: call.temperature,
            max_tokens: call.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
        };

        debug!(call = %call.name, model = %self.model, "calling chat completions");

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::InvalidOutput {
                message: format!("malformed completion envelope: {e}"),
            })?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidOutput {
                message: "completion had no choices".to_string(),
            })?;

        Ok((content, usage))
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn call_json(&self, call: LlmCall) -> LlmResult<LlmOutcome<serde_json::Value>> {
        let started = Instant::now();
        let mut last_error = None;
        let mut attempts = 0;

        while attempts <= self.request_config.max_retries {
            if attempts > 0 {
                let backoff = self.request_config.retry_delay_ms * 2_u64.pow(attempts - 1);
                let jitter = rand::thread_rng().gen_range(0..=backoff / 2);
                let delay = Duration::from_millis(backoff + jitter);
                if started.elapsed() + delay >= CALL_BUDGET {
                    break;
                }
                warn!(
                    call = %call.name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "retrying LLM request"
                );
                tokio::time::sleep(delay).await;
            }

            let attempt_start = Instant::now();
            match self.execute_request(&call).await {
                Ok((content, usage)) => {
                    info!(
                        call = %call.name,
                        latency_ms = attempt_start.elapsed().as_millis(),
                        tokens_in = usage.input_tokens,
                        tokens_out = usage.output_tokens,
                        "LLM call succeeded"
                    );
                    let value = parse_json_content(&content)?;
                    let cost_usd = self.cost_usd(usage);
                    return Ok(LlmOutcome {
                        value,
                        usage,
                        cost_usd,
                    });
                }
                // Invalid output is not transient; the caller owns the
                // single repair retry.
                Err(e @ LlmError::InvalidOutput { .. }) => return Err(e),
                Err(e) => {
                    error!(
                        call = %call.name,
                        error = %e,
                        attempt = attempts,
                        "LLM call failed"
                    );
                    last_error = Some(e);
                    attempts += 1;
                }
            }

            if started.elapsed() >= CALL_BUDGET {
                return Err(LlmError::Timeout {
                    timeout_ms: CALL_BUDGET.as_millis() as u64,
                });
            }
        }

        Err(LlmError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
            attempts,
        })
    }
}

/// Parse model output into a JSON object, tolerating markdown fences and
/// surrounding prose.
fn parse_json_content(content: &str) -> LlmResult<serde_json::Value> {
    let cleaned = content
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();

    let candidate = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => {
            return Err(LlmError::InvalidOutput {
                message: "no JSON object in model output".to_string(),
            })
        }
    };

    serde_json::from_str(candidate).map_err(|e| LlmError::InvalidOutput {
        message: format!("JSON parse error: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let value = parse_json_content(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_parse_fenced_json() {
        let value = parse_json_content("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_parse_json_with_prose() {
        let value = parse_json_content("Here is the plan:\n{\"queries\": []}\nDone.").unwrap();
        assert!(value["queries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let result = parse_json_content("I cannot answer that.");
        assert!(matches!(result, Err(LlmError::InvalidOutput { .. })));
    }

    #[test]
    fn test_parse_rejects_broken_json() {
        let result = parse_json_content(r#"{"a": 1"#);
        assert!(matches!(result, Err(LlmError::InvalidOutput { .. })));
    }

    #[test]
    fn test_cost_computation() {
        let config = LlmConfig {
            api_key: "k".into(),
            base_url: "http://localhost".into(),
            model: "m".into(),
            input_cost_per_mtok: 0.14,
            output_cost_per_mtok: 0.28,
        };
        let gateway = HttpLlmGateway::new(&config, RequestConfig::default()).unwrap();
        let cost = gateway.cost_usd(TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
        });
        assert!((cost - (0.14 + 0.14)).abs() < 1e-9);
    }
}
