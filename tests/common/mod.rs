//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use packwright::config::{
    AuthConfig, BudgetConfig, Config, LlmConfig, LogFormat, LoggingConfig, RegistryConfig,
    RequestConfig, ServerConfig, StoreConfig,
};
use packwright::embedding::Embedder;
use packwright::error::{EmbedResult, LlmError, LlmResult, RegistryResult};
use packwright::llm::{LlmCall, LlmGateway, LlmOutcome, TokenUsage};
use packwright::registry::{ModRegistry, RegistryProject, RegistryVersion};
use packwright::store::{DependencyKind, ModDependency, ModRecord};

/// Gateway fake: scripted JSON responses keyed by call name.
#[derive(Default)]
pub struct ScriptedGateway {
    responses: Mutex<HashMap<String, VecDeque<serde_json::Value>>>,
    pub calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, call_name: &str, response: serde_json::Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(call_name.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn call_json(&self, call: LlmCall) -> LlmResult<LlmOutcome<serde_json::Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&call.name)
            .and_then(|queue| queue.pop_front());
        match response {
            Some(value) => Ok(LlmOutcome {
                value,
                usage: TokenUsage {
                    input_tokens: 500,
                    output_tokens: 120,
                },
                cost_usd: 0.0001,
            }),
            None => Err(LlmError::Unavailable {
                message: format!("no scripted response for {}", call.name),
                attempts: 0,
            }),
        }
    }
}

/// Embedder fake returning a constant unit vector.
pub struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> EmbedResult<Vec<f32>> {
        let mut v = vec![0.0f32; 384];
        v[0] = 1.0;
        Ok(v)
    }
}

/// Registry fake with a fixed set of known projects.
pub struct ScriptedRegistry {
    pub known: Vec<String>,
}

#[async_trait]
impl ModRegistry for ScriptedRegistry {
    async fn find_project(&self, query: &str) -> RegistryResult<Option<RegistryProject>> {
        Ok(self
            .known
            .iter()
            .find(|k| *k == query)
            .map(|k| RegistryProject {
                project_id: format!("id-{k}"),
                slug: k.clone(),
                title: k.clone(),
            }))
    }

    async fn compatible_version(
        &self,
        _project: &str,
        loader: &str,
        game_version: &str,
    ) -> RegistryResult<Option<RegistryVersion>> {
        Ok(Some(RegistryVersion {
            id: "v1".to_string(),
            version_number: "1.0.0".to_string(),
            loaders: vec![loader.to_string()],
            game_versions: vec![game_version.to_string()],
        }))
    }
}

/// Config literal for wiring an [`packwright::pipeline::AppContext`]
/// without touching the environment.
pub fn test_config() -> Config {
    Config {
        llm: LlmConfig {
            api_key: "test".to_string(),
            base_url: "http://localhost:0".to_string(),
            model: "test-model".to_string(),
            input_cost_per_mtok: 0.14,
            output_cost_per_mtok: 0.28,
        },
        store: StoreConfig {
            url: "http://localhost:0".to_string(),
            key: "key".to_string(),
        },
        auth: AuthConfig {
            jwt_audience: "authenticated".to_string(),
            jwt_secret: "secret".to_string(),
        },
        registry: RegistryConfig {
            base_url: "http://localhost:0".to_string(),
        },
        server: ServerConfig { port: 0 },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig::default(),
        budgets: BudgetConfig::default(),
    }
}

/// Catalog row builder.
pub fn catalog_mod(
    source_id: &str,
    name: &str,
    loaders: &[&str],
    versions: &[&str],
    caps: &[&str],
    downloads: u64,
    required_deps: &[&str],
) -> ModRecord {
    ModRecord {
        source_id: source_id.to_string(),
        slug: source_id.to_string(),
        name: name.to_string(),
        summary: Some(format!("{name} summary")),
        loaders: loaders.iter().map(|s| s.to_string()).collect(),
        game_versions: versions.iter().map(|s| s.to_string()).collect(),
        capabilities: caps.iter().map(|s| s.to_string()).collect(),
        downloads,
        dependencies: required_deps
            .iter()
            .map(|d| ModDependency {
                project_id: d.to_string(),
                dependency_type: DependencyKind::Required,
                version_range: None,
            })
            .collect(),
        ..Default::default()
    }
}
