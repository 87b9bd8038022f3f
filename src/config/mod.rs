use std::env;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub registry: RegistryConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub budgets: BudgetConfig,
}

/// Language model API configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// USD per 1M input tokens
    pub input_cost_per_mtok: f64,
    /// USD per 1M output tokens
    pub output_cost_per_mtok: f64,
}

/// Mod store (PostgREST) configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
}

/// Bearer-token verification configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_audience: String,
    pub jwt_secret: String,
}

/// External mod registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Outbound HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Concurrent external calls per request
    pub per_request_parallelism: usize,
    /// Concurrent calls per external service, server-wide
    pub per_service_parallelism: usize,
}

/// Per-request pipeline budgets and cache tuning
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub assembly_budget_s: u64,
    pub crash_budget_s: u64,
    pub dedup_ttl_s: u64,
    /// Default for the themed-architecture flow when the request omits it
    pub use_architecture_default: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            api_key: require("LLM_API_KEY")?,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string()),
            input_cost_per_mtok: parse_or("LLM_INPUT_COST_PER_MTOK", 0.14),
            output_cost_per_mtok: parse_or("LLM_OUTPUT_COST_PER_MTOK", 0.28),
        };

        let store = StoreConfig {
            url: require("STORE_URL")?.trim_end_matches('/').to_string(),
            key: require("STORE_KEY")?,
        };

        let auth = AuthConfig {
            jwt_audience: require("JWT_AUDIENCE")?,
            jwt_secret: require("JWT_SECRET")?,
        };

        let registry = RegistryConfig {
            base_url: require("MOD_REGISTRY_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
        };

        let server = ServerConfig {
            port: parse_or("SERVER_PORT", 8080),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_or("REQUEST_TIMEOUT_MS", 30_000),
            max_retries: parse_or("MAX_RETRIES", 3),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 1_000),
            per_request_parallelism: parse_or("PER_REQUEST_PARALLELISM", 8),
            per_service_parallelism: parse_or("PER_SERVICE_PARALLELISM", 64),
        };

        let budgets = BudgetConfig {
            assembly_budget_s: parse_or("REQUEST_BUDGET_ASSEMBLY_S", 180),
            crash_budget_s: parse_or("REQUEST_BUDGET_CRASH_S", 120),
            dedup_ttl_s: parse_or("DEDUP_TTL_SECONDS", 3_600),
            use_architecture_default: parse_or("USE_V3_DEFAULT", true),
        };

        Ok(Config {
            llm,
            store,
            auth,
            registry,
            server,
            logging,
            request,
            budgets,
        })
    }
}

fn require(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Config {
        message: format!("{key} is required"),
    })
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            per_request_parallelism: 8,
            per_service_parallelism: 64,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            assembly_budget_s: 180,
            crash_budget_s: 120,
            dedup_ttl_s: 3_600,
            use_architecture_default: true,
        }
    }
}
