use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("No viable selection after filtering")]
    NoViableSelection,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Quota gate denials, evaluated before any paid call
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("AI features are not available for the {tier} tier")]
    TierForbidden { tier: String },

    #[error("Daily limit reached ({limit} requests/day)")]
    DailyExceeded { limit: i64 },

    #[error("Monthly limit reached ({limit} requests/month)")]
    MonthlyExceeded { limit: i64 },

    #[error("AI token limit reached ({limit} tokens/month)")]
    TokensExceeded { limit: i64 },

    #[error("Too many mods requested: {requested} (maximum {limit})")]
    MaxModsExceeded { requested: u32, limit: i64 },

    #[error("Unknown subscription tier: {tier}")]
    UnknownTier { tier: String },
}

/// Mod store (PostgREST) errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Store API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid store response: {message}")]
    InvalidResponse { message: String },

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// LLM gateway errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM unavailable: {message} (attempts: {attempts})")]
    Unavailable { message: String, attempts: u32 },

    #[error("LLM API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned invalid output: {message}")]
    InvalidOutput { message: String },

    #[error("LLM request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// External mod registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {message} (attempts: {attempts})")]
    Unavailable { message: String, attempts: u32 },

    #[error("Registry API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Project not found: {project}")]
    NotFound { project: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Embedding errors
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Embedder unavailable: {message}")]
    Unavailable { message: String },

    #[error("Unexpected embedding dimension: got {got}, expected {expected}")]
    Dimension { got: usize, expected: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    /// Wire error code for the `{error, message}` response body
    pub fn wire_code(&self) -> &'static str {
        match self {
            AppError::Config { .. } => "internal",
            AppError::InvalidRequest { .. } => "invalid_request",
            AppError::Unauthorized { .. } => "unauthorized",
            AppError::Quota(q) => match q {
                QuotaError::TierForbidden { .. } => "tier_forbidden",
                QuotaError::DailyExceeded { .. } => "daily_exceeded",
                QuotaError::MonthlyExceeded { .. } => "monthly_exceeded",
                QuotaError::TokensExceeded { .. } => "tokens_exceeded",
                QuotaError::MaxModsExceeded { .. } => "tier_forbidden",
                QuotaError::UnknownTier { .. } => "tier_forbidden",
            },
            AppError::Store(_) => "internal",
            AppError::Llm(l) => match l {
                LlmError::InvalidOutput { .. } => "llm_invalid_output",
                LlmError::Timeout { .. } | LlmError::Unavailable { .. } => "llm_timeout",
                _ => "internal",
            },
            AppError::Registry(_) => "registry_unavailable",
            AppError::Embed(_) => "internal",
            AppError::NoViableSelection => "no_viable_selection",
            AppError::Cancelled => "cancelled",
            AppError::Internal { .. } => "internal",
        }
    }

    /// HTTP status code for the wire response
    pub fn status(&self) -> u16 {
        match self {
            AppError::InvalidRequest { .. } => 400,
            AppError::Unauthorized { .. } => 401,
            AppError::Quota(q) => match q {
                QuotaError::DailyExceeded { .. }
                | QuotaError::MonthlyExceeded { .. }
                | QuotaError::TokensExceeded { .. } => 429,
                _ => 403,
            },
            _ => 500,
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for LLM gateway operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type alias for embedding operations
pub type EmbedResult<T> = Result<T, EmbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::InvalidRequest {
            message: "prompt is required".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid request: prompt is required");
    }

    #[test]
    fn test_quota_error_codes() {
        let err = AppError::Quota(QuotaError::TierForbidden {
            tier: "free".to_string(),
        });
        assert_eq!(err.wire_code(), "tier_forbidden");
        assert_eq!(err.status(), 403);

        let err = AppError::Quota(QuotaError::DailyExceeded { limit: 50 });
        assert_eq!(err.wire_code(), "daily_exceeded");
        assert_eq!(err.status(), 429);

        let err = AppError::Quota(QuotaError::TokensExceeded { limit: 100_000 });
        assert_eq!(err.wire_code(), "tokens_exceeded");
        assert_eq!(err.status(), 429);
    }

    #[test]
    fn test_llm_error_codes() {
        let err = AppError::Llm(LlmError::InvalidOutput {
            message: "expected JSON object".to_string(),
        });
        assert_eq!(err.wire_code(), "llm_invalid_output");
        assert_eq!(err.status(), 500);

        let err = AppError::Llm(LlmError::Timeout { timeout_ms: 30000 });
        assert_eq!(err.wire_code(), "llm_timeout");
    }

    #[test]
    fn test_registry_error_code() {
        let err = AppError::Registry(RegistryError::Unavailable {
            message: "503".to_string(),
            attempts: 3,
        });
        assert_eq!(err.wire_code(), "registry_unavailable");
    }

    #[test]
    fn test_unauthorized_status() {
        let err = AppError::Unauthorized {
            message: "missing bearer token".to_string(),
        };
        assert_eq!(err.status(), 401);
        assert_eq!(err.wire_code(), "unauthorized");
    }

    #[test]
    fn test_store_error_conversion() {
        let store_err = StoreError::Api {
            status: 500,
            message: "oops".to_string(),
        };
        let app_err: AppError = store_err.into();
        assert!(matches!(app_err, AppError::Store(_)));
        assert_eq!(app_err.wire_code(), "internal");
    }

    #[test]
    fn test_cancelled_code() {
        assert_eq!(AppError::Cancelled.wire_code(), "cancelled");
    }
}
