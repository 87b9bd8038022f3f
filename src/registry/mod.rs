//! External mod registry client (Modrinth-style API), used by the crash
//! fix planner to validate suggested operations before they become
//! repair operations.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{RegistryConfig, RequestConfig};
use crate::error::{RegistryError, RegistryResult};

/// A project as known to the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryProject {
    pub project_id: String,
    pub slug: String,
    pub title: String,
}

/// A published version of a project.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryVersion {
    pub id: String,
    pub version_number: String,
    #[serde(default)]
    pub loaders: Vec<String>,
    #[serde(default)]
    pub game_versions: Vec<String>,
}

/// Capability interface over the registry so tests can script lookups.
#[async_trait]
pub trait ModRegistry: Send + Sync {
    /// Look a project up by slug or name.
    async fn find_project(&self, query: &str) -> RegistryResult<Option<RegistryProject>>;

    /// Latest version compatible with the loader/game-version pair.
    async fn compatible_version(
        &self,
        project: &str,
        loader: &str,
        game_version: &str,
    ) -> RegistryResult<Option<RegistryVersion>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<RegistryProject>,
}

/// HTTP client for the registry with bounded retries.
#[derive(Clone)]
pub struct HttpModRegistry {
    client: Client,
    base_url: Url,
    request_config: RequestConfig,
}

impl HttpModRegistry {
    pub fn new(config: &RegistryConfig, request_config: RequestConfig) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(RegistryError::Http)?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            RegistryError::Unavailable {
                message: format!("invalid registry base url: {e}"),
                attempts: 0,
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::Unavailable {
                message: "registry base url cannot hold a path".to_string(),
                attempts: 0,
            });
        }

        Ok(Self {
            client,
            base_url,
            request_config,
        })
    }

    /// Endpoint URL from path segments; the `Url` builder percent-encodes
    /// each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("base url validated at construction")
            .pop_if_empty()
            .extend(segments);
        url
    }

    /// GET with retry on transient failures (network errors and 5xx).
    /// Query parameters go through the builder so they are encoded.
    async fn get_with_retry(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> RegistryResult<reqwest::Response> {
        let mut last_error = None;
        let mut attempts = 0;

        while attempts <= self.request_config.max_retries {
            if attempts > 0 {
                let backoff = self.request_config.retry_delay_ms * 2_u64.pow(attempts - 1);
                let jitter = rand::thread_rng().gen_range(0..=backoff / 2);
                warn!(url = %url, attempt = attempts, "retrying registry request");
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }

            match self.client.get(url.clone()).query(query).send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_error = Some(RegistryError::Api {
                        status: response.status().as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    });
                    attempts += 1;
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    last_error = Some(RegistryError::Http(e));
                    attempts += 1;
                }
            }
        }

        Err(RegistryError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
            attempts,
        })
    }
}

#[async_trait]
impl ModRegistry for HttpModRegistry {
    async fn find_project(&self, query: &str) -> RegistryResult<Option<RegistryProject>> {
        // Direct project lookup first; slugs usually hit.
        let direct = self
            .get_with_retry(self.endpoint(&["v2", "project", query]), &[])
            .await?;
        if direct.status().is_success() {
            #[derive(Deserialize)]
            struct Project {
                id: String,
                slug: String,
                title: String,
            }
            let project: Project =
                direct
                    .json()
                    .await
                    .map_err(|e| RegistryError::Api {
                        status: 200,
                        message: format!("malformed project body: {e}"),
                    })?;
            return Ok(Some(RegistryProject {
                project_id: project.id,
                slug: project.slug,
                title: project.title,
            }));
        }

        debug!(query, "direct lookup missed, falling back to search");
        let response = self
            .get_with_retry(
                self.endpoint(&["v2", "search"]),
                &[("query", query.to_string()), ("limit", "1".to_string())],
            )
            .await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let search: SearchResponse = response.json().await.map_err(|e| RegistryError::Api {
            status: 200,
            message: format!("malformed search body: {e}"),
        })?;
        Ok(search.hits.into_iter().next())
    }

    async fn compatible_version(
        &self,
        project: &str,
        loader: &str,
        game_version: &str,
    ) -> RegistryResult<Option<RegistryVersion>> {
        let response = self
            .get_with_retry(
                self.endpoint(&["v2", "project", project, "version"]),
                &[
                    ("loaders", json!([loader]).to_string()),
                    ("game_versions", json!([game_version]).to_string()),
                ],
            )
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let versions: Vec<RegistryVersion> =
            response.json().await.map_err(|e| RegistryError::Api {
                status: 200,
                message: format!("malformed versions body: {e}"),
            })?;
        Ok(versions.into_iter().next())
    }
}
