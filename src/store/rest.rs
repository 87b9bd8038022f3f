use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    AuthClaims, BuildRecord, FeedbackRecord, ModRecord, ModStore, ModpackRecord, SearchFilters,
    UserRecord,
};
use crate::config::{RequestConfig, StoreConfig};
use crate::crash::CrashSession;
use crate::error::{StoreError, StoreResult};

// BM25 ranking parameters
const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;
const EXACT_MATCH_BOOST: f64 = 10.0;

/// PostgREST-backed store client.
///
/// Speaks the managed-Postgres REST dialect: `/rest/v1/<table>` reads with
/// query-string filters, `/rest/v1/rpc/<fn>` for ANN search functions, and
/// `/auth/v1/user` for bearer-token verification.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    service_key: String,
    /// Anon key presented to the auth endpoint alongside user bearer tokens.
    auth_key: String,
}

impl RestStore {
    pub fn new(config: &StoreConfig, request: &RequestConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request.timeout_ms))
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.key.clone(),
            auth_key: config.key.clone(),
        })
    }

    /// Use a distinct key for the auth endpoint (anon key).
    pub fn with_auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = key.into();
        self
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let response = self
            .client
            .get(self.rest_url(table))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response.json().await.map_err(|e| StoreError::InvalidResponse {
            message: format!("failed to decode {table} rows: {e}"),
        })
    }

    async fn call_rpc<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        body: serde_json::Value,
    ) -> StoreResult<T> {
        let response = self
            .client
            .post(self.rpc_url(function))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                message: format!("failed to decode {function} response: {e}"),
            })
    }

    async fn insert_row(&self, table: &str, row: serde_json::Value, upsert: bool) -> StoreResult<()> {
        let prefer = if upsert {
            "resolution=merge-duplicates,return=minimal"
        } else {
            "return=minimal"
        };
        let response = self
            .client
            .post(self.rest_url(table))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Prefer", prefer)
            .json(&row)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModStore for RestStore {
    async fn get_mod(&self, source_id: &str) -> StoreResult<Option<ModRecord>> {
        let rows: Vec<ModRecord> = self
            .get_rows(
                "mods",
                &[
                    ("source_id", format!("eq.{source_id}")),
                    ("select", "*".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn get_mods_batch(&self, source_ids: &[String]) -> StoreResult<Vec<ModRecord>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = source_ids.join(",");
        self.get_rows(
            "mods",
            &[
                ("source_id", format!("in.({ids})")),
                ("select", "*".to_string()),
            ],
        )
        .await
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModRecord>> {
        // The RPC returns rows ranked by cosine distance; compatibility
        // filtering happens here because the function only takes the vector.
        let rows: Vec<ModRecord> = self
            .call_rpc(
                "search_mods_semantic",
                json!({
                    "query_embedding": embedding,
                    "match_count": k * 2,
                }),
            )
            .await?;

        debug!(returned = rows.len(), k, "vector search results");
        Ok(rows
            .into_iter()
            .filter(|m| filters.matches(m))
            .take(k)
            .collect())
    }

    async fn keyword_search(
        &self,
        terms: &str,
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModRecord>> {
        let keywords: Vec<String> = terms
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(|w| w.to_lowercase())
            .collect();
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut conditions = Vec::new();
        for keyword in &keywords {
            conditions.push(format!("name.ilike.*{keyword}*"));
            conditions.push(format!("summary.ilike.*{keyword}*"));
            conditions.push(format!("description.ilike.*{keyword}*"));
        }
        let or_query = format!("({})", conditions.join(","));

        // Over-fetch so BM25 re-ranking has enough material.
        let rows: Vec<ModRecord> = self
            .get_rows(
                "mods",
                &[
                    ("or", or_query),
                    ("select", "*".to_string()),
                    ("limit", (k * 3).to_string()),
                ],
            )
            .await?;

        let mut scored = rank_bm25(rows, &keywords);
        scored.retain(|(_, m)| filters.matches(m));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, m)| m).collect())
    }

    async fn modpack_vector_search(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModpackRecord>> {
        let rows: Vec<ModpackRecord> = self
            .call_rpc(
                "search_modpacks_semantic",
                json!({
                    "query_embedding": embedding,
                    "match_count": k * 2,
                }),
            )
            .await?;

        let loader = filters.loader.as_deref();
        Ok(rows
            .into_iter()
            .filter(|p| {
                loader.is_none_or(|l| {
                    p.loaders.is_empty() || p.loaders.iter().any(|pl| pl.eq_ignore_ascii_case(l))
                })
            })
            .take(k)
            .collect())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<UserRecord> {
        let rows: Vec<UserRecord> = self
            .get_rows(
                "users",
                &[
                    ("id", format!("eq.{user_id}")),
                    (
                        "select",
                        "id,subscription_tier,daily_requests_used,monthly_requests_used,\
                         ai_tokens_used,last_request_date,custom_limits"
                            .to_string(),
                    ),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        rows.into_iter().next().ok_or(StoreError::UserNotFound {
            user_id: user_id.to_string(),
        })
    }

    async fn reset_counters(
        &self,
        user_id: &str,
        observed: &UserRecord,
        today: NaiveDate,
    ) -> StoreResult<UserRecord> {
        let mut updates = serde_json::Map::new();
        let last = observed.last_request_date;

        if last.is_none_or(|d| d < today) {
            updates.insert("daily_requests_used".into(), json!(0));
            updates.insert("last_request_date".into(), json!(today.to_string()));
        }
        let month_changed =
            last.is_none_or(|d| (d.format("%Y-%m").to_string()) < today.format("%Y-%m").to_string());
        if month_changed {
            updates.insert("monthly_requests_used".into(), json!(0));
            updates.insert("ai_tokens_used".into(), json!(0));
        }

        if updates.is_empty() {
            return Ok(observed.clone());
        }

        // Guard on the previously observed date so only one of several
        // concurrent requests racing over midnight performs the reset.
        let date_guard = match last {
            Some(d) => format!("eq.{d}"),
            None => "is.null".to_string(),
        };
        let response = self
            .client
            .patch(self.rest_url("users"))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Prefer", "return=representation")
            .query(&[
                ("id", format!("eq.{user_id}")),
                ("last_request_date", date_guard),
            ])
            .json(&serde_json::Value::Object(updates))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let rows: Vec<UserRecord> =
            response
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse {
                    message: format!("failed to decode reset response: {e}"),
                })?;
        match rows.into_iter().next() {
            Some(updated) => Ok(updated),
            None => {
                // Lost the race; another request already reset the row.
                warn!(user_id, "counter reset lost CAS race, re-reading");
                self.get_user(user_id).await
            }
        }
    }

    async fn commit_usage(&self, user_id: &str, tokens: u64, today: NaiveDate) -> StoreResult<()> {
        // Atomic increment on the store side; the migration that adds the
        // counter columns also installs this function.
        let _: serde_json::Value = self
            .call_rpc(
                "increment_usage",
                json!({
                    "p_user_id": user_id,
                    "p_tokens": tokens,
                    "p_request_date": today.to_string(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn verify_token(&self, bearer: &str) -> StoreResult<AuthClaims> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.auth_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: "invalid or expired token".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                message: format!("failed to decode auth claims: {e}"),
            })
    }

    async fn record_crash_session(&self, session: &CrashSession) -> StoreResult<()> {
        let row = serde_json::to_value(session).map_err(|e| StoreError::InvalidResponse {
            message: format!("failed to encode crash session: {e}"),
        })?;
        self.insert_row("crash_sessions", row, false).await
    }

    async fn record_build(&self, build: &BuildRecord) -> StoreResult<()> {
        let row = serde_json::to_value(build).map_err(|e| StoreError::InvalidResponse {
            message: format!("failed to encode build record: {e}"),
        })?;
        self.insert_row("modpack_builds", row, false).await
    }

    async fn record_feedback(&self, feedback: &FeedbackRecord) -> StoreResult<()> {
        let row = serde_json::to_value(feedback).map_err(|e| StoreError::InvalidResponse {
            message: format!("failed to encode feedback: {e}"),
        })?;
        self.insert_row("ai_feedback", row, true).await
    }
}

/// Rank candidate rows with BM25 over a weighted document text
/// (name x3, summary x2, tags x2, description x1), then apply an
/// exact slug/name match boost.
fn rank_bm25(rows: Vec<ModRecord>, keywords: &[String]) -> Vec<(f64, ModRecord)> {
    if rows.is_empty() {
        return Vec::new();
    }

    let doc_texts: Vec<String> = rows
        .iter()
        .map(|m| {
            let name = m.name.to_lowercase();
            let summary = m.summary.clone().unwrap_or_default().to_lowercase();
            let tags = m.tags.join(" ").to_lowercase();
            let desc: String = m
                .description
                .clone()
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect::<String>()
                .to_lowercase();
            format!("{name} {name} {name} {summary} {summary} {tags} {tags} {desc}")
        })
        .collect();

    let doc_lengths: Vec<usize> = doc_texts.iter().map(|t| t.split_whitespace().count()).collect();
    let avgdl = doc_lengths.iter().sum::<usize>() as f64 / doc_lengths.len().max(1) as f64;
    let n = rows.len() as f64;

    let idf: Vec<f64> = keywords
        .iter()
        .map(|term| {
            let df = doc_texts.iter().filter(|t| t.contains(term.as_str())).count() as f64;
            if df > 0.0 {
                ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
            } else {
                0.0
            }
        })
        .collect();

    let mut scored: Vec<(f64, ModRecord)> = rows
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            let text = &doc_texts[i];
            let doc_len = doc_lengths[i] as f64;
            let mut score = 0.0;
            for (term, term_idf) in keywords.iter().zip(&idf) {
                let tf = text.matches(term.as_str()).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let numerator = tf * (BM25_K1 + 1.0);
                let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / avgdl));
                score += term_idf * (numerator / denominator);
            }
            let mut score = (score / (keywords.len() as f64 * 5.0)).min(1.0);

            let slug = m.slug.to_lowercase();
            let name = m.name.to_lowercase();
            if keywords.iter().any(|kw| slug == *kw || name == *kw) {
                score *= EXACT_MATCH_BOOST;
            }
            (score, m)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(slug: &str, name: &str, summary: &str, downloads: u64) -> ModRecord {
        ModRecord {
            source_id: slug.to_string(),
            slug: slug.to_string(),
            name: name.to_string(),
            summary: Some(summary.to_string()),
            downloads,
            ..Default::default()
        }
    }

    #[test]
    fn test_bm25_ranks_matching_doc_higher() {
        let rows = vec![
            record("a", "Iron Chests", "more chest variants", 100),
            record("b", "Sodium", "rendering optimization for fps", 100),
        ];
        let keywords = vec!["optimization".to_string(), "fps".to_string()];
        let ranked = rank_bm25(rows, &keywords);
        assert_eq!(ranked[0].1.slug, "b");
        assert!(ranked[0].0 > ranked[1].0);
    }

    #[test]
    fn test_exact_match_boost() {
        let rows = vec![
            record("sodium-extra", "Sodium Extra", "sodium addon with extra options", 100),
            record("sodium", "Sodium", "rendering engine", 100),
        ];
        let keywords = vec!["sodium".to_string()];
        let ranked = rank_bm25(rows, &keywords);
        assert_eq!(ranked[0].1.slug, "sodium");
    }

    #[test]
    fn test_bm25_empty_inputs() {
        assert!(rank_bm25(Vec::new(), &["x".to_string()]).is_empty());
        let rows = vec![record("a", "A", "b", 0)];
        let ranked = rank_bm25(rows, &[]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, 0.0);
    }
}
