//! Scripted in-memory [`ModStore`] for unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{
    AuthClaims, BuildRecord, FeedbackRecord, ModRecord, ModStore, ModpackRecord, SearchFilters,
    UserRecord,
};
use crate::crash::CrashSession;
use crate::error::{StoreError, StoreResult};

/// Configurable fake store. Fields are scripted responses; `recorded_*`
/// capture writes for assertions.
#[derive(Default)]
pub struct StubStore {
    pub mods: Vec<ModRecord>,
    pub vector_hits: Vec<ModRecord>,
    pub keyword_hits: Vec<ModRecord>,
    pub modpacks: Vec<ModpackRecord>,
    pub users: Mutex<HashMap<String, UserRecord>>,
    pub claims: Option<AuthClaims>,
    pub batch_calls: AtomicUsize,
    pub recorded_sessions: Mutex<Vec<CrashSession>>,
    pub recorded_builds: Mutex<Vec<BuildRecord>>,
    pub recorded_feedback: Mutex<Vec<FeedbackRecord>>,
    pub committed_usage: Mutex<Vec<(String, u64)>>,
}

impl StubStore {
    pub fn with_catalog(mods: Vec<ModRecord>) -> Self {
        Self {
            mods,
            ..Default::default()
        }
    }

    pub fn with_user(self, user: UserRecord) -> Self {
        self.users.lock().unwrap().insert(user.id.clone(), user);
        self
    }
}

#[async_trait]
impl ModStore for StubStore {
    async fn get_mod(&self, source_id: &str) -> StoreResult<Option<ModRecord>> {
        Ok(self.mods.iter().find(|m| m.source_id == source_id).cloned())
    }

    async fn get_mods_batch(&self, source_ids: &[String]) -> StoreResult<Vec<ModRecord>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .mods
            .iter()
            .filter(|m| source_ids.contains(&m.source_id))
            .cloned()
            .collect())
    }

    async fn vector_search(
        &self,
        _embedding: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModRecord>> {
        Ok(self
            .vector_hits
            .iter()
            .filter(|m| filters.matches(m))
            .take(k)
            .cloned()
            .collect())
    }

    async fn keyword_search(
        &self,
        _terms: &str,
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModRecord>> {
        Ok(self
            .keyword_hits
            .iter()
            .filter(|m| filters.matches(m))
            .take(k)
            .cloned()
            .collect())
    }

    async fn modpack_vector_search(
        &self,
        _embedding: &[f32],
        _filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<ModpackRecord>> {
        Ok(self.modpacks.iter().take(k).cloned().collect())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<UserRecord> {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or(StoreError::UserNotFound {
                user_id: user_id.to_string(),
            })
    }

    async fn reset_counters(
        &self,
        user_id: &str,
        observed: &UserRecord,
        today: NaiveDate,
    ) -> StoreResult<UserRecord> {
        let mut users = self.users.lock().unwrap();
        let user = users.entry(user_id.to_string()).or_insert(observed.clone());

        let last = user.last_request_date;
        if last.is_none_or(|d| d < today) {
            user.daily_requests_used = 0;
            user.last_request_date = Some(today);
        }
        if last.is_none_or(|d| d.format("%Y-%m").to_string() < today.format("%Y-%m").to_string()) {
            user.monthly_requests_used = 0;
            user.ai_tokens_used = 0;
        }
        Ok(user.clone())
    }

    async fn commit_usage(&self, user_id: &str, tokens: u64, today: NaiveDate) -> StoreResult<()> {
        self.committed_usage
            .lock()
            .unwrap()
            .push((user_id.to_string(), tokens));
        if let Some(user) = self.users.lock().unwrap().get_mut(user_id) {
            user.daily_requests_used += 1;
            user.monthly_requests_used += 1;
            user.ai_tokens_used += tokens as i64;
            user.last_request_date = Some(today);
        }
        Ok(())
    }

    async fn verify_token(&self, _bearer: &str) -> StoreResult<AuthClaims> {
        self.claims.clone().ok_or(StoreError::Api {
            status: 401,
            message: "invalid or expired token".to_string(),
        })
    }

    async fn record_crash_session(&self, session: &CrashSession) -> StoreResult<()> {
        self.recorded_sessions.lock().unwrap().push(session.clone());
        Ok(())
    }

    async fn record_build(&self, build: &BuildRecord) -> StoreResult<()> {
        self.recorded_builds.lock().unwrap().push(build.clone());
        Ok(())
    }

    async fn record_feedback(&self, feedback: &FeedbackRecord) -> StoreResult<()> {
        let mut recorded = self.recorded_feedback.lock().unwrap();
        // Idempotent by build id, like the PostgREST upsert.
        if !recorded
            .iter()
            .any(|f| f.build_id == feedback.build_id && f.kind == feedback.kind)
        {
            recorded.push(feedback.clone());
        }
        Ok(())
    }
}
