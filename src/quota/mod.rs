//! Quota gate: tier policy plus daily/monthly/token counters with UTC
//! rollover resets. Checked before any paid call; committed only on a
//! terminal `complete`.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::{AppResult, QuotaError};
use crate::store::{CustomLimits, ModStore, Tier, UserRecord};

/// Unlimited sentinel in limit tables.
pub const UNLIMITED: i64 = -1;

/// Limits for one tier. `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub daily_requests: i64,
    pub monthly_requests: i64,
    pub max_mods_per_request: i64,
    pub ai_token_limit: i64,
}

/// The tier policy table.
pub fn tier_limits(tier: Tier) -> TierLimits {
    match tier {
        Tier::Free => TierLimits {
            daily_requests: 0,
            monthly_requests: 0,
            max_mods_per_request: 0,
            ai_token_limit: 0,
        },
        Tier::Test => TierLimits {
            daily_requests: 50,
            monthly_requests: 1_000,
            max_mods_per_request: 50,
            ai_token_limit: 100_000,
        },
        Tier::Premium => TierLimits {
            daily_requests: 200,
            monthly_requests: 5_000,
            max_mods_per_request: 100,
            ai_token_limit: 500_000,
        },
        Tier::Pro => TierLimits {
            daily_requests: UNLIMITED,
            monthly_requests: UNLIMITED,
            max_mods_per_request: 200,
            ai_token_limit: UNLIMITED,
        },
    }
}

impl TierLimits {
    /// Apply per-user overrides field by field.
    pub fn with_overrides(mut self, custom: Option<&CustomLimits>) -> Self {
        if let Some(custom) = custom {
            if let Some(v) = custom.daily_requests {
                self.daily_requests = v;
            }
            if let Some(v) = custom.monthly_requests {
                self.monthly_requests = v;
            }
            if let Some(v) = custom.max_mods_per_request {
                self.max_mods_per_request = v;
            }
            if let Some(v) = custom.ai_token_limit {
                self.ai_token_limit = v;
            }
        }
        self
    }
}

/// Gate instance shared by the request handlers.
pub struct QuotaGate {
    store: Arc<dyn ModStore>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn ModStore>) -> Self {
        Self { store }
    }

    /// Admission check for a paid request. Applies counter rollovers, then
    /// verifies every limit. Returns the (possibly reset) user row.
    pub async fn check(
        &self,
        user_id: &str,
        max_mods: u32,
        today: NaiveDate,
    ) -> AppResult<UserRecord> {
        let user = self.store.get_user(user_id).await?;

        if user.subscription_tier == Tier::Free {
            return Err(QuotaError::TierForbidden {
                tier: user.subscription_tier.to_string(),
            }
            .into());
        }

        let user = self.store.reset_counters(user_id, &user, today).await?;
        let limits =
            tier_limits(user.subscription_tier).with_overrides(user.custom_limits.as_ref());
        debug!(user_id, tier = %user.subscription_tier, ?limits, "quota check");

        if limits.daily_requests != UNLIMITED && user.daily_requests_used >= limits.daily_requests {
            return Err(QuotaError::DailyExceeded {
                limit: limits.daily_requests,
            }
            .into());
        }
        if limits.monthly_requests != UNLIMITED
            && user.monthly_requests_used >= limits.monthly_requests
        {
            return Err(QuotaError::MonthlyExceeded {
                limit: limits.monthly_requests,
            }
            .into());
        }
        if limits.max_mods_per_request != UNLIMITED
            && i64::from(max_mods) > limits.max_mods_per_request
        {
            return Err(QuotaError::MaxModsExceeded {
                requested: max_mods,
                limit: limits.max_mods_per_request,
            }
            .into());
        }
        if limits.ai_token_limit != UNLIMITED && user.ai_tokens_used >= limits.ai_token_limit {
            return Err(QuotaError::TokensExceeded {
                limit: limits.ai_token_limit,
            }
            .into());
        }

        Ok(user)
    }

    /// Commit usage after a successful terminal `complete`: +1 daily, +1
    /// monthly, plus the reported tokens.
    pub async fn commit(&self, user_id: &str, tokens: u64, today: NaiveDate) -> AppResult<()> {
        self.store.commit_usage(user_id, tokens, today).await?;
        info!(user_id, tokens, "usage committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::testing::StubStore;

    fn user(tier: Tier) -> UserRecord {
        UserRecord {
            id: "u1".into(),
            subscription_tier: tier,
            daily_requests_used: 0,
            monthly_requests_used: 0,
            ai_tokens_used: 0,
            last_request_date: None,
            custom_limits: None,
        }
    }

    fn gate_with(user: UserRecord) -> (QuotaGate, Arc<StubStore>) {
        let store = Arc::new(StubStore::default().with_user(user));
        (QuotaGate::new(Arc::clone(&store) as Arc<dyn ModStore>), store)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    #[test]
    fn test_tier_table() {
        let free = tier_limits(Tier::Free);
        assert_eq!(free.daily_requests, 0);
        assert_eq!(free.ai_token_limit, 0);

        let pro = tier_limits(Tier::Pro);
        assert_eq!(pro.daily_requests, UNLIMITED);
        assert_eq!(pro.max_mods_per_request, 200);
    }

    #[test]
    fn test_custom_overrides_per_field() {
        let limits = tier_limits(Tier::Test).with_overrides(Some(&CustomLimits {
            daily_requests: Some(99),
            monthly_requests: None,
            max_mods_per_request: None,
            ai_token_limit: Some(UNLIMITED),
        }));
        assert_eq!(limits.daily_requests, 99);
        assert_eq!(limits.monthly_requests, 1_000);
        assert_eq!(limits.ai_token_limit, UNLIMITED);
    }

    #[tokio::test]
    async fn test_free_tier_always_rejected() {
        let (gate, _) = gate_with(user(Tier::Free));
        let result = gate.check("u1", 5, today()).await;
        assert!(matches!(
            result,
            Err(AppError::Quota(QuotaError::TierForbidden { .. }))
        ));
    }

    #[tokio::test]
    async fn test_daily_limit_enforced() {
        let mut u = user(Tier::Test);
        u.daily_requests_used = 50;
        u.last_request_date = Some(today());
        let (gate, _) = gate_with(u);

        let result = gate.check("u1", 5, today()).await;
        assert!(matches!(
            result,
            Err(AppError::Quota(QuotaError::DailyExceeded { limit: 50 }))
        ));
    }

    #[tokio::test]
    async fn test_daily_counter_resets_on_new_day() {
        let mut u = user(Tier::Test);
        u.daily_requests_used = 50;
        u.last_request_date = Some(NaiveDate::from_ymd_opt(2025, 6, 14).unwrap());
        let (gate, _) = gate_with(u);

        // Same counters would fail on the 14th; a new day admits.
        let admitted = gate.check("u1", 5, today()).await.unwrap();
        assert_eq!(admitted.daily_requests_used, 0);
        assert_eq!(admitted.last_request_date, Some(today()));
    }

    #[tokio::test]
    async fn test_month_rollover_resets_monthly_and_tokens() {
        let mut u = user(Tier::Test);
        u.monthly_requests_used = 1_000;
        u.ai_tokens_used = 100_000;
        u.last_request_date = Some(NaiveDate::from_ymd_opt(2025, 5, 31).unwrap());
        let (gate, _) = gate_with(u);

        let admitted = gate.check("u1", 5, today()).await.unwrap();
        assert_eq!(admitted.monthly_requests_used, 0);
        assert_eq!(admitted.ai_tokens_used, 0);
    }

    #[tokio::test]
    async fn test_max_mods_enforced() {
        let (gate, _) = gate_with(user(Tier::Test));
        let result = gate.check("u1", 51, today()).await;
        assert!(matches!(
            result,
            Err(AppError::Quota(QuotaError::MaxModsExceeded {
                requested: 51,
                limit: 50
            }))
        ));
    }

    #[tokio::test]
    async fn test_token_limit_enforced() {
        let mut u = user(Tier::Test);
        u.ai_tokens_used = 100_000;
        u.last_request_date = Some(today());
        let (gate, _) = gate_with(u);

        let result = gate.check("u1", 5, today()).await;
        assert!(matches!(
            result,
            Err(AppError::Quota(QuotaError::TokensExceeded { .. }))
        ));
    }

    #[tokio::test]
    async fn test_pro_unlimited() {
        let mut u = user(Tier::Pro);
        u.daily_requests_used = 9_999;
        u.monthly_requests_used = 99_999;
        u.ai_tokens_used = 10_000_000;
        u.last_request_date = Some(today());
        let (gate, _) = gate_with(u);

        assert!(gate.check("u1", 200, today()).await.is_ok());
        assert!(gate.check("u1", 201, today()).await.is_err());
    }

    #[tokio::test]
    async fn test_commit_increments_counters() {
        let (gate, store) = gate_with(user(Tier::Premium));
        gate.commit("u1", 1_234, today()).await.unwrap();

        let committed = store.committed_usage.lock().unwrap();
        assert_eq!(committed.as_slice(), &[("u1".to_string(), 1_234)]);
        let users = store.users.lock().unwrap();
        let u = users.get("u1").unwrap();
        assert_eq!(u.daily_requests_used, 1);
        assert_eq!(u.monthly_requests_used, 1);
        assert_eq!(u.ai_tokens_used, 1_234);
    }
}
