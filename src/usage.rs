//! Usage recorder (C10) — persists one record per logical request and
//! exposes the aggregation queries the dashboard consumes. Generalizes
//! `KeyStore::record_usage`/`usage_last_24h` into the full
//! `message_requests` table plus the queries named in §4.10.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{DecisionAttempt, MessageRequest, UsageCounts};
use crate::store::{LeaderboardEntry, ProviderSnapshot, SessionAggregate, Store};

pub struct UsageRecorder<'a> {
    store: &'a Store,
}

#[allow(clippy::too_many_arguments)]
pub struct NewMessageRequest {
    pub user_id: Uuid,
    pub key_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub observed_model: Option<String>,
    pub original_model: String,
    pub session_id: String,
    pub http_status: u16,
    pub duration_ms: u64,
    pub usage: UsageCounts,
    pub cost_usd: Decimal,
    pub applied_multiplier: Decimal,
    pub decision_chain: Vec<DecisionAttempt>,
    pub block_reason: Option<String>,
    pub error_message: Option<String>,
    pub user_agent: Option<String>,
    pub message_count: u32,
}

impl<'a> UsageRecorder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Writes one row after `ACCOUNTING`, or immediately on a pre-dispatch
    /// block/abort. Invariant: every request reaching `ACCOUNTING` ends up
    /// with exactly one persisted row carrying `status_code`, a provider
    /// id or block reason, and a session id (§8 invariant 1).
    pub fn record(&self, new: NewMessageRequest) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let record = MessageRequest {
            id,
            user_id: new.user_id,
            key_id: new.key_id,
            provider_id: new.provider_id,
            observed_model: new.observed_model,
            original_model: new.original_model,
            session_id: new.session_id,
            http_status: new.http_status,
            duration_ms: new.duration_ms,
            usage: new.usage,
            cost_usd: new.cost_usd,
            applied_multiplier: new.applied_multiplier,
            decision_chain: new.decision_chain,
            block_reason: new.block_reason,
            error_message: new.error_message,
            user_agent: new.user_agent,
            message_count: new.message_count,
            created_at: Utc::now(),
        };
        self.store.insert_message_request(&record)?;
        Ok(id)
    }

    pub fn session_aggregate(&self, session_id: &str) -> anyhow::Result<Option<SessionAggregate>> {
        self.store.session_aggregate(session_id)
    }

    pub fn user_daily_total(&self, user_id: Uuid) -> anyhow::Result<Decimal> {
        self.store.user_daily_total(user_id)
    }

    pub fn provider_today_snapshot(&self, provider_id: Uuid) -> anyhow::Result<ProviderSnapshot> {
        self.store.provider_today_snapshot(provider_id)
    }

    pub fn leaderboard_today(&self, limit: u32) -> anyhow::Result<Vec<LeaderboardEntry>> {
        self.store.leaderboard_today(limit)
    }
}
