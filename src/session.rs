//! Session tracker (C4) — mints and parses session ids, maintains
//! active-session indexes with expiry. No teacher analog exists (the
//! daemon this gateway generalizes from has no notion of a
//! cross-request conversational session); grounded directly in spec's
//! sorted-set description and the KV adapter's primitives (C1).

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kv::KvStore;

const SWEEP_HORIZON_SECONDS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    Global,
    Key(Uuid),
    Provider(Uuid),
}

impl SessionScope {
    fn index_key(&self) -> String {
        match self {
            SessionScope::Global => "sessions:global".to_string(),
            SessionScope::Key(id) => format!("sessions:key:{id}"),
            SessionScope::Provider(id) => format!("sessions:provider:{id}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: Uuid,
    pub key_id: Uuid,
    pub model: String,
    pub api_type: String,
    pub started_at: chrono::DateTime<Utc>,
    pub last_provider_id: Option<Uuid>,
}

pub struct SessionTracker {
    kv: KvStore,
    /// How long a session's info record (`SessionInfo`, not the sorted-set
    /// membership swept by `SWEEP_HORIZON_SECONDS`) survives without a
    /// heartbeat. Mirrors `Config::session_ttl`.
    info_ttl: Duration,
}

impl SessionTracker {
    pub fn new(kv: KvStore, info_ttl: Duration) -> Self {
        Self { kv, info_ttl }
    }

    pub fn mint_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn info_key(session_id: &str) -> String {
        format!("session:{session_id}:info")
    }

    /// On every read and every write: remove entries older than
    /// `now - 5min` from the given scope's sorted set.
    async fn sweep(&self, scope: &SessionScope) {
        let now = Utc::now().timestamp() as f64;
        let cutoff = now - SWEEP_HORIZON_SECONDS as f64;
        if let Err(e) = self
            .kv
            .zremrangebyscore(&scope.index_key(), f64::NEG_INFINITY, cutoff)
            .await
        {
            tracing::warn!(error = %e, "kv unavailable while sweeping session index");
        }
    }

    /// Records a heartbeat for `session_id` in all three scopes (global,
    /// per-key, per-provider) and stores/refreshes its info record.
    /// Heartbeat scores are monotonic: Utc::now() only moves forward.
    pub async fn heartbeat(
        &self,
        session_id: &str,
        key_id: Uuid,
        provider_id: Uuid,
        info: &SessionInfo,
    ) {
        let now = Utc::now().timestamp() as f64;
        for scope in [
            SessionScope::Global,
            SessionScope::Key(key_id),
            SessionScope::Provider(provider_id),
        ] {
            self.sweep(&scope).await;
            if let Err(e) = self.kv.zadd(&scope.index_key(), session_id, now).await {
                tracing::warn!(error = %e, "kv unavailable while recording session heartbeat");
            }
        }
        if let Ok(serialized) = serde_json::to_string(info) {
            let _ = self
                .kv
                .set_with_ttl(&Self::info_key(session_id), &serialized, self.info_ttl.as_secs())
                .await;
        }
    }

    pub async fn info(&self, session_id: &str) -> Option<SessionInfo> {
        let raw = self.kv.get(&Self::info_key(session_id)).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    /// Resolve the last provider used by `session_id`, if any, and if the
    /// session is still live under the global scope.
    pub async fn last_provider(&self, session_id: &str) -> Option<Uuid> {
        self.sweep(&SessionScope::Global).await;
        let still_live = self
            .kv
            .zscore(&SessionScope::Global.index_key(), session_id)
            .await
            .ok()
            .flatten()
            .is_some();
        if !still_live {
            return None;
        }
        self.info(session_id).await.and_then(|i| i.last_provider_id)
    }

    /// Count of active sessions in a scope, filtered to members whose
    /// companion info record still exists (stale members are purged).
    pub async fn count(&self, scope: SessionScope) -> u64 {
        self.sweep(&scope).await;
        let members = self
            .kv
            .zrange_by_score(&scope.index_key(), f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap_or_default();
        if members.is_empty() {
            return 0;
        }
        let info_keys: Vec<String> = members.iter().map(|m| Self::info_key(m)).collect();
        let exists = self.kv.exists_batch(&info_keys).await.unwrap_or_default();
        let mut live = 0u64;
        for (member, present) in members.iter().zip(exists.iter()) {
            if *present {
                live += 1;
            } else {
                let _ = self.kv.zrem(&scope.index_key(), member).await;
            }
        }
        live
    }

    pub async fn list(&self, scope: SessionScope) -> Vec<String> {
        self.sweep(&scope).await;
        self.kv
            .zrange_by_score(&scope.index_key(), f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionTracker::mint_session_id();
        let b = SessionTracker::mint_session_id();
        assert_ne!(a, b);
    }

    #[test]
    fn scope_index_keys_are_distinct() {
        let id = Uuid::new_v4();
        assert_ne!(
            SessionScope::Key(id).index_key(),
            SessionScope::Provider(id).index_key()
        );
        assert_ne!(SessionScope::Global.index_key(), SessionScope::Key(id).index_key());
    }
}
