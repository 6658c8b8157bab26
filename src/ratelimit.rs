//! Rate-limit service (C3) — cost windows and atomic provider
//! concurrency, backed by the KV store. Replaces the teacher's in-memory
//! `RateTracker` (a single-process approximation) with the KV-backed
//! equivalent the spec actually requires: state visible across tasks
//! and processes.

use chrono::Utc;
use redis::Script;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::kv::KvStore;
use crate::models::CostBudgets;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Key,
    Provider,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Scope::Key => "key",
            Scope::Provider => "provider",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    FiveHour,
    Weekly,
    Monthly,
}

impl Window {
    fn as_str(&self) -> &'static str {
        match self {
            Window::FiveHour => "5h",
            Window::Weekly => "weekly",
            Window::Monthly => "monthly",
        }
    }

    fn ttl_seconds(&self) -> u64 {
        match self {
            Window::FiveHour => 5 * 3600,
            Window::Weekly => 7 * 24 * 3600,
            Window::Monthly => 31 * 24 * 3600,
        }
    }

    pub const ALL: [Window; 3] = [Window::FiveHour, Window::Weekly, Window::Monthly];
}

fn cost_window_key(scope: Scope, id: Uuid, window: Window) -> String {
    format!("cost:{}:{}:{}", scope.as_str(), id, window.as_str())
}

/// Distinct from `SessionScope::Provider`'s `sessions:provider:{id}` index
/// in `session.rs` — that one tracks *served* sessions for heartbeat/count
/// purposes, this one is the atomic concurrency gate's working set, and
/// the two must never collide on the same key.
fn active_sessions_key(provider_id: Uuid) -> String {
    format!("concurrency:provider:{provider_id}")
}

/// The atomic check-and-track primitive (§4.3, §9). A single evaluation
/// performs the expire sweep, membership check, cardinality read, gate,
/// and upsert — running these as five separate KV round trips is
/// specifically incorrect under concurrent load.
///
/// KEYS[1] = provider's active-session sorted set
/// ARGV[1] = now (seconds, float)
/// ARGV[2] = session id
/// ARGV[3] = cap (0 means unlimited)
/// ARGV[4] = sweep horizon in seconds (now - horizon is the expiry cutoff)
/// ARGV[5] = ttl to refresh the whole set's expiry to
///
/// Returns {allowed (0/1), count_after, tracked (0/1)}.
const CHECK_AND_TRACK_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local session_id = ARGV[2]
local cap = tonumber(ARGV[3])
local horizon = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - horizon)

local already_tracked = redis.call('ZSCORE', key, session_id)
local count = redis.call('ZCARD', key)

if cap > 0 and already_tracked == false and count >= cap then
    return {0, count, 0}
end

redis.call('ZADD', key, now, session_id)
redis.call('EXPIRE', key, ttl)

if already_tracked == false then
    count = count + 1
end

local tracked = 1
if already_tracked == false then
    tracked = 0
end

return {1, count, tracked}
"#;

pub struct RateLimitService {
    kv: KvStore,
    script: Script,
    /// Mirrors `Config::rate_limiting_enabled` (§6) — when false, cost and
    /// concurrency checks are bypassed entirely. Distinct from fail-open,
    /// which only triggers when the KV store itself is unreachable.
    enabled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyResult {
    pub allowed: bool,
    pub count_after: u64,
    pub was_already_tracked: bool,
}

impl RateLimitService {
    pub fn new(kv: KvStore) -> Self {
        Self::with_rate_limiting(kv, true)
    }

    pub fn with_rate_limiting(kv: KvStore, enabled: bool) -> Self {
        Self {
            kv,
            script: Script::new(CHECK_AND_TRACK_SCRIPT),
            enabled,
        }
    }

    /// On check, if the KV adapter is down, this returns "allowed"
    /// (fail-open) rather than erroring. On track, callers should log a
    /// warning and move on — never block the response on this.
    pub async fn cost_window_allowed(
        &self,
        scope: Scope,
        id: Uuid,
        window: Window,
        cap: Option<Decimal>,
    ) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(cap) = cap else { return true };
        let key = cost_window_key(scope, id, window);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => {
                let current: Decimal = raw.parse().unwrap_or(Decimal::ZERO);
                current < cap
            }
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, %key, "kv unavailable for cost-window check, failing open");
                true
            }
        }
    }

    /// §4.5's pure cost is attributed to both the key and the provider
    /// across all three windows — six increments in one pipeline.
    pub async fn track_cost(&self, key_id: Uuid, provider_id: Uuid, delta: Decimal) {
        let delta_f64: f64 = delta.to_f64().unwrap_or(0.0);
        let mut ops = Vec::with_capacity(6);
        for window in Window::ALL {
            ops.push((
                cost_window_key(Scope::Key, key_id, window),
                delta_f64,
                window.ttl_seconds(),
            ));
            ops.push((
                cost_window_key(Scope::Provider, provider_id, window),
                delta_f64,
                window.ttl_seconds(),
            ));
        }
        if let Err(e) = self.kv.pipeline_incr_with_ttl(&ops).await {
            warn!(error = %e, %key_id, %provider_id, "kv unavailable while tracking cost, dropping increment");
        }
    }

    /// Drops a provider whose *any* window is already at or above cap —
    /// "would be exceeded by even a zero-cost increment" (§4.8 step 5).
    pub async fn provider_within_cost_windows(&self, provider_id: Uuid, budgets: CostBudgets) -> bool {
        let checks = [
            (Window::FiveHour, budgets.limit_5h_usd),
            (Window::Weekly, budgets.limit_weekly_usd),
            (Window::Monthly, budgets.limit_monthly_usd),
        ];
        for (window, cap) in checks {
            if !self
                .cost_window_allowed(Scope::Provider, provider_id, window, cap)
                .await
            {
                return false;
            }
        }
        true
    }

    pub async fn key_within_cost_windows(&self, key_id: Uuid, budgets: CostBudgets) -> bool {
        let checks = [
            (Window::FiveHour, budgets.limit_5h_usd),
            (Window::Weekly, budgets.limit_weekly_usd),
            (Window::Monthly, budgets.limit_monthly_usd),
        ];
        for (window, cap) in checks {
            if !self
                .cost_window_allowed(Scope::Key, key_id, window, cap)
                .await
            {
                return false;
            }
        }
        true
    }

    /// Atomic check-and-track over the provider's active-session set.
    /// Fail-open: if the KV store is unreachable, the request is
    /// permitted and a warning is logged.
    pub async fn check_and_track_concurrency(
        &self,
        provider_id: Uuid,
        session_id: &str,
        cap: u32,
    ) -> ConcurrencyResult {
        if !self.enabled {
            return ConcurrencyResult {
                allowed: true,
                count_after: 0,
                was_already_tracked: false,
            };
        }
        let key = active_sessions_key(provider_id);
        let now = Utc::now().timestamp() as f64;
        let args = vec![
            now.to_string(),
            session_id.to_string(),
            cap.to_string(),
            (5 * 60).to_string(),
            (10 * 60).to_string(),
        ];
        match self.kv.eval_script(&self.script, &[&key], &args).await {
            Ok(raw) if raw.len() == 3 => {
                let allowed = raw[0] == 1;
                let count_after = raw[1].max(0) as u64;
                let was_already_tracked = raw[2] == 1;
                ConcurrencyResult {
                    allowed,
                    count_after,
                    was_already_tracked,
                }
            }
            Ok(_) => {
                warn!(%provider_id, "unexpected check-and-track script reply shape, failing open");
                ConcurrencyResult {
                    allowed: true,
                    count_after: 0,
                    was_already_tracked: false,
                }
            }
            Err(e) => {
                warn!(error = %e, %provider_id, "kv unavailable for concurrency check, failing open");
                ConcurrencyResult {
                    allowed: true,
                    count_after: 0,
                    was_already_tracked: false,
                }
            }
        }
    }

    /// Undoes a speculative reservation made by `check_and_track_concurrency`
    /// for a provider that survived filtering but wasn't the one ultimately
    /// chosen — otherwise every candidate considered during selection, not
    /// just the one actually used, counts against its own concurrency cap.
    pub async fn release_concurrency(&self, provider_id: Uuid, session_id: &str) {
        if !self.enabled {
            return;
        }
        let key = active_sessions_key(provider_id);
        if let Err(e) = self.kv.zrem(&key, session_id).await {
            warn!(error = %e, %provider_id, "kv unavailable while releasing concurrency reservation");
        }
    }
}
