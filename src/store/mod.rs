//! Relational store — generalizes the teacher's `KeyStore` (`vault/store.rs`)
//! from a single encrypted-key table into the full data model of users,
//! keys, providers, price history, sensitive words, and message requests.
//! Same shape: a `Mutex<rusqlite::Connection>`, WAL mode, synchronous
//! methods called directly from request handlers (the teacher never
//! reaches for `spawn_blocking` either — SQLite calls are short and the
//! lock is held only for the duration of one statement).

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Key, MessageRequest, ModelPrice, Provider, ProviderType, Role, SensitiveWord, User};

mod rows;
use rows::*;

pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Opens the on-disk store. `auto_migrate` mirrors `Config::auto_migrate`
    /// (§6): when false, schema application is skipped and the database is
    /// expected to already carry the current schema (applied out-of-band,
    /// e.g. by deployment tooling ahead of a multi-instance rollout).
    pub fn open(db_path: &Path, auto_migrate: bool) -> anyhow::Result<Self> {
        let db = Connection::open(db_path)?;
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.pragma_update(None, "foreign_keys", "ON")?;
        if auto_migrate {
            db.execute_batch(SCHEMA)?;
        }
        Ok(Self { db: Mutex::new(db) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    // ── Users ────────────────────────────────────────────────────────

    pub fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, name, role, rpm_limit, daily_quota_usd, provider_group, enabled
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_user(&self, user: &User) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO users (id, name, role, rpm_limit, daily_quota_usd, provider_group, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id.to_string(),
                user.name,
                role_to_str(user.role),
                user.rpm_limit,
                user.daily_quota_usd.map(|d| d.to_string()),
                user.provider_group,
                user.enabled,
            ],
        )?;
        Ok(())
    }

    // ── Keys ─────────────────────────────────────────────────────────

    /// Resolves an opaque secret to its raw `(User, Key)` pair regardless
    /// of lifecycle state — callers distinguish "no such key" (401) from
    /// "key exists but is disabled/expired" (403) (§4.11, §6).
    pub fn resolve_key_raw(&self, secret: &str) -> anyhow::Result<Option<(User, Key)>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT k.id, k.user_id, k.secret, k.display_name, k.enabled, k.expires_at,
                        k.limit_5h_usd, k.limit_weekly_usd, k.limit_monthly_usd,
                        k.concurrent_session_cap, k.web_login_capable, k.deleted_at,
                        u.id, u.name, u.role, u.rpm_limit, u.daily_quota_usd, u.provider_group, u.enabled
                 FROM keys k JOIN users u ON u.id = k.user_id
                 WHERE k.secret = ?1",
                params![secret],
                key_user_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Resolves an opaque secret to its `(User, Key)` pair iff the key is
    /// active and its owning user is enabled (§4.11).
    pub fn resolve_key(&self, secret: &str) -> anyhow::Result<Option<(User, Key)>> {
        Ok(self
            .resolve_key_raw(secret)?
            .filter(|(user, key)| key.is_active() && user.enabled))
    }

    pub fn get_key(&self, id: Uuid) -> anyhow::Result<Option<Key>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT id, user_id, secret, display_name, enabled, expires_at,
                        limit_5h_usd, limit_weekly_usd, limit_monthly_usd,
                        concurrent_session_cap, web_login_capable, deleted_at
                 FROM keys WHERE id = ?1",
                params![id.to_string()],
                key_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_key(&self, key: &Key) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO keys
             (id, user_id, secret, display_name, enabled, expires_at,
              limit_5h_usd, limit_weekly_usd, limit_monthly_usd,
              concurrent_session_cap, web_login_capable, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                key.id.to_string(),
                key.user_id.to_string(),
                key.secret,
                key.display_name,
                key.enabled,
                key.expires_at.map(|t| t.to_rfc3339()),
                key.budgets.limit_5h_usd.map(|d| d.to_string()),
                key.budgets.limit_weekly_usd.map(|d| d.to_string()),
                key.budgets.limit_monthly_usd.map(|d| d.to_string()),
                key.concurrent_session_cap,
                key.web_login_capable,
                key.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    // ── Providers ────────────────────────────────────────────────────

    pub fn list_enabled_providers(&self, provider_type: ProviderType) -> anyhow::Result<Vec<Provider>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, display_name, base_url, secret, provider_type, enabled, priority, weight,
                    cost_multiplier, group_tag, model_redirect, allowed_models,
                    limit_5h_usd, limit_weekly_usd, limit_monthly_usd,
                    concurrent_session_cap, deleted_at
             FROM providers WHERE provider_type = ?1 AND enabled = 1 AND deleted_at IS NULL",
        )?;
        let rows = stmt
            .query_map(params![provider_type_to_str(provider_type)], provider_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_provider(&self, provider: &Provider) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO providers
             (id, display_name, base_url, secret, provider_type, enabled, priority, weight,
              cost_multiplier, group_tag, model_redirect, allowed_models,
              limit_5h_usd, limit_weekly_usd, limit_monthly_usd, concurrent_session_cap, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                provider.id.to_string(),
                provider.display_name,
                provider.base_url,
                provider.secret,
                provider_type_to_str(provider.provider_type),
                provider.enabled,
                provider.priority,
                provider.weight,
                provider.cost_multiplier.map(|d| d.to_string()),
                provider.group_tag,
                provider
                    .model_redirect
                    .as_ref()
                    .map(|m| serde_json::to_string(m).unwrap()),
                provider
                    .allowed_models
                    .as_ref()
                    .map(|m| serde_json::to_string(m).unwrap()),
                provider.budgets.limit_5h_usd.map(|d| d.to_string()),
                provider.budgets.limit_weekly_usd.map(|d| d.to_string()),
                provider.budgets.limit_monthly_usd.map(|d| d.to_string()),
                provider.concurrent_session_cap,
                provider.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    // ── Model prices ─────────────────────────────────────────────────

    /// Append a new observation. The history is append-only; "latest" is
    /// always computed by `observed_at`.
    pub fn append_price(&self, price: &ModelPrice) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO model_prices
             (model_name, input_cost_per_token, output_cost_per_token,
              cache_create_cost_per_token, cache_read_cost_per_token, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                price.model_name,
                price.price_data.input_cost_per_token.to_string(),
                price.price_data.output_cost_per_token.to_string(),
                price.price_data.cache_create_cost_per_token.map(|d| d.to_string()),
                price.price_data.cache_read_cost_per_token.map(|d| d.to_string()),
                price.observed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_prices(&self) -> anyhow::Result<Vec<ModelPrice>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT model_name, input_cost_per_token, output_cost_per_token,
                    cache_create_cost_per_token, cache_read_cost_per_token, observed_at
             FROM model_prices mp
             WHERE observed_at = (
                 SELECT MAX(observed_at) FROM model_prices WHERE model_name = mp.model_name
             )",
        )?;
        let rows = stmt
            .query_map([], model_price_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Sensitive words ──────────────────────────────────────────────

    pub fn list_sensitive_words(&self) -> anyhow::Result<Vec<SensitiveWord>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT id, term, match_type, enabled FROM sensitive_words")?;
        let rows = stmt
            .query_map([], sensitive_word_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Message requests (usage records, C10) ───────────────────────

    pub fn insert_message_request(&self, req: &MessageRequest) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_requests
             (id, user_id, key_id, provider_id, observed_model, original_model, session_id,
              http_status, duration_ms, input_tokens, output_tokens, cache_create_tokens,
              cache_read_tokens, cost_usd, applied_multiplier, decision_chain, block_reason,
              error_message, user_agent, message_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            params![
                req.id.to_string(),
                req.user_id.to_string(),
                req.key_id.to_string(),
                req.provider_id.map(|p| p.to_string()),
                req.observed_model,
                req.original_model,
                req.session_id,
                req.http_status,
                req.duration_ms,
                req.usage.input_tokens,
                req.usage.output_tokens,
                req.usage.cache_create_tokens,
                req.usage.cache_read_tokens,
                req.cost_usd.to_string(),
                req.applied_multiplier.to_string(),
                serde_json::to_string(&req.decision_chain)?,
                req.block_reason,
                req.error_message,
                req.user_agent,
                req.message_count,
                req.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Per-session aggregate: totals of tokens/cost/duration, distinct
    /// providers, distinct models. Returns `None` when no rows exist for
    /// the session id (§4.10).
    pub fn session_aggregate(&self, session_id: &str) -> anyhow::Result<Option<SessionAggregate>> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(input_tokens),0), COALESCE(SUM(output_tokens),0),
                        COALESCE(SUM(cache_create_tokens),0), COALESCE(SUM(cache_read_tokens),0),
                        COALESCE(SUM(CAST(cost_usd AS REAL)),0.0), COALESCE(SUM(duration_ms),0),
                        COUNT(DISTINCT provider_id), COUNT(DISTINCT observed_model)
                 FROM message_requests WHERE session_id = ?1",
                params![session_id],
                |row| {
                    let count: i64 = row.get(0)?;
                    Ok((count, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?, row.get::<_, f64>(5)?, row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?, row.get::<_, i64>(8)?))
                },
            )
            .optional()?;
        Ok(row.and_then(|(count, input, output, cache_create, cache_read, cost, duration, providers, models)| {
            if count == 0 {
                None
            } else {
                Some(SessionAggregate {
                    request_count: count as u64,
                    input_tokens: input as u64,
                    output_tokens: output as u64,
                    cache_create_tokens: cache_create as u64,
                    cache_read_tokens: cache_read as u64,
                    total_cost_usd: cost,
                    total_duration_ms: duration as u64,
                    distinct_providers: providers as u64,
                    distinct_models: models as u64,
                })
            }
        }))
    }

    /// Per-user daily roll-up (today, in the gateway's configured
    /// timezone-agnostic UTC day boundary).
    pub fn user_daily_total(&self, user_id: Uuid) -> anyhow::Result<Decimal> {
        let db = self.db.lock().unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let total: Option<String> = db
            .query_row(
                "SELECT SUM(CAST(cost_usd AS REAL)) FROM message_requests
                 WHERE user_id = ?1 AND created_at >= ?2",
                params![user_id.to_string(), format!("{today}T00:00:00+00:00")],
                |row| row.get::<_, Option<f64>>(0).map(|v| v.map(|v| v.to_string())),
            )
            .optional()?
            .flatten();
        Ok(total.and_then(|s| s.parse().ok()).unwrap_or(Decimal::ZERO))
    }

    /// Per-provider today's totals plus last-call snapshot.
    pub fn provider_today_snapshot(&self, provider_id: Uuid) -> anyhow::Result<ProviderSnapshot> {
        let db = self.db.lock().unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let (count, cost): (i64, f64) = db.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CAST(cost_usd AS REAL)),0.0) FROM message_requests
             WHERE provider_id = ?1 AND created_at >= ?2",
            params![provider_id.to_string(), format!("{today}T00:00:00+00:00")],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let last_call: Option<DateTime<Utc>> = db
            .query_row(
                "SELECT created_at FROM message_requests WHERE provider_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![provider_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Ok(ProviderSnapshot {
            requests_today: count as u64,
            cost_today_usd: cost,
            last_call_at: last_call,
        })
    }

    /// Per-user spend ranking for today, highest spender first, for the
    /// admin leaderboard view (§6).
    pub fn leaderboard_today(&self, limit: u32) -> anyhow::Result<Vec<LeaderboardEntry>> {
        let db = self.db.lock().unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut stmt = db.prepare(
            "SELECT u.id, u.name, COUNT(*), COALESCE(SUM(CAST(m.cost_usd AS REAL)),0.0)
             FROM message_requests m JOIN users u ON u.id = m.user_id
             WHERE m.created_at >= ?1
             GROUP BY u.id, u.name
             ORDER BY SUM(CAST(m.cost_usd AS REAL)) DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![format!("{today}T00:00:00+00:00"), limit], |row| {
                Ok(LeaderboardEntry {
                    user_id: Uuid::parse_str(&row.get::<_, String>(0)?)
                        .unwrap_or_else(|_| Uuid::nil()),
                    user_name: row.get(1)?,
                    request_count: row.get::<_, i64>(2)? as u64,
                    total_cost_usd: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

pub struct SessionAggregate {
    pub request_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
    pub distinct_providers: u64,
    pub distinct_models: u64,
}

pub struct ProviderSnapshot {
    pub requests_today: u64,
    pub cost_today_usd: f64,
    pub last_call_at: Option<DateTime<Utc>>,
}

pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub user_name: String,
    pub request_count: u64,
    pub total_cost_usd: f64,
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::User => "user",
    }
}

fn provider_type_to_str(pt: ProviderType) -> &'static str {
    match pt {
        ProviderType::Claude => "claude",
        ProviderType::Codex => "codex",
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    rpm_limit INTEGER,
    daily_quota_usd TEXT,
    provider_group TEXT,
    enabled BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS keys (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    secret TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT 1,
    expires_at TEXT,
    limit_5h_usd TEXT,
    limit_weekly_usd TEXT,
    limit_monthly_usd TEXT,
    concurrent_session_cap INTEGER NOT NULL DEFAULT 0,
    web_login_capable BOOLEAN NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS providers (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    base_url TEXT NOT NULL,
    secret TEXT NOT NULL,
    provider_type TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 0,
    weight INTEGER NOT NULL DEFAULT 1,
    cost_multiplier TEXT,
    group_tag TEXT,
    model_redirect TEXT,
    allowed_models TEXT,
    limit_5h_usd TEXT,
    limit_weekly_usd TEXT,
    limit_monthly_usd TEXT,
    concurrent_session_cap INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS model_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    model_name TEXT NOT NULL,
    input_cost_per_token TEXT NOT NULL,
    output_cost_per_token TEXT NOT NULL,
    cache_create_cost_per_token TEXT,
    cache_read_cost_per_token TEXT,
    observed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sensitive_words (
    id TEXT PRIMARY KEY,
    term TEXT NOT NULL,
    match_type TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS message_requests (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    key_id TEXT NOT NULL,
    provider_id TEXT,
    observed_model TEXT,
    original_model TEXT NOT NULL,
    session_id TEXT NOT NULL,
    http_status INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cache_create_tokens INTEGER NOT NULL DEFAULT 0,
    cache_read_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd TEXT NOT NULL,
    applied_multiplier TEXT NOT NULL,
    decision_chain TEXT NOT NULL,
    block_reason TEXT,
    error_message TEXT,
    user_agent TEXT,
    message_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_message_requests_session ON message_requests(session_id);
CREATE INDEX IF NOT EXISTS idx_message_requests_user ON message_requests(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_message_requests_provider ON message_requests(provider_id, created_at);
CREATE INDEX IF NOT EXISTS idx_model_prices_name ON model_prices(model_name, observed_at);
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CostBudgets, UsageCounts};

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            name: "alice".to_string(),
            role: Role::User,
            rpm_limit: None,
            daily_quota_usd: None,
            provider_group: None,
            enabled: true,
        }
    }

    #[test]
    fn resolve_key_requires_active_key_and_enabled_user() {
        let store = Store::open_in_memory().unwrap();
        let user = sample_user();
        store.insert_user(&user).unwrap();
        let key = Key {
            id: Uuid::new_v4(),
            user_id: user.id,
            secret: "sk-test-123".to_string(),
            display_name: "default".to_string(),
            enabled: true,
            expires_at: None,
            budgets: CostBudgets {
                limit_5h_usd: None,
                limit_weekly_usd: None,
                limit_monthly_usd: None,
            },
            concurrent_session_cap: 5,
            web_login_capable: false,
            deleted_at: None,
        };
        store.insert_key(&key).unwrap();

        let resolved = store.resolve_key("sk-test-123").unwrap();
        assert!(resolved.is_some());

        let missing = store.resolve_key("sk-does-not-exist").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn data_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.db");
        let user = sample_user();
        {
            let store = Store::open(&path, true).unwrap();
            store.insert_user(&user).unwrap();
        }
        let store = Store::open(&path, true).unwrap();
        let reloaded = store.get_user(user.id).unwrap().expect("user persists across reopen");
        assert_eq!(reloaded.name, user.name);
    }

    #[test]
    fn auto_migrate_false_skips_schema_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.db");
        let store = Store::open(&path, false).unwrap();
        assert!(store.get_user(Uuid::new_v4()).is_err());
    }

    #[test]
    fn session_aggregate_is_none_for_unknown_session() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.session_aggregate("nonexistent").unwrap().is_none());
    }

    #[test]
    fn session_aggregate_sums_across_rows() {
        let store = Store::open_in_memory().unwrap();
        let user = sample_user();
        store.insert_user(&user).unwrap();
        let key_id = Uuid::new_v4();
        for i in 0..2u64 {
            let req = MessageRequest {
                id: Uuid::new_v4(),
                user_id: user.id,
                key_id,
                provider_id: Some(Uuid::new_v4()),
                observed_model: Some("claude-3".to_string()),
                original_model: "claude-3".to_string(),
                session_id: "sess-1".to_string(),
                http_status: 200,
                duration_ms: 100 + i,
                usage: UsageCounts {
                    input_tokens: 10,
                    output_tokens: 20,
                    cache_create_tokens: 0,
                    cache_read_tokens: 0,
                },
                cost_usd: Decimal::new(5, 1),
                applied_multiplier: Decimal::ONE,
                decision_chain: vec![],
                block_reason: None,
                error_message: None,
                user_agent: None,
                message_count: 1,
                created_at: Utc::now(),
            };
            store.insert_message_request(&req).unwrap();
        }
        let agg = store.session_aggregate("sess-1").unwrap().unwrap();
        assert_eq!(agg.request_count, 2);
        assert_eq!(agg.input_tokens, 20);
        assert_eq!(agg.output_tokens, 40);
    }
}
