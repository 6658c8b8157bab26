//! Environment-driven configuration, in the manner of the teacher's
//! `Config::from_env()` — every recognized variable has a documented
//! default, unknown env is ignored.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite DSN (path) for the relational store.
    pub database_dsn: String,
    /// redis connection URL for the KV store.
    pub kv_url: String,
    /// Bearer token that resolves to the synthetic admin principal.
    pub admin_token: String,
    /// Feature flag: when false, C3's checks are bypassed entirely
    /// (not to be confused with fail-open, which only triggers when
    /// the KV store itself is unreachable).
    pub rate_limiting_enabled: bool,
    /// Feature flag: mark the admin session cookie `Secure`. Currently
    /// inert — no control-plane login endpoint issues a session cookie
    /// yet, only `authenticate_admin` reads one if a caller supplies it.
    /// Wire this into the `Set-Cookie` builder once that endpoint exists.
    pub secure_cookies: bool,
    /// TTL for a session's `SessionInfo` record (`SessionTracker::heartbeat`).
    pub session_ttl: Duration,
    pub log_level: String,
    /// Currently inert — day-boundary aggregations (leaderboard,
    /// per-user daily total) use UTC regardless of this value. Wire this
    /// in if those boundaries need to follow a configured local time.
    pub timezone: String,
    pub port: u16,
    /// When false, `Store::open` skips `CREATE TABLE` schema application,
    /// assuming the database already carries the current schema.
    pub auto_migrate: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_dsn: std::env::var("GATEWAY_DATABASE_DSN")
                .unwrap_or_else(|_| "gateway.db".to_string()),
            kv_url: std::env::var("GATEWAY_KV_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            admin_token: std::env::var("GATEWAY_ADMIN_TOKEN").unwrap_or_default(),
            rate_limiting_enabled: std::env::var("GATEWAY_RATE_LIMITING_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            secure_cookies: std::env::var("GATEWAY_SECURE_COOKIES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            session_ttl: Duration::from_secs(
                std::env::var("GATEWAY_SESSION_TTL_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            log_level: std::env::var("GATEWAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            timezone: std::env::var("GATEWAY_TIMEZONE")
                .unwrap_or_else(|_| "Asia/Shanghai".to_string()),
            port: std::env::var("GATEWAY_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(23000),
            auto_migrate: std::env::var("GATEWAY_AUTO_MIGRATE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }
}
