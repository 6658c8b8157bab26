//! Row-mapping helpers for `Store`, kept in their own file so the CRUD
//! methods in `mod.rs` read as query + shape rather than query + parsing.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;

use crate::models::{CostBudgets, Key, MatchType, ModelPrice, PriceData, Provider, ProviderType, Role, SensitiveWord, User};

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_default()
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_decimal(s: Option<String>) -> Option<rust_decimal::Decimal> {
    s.and_then(|s| s.parse().ok())
}

pub fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let role_str: String = row.get(2)?;
    Ok(User {
        id: parse_uuid(row.get(0)?),
        name: row.get(1)?,
        role: if role_str == "admin" { Role::Admin } else { Role::User },
        rpm_limit: row.get(3)?,
        daily_quota_usd: parse_decimal(row.get(4)?),
        provider_group: row.get(5)?,
        enabled: row.get(6)?,
    })
}

pub fn key_from_row(row: &Row) -> rusqlite::Result<Key> {
    Ok(Key {
        id: parse_uuid(row.get(0)?),
        user_id: parse_uuid(row.get(1)?),
        secret: row.get(2)?,
        display_name: row.get(3)?,
        enabled: row.get(4)?,
        expires_at: row.get::<_, Option<String>>(5)?.map(|s| parse_rfc3339(&s)),
        budgets: CostBudgets {
            limit_5h_usd: parse_decimal(row.get(6)?),
            limit_weekly_usd: parse_decimal(row.get(7)?),
            limit_monthly_usd: parse_decimal(row.get(8)?),
        },
        concurrent_session_cap: row.get(9)?,
        web_login_capable: row.get(10)?,
        deleted_at: row.get::<_, Option<String>>(11)?.map(|s| parse_rfc3339(&s)),
    })
}

pub fn key_user_from_row(row: &Row) -> rusqlite::Result<(User, Key)> {
    let key = Key {
        id: parse_uuid(row.get(0)?),
        user_id: parse_uuid(row.get(1)?),
        secret: row.get(2)?,
        display_name: row.get(3)?,
        enabled: row.get(4)?,
        expires_at: row.get::<_, Option<String>>(5)?.map(|s| parse_rfc3339(&s)),
        budgets: CostBudgets {
            limit_5h_usd: parse_decimal(row.get(6)?),
            limit_weekly_usd: parse_decimal(row.get(7)?),
            limit_monthly_usd: parse_decimal(row.get(8)?),
        },
        concurrent_session_cap: row.get(9)?,
        web_login_capable: row.get(10)?,
        deleted_at: row.get::<_, Option<String>>(11)?.map(|s| parse_rfc3339(&s)),
    };
    let role_str: String = row.get(14)?;
    let user = User {
        id: parse_uuid(row.get(12)?),
        name: row.get(13)?,
        role: if role_str == "admin" { Role::Admin } else { Role::User },
        rpm_limit: row.get(15)?,
        daily_quota_usd: parse_decimal(row.get(16)?),
        provider_group: row.get(17)?,
        enabled: row.get(18)?,
    };
    Ok((user, key))
}

pub fn provider_from_row(row: &Row) -> rusqlite::Result<Provider> {
    let provider_type_str: String = row.get(4)?;
    let model_redirect: Option<String> = row.get(10)?;
    let allowed_models: Option<String> = row.get(11)?;
    Ok(Provider {
        id: parse_uuid(row.get(0)?),
        display_name: row.get(1)?,
        base_url: row.get(2)?,
        secret: row.get(3)?,
        provider_type: if provider_type_str == "codex" {
            ProviderType::Codex
        } else {
            ProviderType::Claude
        },
        enabled: row.get(5)?,
        priority: row.get(6)?,
        weight: row.get(7)?,
        cost_multiplier: parse_decimal(row.get(8)?),
        group_tag: row.get(9)?,
        model_redirect: model_redirect.and_then(|s| serde_json::from_str(&s).ok()),
        allowed_models: allowed_models.and_then(|s| serde_json::from_str(&s).ok()),
        budgets: CostBudgets {
            limit_5h_usd: parse_decimal(row.get(12)?),
            limit_weekly_usd: parse_decimal(row.get(13)?),
            limit_monthly_usd: parse_decimal(row.get(14)?),
        },
        concurrent_session_cap: row.get(15)?,
        deleted_at: row.get::<_, Option<String>>(16)?.map(|s| parse_rfc3339(&s)),
    })
}

pub fn model_price_from_row(row: &Row) -> rusqlite::Result<ModelPrice> {
    Ok(ModelPrice {
        model_name: row.get(0)?,
        price_data: PriceData {
            input_cost_per_token: parse_decimal(row.get(1)?).unwrap_or_default(),
            output_cost_per_token: parse_decimal(row.get(2)?).unwrap_or_default(),
            cache_create_cost_per_token: parse_decimal(row.get(3)?),
            cache_read_cost_per_token: parse_decimal(row.get(4)?),
        },
        observed_at: parse_rfc3339(&row.get::<_, String>(5)?),
    })
}

pub fn sensitive_word_from_row(row: &Row) -> rusqlite::Result<SensitiveWord> {
    let match_type_str: String = row.get(2)?;
    Ok(SensitiveWord {
        id: parse_uuid(row.get(0)?),
        term: row.get(1)?,
        match_type: match match_type_str.as_str() {
            "exact" => MatchType::Exact,
            "regex" => MatchType::Regex,
            _ => MatchType::Contains,
        },
        enabled: row.get(3)?,
    })
}
