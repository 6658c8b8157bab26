//! Shared fixtures for the multi-module scenario tests (§8). Providers
//! are built directly rather than through the relational store, since the
//! scenarios only exercise the selector/rate-limit/circuit/session layer.

use std::collections::HashMap;

use gateway::kv::KvStore;
use gateway::models::{CostBudgets, Provider, ProviderType};
use rust_decimal::Decimal;
use uuid::Uuid;

/// `tests/` have no local redis in every environment. Everything here
/// that exercises C1/C3/C4 (the KV-backed layers) gates on reachability
/// and skips rather than fails when there is none, the same tolerance
/// the gateway itself applies to a down KV store (fail-open, §5).
pub async fn connect_kv() -> Option<KvStore> {
    let url = std::env::var("GATEWAY_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let kv = KvStore::connect(&url).await.ok()?;
    if kv.ready().await {
        Some(kv)
    } else {
        None
    }
}

pub fn provider(
    display_name: &str,
    priority: u32,
    weight: u8,
    cost_multiplier: Option<Decimal>,
) -> Provider {
    Provider {
        id: Uuid::new_v4(),
        display_name: display_name.to_string(),
        base_url: "https://upstream.example".to_string(),
        secret: "sk-test".to_string(),
        provider_type: ProviderType::Claude,
        enabled: true,
        priority,
        weight,
        cost_multiplier,
        group_tag: None,
        model_redirect: None,
        allowed_models: None,
        budgets: CostBudgets {
            limit_5h_usd: None,
            limit_weekly_usd: None,
            limit_monthly_usd: None,
        },
        concurrent_session_cap: 0,
        deleted_at: None,
    }
}

pub fn provider_with_budgets(
    display_name: &str,
    priority: u32,
    weight: u8,
    budgets: CostBudgets,
) -> Provider {
    Provider {
        budgets,
        ..provider(display_name, priority, weight, None)
    }
}

pub fn provider_with_cap(display_name: &str, cap: u32) -> Provider {
    Provider {
        concurrent_session_cap: cap,
        ..provider(display_name, 0, 1, None)
    }
}

pub fn model_redirect(from: &str, to: &str) -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert(from.to_string(), to.to_string());
    m
}
