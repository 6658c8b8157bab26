//! E5 (cost cap tripped mid-window) and E6 (sensitive-word block) (§8).
//! E5 needs the KV-backed rate-limit service and skips without a
//! reachable store; E6 stays entirely in the relational store and the
//! filter, so it runs unconditionally.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gateway::circuit::CircuitBreakerRegistry;
use gateway::filter::SensitiveWordFilter;
use gateway::models::{CostBudgets, MatchType, ProviderType, SensitiveWord, UsageCounts};
use gateway::ratelimit::RateLimitService;
use gateway::selector::{ProviderSelector, SelectionInput};
use gateway::session::SessionTracker;
use gateway::store::Store;
use gateway::usage::{NewMessageRequest, UsageRecorder};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// E5 — provider A has `limit_5h_usd = 1.00`. Once tracked cost reaches
/// that cap, A is dropped at the cost-window filter and selection falls
/// through to B; the request that tripped the cap still attributes its
/// own cost to A.
#[tokio::test]
async fn cost_cap_trip_drops_provider_but_preserves_attribution() {
    let kv = match common::connect_kv().await {
        Some(kv) => kv,
        None => {
            eprintln!("skipping: no reachable redis at GATEWAY_TEST_REDIS_URL/default");
            return;
        }
    };

    let circuits = Arc::new(CircuitBreakerRegistry::new());
    let rate_limits = Arc::new(RateLimitService::new(kv.clone()));
    let sessions = Arc::new(SessionTracker::new(kv, Duration::from_secs(300)));
    let selector = ProviderSelector::new(circuits, Arc::clone(&rate_limits), sessions);

    let capped_budgets = CostBudgets {
        limit_5h_usd: Some(dec!(1.00)),
        limit_weekly_usd: None,
        limit_monthly_usd: None,
    };
    let provider_a = common::provider_with_budgets("A", 0, 1, capped_budgets);
    let provider_b = common::provider("B", 0, 1, None);

    let key_id = Uuid::new_v4();
    let excluded = HashSet::new();

    // First request: only A is offered, it is still within budget.
    let first = selector
        .select(SelectionInput {
            providers: &[provider_a.clone()],
            requested_model: "claude-3-opus",
            provider_type: ProviderType::Claude,
            provider_group: None,
            session_id: "e5-tripping-request",
            excluded: &excluded,
            attempt_number: 1,
        })
        .await
        .expect("A should still be admissible before the cap is reached");
    assert_eq!(first.provider.id, provider_a.id);

    // That request is the one that trips the cap — it is attributed to A
    // regardless of what happens to subsequent selections.
    rate_limits.track_cost(key_id, provider_a.id, dec!(1.00)).await;

    let store = Store::open_in_memory().unwrap();
    let recorder = UsageRecorder::new(&store);
    recorder
        .record(NewMessageRequest {
            user_id: Uuid::new_v4(),
            key_id,
            provider_id: Some(provider_a.id),
            observed_model: Some("claude-3-opus".to_string()),
            original_model: "claude-3-opus".to_string(),
            session_id: "e5-tripping-request".to_string(),
            http_status: 200,
            duration_ms: 120,
            usage: UsageCounts::default(),
            cost_usd: dec!(1.00),
            applied_multiplier: Decimal::ONE,
            decision_chain: vec![],
            block_reason: None,
            error_message: None,
            user_agent: None,
            message_count: 1,
        })
        .unwrap();

    let agg = store
        .session_aggregate("e5-tripping-request")
        .unwrap()
        .expect("the tripping request's usage record must exist");
    assert_eq!(agg.distinct_providers, 1);
    assert_eq!(agg.total_cost_usd, 1.0);

    // Second request, same 5h window: A must now be dropped at the
    // cost-window filter and B chosen instead.
    let second = selector
        .select(SelectionInput {
            providers: &[provider_a.clone(), provider_b.clone()],
            requested_model: "claude-3-opus",
            provider_type: ProviderType::Claude,
            provider_group: None,
            session_id: "e5-followup-request",
            excluded: &excluded,
            attempt_number: 1,
        })
        .await
        .expect("B should remain admissible once A is cost-capped");
    assert_eq!(second.provider.id, provider_b.id);
}

/// E6 — a payload containing a contains-mode sensitive term never
/// reaches a provider: it is blocked before selection, recorded with a
/// null provider, zero cost, and an empty decision chain.
#[test]
fn sensitive_word_block_records_with_no_provider_and_zero_cost() {
    let banned = SensitiveWord {
        id: Uuid::new_v4(),
        term: "forbidden-phrase".to_string(),
        match_type: MatchType::Contains,
        enabled: true,
    };
    let filter = SensitiveWordFilter::compile(&[banned]).unwrap();

    let fragments = vec![
        "system prompt is fine".to_string(),
        "please discuss the forbidden-phrase in detail".to_string(),
    ];
    let detection = filter
        .scan_fragments(fragments.iter().map(|s| s.as_str()))
        .expect("the second fragment should trip the filter");
    assert_eq!(detection.match_type, MatchType::Contains);

    let store = Store::open_in_memory().unwrap();
    let recorder = UsageRecorder::new(&store);
    let user_id = Uuid::new_v4();
    let key_id = Uuid::new_v4();
    recorder
        .record(NewMessageRequest {
            user_id,
            key_id,
            provider_id: None,
            observed_model: None,
            original_model: "claude-3-opus".to_string(),
            session_id: "e6-blocked-request".to_string(),
            http_status: 400,
            duration_ms: 2,
            usage: UsageCounts::default(),
            cost_usd: Decimal::ZERO,
            applied_multiplier: Decimal::ONE,
            decision_chain: vec![],
            block_reason: Some(detection.word.clone()),
            error_message: None,
            user_agent: None,
            message_count: 1,
        })
        .unwrap();

    let agg = store
        .session_aggregate("e6-blocked-request")
        .unwrap()
        .expect("blocked request is still recorded");
    assert_eq!(agg.distinct_providers, 0);
    assert_eq!(agg.total_cost_usd, 0.0);
}
