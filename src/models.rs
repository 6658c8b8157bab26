//! Domain types (§3). Plain structs with serde derives, the same
//! convention the teacher uses for every record in `vault/store.rs` and
//! `adapters/mod.rs`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub rpm_limit: Option<u32>,
    pub daily_quota_usd: Option<Decimal>,
    pub provider_group: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostBudgets {
    pub limit_5h_usd: Option<Decimal>,
    pub limit_weekly_usd: Option<Decimal>,
    pub limit_monthly_usd: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Opaque secret. Never logged, never serialized back to clients.
    #[serde(skip_serializing)]
    pub secret: String,
    pub display_name: String,
    pub enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub budgets: CostBudgets,
    pub concurrent_session_cap: u32,
    pub web_login_capable: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Key {
    pub fn is_active(&self) -> bool {
        self.enabled
            && self.deleted_at.is_none()
            && self.expires_at.map(|e| e > Utc::now()).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Claude,
    Codex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub display_name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub priority: u32,
    pub weight: u8,
    pub cost_multiplier: Option<Decimal>,
    pub group_tag: Option<String>,
    /// source model name -> target model name
    pub model_redirect: Option<std::collections::HashMap<String, String>>,
    pub allowed_models: Option<Vec<String>>,
    pub budgets: CostBudgets,
    pub concurrent_session_cap: u32,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Provider {
    pub fn is_live(&self) -> bool {
        self.enabled && self.deleted_at.is_none()
    }

    /// §9 Open Question 1: a multiplier only skips the cost check when
    /// explicitly configured to exactly zero; absence defaults to 1.0.
    pub fn effective_multiplier(&self) -> Decimal {
        self.cost_multiplier.unwrap_or(Decimal::ONE)
    }

    pub fn skips_cost_check(&self) -> bool {
        self.cost_multiplier == Some(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PriceData {
    pub input_cost_per_token: Decimal,
    pub output_cost_per_token: Decimal,
    pub cache_create_cost_per_token: Option<Decimal>,
    pub cache_read_cost_per_token: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPrice {
    pub model_name: String,
    pub price_data: PriceData,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
}

/// One attempt in a request's decision chain. A sum type (REDESIGN FLAGS
/// §9): each reason carries exactly the fields relevant to it, instead of
/// one struct with a pile of optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DecisionAttempt {
    SessionReuse {
        provider_id: Uuid,
        provider_name: String,
        attempt_number: u32,
        timestamp: DateTime<Utc>,
    },
    InitialSelection {
        provider_id: Uuid,
        provider_name: String,
        selection_method: String,
        priority: u32,
        weight: u8,
        cost_multiplier: Decimal,
        circuit_state: String,
        attempt_number: u32,
        timestamp: DateTime<Utc>,
        decision_context: DecisionContext,
    },
    ConcurrentLimitFailed {
        provider_id: Uuid,
        provider_name: String,
        attempt_number: u32,
        timestamp: DateTime<Utc>,
    },
    RetrySuccess {
        provider_id: Uuid,
        provider_name: String,
        priority: u32,
        weight: u8,
        cost_multiplier: Decimal,
        attempt_number: u32,
        timestamp: DateTime<Utc>,
    },
    RetryFailed {
        provider_id: Uuid,
        provider_name: String,
        attempt_number: u32,
        timestamp: DateTime<Utc>,
        error_message: String,
    },
}

impl DecisionAttempt {
    pub fn attempt_number(&self) -> u32 {
        match self {
            DecisionAttempt::SessionReuse { attempt_number, .. }
            | DecisionAttempt::InitialSelection { attempt_number, .. }
            | DecisionAttempt::ConcurrentLimitFailed { attempt_number, .. }
            | DecisionAttempt::RetrySuccess { attempt_number, .. }
            | DecisionAttempt::RetryFailed { attempt_number, .. } => *attempt_number,
        }
    }

    pub fn provider_id(&self) -> Uuid {
        match self {
            DecisionAttempt::SessionReuse { provider_id, .. }
            | DecisionAttempt::InitialSelection { provider_id, .. }
            | DecisionAttempt::ConcurrentLimitFailed { provider_id, .. }
            | DecisionAttempt::RetrySuccess { provider_id, .. }
            | DecisionAttempt::RetryFailed { provider_id, .. } => *provider_id,
        }
    }
}

/// The selector's view at one attempt: pool sizes through each filter,
/// the chosen priority layer, candidates considered with probabilities,
/// and anything dropped along the way with a reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionContext {
    pub pool_before: usize,
    pub pool_after_type_filter: usize,
    pub pool_after_group_filter: usize,
    pub group_fallback: bool,
    pub pool_after_health_filter: usize,
    pub pool_after_cost_filter: usize,
    pub pool_after_exclusion_filter: usize,
    pub selected_priority: Option<u32>,
    pub candidates: Vec<CandidateProbability>,
    pub filtered: Vec<FilteredProvider>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProbability {
    pub provider_id: Uuid,
    pub weight: u8,
    pub cost_multiplier: Decimal,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredProvider {
    pub provider_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub id: Uuid,
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
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Contains,
    Exact,
    Regex,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Contains => "contains",
            MatchType::Exact => "exact",
            MatchType::Regex => "regex",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitiveWord {
    pub id: Uuid,
    pub term: String,
    pub match_type: MatchType,
    pub enabled: bool,
}

pub const COST_WINDOWS: [&str; 3] = ["5h", "weekly", "monthly"];
