//! Upstream provider adapters — generalizes the teacher's `LLMAdapter`
//! trait (`keyvault-package/src/adapters/mod.rs`) from a full
//! generate/list-models/health-check surface down to the one thing this
//! gateway's non-goals leave it responsible for: attaching the right
//! authentication for a provider's dialect before a request is relayed
//! byte-for-byte. Content transformation between dialects beyond
//! model-name remapping is explicitly out of scope (spec.md §1).

use reqwest::RequestBuilder;

use crate::models::Provider;

pub mod claude;
pub mod codex;

pub trait DialectAdapter: Send + Sync {
    /// Attach this provider's auth scheme to an already-built request
    /// targeting `provider.base_url` + the client's chosen path.
    fn authenticate(&self, builder: RequestBuilder, provider: &Provider) -> RequestBuilder;

    /// Whether an HTTP status from this dialect's upstream should be
    /// treated as a provider misconfiguration (counts against the
    /// breaker the same as a transport failure) rather than passed
    /// through to the client.
    fn is_retryable_status(&self, status: u16) -> bool {
        matches!(status, 408 | 429) || (500..600).contains(&status)
    }
}

pub fn adapter_for(provider_type: crate::models::ProviderType) -> Box<dyn DialectAdapter> {
    match provider_type {
        crate::models::ProviderType::Claude => Box::new(claude::ClaudeAdapter),
        crate::models::ProviderType::Codex => Box::new(codex::CodexAdapter),
    }
}
