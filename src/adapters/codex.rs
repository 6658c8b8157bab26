//! Codex (OpenAI-style) dialect — bearer-token auth, the same shape the
//! teacher's `OpenAIAdapter::generate` uses in
//! `keyvault/src/adapters/openai.rs`.

use reqwest::RequestBuilder;

use super::DialectAdapter;
use crate::models::Provider;

pub struct CodexAdapter;

impl DialectAdapter for CodexAdapter {
    fn authenticate(&self, builder: RequestBuilder, provider: &Provider) -> RequestBuilder {
        builder.bearer_auth(&provider.secret)
    }
}
