//! Claude (Anthropic-style) dialect — `x-api-key` header plus a pinned
//! `anthropic-version`, the same header shape the teacher's
//! `AnthropicAdapter::generate` sends in `keyvault/src/adapters/anthropic.rs`.

use reqwest::RequestBuilder;

use super::DialectAdapter;
use crate::models::Provider;

pub struct ClaudeAdapter;

const ANTHROPIC_VERSION: &str = "2023-06-01";

impl DialectAdapter for ClaudeAdapter {
    fn authenticate(&self, builder: RequestBuilder, provider: &Provider) -> RequestBuilder {
        builder
            .header("x-api-key", &provider.secret)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }
}
