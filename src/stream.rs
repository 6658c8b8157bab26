//! Streaming accountant — a pull-based parser over server-sent-event
//! framing (REDESIGN FLAGS §9: "a pull-based iterator over framed
//! events", not a push callback). Understands `event:`/`data:` lines, a
//! terminating blank line, and the OpenAI `[DONE]` sentinel, and
//! extracts a final `usage` object from either dialect.

use serde_json::Value;

use crate::models::UsageCounts;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates raw upstream bytes and yields complete SSE events as they
/// become available. Fed incrementally (one upstream chunk at a time),
/// pulled one event at a time by the accountant.
#[derive(Default)]
pub struct SseFrameParser {
    buffer: String,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Pulls the next complete event out of the buffer, if one is fully
    /// framed (terminated by a blank line). Leaves any partial trailing
    /// event in the buffer for the next chunk.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        let sep = self.buffer.find("\n\n").or_else(|| self.buffer.find("\r\n\r\n"))?;
        let (raw, sep_len) = if self.buffer[sep..].starts_with("\r\n\r\n") {
            (self.buffer[..sep].to_string(), 4)
        } else {
            (self.buffer[..sep].to_string(), 2)
        };
        self.buffer.drain(..sep + sep_len);

        let mut event = None;
        let mut data_lines = Vec::new();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim().to_string());
            }
        }
        Some(SseEvent {
            event,
            data: data_lines.join("\n"),
        })
    }
}

/// Accumulates usage deltas across events and yields a final total. Each
/// event's `usage` object is merged onto the running total field-by-field,
/// since Anthropic spreads input/output/cache counts across more than one
/// event and no single one is guaranteed to carry all of them.
#[derive(Default)]
pub struct UsageAccumulator {
    final_usage: Option<UsageCounts>,
}

impl UsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one parsed SSE event. Recognizes both dialects:
    /// - Anthropic: `message_delta`/`message_stop` events carrying a
    ///   top-level `usage` object.
    /// - OpenAI: a `data: [DONE]` sentinel, with the final chunk's
    ///   `usage` object (when `stream_options.include_usage` was set)
    ///   or a trailing non-stream `usage` object.
    pub fn feed(&mut self, event: &SseEvent) {
        if event.data == "[DONE]" {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
            return;
        };
        if let Some(usage) = value.get("usage") {
            if let Some(counts) = extract_usage(usage, self.final_usage.as_ref()) {
                self.final_usage = Some(counts);
            }
        }
    }

    pub fn finish(self) -> Option<UsageCounts> {
        self.final_usage
    }
}

/// Merges one event's `usage` object onto `prior`. Anthropic splits usage
/// across events — `message_start` carries input/cache tokens,
/// `message_delta` carries only the running `output_tokens` — so a field
/// absent from this event must keep whatever `prior` already had, not
/// reset to 0.
fn extract_usage(usage: &Value, prior: Option<&UsageCounts>) -> Option<UsageCounts> {
    let prior_input = prior.map(|p| p.input_tokens).unwrap_or(0);
    let prior_output = prior.map(|p| p.output_tokens).unwrap_or(0);
    let prior_cache_create = prior.map(|p| p.cache_create_tokens).unwrap_or(0);
    let prior_cache_read = prior.map(|p| p.cache_read_tokens).unwrap_or(0);

    let input_tokens = usage
        .get("input_tokens")
        .or_else(|| usage.get("prompt_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(prior_input);
    let output_tokens = usage
        .get("output_tokens")
        .or_else(|| usage.get("completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(prior_output);
    let cache_create_tokens = usage
        .get("cache_creation_input_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prior_cache_create);
    let cache_read_tokens = usage
        .get("cache_read_input_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prior_cache_read);
    Some(UsageCounts {
        input_tokens,
        output_tokens,
        cache_create_tokens,
        cache_read_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_framed_event() {
        let mut parser = SseFrameParser::new();
        parser.push_chunk("event: message_delta\ndata: {\"usage\":{\"output_tokens\":5}}\n\n");
        let event = parser.next_event().unwrap();
        assert_eq!(event.event.as_deref(), Some("message_delta"));
        assert!(event.data.contains("output_tokens"));
        assert!(parser.next_event().is_none());
    }

    #[test]
    fn holds_partial_event_until_terminator_arrives() {
        let mut parser = SseFrameParser::new();
        parser.push_chunk("data: {\"partial\":true}");
        assert!(parser.next_event().is_none());
        parser.push_chunk("\n\n");
        assert!(parser.next_event().is_some());
    }

    #[test]
    fn done_sentinel_is_not_treated_as_usage() {
        let mut acc = UsageAccumulator::new();
        acc.feed(&SseEvent {
            event: None,
            data: "[DONE]".to_string(),
        });
        assert!(acc.finish().is_none());
    }

    #[test]
    fn final_usage_summary_wins_over_partial_deltas() {
        let mut acc = UsageAccumulator::new();
        acc.feed(&SseEvent {
            event: Some("message_delta".to_string()),
            data: r#"{"usage":{"output_tokens":3}}"#.to_string(),
        });
        acc.feed(&SseEvent {
            event: Some("message_stop".to_string()),
            data: r#"{"usage":{"input_tokens":10,"output_tokens":42}}"#.to_string(),
        });
        let usage = acc.finish().unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 42);
    }

    #[test]
    fn later_partial_usage_event_does_not_clobber_earlier_fields() {
        let mut acc = UsageAccumulator::new();
        acc.feed(&SseEvent {
            event: Some("message_start".to_string()),
            data: r#"{"usage":{"input_tokens":100,"cache_read_input_tokens":40}}"#.to_string(),
        });
        acc.feed(&SseEvent {
            event: Some("message_delta".to_string()),
            data: r#"{"usage":{"output_tokens":25}}"#.to_string(),
        });
        let usage = acc.finish().unwrap();
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cache_read_tokens, 40);
        assert_eq!(usage.output_tokens, 25);
    }

    #[test]
    fn openai_dialect_usage_keys_are_recognized() {
        let mut acc = UsageAccumulator::new();
        acc.feed(&SseEvent {
            event: None,
            data: r#"{"usage":{"prompt_tokens":7,"completion_tokens":11}}"#.to_string(),
        });
        let usage = acc.finish().unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 11);
    }
}
