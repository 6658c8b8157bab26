//! Inbound-payload helpers shared by the HTTP layer: pulling the model
//! name and session id out of a request body, and walking the message
//! tree for sensitive-word scanning (C7) — role='user' segments, system
//! prompts, and OpenAI-style `input` arrays (§4.7).

use serde_json::Value;

/// Best-effort model name extraction; both dialects carry it as a
/// top-level string field.
pub fn extract_model(body: &Value) -> Option<String> {
    body.get("model").and_then(Value::as_str).map(str::to_string)
}

/// A client-supplied session id, when the caller threads one through
/// (either a top-level `session_id` field or a `metadata.session_id`,
/// the shape both dialects' metadata bags use).
pub fn extract_session_id(body: &Value) -> Option<String> {
    body.get("session_id")
        .and_then(Value::as_str)
        .or_else(|| body.get("metadata")?.get("session_id")?.as_str())
        .map(str::to_string)
}

/// Walks every extractable text fragment in the inbound payload:
/// Anthropic-style `messages[].content[].text` plus a top-level
/// `system` string, and OpenAI-style `messages[].content` (string or
/// content-part array) plus the Responses API's `input` array.
pub fn extract_text_fragments(body: &Value) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(system) = body.get("system") {
        collect_from_value(system, &mut out);
    }

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for message in messages {
            let is_user = message.get("role").and_then(Value::as_str) == Some("user");
            if !is_user {
                continue;
            }
            if let Some(content) = message.get("content") {
                collect_from_value(content, &mut out);
            }
        }
    }

    if let Some(input) = body.get("input") {
        collect_from_value(input, &mut out);
    }

    out
}

fn collect_from_value(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_from_value(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                out.push(text.to_string());
            } else if let Some(content) = map.get("content") {
                collect_from_value(content, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_anthropic_style_nested_text() {
        let body = json!({
            "system": "be nice",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "hello there"}]}
            ]
        });
        let fragments = extract_text_fragments(&body);
        assert!(fragments.contains(&"be nice".to_string()));
        assert!(fragments.contains(&"hello there".to_string()));
    }

    #[test]
    fn extracts_openai_style_plain_string_content() {
        let body = json!({"messages": [{"role": "user", "content": "plain text"}]});
        let fragments = extract_text_fragments(&body);
        assert_eq!(fragments, vec!["plain text".to_string()]);
    }

    #[test]
    fn extracts_responses_api_input_array() {
        let body = json!({"input": [{"role": "user", "content": [{"type": "input_text", "text": "responses api text"}]}]});
        let fragments = extract_text_fragments(&body);
        assert_eq!(fragments, vec!["responses api text".to_string()]);
    }

    #[test]
    fn assistant_and_system_role_messages_are_not_scanned() {
        let body = json!({
            "messages": [
                {"role": "assistant", "content": "the assistant said this"},
                {"role": "system", "content": "a system message"},
                {"role": "user", "content": "the user said this"}
            ]
        });
        let fragments = extract_text_fragments(&body);
        assert_eq!(fragments, vec!["the user said this".to_string()]);
    }

    #[test]
    fn model_and_session_id_extraction() {
        let body = json!({"model": "claude-3-opus", "session_id": "sess-abc"});
        assert_eq!(extract_model(&body).as_deref(), Some("claude-3-opus"));
        assert_eq!(extract_session_id(&body).as_deref(), Some("sess-abc"));
    }
}
