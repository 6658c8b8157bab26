//! Sensitive-word filter (C7) — new relative to the teacher (the daemon
//! this generalizes from has no content moderation concept); grounded in
//! the general pattern of a matcher compiled once and shared via `Arc`,
//! the same way the teacher shares its `Arc<HashMap<String, Box<dyn
//! LLMAdapter>>>` adapter map.

use regex::RegexSet;
use std::collections::HashSet;

use crate::models::{MatchType, SensitiveWord};

pub struct Detection {
    pub word: String,
    pub match_type: MatchType,
    pub snippet: String,
}

/// Compiled over admin-defined `SensitiveWord` entries. Detection order
/// is `contains -> exact -> regex`, first hit wins.
pub struct SensitiveWordFilter {
    contains_terms: Vec<String>,
    exact_terms: HashSet<String>,
    regex_terms: Vec<String>,
    regex_set: RegexSet,
}

impl SensitiveWordFilter {
    pub fn compile(words: &[SensitiveWord]) -> anyhow::Result<Self> {
        let mut contains_terms = Vec::new();
        let mut exact_terms = HashSet::new();
        let mut regex_terms = Vec::new();
        for w in words.iter().filter(|w| w.enabled) {
            match w.match_type {
                MatchType::Contains => contains_terms.push(w.term.to_lowercase()),
                MatchType::Exact => {
                    exact_terms.insert(w.term.to_lowercase());
                }
                MatchType::Regex => regex_terms.push(w.term.clone()),
            }
        }
        let regex_set = RegexSet::new(&regex_terms)?;
        Ok(Self {
            contains_terms,
            exact_terms,
            regex_terms,
            regex_set,
        })
    }

    pub fn empty() -> Self {
        Self {
            contains_terms: Vec::new(),
            exact_terms: HashSet::new(),
            regex_terms: Vec::new(),
            regex_set: RegexSet::empty(),
        }
    }

    /// Scans one text fragment (a message segment, a system prompt, an
    /// OpenAI-style `input` array entry) for a hit. Returns the first
    /// match under `contains -> exact -> regex` ordering.
    pub fn scan(&self, text: &str) -> Option<Detection> {
        let lowered = text.to_lowercase();

        for term in &self.contains_terms {
            if lowered.contains(term.as_str()) {
                let snippet = snippet_around(&lowered, term);
                return Some(Detection {
                    word: term.clone(),
                    match_type: MatchType::Contains,
                    snippet,
                });
            }
        }

        if self.exact_terms.contains(&lowered) {
            return Some(Detection {
                word: lowered.clone(),
                match_type: MatchType::Exact,
                snippet: text.to_string(),
            });
        }

        if let Some(idx) = self.regex_set.matches(text).iter().next() {
            return Some(Detection {
                word: self.regex_terms[idx].clone(),
                match_type: MatchType::Regex,
                snippet: text.chars().take(200).collect(),
            });
        }

        None
    }

    /// Walks every extractable text fragment in the inbound payload:
    /// role='user' message segments, system prompts, and OpenAI-style
    /// `input` arrays.
    pub fn scan_fragments<'a>(&self, fragments: impl IntoIterator<Item = &'a str>) -> Option<Detection> {
        for fragment in fragments {
            if let Some(d) = self.scan(fragment) {
                return Some(d);
            }
        }
        None
    }
}

fn snippet_around(haystack: &str, term: &str) -> String {
    if let Some(pos) = haystack.find(term) {
        let start = pos.saturating_sub(30);
        let end = (pos + term.len() + 30).min(haystack.len());
        haystack[start..end].to_string()
    } else {
        term.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn word(term: &str, match_type: MatchType) -> SensitiveWord {
        SensitiveWord {
            id: Uuid::new_v4(),
            term: term.to_string(),
            match_type,
            enabled: true,
        }
    }

    #[test]
    fn contains_match_wins_first() {
        let filter = SensitiveWordFilter::compile(&[word("badword", MatchType::Contains)]).unwrap();
        let hit = filter.scan("this has a BadWord in it").unwrap();
        assert_eq!(hit.match_type, MatchType::Contains);
    }

    #[test]
    fn exact_requires_whole_text_match() {
        let filter = SensitiveWordFilter::compile(&[word("forbidden", MatchType::Exact)]).unwrap();
        assert!(filter.scan("forbidden").is_some());
        assert!(filter.scan("this is forbidden text").is_none());
    }

    #[test]
    fn regex_mode_matches_pattern() {
        let filter =
            SensitiveWordFilter::compile(&[word(r"\bssn\d{9}\b", MatchType::Regex)]).unwrap();
        assert!(filter.scan("my id is ssn123456789 ok").is_some());
        assert!(filter.scan("no match here").is_none());
    }

    #[test]
    fn disabled_entries_are_not_compiled() {
        let mut w = word("quiet", MatchType::Contains);
        w.enabled = false;
        let filter = SensitiveWordFilter::compile(&[w]).unwrap();
        assert!(filter.scan("stay quiet please").is_none());
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = SensitiveWordFilter::empty();
        assert!(filter.scan("anything at all").is_none());
    }
}
