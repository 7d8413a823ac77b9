//! The `context_search` tool (spec §4.3): substring/regex search over a
//! conversation with bounded output size.

use hub_domain::tool::Message;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ContextSearchRequest {
    pub query: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message_index: usize,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub truncated: bool,
}

pub fn search(
    messages: &[Message],
    req: ContextSearchRequest,
    max_output_bytes: usize,
) -> Result<SearchResult, String> {
    let max_results = req.max_results.unwrap_or(50);
    let matcher: Box<dyn Fn(&str) -> bool> = if req.regex {
        let re = Regex::new(&req.query).map_err(|e| format!("invalid regex: {e}"))?;
        Box::new(move |text: &str| re.is_match(text))
    } else {
        let needle = req.query.clone();
        Box::new(move |text: &str| text.contains(&needle))
    };

    let mut hits = Vec::new();
    let mut total_bytes = 0usize;
    let mut truncated = false;

    for (index, message) in messages.iter().enumerate() {
        let text = message.content.extract_all_text();
        if text.is_empty() || !matcher(&text) {
            continue;
        }
        if hits.len() >= max_results {
            truncated = true;
            break;
        }
        let snippet: String = text.chars().take(400).collect();
        total_bytes += snippet.len();
        if total_bytes > max_output_bytes {
            truncated = true;
            break;
        }
        hits.push(SearchHit {
            message_index: index,
            snippet,
        });
    }

    Ok(SearchResult { hits, truncated })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs() -> Vec<Message> {
        vec![
            Message::user("the quick brown fox"),
            Message::user("nothing relevant here"),
            Message::user("fox jumps again"),
        ]
    }

    #[test]
    fn substring_search_finds_matches() {
        let result = search(
            &msgs(),
            ContextSearchRequest {
                query: "fox".into(),
                regex: false,
                max_results: None,
            },
            32_768,
        )
        .unwrap();
        assert_eq!(result.hits.len(), 2);
        assert!(!result.truncated);
    }

    #[test]
    fn regex_search_respects_pattern() {
        let result = search(
            &msgs(),
            ContextSearchRequest {
                query: "^the".into(),
                regex: true,
                max_results: None,
            },
            32_768,
        )
        .unwrap();
        assert_eq!(result.hits.len(), 1);
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let result = search(
            &msgs(),
            ContextSearchRequest {
                query: "[".into(),
                regex: true,
                max_results: None,
            },
            32_768,
        );
        assert!(result.is_err());
    }

    #[test]
    fn max_results_truncates() {
        let result = search(
            &msgs(),
            ContextSearchRequest {
                query: "fox".into(),
                regex: false,
                max_results: Some(1),
            },
            32_768,
        )
        .unwrap();
        assert_eq!(result.hits.len(), 1);
        assert!(result.truncated);
    }
}
