// rag/ — Sentence/translation store and nearest-neighbor retrieval.
//
// Both halves of a pair are stored as separate rows sharing one pair id, each with its own
// embedding. Retrieval ranks source-language rows by cosine distance to the query and
// returns the target-language rows of the same pairs.

pub mod db;
pub mod pairs;
pub mod retrieval;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::config;

/// A sentence and its translation, as submitted by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranslationPair {
    pub source_language: String,
    pub target_language: String,
    /// Original sentence in the source language.
    pub sentence: String,
    /// Translated sentence in the target language.
    pub translation: String,
}

/// Query for translation examples similar to `query_sentence`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptQuery {
    pub source_language: String,
    pub target_language: String,
    pub query_sentence: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub detailed: bool,
}

/// One retrieved example.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub source_sentence: String,
    pub target_sentence: String,
    pub distance: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagResponse {
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<Suggestion>>,
}

/// Normalize and validate a language code: 1-2 ASCII letters, lowercased.
pub fn normalize_language(code: &str) -> anyhow::Result<String> {
    let code = code.trim();
    if code.is_empty() {
        bail!("language code cannot be empty");
    }
    if code.len() > config::retrieval::MAX_LANGUAGE_CODE_LEN || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        bail!(
            "invalid language code '{}' (expected at most {} ASCII letters)",
            code,
            config::retrieval::MAX_LANGUAGE_CODE_LEN
        );
    }
    Ok(code.to_ascii_lowercase())
}

/// Language pair validated for storage or lookup.
pub fn normalize_language_pair(source: &str, target: &str) -> anyhow::Result<(String, String)> {
    let source = normalize_language(source)?;
    let target = normalize_language(target)?;
    if source == target {
        bail!("source and target language must differ (both '{source}')");
    }
    Ok((source, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("EN").unwrap(), "en");
        assert_eq!(normalize_language(" fr ").unwrap(), "fr");
        assert_eq!(normalize_language("x").unwrap(), "x");
        assert!(normalize_language("").is_err());
        assert!(normalize_language("eng").is_err());
        assert!(normalize_language("e1").is_err());
        assert!(normalize_language("é").is_err());
    }

    #[test]
    fn test_language_pair_must_differ() {
        assert_eq!(
            normalize_language_pair("en", "DE").unwrap(),
            ("en".to_string(), "de".to_string())
        );
        let err = normalize_language_pair("en", "EN").unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_rag_response_omits_matches_unless_detailed() {
        let plain = RagResponse {
            suggestions: vec!["Hallo".into()],
            matches: None,
        };
        assert_eq!(
            serde_json::to_value(&plain).unwrap(),
            serde_json::json!({ "suggestions": ["Hallo"] })
        );
    }
}
