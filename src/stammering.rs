// stammering.rs — Naive repetition detector for machine translation output.
//
// A sentence "stammers" when a word 2-gram or 3-gram occurs more than once, or when a
// single character is repeated many times in a row ("nooooooo", "!!!!!!").

use std::collections::HashMap;

use anyhow::bail;
use serde::Serialize;

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StammeringCheck {
    pub has_stammer: bool,
}

/// All contiguous word n-grams, joined by single spaces.
pub fn ngrams(words: &[&str], n: usize) -> Vec<String> {
    if n == 0 || words.len() < n {
        return vec![];
    }
    words.windows(n).map(|w| w.join(" ")).collect()
}

fn has_repeated_ngrams(words: &[&str]) -> bool {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for &n in config::stammering::NGRAM_SIZES {
        for gram in ngrams(words, n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
        .values()
        .any(|&c| c >= config::stammering::MIN_NGRAM_REPEATS)
}

/// Longest run of one repeated character, ignoring newlines.
fn has_character_run(text: &str, min_run: usize) -> bool {
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for c in text.chars() {
        if c == '\n' {
            prev = None;
            run = 0;
            continue;
        }
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= min_run {
            return true;
        }
    }
    false
}

/// Detect whether a sentence contains stammering patterns.
pub fn detect_stammering(sentence: &str) -> anyhow::Result<bool> {
    if sentence.trim().is_empty() {
        bail!("Input sentence cannot be empty");
    }

    let lowered = sentence.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    if has_repeated_ngrams(&words) {
        log::debug!("Detected repeated n-grams in sentence: {}", sentence);
        return Ok(true);
    }

    if has_character_run(sentence, config::stammering::MIN_CHAR_RUN) {
        log::debug!("Detected repeated characters in sentence: {}", sentence);
        return Ok(true);
    }

    Ok(false)
}

/// Check a source sentence and its translation; either one stammering flags the pair.
pub fn check_translation(source_sentence: &str, translated_sentence: &str) -> anyhow::Result<StammeringCheck> {
    let source = detect_stammering(source_sentence)?;
    let translated = detect_stammering(translated_sentence)?;
    Ok(StammeringCheck {
        has_stammer: source || translated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ngrams() {
        let words = ["a", "b", "c", "d"];
        assert_eq!(ngrams(&words, 2), vec!["a b", "b c", "c d"]);
        assert_eq!(ngrams(&words, 3), vec!["a b c", "b c d"]);
        assert!(ngrams(&words, 5).is_empty());
        assert!(ngrams(&[], 2).is_empty());
    }

    #[test]
    fn test_clean_sentence() {
        assert!(!detect_stammering("The quick brown fox jumps over the lazy dog").unwrap());
        assert!(!detect_stammering("Hello").unwrap());
    }

    #[test]
    fn test_repeated_bigram_is_case_insensitive() {
        assert!(detect_stammering("I think I think this is fine").unwrap());
        assert!(detect_stammering("Thank you THANK YOU").unwrap());
    }

    #[test]
    fn test_repeated_single_word_is_not_enough() {
        // "the" twice is a repeated unigram, not a repeated bigram.
        assert!(!detect_stammering("the cat saw the dog").unwrap());
    }

    #[test]
    fn test_character_run() {
        assert!(detect_stammering("Nooooooo way").unwrap());
        assert!(detect_stammering("wait!!!!!!").unwrap());
        // Five in a row is below the threshold.
        assert!(!detect_stammering("hmmmmm okay").unwrap());
        // Runs do not continue across newlines.
        assert!(!detect_stammering("aaa\naaa").unwrap());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(detect_stammering("").is_err());
        assert!(detect_stammering("  \t\n").is_err());
    }

    #[test]
    fn test_check_translation() {
        assert_eq!(
            check_translation("Good morning", "Bonjour").unwrap(),
            StammeringCheck { has_stammer: false }
        );
        assert!(check_translation("Good morning", "Bon bon bon bon jour").unwrap().has_stammer);
        assert!(check_translation("Good morning", " ").is_err());
    }
}
