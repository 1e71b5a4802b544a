// text_prep.rs — Sentence normalization before embedding generation.
//
// Truncates to fit the model's context window (256 word-piece tokens for all-MiniLM-L6-v2).

use crate::config;

/// Normalize a sentence for embedding and storage: trim, collapse whitespace
/// runs (including newlines) to single spaces, and cap the word count.
pub fn prepare_sentence_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_words(&collapsed, config::embedding::MAX_WORDS)
}

/// Truncate text to at most `max_words` words, preserving word boundaries.
fn truncate_words(text: &str, max_words: usize) -> String {
    let mut words = 0;
    let mut end = 0;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            words += 1;
            if words >= max_words {
                end = i;
                break;
            }
        }
        end = i + c.len_utf8();
    }

    text[..end].trim().to_string()
}
