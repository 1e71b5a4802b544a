// retrieval.rs — Nearest-neighbor lookup of translation examples.
//
// Exact scan: every source-language row that has a partner in the target language is
// scored with sqlite-vec's cosine distance against the query vector, and the closest
// top_k pairs are returned. Stores here hold thousands of pairs, not millions.

use anyhow::bail;
use rusqlite::{params, Connection};
use zerocopy::IntoBytes;

use crate::config;
use crate::embeddings::text_prep::prepare_sentence_text;
use crate::embeddings::Embedder;
use crate::rag::db::ensure_embedding_meta;
use crate::rag::{normalize_language_pair, PromptQuery, RagResponse, Suggestion};

/// Convert cosine distance to 0..1 score.
/// distance=0 → 1.0 (identical vectors), distance>=1 → 0.0 (orthogonal or opposite).
pub fn cosine_distance_to_score(distance: f64) -> f64 {
    (1.0 - distance).max(0.0)
}

/// Resolve the requested result count: default when absent, error on zero, clamp above the max.
pub fn resolve_top_k(top_k: Option<usize>) -> anyhow::Result<usize> {
    match top_k {
        None => Ok(config::retrieval::DEFAULT_TOP_K),
        Some(0) => bail!("top_k must be at least 1"),
        Some(k) if k > config::retrieval::MAX_TOP_K => {
            log::warn!("top_k {} clamped to {}", k, config::retrieval::MAX_TOP_K);
            Ok(config::retrieval::MAX_TOP_K)
        }
        Some(k) => Ok(k),
    }
}

/// Closest stored pairs for `query_embedding`, by cosine distance of the source half.
pub fn nearest_translations(
    conn: &Connection,
    source_language: &str,
    target_language: &str,
    query_embedding: &[f32],
    top_k: usize,
) -> anyhow::Result<Vec<Suggestion>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT
            src.sentence AS source_sentence,
            tgt.sentence AS target_sentence,
            vec_distance_cosine(src.embedding, ?1) AS distance
        FROM sentences src
        JOIN sentences tgt ON tgt.pair_id = src.pair_id
        WHERE src.language = ?2 AND tgt.language = ?3
        ORDER BY distance ASC, src.created_ms ASC, src.pair_id ASC
        LIMIT ?4
        "#,
    )?;

    let rows = stmt.query_map(
        params![query_embedding.as_bytes(), source_language, target_language, top_k as i64],
        |r| {
            let distance: f64 = r.get(2)?;
            Ok(Suggestion {
                source_sentence: r.get(0)?,
                target_sentence: r.get(1)?,
                distance,
                score: cosine_distance_to_score(distance),
            })
        },
    )?;

    let mut out = Vec::with_capacity(top_k);
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Embed the query sentence and return the translations of its nearest stored neighbors.
pub fn suggest(conn: &Connection, embedder: &dyn Embedder, query: &PromptQuery) -> anyhow::Result<RagResponse> {
    let (source_language, target_language) =
        normalize_language_pair(&query.source_language, &query.target_language)?;
    let top_k = resolve_top_k(query.top_k)?;
    if let Some(min) = query.min_score {
        if !min.is_finite() {
            bail!("min_score must be a finite number");
        }
    }

    let empty = RagResponse {
        suggestions: vec![],
        matches: query.detailed.then(Vec::new),
    };

    let text = prepare_sentence_text(&query.query_sentence);
    if text.is_empty() {
        log::info!("Empty query sentence, returning no suggestions");
        return Ok(empty);
    }

    ensure_embedding_meta(conn, embedder.model_name(), embedder.dims())?;
    let query_embedding = embedder.embed(&text)?;
    if query_embedding.len() != embedder.dims() {
        bail!(
            "unexpected embedding dims: got {}, expected {}",
            query_embedding.len(),
            embedder.dims()
        );
    }
    if query_embedding.iter().all(|&x| x == 0.0) {
        // A zero vector has no direction; cosine distance is undefined.
        log::info!("Query embedded to a zero vector, returning no suggestions");
        return Ok(empty);
    }

    let mut matches = nearest_translations(conn, &source_language, &target_language, &query_embedding, top_k)?;
    if let Some(min) = query.min_score {
        matches.retain(|m| m.score >= min);
    }

    log::info!(
        "Retrieved {} suggestions ({} -> {}, top_k={})",
        matches.len(),
        source_language,
        target_language,
        top_k
    );

    Ok(RagResponse {
        suggestions: matches.iter().map(|m| m.target_sentence.clone()).collect(),
        matches: query.detailed.then_some(matches),
    })
}
