use anyhow::{bail, Context};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;
use zerocopy::IntoBytes;

use crate::embeddings::text_prep::prepare_sentence_text;
use crate::embeddings::Embedder;
use crate::rag::db::ensure_embedding_meta;
use crate::rag::{normalize_language_pair, TranslationPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted(Uuid),
    /// The same sentence/translation in the same languages was already stored under this id.
    Duplicate(Uuid),
}

impl AddOutcome {
    pub fn pair_id(&self) -> Uuid {
        match *self {
            AddOutcome::Inserted(id) | AddOutcome::Duplicate(id) => id,
        }
    }
}

/// A pair after normalization, ready to embed and store.
///
/// `sentence` and `translation` are stored as submitted (trimmed); the `embed_*` forms are
/// whitespace-collapsed and word-capped for the model only.
#[derive(Debug)]
struct PreparedPair {
    source_language: String,
    target_language: String,
    sentence: String,
    translation: String,
    embed_sentence: String,
    embed_translation: String,
}

fn prepare_pair(pair: &TranslationPair) -> anyhow::Result<PreparedPair> {
    let (source_language, target_language) =
        normalize_language_pair(&pair.source_language, &pair.target_language)?;
    let sentence = pair.sentence.trim().to_string();
    let translation = pair.translation.trim().to_string();
    if sentence.is_empty() {
        bail!("sentence cannot be empty");
    }
    if translation.is_empty() {
        bail!("translation cannot be empty");
    }
    Ok(PreparedPair {
        source_language,
        target_language,
        embed_sentence: prepare_sentence_text(&sentence),
        embed_translation: prepare_sentence_text(&translation),
        sentence,
        translation,
    })
}

fn find_existing(conn: &Connection, p: &PreparedPair) -> anyhow::Result<Option<Uuid>> {
    let id: Option<String> = conn
        .query_row(
            r#"
            SELECT s.pair_id
            FROM sentences s
            JOIN sentences t ON t.pair_id = s.pair_id
            WHERE s.language = ?1 AND s.sentence = ?2
              AND t.language = ?3 AND t.sentence = ?4
            LIMIT 1
            "#,
            params![p.source_language, p.sentence, p.target_language, p.translation],
            |r| r.get(0),
        )
        .optional()?;
    id.map(|s| Uuid::parse_str(&s).with_context(|| format!("corrupt pair id '{s}'")))
        .transpose()
}

fn insert_prepared(conn: &Connection, embedder: &dyn Embedder, p: &PreparedPair) -> anyhow::Result<AddOutcome> {
    if let Some(existing) = find_existing(conn, p)? {
        log::debug!("Skipping duplicate pair {} ({} -> {})", existing, p.source_language, p.target_language);
        return Ok(AddOutcome::Duplicate(existing));
    }

    let embeddings = embedder
        .embed_batch(&[p.embed_sentence.as_str(), p.embed_translation.as_str()])
        .context("failed to embed translation pair")?;
    for e in &embeddings {
        if e.len() != embedder.dims() {
            bail!("unexpected embedding dims: got {}, expected {}", e.len(), embedder.dims());
        }
    }

    let pair_id = Uuid::new_v4();
    let created_ms = chrono::Utc::now().timestamp_millis();
    let rows = [
        (&p.source_language, &p.sentence, &embeddings[0]),
        (&p.target_language, &p.translation, &embeddings[1]),
    ];
    for (language, sentence, embedding) in rows {
        conn.execute(
            r#"
            INSERT INTO sentences (pair_id, language, sentence, embedding, created_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![pair_id.to_string(), language, sentence, embedding.as_slice().as_bytes(), created_ms],
        )?;
    }

    Ok(AddOutcome::Inserted(pair_id))
}

/// Embed and store one pair. Both rows share a fresh pair id and are written in one transaction.
pub fn add_pair(conn: &mut Connection, embedder: &dyn Embedder, pair: &TranslationPair) -> anyhow::Result<AddOutcome> {
    let prepared = prepare_pair(pair)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_embedding_meta(&tx, embedder.model_name(), embedder.dims())?;
    let outcome = insert_prepared(&tx, embedder, &prepared)?;
    tx.commit()?;

    match outcome {
        AddOutcome::Inserted(id) => log::info!(
            "Added translation pair {} ({} -> {})",
            id,
            prepared.source_language,
            prepared.target_language
        ),
        AddOutcome::Duplicate(id) => log::info!("Translation pair already stored as {}", id),
    }
    Ok(outcome)
}

/// Store a batch of pairs in one transaction. Any invalid pair rejects the whole batch.
/// Returns (inserted, skipped_duplicates).
pub fn add_pairs(conn: &mut Connection, embedder: &dyn Embedder, pairs: &[TranslationPair]) -> anyhow::Result<(i64, i64)> {
    log::info!("Adding batch of {} translation pairs", pairs.len());

    let prepared = pairs
        .iter()
        .enumerate()
        .map(|(i, p)| prepare_pair(p).with_context(|| format!("invalid pair at index {i}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_embedding_meta(&tx, embedder.model_name(), embedder.dims())?;

    let mut inserted: i64 = 0;
    let mut skipped_duplicates: i64 = 0;
    for p in &prepared {
        match insert_prepared(&tx, embedder, p)? {
            AddOutcome::Inserted(_) => inserted += 1,
            AddOutcome::Duplicate(_) => skipped_duplicates += 1,
        }
    }
    tx.commit()?;

    if skipped_duplicates > 0 {
        log::info!(
            "Added {} pairs successfully, {} duplicates skipped",
            inserted,
            skipped_duplicates
        );
    } else {
        log::info!("Added {} pairs successfully", inserted);
    }
    Ok((inserted, skipped_duplicates))
}

/// Delete both halves of a pair. Returns false when the id is unknown.
pub fn remove_pair(conn: &Connection, pair_id: &str) -> anyhow::Result<bool> {
    let id = Uuid::parse_str(pair_id.trim()).with_context(|| format!("invalid pair id '{pair_id}'"))?;
    let removed = conn.execute("DELETE FROM sentences WHERE pair_id = ?1", params![id.to_string()])?;
    log::info!("Removed pair {} ({} rows)", id, removed);
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::HashingEmbedder;
    use crate::rag::db::{open_in_memory, stats};
    use crate::rag::retrieval::suggest;
    use crate::rag::PromptQuery;

    fn pair(src: &str, tgt: &str, sentence: &str, translation: &str) -> TranslationPair {
        TranslationPair {
            source_language: src.into(),
            target_language: tgt.into(),
            sentence: sentence.into(),
            translation: translation.into(),
        }
    }

    #[test]
    fn test_add_pair_stores_both_halves_under_one_id() {
        let mut conn = open_in_memory().unwrap();
        let embedder = HashingEmbedder::new();

        let outcome = add_pair(&mut conn, &embedder, &pair("EN", "fr", "Good morning", "Bonjour")).unwrap();
        let AddOutcome::Inserted(id) = outcome else { panic!("expected insert, got {outcome:?}") };

        let langs: Vec<(String, String)> = conn
            .prepare("SELECT language, sentence FROM sentences WHERE pair_id = ?1 ORDER BY language")
            .unwrap()
            .query_map(params![id.to_string()], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            langs,
            vec![
                ("en".to_string(), "Good morning".to_string()),
                ("fr".to_string(), "Bonjour".to_string())
            ]
        );

        let blob_len: i64 = conn
            .query_row("SELECT length(embedding) FROM sentences LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(blob_len as usize, embedder.dims() * std::mem::size_of::<f32>());
    }

    #[test]
    fn test_duplicate_pair_is_not_stored_twice() {
        let mut conn = open_in_memory().unwrap();
        let embedder = HashingEmbedder::new();

        let first = add_pair(&mut conn, &embedder, &pair("en", "de", "Thank you", "Danke")).unwrap();
        let second = add_pair(&mut conn, &embedder, &pair("en", "de", "  Thank you ", "Danke\n")).unwrap();
        assert_eq!(second, AddOutcome::Duplicate(first.pair_id()));
        assert_eq!(stats(&conn).unwrap().pairs, 1);

        // Same sentence, different translation is a new pair.
        let third = add_pair(&mut conn, &embedder, &pair("en", "de", "Thank you", "Vielen Dank")).unwrap();
        assert!(matches!(third, AddOutcome::Inserted(_)));
        assert_eq!(stats(&conn).unwrap().pairs, 2);
    }

    #[test]
    fn test_long_translation_is_stored_whole() {
        let mut conn = open_in_memory().unwrap();
        let embedder = HashingEmbedder::new();

        let sentence = "Please read the attached report carefully";
        let translation = (0..250).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        add_pair(&mut conn, &embedder, &pair("en", "fr", sentence, &translation)).unwrap();

        let query = PromptQuery {
            source_language: "en".into(),
            target_language: "fr".into(),
            query_sentence: sentence.into(),
            top_k: None,
            min_score: None,
            detailed: false,
        };
        let response = suggest(&conn, &embedder, &query).unwrap();
        assert_eq!(response.suggestions, vec![translation.clone()]);
        assert!(response.suggestions[0].ends_with("w249"));

        // Duplicates are matched on the stored text, not the capped embedding input.
        let again = add_pair(&mut conn, &embedder, &pair("en", "fr", sentence, &translation)).unwrap();
        assert!(matches!(again, AddOutcome::Duplicate(_)));
    }

    #[test]
    fn test_invalid_pairs_are_rejected() {
        let mut conn = open_in_memory().unwrap();
        let embedder = HashingEmbedder::new();

        assert!(add_pair(&mut conn, &embedder, &pair("en", "fr", "   ", "Bonjour")).is_err());
        assert!(add_pair(&mut conn, &embedder, &pair("en", "fr", "Hello", "")).is_err());
        assert!(add_pair(&mut conn, &embedder, &pair("en", "en", "Hello", "Hi")).is_err());
        assert!(add_pair(&mut conn, &embedder, &pair("eng", "fr", "Hello", "Salut")).is_err());
        assert_eq!(stats(&conn).unwrap().sentences, 0);
    }

    #[test]
    fn test_add_pairs_counts_duplicates_within_batch() {
        let mut conn = open_in_memory().unwrap();
        let embedder = HashingEmbedder::new();

        let batch = vec![
            pair("en", "es", "Where is the station?", "¿Dónde está la estación?"),
            pair("en", "es", "I am hungry", "Tengo hambre"),
            pair("en", "es", "Where is the station?", "¿Dónde está la estación?"),
        ];
        assert_eq!(add_pairs(&mut conn, &embedder, &batch).unwrap(), (2, 1));

        let s = stats(&conn).unwrap();
        assert_eq!(s.pairs, 2);
        assert_eq!(s.languages.get("en"), Some(&2));
        assert_eq!(s.languages.get("es"), Some(&2));
    }

    #[test]
    fn test_add_pairs_invalid_entry_aborts_batch() {
        let mut conn = open_in_memory().unwrap();
        let embedder = HashingEmbedder::new();

        let batch = vec![pair("en", "it", "Hello", "Ciao"), pair("en", "it", "", "Vuoto")];
        let err = add_pairs(&mut conn, &embedder, &batch).unwrap_err();
        assert!(format!("{err:#}").contains("index 1"));
        assert_eq!(stats(&conn).unwrap().pairs, 0);
    }

    #[test]
    fn test_remove_pair() {
        let mut conn = open_in_memory().unwrap();
        let embedder = HashingEmbedder::new();
        let id = add_pair(&mut conn, &embedder, &pair("en", "pt", "Yes", "Sim")).unwrap().pair_id();

        assert!(remove_pair(&conn, &id.to_string()).unwrap());
        assert!(!remove_pair(&conn, &id.to_string()).unwrap());
        assert!(remove_pair(&conn, "not-a-uuid").is_err());
        assert_eq!(stats(&conn).unwrap().sentences, 0);
    }
}
