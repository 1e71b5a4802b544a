use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::{bail, Context};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::{self, Settings};
use crate::embeddings::Embedder;

pub struct HostState {
    pub settings: Settings,
    pub db_path: Option<PathBuf>,
    pub conn: Option<Connection>,
    pub embedder: Option<Box<dyn Embedder>>,
}

impl HostState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            db_path: None,
            conn: None,
            embedder: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub pairs: i64,
    pub sentences: i64,
    pub languages: BTreeMap<String, i64>,
}

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec as an auto-extension so every connection opened afterwards
/// has the vec_* functions available.
pub fn register_vector_extension() {
    VEC_EXTENSION.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature SQLite expects of an extension entry point.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

pub fn ensure_sqlite_vec_available(conn: &Connection) -> anyhow::Result<()> {
    // No fallbacks: fail loudly if the vector functions aren't present.
    match conn.query_row("SELECT vec_version()", [], |r| r.get::<_, String>(0)) {
        Ok(version) => {
            log::info!("sqlite-vec available (version {})", version);
            Ok(())
        }
        Err(e) => bail!("sqlite-vec is not available in this build: {e}"),
    }
}

fn apply_pragmas(conn: &Connection) -> anyhow::Result<()> {
    // PRAGMA statements do NOT reliably accept parameters, so we must interpolate.
    conn.execute_batch(&format!(
        "\
PRAGMA journal_mode = WAL;\n\
PRAGMA synchronous = NORMAL;\n\
PRAGMA temp_store = MEMORY;\n\
PRAGMA cache_size = {cache_size};\n\
PRAGMA mmap_size = {mmap_size};\n\
PRAGMA busy_timeout = {busy_timeout};\n\
PRAGMA wal_autocheckpoint = {wal_autocheckpoint};\n\
",
        cache_size = config::sqlite::PRAGMA_CACHE_SIZE_KIB_NEG,
        mmap_size = config::sqlite::PRAGMA_MMAP_SIZE_BYTES,
        busy_timeout = config::sqlite::PRAGMA_BUSY_TIMEOUT_MS,
        wal_autocheckpoint = config::sqlite::PRAGMA_WAL_AUTOCHECKPOINT_PAGES,
    ))?;
    Ok(())
}

pub fn init_database(conn: &Connection) -> anyhow::Result<()> {
    log::info!("Initializing translation store schema");

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sentences (
            pair_id TEXT NOT NULL,
            language TEXT NOT NULL,
            sentence TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_ms INTEGER NOT NULL,
            PRIMARY KEY (pair_id, language)
        );

        CREATE INDEX IF NOT EXISTS idx_sentences_language
            ON sentences (language, sentence);

        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO store_meta (key, value) VALUES ('schema_version', ?1)",
        params![config::SCHEMA_VERSION.to_string()],
    )?;

    log::info!("Translation store schema initialized (sentences, store_meta)");
    Ok(())
}

fn schema_exists(conn: &Connection) -> anyhow::Result<bool> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='sentences'",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn open_initialized(conn: Connection) -> anyhow::Result<Connection> {
    ensure_sqlite_vec_available(&conn)?;
    apply_pragmas(&conn)?;

    if schema_exists(&conn)? {
        log::info!("Using existing translation store schema");
        let version = read_meta(&conn, "schema_version")?;
        if version.as_deref() != Some(config::SCHEMA_VERSION.to_string().as_str()) {
            bail!(
                "unsupported store schema version {:?} (expected {}); clear the store to rebuild",
                version,
                config::SCHEMA_VERSION
            );
        }
    } else {
        log::info!("Creating new translation store schema");
        init_database(&conn)?;
    }
    Ok(conn)
}

pub fn open_or_create_db(data_dir: &Path) -> anyhow::Result<(PathBuf, Connection)> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join(config::sqlite::DB_FILE_NAME);

    log::info!("Initializing translation store");
    log::info!("  Data Dir: {}", data_dir.display());
    log::info!("  DB Path: {}", db_path.display());

    register_vector_extension();
    let conn = Connection::open(&db_path).with_context(|| format!("open db {}", db_path.display()))?;
    let conn = open_initialized(conn)?;

    let stats = stats(&conn)?;
    log::info!(
        "Translation store ready: {} pairs, {} sentences",
        stats.pairs,
        stats.sentences
    );

    Ok((db_path, conn))
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    register_vector_extension();
    let conn = Connection::open_in_memory().context("open in-memory db")?;
    open_initialized(conn)
}

fn read_meta(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM store_meta WHERE key = ?1", params![key], |r| r.get(0))
        .optional()?)
}

/// Tie the store to one embedding model. The first caller records its model name and
/// dimensions; later callers must match, since distances between vectors of different
/// models are meaningless.
pub fn ensure_embedding_meta(conn: &Connection, model_name: &str, dims: usize) -> anyhow::Result<()> {
    let stored_model = read_meta(conn, "model_name")?;
    let stored_dims = read_meta(conn, "dims")?;

    match (stored_model, stored_dims) {
        (None, None) => {
            conn.execute(
                "INSERT INTO store_meta (key, value) VALUES ('model_name', ?1), ('dims', ?2)",
                params![model_name, dims.to_string()],
            )?;
            log::info!("Translation store bound to model {} ({} dims)", model_name, dims);
            Ok(())
        }
        (Some(m), Some(d)) if m == model_name && d == dims.to_string() => Ok(()),
        (m, d) => bail!(
            "store was built with model {} ({} dims) but the loaded model is {} ({} dims); clear the store to rebuild",
            m.unwrap_or_else(|| "?".into()),
            d.unwrap_or_else(|| "?".into()),
            model_name,
            dims
        ),
    }
}

pub fn stats(conn: &Connection) -> anyhow::Result<StoreStats> {
    let (pairs, sentences): (i64, i64) = conn.query_row(
        "SELECT COUNT(DISTINCT pair_id), COUNT(*) FROM sentences",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare("SELECT language, COUNT(*) FROM sentences GROUP BY language ORDER BY language")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
    let mut languages = BTreeMap::new();
    for row in rows {
        let (lang, n) = row?;
        languages.insert(lang, n);
    }

    Ok(StoreStats {
        pairs,
        sentences,
        languages,
    })
}

fn sidecar_paths(db_path: &Path) -> [PathBuf; 2] {
    [
        PathBuf::from(format!("{}-wal", db_path.display())),
        PathBuf::from(format!("{}-shm", db_path.display())),
    ]
}

/// On-disk size of the store: the database file plus its WAL and shared-memory files.
pub fn store_size_bytes(db_path: &Path) -> i64 {
    std::iter::once(db_path.to_path_buf())
        .chain(sidecar_paths(db_path))
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len() as i64)
        .sum()
}

pub fn clear_rebuild(state: &mut HostState) -> anyhow::Result<()> {
    log::info!("Clearing translation store by deleting database file (rebuild from scratch)");
    let db_path = state
        .db_path
        .clone()
        .context("DB not initialized (missing db_path)")?;

    state.conn.take();
    log::info!("Database connection closed");

    delete_file_if_exists(&db_path)?;
    for sidecar in sidecar_paths(&db_path) {
        delete_file_if_exists(&sidecar)?;
    }

    log::info!("Recreating database...");
    let conn = Connection::open(&db_path)?;
    let conn = open_initialized(conn)?;
    if let Some(embedder) = state.embedder.as_deref() {
        ensure_embedding_meta(&conn, embedder.model_name(), embedder.dims())?;
    }
    state.conn = Some(conn);
    log::info!("Database recreated and initialized successfully");

    Ok(())
}

fn delete_file_if_exists(p: &Path) -> anyhow::Result<()> {
    if p.exists() {
        match std::fs::remove_file(p) {
            Ok(_) => log::info!("Deleted {}", p.display()),
            Err(e) => log::warn!("Failed to delete {}: {}", p.display(), e),
        }
    }
    Ok(())
}
