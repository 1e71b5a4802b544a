mod config;
mod embeddings;
mod logging;
mod native_messaging;
mod protocol;
mod rag;
mod stammering;

use std::collections::BTreeMap;
use std::io::{stdin, stdout};
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::embeddings::engine::EmbeddingEngine;
use crate::embeddings::Embedder;
use crate::protocol::parse_params;
use crate::rag::db::{self, HostState};
use crate::rag::pairs::{self, AddOutcome};
use crate::rag::{retrieval, PromptQuery, TranslationPair};

fn main() {
    if let Err(e) = real_main() {
        eprintln!("[rag-translate] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    // A missing .env is normal; a malformed one is worth a warning once logging is up.
    let dotenv = dotenvy::dotenv();

    let settings = Settings::from_env().context("failed to load settings")?;
    logging::init_logging(&settings)?;

    match dotenv {
        Ok(path) => log::info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("Ignoring unreadable .env file: {}", e),
    }

    log::info!("=== RAG Translation Host Started ===");
    log::info!("Waiting for messages on stdin...");

    let mut state = HostState::new(settings);
    let mut in_stream = stdin();
    let mut out_stream = stdout();

    let mut message_count: u64 = 0;
    loop {
        let req = match native_messaging::read_message(&mut in_stream) {
            Ok(Some(r)) => r,
            Ok(None) => {
                log::info!("No more messages after {} messages, exiting", message_count);
                break;
            }
            Err(e) => {
                log::error!("Error reading message: {:?}", e);
                break;
            }
        };

        message_count += 1;
        log::info!(
            "Processing message #{}: {} (id: {})",
            message_count,
            req.method,
            req.id
        );

        let resp = handle_request(&mut state, &req.method, &req.id, &req.params).unwrap_or_else(|e| {
            log::error!("Handler error: {:?}", e);
            protocol::err(&req.id, format!("{e:#}"))
        });
        if let Err(e) = native_messaging::write_json(&mut out_stream, &resp) {
            log::error!("Error sending response: {:?}", e);
            break;
        }
    }

    log::info!("=== RAG Translation Host Stopped ===");
    Ok(())
}

fn handle_request(state: &mut HostState, method: &str, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    match method {
        "hello" => handle_hello(msg_id, params),
        "init" => handle_init(state, msg_id, params),
        "health" => handle_health(state, msg_id),
        // Translation memory
        "addPair" => handle_add_pair(state, msg_id, params),
        "addPairs" => handle_add_pairs(state, msg_id, params),
        "prompt" => handle_prompt(state, msg_id, params),
        "removePair" => handle_remove_pair(state, msg_id, params),
        "stats" => handle_stats(state, msg_id),
        "clear" => handle_clear(state, msg_id),
        // Output checks
        "stammering" => handle_stammering(msg_id, params),
        _ => Ok(protocol::err(msg_id, format!("Unknown method: {method}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelloParams {
    #[serde(default)]
    client_version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HelloResult {
    #[serde(rename = "type")]
    kind: &'static str,
    host_version: &'static str,
    client_version: String,
}

fn handle_hello(msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let p: HelloParams = parse_params("hello", params)?;
    let client_version = p.client_version.unwrap_or_else(|| "unknown".to_string());
    log::info!(
        "Hello from client version {}, responding with host version {}",
        client_version,
        config::HOST_VERSION
    );
    protocol::ok(
        msg_id,
        HelloResult {
            kind: "hello-response",
            host_version: config::HOST_VERSION,
            client_version,
        },
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitParams {
    #[serde(default)]
    data_dir: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResult {
    ok: bool,
    db_path: String,
    pairs: i64,
    sentences: i64,
    has_embeddings: bool,
    model_name: Option<String>,
}

/// Obtain and load the embedding model. Failure leaves the host usable for everything
/// that doesn't need vectors.
fn load_embedder(settings: &Settings) -> Option<Box<dyn Embedder>> {
    let model_dir = match embeddings::download::ensure_model_files(settings) {
        Ok(dir) => dir,
        Err(e) => {
            log::warn!("Embedding model unavailable (retrieval disabled): {:?}", e);
            return None;
        }
    };
    match EmbeddingEngine::load(&model_dir, &settings.model_name) {
        Ok(engine) => {
            log::info!("Embedding engine loaded successfully");
            Some(Box::new(engine))
        }
        Err(e) => {
            log::warn!("Failed to load embedding engine (retrieval disabled): {:?}", e);
            None
        }
    }
}

fn handle_init(state: &mut HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let p: InitParams = parse_params("init", params)?;
    let data_dir = match p.data_dir.filter(|s| !s.trim().is_empty()) {
        Some(dir) => {
            log::info!("Using explicit dataDir: {}", dir);
            PathBuf::from(dir)
        }
        None => state.settings.data_dir.clone(),
    };

    // The previous connection stays in place until the new store has opened.
    let (db_path, conn) = db::open_or_create_db(&data_dir)?;
    state.conn = Some(conn);
    state.db_path = Some(db_path.clone());

    if state.embedder.is_none() {
        state.embedder = load_embedder(&state.settings);
    }
    let conn = require_conn(state)?;
    if let Some(embedder) = state.embedder.as_deref() {
        // The store stays open on a model mismatch so 'clear' can rebuild it.
        db::ensure_embedding_meta(conn, embedder.model_name(), embedder.dims())?;
    }

    let stats = db::stats(conn)?;

    protocol::ok(
        msg_id,
        InitResult {
            ok: true,
            db_path: db_path.to_string_lossy().into_owned(),
            pairs: stats.pairs,
            sentences: stats.sentences,
            has_embeddings: state.embedder.is_some(),
            model_name: state.embedder.as_deref().map(|e| e.model_name().to_string()),
        },
    )
}

#[derive(Debug, Serialize)]
struct HealthResult {
    status: &'static str,
    model_loaded: bool,
    database: &'static str,
    #[serde(rename = "hostVersion")]
    host_version: &'static str,
    timestamp: String,
}

fn handle_health(state: &HostState, msg_id: &str) -> anyhow::Result<Value> {
    let connected = state
        .conn
        .as_ref()
        .map(|c| c.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)).is_ok())
        .unwrap_or(false);
    protocol::ok(
        msg_id,
        HealthResult {
            status: "ok",
            model_loaded: state.embedder.is_some(),
            database: if connected { "connected" } else { "disconnected" },
            host_version: config::HOST_VERSION,
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}

fn require_conn(state: &HostState) -> anyhow::Result<&rusqlite::Connection> {
    state.conn.as_ref().context("Database not initialized. Call 'init' first.")
}

/// Split borrow: the connection mutably plus the embedder, both required.
fn require_conn_and_embedder(state: &mut HostState) -> anyhow::Result<(&mut rusqlite::Connection, &dyn Embedder)> {
    let conn = state.conn.as_mut().context("Database not initialized. Call 'init' first.")?;
    let embedder = state
        .embedder
        .as_deref()
        .context("Embedding model not loaded; retrieval is unavailable")?;
    Ok((conn, embedder))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddPairResult {
    ok: bool,
    pair_id: String,
    duplicate: bool,
}

fn handle_add_pair(state: &mut HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let pair: TranslationPair = parse_params("addPair", params)?;
    let (conn, embedder) = require_conn_and_embedder(state)?;
    let outcome = pairs::add_pair(conn, embedder, &pair).context("Failed to add translation pair")?;
    protocol::ok(
        msg_id,
        AddPairResult {
            ok: true,
            pair_id: outcome.pair_id().to_string(),
            duplicate: matches!(outcome, AddOutcome::Duplicate(_)),
        },
    )
}

#[derive(Debug, Deserialize)]
struct AddPairsParams {
    pairs: Vec<TranslationPair>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddPairsResult {
    ok: bool,
    count: i64,
    skipped_duplicates: i64,
}

fn handle_add_pairs(state: &mut HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let p: AddPairsParams = parse_params("addPairs", params)?;
    let (conn, embedder) = require_conn_and_embedder(state)?;
    let (count, skipped_duplicates) =
        pairs::add_pairs(conn, embedder, &p.pairs).context("Failed to add translation pairs")?;
    protocol::ok(
        msg_id,
        AddPairsResult {
            ok: true,
            count,
            skipped_duplicates,
        },
    )
}

fn handle_prompt(state: &mut HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let query: PromptQuery = parse_params("prompt", params)?;
    let (conn, embedder) = require_conn_and_embedder(state)?;
    let response = retrieval::suggest(conn, embedder, &query)?;
    protocol::ok(msg_id, response)
}

#[derive(Debug, Deserialize)]
struct RemovePairParams {
    pair_id: String,
}

fn handle_remove_pair(state: &mut HostState, msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let p: RemovePairParams = parse_params("removePair", params)?;
    let conn = require_conn(state)?;
    let removed = pairs::remove_pair(conn, &p.pair_id)?;
    protocol::ok(msg_id, serde_json::json!({ "ok": true, "removed": removed }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResult {
    ok: bool,
    pairs: i64,
    sentences: i64,
    languages: BTreeMap<String, i64>,
    db_bytes: i64,
}

fn handle_stats(state: &mut HostState, msg_id: &str) -> anyhow::Result<Value> {
    let conn = require_conn(state)?;
    let stats = db::stats(conn)?;
    let db_bytes = state.db_path.as_deref().map(db::store_size_bytes).unwrap_or(0);
    protocol::ok(
        msg_id,
        StatsResult {
            ok: true,
            pairs: stats.pairs,
            sentences: stats.sentences,
            languages: stats.languages,
            db_bytes,
        },
    )
}

fn handle_clear(state: &mut HostState, msg_id: &str) -> anyhow::Result<Value> {
    require_conn(state)?;
    db::clear_rebuild(state)?;
    protocol::ok(msg_id, serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct StammeringParams {
    source_sentence: String,
    translated_sentence: String,
}

fn handle_stammering(msg_id: &str, params: &Value) -> anyhow::Result<Value> {
    let p: StammeringParams = parse_params("stammering", params)?;
    let check = stammering::check_translation(&p.source_sentence, &p.translated_sentence)
        .context("Failed to check for stammering")?;
    protocol::ok(msg_id, check)
}
