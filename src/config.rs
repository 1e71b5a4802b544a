// IMPORTANT:
// Keep ALL numeric values centralized here (repo rule: no hardcoded numeric values scattered around).

use std::path::PathBuf;

use anyhow::{bail, Context};

// NOTE: HOST_VERSION must stay in sync with the `version` field in Cargo.toml.
pub const HOST_VERSION: &str = "0.1.0";

/// Schema version: bump ONLY when the sentence table layout or the stored vector encoding changes.
pub const SCHEMA_VERSION: u32 = 1;

pub mod logging {
    pub const LOG_FILE_NAME: &str = "rag_translate.log";
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;
}

pub mod native_messaging {
    pub const MAX_MESSAGE_SIZE_BYTES: u32 = 16 * 1024 * 1024;
}

pub mod sqlite {
    pub const DB_FILE_NAME: &str = "translations.db";

    pub const PRAGMA_BUSY_TIMEOUT_MS: i64 = 2000;
    pub const PRAGMA_CACHE_SIZE_KIB_NEG: i64 = -64000;
    pub const PRAGMA_MMAP_SIZE_BYTES: i64 = 268_435_456;
    pub const PRAGMA_WAL_AUTOCHECKPOINT_PAGES: i64 = 200_000;
}

pub mod embedding {
    pub const EMBEDDING_DIMS: usize = 384;
    pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";

    // Max word-piece tokens for all-MiniLM-L6-v2 (model context limit is 256).
    pub const MAX_TOKENS: usize = 256;

    // Word-piece tokenization expands ~1.3x, so 190 words stays under MAX_TOKENS.
    pub const MAX_WORDS: usize = 190;

    pub const MODEL_BASE_URL: &str =
        "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main";

    // SHA256 hashes for integrity verification (default model only)
    pub const MODEL_SAFETENSORS_SHA256: &str =
        "53aa51172d142c89d9012cce15ae4d6cc0ca6895895114379cacb4fab128d9db";
    pub const TOKENIZER_JSON_SHA256: &str =
        "be50c3628f2bf5bb5e3a7f17b1f74611b2561a3a27eeab05e5aa30f411572037";
    pub const CONFIG_JSON_SHA256: &str =
        "953f9c0d463486b10a6871cc2fd59f223b2c70184f49815e7efbcab5d8908b41";

    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 90;
}

pub mod retrieval {
    pub const DEFAULT_TOP_K: usize = 4;
    pub const MAX_TOP_K: usize = 100;

    // Language codes are ISO 639-1 style (at most two letters).
    pub const MAX_LANGUAGE_CODE_LEN: usize = 2;
}

pub mod stammering {
    pub const NGRAM_SIZES: &[usize] = &[2, 3];
    pub const MIN_NGRAM_REPEATS: usize = 2;

    // Same character repeated this many times in a row.
    pub const MIN_CHAR_RUN: usize = 6;
}

const DATA_DIR_REL: &str = ".rag-translate";

/// Runtime settings resolved from the environment (and `.env`, loaded by the caller).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub model_name: String,
    pub model_dir: PathBuf,
    pub model_base_url: String,
    pub model_download: bool,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match get("RAG_DATA_DIR") {
            Some(v) => PathBuf::from(v),
            None => {
                let home = get("HOME")
                    .or_else(|| get("USERPROFILE"))
                    .context("cannot determine home directory (set RAG_DATA_DIR, HOME or USERPROFILE)")?;
                PathBuf::from(home).join(DATA_DIR_REL)
            }
        };

        let log_dir = get("RAG_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));

        let log_level = get("RAG_LOG_LEVEL")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(|| logging::DEFAULT_LOG_LEVEL.to_string());

        let model_name = get("RAG_MODEL_NAME").unwrap_or_else(|| embedding::DEFAULT_MODEL_NAME.to_string());

        let model_dir = get("RAG_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models").join(&model_name));

        let model_base_url = get("RAG_MODEL_BASE_URL")
            .unwrap_or_else(|| embedding::MODEL_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let model_download = match get("RAG_MODEL_DOWNLOAD") {
            Some(v) => parse_bool(&v).with_context(|| format!("invalid RAG_MODEL_DOWNLOAD value '{v}'"))?,
            None => true,
        };

        Ok(Self {
            data_dir,
            log_dir,
            log_level,
            model_name,
            model_dir,
            model_base_url,
            model_download,
        })
    }

    pub fn is_default_model(&self) -> bool {
        self.model_name == embedding::DEFAULT_MODEL_NAME
    }
}

fn parse_bool(v: &str) -> anyhow::Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected one of 1/0/true/false/yes/no/on/off"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings_from(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_derive_from_home() {
        let s = settings_from(&[("HOME", "/home/alice")]).unwrap();
        assert_eq!(s.data_dir, PathBuf::from("/home/alice/.rag-translate"));
        assert_eq!(s.log_dir, PathBuf::from("/home/alice/.rag-translate/logs"));
        assert_eq!(s.log_level, "info");
        assert_eq!(s.model_name, "all-MiniLM-L6-v2");
        assert_eq!(
            s.model_dir,
            PathBuf::from("/home/alice/.rag-translate/models/all-MiniLM-L6-v2")
        );
        assert!(s.model_download);
        assert!(s.is_default_model());
    }

    #[test]
    fn test_overrides_and_normalization() {
        let s = settings_from(&[
            ("RAG_DATA_DIR", "/srv/rag"),
            ("RAG_LOG_LEVEL", "DEBUG"),
            ("RAG_MODEL_NAME", "paraphrase-multilingual"),
            ("RAG_MODEL_BASE_URL", "https://mirror.local/models/"),
            ("RAG_MODEL_DOWNLOAD", "no"),
        ])
        .unwrap();
        assert_eq!(s.data_dir, PathBuf::from("/srv/rag"));
        assert_eq!(s.log_level, "debug");
        assert_eq!(s.model_dir, PathBuf::from("/srv/rag/models/paraphrase-multilingual"));
        assert_eq!(s.model_base_url, "https://mirror.local/models");
        assert!(!s.model_download);
        assert!(!s.is_default_model());
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let s = settings_from(&[("RAG_DATA_DIR", "/srv/rag"), ("RAG_LOG_LEVEL", "  ")]).unwrap();
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn test_invalid_bool_is_an_error() {
        let err = settings_from(&[("RAG_DATA_DIR", "/srv/rag"), ("RAG_MODEL_DOWNLOAD", "maybe")]).unwrap_err();
        assert!(format!("{err:#}").contains("RAG_MODEL_DOWNLOAD"));
    }

    #[test]
    fn test_missing_home_without_data_dir_fails() {
        assert!(settings_from(&[]).is_err());
    }
}
