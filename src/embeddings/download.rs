// download.rs — Model file download with SHA256 verification.
//
// Downloads model weights on first use and caches them in the configured model directory.
// Files are verified against known SHA256 hashes to ensure integrity.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};

use crate::config::{self, Settings};

pub const MODEL_FILES: [&str; 3] = ["model.safetensors", "tokenizer.json", "config.json"];

/// Check if all required model files exist in `dir`.
pub fn model_files_exist(dir: &Path) -> bool {
    MODEL_FILES.iter().all(|f| dir.join(f).exists())
}

fn pinned_sha256(file_name: &str) -> Option<&'static str> {
    match file_name {
        "model.safetensors" => Some(config::embedding::MODEL_SAFETENSORS_SHA256),
        "tokenizer.json" => Some(config::embedding::TOKENIZER_JSON_SHA256),
        "config.json" => Some(config::embedding::CONFIG_JSON_SHA256),
        _ => None,
    }
}

/// Download all model files if not already cached. Returns the model directory path.
pub fn ensure_model_files(settings: &Settings) -> anyhow::Result<PathBuf> {
    let dir = settings.model_dir.clone();

    if model_files_exist(&dir) {
        log::info!("Model files already cached at {}", dir.display());
        return Ok(dir);
    }

    if !settings.model_download {
        bail!(
            "model files missing in {} and downloads are disabled (RAG_MODEL_DOWNLOAD)",
            dir.display()
        );
    }

    if !settings.is_default_model() {
        bail!(
            "no pinned download for model '{}'; place {} in {}",
            settings.model_name,
            MODEL_FILES.join(", "),
            dir.display()
        );
    }

    log::info!("Downloading embedding model to {}", dir.display());
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create model dir {}", dir.display()))?;

    for file_name in MODEL_FILES {
        let dest = dir.join(file_name);
        if dest.exists() {
            continue;
        }
        let expected = pinned_sha256(file_name).context("missing pinned hash")?;
        download_and_verify(&format!("{}/{file_name}", settings.model_base_url), &dest, expected)?;
    }

    log::info!("Model download complete");
    Ok(dir)
}

/// Download a file from URL and verify its SHA256 hash.
fn download_and_verify(url: &str, dest: &Path, expected_sha256: &str) -> anyhow::Result<()> {
    let filename = dest.file_name().unwrap_or_default().to_string_lossy();
    log::info!("Downloading {} from {}", filename, url);

    let resp = ureq::get(url)
        .timeout(std::time::Duration::from_secs(config::embedding::DOWNLOAD_TIMEOUT_SECS))
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    let status = resp.status();
    if status != 200 {
        bail!("HTTP {status} downloading {url}");
    }

    // Read body into memory (model is ~87 MB, fits in RAM)
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .with_context(|| format!("failed to read response body for {url}"))?;

    verify_sha256(&body, expected_sha256).with_context(|| format!("integrity check failed for {filename}"))?;
    log::info!("SHA256 verified for {} ({})", filename, &expected_sha256[..12]);

    // Write atomically: write to .tmp, then rename
    let tmp_path = dest.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(&body)?;
    file.flush()?;
    drop(file);

    fs::rename(&tmp_path, dest)
        .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), dest.display()))?;

    Ok(())
}

fn verify_sha256(body: &[u8], expected_sha256: &str) -> anyhow::Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let actual_hash = hex::encode(hasher.finalize());

    if !actual_hash.eq_ignore_ascii_case(expected_sha256) {
        bail!("SHA256 mismatch: expected {}, got {}", expected_sha256, actual_hash);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(dir: &Path, download: bool, model: &str) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            log_dir: dir.join("logs"),
            log_level: "info".into(),
            model_name: model.into(),
            model_dir: dir.join("model"),
            model_base_url: "http://127.0.0.1:9".into(),
            model_download: download,
        }
    }

    #[test]
    fn test_verify_sha256() {
        // sha256("abc")
        let abc = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(verify_sha256(b"abc", abc).is_ok());
        assert!(verify_sha256(b"abd", abc).is_err());
    }

    #[test]
    fn test_cached_files_skip_download() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_for(tmp.path(), false, config::embedding::DEFAULT_MODEL_NAME);
        fs::create_dir_all(&settings.model_dir).unwrap();
        for f in MODEL_FILES {
            fs::write(settings.model_dir.join(f), b"x").unwrap();
        }
        assert!(model_files_exist(&settings.model_dir));
        assert_eq!(ensure_model_files(&settings).unwrap(), settings.model_dir);
    }

    #[test]
    fn test_missing_files_with_downloads_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_for(tmp.path(), false, config::embedding::DEFAULT_MODEL_NAME);
        let err = ensure_model_files(&settings).unwrap_err();
        assert!(err.to_string().contains("downloads are disabled"));
    }

    #[test]
    fn test_custom_model_is_never_downloaded() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_for(tmp.path(), true, "my-model");
        let err = ensure_model_files(&settings).unwrap_err();
        assert!(err.to_string().contains("no pinned download"));
    }
}
