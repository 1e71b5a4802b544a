// engine.rs — Candle BERT embedding engine with attention-mask-aware mean pooling.
//
// Loads a sentence-transformers BERT checkpoint (all-MiniLM-L6-v2 by default) from safetensors
// and produces L2-normalized sentence embeddings.

use std::path::Path;

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::config;
use crate::embeddings::Embedder;

/// The embedding engine holds the loaded model and tokenizer.
pub struct EmbeddingEngine {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_name: String,
    dims: usize,
}

impl EmbeddingEngine {
    /// Load the model from a local directory containing model.safetensors,
    /// tokenizer.json, and config.json.
    pub fn load(model_dir: &Path, model_name: &str) -> anyhow::Result<Self> {
        let device = Device::Cpu;

        let config_path = model_dir.join("config.json");
        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("read {}", config_path.display()))?;
        let bert_config: BertConfig = serde_json::from_str(&config_str)
            .with_context(|| format!("parse {}", config_path.display()))?;

        log::info!(
            "Loading embedding model {}: hidden_size={}, layers={}, heads={}",
            model_name,
            bert_config.hidden_size,
            bert_config.num_hidden_layers,
            bert_config.num_attention_heads,
        );

        check_model_dims(model_name, bert_config.hidden_size)?;

        let weights_path = model_dir.join("model.safetensors");
        // SAFETY: the weights file is not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.clone()], DType::F32, &device)
                .with_context(|| format!("load weights from {}", weights_path.display()))?
        };

        let model = BertModel::load(vb, &bert_config).context("load BERT model")?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;

        log::info!("Embedding model loaded successfully (dims={})", bert_config.hidden_size);

        Ok(Self {
            model,
            tokenizer,
            device,
            model_name: model_name.to_string(),
            dims: bert_config.hidden_size,
        })
    }

    /// Generate a sentence embedding of `dims()` dimensions.
    pub fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dims]);
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let max_len = config::embedding::MAX_TOKENS;
        let len = encoding.get_ids().len().min(max_len);
        let token_ids = &encoding.get_ids()[..len];
        let attention_mask = &encoding.get_attention_mask()[..len];

        // [1, seq_len]
        let token_ids_t = Tensor::new(
            token_ids.iter().map(|&id| id as i64).collect::<Vec<_>>().as_slice(),
            &self.device,
        )?
        .unsqueeze(0)?;

        let attention_mask_t = Tensor::new(
            attention_mask.iter().map(|&m| m as i64).collect::<Vec<_>>().as_slice(),
            &self.device,
        )?
        .unsqueeze(0)?;

        let token_type_ids = token_ids_t.zeros_like()?;

        // [1, seq_len, hidden_size]
        let output = self
            .model
            .forward(&token_ids_t, &token_type_ids, Some(&attention_mask_t))?;

        let embedding = mean_pooling(&output, &attention_mask_t)?;
        let embedding = l2_normalize(&embedding)?;

        let emb_vec: Vec<f32> = embedding.squeeze(0)?.to_vec1()?;

        if emb_vec.len() != self.dims {
            bail!(
                "unexpected embedding dims: got {}, expected {}",
                emb_vec.len(),
                self.dims
            );
        }

        Ok(emb_vec)
    }
}

impl Embedder for EmbeddingEngine {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_text(text)
    }
}

/// The default model has a known width; a config that disagrees means the wrong files were cached.
fn check_model_dims(model_name: &str, hidden_size: usize) -> anyhow::Result<()> {
    if model_name == config::embedding::DEFAULT_MODEL_NAME && hidden_size != config::embedding::EMBEDDING_DIMS {
        bail!(
            "model {} should have hidden_size {}, but its config.json says {}",
            model_name,
            config::embedding::EMBEDDING_DIMS,
            hidden_size
        );
    }
    Ok(())
}

/// Attention-mask-aware mean pooling.
///
/// input_embeds: [batch, seq_len, hidden_size]
/// attention_mask: [batch, seq_len] (1 for real tokens, 0 for padding)
/// output: [batch, hidden_size]
fn mean_pooling(input_embeds: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor> {
    let mask_expanded = attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(input_embeds.shape())?;

    let sum_embeddings = (input_embeds * &mask_expanded)?.sum(1)?;

    // Clamp to avoid div by zero on an all-padding row.
    let sum_mask = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;

    Ok((sum_embeddings / sum_mask)?)
}

/// L2 normalize a tensor along the last dimension.
fn l2_normalize(tensor: &Tensor) -> anyhow::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm = norm.clamp(1e-12, f64::MAX)?;
    Ok(tensor.broadcast_div(&norm)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pooling_ignores_padding() {
        let device = Device::Cpu;
        // batch=1, seq=3, hidden=2; the last token is padding.
        let embeds = Tensor::new(&[[[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]]], &device).unwrap();
        let mask = Tensor::new(&[[1i64, 1, 0]], &device).unwrap();

        let pooled: Vec<f32> = mean_pooling(&embeds, &mask).unwrap().squeeze(0).unwrap().to_vec1().unwrap();
        assert_eq!(pooled, vec![2.0, 3.0]);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let device = Device::Cpu;
        let t = Tensor::new(&[[3.0f32, 4.0]], &device).unwrap();
        let v: Vec<f32> = l2_normalize(&t).unwrap().squeeze(0).unwrap().to_vec1().unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_default_model_dims_are_checked() {
        let default = config::embedding::DEFAULT_MODEL_NAME;
        assert!(check_model_dims(default, config::embedding::EMBEDDING_DIMS).is_ok());
        assert!(check_model_dims(default, 768).is_err());
        // Custom models report their own width.
        assert!(check_model_dims("custom-mpnet", 768).is_ok());
    }

    #[test]
    fn test_load_fails_without_model_files() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(EmbeddingEngine::load(tmp.path(), config::embedding::DEFAULT_MODEL_NAME).is_err());
    }
}
