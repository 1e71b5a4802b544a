// embeddings/ — Local sentence embedding engine using candle (pure Rust).
//
// Provides:
// - Model download + SHA256 verification
// - BERT inference with mean pooling
// - Sentence normalization before embedding

pub mod download;
pub mod engine;
pub mod text_prep;

/// Anything that turns a sentence into a fixed-size vector.
///
/// The store and retrieval code only see this trait, so vectors from one model
/// are tagged with `model_name()` and never mixed with another's.
pub trait Embedder {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Batch embed multiple texts. Returns one embedding per text.
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        // One at a time: at a few ms per sentence this is fast enough for pair batches.
        texts.iter().map(|t| self.embed(t)).collect()
    }
}
