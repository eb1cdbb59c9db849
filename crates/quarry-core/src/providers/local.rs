//! Deterministic local embeddings.
//!
//! Hashed bag-of-words vectors: every token is hashed into one of `dim`
//! buckets and the bucket counts are L2-normalized. Overlapping vocabulary
//! between two texts yields proportional cosine similarity, which makes the
//! provider useful for offline deployments and deterministic tests. No
//! network, no credentials.

use async_trait::async_trait;

use super::EmbeddingClient;
use crate::error::Result;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a. Stable across platforms and releases, which keeps persisted
/// vectors comparable over time.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Local hashed bag-of-words embedding provider.
#[derive(Debug, Clone)]
pub struct HashedEmbeddings {
    dim: usize,
}

impl HashedEmbeddings {
    /// Create a provider with the given dimension.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        (fnv1a(token.as_bytes()) % self.dim as u64) as usize
    }

    /// Embed a single text.
    #[must_use]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl EmbeddingClient for HashedEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model(&self) -> &str {
        "hashed-bow"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_deterministic() {
        let provider = HashedEmbeddings::new(128);
        let a = provider.embed(&["hello world".to_string()]).await.unwrap();
        let b = provider.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 128);
    }

    #[tokio::test]
    async fn test_overlap_drives_similarity() {
        let provider = HashedEmbeddings::new(256);
        let anchor = provider.embed_one("pregnant women should not take it");
        let related = provider.embed_one("can pregnant women take aspirin");
        let unrelated = provider.embed_one("quarterly revenue grew four percent");
        assert!(cosine(&anchor, &related) > cosine(&anchor, &unrelated));
        assert!(cosine(&anchor, &related) > 0.5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let provider = HashedEmbeddings::new(16);
        let vector = provider.embed_one("");
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_normalized() {
        let provider = HashedEmbeddings::new(64);
        let vector = provider.embed_one("one two three four");
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
