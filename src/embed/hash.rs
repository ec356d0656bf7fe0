use super::EmbeddingProvider;
use crate::error::ProviderError;
use async_trait::async_trait;

/// Deterministic offline embedder: signed feature hashing of lowercase word tokens,
/// L2-normalized. No model, no network; texts sharing words land close together.
pub struct HashProvider {
    id: String,
    dimensions: usize,
}

impl HashProvider {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            id: format!("hash/{dimensions}"),
            dimensions,
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        } else {
            vector[0] = 1.0;
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_deterministic_and_normalized() {
        let p = HashProvider::new(64);
        let a = p.embed_text("The quick brown fox");
        let b = p.embed_text("the QUICK brown fox");
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_are_closer() {
        let p = HashProvider::new(256);
        let fox = p.embed_text("brown fox jumps");
        let fox2 = p.embed_text("a brown fox sleeps");
        let tax = p.embed_text("quarterly tax filing deadline");
        assert!(dot(&fox, &fox2) > dot(&fox, &tax));
    }

    #[test]
    fn test_empty_text_is_unit() {
        let v = HashProvider::new(8).embed_text("");
        assert_eq!(v[0], 1.0);
        assert_eq!(v.iter().filter(|x| **x != 0.0).count(), 1);
    }
}
