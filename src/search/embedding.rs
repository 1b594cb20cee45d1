//! Deterministic feature-hashing text embedder.
//!
//! Features are lowercase word tokens plus padded character trigrams of each
//! token. Each feature is hashed with SHA-256 into one of `dimensions`
//! buckets with weight `1 + ln(tf)`, and the vector is L2 normalized. All
//! components are non-negative, so the dot product of two embeddings is a
//! cosine similarity in [0, 1].

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for feature in features(text) {
            *counts.entry(feature).or_default() += 1;
        }

        let mut vector = vec![0f32; self.dimensions];
        for (feature, tf) in counts {
            vector[self.bucket(&feature)] += 1.0 + (tf as f32).ln();
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % self.dimensions as u64) as usize
    }
}

/// Dot product; equals cosine for normalized embeddings
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>().clamp(0.0, 1.0)
}

fn features(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut out = Vec::new();

    for token in TOKEN.find_iter(&lowered).map(|m| m.as_str()) {
        out.push(format!("w:{}", token));

        let padded: Vec<char> = std::iter::once('#')
            .chain(token.chars())
            .chain(std::iter::once('#'))
            .collect();
        for window in padded.windows(3) {
            out.push(format!("c:{}", window.iter().collect::<String>()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_normalized() {
        let e = HashingEmbedder::new(384);
        let v = e.embed("Database connection pool exhausted");
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(v.iter().all(|x| *x >= 0.0));
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let a = HashingEmbedder::new(64);
        let b = HashingEmbedder::new(64);
        assert_eq!(a.embed("DB timeout"), b.embed("db TIMEOUT"));
    }

    #[test]
    fn test_related_texts_score_higher() {
        let e = HashingEmbedder::new(384);
        let query = e.embed("database timeout");
        let related = e.embed("DB timeout");
        let unrelated = e.embed("TLS certificate expired");

        let near = cosine(&query, &related);
        let far = cosine(&query, &unrelated);
        assert!(near > 0.3, "near = {}", near);
        assert!(near > far);
    }

    #[test]
    fn test_empty_text() {
        let e = HashingEmbedder::new(16);
        let v = e.embed("  -- ");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine(&v, &e.embed("anything")), 0.0);
    }
}
