//! Seedable offline provider.
//!
//! Embeddings are feature-hashed bags of words: each lowercased token is
//! hashed with SHA-256 (salted by the seed) into a bucket and a sign, and the
//! accumulated vector is L2-normalized. Texts sharing vocabulary therefore
//! land close together, which is all the cache and context scenarios need.
//!
//! Generation is a canonicalizing rewrite: stopwords dropped, tokens
//! lowercased, output capped at `max_tokens`. Two paraphrases built from the
//! same content words rewrite to overlapping token sets.

use sha2::{Digest, Sha256};

use super::{Embedding, GenerateOptions, Generation, Provider, ProviderError, ProviderUsage, count_tokens};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "to", "in", "on", "for", "and", "or", "is", "are", "was", "be",
    "me", "my", "i", "you", "your", "it", "what", "how", "can", "could", "please", "tell",
    "about", "explain", "describe", "give", "some", "do", "does", "with", "regarding",
];

/// Deterministic stand-in for a hosted model.
#[derive(Debug, Clone)]
pub struct DeterministicProvider {
    seed: u64,
    dimension: usize,
}

impl DeterministicProvider {
    #[must_use]
    pub fn new(seed: u64, dimension: usize) -> Self {
        Self {
            seed,
            dimension: dimension.max(1),
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let mut idx = [0_u8; 8];
        idx.copy_from_slice(&digest[..8]);
        let bucket = usize::try_from(u64::from_le_bytes(idx) % self.dimension as u64).unwrap_or(0);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

/// Lowercased content words with stopwords removed.
#[must_use]
pub fn content_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

impl Provider for DeterministicProvider {
    fn name(&self) -> &str {
        "deterministic"
    }

    fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in content_words(text) {
            let (bucket, sign) = self.bucket(&token);
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(Embedding {
            vector,
            usage: ProviderUsage {
                calls: 1,
                prompt_tokens: count_tokens(text) as u64,
                completion_tokens: 0,
            },
        })
    }

    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation, ProviderError> {
        if options.max_tokens == 0 {
            return Err(ProviderError::Rejected {
                details: "max_tokens must be > 0".to_string(),
            });
        }
        let words = content_words(prompt);
        let text = words
            .into_iter()
            .take(options.max_tokens)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Generation {
            usage: ProviderUsage {
                calls: 1,
                prompt_tokens: count_tokens(prompt) as u64,
                completion_tokens: count_tokens(&text) as u64,
            },
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let p = DeterministicProvider::new(7, 64);
        let a = p.embed("ledger reconciliation failed").unwrap();
        let b = p.embed("ledger reconciliation failed").unwrap();
        assert_eq!(a.vector, b.vector);
        let norm: f32 = a.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_is_closer_than_disjoint() {
        let p = DeterministicProvider::new(7, 128);
        let base = p.embed("database replication lag alert").unwrap().vector;
        let para = p.embed("explain the replication lag alert of the database").unwrap().vector;
        let other = p.embed("quarterly marketing budget forecast").unwrap().vector;
        assert!(cosine(&base, &para) > cosine(&base, &other));
    }

    #[test]
    fn seed_changes_embedding() {
        let a = DeterministicProvider::new(1, 64).embed("alpha beta").unwrap();
        let b = DeterministicProvider::new(2, 64).embed("alpha beta").unwrap();
        assert_ne!(a.vector, b.vector);
    }

    #[test]
    fn generate_strips_stopwords_and_respects_budget() {
        let p = DeterministicProvider::new(0, 8);
        let out = p
            .generate(
                "Please explain the replication lag on the primary cluster",
                &GenerateOptions {
                    max_tokens: 3,
                    temperature: 0.0,
                },
            )
            .unwrap();
        assert_eq!(out.text, "replication lag primary");
        assert_eq!(out.usage.completion_tokens, 3);
    }

    #[test]
    fn zero_token_budget_rejected() {
        let p = DeterministicProvider::new(0, 8);
        let err = p
            .generate(
                "anything",
                &GenerateOptions {
                    max_tokens: 0,
                    temperature: 0.0,
                },
            )
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
