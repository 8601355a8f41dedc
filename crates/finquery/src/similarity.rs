//! Hashed character-trigram embeddings and cosine similarity.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Dimensionality of text embeddings.
pub const EMBEDDING_DIM: usize = 512;

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Embed text as an L2-normalized bag of character trigrams.
///
/// Empty or punctuation-only text gives the zero vector.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut embedding = vec![0.0f32; EMBEDDING_DIM];
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return embedding;
    }

    let padded: Vec<char> = format!("  {normalized} ").chars().collect();
    for window in padded.windows(3) {
        let mut hasher = FnvHasher::default();
        for c in window {
            hasher.write_u32(*c as u32);
        }
        let slot = (hasher.finish() % EMBEDDING_DIM as u64) as usize;
        embedding[slot] += 1.0;
    }

    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        embedding.iter().map(|x| x / norm).collect()
    } else {
        embedding
    }
}

/// Cosine of the angle between two embeddings.
///
/// Mismatched lengths, empty input and zero vectors all score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f64, 0.0f64, 0.0f64), |(dot, na, nb), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (dot + x * y, na + x * x, nb + y * y)
        });
    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrelated_categories_score_low() {
        let groceries = embed_text("Groceries");
        assert!((cosine_similarity(&groceries, &embed_text("GROCERIES")) - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&groceries, &embed_text("Salary")) < 0.3);
        assert_eq!(cosine_similarity(&groceries, &embed_text("")), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let e = embed_text("Groceries");
        assert_eq!(e.len(), EMBEDDING_DIM);
        let norm: f32 = e.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embedding_ignores_case_and_punctuation() {
        let a = embed_text("Food & Drinks");
        let b = embed_text("food drinks");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_typo_stays_close() {
        let a = embed_text("grocries");
        let b = embed_text("groceries");
        let c = embed_text("entertainment");
        assert!(cosine_similarity(&a, &b) > 0.6);
        assert!(cosine_similarity(&a, &c) < cosine_similarity(&a, &b));
    }

    #[test]
    fn test_empty_text_is_zero() {
        assert!(embed_text("  ?! ").iter().all(|x| *x == 0.0));
    }
}
