//! Category resolver: maps free-text category words onto canonical categories.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::similarity::{cosine_similarity, embed_text};
use crate::types::FinResult;

/// Minimum similarity for a fuzzy match.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "Food & Drinks",
        &[
            "food", "drinks", "restaurant", "restaurants", "eating out", "dining", "lunch",
            "dinner", "coffee", "cafe", "bar",
        ],
    ),
    (
        "Shopping",
        &["clothes", "clothing", "shoes", "online shopping", "mall"],
    ),
    (
        "Transportation",
        &["transport", "uber", "taxi", "bus", "metro", "fuel", "gas", "parking", "car"],
    ),
    ("Home", &["rent", "furniture", "house", "household"]),
    (
        "Bills & Utilities",
        &["bills", "utilities", "electricity", "water", "internet", "phone"],
    ),
    (
        "Entertainment",
        &["movies", "cinema", "netflix", "games", "concerts", "fun"],
    ),
    (
        "Health",
        &["doctor", "pharmacy", "medicine", "gym", "fitness", "dentist"],
    ),
    (
        "Education",
        &["courses", "books", "school", "tuition", "university"],
    ),
    (
        "Travel",
        &["flights", "hotel", "hotels", "vacation", "trips", "airbnb"],
    ),
    ("Groceries", &["grocery", "supermarket", "market"]),
    ("Others", &["other", "misc", "miscellaneous"]),
];

/// A resolved category with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMatch {
    pub canonical: String,
    pub score: f32,
}

/// Outcome of resolving one user term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub original: String,
    pub canonical: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct Candidate {
    canonical: String,
    embedding: Vec<f32>,
}

/// Resolves user-provided category names using exact synonyms, then trigram similarity.
#[derive(Debug, Clone)]
pub struct CategoryResolver {
    synonyms: BTreeMap<String, Vec<String>>,
    threshold: f32,
    index: Vec<Candidate>,
}

impl Default for CategoryResolver {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CategoryResolver {
    /// An empty resolver. It resolves nothing until categories are added.
    pub fn new(threshold: f32) -> Self {
        Self {
            synonyms: BTreeMap::new(),
            threshold,
            index: Vec::new(),
        }
    }

    /// A resolver seeded with the common finance categories.
    pub fn with_defaults() -> Self {
        let synonyms = DEFAULT_SYNONYMS
            .iter()
            .map(|(canonical, words)| {
                (
                    canonical.to_string(),
                    words.iter().map(|w| w.to_string()).collect(),
                )
            })
            .collect();
        let mut resolver = Self::new(DEFAULT_THRESHOLD);
        resolver.synonyms = synonyms;
        resolver.rebuild_index();
        resolver
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn canonical_names(&self) -> impl Iterator<Item = &str> {
        self.synonyms.keys().map(String::as_str)
    }

    pub fn synonyms(&self) -> &BTreeMap<String, Vec<String>> {
        &self.synonyms
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .synonyms
            .iter()
            .flat_map(|(canonical, words)| {
                std::iter::once(canonical.as_str())
                    .chain(words.iter().map(String::as_str))
                    .map(move |text| Candidate {
                        canonical: canonical.clone(),
                        embedding: embed_text(text),
                    })
            })
            .collect();
    }

    /// Replace the synonym table with the JSON file `{canonical: [synonyms]}`.
    pub fn load_synonyms(&mut self, path: &Path) -> FinResult<()> {
        let data = std::fs::read_to_string(path)?;
        self.synonyms = serde_json::from_str(&data)?;
        self.rebuild_index();
        info!(
            path = %path.display(),
            categories = self.synonyms.len(),
            "loaded category synonyms"
        );
        Ok(())
    }

    pub fn save_synonyms(&self, path: &Path) -> FinResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.synonyms)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn find_canonical(&self, name: &str) -> Option<String> {
        self.synonyms
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Add a canonical category. Existing names (any case) are left alone.
    pub fn add_canonical(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() || self.find_canonical(name).is_some() {
            return;
        }
        self.synonyms.insert(name.to_string(), Vec::new());
        self.rebuild_index();
    }

    pub fn add_synonym(&mut self, canonical: &str, synonym: &str) {
        let key = self
            .find_canonical(canonical)
            .unwrap_or_else(|| canonical.trim().to_string());
        let words = self.synonyms.entry(key).or_default();
        if !words.iter().any(|w| w.eq_ignore_ascii_case(synonym)) {
            words.push(synonym.to_string());
        }
        self.rebuild_index();
    }

    /// Add every category present in the dataset.
    pub fn extend_from_dataset<S: AsRef<str>>(&mut self, categories: &[S]) {
        let before = self.synonyms.len();
        for name in categories {
            let name = name.as_ref().trim();
            if !name.is_empty() && self.find_canonical(name).is_none() {
                self.synonyms.insert(name.to_string(), Vec::new());
            }
        }
        if self.synonyms.len() != before {
            self.rebuild_index();
            debug!(added = self.synonyms.len() - before, "extended categories from dataset");
        }
    }

    /// Resolve one term. Exact (case-insensitive) matches score 1.0.
    pub fn resolve(&self, input: &str) -> Option<CategoryMatch> {
        let input = input.trim();
        if input.is_empty() || self.synonyms.is_empty() {
            return None;
        }

        for (canonical, words) in &self.synonyms {
            if canonical.eq_ignore_ascii_case(input)
                || words.iter().any(|w| w.eq_ignore_ascii_case(input))
            {
                return Some(CategoryMatch {
                    canonical: canonical.clone(),
                    score: 1.0,
                });
            }
        }

        let query = embed_text(input);
        let best = self
            .index
            .iter()
            .map(|c| (c, cosine_similarity(&query, &c.embedding)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        if best.1 >= self.threshold {
            Some(CategoryMatch {
                canonical: best.0.canonical.clone(),
                score: best.1,
            })
        } else {
            debug!(input, best = best.1, "no category above threshold");
            None
        }
    }

    pub fn resolve_all<S: AsRef<str>>(&self, inputs: &[S]) -> Vec<Resolution> {
        inputs
            .iter()
            .map(|input| {
                let original = input.as_ref().to_string();
                match self.resolve(&original) {
                    Some(m) => Resolution {
                        original,
                        canonical: Some(m.canonical),
                        score: m.score,
                    },
                    None => Resolution {
                        original,
                        canonical: None,
                        score: 0.0,
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_synonym_scores_one() {
        let r = CategoryResolver::with_defaults();
        let m = r.resolve("food").unwrap();
        assert_eq!(m.canonical, "Food & Drinks");
        assert_eq!(m.score, 1.0);

        let m = r.resolve("GROCERIES").unwrap();
        assert_eq!(m.canonical, "Groceries");
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn test_every_synonym_resolves_to_its_canonical() {
        let r = CategoryResolver::with_defaults();
        for (canonical, words) in r.synonyms() {
            for w in words {
                let m = r.resolve(w).unwrap();
                assert_eq!(&m.canonical, canonical, "synonym {w}");
                assert_eq!(m.score, 1.0);
            }
        }
    }

    #[test]
    fn test_fuzzy_match() {
        let r = CategoryResolver::with_defaults();
        let m = r.resolve("grocries").unwrap();
        assert_eq!(m.canonical, "Groceries");
        assert!(m.score >= DEFAULT_THRESHOLD && m.score < 1.0);
    }

    #[test]
    fn test_no_match_below_threshold() {
        let r = CategoryResolver::with_defaults();
        assert!(r.resolve("xyzzy").is_none());
        assert!(r.resolve("").is_none());
        assert!(CategoryResolver::new(DEFAULT_THRESHOLD).resolve("food").is_none());
    }

    #[test]
    fn test_add_synonym_no_duplicates() {
        let mut r = CategoryResolver::new(DEFAULT_THRESHOLD);
        r.add_synonym("Pets", "dog food");
        r.add_synonym("pets", "Dog Food");
        r.add_canonical("PETS");
        assert_eq!(r.synonyms().len(), 1);
        assert_eq!(r.synonyms()["Pets"], vec!["dog food".to_string()]);
        assert_eq!(r.resolve("dog food").unwrap().canonical, "Pets");
    }

    #[test]
    fn test_extend_from_dataset() {
        let mut r = CategoryResolver::with_defaults();
        let before = r.synonyms().len();
        r.extend_from_dataset(&["Gifts", "groceries", "Gifts"]);
        assert_eq!(r.synonyms().len(), before + 1);
        assert_eq!(r.resolve("gifts").unwrap().canonical, "Gifts");
    }

    #[test]
    fn test_synonyms_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synonyms.json");

        let mut r = CategoryResolver::new(DEFAULT_THRESHOLD);
        r.add_synonym("Pets", "vet");
        r.save_synonyms(&path).unwrap();

        let mut loaded = CategoryResolver::with_defaults();
        loaded.load_synonyms(&path).unwrap();
        assert_eq!(loaded.synonyms().len(), 1);
        assert_eq!(loaded.resolve("vet").unwrap().canonical, "Pets");
        assert!(loaded.resolve("food").is_none());
    }

    #[test]
    fn test_resolve_all_keeps_order() {
        let r = CategoryResolver::with_defaults();
        let out = r.resolve_all(&["uber", "xyzzy"]);
        assert_eq!(out[0].canonical.as_deref(), Some("Transportation"));
        assert_eq!(out[1].canonical, None);
        assert_eq!(out[1].original, "xyzzy");
    }
}
