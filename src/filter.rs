//! Category filter table: category -> allowed backdrop values.
//!
//! Loaded once at startup and read-only afterwards. An empty allowed set for
//! a category means "no filtering".

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashMap;
use std::path::Path;

use crate::types::Item;

/// Lowercase + trim, applied to every key and value.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct CategoryFilter {
    allowed: FxHashMap<String, FxHashSet<String>>,
    /// Normalized category keys in sorted order, for deterministic batching.
    categories: Vec<String>,
}

impl CategoryFilter {
    pub fn from_map<I, K, V, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
        for (category, values) in entries {
            let key = normalize(category.as_ref());
            if key.is_empty() {
                continue;
            }
            let set = allowed.entry(key).or_default();
            set.extend(
                values
                    .into_iter()
                    .map(|v| normalize(v.as_ref()))
                    .filter(|v| !v.is_empty()),
            );
        }
        let mut categories: Vec<String> = allowed.keys().cloned().collect();
        categories.sort();
        Self {
            allowed,
            categories,
        }
    }

    /// Load `{"category": ["backdrop", ...], ...}` from a JSON file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading category filter {:?}", path))?;
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(&contents)
            .with_context(|| format!("parsing category filter {:?}", path))?;
        let filter = Self::from_map(raw);
        tracing::info!(
            "📂 Loaded {} categories from {:?}",
            filter.len(),
            path
        );
        Ok(filter)
    }

    /// Category keys, normalized and sorted.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Allowed backdrop values for a category, if it has a non-empty set.
    pub fn allowed(&self, category: &str) -> Option<&FxHashSet<String>> {
        self.allowed
            .get(&normalize(category))
            .filter(|set| !set.is_empty())
    }

    /// Inclusion test for an item found under `category`.
    ///
    /// Categories with no (or an empty) allowed set pass everything. Otherwise
    /// the item's backdrop must be in the set; items without one are dropped.
    pub fn allows(&self, category: &str, item: &Item) -> bool {
        match self.allowed(category) {
            None => true,
            Some(set) => item
                .backdrop()
                .map(|b| set.contains(&normalize(b)))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attribute;

    fn item(backdrop: Option<&str>) -> Item {
        Item {
            id: "1".into(),
            name: "Toy Bear".into(),
            number: None,
            price: Some("1".into()),
            floor_price: None,
            category: "toy bear".into(),
            attributes: backdrop
                .map(|b| vec![Attribute::new("backdrop", b)])
                .unwrap_or_default(),
            owner_ref: None,
        }
    }

    fn table() -> CategoryFilter {
        CategoryFilter::from_map(vec![
            (" Toy Bear ", vec!["Onyx Black ", "GOLD"]),
            ("Plush Pepe", vec![]),
        ])
    }

    #[test]
    fn test_keys_and_values_normalized() {
        let filter = table();
        assert_eq!(filter.categories(), &["plush pepe", "toy bear"]);
        let set = filter.allowed("TOY BEAR").unwrap();
        assert!(set.contains("onyx black"));
        assert!(set.contains("gold"));
    }

    #[test]
    fn test_inclusion_on_backdrop() {
        let filter = table();
        assert!(filter.allows("toy bear", &item(Some("Onyx Black"))));
        assert!(!filter.allows("toy bear", &item(Some("Red"))));
        assert!(!filter.allows("toy bear", &item(None)));
    }

    #[test]
    fn test_empty_set_and_unknown_category_pass_through() {
        let filter = table();
        assert!(filter.allows("plush pepe", &item(Some("anything"))));
        assert!(filter.allows("unknown", &item(None)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("category_filter_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"Toy Bear": ["Black"], "Lol Pop": []}"#).unwrap();
        let filter = CategoryFilter::load_from(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(filter.len(), 2);
        assert!(filter.allows("toy bear", &item(Some("black"))));
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        assert!(CategoryFilter::load_from("/nonexistent/filter.json").is_err());
    }
}
