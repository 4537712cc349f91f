//! Registry of item ids already acted upon during one monitoring run.

use rustc_hash::FxHashSet;
use std::sync::Mutex;

/// Insert-once set of item ids. Never shrinks during a run.
#[derive(Debug, Default)]
pub struct SeenRegistry {
    ids: Mutex<FxHashSet<String>>,
}

impl SeenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically test and insert. True only on the first sighting.
    pub fn mark_if_new(&self, item_id: &str) -> bool {
        let mut ids = match self.ids.lock() {
            Ok(guard) => guard,
            // A panic elsewhere cannot leave the set half-updated
            Err(poisoned) => poisoned.into_inner(),
        };
        if ids.contains(item_id) {
            return false;
        }
        ids.insert(item_id.to_string())
    }

    pub fn contains(&self, item_id: &str) -> bool {
        match self.ids.lock() {
            Ok(ids) => ids.contains(item_id),
            Err(poisoned) => poisoned.into_inner().contains(item_id),
        }
    }

    pub fn len(&self) -> usize {
        match self.ids.lock() {
            Ok(ids) => ids.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_first_sighting_only() {
        let seen = SeenRegistry::new();
        assert!(seen.mark_if_new("a"));
        assert!(!seen.mark_if_new("a"));
        assert!(seen.mark_if_new("b"));
        assert_eq!(seen.len(), 2);
        assert!(seen.contains("a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_admit_one_winner() {
        let seen = Arc::new(SeenRegistry::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let seen = seen.clone();
                let winners = winners.clone();
                tokio::spawn(async move {
                    for id in ["x", "y", "z"] {
                        if seen.mark_if_new(id) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 3);
        assert_eq!(seen.len(), 3);
    }
}
