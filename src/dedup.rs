//! Deduplication helpers for record batches.
//!
//! Two strategies are used across the pipeline:
//! - `deduplicate_retain`: drop repeats from an already-ordered batch (distinct
//!   remote ids before a bulk fetch)
//! - `DeduplicationFilter`: reject repeats while collecting (distinct rows in
//!   `MemoryDb`, the sideloader's per-bucket seen set)

use std::collections::HashSet;
use std::hash::Hash;

/// Deduplicate in place, keeping the first occurrence of each key.
///
/// # Arguments
/// * `items` - Mutable vector of items to deduplicate
/// * `key_fn` - Function that extracts the deduplication key from each item
///
/// # Example
/// ```ignore
/// let mut ids = vec![json!(1), json!(2), json!(1)];
/// deduplicate_retain(&mut ids, value_key);
/// ```
pub fn deduplicate_retain<T, F, K>(items: &mut Vec<T>, key_fn: F)
where
    F: Fn(&T) -> K,
    K: Eq + Hash,
{
    let mut seen: HashSet<K> = HashSet::new();
    items.retain(|item| seen.insert(key_fn(item)));
}

/// Check-before-adding filter.
///
/// # Example
/// ```ignore
/// let mut seen = DeduplicationFilter::new();
/// for row in rows {
///     if seen.should_process(value_key(&row["id"])) {
///         // first occurrence
///     }
/// }
/// ```
#[derive(Debug)]
pub struct DeduplicationFilter<K: Eq + Hash> {
    processed: HashSet<K>,
}

impl<K: Eq + Hash> DeduplicationFilter<K> {
    /// Create a new empty deduplication filter
    pub fn new() -> Self {
        Self {
            processed: HashSet::new(),
        }
    }

    /// Returns true if the key is new (and records it), false if it was already seen.
    pub fn should_process(&mut self, key: K) -> bool {
        self.processed.insert(key)
    }
}

impl<K: Eq + Hash> Default for DeduplicationFilter<K> {
    fn default() -> Self {
        Self::new()
    }
}
