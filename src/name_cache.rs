//! Bidirectional name ↔ identifier cache.
//!
//! Names and identifiers are immutable once assigned by the store, so the
//! cache only ever grows and needs no eviction or invalidation. Both
//! directions live in one structure so an insert always updates both
//! sides; the bijection can never be broken by mutating one map and
//! forgetting the other.
//!
//! Name lookups are case-insensitive: keys are folded with ASCII
//! lowercasing, while the canonical casing (whatever the store returned
//! at insertion time) is kept for display.

use std::collections::HashMap;

use crate::types::PlayerId;

/// Fold a display name into its case-insensitive lookup key.
///
/// ASCII-only folding, matching the NOCASE collation the store uses for
/// name columns. The cache and the store must agree on which names
/// collide; with a wider folding here, a lookup's result would depend on
/// whether it was served from the cache or from the store.
#[must_use]
pub fn fold_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Bidirectional mapping between player display names and identifiers.
#[derive(Debug, Default)]
pub struct NameCache {
    by_id: HashMap<PlayerId, String>,
    by_name: HashMap<String, PlayerId>,
}

impl NameCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a (identifier, canonical name) pair, updating both sides.
    ///
    /// If either side already maps elsewhere, the stale counterpart
    /// entries are removed first so the structure stays a bijection.
    pub fn insert(&mut self, id: PlayerId, canonical_name: &str) {
        let key = fold_name(canonical_name);
        if let Some(old_name) = self.by_id.insert(id, canonical_name.to_string()) {
            let old_key = fold_name(&old_name);
            if old_key != key {
                self.by_name.remove(&old_key);
            }
        }
        if let Some(old_id) = self.by_name.insert(key, id) {
            if old_id != id {
                self.by_id.remove(&old_id);
            }
        }
    }

    /// Resolve a name (any casing) to its identifier.
    #[must_use]
    pub fn get_id(&self, name: &str) -> Option<PlayerId> {
        self.by_name.get(&fold_name(name)).copied()
    }

    /// Resolve an identifier to its canonical display name.
    #[must_use]
    pub fn get_name(&self, id: PlayerId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Number of cached pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
