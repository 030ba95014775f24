//! Free-text location → coordinates cache.
//!
//! Keys are normalized (trimmed, whitespace collapsed, lower-cased) so
//! `"San Francisco"` and `" san  francisco "` share one entry. Entries
//! never expire within the process lifetime.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A resolved location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationCoordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Canonical name as reported by the resolver.
    pub display_name: String,
}

#[derive(Debug, Default)]
pub struct LocationCache {
    entries: DashMap<String, LocationCoordinates>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a free-text location into a cache key.
    pub fn normalize_key(query: &str) -> String {
        query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn get(&self, query: &str) -> Option<LocationCoordinates> {
        let key = Self::normalize_key(query);
        let hit = self.entries.get(&key).map(|e| e.value().clone());
        if hit.is_some() {
            tracing::debug!("location cache hit: {key}");
        }
        hit
    }

    pub fn insert(&self, query: &str, coords: LocationCoordinates) {
        let key = Self::normalize_key(query);
        if key.is_empty() {
            return;
        }
        self.entries.insert(key, coords);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
