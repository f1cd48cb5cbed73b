//! Registry of applied indexes.

use super::patterns::QueryPattern;
use ahash::RandomState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// An index created for a frequent query pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedIndex {
    pub pattern: QueryPattern,
    pub created_at: DateTime<Utc>,
    /// Pattern frequency that triggered the index
    pub observed_queries: usize,
}

/// Set of applied indexes keyed by pattern.
#[derive(Debug)]
pub struct IndexRegistry {
    indexes: DashMap<QueryPattern, AppliedIndex, RandomState>,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self {
            indexes: DashMap::with_hasher(RandomState::new()),
        }
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index for `pattern`; returns false if one already exists.
    pub fn apply(&self, pattern: QueryPattern, observed_queries: usize, now: DateTime<Utc>) -> bool {
        let mut created = false;
        self.indexes.entry(pattern.clone()).or_insert_with(|| {
            created = true;
            AppliedIndex {
                pattern,
                created_at: now,
                observed_queries,
            }
        });
        created
    }

    pub fn contains(&self, pattern: &QueryPattern) -> bool {
        self.indexes.contains_key(pattern)
    }

    /// Applied indexes ordered by pattern.
    pub fn indexes(&self) -> Vec<AppliedIndex> {
        let mut all: Vec<_> = self.indexes.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        all
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}
