//! In-memory vector index with cosine similarity search.
//!
//! Stores catalog item embeddings and provides exhaustive similarity scans
//! plus the score-free browse views. Result ordering is deterministic:
//! similarity descending, insertion order ascending on ties.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::catalog::CatalogItem;

/// An entry in the catalog index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Insertion sequence number, used as the stable tie-breaker
    pub seq: u64,
    pub item: CatalogItem,
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// A ranked search candidate: an item plus its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub item: CatalogItem,
    /// Similarity score in [0.0, 1.0]
    pub similarity: f32,
}

/// In-memory index over embedded catalog items.
///
/// Dimensionality is latched by the first inserted vector (or fixed up
/// front when loading from a sidecar file); every later vector must match.
#[derive(Debug)]
pub struct CatalogIndex {
    entries: HashMap<String, IndexEntry>,
    dimensions: Option<usize>,
    next_seq: u64,
}

impl CatalogIndex {
    /// Create a new empty index with dimensionality still unset.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            dimensions: None,
            next_seq: 0,
        }
    }

    /// Create an index with known dimensions and pre-allocated capacity.
    pub fn with_dimensions(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions: Some(dimensions),
            next_seq: 0,
        }
    }

    /// Dimensionality of stored vectors, if any vector has been seen.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or update an item.
    ///
    /// Updating an existing id keeps its insertion sequence, so stable
    /// ordering is preserved across updates. Returns an error if the
    /// embedding has the wrong dimensionality or zero norm.
    pub fn insert(&mut self, item: CatalogItem, embedding: Vec<f32>) -> Result<(), IndexError> {
        match self.dimensions {
            Some(expected) if embedding.len() != expected => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                });
            }
            Some(_) => {}
            None => self.dimensions = Some(embedding.len()),
        }

        let norm = l2_norm(&embedding);
        if norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let seq = match self.entries.get(&item.id) {
            Some(existing) => existing.seq,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };

        self.entries
            .insert(item.id.clone(), IndexEntry { seq, item, embedding });

        Ok(())
    }

    /// Remove an entry by item id.
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        self.entries.remove(id)
    }

    /// Get an entry by item id.
    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// All item ids in the index.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Entries in insertion order. This is the persistence order, so the
    /// relative ordering survives a save/load cycle.
    pub fn entries_ordered(&self) -> Vec<&IndexEntry> {
        let mut entries: Vec<&IndexEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Search for similar vectors using cosine similarity.
    ///
    /// Scores are clamped to [0.0, 1.0]. Results are ordered by score
    /// descending with insertion order breaking ties, then truncated to
    /// `limit`. An empty index matches nothing regardless of query shape.
    pub fn search(
        &self,
        query: &[f32],
        category: Option<&str>,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        // Non-empty index always has latched dimensions.
        let expected = self.dimensions.unwrap_or(query.len());
        if query.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut scored: Vec<(f32, u64, &IndexEntry)> = self
            .entries
            .values()
            .filter(|entry| category.map_or(true, |c| entry.item.category == c))
            .filter_map(|entry| {
                let score = cosine_similarity(query, &entry.embedding, query_norm);
                if score >= threshold {
                    Some((score, entry.seq, entry))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, _, entry)| SearchHit {
                item: entry.item.clone(),
                similarity: score,
            })
            .collect())
    }

    /// Browse items without scoring, in insertion order.
    ///
    /// Returns the requested page and the total number of items matching
    /// the category filter before pagination.
    pub fn browse(
        &self,
        category: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> (Vec<CatalogItem>, usize) {
        let mut matching: Vec<&IndexEntry> = self
            .entries
            .values()
            .filter(|entry| category.map_or(true, |c| entry.item.category == c))
            .collect();
        matching.sort_by_key(|e| e.seq);

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|entry| entry.item.clone())
            .collect();

        (page, total)
    }

    /// Distinct category names, sorted.
    pub fn categories(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .entries
            .values()
            .map(|entry| entry.item.category.as_str())
            .collect();
        set.into_iter().map(|s| s.to_string()).collect()
    }

    /// Clear all entries. Dimensionality stays latched.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for CatalogIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity clamped into [0.0, 1.0].
/// Assumes query_norm is precomputed for efficiency.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    (dot_product / (query_norm * target_norm)).clamp(0.0, 1.0)
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}
