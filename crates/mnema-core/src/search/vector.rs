//! Vector index for the semantic tier
//!
//! HNSW (USearch) with cosine distance when the `vector-search` feature is
//! on; an exact-scan fallback otherwise. Either way the interface is the
//! same: add, remove, threshold search.

#[cfg(not(feature = "vector-search"))]
use std::collections::HashMap;

#[cfg(feature = "vector-search")]
use std::collections::HashMap;
#[cfg(feature = "vector-search")]
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// HNSW connectivity (the `m` graph parameter)
pub const CONNECTIVITY: usize = 16;

/// HNSW expansion factor while building the index (`ef_construction`)
pub const EXPANSION_ADD: usize = 64;

/// HNSW expansion factor while searching
pub const EXPANSION_SEARCH: usize = 64;

/// Vector index error
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorIndexError {
    #[error("Index creation failed: {0}")]
    Creation(String),
    #[error("Failed to add vector: {0}")]
    Add(String),
    #[error("Search failed: {0}")]
    Search(String),
    #[error("Invalid dimensions: expected {expected}, got {got}")]
    Dimensions { expected: usize, got: usize },
}

// ============================================================================
// HNSW INDEX (vector-search feature)
// ============================================================================

/// Approximate nearest-neighbour index over fragment embeddings
#[cfg(feature = "vector-search")]
pub struct VectorIndex {
    index: Index,
    dimensions: usize,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

#[cfg(feature = "vector-search")]
impl VectorIndex {
    /// Create an empty index for the given dimensionality
    pub fn new(dimensions: usize) -> Result<Self, VectorIndexError> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };

        let index = Index::new(&options).map_err(|e| VectorIndexError::Creation(e.to_string()))?;

        Ok(Self {
            index,
            dimensions,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    /// Number of vectors currently indexed
    pub fn len(&self) -> usize {
        self.index.size()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimensionality
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Add (or replace) a vector under a fragment id
    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::Dimensions {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        if let Some(&existing) = self.key_to_id.get(key) {
            self.index
                .remove(existing)
                .map_err(|e| VectorIndexError::Add(e.to_string()))?;
            self.reserve_for(self.index.size() + 1)?;
            self.index
                .add(existing, vector)
                .map_err(|e| VectorIndexError::Add(e.to_string()))?;
            return Ok(());
        }

        // usearch requires reserved capacity before add
        if self.index.size() >= self.index.capacity() {
            let new_capacity = std::cmp::max(self.index.capacity() * 2, 16);
            self.reserve_for(new_capacity)?;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.index
            .add(id, vector)
            .map_err(|e| VectorIndexError::Add(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    fn reserve_for(&self, capacity: usize) -> Result<(), VectorIndexError> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorIndexError::Creation(e.to_string()))
    }

    /// Remove a vector by fragment id; returns whether it was present
    pub fn remove(&mut self, key: &str) -> Result<bool, VectorIndexError> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| VectorIndexError::Add(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Cosine search returning `(fragment_id, similarity)` above the
    /// threshold, best first
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>, VectorIndexError> {
        if query.len() != self.dimensions {
            return Err(VectorIndexError::Dimensions {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        let results = self
            .index
            .search(query, limit)
            .map_err(|e| VectorIndexError::Search(e.to_string()))?;

        let mut out = Vec::with_capacity(results.keys.len());
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(fragment_id) = self.id_to_key.get(key) {
                let similarity = 1.0 - distance;
                if similarity >= min_similarity {
                    out.push((fragment_id.clone(), similarity));
                }
            }
        }
        Ok(out)
    }
}

// ============================================================================
// EXACT-SCAN FALLBACK (no vector-search feature)
// ============================================================================

/// Exact cosine scan standing in for the HNSW index
#[cfg(not(feature = "vector-search"))]
pub struct VectorIndex {
    vectors: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

#[cfg(not(feature = "vector-search"))]
impl VectorIndex {
    pub fn new(dimensions: usize) -> Result<Self, VectorIndexError> {
        Ok(Self {
            vectors: HashMap::new(),
            dimensions,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::Dimensions {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        self.vectors.insert(key.to_string(), vector.to_vec());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, VectorIndexError> {
        Ok(self.vectors.remove(key).is_some())
    }

    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>, VectorIndexError> {
        if query.len() != self.dimensions {
            return Err(VectorIndexError::Dimensions {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|(k, v)| (k.clone(), crate::embeddings::cosine_similarity(query, v)))
            .filter(|(_, s)| *s >= min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: usize = 8;

    fn vector(seed: f32) -> Vec<f32> {
        let mut v: Vec<f32> = (0..DIMS).map(|i| ((i as f32 + seed) * 0.7).sin()).collect();
        crate::embeddings::normalize(&mut v);
        v
    }

    #[test]
    fn test_add_and_search() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let v1 = vector(1.0);
        let v2 = vector(50.0);

        index.add("frag-a", &v1).unwrap();
        index.add("frag-b", &v2).unwrap();
        assert_eq!(index.len(), 2);

        let results = index.search(&v1, 2, 0.0).unwrap();
        assert_eq!(results[0].0, "frag-a");
        assert!(results[0].1 > 0.99);
    }

    #[test]
    fn test_threshold_filters() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        index.add("frag-a", &vector(1.0)).unwrap();
        index.add("frag-b", &vector(200.0)).unwrap();

        let results = index.search(&vector(1.0), 10, 0.99).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "frag-a");
    }

    #[test]
    fn test_remove() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        index.add("frag-a", &vector(1.0)).unwrap();
        assert!(index.remove("frag-a").unwrap());
        assert!(!index.remove("frag-a").unwrap());
        assert!(index.is_empty());
    }

    #[test]
    fn test_replace_same_key() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        index.add("frag-a", &vector(1.0)).unwrap();
        index.add("frag-a", &vector(2.0)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let result = index.add("frag-a", &[1.0, 2.0]);
        assert!(matches!(result, Err(VectorIndexError::Dimensions { .. })));

        let result = index.search(&[1.0], 5, 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_search_returns_nothing() {
        let index = VectorIndex::new(DIMS).unwrap();
        assert!(index.search(&vector(1.0), 5, 0.0).unwrap().is_empty());
    }
}
