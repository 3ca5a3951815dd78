//! Feature Cache - resolved features keyed by token prefix.
//!
//! Overlapping windows re-derive tokens that an earlier window already
//! resolved. The first vector written under a key is kept and later writes
//! are ignored, so the result depends only on the order windows are
//! evaluated in, never on how often a key is re-derived.

use std::collections::HashMap;

use crate::{
    error::{FeatureError, Result},
    types::{Feature, TokenKey},
};

/// First-writer-wins map from [`TokenKey`] to a fixed-width feature.
///
/// A cache lives for one story's extraction pass. There is no eviction.
#[derive(Debug, Clone)]
pub struct FeatureCache {
    dim: usize,
    entries: HashMap<TokenKey, Feature>,
}

impl FeatureCache {
    /// Creates an empty cache holding vectors of width `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: HashMap::new(),
        }
    }

    /// Records `feature` under `key` unless the key is already present.
    ///
    /// Returns `true` if the feature was stored and `false` if an earlier
    /// write already claimed the key.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::DimensionMismatch`] if the vector width differs
    /// from the cache width. The cache is left unchanged.
    pub fn put(&mut self, key: TokenKey, feature: Feature) -> Result<bool> {
        if feature.len() != self.dim {
            return Err(FeatureError::DimensionMismatch {
                expected: self.dim,
                got: feature.len(),
            });
        }
        if self.entries.contains_key(&key) {
            return Ok(false);
        }
        self.entries.insert(key, feature);
        Ok(true)
    }

    pub fn get(&self, key: &TokenKey) -> Option<&[f32]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &TokenKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Width of every stored vector.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of distinct keys stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
