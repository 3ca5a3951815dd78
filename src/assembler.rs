//! Assembler - turns a populated cache into one feature row per word.
//!
//! Assembly never fails. A word without a cached feature gets a zero row and
//! an [`UnresolvedWord`] record so the caller can audit coverage before
//! fitting anything on the features.

use crate::{
    cache::FeatureCache,
    error::UnresolvedReason,
    planner::WindowPlan,
    types::{Feature, TokenKey, WordIdx},
};

/// A word that received a zero placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedWord {
    pub word: WordIdx,
    pub reason: UnresolvedReason,
}

/// Ordered per-word features for one story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryFeatures {
    dim: usize,
    rows: Vec<Feature>,
    unresolved: Vec<UnresolvedWord>,
}

impl StoryFeatures {
    /// Feature width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// One row per word, in word order.
    pub fn rows(&self) -> &[Feature] {
        &self.rows
    }

    pub fn row(&self, word: WordIdx) -> Option<&[f32]> {
        self.rows.get(word).map(Vec::as_slice)
    }

    pub fn word_count(&self) -> usize {
        self.rows.len()
    }

    /// Words that were given a zero row, in word order.
    pub fn unresolved(&self) -> &[UnresolvedWord] {
        &self.unresolved
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Row-major `[word_count * dim]` matrix.
    pub fn to_flat(&self) -> Vec<f32> {
        self.rows.iter().flatten().copied().collect()
    }

    pub fn into_rows(self) -> Vec<Feature> {
        self.rows
    }
}

/// Builds rows from per-word keys.
///
/// `None` keys are words that tokenized to nothing; keys missing from the
/// cache are reported as [`UnresolvedReason::NotCached`].
pub fn assemble_keys(keys: &[Option<TokenKey>], cache: &FeatureCache) -> StoryFeatures {
    assemble_with(keys.iter().cloned().enumerate(), keys.len(), cache, |_| false)
}

/// Builds rows for every word of a planned story.
///
/// `failed_windows[i]` marks window `i` as having failed its forward pass;
/// uncached words resolved by such a window are reported as
/// [`UnresolvedReason::ForwardPassFailed`] instead of `NotCached`.
pub fn assemble(
    plan: &WindowPlan<'_>,
    cache: &FeatureCache,
    failed_windows: &[bool],
) -> StoryFeatures {
    let words = plan.story().word_count();
    let keys = (0..words).map(|word| (word, plan.key_for_word(word)));

    assemble_with(keys, words, cache, |word| {
        plan.window_for_word(word)
            .is_some_and(|w| failed_windows.get(w.index).copied().unwrap_or(false))
    })
}

fn assemble_with<I, F>(
    keys: I,
    words: usize,
    cache: &FeatureCache,
    window_failed: F,
) -> StoryFeatures
where
    I: Iterator<Item = (WordIdx, Option<TokenKey>)>,
    F: Fn(WordIdx) -> bool,
{
    let dim = cache.dim();
    let mut rows = Vec::with_capacity(words);
    let mut unresolved = Vec::new();

    for (word, key) in keys {
        let reason = match key.as_ref().map(|k| cache.get(k)) {
            Some(Some(feature)) => {
                rows.push(feature.to_vec());
                continue;
            }
            Some(None) if window_failed(word) => UnresolvedReason::ForwardPassFailed,
            Some(None) => UnresolvedReason::NotCached,
            None => UnresolvedReason::NoTokens,
        };
        rows.push(vec![0.0; dim]);
        unresolved.push(UnresolvedWord { word, reason });
    }

    StoryFeatures {
        dim,
        rows,
        unresolved,
    }
}
