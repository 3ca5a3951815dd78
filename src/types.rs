//! Type aliases and shared types for window planning and feature caching.
//!
//! These type aliases provide semantic clarity throughout the codebase.

use std::{fmt, sync::Arc};

/// Represents a token identifier produced by the tokenizer.
pub type Token = usize;

/// Position of a token within a story's concatenated token sequence.
pub type TokenPos = usize;

/// Index of a word within its story.
pub type WordIdx = usize;

/// A single hidden-state feature vector.
pub type Feature = Vec<f32>;

/// Forward-pass output for one window, indexed as `[layer][position][dim]`.
pub type LayerStates = Vec<Vec<Feature>>;

/// The token-id prefix identifying a resolvable feature.
///
/// A key holds every token from the start of the resolving window up to and
/// including the resolved token. Two keys with the same ids denote the same
/// feature, even when they come from different windows or different words.
///
/// Backed by an `Arc<[Token]>` so keys clone cheaply when they are shared
/// between the plan, the cache and the assembler.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenKey(Arc<[Token]>);

impl TokenKey {
    /// Builds a key from the window slice ending at the resolved token.
    pub fn new(tokens: &[Token]) -> Self {
        Self(Arc::from(tokens))
    }

    /// Token ids making up the key.
    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // keys can be hundreds of tokens long; show the tail only
        const TAIL: usize = 4;
        let toks = self.tokens();
        if toks.len() <= TAIL {
            write!(f, "TokenKey({toks:?})")
        } else {
            write!(
                f,
                "TokenKey(len={}, ..{:?})",
                toks.len(),
                &toks[toks.len() - TAIL..]
            )
        }
    }
}
