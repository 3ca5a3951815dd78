//! Error types for window planning, feature caching and extraction.

use std::fmt;

use indicatif::style::TemplateError;

/// Errors that can occur while planning or extracting features for a story.
///
/// Only [`FeatureError::InvalidConfiguration`] aborts a story. Forward-pass
/// failures are folded into per-word diagnostics by the extractor and only
/// surface as errors when a caller drives the collaborator directly.
#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    /// Window bounds are unusable or the story has no tokens.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The model collaborator failed or returned malformed hidden states.
    #[error("forward pass failed for window {window}: {reason}")]
    ForwardPassFailure { window: usize, reason: String },

    /// A feature vector's width differs from the cache width.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Progress bar template string was invalid.
    #[error("template parsing failed: {0}")]
    ProgressBarSetup(#[from] TemplateError),
}

pub type Result<T> = std::result::Result<T, FeatureError>;

/// Why a word received a zero placeholder instead of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnresolvedReason {
    /// The tokenizer produced no tokens for the word.
    NoTokens,
    /// The word's key was never written to the cache.
    NotCached,
    /// The forward pass for the resolving window failed.
    ForwardPassFailed,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTokens => write!(f, "no tokens"),
            Self::NotCached => write!(f, "not cached"),
            Self::ForwardPassFailed => write!(f, "forward pass failed"),
        }
    }
}
