//! Per-word language-model features with shared context windows.
//!
//! Extracting one hidden-state vector per word from a causal model is
//! expensive when every word gets its own forward pass over its left
//! context. This crate plans a small set of overlapping token windows per
//! story, caches each resolved token's feature under its exact token prefix,
//! and assembles the cached vectors into an ordered per-word matrix.
//!
//! The tokenizer and the model stay external: callers plug them in through
//! [`WordTokenizer`] and [`ForwardPass`], or through the Python bindings
//! built with the `python` feature.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(unused_must_use)]

pub mod assembler;
pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod planner;
pub mod story;
pub mod types;

#[cfg(feature = "python")]
mod python;

pub use assembler::{StoryFeatures, UnresolvedWord, assemble, assemble_keys};
pub use cache::FeatureCache;
pub use config::{ExtractionConfig, WindowConfig};
pub use error::{FeatureError, Result, UnresolvedReason};
pub use extractor::{ExtractedStory, ExtractionStats, ForwardPass, extract_corpus, extract_story};
pub use planner::{ContextWindow, WindowPlan, WordTarget, plan_windows};
pub use story::{TokenizedStory, WordTokenizer};
pub use types::{Feature, LayerStates, Token, TokenKey, TokenPos, WordIdx};
