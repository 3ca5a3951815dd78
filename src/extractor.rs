//! Extraction driver: runs the model over planned windows and assembles features.
//!
//! Within a story, windows are evaluated strictly in plan order because the
//! cache keeps the first vector written under a key. Stories share nothing,
//! so a corpus is processed in parallel across stories via Rayon.

use std::fmt;

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle, style::TemplateError};
use rayon::prelude::*;

use crate::{
    assembler::{StoryFeatures, assemble},
    cache::FeatureCache,
    config::ExtractionConfig,
    error::{FeatureError, Result},
    planner::{ContextWindow, WindowPlan, plan_windows},
    story::TokenizedStory,
    types::{Feature, LayerStates, Token},
};

/// Causal-model forward-pass capability.
///
/// Given identical tokens and weights, implementations must return identical
/// hidden states.
pub trait ForwardPass {
    type Error: fmt::Display;

    /// Width of every hidden-state vector.
    fn hidden_size(&self) -> usize;

    /// Hidden states for `tokens`, indexed as `[layer][position][dim]`.
    fn hidden_states(&self, tokens: &[Token]) -> std::result::Result<LayerStates, Self::Error>;
}

/// Counters describing one story's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractionStats {
    pub windows_planned: usize,
    pub windows_evaluated: usize,
    /// Windows with no word-final token in their new region.
    pub windows_skipped: usize,
    /// Windows whose every target key was already cached by an earlier window.
    pub windows_reused: usize,
    pub windows_failed: usize,
    /// Tokens passed through the model.
    pub token_evaluations: usize,
    /// Tokens a one-window-per-word extractor would pass through the model.
    pub naive_token_evaluations: usize,
    pub cache_entries: usize,
    pub unresolved_words: usize,
}

/// Result of extracting one story.
#[derive(Debug, Clone)]
pub struct ExtractedStory {
    pub name: String,
    pub features: StoryFeatures,
    pub cache: FeatureCache,
    pub stats: ExtractionStats,
}

/// Extracts one feature row per word of `story`.
///
/// Forward-pass failures do not abort the story: the failing window's words
/// receive zero rows and are listed as unresolved.
///
/// # Errors
///
/// Returns [`FeatureError::InvalidConfiguration`] if the window bounds are
/// invalid or the story has no tokens. Nothing is evaluated in that case.
pub fn extract_story<M>(
    story: &TokenizedStory,
    model: &M,
    config: &ExtractionConfig,
) -> Result<ExtractedStory>
where
    M: ForwardPass + ?Sized,
{
    config.validate()?;
    let plan = plan_windows(story, &config.window)?;

    let mut cache = FeatureCache::new(model.hidden_size());
    let mut failed = vec![false; plan.windows().len()];
    let mut stats = ExtractionStats {
        windows_planned: plan.windows().len(),
        naive_token_evaluations: plan.naive_token_evaluations(),
        ..ExtractionStats::default()
    };

    let tokens = story.tokens();
    for window in plan.windows() {
        if window.targets.is_empty() {
            stats.windows_skipped += 1;
            continue;
        }
        if all_targets_cached(window, tokens, &cache) {
            log::debug!("window {}: every target already cached", window.index);
            stats.windows_reused += 1;
            continue;
        }

        stats.windows_evaluated += 1;
        stats.token_evaluations += window.len();

        match evaluate_window(&plan, window, model, config.layer) {
            Ok(layer) => store_targets(&plan, window, layer, &mut cache)?,
            Err(e) => {
                log::warn!("story {:?}: {e}; its words will be unresolved", story.name());
                failed[window.index] = true;
                stats.windows_failed += 1;
            }
        }
    }

    let features = assemble(&plan, &cache, &failed);
    stats.cache_entries = cache.len();
    stats.unresolved_words = features.unresolved_count();

    if features.is_complete() {
        log::info!(
            "story {:?}: {} words from {} forward passes ({} tokens, naive {})",
            story.name(),
            features.word_count(),
            stats.windows_evaluated,
            stats.token_evaluations,
            stats.naive_token_evaluations
        );
    } else {
        log::warn!(
            "story {:?}: {} of {} words unresolved",
            story.name(),
            stats.unresolved_words,
            features.word_count()
        );
    }

    Ok(ExtractedStory {
        name: story.name().to_string(),
        features,
        cache,
        stats,
    })
}

/// Extracts every story of a corpus in parallel.
///
/// Results are returned in input order. A story with an invalid
/// configuration yields its own `Err` without affecting the others.
///
/// # Errors
///
/// Returns [`FeatureError::ProgressBarSetup`] if the progress bar template
/// fails to compile.
pub fn extract_corpus<M>(
    stories: &[TokenizedStory],
    model: &M,
    config: &ExtractionConfig,
) -> Result<Vec<Result<ExtractedStory>>>
where
    M: ForwardPass + Sync + ?Sized,
{
    let pb = if config.show_progress {
        progress_bar(stories.len() as u64, "Extracting stories")?
    } else {
        // create dummy progress bar and force to not render
        let pb = ProgressBar::new(stories.len() as u64);
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        pb
    };

    let results: Vec<Result<ExtractedStory>> = stories
        .par_iter()
        .progress_with(pb)
        .map(|story| extract_story(story, model, config))
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    let unresolved: usize = results
        .iter()
        .flatten()
        .map(|s| s.stats.unresolved_words)
        .sum();
    log::info!(
        "extracted {} stories ({} rejected, {} unresolved words)",
        stories.len() - failed,
        failed,
        unresolved
    );

    Ok(results)
}

/// Whether an earlier window already resolved every key this window targets.
fn all_targets_cached(window: &ContextWindow, tokens: &[Token], cache: &FeatureCache) -> bool {
    window.targets.iter().all(|t| {
        window
            .key(tokens, t.position)
            .is_some_and(|key| cache.contains(&key))
    })
}

/// Runs the model over one window and returns the kept layer.
///
/// The output is checked for shape so a misbehaving collaborator degrades
/// to unresolved words instead of wrong rows.
fn evaluate_window<M>(
    plan: &WindowPlan<'_>,
    window: &ContextWindow,
    model: &M,
    layer: usize,
) -> Result<Vec<Feature>>
where
    M: ForwardPass + ?Sized,
{
    let failure = |reason: String| FeatureError::ForwardPassFailure {
        window: window.index,
        reason,
    };

    log::debug!(
        "window {}: tokens {:?}, new {:?}, {} targets",
        window.index,
        window.span(),
        window.new_positions(),
        window.targets.len()
    );

    let mut states = model
        .hidden_states(plan.window_tokens(window))
        .map_err(|e| failure(e.to_string()))?;

    if layer >= states.len() {
        return Err(failure(format!(
            "layer {layer} requested, model returned {} layers",
            states.len()
        )));
    }
    let rows = states.swap_remove(layer);

    if rows.len() != window.len() {
        return Err(failure(format!(
            "expected {} hidden states, got {}",
            window.len(),
            rows.len()
        )));
    }
    let dim = model.hidden_size();
    if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
        return Err(failure(format!(
            "expected hidden size {dim}, got {}",
            bad.len()
        )));
    }

    Ok(rows)
}

/// Writes the window's target rows into the cache in target order.
fn store_targets(
    plan: &WindowPlan<'_>,
    window: &ContextWindow,
    mut rows: Vec<Feature>,
    cache: &mut FeatureCache,
) -> Result<()> {
    let tokens = plan.story().tokens();

    for target in &window.targets {
        let (Some(key), Some(offset)) = (
            window.key(tokens, target.position),
            window.offset_of(target.position),
        ) else {
            continue;
        };
        // targets hold distinct positions, so each row is taken once
        let row = std::mem::take(&mut rows[offset]);
        if !cache.put(key, row)? {
            log::debug!(
                "window {}: word {} reuses an earlier feature",
                window.index,
                target.word
            );
        }
    }

    Ok(())
}

/// Creates a styled progress bar with elapsed time, a fixed-width message label,
/// and position/total counters.
///
/// # Errors
///
/// Returns a [`TemplateError`] if the progress bar style template is invalid.
fn progress_bar(
    size: u64,
    msg: impl Into<String>,
) -> std::result::Result<ProgressBar, TemplateError> {
    let pb = ProgressBar::new(size);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {msg:<30!} {wide_bar} {pos}/{len}")?;

    pb.set_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(std::time::Duration::from_secs(1));

    Ok(pb)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::{config::WindowConfig, error::UnresolvedReason};

    /// Emits, per position, the window length, the token id and the call
    /// index, so rows can be traced back to the forward pass that produced them.
    struct ProbeModel {
        layers: usize,
        calls: Cell<usize>,
        fail_on_call: Option<usize>,
        seen: RefCell<Vec<Vec<Token>>>,
    }

    impl ProbeModel {
        fn new(layers: usize) -> Self {
            Self {
                layers,
                calls: Cell::new(0),
                fail_on_call: None,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ForwardPass for ProbeModel {
        type Error = String;

        fn hidden_size(&self) -> usize {
            3
        }

        fn hidden_states(
            &self,
            tokens: &[Token],
        ) -> std::result::Result<LayerStates, String> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            self.seen.borrow_mut().push(tokens.to_vec());
            if self.fail_on_call == Some(call) {
                return Err("device lost".to_string());
            }
            Ok((0..self.layers)
                .map(|layer| {
                    tokens
                        .iter()
                        .map(|&t| {
                            vec![
                                (layer * 1000 + tokens.len()) as f32,
                                t as f32,
                                call as f32,
                            ]
                        })
                        .collect()
                })
                .collect())
        }
    }

    fn config(min: usize, max: usize, layer: usize) -> ExtractionConfig {
        ExtractionConfig {
            window: WindowConfig::new(min, max).expect("valid bounds"),
            layer,
            show_progress: false,
        }
    }

    #[test]
    fn test_long_story_two_passes() {
        let story = TokenizedStory::from_word_tokens((0..600).map(|i| vec![i]));
        let model = ProbeModel::new(1);
        let out = extract_story(&story, &model, &config(256, 512, 0)).expect("extract");

        assert_eq!(model.calls.get(), 2);
        assert_eq!(out.stats.windows_evaluated, 2);
        assert_eq!(out.stats.cache_entries, 600);
        assert!(out.features.is_complete());
        // word 511 comes from the first window, word 512 from the second
        assert_eq!(out.features.row(511), Some(&[512.0, 511.0, 0.0][..]));
        assert_eq!(out.features.row(512), Some(&[343.0, 512.0, 1.0][..]));
    }

    #[test]
    fn test_selects_layer() {
        let story = TokenizedStory::from_word_tokens(vec![vec![4], vec![5]]);
        let model = ProbeModel::new(3);
        let out = extract_story(&story, &model, &config(1, 4, 2)).expect("extract");
        assert_eq!(out.features.row(1), Some(&[2002.0, 5.0, 0.0][..]));
    }

    #[test]
    fn test_missing_layer_degrades() {
        let story = TokenizedStory::from_word_tokens(vec![vec![4], vec![5]]);
        let model = ProbeModel::new(1);
        let out = extract_story(&story, &model, &config(1, 4, 7)).expect("extract");
        assert_eq!(out.stats.windows_failed, 1);
        assert_eq!(out.features.unresolved_count(), 2);
        assert_eq!(out.features.row(0), Some(&[0.0, 0.0, 0.0][..]));
    }

    #[test]
    fn test_failed_window_keeps_the_rest() {
        let story = TokenizedStory::from_word_tokens((0..6).map(|i| vec![i]));
        let mut model = ProbeModel::new(1);
        model.fail_on_call = Some(1);
        let out = extract_story(&story, &model, &config(2, 3, 0)).expect("extract");

        // windows: [0,3) new [0,3); [2,5) new [3,5); [4,6) new [5,6)
        assert_eq!(model.calls.get(), 3);
        assert_eq!(out.stats.windows_failed, 1);
        let unresolved: Vec<(usize, UnresolvedReason)> = out
            .features
            .unresolved()
            .iter()
            .map(|u| (u.word, u.reason))
            .collect();
        assert_eq!(
            unresolved,
            vec![
                (3, UnresolvedReason::ForwardPassFailed),
                (4, UnresolvedReason::ForwardPassFailed),
            ]
        );
        assert_eq!(out.features.row(5), Some(&[2.0, 5.0, 2.0][..]));
    }

    #[test]
    fn test_invalid_bounds_touch_nothing() {
        let story = TokenizedStory::from_word_tokens(vec![vec![1]]);
        let model = ProbeModel::new(1);
        let bad = ExtractionConfig {
            window: WindowConfig {
                min_window: 9,
                max_window: 3,
            },
            ..ExtractionConfig::default()
        };
        let result = extract_story(&story, &model, &bad);
        assert!(matches!(result, Err(FeatureError::InvalidConfiguration(_))));
        assert_eq!(model.calls.get(), 0);
    }

    #[test]
    fn test_skips_windows_without_targets() {
        // one long word: its only target is the last token
        let story = TokenizedStory::from_word_tokens(vec![(0..10).collect::<Vec<Token>>()]);
        let model = ProbeModel::new(1);
        let out = extract_story(&story, &model, &config(2, 4, 0)).expect("extract");

        assert_eq!(out.stats.windows_evaluated, 1);
        assert!(out.stats.windows_skipped > 0);
        assert!(out.features.is_complete());
        assert_eq!(model.seen.borrow().last().and_then(|t| t.last()).copied(), Some(9));
    }

    #[test]
    fn test_repeated_phrase_reuses_first_feature() {
        // windows [0,3) and [3,6) both see tokens (7, 8, 9)
        let story = TokenizedStory::from_word_tokens(vec![
            vec![7],
            vec![8],
            vec![9],
            vec![7],
            vec![8],
            vec![9],
        ]);
        let model = ProbeModel::new(1);
        let out = extract_story(&story, &model, &config(1, 3, 0)).expect("extract");

        assert_eq!(model.calls.get(), 1);
        assert_eq!(out.stats.windows_evaluated, 1);
        assert_eq!(out.stats.windows_reused, 1);
        assert_eq!(out.stats.cache_entries, 3);
        assert!(out.features.is_complete());

        let plan = plan_windows(&story, &config(1, 3, 0).window).expect("plan");
        let first_key = plan.key_for_word(2).expect("word has tokens");
        assert_eq!(plan.key_for_word(5), Some(first_key.clone()));
        assert_eq!(out.features.row(5), Some(&[3.0, 9.0, 0.0][..]));
        assert_eq!(out.features.row(5), out.cache.get(&first_key));
    }

    #[test]
    fn test_partial_overlap_keeps_first_writer() {
        // windows [0,3) and [3,6): (7), (7, 8) repeat, (7, 8, 5) is new
        let story = TokenizedStory::from_word_tokens(vec![
            vec![7],
            vec![8],
            vec![9],
            vec![7],
            vec![8],
            vec![5],
        ]);
        let model = ProbeModel::new(1);
        let out = extract_story(&story, &model, &config(1, 3, 0)).expect("extract");

        assert_eq!(model.calls.get(), 2);
        assert_eq!(out.stats.windows_reused, 0);
        assert_eq!(out.stats.cache_entries, 4);
        // words 3 and 4 keep the vectors stamped by the first call
        assert_eq!(out.features.row(3), Some(&[3.0, 7.0, 0.0][..]));
        assert_eq!(out.features.row(4), Some(&[3.0, 8.0, 0.0][..]));
        assert_eq!(out.features.row(3), out.features.row(0));
        assert_eq!(out.features.row(5), Some(&[3.0, 5.0, 1.0][..]));
    }
}
