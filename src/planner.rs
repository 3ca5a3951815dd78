//! Window Planner - schedules the forward passes for one story.
//!
//! A naive extractor runs the model once per word over that word's left
//! context. The planner instead slides a window of at most `max_window`
//! tokens across the story and lets one forward pass resolve every token in
//! the window's *new* region. Consecutive windows overlap by `min_window - 1`
//! burn-in tokens so each resolved token still sees at least `min_window`
//! tokens of context; burn-in outputs are discarded.
//!
//! ```text
//!  tokens   0 ............................................. n
//!  win 0    [=========== new ===========)
//!  win 1                       [burn-in |===== new =====)
//!  win 2                                      [burn-in |== new ==)
//! ```
//!
//! The very first window has no prior context to lean on, so all of its
//! tokens are new. The new regions of all windows partition `[0, n)`.

use std::ops::Range;

use crate::{
    config::WindowConfig,
    error::{FeatureError, Result},
    story::TokenizedStory,
    types::{Token, TokenKey, TokenPos, WordIdx},
};

/// A word whose feature is read at `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordTarget {
    pub word: WordIdx,
    pub position: TokenPos,
}

/// One forward pass over `tokens[start..end]`.
///
/// Positions in `[new_start, end)` are resolved by this window; positions in
/// `[start, new_start)` are burn-in context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    /// Emission order within the plan.
    pub index: usize,
    pub start: TokenPos,
    pub new_start: TokenPos,
    pub end: TokenPos,

    /// Word-final positions inside the new region, one per distinct position.
    pub targets: Vec<WordTarget>,
}

impl ContextWindow {
    /// Token span fed to the model.
    pub fn span(&self) -> Range<TokenPos> {
        self.start..self.end
    }

    /// Positions this window resolves.
    pub fn new_positions(&self) -> Range<TokenPos> {
        self.new_start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn burn_in_len(&self) -> usize {
        self.new_start - self.start
    }

    /// Whether this window resolves `pos`.
    pub fn resolves(&self, pos: TokenPos) -> bool {
        self.new_positions().contains(&pos)
    }

    /// Offset of `pos` inside the window's forward-pass output.
    pub fn offset_of(&self, pos: TokenPos) -> Option<usize> {
        self.span().contains(&pos).then(|| pos - self.start)
    }

    /// Key for a position this window resolves.
    ///
    /// Returns `None` if `pos` lies outside the new region or past `tokens`.
    pub fn key(&self, tokens: &[Token], pos: TokenPos) -> Option<TokenKey> {
        if !self.resolves(pos) {
            return None;
        }
        tokens.get(self.start..=pos).map(TokenKey::new)
    }
}

/// The ordered windows for one story and the window resolving each word.
#[derive(Debug, Clone)]
pub struct WindowPlan<'s> {
    story: &'s TokenizedStory,
    config: WindowConfig,
    windows: Vec<ContextWindow>,
    /// Window index resolving each word, `None` for words without tokens.
    word_windows: Vec<Option<usize>>,
}

/// Plans the context windows for `story`.
///
/// # Errors
///
/// Returns [`FeatureError::InvalidConfiguration`] if the bounds are invalid
/// (see [`WindowConfig::validate`]) or the story has no tokens.
pub fn plan_windows<'s>(
    story: &'s TokenizedStory,
    config: &WindowConfig,
) -> Result<WindowPlan<'s>> {
    config.validate()?;

    let n = story.tokens().len();
    if n == 0 {
        return Err(FeatureError::InvalidConfiguration(format!(
            "story {:?} has no tokens",
            story.name()
        )));
    }

    let mut windows = Vec::with_capacity(n.div_ceil(config.max_window - config.burn_in()));

    // first window: no earlier context exists, so everything in it is new
    let first_end = n.min(config.max_window);
    windows.push(ContextWindow {
        index: 0,
        start: 0,
        new_start: 0,
        end: first_end,
        targets: Vec::new(),
    });

    let mut cursor = first_end;
    while cursor < n {
        let start = cursor.saturating_sub(config.burn_in());
        // max_window > burn_in, so every window advances the cursor
        let end = n.min(start + config.max_window);
        windows.push(ContextWindow {
            index: windows.len(),
            start,
            new_start: cursor,
            end,
            targets: Vec::new(),
        });
        cursor = end;
    }

    let word_windows = assign_targets(story, &mut windows);

    log::debug!(
        "planned {} windows for story {:?} ({} tokens, {} words)",
        windows.len(),
        story.name(),
        n,
        story.word_count()
    );

    Ok(WindowPlan {
        story,
        config: *config,
        windows,
        word_windows,
    })
}

/// Attaches every word-final position to the window whose new region holds it.
///
/// Word ends are non-decreasing, so a single forward sweep suffices. Words
/// sharing a final position collapse into one target owned by the later word.
fn assign_targets(story: &TokenizedStory, windows: &mut [ContextWindow]) -> Vec<Option<usize>> {
    let mut word_windows = Vec::with_capacity(story.word_count());
    let mut w = 0;

    for (word, end) in story.word_ends().iter().enumerate() {
        let Some(pos) = *end else {
            word_windows.push(None);
            continue;
        };

        while w < windows.len() && !windows[w].resolves(pos) {
            w += 1;
        }
        let Some(window) = windows.get_mut(w) else {
            // unreachable for validated stories: new regions cover [0, n)
            word_windows.push(None);
            continue;
        };

        match window.targets.last_mut() {
            Some(last) if last.position == pos => last.word = word,
            _ => window.targets.push(WordTarget { word, position: pos }),
        }
        word_windows.push(Some(w));
    }

    word_windows
}

impl<'s> WindowPlan<'s> {
    pub fn story(&self) -> &'s TokenizedStory {
        self.story
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Windows in the order they must be evaluated.
    pub fn windows(&self) -> &[ContextWindow] {
        &self.windows
    }

    /// Tokens fed to the model for `window`.
    pub fn window_tokens(&self, window: &ContextWindow) -> &'s [Token] {
        &self.story.tokens()[window.span()]
    }

    /// Window resolving `word`, if the word has tokens.
    pub fn window_for_word(&self, word: WordIdx) -> Option<&ContextWindow> {
        let idx = self.word_windows.get(word).copied().flatten()?;
        self.windows.get(idx)
    }

    /// Key under which `word`'s feature is cached.
    pub fn key_for_word(&self, word: WordIdx) -> Option<TokenKey> {
        let pos = self.story.word_end(word)?;
        self.window_for_word(word)?.key(self.story.tokens(), pos)
    }

    /// Total tokens passed through the model across all windows.
    pub fn token_evaluations(&self) -> usize {
        self.windows.iter().map(ContextWindow::len).sum()
    }

    /// Tokens a one-window-per-word extractor would pass through the model.
    ///
    /// Each word would get its own forward pass over up to `max_window`
    /// tokens ending at its final token.
    pub fn naive_token_evaluations(&self) -> usize {
        self.story
            .word_ends()
            .iter()
            .flatten()
            .map(|&pos| (pos + 1).min(self.config.max_window))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story_of(n: usize) -> TokenizedStory {
        // one token per word, ids repeat every 50 to keep them small
        TokenizedStory::from_word_tokens((0..n).map(|i| vec![i % 50]))
    }

    fn cfg(min: usize, max: usize) -> WindowConfig {
        WindowConfig::new(min, max).expect("valid bounds")
    }

    fn assert_partition(plan: &WindowPlan<'_>, n: usize) {
        let mut seen = vec![0u32; n];
        for window in plan.windows() {
            assert!(window.len() <= plan.config().max_window);
            for pos in window.new_positions() {
                seen[pos] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1), "new regions must partition [0, {n})");
    }

    #[test]
    fn test_long_story_scenario() {
        let story = story_of(600);
        let plan = plan_windows(&story, &cfg(256, 512)).expect("plan");
        let windows = plan.windows();

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].span(), 0..512);
        assert_eq!(windows[0].new_positions(), 0..512);
        assert_eq!(windows[1].new_positions(), 512..600);
        assert_eq!(windows[1].new_positions().len(), 88);
        assert_eq!(windows[1].burn_in_len(), 255);

        let covered: usize = windows.iter().map(|w| w.new_positions().len()).sum();
        assert_eq!(covered, 600);
    }

    #[test]
    fn test_exact_min_window_is_single_window() {
        let story = story_of(256);
        let plan = plan_windows(&story, &cfg(256, 512)).expect("plan");
        assert_eq!(plan.windows().len(), 1);
        assert_eq!(plan.windows()[0].new_positions(), 0..256);
    }

    #[test]
    fn test_short_story_is_single_window() {
        let story = story_of(10);
        let plan = plan_windows(&story, &cfg(256, 512)).expect("plan");
        assert_eq!(plan.windows().len(), 1);
        assert_eq!(plan.windows()[0].span(), 0..10);
        assert_eq!(plan.windows()[0].new_positions(), 0..10);
    }

    #[test]
    fn test_partition_across_bounds() {
        for n in [1, 2, 7, 31, 64, 100, 257] {
            for (min, max) in [(1, 1), (1, 4), (3, 3), (4, 9), (8, 16), (16, 17), (32, 32)] {
                let story = story_of(n);
                let plan = plan_windows(&story, &cfg(min, max)).expect("plan");
                assert_partition(&plan, n);
            }
        }
    }

    #[test]
    fn test_burn_in_gives_min_context() {
        let story = story_of(100);
        let plan = plan_windows(&story, &cfg(8, 20)).expect("plan");
        for window in plan.windows().iter().skip(1) {
            // first new token sees the burn-in plus itself
            assert_eq!(window.new_start - window.start + 1, 8);
        }
    }

    #[test]
    fn test_rejects_empty_story() {
        let story = TokenizedStory::default();
        let result = plan_windows(&story, &cfg(2, 4));
        assert!(matches!(result, Err(FeatureError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let story = story_of(10);
        let bad = WindowConfig {
            min_window: 5,
            max_window: 4,
        };
        assert!(matches!(
            plan_windows(&story, &bad),
            Err(FeatureError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_every_word_has_one_target() {
        // words of 1..=3 tokens
        let runs: Vec<Vec<Token>> = (0..40).map(|i| vec![i; 1 + i % 3]).collect();
        let story = TokenizedStory::from_word_tokens(&runs);
        let plan = plan_windows(&story, &cfg(4, 10)).expect("plan");

        let targets: Vec<WordTarget> = plan
            .windows()
            .iter()
            .flat_map(|w| w.targets.iter().copied())
            .collect();
        assert_eq!(targets.len(), 40);
        for (word, target) in targets.iter().enumerate() {
            assert_eq!(target.word, word);
            assert_eq!(Some(target.position), story.word_end(word));
            let window = plan.window_for_word(word).expect("word has a window");
            assert!(window.resolves(target.position));
        }
    }

    #[test]
    fn test_shared_final_position_later_word_owns_target() {
        let story = TokenizedStory::with_word_ends(
            vec![10, 11, 12, 13],
            vec![Some(1), Some(3), Some(3)],
        )
        .expect("story");
        let plan = plan_windows(&story, &cfg(2, 8)).expect("plan");

        let targets = &plan.windows()[0].targets;
        assert_eq!(
            targets,
            &vec![
                WordTarget { word: 0, position: 1 },
                WordTarget { word: 2, position: 3 },
            ]
        );
        assert_eq!(plan.key_for_word(1), plan.key_for_word(2));
    }

    #[test]
    fn test_word_without_tokens_has_no_key() {
        let story = TokenizedStory::from_word_tokens(vec![vec![1], vec![], vec![2]]);
        let plan = plan_windows(&story, &cfg(1, 4)).expect("plan");
        assert!(plan.key_for_word(1).is_none());
        assert!(plan.window_for_word(1).is_none());
        assert_eq!(plan.key_for_word(2), Some(TokenKey::new(&[1, 2])));
    }

    #[test]
    fn test_keys_start_at_window_start() {
        let story = TokenizedStory::from_word_tokens((0..12).map(|i| vec![i]));
        let plan = plan_windows(&story, &cfg(3, 6)).expect("plan");

        // windows: [0,6) new [0,6); [4,10) new [6,10); [8,12) new [10,12)
        assert_eq!(plan.windows().len(), 3);
        assert_eq!(plan.key_for_word(5), Some(TokenKey::new(&[0, 1, 2, 3, 4, 5])));
        assert_eq!(plan.key_for_word(6), Some(TokenKey::new(&[4, 5, 6])));
        assert_eq!(plan.key_for_word(11), Some(TokenKey::new(&[8, 9, 10, 11])));
    }

    #[test]
    fn test_fewer_evaluations_than_naive() {
        let story = story_of(600);
        let plan = plan_windows(&story, &cfg(256, 512)).expect("plan");
        assert_eq!(plan.token_evaluations(), 512 + 343);
        assert!(plan.token_evaluations() < plan.naive_token_evaluations());
    }
}
