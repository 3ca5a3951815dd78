//! Stories as token sequences with a mapping back to word boundaries.
//!
//! Words are tokenized one at a time and concatenated, so each word owns a
//! contiguous run of tokens and its feature is read at the run's final token.

use crate::{
    error::{FeatureError, Result},
    types::{Token, TokenPos, WordIdx},
};

/// Tokenizer capability: `text -> ordered token ids`.
///
/// Implementations must be deterministic and free of side effects.
pub trait WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token>;
}

impl<F> WordTokenizer for F
where
    F: Fn(&str) -> Vec<Token>,
{
    fn tokenize(&self, text: &str) -> Vec<Token> {
        self(text)
    }
}

/// A story's concatenated token sequence and its word boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenizedStory {
    name: String,
    tokens: Vec<Token>,
    /// Final token position of each word, `None` for words without tokens.
    word_ends: Vec<Option<TokenPos>>,
}

impl TokenizedStory {
    /// Tokenizes each word independently and concatenates the results.
    pub fn from_words<S, T>(words: &[S], tokenizer: &T) -> Self
    where
        S: AsRef<str>,
        T: WordTokenizer + ?Sized,
    {
        Self::from_word_tokens(words.iter().map(|w| tokenizer.tokenize(w.as_ref())))
    }

    /// Builds a story from per-word token runs.
    pub fn from_word_tokens<I, W>(word_tokens: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[Token]>,
    {
        let mut tokens = Vec::new();
        let mut word_ends = Vec::new();

        for run in word_tokens {
            let run = run.as_ref();
            tokens.extend_from_slice(run);
            word_ends.push(if run.is_empty() {
                None
            } else {
                Some(tokens.len() - 1)
            });
        }

        Self {
            name: String::new(),
            tokens,
            word_ends,
        }
    }

    /// Builds a story from a token sequence and explicit word-final positions.
    ///
    /// Several words may share one final position (tokenizers that fold a
    /// word into its neighbour do this).
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::InvalidConfiguration`] if a position is out of
    /// range or positions decrease.
    pub fn with_word_ends(tokens: Vec<Token>, word_ends: Vec<Option<TokenPos>>) -> Result<Self> {
        let mut prev: Option<TokenPos> = None;
        for (word, end) in word_ends.iter().enumerate() {
            let Some(pos) = *end else { continue };
            if pos >= tokens.len() {
                return Err(FeatureError::InvalidConfiguration(format!(
                    "word {word} ends at token {pos}, but the story has {} tokens",
                    tokens.len()
                )));
            }
            if prev.is_some_and(|p| pos < p) {
                return Err(FeatureError::InvalidConfiguration(format!(
                    "word {word} ends at token {pos}, before the previous word"
                )));
            }
            prev = Some(pos);
        }

        Ok(Self {
            name: String::new(),
            tokens,
            word_ends,
        })
    }

    /// Attaches a display name used in log lines and corpus results.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn word_count(&self) -> usize {
        self.word_ends.len()
    }

    /// Final token position of every word, in word order.
    pub fn word_ends(&self) -> &[Option<TokenPos>] {
        &self.word_ends
    }

    /// Final token position of one word.
    pub fn word_end(&self, word: WordIdx) -> Option<TokenPos> {
        self.word_ends.get(word).copied().flatten()
    }
}
