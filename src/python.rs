//! Python bindings.
//!
//! The model and tokenizer stay on the Python side: the planner and cache
//! are exposed directly, and `extract_story` drives a Python callable that
//! maps a list of token ids to hidden states shaped `[layer][position][dim]`.

use pyo3::{exceptions::PyValueError, prelude::*};

use crate::{
    cache::FeatureCache,
    config::{ExtractionConfig, WindowConfig},
    error::FeatureError,
    extractor::{self, ForwardPass},
    planner::{WindowPlan, plan_windows},
    story::TokenizedStory,
    types::{LayerStates, Token, TokenKey},
};

impl From<FeatureError> for PyErr {
    fn from(e: FeatureError) -> Self {
        PyValueError::new_err(e.to_string())
    }
}

/// Forward pass backed by a Python callable.
struct PyForwardPass<'a, 'py> {
    callable: &'a Bound<'py, PyAny>,
    hidden_size: usize,
}

impl ForwardPass for PyForwardPass<'_, '_> {
    type Error = PyErr;

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn hidden_states(&self, tokens: &[Token]) -> Result<LayerStates, PyErr> {
        self.callable.call1((tokens.to_vec(),))?.extract()
    }
}

/// A planned window as `(start, new_start, end, [(word, position), ...])`.
type PyWindow = (usize, usize, usize, Vec<(usize, usize)>);

fn window_tuples(plan: &WindowPlan<'_>) -> Vec<PyWindow> {
    plan.windows()
        .iter()
        .map(|w| {
            let targets = w.targets.iter().map(|t| (t.word, t.position)).collect();
            (w.start, w.new_start, w.end, targets)
        })
        .collect()
}

fn word_key_ids(plan: &WindowPlan<'_>) -> Vec<Option<Vec<Token>>> {
    (0..plan.story().word_count())
        .map(|word| plan.key_for_word(word).map(|k| k.tokens().to_vec()))
        .collect()
}

/// Python wrapper for the window planner.
#[pyclass]
pub struct RustWindowPlanner {
    config: WindowConfig,
}

#[pymethods]
impl RustWindowPlanner {
    #[new]
    #[pyo3(signature = (min_window=256, max_window=512))]
    fn new(min_window: usize, max_window: usize) -> PyResult<Self> {
        Ok(Self {
            config: WindowConfig::new(min_window, max_window)?,
        })
    }

    /// Plans windows for a story given as per-word token lists.
    fn plan(&self, word_tokens: Vec<Vec<Token>>) -> PyResult<Vec<PyWindow>> {
        let story = TokenizedStory::from_word_tokens(&word_tokens);
        let plan = plan_windows(&story, &self.config)?;
        Ok(window_tuples(&plan))
    }

    /// Cache key of every word, `None` for words without tokens.
    fn word_keys(&self, word_tokens: Vec<Vec<Token>>) -> PyResult<Vec<Option<Vec<Token>>>> {
        let story = TokenizedStory::from_word_tokens(&word_tokens);
        let plan = plan_windows(&story, &self.config)?;
        Ok(word_key_ids(&plan))
    }
}

/// Python wrapper for the first-writer-wins feature cache.
#[pyclass]
pub struct RustFeatureCache {
    inner: FeatureCache,
}

#[pymethods]
impl RustFeatureCache {
    #[new]
    fn new(dim: usize) -> Self {
        Self {
            inner: FeatureCache::new(dim),
        }
    }

    fn put(&mut self, key: Vec<Token>, feature: Vec<f32>) -> PyResult<bool> {
        Ok(self.inner.put(TokenKey::new(&key), feature)?)
    }

    fn get(&self, key: Vec<Token>) -> Option<Vec<f32>> {
        self.inner.get(&TokenKey::new(&key)).map(<[f32]>::to_vec)
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __contains__(&self, key: Vec<Token>) -> bool {
        self.inner.contains(&TokenKey::new(&key))
    }
}

/// Extracts per-word features for one story.
///
/// Returns `(rows, unresolved)` where `unresolved` lists `(word, reason)`.
#[pyfunction]
#[pyo3(signature = (word_tokens, forward, hidden_size, min_window=256, max_window=512, layer=0))]
fn extract_story(
    word_tokens: Vec<Vec<Token>>,
    forward: &Bound<'_, PyAny>,
    hidden_size: usize,
    min_window: usize,
    max_window: usize,
    layer: usize,
) -> PyResult<(Vec<Vec<f32>>, Vec<(usize, String)>)> {
    let config = ExtractionConfig {
        window: WindowConfig::new(min_window, max_window)?,
        layer,
        show_progress: false,
    };
    let story = TokenizedStory::from_word_tokens(&word_tokens);
    let model = PyForwardPass {
        callable: forward,
        hidden_size,
    };

    let out = extractor::extract_story(&story, &model, &config)?;
    let unresolved = out
        .features
        .unresolved()
        .iter()
        .map(|u| (u.word, u.reason.to_string()))
        .collect();

    Ok((out.features.into_rows(), unresolved))
}

#[pymodule]
fn _ctxwin_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<RustWindowPlanner>()?;
    m.add_class::<RustFeatureCache>()?;
    m.add_function(wrap_pyfunction!(extract_story, m)?)?;
    Ok(())
}
