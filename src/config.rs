//! Extraction settings.
//!
//! Both structs deserialize with serde so a caller can keep them next to the
//! rest of its experiment configuration. Missing fields fall back to the
//! defaults below.

use serde::{Deserialize, Serialize};

use crate::error::{FeatureError, Result};

/// Smallest context a resolved token may see, in tokens.
pub const DEFAULT_MIN_WINDOW: usize = 256;

/// Largest window handed to the model in one forward pass, in tokens.
pub const DEFAULT_MAX_WINDOW: usize = 512;

/// Window-size bounds for the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub min_window: usize,
    pub max_window: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            min_window: DEFAULT_MIN_WINDOW,
            max_window: DEFAULT_MAX_WINDOW,
        }
    }
}

impl WindowConfig {
    /// Creates validated bounds.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::InvalidConfiguration`] if either bound is zero
    /// or `min_window > max_window`.
    pub fn new(min_window: usize, max_window: usize) -> Result<Self> {
        let cfg = Self {
            min_window,
            max_window,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the bounds.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::InvalidConfiguration`] if either bound is zero
    /// or `min_window > max_window`.
    pub fn validate(&self) -> Result<()> {
        if self.min_window == 0 || self.max_window == 0 {
            return Err(FeatureError::InvalidConfiguration(format!(
                "window bounds must be positive (min_window={}, max_window={})",
                self.min_window, self.max_window
            )));
        }
        if self.min_window > self.max_window {
            return Err(FeatureError::InvalidConfiguration(format!(
                "min_window ({}) > max_window ({})",
                self.min_window, self.max_window
            )));
        }
        Ok(())
    }

    /// Burn-in tokens placed before the cursor in every window after the first.
    ///
    /// With `min_window - 1` tokens of burn-in, the first new token of a
    /// window sees exactly `min_window` tokens including itself.
    pub(crate) fn burn_in(&self) -> usize {
        self.min_window.saturating_sub(1)
    }
}

/// Settings for a full extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    #[serde(flatten)]
    pub window: WindowConfig,

    /// Which layer of the forward-pass output to keep.
    pub layer: usize,

    /// Whether corpus extraction draws a progress bar.
    pub show_progress: bool,
}

impl ExtractionConfig {
    /// # Errors
    ///
    /// Returns [`FeatureError::InvalidConfiguration`] if the window bounds are invalid.
    pub fn validate(&self) -> Result<()> {
        self.window.validate()
    }
}
