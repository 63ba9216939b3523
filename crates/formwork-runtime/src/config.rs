#![forbid(unsafe_code)]

//! Serializable form configuration.

use std::time::Duration;

use formwork_core::{FormError, Result};
use serde::{Deserialize, Serialize};

use crate::history::DEFAULT_MAX_SIZE;

/// Default quiet period before a live async validation fires.
pub const DEFAULT_ASYNC_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Undo steps retained; the oldest are dropped first.
    pub max_size: usize,
    /// Coalesce pushes arriving within this window. `0` records every push.
    pub debounce_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            debounce_ms: 0,
        }
    }
}

impl HistoryConfig {
    #[must_use]
    pub fn debounce(&self) -> Option<Duration> {
        (self.debounce_ms > 0).then(|| Duration::from_millis(self.debounce_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// `None` disables undo/redo.
    pub history: Option<HistoryConfig>,
    /// Debounce for fields whose async validator does not set its own.
    pub async_debounce_ms: u64,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            history: None,
            async_debounce_ms: DEFAULT_ASYNC_DEBOUNCE_MS,
        }
    }
}

impl FormConfig {
    /// Parse and validate a JSON document. Missing keys take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(history) = &self.history
            && history.max_size == 0
        {
            return Err(FormError::Config(
                "history.max_size must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn async_debounce(&self) -> Duration {
        Duration::from_millis(self.async_debounce_ms)
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = Some(history);
        self
    }
}
