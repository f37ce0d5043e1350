//! Event loop configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tunables for an [`EventLoop`](super::EventLoop).
///
/// Missing fields take their defaults, so `{}` is a valid configuration.
///
/// ```
/// use deferred::EventLoopConfig;
///
/// let config = EventLoopConfig::from_json(r#"{ "microtask_budget": 64 }"#).unwrap();
/// assert_eq!(config.microtask_budget, 64);
/// assert!(config.report_unhandled_rejections);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Maximum microtasks drained per tick before timers get a turn
    pub microtask_budget: usize,
    /// Log and record rejections that no handler was ever registered for
    pub report_unhandled_rejections: bool,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            microtask_budget: 10_000,
            report_unhandled_rejections: true,
        }
    }
}

impl EventLoopConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.microtask_budget == 0 {
            return Err(Error::config("microtask_budget must be greater than zero"));
        }
        Ok(())
    }
}
