//! Reactive computation configuration

use crate::error::ReactiveError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one reactive computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Directory receiving `trace-<computation>.jsonl`; tracing is off when unset
    pub trace_dir: Option<PathBuf>,
    /// Prefix for actor thread names
    pub thread_name_prefix: String,
    /// Give up waiting for a root answer after this many milliseconds
    pub answer_timeout_ms: Option<u64>,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            trace_dir: None,
            thread_name_prefix: "tessera".to_string(),
            answer_timeout_ms: None,
        }
    }
}

impl ReactiveConfig {
    pub fn from_json(text: &str) -> Result<Self, ReactiveError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ReactiveError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReactiveError> {
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ReactiveError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        if self.answer_timeout_ms == Some(0) {
            return Err(ReactiveError::InvalidConfig(
                "answer_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn thread_name(&self, actor: &str) -> String {
        format!("{}-{}", self.thread_name_prefix, actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_tracing() {
        let config = ReactiveConfig::default();
        assert!(config.trace_dir.is_none());
        assert_eq!(config.thread_name("monitor"), "tessera-monitor");
        config.validate().unwrap();
    }

    #[test]
    fn parses_trace_dir_from_json() {
        let config =
            ReactiveConfig::from_json(r#"{ "trace_dir": "/tmp/traces", "answer_timeout_ms": 500 }"#)
                .unwrap();
        assert_eq!(config.trace_dir, Some(PathBuf::from("/tmp/traces")));
        assert_eq!(config.answer_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.thread_name_prefix, "tessera");
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(ReactiveConfig::from_json(r#"{ "answer_timeout_ms": 0 }"#).is_err());
    }
}
