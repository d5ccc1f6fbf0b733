//! Pipeline configuration

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Watermarks and queue sizing for a batch pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Request more work once fewer than this many items are buffered or pending
    pub low_watermark: usize,
    /// Upper bound on buffered plus pending items
    pub high_watermark: usize,
    /// Hard capacity of the exchange queue (must hold at least `high_watermark`)
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            low_watermark: 32,
            high_watermark: 64,
            queue_capacity: 64,
        }
    }
}

impl PipelineConfig {
    /// Config with the given watermarks and a queue sized to the high watermark.
    pub fn with_watermarks(low_watermark: usize, high_watermark: usize) -> Self {
        Self {
            low_watermark,
            high_watermark,
            queue_capacity: high_watermark,
        }
    }

    /// Parse a JSON config; missing fields fall back to the defaults.
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.low_watermark == 0 {
            return Err(PipelineError::InvalidConfig(
                "low_watermark must be positive".to_string(),
            ));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(PipelineError::InvalidConfig(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.queue_capacity < self.high_watermark {
            return Err(PipelineError::InvalidConfig(format!(
                "queue_capacity ({}) must hold high_watermark ({}) items",
                self.queue_capacity, self.high_watermark
            )));
        }
        Ok(())
    }

    /// Number of free slots below which a refill is worthwhile.
    pub(crate) fn refill_threshold(&self) -> usize {
        self.high_watermark - self.low_watermark
    }
}
