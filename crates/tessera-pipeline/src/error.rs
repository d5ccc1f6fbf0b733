//! Error types for the batch pipeline

/// Failures of the blocking exchange queue itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("exchange queue was interrupted while blocked")]
    Interrupted,
    #[error("exchange queue already holds its completion marker")]
    Closed,
}

/// Errors surfaced to a pipeline's consumer or to a misbehaving producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// An upstream producer failed while producing items.
    #[error("production failed: {0}")]
    Production(String),
    /// Protocol violation, e.g. `done` called by a producer that is not the chain head.
    #[error("illegal pipeline state: {0}")]
    IllegalState(String),
    #[error("pipeline execution was interrupted")]
    Interrupted,
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Wrap an arbitrary producer failure, keeping its full context chain.
    pub fn production(error: &anyhow::Error) -> Self {
        PipelineError::Production(format!("{error:#}"))
    }
}

impl From<ExchangeError> for PipelineError {
    fn from(error: ExchangeError) -> Self {
        match error {
            ExchangeError::Interrupted => PipelineError::Interrupted,
            ExchangeError::Closed => {
                PipelineError::IllegalState("item offered after completion".to_string())
            }
        }
    }
}
