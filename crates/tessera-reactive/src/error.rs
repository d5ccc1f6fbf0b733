//! Error types for the reactive operator graph

/// Errors raised inside a reactive computation.
///
/// `Clone` so that one termination cause can be broadcast to every processor
/// and root consumer of a computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    /// A source failed to materialise or to produce its next item.
    #[error("source {reactive} failed: {message}")]
    Source { reactive: String, message: String },
    /// A map/flat-map callback failed on an item.
    #[error("transform in {reactive} failed: {message}")]
    Transform { reactive: String, message: String },
    /// Wiring or protocol violation; a programming error.
    #[error("illegal reactive state: {0}")]
    IllegalState(String),
    #[error("actor {0} is no longer running")]
    ActorStopped(String),
    #[error("reasoning terminated: {0}")]
    Terminated(String),
    #[error("timed out waiting for an answer")]
    Timeout,
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("invalid reactive configuration: {0}")]
    InvalidConfig(String),
}

impl ReactiveError {
    pub(crate) fn source(reactive: impl ToString, error: &anyhow::Error) -> Self {
        ReactiveError::Source {
            reactive: reactive.to_string(),
            message: format!("{error:#}"),
        }
    }

    pub(crate) fn transform(reactive: impl ToString, error: &anyhow::Error) -> Self {
        ReactiveError::Transform {
            reactive: reactive.to_string(),
            message: format!("{error:#}"),
        }
    }
}

impl From<std::io::Error> for ReactiveError {
    fn from(error: std::io::Error) -> Self {
        ReactiveError::Io(error.to_string())
    }
}
