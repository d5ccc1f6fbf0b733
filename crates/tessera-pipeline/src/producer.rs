//! Producers feeding a batch pipeline
//!
//! A producer is asked for a number of items and answers asynchronously
//! through its [`ProducerSink`]: zero or more `put`s, then exactly one
//! `done`/`done_with` once it has nothing left.

use crate::error::PipelineError;
use crate::pipeline::Shared;
use crate::pool::WorkerPool;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Position of a producer in its pipeline's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(pub(crate) usize);

impl ProducerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "producer#{}", self.0)
    }
}

/// Upstream source of items for a pipeline
pub trait Producer<T>: Send + Sync {
    /// Produce up to `request` items into `sink`, typically on `pool`.
    ///
    /// Must eventually call [`ProducerSink::done`] (or `done_with`) once the
    /// producer is exhausted or has failed.
    fn produce(&self, sink: ProducerSink<T>, request: usize, pool: &dyn WorkerPool);

    /// Release held resources. Called exactly once per producer, whether or
    /// not it ever produced.
    fn recycle(&self);
}

// ============================================================================
// Producer Sink
// ============================================================================

/// Handle through which one producer delivers into its pipeline
pub struct ProducerSink<T> {
    shared: Arc<Shared<T>>,
    id: ProducerId,
}

impl<T> Clone for ProducerSink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            id: self.id,
        }
    }
}

impl<T: Send + 'static> ProducerSink<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, id: ProducerId) -> Self {
        Self { shared, id }
    }

    pub fn id(&self) -> ProducerId {
        self.id
    }

    /// Deliver one item.
    pub fn put(&self, item: T) -> Result<(), PipelineError> {
        self.shared.put(item)
    }

    /// Signal that this producer is exhausted.
    pub fn done(&self) -> Result<(), PipelineError> {
        self.shared.done(self.id, None)
    }

    /// Signal that this producer failed; the pipeline completes with `error`.
    pub fn done_with(&self, error: PipelineError) -> Result<(), PipelineError> {
        self.shared.done(self.id, Some(error))
    }
}

// ============================================================================
// Iterator Producer
// ============================================================================

type BoxedIter<T> = Box<dyn Iterator<Item = anyhow::Result<T>> + Send>;

struct IterState<T> {
    iter: Option<BoxedIter<T>>,
    finished: bool,
}

/// Producer over a (possibly fallible) iterator from the storage layer.
///
/// Batches for the same producer run one at a time, so its items keep
/// iterator order.
pub struct IteratorProducer<T> {
    state: Arc<Mutex<IterState<T>>>,
}

impl<T: Send + 'static> IteratorProducer<T> {
    pub fn new<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = anyhow::Result<T>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(IterState {
                iter: Some(Box::new(iter.into_iter())),
                finished: false,
            })),
        }
    }

    /// Producer over an infallible iterator.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::new(items.into_iter().map(Ok::<T, anyhow::Error>))
    }

    fn run(state: &Mutex<IterState<T>>, sink: &ProducerSink<T>, request: usize) {
        let mut guard = state.lock();
        if guard.finished {
            return;
        }
        let mut outcome = None;
        for _ in 0..request {
            let next = guard.iter.as_mut().and_then(|iter| iter.next());
            match next {
                Some(Ok(item)) => {
                    if let Err(err) = sink.put(item) {
                        tracing::debug!(producer = %sink.id(), error = %err, "producer stopped by pipeline");
                        guard.finished = true;
                        return;
                    }
                }
                Some(Err(err)) => {
                    outcome = Some(Some(PipelineError::production(&err)));
                    break;
                }
                None => {
                    outcome = Some(None);
                    break;
                }
            }
        }
        let Some(error) = outcome else {
            return;
        };
        guard.finished = true;
        guard.iter = None;
        drop(guard);

        let result = match error {
            Some(error) => sink.done_with(error),
            None => sink.done(),
        };
        if let Err(err) = result {
            tracing::debug!(producer = %sink.id(), error = %err, "completion not accepted");
        }
    }
}

impl<T: Send + 'static> Producer<T> for IteratorProducer<T> {
    fn produce(&self, sink: ProducerSink<T>, request: usize, pool: &dyn WorkerPool) {
        let state = self.state.clone();
        pool.submit(Box::new(move || Self::run(&state, &sink, request)));
    }

    fn recycle(&self) {
        let mut guard = self.state.lock();
        guard.finished = true;
        guard.iter = None;
    }
}

// ============================================================================
// Constructors
// ============================================================================

struct EmptyProducer;

impl<T: Send + 'static> Producer<T> for EmptyProducer {
    fn produce(&self, sink: ProducerSink<T>, _request: usize, _pool: &dyn WorkerPool) {
        if let Err(err) = sink.done() {
            tracing::debug!(producer = %sink.id(), error = %err, "completion not accepted");
        }
    }

    fn recycle(&self) {}
}

/// Convenience constructors for boxed producers
pub struct Producers;

impl Producers {
    /// A producer with no items.
    pub fn empty<T: Send + 'static>() -> Arc<dyn Producer<T>> {
        Arc::new(EmptyProducer)
    }

    pub fn from_iter<T, I>(iter: I) -> Arc<dyn Producer<T>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = anyhow::Result<T>>,
        I::IntoIter: Send + 'static,
    {
        Arc::new(IteratorProducer::new(iter))
    }

    pub fn from_items<T, I>(items: I) -> Arc<dyn Producer<T>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Arc::new(IteratorProducer::from_items(items))
    }
}
