//! Watermark-driven producer chain with a pull iterator

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::exchange::{ExchangeQueue, Slot};
use crate::pool::WorkerPool;
use crate::producer::{Producer, ProducerId, ProducerSink};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct ChainEntry<T> {
    id: ProducerId,
    producer: Arc<dyn Producer<T>>,
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the consuming iterator and producer tasks
pub(crate) struct Shared<T> {
    /// FIFO of producers; the head is the active one
    chain: Mutex<VecDeque<ChainEntry<T>>>,
    /// Buffered items plus the count of items requested from the head
    /// producer but not yet delivered
    queue: ExchangeQueue<T>,
    config: PipelineConfig,
    pool: Arc<dyn WorkerPool>,
    /// Serialises `may_produce`; re-entrant because a synchronous pool can
    /// finish a producer (and prime the next) from inside a request
    produce_gate: ReentrantMutex<()>,
    recycled: AtomicBool,
}

impl<T: Send + 'static> Shared<T> {
    /// Request more work from the head producer if the buffer has drained
    /// past the low watermark.
    ///
    /// The request is sized and reserved while the chain is locked, so it
    /// always belongs to the producer that is head at that moment. If that
    /// producer completes before the request reaches it, `done` has already
    /// dropped the reservation.
    pub(crate) fn may_produce(self: &Arc<Self>) {
        let _gate = self.produce_gate.lock();
        if self.recycled.load(Ordering::SeqCst) || self.queue.is_completed() {
            return;
        }
        let (id, producer, request) = {
            let chain = self.chain.lock();
            let Some(head) = chain.front() else {
                return;
            };
            let Some(request) = self
                .queue
                .reserve(self.config.high_watermark, self.config.refill_threshold())
            else {
                return;
            };
            (head.id, head.producer.clone(), request)
        };
        tracing::trace!(producer = %id, request, "requesting production");
        producer.produce(ProducerSink::new(self.clone(), id), request, self.pool.as_ref());
    }

    pub(crate) fn put(&self, item: T) -> Result<(), PipelineError> {
        self.queue.put(Slot::Item(item))?;
        Ok(())
    }

    pub(crate) fn done(
        self: &Arc<Self>,
        id: ProducerId,
        error: Option<PipelineError>,
    ) -> Result<(), PipelineError> {
        if self.recycled.load(Ordering::SeqCst) {
            return Err(PipelineError::Interrupted);
        }
        let (finished, abandoned, chain_empty) = {
            let mut chain = self.chain.lock();
            match chain.front() {
                Some(head) if head.id == id => {}
                Some(head) => {
                    return Err(PipelineError::IllegalState(format!(
                        "{id} signalled completion while {} is the chain head",
                        head.id
                    )))
                }
                None => {
                    return Err(PipelineError::IllegalState(format!(
                        "{id} signalled completion on an empty chain"
                    )))
                }
            }
            let finished = chain.pop_front();
            self.queue.clear_pending();
            // a failure ends the whole chain; nothing behind it may start
            let abandoned: Vec<ChainEntry<T>> = if error.is_some() {
                chain.drain(..).collect()
            } else {
                Vec::new()
            };
            (finished, abandoned, chain.is_empty())
        };
        if let Some(entry) = finished {
            entry.producer.recycle();
        }
        for entry in &abandoned {
            entry.producer.recycle();
        }

        match error {
            Some(error) => {
                tracing::warn!(
                    producer = %id,
                    abandoned = abandoned.len(),
                    error = %error,
                    "producer failed; completing pipeline"
                );
                self.queue.put(Slot::Completion(Some(error)))?;
            }
            None if chain_empty => {
                tracing::debug!(producer = %id, "last producer finished");
                self.queue.put(Slot::Completion(None))?;
            }
            None => {
                tracing::debug!(producer = %id, "producer finished; priming next");
                self.may_produce();
            }
        }
        Ok(())
    }

    /// Interrupt the queue, then release every producer still in the chain.
    fn recycle(&self) {
        if self.recycled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.interrupt();
        let remaining: Vec<ChainEntry<T>> = self.chain.lock().drain(..).collect();
        if !remaining.is_empty() {
            tracing::debug!(producers = remaining.len(), "recycling unfinished producers");
        }
        for entry in remaining {
            entry.producer.recycle();
        }
    }
}

// ============================================================================
// Pipeline Iterator
// ============================================================================

enum Cursor<T> {
    Empty,
    Fetched(T),
    Completed,
}

/// Pull iterator over a chain of producers.
///
/// Consumed by a single thread; producers may run on any number of workers.
pub struct Pipeline<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    cursor: Cursor<T>,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn new(
        producers: impl IntoIterator<Item = Arc<dyn Producer<T>>>,
        config: PipelineConfig,
        pool: Arc<dyn WorkerPool>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let chain: VecDeque<ChainEntry<T>> = producers
            .into_iter()
            .enumerate()
            .map(|(i, producer)| ChainEntry {
                id: ProducerId(i),
                producer,
            })
            .collect();
        let no_producers = chain.is_empty();
        let shared = Arc::new(Shared {
            chain: Mutex::new(chain),
            queue: ExchangeQueue::new(config.queue_capacity),
            config,
            pool,
            produce_gate: ReentrantMutex::new(()),
            recycled: AtomicBool::new(false),
        });
        if no_producers {
            shared.queue.put(Slot::Completion(None))?;
        }
        Ok(Self {
            shared,
            cursor: Cursor::Empty,
        })
    }

    /// Trigger production if due, without consuming anything.
    pub fn may_produce(&self) {
        self.shared.may_produce();
    }

    /// Whether another item is available, blocking until one arrives or the
    /// chain completes. A carried production error is returned once.
    pub fn has_next(&mut self) -> Result<bool, PipelineError> {
        match self.cursor {
            Cursor::Fetched(_) => return Ok(true),
            Cursor::Completed => return Ok(false),
            Cursor::Empty => {}
        }
        self.shared.may_produce();
        match self.shared.queue.take() {
            Ok(Slot::Item(item)) => {
                self.cursor = Cursor::Fetched(item);
                Ok(true)
            }
            Ok(Slot::Completion(error)) => {
                self.cursor = Cursor::Completed;
                self.shared.recycle();
                match error {
                    Some(error) => Err(error),
                    None => Ok(false),
                }
            }
            Err(err) => {
                self.cursor = Cursor::Completed;
                self.shared.recycle();
                Err(err.into())
            }
        }
    }

    /// Abandon the pipeline early, releasing every remaining producer.
    pub fn recycle(&mut self) {
        self.cursor = Cursor::Completed;
        self.shared.recycle();
    }

    /// Items requested but not yet delivered.
    pub fn pending(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Items buffered in the exchange queue.
    pub fn buffered(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }
}

impl<T: Send + 'static> Iterator for Pipeline<T> {
    type Item = Result<T, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => match std::mem::replace(&mut self.cursor, Cursor::Empty) {
                Cursor::Fetched(item) => Some(Ok(item)),
                _ => None,
            },
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<T: Send + 'static> Drop for Pipeline<T> {
    fn drop(&mut self) {
        self.shared.recycle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::InlinePool;
    use crate::producer::Producers;

    /// Producer that records requests and never answers on its own.
    struct Recording {
        requests: Mutex<Vec<usize>>,
        sinks: Mutex<Vec<ProducerSink<u32>>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                sinks: Mutex::new(Vec::new()),
            })
        }
    }

    impl Producer<u32> for Recording {
        fn produce(&self, sink: ProducerSink<u32>, request: usize, _pool: &dyn WorkerPool) {
            self.requests.lock().push(request);
            self.sinks.lock().push(sink);
        }

        fn recycle(&self) {}
    }

    fn pipeline_over(producer: Arc<Recording>, low: usize, high: usize) -> Pipeline<u32> {
        let producer: Arc<dyn Producer<u32>> = producer;
        Pipeline::new(
            vec![producer],
            PipelineConfig::with_watermarks(low, high),
            InlinePool::shared(),
        )
        .unwrap()
    }

    #[test]
    fn requests_up_to_high_watermark_when_drained() {
        let producer = Recording::new();
        let pipeline = pipeline_over(producer.clone(), 2, 4);
        pipeline.may_produce();
        assert_eq!(*producer.requests.lock(), vec![4]);
        assert_eq!(pipeline.pending(), 4);

        // outstanding request keeps further requests from being issued
        pipeline.may_produce();
        assert_eq!(producer.requests.lock().len(), 1);
    }

    #[test]
    fn watermark_scenario_with_one_buffered_item() {
        let producer = Recording::new();
        let pipeline = pipeline_over(producer.clone(), 2, 4);
        pipeline.shared.queue.put(Slot::Item(7)).unwrap();

        pipeline.may_produce();
        assert_eq!(*producer.requests.lock(), vec![3]);
    }

    #[test]
    fn watermark_scenario_with_three_buffered_items() {
        let producer = Recording::new();
        let pipeline = pipeline_over(producer.clone(), 2, 4);
        for i in 0..3 {
            pipeline.shared.queue.put(Slot::Item(i)).unwrap();
        }

        pipeline.may_produce();
        assert!(producer.requests.lock().is_empty());
        assert_eq!(pipeline.buffered(), 3);
    }

    #[test]
    fn put_decrements_pending() {
        let producer = Recording::new();
        let pipeline = pipeline_over(producer.clone(), 2, 4);
        pipeline.may_produce();
        let sink = producer.sinks.lock()[0].clone();
        sink.put(1).unwrap();
        sink.put(2).unwrap();
        assert_eq!(pipeline.pending(), 2);
        assert_eq!(pipeline.buffered(), 2);
    }

    #[test]
    fn done_from_non_head_is_illegal() {
        let first = Recording::new();
        let second = Recording::new();
        let producers: Vec<Arc<dyn Producer<u32>>> = vec![first.clone(), second.clone()];
        let pipeline = Pipeline::new(
            producers,
            PipelineConfig::with_watermarks(2, 4),
            InlinePool::shared(),
        )
        .unwrap();
        pipeline.may_produce();

        let bogus = ProducerSink::new(pipeline.shared.clone(), ProducerId(1));
        assert!(matches!(bogus.done(), Err(PipelineError::IllegalState(_))));

        // head completion primes the second producer with a fresh request
        let head = first.sinks.lock()[0].clone();
        head.done().unwrap();
        assert_eq!(pipeline.pending(), 4);
        assert_eq!(*second.requests.lock(), vec![4]);
    }

    #[test]
    fn failed_head_abandons_the_rest_of_the_chain() {
        let first = Recording::new();
        let second = Recording::new();
        let producers: Vec<Arc<dyn Producer<u32>>> = vec![first.clone(), second.clone()];
        let pipeline = Pipeline::new(
            producers,
            PipelineConfig::with_watermarks(2, 4),
            InlinePool::shared(),
        )
        .unwrap();
        pipeline.may_produce();

        let head = first.sinks.lock()[0].clone();
        head.put(1).unwrap();
        head.done_with(PipelineError::Production("bad page".into()))
            .unwrap();
        assert!(pipeline.shared.chain.lock().is_empty());
        assert_eq!(pipeline.pending(), 0);

        // a drained buffer must not wake the abandoned producer
        pipeline.may_produce();
        assert!(second.requests.lock().is_empty());
        assert_eq!(pipeline.buffered(), 2, "item and completion stay readable");
    }

    #[test]
    fn reservation_of_a_finished_head_is_dropped() {
        let first = Recording::new();
        let second = Recording::new();
        let producers: Vec<Arc<dyn Producer<u32>>> = vec![first.clone(), second.clone()];
        let pipeline = Pipeline::new(
            producers,
            PipelineConfig::with_watermarks(2, 4),
            InlinePool::shared(),
        )
        .unwrap();
        pipeline.may_produce();
        let head = first.sinks.lock()[0].clone();
        head.put(1).unwrap();
        assert_eq!(pipeline.pending(), 3);

        // the head stops short of its request; the new head gets the room back
        head.done().unwrap();
        assert_eq!(*second.requests.lock(), vec![3]);
        assert_eq!(pipeline.pending(), 3);
    }

    #[test]
    fn empty_chain_completes_immediately() {
        let mut pipeline: Pipeline<u32> = Pipeline::new(
            Vec::new(),
            PipelineConfig::default(),
            InlinePool::shared(),
        )
        .unwrap();
        assert!(!pipeline.has_next().unwrap());
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn empty_producers_are_skipped() {
        let pipeline = Pipeline::new(
            vec![
                Producers::empty(),
                Producers::from_items(vec![1u32, 2]),
                Producers::empty(),
            ],
            PipelineConfig::with_watermarks(2, 4),
            InlinePool::shared(),
        )
        .unwrap();
        let items: Vec<u32> = pipeline.map(Result::unwrap).collect();
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result: Result<Pipeline<u32>, _> = Pipeline::new(
            Vec::new(),
            PipelineConfig::with_watermarks(4, 2),
            InlinePool::shared(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}
