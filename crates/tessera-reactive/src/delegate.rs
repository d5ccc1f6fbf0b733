//! Cross-cutting delegates attached to every node of a graph
//!
//! Both delegates are thin, cloneable handles that forward to an actor. A
//! detached delegate (no actor) turns every call into a no-op, which is how
//! standalone graphs in unit tests run without a computation around them.

use crate::actor::Driver;
use crate::identifier::ReactiveIdentifier;
use crate::monitor::Monitor;
use crate::tracer::Tracer;
use std::fmt::Debug;

/// Termination accounting and path registration
#[derive(Debug, Clone, Default)]
pub struct Monitoring {
    monitor: Option<Driver<Monitor>>,
}

impl Monitoring {
    pub fn new(monitor: Driver<Monitor>) -> Self {
        Self {
            monitor: Some(monitor),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.monitor.is_some()
    }

    pub fn register_source(&self, source: &ReactiveIdentifier) {
        let source = source.clone();
        self.send(move |monitor| monitor.register_source(source));
    }

    pub fn source_finished(&self, source: &ReactiveIdentifier) {
        let source = source.clone();
        self.send(move |monitor| monitor.source_finished(source));
    }

    pub fn answers_created(&self, reactive: &ReactiveIdentifier, count: usize) {
        if count == 0 {
            return;
        }
        let reactive = reactive.clone();
        self.send(move |monitor| monitor.answers_created(reactive, count as u64));
    }

    pub fn answer_consumed(&self, reactive: &ReactiveIdentifier) {
        let reactive = reactive.clone();
        self.send(move |monitor| monitor.answer_consumed(reactive));
    }

    pub fn register_path(&self, subscriber: &ReactiveIdentifier, publisher: &ReactiveIdentifier) {
        let (subscriber, publisher) = (subscriber.clone(), publisher.clone());
        self.send(move |monitor| monitor.register_path(subscriber, publisher));
    }

    fn send(&self, action: impl FnOnce(&mut Monitor) + Send + 'static) {
        if let Some(monitor) = &self.monitor {
            monitor.execute(action);
        }
    }
}

/// Pull/receive event tracing
#[derive(Debug, Clone, Default)]
pub struct Tracing {
    tracer: Option<Driver<Tracer>>,
}

impl Tracing {
    pub fn new(tracer: Driver<Tracer>) -> Self {
        Self {
            tracer: Some(tracer),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.tracer.is_some()
    }

    pub fn pull(&self, subscriber: &ReactiveIdentifier, publisher: &ReactiveIdentifier) {
        if let Some(tracer) = &self.tracer {
            let (subscriber, publisher) = (subscriber.to_string(), publisher.to_string());
            tracer.execute(move |t| t.pull(subscriber, publisher));
        }
    }

    pub fn receive(
        &self,
        publisher: &ReactiveIdentifier,
        subscriber: &ReactiveIdentifier,
        packet: &impl Debug,
    ) {
        if let Some(tracer) = &self.tracer {
            let (publisher, subscriber) = (publisher.to_string(), subscriber.to_string());
            let packet = format!("{packet:?}");
            tracer.execute(move |t| t.receive(publisher, subscriber, packet));
        }
    }
}

/// Both delegates, as handed to a graph
#[derive(Debug, Clone, Default)]
pub struct Delegates {
    pub monitoring: Monitoring,
    pub tracing: Tracing,
}

impl Delegates {
    pub fn detached() -> Self {
        Self::default()
    }
}
