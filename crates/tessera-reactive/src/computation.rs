//! A reactive computation: monitor, optional tracer and the processors that
//! answer one query

use crate::actor::{self, ActorHandle, Driver};
use crate::config::ReactiveConfig;
use crate::delegate::{Delegates, Monitoring, Tracing};
use crate::error::ReactiveError;
use crate::graph::ReactiveGraph;
use crate::identifier::NodeId;
use crate::monitor::{Monitor, MonitorSnapshot};
use crate::processor::{Processor, RootEvent};
use crate::tracer::Tracer;
use crate::Packet;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub struct Computation<P: Packet> {
    id: Uuid,
    config: ReactiveConfig,
    monitor: Driver<Monitor>,
    tracer: Option<Driver<Tracer>>,
    processors: Vec<Driver<Processor<P>>>,
    processor_handles: Vec<ActorHandle>,
    service_handles: Vec<ActorHandle>,
    answering: bool,
}

impl<P: Packet> Computation<P> {
    /// Start the monitor, and a file tracer when `trace_dir` is configured.
    pub fn new(config: ReactiveConfig) -> Result<Self, ReactiveError> {
        config.validate()?;
        let id = Uuid::new_v4();
        let tracer = match &config.trace_dir {
            Some(dir) => Some(Tracer::to_file(dir, id)?),
            None => None,
        };
        Self::start(config, id, tracer)
    }

    /// Start with a caller-supplied tracer, such as an in-memory one.
    pub fn with_tracer(config: ReactiveConfig, tracer: Tracer) -> Result<Self, ReactiveError> {
        config.validate()?;
        Self::start(config, Uuid::new_v4(), Some(tracer))
    }

    fn start(config: ReactiveConfig, id: Uuid, tracer: Option<Tracer>) -> Result<Self, ReactiveError> {
        let mut service_handles = Vec::new();
        let (monitor, handle) = actor::spawn(config.thread_name("monitor"), |_| Ok(Monitor::new()))?;
        service_handles.push(handle);
        let tracer = match tracer {
            Some(tracer) => {
                let (driver, handle) = actor::spawn(config.thread_name("tracer"), move |_| Ok(tracer))?;
                service_handles.push(handle);
                Some(driver)
            }
            None => None,
        };
        tracing::info!(computation = %id, traced = tracer.is_some(), "reactive computation started");
        Ok(Self {
            id,
            config,
            monitor,
            tracer,
            processors: Vec::new(),
            processor_handles: Vec::new(),
            service_handles,
            answering: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ReactiveConfig {
        &self.config
    }

    pub fn trace_path(&self) -> Option<PathBuf> {
        self.config
            .trace_dir
            .as_deref()
            .map(|dir| Tracer::trace_path(dir, self.id))
    }

    /// Spawn a processor whose graph is built by `build` on this thread.
    ///
    /// All processors must be spawned before the first call to
    /// [`answers`](Self::answers), so that every source is registered before
    /// termination can be decided.
    pub fn spawn_processor<R>(
        &mut self,
        name: &str,
        build: impl FnOnce(&mut ReactiveGraph<P>) -> Result<R, ReactiveError>,
    ) -> Result<(Driver<Processor<P>>, R), ReactiveError> {
        if self.answering {
            return Err(ReactiveError::IllegalState(
                "processors must be spawned before answers are requested".to_string(),
            ));
        }
        let delegates = Delegates {
            monitoring: Monitoring::new(self.monitor.clone()),
            tracing: self.tracer.clone().map(Tracing::new).unwrap_or_default(),
        };
        let monitor = self.monitor.clone();
        let mut built = None;
        let (driver, handle) = actor::spawn(self.config.thread_name(name), |driver: Driver<Processor<P>>| {
            let mut graph = ReactiveGraph::new(driver.id(), name, delegates);
            built = Some(build(&mut graph)?);
            Ok(Processor::new(driver, graph, Some(monitor)))
        })?;
        self.processor_handles.push(handle);

        let member = driver.clone();
        self.monitor.execute(move |m| {
            m.register_member(Box::new(move |cause| {
                member.execute(move |p| p.terminate(cause));
            }))
        });
        self.processors.push(driver.clone());
        let built = built.ok_or_else(|| {
            ReactiveError::IllegalState(format!("processor {name} produced no graph"))
        })?;
        Ok((driver, built))
    }

    /// Wire `outlet` of `upstream` to `inlet` of `downstream`.
    pub fn connect(
        &self,
        upstream: &Driver<Processor<P>>,
        outlet: NodeId,
        downstream: &Driver<Processor<P>>,
        inlet: NodeId,
    ) {
        let target = downstream.clone();
        upstream.execute(move |p| p.attach_downstream(outlet, target, inlet));
        let source = upstream.clone();
        downstream.execute(move |p| p.attach_upstream(inlet, source, outlet));
    }

    /// Open the answer stream of `root` hosted by `processor`.
    pub fn answers(&mut self, processor: &Driver<Processor<P>>, root: NodeId) -> AnswerStream<P> {
        self.answering = true;
        let (sender, events) = unbounded();
        processor.execute(move |p| p.open_root(root, sender));
        AnswerStream {
            processor: processor.clone(),
            root,
            events,
            timeout: self.config.answer_timeout(),
            finished: false,
        }
    }

    /// Terminate the computation; open answer streams fail with `reason`.
    pub fn terminate(&self, reason: impl Into<String>) {
        let cause = ReactiveError::Terminated(reason.into());
        self.monitor.execute(move |m| m.terminate(cause));
    }

    pub fn monitor_snapshot(&self) -> Result<MonitorSnapshot, ReactiveError> {
        let (sender, receiver) = bounded(1);
        if !self.monitor.execute(move |m| {
            let _ = sender.send(m.snapshot());
        }) {
            return Err(ReactiveError::ActorStopped(self.monitor.name().to_string()));
        }
        receiver
            .recv()
            .map_err(|_| ReactiveError::ActorStopped(self.monitor.name().to_string()))
    }

    /// Stop and join every actor. Processors go first so that their last
    /// reports still reach the monitor and tracer.
    pub fn shutdown(&mut self) -> Result<(), ReactiveError> {
        let mut first_error = None;
        for processor in &self.processors {
            processor.stop();
        }
        for handle in self.processor_handles.drain(..) {
            if let Err(e) = handle.join() {
                first_error.get_or_insert(e);
            }
        }
        self.monitor.stop();
        if let Some(tracer) = &self.tracer {
            tracer.stop();
        }
        for handle in self.service_handles.drain(..) {
            if let Err(e) = handle.join() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<P: Packet> Drop for Computation<P> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(computation = %self.id, error = %e, "reactive computation shutdown failed");
        }
    }
}

/// Blocking iterator over the answers of one root.
///
/// Each call to `next` issues exactly one pull on the root and waits for the
/// resulting answer, completion or failure.
pub struct AnswerStream<P: Packet> {
    processor: Driver<Processor<P>>,
    root: NodeId,
    events: Receiver<RootEvent<P>>,
    timeout: Option<Duration>,
    finished: bool,
}

impl<P: Packet> AnswerStream<P> {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn wait(&self) -> Result<RootEvent<P>, ReactiveError> {
        let stopped = || ReactiveError::ActorStopped(self.processor.name().to_string());
        match self.timeout {
            Some(timeout) => self.events.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => ReactiveError::Timeout,
                RecvTimeoutError::Disconnected => stopped(),
            }),
            None => self.events.recv().map_err(|_| stopped()),
        }
    }
}

impl<P: Packet> Iterator for AnswerStream<P> {
    type Item = Result<P, ReactiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let root = self.root;
        if !self.processor.execute(move |p| p.pull_root(root)) {
            self.finished = true;
            return Some(Err(ReactiveError::ActorStopped(
                self.processor.name().to_string(),
            )));
        }
        match self.wait() {
            Ok(RootEvent::Answer(packet)) => Some(Ok(packet)),
            Ok(RootEvent::Done) => {
                self.finished = true;
                None
            }
            Ok(RootEvent::Failed(e)) | Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
