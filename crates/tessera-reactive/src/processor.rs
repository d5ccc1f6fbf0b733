//! Actor hosting one reactive graph

use crate::actor::Driver;
use crate::error::ReactiveError;
use crate::graph::{Effect, ReactiveGraph};
use crate::identifier::NodeId;
use crate::monitor::Monitor;
use crate::Packet;
use crossbeam_channel::Sender;
use std::collections::BTreeMap;

/// What a root consumer hears from its processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootEvent<P> {
    Answer(P),
    /// Every answer has been delivered
    Done,
    Failed(ReactiveError),
}

/// Remote end of an inlet or outlet
struct Link<P: Packet> {
    processor: Driver<Processor<P>>,
    port: NodeId,
}

pub struct Processor<P: Packet> {
    driver: Driver<Processor<P>>,
    graph: ReactiveGraph<P>,
    monitor: Option<Driver<Monitor>>,
    downstream: BTreeMap<NodeId, Link<P>>,
    upstream: BTreeMap<NodeId, Link<P>>,
    roots: BTreeMap<NodeId, Sender<RootEvent<P>>>,
    failure: Option<ReactiveError>,
}

impl<P: Packet> Processor<P> {
    pub fn new(driver: Driver<Processor<P>>, graph: ReactiveGraph<P>, monitor: Option<Driver<Monitor>>) -> Self {
        Self {
            driver,
            graph,
            monitor,
            downstream: BTreeMap::new(),
            upstream: BTreeMap::new(),
            roots: BTreeMap::new(),
            failure: None,
        }
    }

    pub fn graph(&self) -> &ReactiveGraph<P> {
        &self.graph
    }

    pub fn failure(&self) -> Option<&ReactiveError> {
        self.failure.as_ref()
    }

    /// Route items received by `outlet` to `inlet` of `downstream`.
    pub fn attach_downstream(&mut self, outlet: NodeId, downstream: Driver<Processor<P>>, inlet: NodeId) {
        self.downstream.insert(
            outlet,
            Link {
                processor: downstream,
                port: inlet,
            },
        );
    }

    /// Route pulls on `inlet` to `outlet` of `upstream`.
    pub fn attach_upstream(&mut self, inlet: NodeId, upstream: Driver<Processor<P>>, outlet: NodeId) {
        self.upstream.insert(
            inlet,
            Link {
                processor: upstream,
                port: outlet,
            },
        );
    }

    /// Deliver answers of `root` to `answers` and register the root with the
    /// monitor, which reports completion back through this processor.
    pub fn open_root(&mut self, root: NodeId, answers: Sender<RootEvent<P>>) {
        let identifier = match self.graph.identifier(root) {
            Ok(identifier) => identifier.clone(),
            Err(e) => {
                let _ = answers.send(RootEvent::Failed(e));
                return;
            }
        };
        self.roots.insert(root, answers);
        match &self.monitor {
            Some(monitor) => {
                let processor = self.driver.clone();
                monitor.execute(move |m| {
                    m.register_root(
                        identifier,
                        Box::new(move |outcome| {
                            processor.execute(move |p| p.root_finished(root, outcome));
                        }),
                    )
                });
            }
            None => tracing::debug!(%identifier, "root opened without a monitor"),
        }
    }

    pub fn pull_root(&mut self, root: NodeId) {
        if let Some(cause) = &self.failure {
            if let Some(answers) = self.roots.get(&root) {
                let _ = answers.send(RootEvent::Failed(cause.clone()));
            }
            return;
        }
        let result = self.graph.pull_root(root);
        self.settle(result);
    }

    pub fn pull_outlet(&mut self, outlet: NodeId) {
        let result = self.graph.pull_outlet(outlet);
        self.settle(result);
    }

    pub fn receive_inlet(&mut self, inlet: NodeId, packet: P) {
        let result = self.graph.receive_inlet(inlet, packet);
        self.settle(result);
    }

    pub fn retry_pull(&mut self, subscriber: NodeId, publisher: NodeId) {
        let result = self.graph.retry_pull(subscriber, publisher);
        self.settle(result);
    }

    pub fn root_finished(&mut self, root: NodeId, outcome: Result<(), ReactiveError>) {
        match outcome {
            Ok(()) => {
                if let Some(answers) = self.roots.get(&root) {
                    let _ = answers.send(RootEvent::Done);
                }
            }
            Err(cause) => self.terminate(cause),
        }
    }

    /// Stop all work: release the graph and fail every open root.
    pub fn terminate(&mut self, cause: ReactiveError) {
        if self.failure.is_some() {
            return;
        }
        tracing::debug!(processor = %self.driver.name(), error = %cause, "processor terminated");
        self.graph.release();
        for answers in self.roots.values() {
            let _ = answers.send(RootEvent::Failed(cause.clone()));
        }
        self.failure = Some(cause);
    }

    fn settle(&mut self, result: Result<(), ReactiveError>) {
        if let Err(e) = result.and_then(|()| self.dispatch_effects()) {
            self.fail(e);
        }
    }

    fn dispatch_effects(&mut self) -> Result<(), ReactiveError> {
        for effect in self.graph.take_effects() {
            match effect {
                Effect::RetryPull {
                    subscriber,
                    publisher,
                } => {
                    self.driver
                        .execute(move |p| p.retry_pull(subscriber, publisher));
                }
                Effect::RemotePull { inlet } => {
                    let link = self.upstream.get(&inlet).ok_or_else(|| {
                        ReactiveError::IllegalState(format!("inlet {inlet} is not connected"))
                    })?;
                    let outlet = link.port;
                    if !link.processor.execute(move |p| p.pull_outlet(outlet)) {
                        return Err(ReactiveError::ActorStopped(link.processor.name().to_string()));
                    }
                }
                Effect::RemoteReceive { outlet, packet } => {
                    let link = self.downstream.get(&outlet).ok_or_else(|| {
                        ReactiveError::IllegalState(format!("outlet {outlet} is not connected"))
                    })?;
                    let inlet = link.port;
                    if !link.processor.execute(move |p| p.receive_inlet(inlet, packet)) {
                        return Err(ReactiveError::ActorStopped(link.processor.name().to_string()));
                    }
                }
                Effect::Answer { root, packet } => {
                    let answers = self.roots.get(&root).ok_or_else(|| {
                        ReactiveError::IllegalState(format!("root {root} has no consumer"))
                    })?;
                    if answers.send(RootEvent::Answer(packet)).is_err() {
                        tracing::trace!(%root, "answer consumer went away");
                    }
                }
            }
        }
        Ok(())
    }

    /// Report `error` so the whole computation terminates; without a monitor
    /// only this processor stops.
    fn fail(&mut self, error: ReactiveError) {
        tracing::warn!(processor = %self.driver.name(), error = %error, "reactive processor failed");
        let reported = match &self.monitor {
            Some(monitor) => {
                let cause = error.clone();
                monitor.execute(move |m| m.terminate(cause))
            }
            None => false,
        };
        if !reported {
            self.terminate(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor;
    use crossbeam_channel::{unbounded, Receiver};

    fn standalone<R>(
        build: impl FnOnce(&mut ReactiveGraph<i64>) -> R,
    ) -> (Driver<Processor<i64>>, actor::ActorHandle, R) {
        let mut built = None;
        let (driver, handle) = actor::spawn("standalone", |driver: Driver<Processor<i64>>| {
            let mut graph = ReactiveGraph::detached("standalone");
            built = Some(build(&mut graph));
            Ok(Processor::new(driver, graph, None))
        })
        .unwrap();
        (driver, handle, built.unwrap())
    }

    fn open(driver: &Driver<Processor<i64>>, root: NodeId) -> Receiver<RootEvent<i64>> {
        let (tx, rx) = unbounded();
        driver.execute(move |p| p.open_root(root, tx));
        rx
    }

    #[test]
    fn answers_flow_to_root_consumer() {
        let (driver, handle, root) = standalone(|graph| {
            let source = graph.add_source_items(vec![4, 5]);
            let root = graph.add_root();
            graph.connect(source, root).unwrap();
            root
        });
        let events = open(&driver, root);
        for expected in [4, 5] {
            driver.execute(move |p| p.pull_root(root));
            assert_eq!(events.recv().unwrap(), RootEvent::Answer(expected));
        }
        driver.stop();
        handle.join().unwrap();
    }

    #[test]
    fn failure_without_monitor_fails_roots() {
        let (driver, handle, root) = standalone(|graph| {
            let source = graph.add_source(Box::new(|| anyhow::bail!("relation missing")));
            let root = graph.add_root();
            graph.connect(source, root).unwrap();
            root
        });
        let events = open(&driver, root);
        driver.execute(move |p| p.pull_root(root));
        match events.recv().unwrap() {
            RootEvent::Failed(ReactiveError::Source { message, .. }) => {
                assert!(message.contains("relation missing"))
            }
            other => panic!("unexpected event {other:?}"),
        }
        // later pulls fail fast instead of hanging
        driver.execute(move |p| p.pull_root(root));
        assert!(matches!(events.recv().unwrap(), RootEvent::Failed(_)));
        driver.stop();
        handle.join().unwrap();
    }

    #[test]
    fn unconnected_inlet_is_a_failure() {
        let (driver, handle, root) = standalone(|graph| {
            let inlet = graph.add_inlet();
            let root = graph.add_root();
            graph.connect(inlet, root).unwrap();
            root
        });
        let events = open(&driver, root);
        driver.execute(move |p| p.pull_root(root));
        assert!(matches!(
            events.recv().unwrap(),
            RootEvent::Failed(ReactiveError::IllegalState(_))
        ));
        driver.stop();
        handle.join().unwrap();
    }
}
