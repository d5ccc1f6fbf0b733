//! Reactive operator graph owned by one processor
//!
//! Nodes are stored in an arena and addressed by [`NodeId`]. Pulls travel
//! upstream and items travel downstream as [`Step`]s on an internal FIFO, so
//! arbitrarily long (and cyclic) chains are processed iteratively on the
//! owning actor's thread. Anything that must leave the graph (answers for a
//! root, traffic for another processor, deferred pull retries) is collected
//! as an [`Effect`] for the processor to dispatch.
//!
//! ```text
//!   root ──pull──▶ fan-out ──pull──▶ distinct ──pull──▶ buffer ──pull──▶ source
//!     ◀──answer──      ◀───item───        ◀───item───       ◀───item───
//! ```

use crate::actor::ActorId;
use crate::delegate::Delegates;
use crate::error::ReactiveError;
use crate::identifier::{NodeId, ReactiveIdentifier};
use crate::operator::{Operator, Pool, SourceIter, SourceOperator, Supplier, Transformer};
use crate::registry::{PublisherRegistry, SubscriberRegistry};
use crate::Packet;
use ahash::AHashSet;
use std::collections::VecDeque;
use std::sync::Arc;

/// What a node is
pub enum NodeKind<P> {
    Stage(Operator<P>),
    /// Receives items from another processor's outlet
    Inlet,
    /// Forwards items to another processor's inlet
    Outlet,
    /// Terminal subscriber whose items are answers of the computation
    Root,
}

impl<P: Packet> NodeKind<P> {
    fn label(&self) -> &'static str {
        match self {
            NodeKind::Stage(operator) => operator.kind(),
            NodeKind::Inlet => "inlet",
            NodeKind::Outlet => "outlet",
            NodeKind::Root => "root",
        }
    }

    fn can_publish(&self) -> bool {
        !matches!(self, NodeKind::Outlet | NodeKind::Root)
    }

    fn can_subscribe(&self) -> bool {
        !matches!(self, NodeKind::Inlet | NodeKind::Stage(Operator::Source(_)))
    }
}

struct Node<P> {
    identifier: ReactiveIdentifier,
    kind: NodeKind<P>,
    publishers: PublisherRegistry,
    subscribers: SubscriberRegistry,
    finished: bool,
}

enum Step<P> {
    Pull { subscriber: NodeId, publisher: NodeId },
    Receive { publisher: NodeId, subscriber: NodeId, packet: P },
}

/// Work a graph hands back to its processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect<P> {
    /// Re-issue `subscriber`'s pull on `publisher` from a fresh mailbox turn
    RetryPull { subscriber: NodeId, publisher: NodeId },
    /// The inlet was pulled; ask the connected outlet for an item
    RemotePull { inlet: NodeId },
    /// The outlet received an item for the connected inlet
    RemoteReceive { outlet: NodeId, packet: P },
    Answer { root: NodeId, packet: P },
}

fn node_at<P>(nodes: &mut [Node<P>], id: NodeId) -> Result<&mut Node<P>, ReactiveError> {
    nodes
        .get_mut(id.0)
        .ok_or_else(|| ReactiveError::IllegalState(format!("unknown node {id}")))
}

pub struct ReactiveGraph<P> {
    owner: ActorId,
    owner_name: Arc<str>,
    nodes: Vec<Node<P>>,
    steps: VecDeque<Step<P>>,
    effects: Vec<Effect<P>>,
    paths: AHashSet<(NodeId, NodeId)>,
    delegates: Delegates,
    released: bool,
}

impl<P: Packet> ReactiveGraph<P> {
    pub fn new(owner: ActorId, owner_name: impl Into<Arc<str>>, delegates: Delegates) -> Self {
        Self {
            owner,
            owner_name: owner_name.into(),
            nodes: Vec::new(),
            steps: VecDeque::new(),
            effects: Vec::new(),
            paths: AHashSet::new(),
            delegates,
            released: false,
        }
    }

    /// A graph with no monitor or tracer, driven directly by the caller.
    pub fn detached(name: impl Into<Arc<str>>) -> Self {
        Self::new(ActorId::next(), name, Delegates::detached())
    }

    pub fn owner(&self) -> ActorId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn identifier(&self, node: NodeId) -> Result<&ReactiveIdentifier, ReactiveError> {
        self.nodes
            .get(node.0)
            .map(|n| &n.identifier)
            .ok_or_else(|| ReactiveError::IllegalState(format!("unknown node {node}")))
    }

    fn add_node(
        &mut self,
        kind: NodeKind<P>,
        publishers: PublisherRegistry,
        subscribers: SubscriberRegistry,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let identifier =
            ReactiveIdentifier::new(self.owner, self.owner_name.clone(), kind.label(), id.0);
        self.nodes.push(Node {
            identifier,
            kind,
            publishers,
            subscribers,
            finished: false,
        });
        id
    }

    fn add_stage(&mut self, operator: Operator<P>) -> NodeId {
        let (publishers, subscribers) = match &operator {
            Operator::Source(_) => (PublisherRegistry::single(), SubscriberRegistry::single()),
            Operator::Transformer(_) => (PublisherRegistry::single(), SubscriberRegistry::single()),
            Operator::Pool(_) => (PublisherRegistry::multi(), SubscriberRegistry::multi()),
        };
        self.add_node(NodeKind::Stage(operator), publishers, subscribers)
    }

    /// Add a source; it is registered for termination accounting right away.
    pub fn add_source(&mut self, supplier: Supplier<P>) -> NodeId {
        let id = self.add_stage(Operator::Source(SourceOperator::new(supplier)));
        self.delegates
            .monitoring
            .register_source(&self.nodes[id.0].identifier);
        id
    }

    pub fn add_source_items(&mut self, items: Vec<P>) -> NodeId {
        self.add_source(Box::new(move || {
            Ok(Box::new(items.into_iter().map(Ok::<P, anyhow::Error>)) as SourceIter<P>)
        }))
    }

    pub fn add_map(&mut self, f: impl FnMut(P) -> anyhow::Result<P> + Send + 'static) -> NodeId {
        self.add_stage(Operator::Transformer(Transformer::map(f)))
    }

    /// May emit several items per input; feed it into a buffer or fan-out.
    pub fn add_flat_map(
        &mut self,
        f: impl FnMut(P) -> anyhow::Result<Vec<P>> + Send + 'static,
    ) -> NodeId {
        self.add_stage(Operator::Transformer(Transformer::flat_map(f)))
    }

    pub fn add_distinct(&mut self) -> NodeId {
        self.add_stage(Operator::Transformer(Transformer::distinct()))
    }

    pub fn add_buffer(&mut self) -> NodeId {
        self.add_stage(Operator::Pool(Pool::buffer()))
    }

    pub fn add_fan_out(&mut self) -> NodeId {
        self.add_stage(Operator::Pool(Pool::fan_out()))
    }

    pub fn add_inlet(&mut self) -> NodeId {
        self.add_node(NodeKind::Inlet, PublisherRegistry::single(), SubscriberRegistry::single())
    }

    pub fn add_outlet(&mut self) -> NodeId {
        self.add_node(NodeKind::Outlet, PublisherRegistry::single(), SubscriberRegistry::single())
    }

    pub fn add_root(&mut self) -> NodeId {
        self.add_node(NodeKind::Root, PublisherRegistry::single(), SubscriberRegistry::single())
    }

    /// Register `subscriber` on `publisher`.
    ///
    /// A fan-out replays its history to a late subscriber; those replays are
    /// accounted as created here.
    pub fn connect(&mut self, publisher: NodeId, subscriber: NodeId) -> Result<(), ReactiveError> {
        let upstream = node_at(&mut self.nodes, publisher)?;
        if !upstream.kind.can_publish() {
            return Err(ReactiveError::IllegalState(format!(
                "{} cannot publish",
                upstream.identifier
            )));
        }
        upstream.subscribers.check_add(subscriber)?;
        let downstream = node_at(&mut self.nodes, subscriber)?;
        if !downstream.kind.can_subscribe() {
            return Err(ReactiveError::IllegalState(format!(
                "{} cannot subscribe",
                downstream.identifier
            )));
        }
        // both sides are checked before either is wired
        downstream.publishers.add(publisher)?;

        let upstream = node_at(&mut self.nodes, publisher)?;
        upstream.subscribers.add(subscriber)?;
        if let NodeKind::Stage(Operator::Pool(pool)) = &mut upstream.kind {
            let backlog = pool.add_subscriber(subscriber);
            self.delegates
                .monitoring
                .answers_created(&upstream.identifier, backlog);
        }
        Ok(())
    }

    /// The root asks for its next answer.
    pub fn pull_root(&mut self, root: NodeId) -> Result<(), ReactiveError> {
        self.pull_from_endpoint(root, "root", |kind| matches!(kind, NodeKind::Root))
    }

    /// The processor downstream of `outlet` asks for an item.
    pub fn pull_outlet(&mut self, outlet: NodeId) -> Result<(), ReactiveError> {
        self.pull_from_endpoint(outlet, "outlet", |kind| matches!(kind, NodeKind::Outlet))
    }

    fn pull_from_endpoint(
        &mut self,
        endpoint: NodeId,
        expected: &str,
        is_expected: impl Fn(&NodeKind<P>) -> bool,
    ) -> Result<(), ReactiveError> {
        if self.released {
            return Ok(());
        }
        let node = node_at(&mut self.nodes, endpoint)?;
        if !is_expected(&node.kind) {
            return Err(ReactiveError::IllegalState(format!(
                "{} is not a {expected}",
                node.identifier
            )));
        }
        self.request(endpoint)?;
        self.run()
    }

    /// An item arrived from the outlet connected to `inlet`.
    pub fn receive_inlet(&mut self, inlet: NodeId, packet: P) -> Result<(), ReactiveError> {
        if self.released {
            return Ok(());
        }
        let node = node_at(&mut self.nodes, inlet)?;
        if !matches!(node.kind, NodeKind::Inlet) {
            return Err(ReactiveError::IllegalState(format!(
                "{} is not an inlet",
                node.identifier
            )));
        }
        let downstream = node.subscribers.subscribers().first().copied().ok_or_else(|| {
            ReactiveError::IllegalState(format!("{} has no subscriber", node.identifier))
        })?;
        self.deliver(inlet, downstream, packet)?;
        self.run()
    }

    /// Re-issue a pull deferred by [`Effect::RetryPull`], if still wanted.
    pub fn retry_pull(&mut self, subscriber: NodeId, publisher: NodeId) -> Result<(), ReactiveError> {
        if self.released {
            return Ok(());
        }
        let node = node_at(&mut self.nodes, subscriber)?;
        if !node.subscribers.any_pulling() || node.publishers.is_pulling(publisher) {
            return Ok(());
        }
        node.publishers.record_pull(publisher)?;
        self.issue_pull(subscriber, publisher);
        self.run()
    }

    pub fn take_effects(&mut self) -> Vec<Effect<P>> {
        std::mem::take(&mut self.effects)
    }

    /// Drop every node and pending step; later calls become no-ops.
    pub fn release(&mut self) {
        self.released = true;
        self.nodes.clear();
        self.steps.clear();
        self.effects.clear();
    }

    /// Pull every idle publisher of `subscriber`.
    fn request(&mut self, subscriber: NodeId) -> Result<(), ReactiveError> {
        let idle = node_at(&mut self.nodes, subscriber)?.publishers.non_pulling();
        for publisher in idle {
            node_at(&mut self.nodes, subscriber)?
                .publishers
                .record_pull(publisher)?;
            self.issue_pull(subscriber, publisher);
        }
        Ok(())
    }

    fn issue_pull(&mut self, subscriber: NodeId, publisher: NodeId) {
        self.register_path(subscriber, publisher);
        self.steps.push_back(Step::Pull {
            subscriber,
            publisher,
        });
    }

    fn register_path(&mut self, subscriber: NodeId, publisher: NodeId) {
        if !self.paths.insert((subscriber, publisher)) {
            return;
        }
        if let (Some(s), Some(p)) = (self.nodes.get(subscriber.0), self.nodes.get(publisher.0)) {
            self.delegates
                .monitoring
                .register_path(&s.identifier, &p.identifier);
        }
    }

    fn deliver(&mut self, publisher: NodeId, subscriber: NodeId, packet: P) -> Result<(), ReactiveError> {
        node_at(&mut self.nodes, publisher)?
            .subscribers
            .set_not_pulling(subscriber)?;
        self.steps.push_back(Step::Receive {
            publisher,
            subscriber,
            packet,
        });
        Ok(())
    }

    fn run(&mut self) -> Result<(), ReactiveError> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                Step::Pull {
                    subscriber,
                    publisher,
                } => self.on_pull(subscriber, publisher)?,
                Step::Receive {
                    publisher,
                    subscriber,
                    packet,
                } => self.on_receive(publisher, subscriber, packet)?,
            }
        }
        Ok(())
    }

    fn on_pull(&mut self, subscriber: NodeId, publisher: NodeId) -> Result<(), ReactiveError> {
        self.delegates
            .tracing
            .pull(self.identifier(subscriber)?, self.identifier(publisher)?);

        let node = node_at(&mut self.nodes, publisher)?;
        let fresh = node.subscribers.record_pull(subscriber)?;
        match &mut node.kind {
            NodeKind::Stage(Operator::Source(source)) => {
                if !fresh {
                    return Ok(());
                }
                let exhausted = source
                    .is_exhausted()
                    .map_err(|e| ReactiveError::source(&node.identifier, &e))?;
                if exhausted {
                    if !node.finished {
                        node.finished = true;
                        tracing::trace!(source = %node.identifier, "source exhausted");
                        self.delegates.monitoring.source_finished(&node.identifier);
                    }
                    return Ok(());
                }
                let packet = source
                    .next()
                    .map_err(|e| ReactiveError::source(&node.identifier, &e))?;
                if let Some(packet) = packet {
                    self.delegates
                        .monitoring
                        .answers_created(&node.identifier, 1);
                    self.deliver(publisher, subscriber, packet)?;
                }
                Ok(())
            }
            NodeKind::Stage(Operator::Transformer(_)) => {
                if fresh {
                    self.request(publisher)?;
                }
                Ok(())
            }
            NodeKind::Stage(Operator::Pool(pool)) => {
                let ready = if pool.has_next(subscriber) {
                    pool.next(subscriber)
                } else {
                    None
                };
                match ready {
                    Some(packet) => self.deliver(publisher, subscriber, packet),
                    None => self.request(publisher),
                }
            }
            NodeKind::Inlet => {
                if fresh {
                    self.effects.push(Effect::RemotePull { inlet: publisher });
                }
                Ok(())
            }
            NodeKind::Outlet | NodeKind::Root => Err(ReactiveError::IllegalState(format!(
                "{} cannot be pulled",
                node.identifier
            ))),
        }
    }

    fn on_receive(&mut self, publisher: NodeId, subscriber: NodeId, packet: P) -> Result<(), ReactiveError> {
        self.delegates
            .tracing
            .receive(self.identifier(publisher)?, self.identifier(subscriber)?, &packet);

        let node = node_at(&mut self.nodes, subscriber)?;
        node.publishers.record_receive(publisher)?;
        let monitoring = &self.delegates.monitoring;
        match &mut node.kind {
            NodeKind::Stage(Operator::Transformer(transformer)) => {
                let outputs = transformer
                    .accept(packet)
                    .map_err(|e| ReactiveError::transform(&node.identifier, &e))?;
                monitoring.answers_created(&node.identifier, outputs.len());
                monitoring.answer_consumed(&node.identifier);
                if outputs.is_empty() {
                    if node.subscribers.any_pulling() {
                        self.effects.push(Effect::RetryPull {
                            subscriber,
                            publisher,
                        });
                    }
                    return Ok(());
                }
                let downstream = node.subscribers.subscribers().first().copied().ok_or_else(|| {
                    ReactiveError::IllegalState(format!("{} has no subscriber", node.identifier))
                })?;
                for output in outputs {
                    node.subscribers.set_not_pulling(downstream)?;
                    self.steps.push_back(Step::Receive {
                        publisher: subscriber,
                        subscriber: downstream,
                        packet: output,
                    });
                }
                Ok(())
            }
            NodeKind::Stage(Operator::Pool(pool)) => {
                if pool.accept(packet) {
                    monitoring.answers_created(&node.identifier, pool.deliveries_per_item());
                }
                monitoring.answer_consumed(&node.identifier);
                let mut unserved = false;
                for downstream in node.subscribers.pulling() {
                    let ready = if pool.has_next(downstream) {
                        pool.next(downstream)
                    } else {
                        None
                    };
                    match ready {
                        Some(output) => {
                            node.subscribers.set_not_pulling(downstream)?;
                            self.steps.push_back(Step::Receive {
                                publisher: subscriber,
                                subscriber: downstream,
                                packet: output,
                            });
                        }
                        None => unserved = true,
                    }
                }
                if unserved {
                    self.effects.push(Effect::RetryPull {
                        subscriber,
                        publisher,
                    });
                }
                Ok(())
            }
            NodeKind::Root => {
                monitoring.answer_consumed(&node.identifier);
                self.effects.push(Effect::Answer {
                    root: subscriber,
                    packet,
                });
                Ok(())
            }
            NodeKind::Outlet => {
                self.effects.push(Effect::RemoteReceive {
                    outlet: subscriber,
                    packet,
                });
                Ok(())
            }
            NodeKind::Stage(Operator::Source(_)) | NodeKind::Inlet => Err(
                ReactiveError::IllegalState(format!("{} cannot receive", node.identifier)),
            ),
        }
    }
}
