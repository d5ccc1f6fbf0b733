//! Per-edge pulling state
//!
//! Every node keeps one [`PublisherRegistry`] (the upstream nodes it pulls
//! from) and one [`SubscriberRegistry`] (the downstream nodes pulling from
//! it). An edge is either *pulling* (a request is outstanding) or *idle*.
//! Recording a pull on an already pulling edge is a no-op and reports
//! `false`, which is what keeps pull propagation from looping in cyclic
//! graphs.

use crate::error::ReactiveError;
use crate::identifier::NodeId;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Edges {
    Single { counterpart: Option<NodeId>, pulling: bool },
    Multi(BTreeMap<NodeId, bool>),
}

impl Edges {
    fn check_add(&self, id: NodeId, side: &str) -> Result<(), ReactiveError> {
        match self {
            Edges::Single { counterpart: Some(existing), .. } if *existing != id => Err(
                ReactiveError::IllegalState(format!(
                    "{side} {id} cannot join a single-{side} registry already bound to {existing}"
                )),
            ),
            _ => Ok(()),
        }
    }

    fn add(&mut self, id: NodeId, side: &str) -> Result<(), ReactiveError> {
        self.check_add(id, side)?;
        match self {
            Edges::Single { counterpart, .. } => {
                *counterpart = Some(id);
                Ok(())
            }
            Edges::Multi(edges) => {
                edges.entry(id).or_insert(false);
                Ok(())
            }
        }
    }

    fn flag(&mut self, id: NodeId, side: &str) -> Result<&mut bool, ReactiveError> {
        let unknown = || ReactiveError::IllegalState(format!("{side} {id} is not registered"));
        match self {
            Edges::Single { counterpart: Some(existing), pulling } if *existing == id => Ok(pulling),
            Edges::Single { .. } => Err(unknown()),
            Edges::Multi(edges) => edges.get_mut(&id).ok_or_else(unknown),
        }
    }

    fn set_pulling(&mut self, id: NodeId, side: &str) -> Result<bool, ReactiveError> {
        let flag = self.flag(id, side)?;
        let transitioned = !*flag;
        *flag = true;
        Ok(transitioned)
    }

    fn set_idle(&mut self, id: NodeId, side: &str) -> Result<(), ReactiveError> {
        *self.flag(id, side)? = false;
        Ok(())
    }

    fn is_pulling(&self, id: NodeId) -> bool {
        match self {
            Edges::Single { counterpart, pulling } => *counterpart == Some(id) && *pulling,
            Edges::Multi(edges) => edges.get(&id).copied().unwrap_or(false),
        }
    }

    fn all(&self) -> Vec<NodeId> {
        match self {
            Edges::Single { counterpart, .. } => counterpart.iter().copied().collect(),
            Edges::Multi(edges) => edges.keys().copied().collect(),
        }
    }

    fn with_state(&self, wanted: bool) -> Vec<NodeId> {
        match self {
            Edges::Single { counterpart: Some(id), pulling } if *pulling == wanted => vec![*id],
            Edges::Single { .. } => Vec::new(),
            Edges::Multi(edges) => edges
                .iter()
                .filter(|(_, pulling)| **pulling == wanted)
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Edges::Single { counterpart, .. } => usize::from(counterpart.is_some()),
            Edges::Multi(edges) => edges.len(),
        }
    }
}

/// Upstream side of a node: which publishers it is currently pulling from
#[derive(Debug, Clone)]
pub struct PublisherRegistry(Edges);

impl PublisherRegistry {
    pub fn single() -> Self {
        Self(Edges::Single {
            counterpart: None,
            pulling: false,
        })
    }

    pub fn multi() -> Self {
        Self(Edges::Multi(BTreeMap::new()))
    }

    pub fn add(&mut self, publisher: NodeId) -> Result<(), ReactiveError> {
        self.0.add(publisher, "publisher")
    }

    /// Whether [`add`](Self::add) would accept `publisher`, without adding it.
    pub fn check_add(&self, publisher: NodeId) -> Result<(), ReactiveError> {
        self.0.check_add(publisher, "publisher")
    }

    /// Mark the edge to `publisher` as pulling; `true` only on the idle to
    /// pulling transition.
    pub fn record_pull(&mut self, publisher: NodeId) -> Result<bool, ReactiveError> {
        self.0.set_pulling(publisher, "publisher")
    }

    pub fn record_receive(&mut self, publisher: NodeId) -> Result<(), ReactiveError> {
        self.0.set_idle(publisher, "publisher")
    }

    pub fn is_pulling(&self, publisher: NodeId) -> bool {
        self.0.is_pulling(publisher)
    }

    /// Publishers with no outstanding pull, in registration-key order
    pub fn non_pulling(&self) -> Vec<NodeId> {
        self.0.with_state(false)
    }

    pub fn publishers(&self) -> Vec<NodeId> {
        self.0.all()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Downstream side of a node: which subscribers are waiting for an item
#[derive(Debug, Clone)]
pub struct SubscriberRegistry(Edges);

impl SubscriberRegistry {
    pub fn single() -> Self {
        Self(Edges::Single {
            counterpart: None,
            pulling: false,
        })
    }

    pub fn multi() -> Self {
        Self(Edges::Multi(BTreeMap::new()))
    }

    pub fn add(&mut self, subscriber: NodeId) -> Result<(), ReactiveError> {
        self.0.add(subscriber, "subscriber")
    }

    pub fn check_add(&self, subscriber: NodeId) -> Result<(), ReactiveError> {
        self.0.check_add(subscriber, "subscriber")
    }

    /// Mark `subscriber` as pulling; `true` only on the idle to pulling
    /// transition.
    pub fn record_pull(&mut self, subscriber: NodeId) -> Result<bool, ReactiveError> {
        self.0.set_pulling(subscriber, "subscriber")
    }

    /// Called just before an item is sent to `subscriber`.
    pub fn set_not_pulling(&mut self, subscriber: NodeId) -> Result<(), ReactiveError> {
        self.0.set_idle(subscriber, "subscriber")
    }

    pub fn is_pulling(&self, subscriber: NodeId) -> bool {
        self.0.is_pulling(subscriber)
    }

    pub fn any_pulling(&self) -> bool {
        !self.0.with_state(true).is_empty()
    }

    pub fn pulling(&self) -> Vec<NodeId> {
        self.0.with_state(true)
    }

    pub fn subscribers(&self) -> Vec<NodeId> {
        self.0.all()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_pull_is_reported_once() {
        let mut registry = PublisherRegistry::single();
        registry.add(NodeId(1)).unwrap();
        assert!(registry.record_pull(NodeId(1)).unwrap());
        assert!(!registry.record_pull(NodeId(1)).unwrap());
        registry.record_receive(NodeId(1)).unwrap();
        assert!(registry.record_pull(NodeId(1)).unwrap());
    }

    #[test]
    fn single_registry_rejects_second_counterpart() {
        let mut registry = SubscriberRegistry::single();
        registry.add(NodeId(4)).unwrap();
        registry.add(NodeId(4)).unwrap();
        let err = registry.add(NodeId(5)).unwrap_err();
        assert!(matches!(err, ReactiveError::IllegalState(_)));
        assert_eq!(registry.subscribers(), vec![NodeId(4)]);
    }

    #[test]
    fn check_add_does_not_register() {
        let mut registry = PublisherRegistry::single();
        registry.check_add(NodeId(2)).unwrap();
        assert!(registry.publishers().is_empty());

        registry.add(NodeId(2)).unwrap();
        registry.check_add(NodeId(2)).unwrap();
        assert!(matches!(
            registry.check_add(NodeId(3)),
            Err(ReactiveError::IllegalState(_))
        ));
        assert_eq!(registry.publishers(), vec![NodeId(2)]);
    }

    #[test]
    fn multi_registry_tracks_each_edge() {
        let mut registry = SubscriberRegistry::multi();
        for id in [3, 1, 2] {
            registry.add(NodeId(id)).unwrap();
        }
        assert!(!registry.any_pulling());
        registry.record_pull(NodeId(2)).unwrap();
        registry.record_pull(NodeId(3)).unwrap();
        assert_eq!(registry.pulling(), vec![NodeId(2), NodeId(3)]);
        registry.set_not_pulling(NodeId(2)).unwrap();
        assert_eq!(registry.pulling(), vec![NodeId(3)]);
        assert!(registry.is_pulling(NodeId(3)));
        assert!(!registry.is_pulling(NodeId(1)));
    }

    #[test]
    fn non_pulling_publishers_exclude_outstanding_pulls() {
        let mut registry = PublisherRegistry::multi();
        registry.add(NodeId(0)).unwrap();
        registry.add(NodeId(1)).unwrap();
        registry.record_pull(NodeId(0)).unwrap();
        assert_eq!(registry.non_pulling(), vec![NodeId(1)]);
        assert_eq!(registry.publishers(), vec![NodeId(0), NodeId(1)]);
    }

    #[test]
    fn unknown_counterpart_is_illegal() {
        let mut registry = PublisherRegistry::multi();
        assert!(registry.record_pull(NodeId(9)).is_err());
        let mut single = SubscriberRegistry::single();
        assert!(single.set_not_pulling(NodeId(9)).is_err());
    }
}
