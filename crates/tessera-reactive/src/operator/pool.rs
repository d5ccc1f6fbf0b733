use crate::identifier::NodeId;
use ahash::AHashSet;
use std::collections::BTreeMap;
use std::hash::Hash;

/// Unordered stack of items awaiting any subscriber
#[derive(Debug)]
pub struct Buffer<P> {
    stack: Vec<P>,
}

/// Deduplicated history replayed to every subscriber from its own cursor
#[derive(Debug)]
pub struct FanOut<P> {
    history: Vec<P>,
    seen: AHashSet<P>,
    cursors: BTreeMap<NodeId, usize>,
}

impl<P> Default for FanOut<P> {
    fn default() -> Self {
        Self {
            history: Vec::new(),
            seen: AHashSet::new(),
            cursors: BTreeMap::new(),
        }
    }
}

/// Stage that stores admitted items until a subscriber pulls them
#[derive(Debug)]
pub enum Pool<P> {
    Buffer(Buffer<P>),
    FanOut(FanOut<P>),
}

impl<P: Clone + Eq + Hash> Pool<P> {
    pub fn buffer() -> Self {
        Pool::Buffer(Buffer { stack: Vec::new() })
    }

    pub fn fan_out() -> Self {
        Pool::FanOut(FanOut::default())
    }

    /// Number of deliveries one admitted item will eventually cause.
    pub fn deliveries_per_item(&self) -> usize {
        match self {
            Pool::Buffer(_) => 1,
            Pool::FanOut(fan_out) => fan_out.cursors.len(),
        }
    }

    /// Register a subscriber; returns how many already admitted items it
    /// will still receive.
    pub fn add_subscriber(&mut self, subscriber: NodeId) -> usize {
        match self {
            Pool::Buffer(_) => 0,
            Pool::FanOut(fan_out) => {
                if fan_out.cursors.contains_key(&subscriber) {
                    return 0;
                }
                fan_out.cursors.insert(subscriber, 0);
                fan_out.history.len()
            }
        }
    }

    /// Offer an item; `false` when it was not admitted.
    pub fn accept(&mut self, packet: P) -> bool {
        match self {
            Pool::Buffer(buffer) => {
                buffer.stack.push(packet);
                true
            }
            Pool::FanOut(fan_out) => {
                if !fan_out.seen.insert(packet.clone()) {
                    return false;
                }
                fan_out.history.push(packet);
                true
            }
        }
    }

    pub fn has_next(&self, subscriber: NodeId) -> bool {
        match self {
            Pool::Buffer(buffer) => !buffer.stack.is_empty(),
            Pool::FanOut(fan_out) => fan_out
                .cursors
                .get(&subscriber)
                .is_some_and(|cursor| *cursor < fan_out.history.len()),
        }
    }

    pub fn next(&mut self, subscriber: NodeId) -> Option<P> {
        match self {
            Pool::Buffer(buffer) => buffer.stack.pop(),
            Pool::FanOut(fan_out) => {
                let cursor = fan_out.cursors.get_mut(&subscriber)?;
                let item = fan_out.history.get(*cursor)?.clone();
                *cursor += 1;
                Some(item)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Pool::Buffer(_) => "buffer",
            Pool::FanOut(_) => "fan-out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_serves_any_subscriber() {
        let mut pool = Pool::buffer();
        assert!(pool.accept(1));
        assert!(pool.accept(2));
        assert!(pool.has_next(NodeId(7)));
        let mut drained = vec![pool.next(NodeId(7)).unwrap(), pool.next(NodeId(8)).unwrap()];
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(!pool.has_next(NodeId(7)));
        assert_eq!(pool.next(NodeId(7)), None);
    }

    #[test]
    fn buffer_serves_most_recent_first() {
        let mut pool = Pool::buffer();
        for item in [1, 2, 3] {
            pool.accept(item);
        }
        let drained: Vec<i32> = std::iter::from_fn(|| pool.next(NodeId(0))).collect();
        assert_eq!(drained, vec![3, 2, 1]);
    }

    #[test]
    fn buffer_keeps_duplicates() {
        let mut pool = Pool::buffer();
        assert!(pool.accept('a'));
        assert!(pool.accept('a'));
        assert_eq!(pool.next(NodeId(0)), Some('a'));
        assert_eq!(pool.next(NodeId(0)), Some('a'));
    }

    #[test]
    fn fan_out_rejects_duplicates() {
        let mut pool = Pool::fan_out();
        pool.add_subscriber(NodeId(0));
        assert!(pool.accept("x"));
        assert!(!pool.accept("x"));
        assert_eq!(pool.next(NodeId(0)), Some("x"));
        assert_eq!(pool.next(NodeId(0)), None);
    }

    #[test]
    fn fan_out_cursors_are_independent() {
        let mut pool = Pool::fan_out();
        let (a, b) = (NodeId(1), NodeId(2));
        pool.add_subscriber(a);
        pool.add_subscriber(b);
        assert_eq!(pool.deliveries_per_item(), 2);
        for item in ["p", "q", "r"] {
            pool.accept(item);
        }
        assert_eq!(pool.next(a), Some("p"));
        assert_eq!(pool.next(a), Some("q"));
        assert_eq!(pool.next(b), Some("p"));
        assert_eq!(pool.next(a), Some("r"));
        assert!(!pool.has_next(a));
        assert!(pool.has_next(b));
    }

    #[test]
    fn late_subscriber_replays_history() {
        let mut pool = Pool::fan_out();
        pool.add_subscriber(NodeId(0));
        pool.accept(10);
        pool.accept(11);
        assert_eq!(pool.add_subscriber(NodeId(1)), 2);
        assert_eq!(pool.add_subscriber(NodeId(1)), 0);
        assert_eq!(pool.next(NodeId(1)), Some(10));
        assert_eq!(pool.next(NodeId(1)), Some(11));
    }

    #[test]
    fn unknown_subscriber_has_nothing() {
        let mut pool = Pool::fan_out();
        pool.accept(1u8);
        assert!(!pool.has_next(NodeId(3)));
        assert_eq!(pool.next(NodeId(3)), None);
    }
}
