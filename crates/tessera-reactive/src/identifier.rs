//! Identity of reactive nodes

use crate::actor::ActorId;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Index of a node inside its owning graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Globally meaningful identity of a reactive node: owning actor, operator
/// label and a sequence number scoped to the owner.
///
/// The hash is computed once at construction; identifiers are used as map
/// keys on every monitoring and tracing message.
#[derive(Clone)]
pub struct ReactiveIdentifier {
    owner: ActorId,
    owner_name: Arc<str>,
    operator: Arc<str>,
    sequence: usize,
    hash: u64,
}

impl ReactiveIdentifier {
    pub fn new(owner: ActorId, owner_name: Arc<str>, operator: impl Into<Arc<str>>, sequence: usize) -> Self {
        let operator = operator.into();
        let mut hasher = DefaultHasher::new();
        owner.hash(&mut hasher);
        operator.hash(&mut hasher);
        sequence.hash(&mut hasher);
        Self {
            owner,
            owner_name,
            operator,
            sequence,
            hash: hasher.finish(),
        }
    }

    pub fn owner(&self) -> ActorId {
        self.owner
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }
}

// owner_name is a label of `owner` and takes no part in identity
impl PartialEq for ReactiveIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.owner == other.owner
            && self.sequence == other.sequence
            && self.operator == other.operator
    }
}

impl Eq for ReactiveIdentifier {}

impl Hash for ReactiveIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for ReactiveIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner_name, self.operator, self.sequence)
    }
}

impl fmt::Debug for ReactiveIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReactiveIdentifier({self} {})", self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equal_identifiers_hash_alike() {
        let actor = ActorId::next();
        let a = ReactiveIdentifier::new(actor, "p".into(), "map", 3);
        let b = ReactiveIdentifier::new(actor, "renamed".into(), "map", 3);
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn identity_depends_on_owner_operator_and_sequence() {
        let first = ActorId::next();
        let second = ActorId::next();
        let base = ReactiveIdentifier::new(first, "p".into(), "map", 0);
        assert_ne!(base, ReactiveIdentifier::new(second, "p".into(), "map", 0));
        assert_ne!(base, ReactiveIdentifier::new(first, "p".into(), "distinct", 0));
        assert_ne!(base, ReactiveIdentifier::new(first, "p".into(), "map", 1));
    }

    #[test]
    fn renders_owner_operator_sequence() {
        let id = ReactiveIdentifier::new(ActorId::next(), "closure".into(), "fan-out", 4);
        assert_eq!(id.to_string(), "closure/fan-out#4");
    }
}
