//! Stage operators
//!
//! Operators hold only the stage-local state (iterators, callbacks, dedup
//! sets, buffers). Pull/push dispatch and edge bookkeeping live in
//! [`crate::graph`].
//!
//! | category    | kinds                     | publishers | subscribers |
//! |-------------|---------------------------|------------|-------------|
//! | source      | source                    | none       | one         |
//! | transformer | map, flat-map, distinct   | one        | one         |
//! | pool        | buffer, fan-out           | many       | many        |

mod pool;
mod source;
mod transformer;

pub use pool::{Buffer, FanOut, Pool};
pub use source::{SourceIter, SourceOperator, Supplier};
pub use transformer::{FlatMapFn, MapFn, Transformer};

use std::hash::Hash;

/// Closed set of stage operators
#[derive(Debug)]
pub enum Operator<P> {
    Source(SourceOperator<P>),
    Transformer(Transformer<P>),
    Pool(Pool<P>),
}

impl<P: Clone + Eq + Hash> Operator<P> {
    pub fn kind(&self) -> &'static str {
        match self {
            Operator::Source(_) => "source",
            Operator::Transformer(transformer) => transformer.kind(),
            Operator::Pool(pool) => pool.kind(),
        }
    }
}
