//! # Tessera Reactive
//!
//! Pull-based dataflow for rule and query evaluation. Operators form a
//! (possibly cyclic) graph; roots pull answers, pulls travel upstream until a
//! stage can produce, and items travel back downstream. Graphs live inside
//! processors, each an actor on its own thread, and processors exchange
//! pulls and items through inlet/outlet pairs.
//!
//! ```text
//!                 ┌──────────── processor "rule" ────────────┐
//!   consumer ◀─── root ◀─ fan-out ◀─ distinct ◀─ buffer ◀─ source
//!                           │                      ▲
//!                           └────▶ flat-map ───────┘
//!                 └──────────────────────────────────────────┘
//!                        │ created / consumed / finished
//!                        ▼
//!                    monitor ──▶ done once nothing is in flight
//! ```
//!
//! A [`Computation`] owns the monitor (termination accounting), an optional
//! tracer (JSON lines of every pull and receive) and its processors.

pub mod actor;
pub mod computation;
pub mod config;
pub mod delegate;
pub mod error;
pub mod graph;
pub mod identifier;
pub mod monitor;
pub mod operator;
pub mod processor;
pub mod registry;
pub mod tracer;

use std::fmt::Debug;
use std::hash::Hash;

pub use actor::{ActorHandle, ActorId, Driver};
pub use computation::{AnswerStream, Computation};
pub use config::ReactiveConfig;
pub use delegate::{Delegates, Monitoring, Tracing};
pub use error::ReactiveError;
pub use graph::{Effect, NodeKind, ReactiveGraph};
pub use identifier::{NodeId, ReactiveIdentifier};
pub use monitor::{Monitor, MonitorSnapshot, MonitorState};
pub use operator::{Operator, Pool, SourceIter, SourceOperator, Supplier, Transformer};
pub use processor::{Processor, RootEvent};
pub use registry::{PublisherRegistry, SubscriberRegistry};
pub use tracer::{read_trace, TraceEvent, TraceKind, Tracer};

/// Item type flowing through a computation
pub trait Packet: Clone + Eq + Hash + Debug + Send + 'static {}

impl<T: Clone + Eq + Hash + Debug + Send + 'static> Packet for T {}
