//! Tessera Batch Pipeline
//!
//! Chains coarse-grained producers behind one bounded exchange queue and
//! exposes the result as a pull iterator:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         BATCH PIPELINE                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌────────┐   ┌────────┐   ┌────────┐                               │
//! │  │   P1   │──►│   P2   │──►│   P3   │   producer chain (FIFO)       │
//! │  └───┬────┘   └────────┘   └────────┘                               │
//! │      │ produce(request)                                             │
//! │      ▼                                                              │
//! │  ┌──────────────┐     put      ┌──────────────┐   take   ┌───────┐  │
//! │  │ Worker Pool  │────────────►│ Exchange     │─────────►│ next()│  │
//! │  └──────────────┘             │ Queue        │          └───┬───┘  │
//! │      ▲                        └──────────────┘              │      │
//! │      └──────────── may_produce() (watermarks) ◄─────────────┘      │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! - **Backpressure**: work is only requested once the buffer drains past the
//!   low watermark, and never beyond the high watermark
//! - **Strict chain order**: items of producer *i* always precede those of *i+1*
//! - **No leaks**: recycling releases every producer, started or not

pub mod config;
pub mod error;
pub mod exchange;
pub mod pipeline;
pub mod pool;
pub mod producer;

pub use config::PipelineConfig;
pub use error::{ExchangeError, PipelineError};
pub use exchange::{ExchangeQueue, Slot};
pub use pipeline::Pipeline;
pub use pool::{InlinePool, RayonPool, WorkerPool};
pub use producer::{IteratorProducer, Producer, ProducerId, ProducerSink, Producers};
