//! Ingestion Pipeline Module
//!
//! Everything a node needs to turn ready record batches into sink writes at a
//! controlled rate.
//!
//! ## Pipeline
//! 1. **Sources**: a [`source::RecordSource`] lists the batches ready for a task kind.
//! 2. **Aggregation**: [`aggregate::aggregate`] folds a batch into one update per key.
//! 3. **Execution**: the [`pool::WorkerPool`] distributes active kinds to workers,
//!    which take one [`limiter::RateLimiter`] permit per update.
//! 4. **Sink**: updates land in the store behind the node's [`sink::SinkHandle`].
//!
//! ## Submodules
//! - **`types`**: task kinds, sink updates, record batches and pool targets.
//! - **`pool`**: worker lifecycle, resizing and cancellation.
//! - **`limiter`**: fixed-rate permits.
//! - **`sink`**: connector traits, the connection handle and the in-memory store.
//! - **`source`**: record source trait with directory and in-memory sources.
//! - **`aggregate`**: per-kind record folding.

pub mod aggregate;
pub mod limiter;
pub mod pool;
pub mod sink;
pub mod source;
pub mod types;


pub use pool::WorkerPool;
pub use types::{PoolTargets, TaskKind};
