//! snapfetch: client engine for asynchronous scrape jobs.
//!
//! Drives long-running remote jobs (trigger → poll → fetch) against a
//! dataset-snapshot style HTTP API, and dispatches direct fetch operations
//! under one of three interchangeable concurrency strategies (unbounded,
//! bounded, pooled) with running-cost accounting.

pub mod client;
pub mod dispatch;
mod error;
pub mod poller;
pub mod pool;
mod result;
mod snapshot;
pub mod stats;

pub use client::{SnapshotApi, SnapshotClient, TriggerSpec};
pub use dispatch::{ConcurrencyConfig, DispatchError, Dispatcher, StrategyKind};
pub use error::{EngineError, ErrorKind};
pub use poller::{CancellationToken, PollResult, StatusPoller};
pub use pool::{PoolError, SessionPool, SessionSlot};
pub use result::{FetchResult, Payload};
pub use snapshot::{RemoteStatus, SnapshotHandle, SnapshotState};
pub use stats::{COST_PER_GIB, CostAccumulator, Usage, cost_for_bytes};
