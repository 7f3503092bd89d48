//! Timeout-enforcing parallel map over subordinate processes.
//!
//! [`killer_pmap`] applies a task to every input of a batch. Each input runs
//! in a fresh subordinate process, so a task that hangs or forks helpers can
//! be terminated together with everything it started, without disturbing
//! the rest of the batch.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────┐
//!                      │    Supervisor    │
//!                      │ (queue, results, │
//!                      │  skip log, sweep)│
//!                      └────────┬─────────┘
//!                               │
//!            ┌──────────────────┼──────────────────┐
//!            │                  │                  │
//!      ┌─────▼─────┐      ┌─────▼─────┐      ┌─────▼─────┐
//!      │ Worker 0  │      │ Worker 1  │      │ Worker N  │
//!      │ (thread)  │      │ (thread)  │      │ (thread)  │
//!      └─────┬─────┘      └─────┬─────┘      └─────┬─────┘
//!            │ one per task     │                  │
//!      ┌─────▼─────┐      ┌─────▼─────┐      ┌─────▼─────┐
//!      │Subordinate│      │Subordinate│      │Subordinate│
//!      │ (process) │      │ (process) │      │ (process) │
//!      └─────┬─────┘      └───────────┘      └───────────┘
//!            │
//!        helpers it forked (terminated with it)
//! ```
//!
//! # Guarantees
//!
//! - **Order**: results come back in input order, one per input
//! - **Deadline**: a task gets at most its timeout, measured from spawn
//! - **Cleanup**: overrun tasks lose their whole process tree
//! - **Record**: overrun and crashed inputs are appended to the skip log

mod ipc;
mod pool;
mod progress;
mod protocol;
mod signals;
mod skiplog;
mod subordinate;
pub mod subordinate_main;
pub mod tree;
mod worker;

pub use pool::{
    DEFAULT_GRACE_PERIOD, DEFAULT_MIN_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT_SECS,
    PoolConfig, ResultSink, execute, killer_pmap, resolve_worker_count,
};
pub use progress::format_duration;
pub use protocol::{SubordinateRequest, SubordinateResponse};
pub use signals::ExitReason;
pub use skiplog::{DEFAULT_SKIP_LOG, SkipLog, SkipLogHandle};
pub use subordinate::{Registry, SUBORDINATE_ARG};
pub use subordinate_main::run_subordinate_main;
pub use worker::{Outcome, WorkerStats};

pub use crate::tasks::TaskKind;
