//! Pool member: claims tasks and enforces their deadlines.
//!
//! A worker is a supervisor-side thread. It never runs task code itself;
//! every task it claims is handed to a fresh [`Subordinate`], and the worker
//! only waits, judges the deadline and cleans up. It holds at most one live
//! subordinate at a time and fully releases it before claiming the next task.

use super::protocol::{SubordinateRequest, SubordinateResponse};
use super::signals::ExitReason;
use super::skiplog::SkipLogHandle;
use super::subordinate::{Awaited, Registry, Subordinate};
use crate::tasks::TaskKind;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// One unit of work: an input with its position in the batch.
#[derive(Debug, Clone)]
pub struct Task {
    pub index: usize,
    /// The input, serialized for the subordinate.
    pub payload: Value,
    /// The input's string form, as written to the skip log.
    pub label: String,
}

/// What a task produced. `value` is `None` when it produced nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub index: usize,
    pub value: Option<Value>,
}

impl Outcome {
    pub fn absent(index: usize) -> Self {
        Self { index, value: None }
    }
}

/// Settings shared by every worker of one pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub program: PathBuf,
    pub task: TaskKind,
    pub timeout: Duration,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub log_filter: Option<String>,
}

/// Per-worker counters, returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: usize,
    pub timed_out: usize,
    pub failed: usize,
}

pub struct Worker {
    id: usize,
    settings: Arc<WorkerSettings>,
    tasks: Receiver<Task>,
    results: Sender<Outcome>,
    stop: Arc<AtomicBool>,
    skip_log: SkipLogHandle,
    registry: Registry,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        id: usize,
        settings: Arc<WorkerSettings>,
        tasks: Receiver<Task>,
        results: Sender<Outcome>,
        stop: Arc<AtomicBool>,
        skip_log: SkipLogHandle,
        registry: Registry,
    ) -> Self {
        Self {
            id,
            settings,
            tasks,
            results,
            stop,
            skip_log,
            registry,
            stats: WorkerStats::default(),
        }
    }

    /// Claim and run tasks until the queue is drained or the pool stops.
    pub fn run(mut self) -> WorkerStats {
        debug!(worker_id = self.id, "Worker started");

        while !self.stop.load(Ordering::SeqCst) {
            let task = match self.tasks.recv_timeout(self.settings.poll_interval) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let index = task.index;
            let label = task.label.clone();
            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| self.process(task))) {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(worker_id = self.id, index, "Worker panicked while processing task");
                    self.stats.failed += 1;
                    self.skip_log.record(&label);
                    Outcome::absent(index)
                }
            };

            if self.results.send(outcome).is_err() {
                // Supervisor is gone; nobody is waiting for more results.
                break;
            }
        }

        debug!(
            worker_id = self.id,
            completed = self.stats.completed,
            timed_out = self.stats.timed_out,
            failed = self.stats.failed,
            "Worker stopped"
        );
        self.stats
    }

    fn process(&mut self, task: Task) -> Outcome {
        let Task {
            index,
            payload,
            label,
        } = task;
        trace!(worker_id = self.id, index, payload = %label, "Processing task");

        let request = SubordinateRequest {
            index,
            task: self.settings.task.clone(),
            payload,
        };

        let sub = match Subordinate::spawn(
            &self.settings.program,
            self.id,
            &request,
            &self.registry,
            self.settings.log_filter.as_deref(),
        ) {
            Ok(sub) => sub,
            Err(e) => {
                warn!(worker_id = self.id, index, error = %e, "Could not start subordinate");
                return self.skip(index, &label);
            }
        };
        let pid = sub.pid().as_raw();

        match sub.await_response(self.settings.timeout) {
            Awaited::Reported(SubordinateResponse::Done { value }) => {
                let elapsed = sub.elapsed();
                let reason = sub.release(self.settings.grace_period);
                trace!(worker_id = self.id, index, pid, %reason, "Subordinate released");
                debug!(
                    worker_id = self.id,
                    index,
                    elapsed_ms = elapsed.as_millis() as u64,
                    produced = value.is_some(),
                    "Task completed"
                );
                self.stats.completed += 1;
                Outcome { index, value }
            }
            Awaited::Reported(SubordinateResponse::Failed { message }) => {
                let reason = sub.release(self.settings.grace_period);
                warn!(worker_id = self.id, index, pid, %reason, %message, "Task failed");
                self.stats.failed += 1;
                self.skip(index, &label)
            }
            Awaited::Reported(SubordinateResponse::Rejected { message }) => {
                sub.release(self.settings.grace_period);
                warn!(worker_id = self.id, index, %message, "Subordinate rejected task");
                self.stats.failed += 1;
                Outcome::absent(index)
            }
            Awaited::TimedOut => {
                let reason = sub.terminate(self.settings.grace_period);
                debug!(
                    worker_id = self.id,
                    index,
                    pid,
                    timeout_secs = self.settings.timeout.as_secs(),
                    %reason,
                    "Task timed out"
                );
                self.stats.timed_out += 1;
                self.skip(index, &label)
            }
            Awaited::Silent => {
                let reason: ExitReason = sub.release(self.settings.grace_period);
                warn!(
                    worker_id = self.id,
                    index,
                    pid,
                    %reason,
                    "Subordinate ended without a result"
                );
                self.stats.failed += 1;
                self.skip(index, &label)
            }
        }
    }

    fn skip(&self, index: usize, label: &str) -> Outcome {
        self.skip_log.record(label);
        Outcome::absent(index)
    }
}
