//! Supervisor: validates configuration, runs the workers and collects results.

use super::progress::Progress;
use super::skiplog::{DEFAULT_SKIP_LOG, SkipLog};
use super::subordinate::Registry;
use super::worker::{Outcome, Task, Worker, WorkerSettings};
use crate::error::{ApkxError, Result};
use crate::tasks::TaskKind;
use crossbeam_channel::{Receiver, bounded, unbounded};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Per-task timeout used when none is given, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 4;

/// Shortest per-task timeout the executor accepts, in seconds.
pub const DEFAULT_MIN_TIMEOUT_SECS: u64 = 1;

/// Time between SIGTERM and SIGKILL when terminating a process tree.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long an idle worker waits on the task queue before re-checking the
/// stop flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// CPU cores left for the supervisor and the rest of the system when the
/// worker count is derived automatically.
const RESERVED_CORES: usize = 2;

/// Configuration for one [`killer_pmap`] call.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Requested worker count. `None` derives it from the CPU count.
    pub workers: Option<usize>,
    /// Per-task wall-clock limit, in seconds.
    pub timeout_secs: u64,
    /// Timeouts below this are rejected.
    pub min_timeout_secs: u64,
    /// Where skipped payloads are appended.
    pub skip_log: PathBuf,
    /// Executable started as subordinate. `None` uses the current executable.
    pub program: Option<PathBuf>,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
    /// Log filter handed to subordinates.
    pub log_filter: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl PoolConfig {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            workers: None,
            timeout_secs,
            min_timeout_secs: DEFAULT_MIN_TIMEOUT_SECS,
            skip_log: PathBuf::from(DEFAULT_SKIP_LOG),
            program: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            show_progress: false,
            log_filter: None,
        }
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_min_timeout(mut self, secs: u64) -> Self {
        self.min_timeout_secs = secs;
        self
    }

    pub fn with_skip_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip_log = path.into();
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    /// Number of workers this configuration will run.
    pub fn resolve_workers(&self) -> Result<usize> {
        resolve_worker_count(self.workers, available_cores())
    }

    /// Check the timeout against the configured minimum. A zero timeout is
    /// rejected whatever the minimum.
    pub fn validate_timeout(&self) -> Result<Duration> {
        let minimum = self.min_timeout_secs.max(1);
        if self.timeout_secs < minimum {
            return Err(ApkxError::TimeoutTooShort {
                timeout: self.timeout_secs,
                minimum,
            });
        }
        Ok(Duration::from_secs(self.timeout_secs))
    }
}

/// Resolve the requested worker count against `cores`.
///
/// With no request the count is `cores - 2`, floored at one. A pool needs at
/// least two workers, so small machines must ask for a count explicitly.
pub fn resolve_worker_count(requested: Option<usize>, cores: usize) -> Result<usize> {
    let count = requested.unwrap_or_else(|| cores.saturating_sub(RESERVED_CORES).max(1));
    if count < 2 {
        return Err(ApkxError::InvalidWorkerCount(count));
    }
    Ok(count)
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Collects outcomes as they arrive and puts them back in input order.
#[derive(Debug)]
pub struct ResultSink {
    slots: Vec<Option<Option<Value>>>,
    received: usize,
}

impl ResultSink {
    pub fn new(total: usize) -> Self {
        Self {
            slots: vec![None; total],
            received: 0,
        }
    }

    /// Store one outcome. Returns false for an index that is out of range
    /// or already filled.
    pub fn accept(&mut self, outcome: Outcome) -> bool {
        match self.slots.get_mut(outcome.index) {
            Some(slot @ None) => {
                *slot = Some(outcome.value);
                self.received += 1;
                true
            }
            _ => false,
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    /// Indices that never reported.
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Results in input order. Missing and mistyped values become `None`.
    pub fn into_ordered<O: DeserializeOwned>(self) -> Vec<Option<O>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let value = slot.flatten()?;
                match serde_json::from_value(value) {
                    Ok(output) => Some(output),
                    Err(e) => {
                        warn!(index, error = %e, "Task result has an unexpected shape");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Run `task` over every input in its own subordinate process, at most
/// `workers` at a time, and return the results in input order.
///
/// Each task gets `config.timeout_secs` of wall-clock time. A task that
/// overruns, or whose subordinate dies without reporting, yields `None`, has
/// its whole process tree terminated and its input appended to the skip log.
///
/// Configuration errors are returned before any process is started. Once the
/// workers are running the call always produces one entry per input.
#[instrument(level = "debug", skip_all, fields(task = task.name(), inputs = inputs.len()))]
pub fn killer_pmap<P, O>(task: &TaskKind, inputs: Vec<P>, config: &PoolConfig) -> Result<Vec<Option<O>>>
where
    P: Serialize + Display,
    O: DeserializeOwned,
{
    let worker_count = config.resolve_workers()?;
    let timeout = config.validate_timeout()?;

    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let program = match &config.program {
        Some(program) => program.clone(),
        None => std::env::current_exe()?,
    };

    let total = inputs.len();
    let mut sink = ResultSink::new(total);
    let mut progress = Progress::new(total, config.show_progress);

    let (task_tx, task_rx) = bounded::<Task>(total);
    for (index, input) in inputs.into_iter().enumerate() {
        let label = input.to_string();
        let payload = match serde_json::to_value(&input) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(index, error = %e, "Input could not be serialized");
                sink.accept(Outcome::absent(index));
                progress.finish_one(index, false);
                continue;
            }
        };
        if task_tx.send(Task { index, payload, label }).is_err() {
            sink.accept(Outcome::absent(index));
        }
    }
    drop(task_tx);

    let skip_log = SkipLog::open(&config.skip_log)?;
    let registry = Registry::new();
    let stop = Arc::new(AtomicBool::new(false));
    let settings = Arc::new(WorkerSettings {
        program,
        task: task.clone(),
        timeout,
        grace_period: config.grace_period,
        poll_interval: config.poll_interval,
        log_filter: config.log_filter.clone(),
    });

    info!(
        workers = worker_count,
        tasks = total,
        timeout_secs = config.timeout_secs,
        "Starting worker pool"
    );

    let (result_tx, result_rx) = unbounded::<Outcome>();
    let mut handles: Vec<JoinHandle<_>> = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let worker = Worker::new(
            id,
            Arc::clone(&settings),
            task_rx.clone(),
            result_tx.clone(),
            Arc::clone(&stop),
            skip_log.handle(),
            registry.clone(),
        );
        match std::thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker.run())
        {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!(
                    worker_id = id,
                    started = handles.len(),
                    error = %e,
                    "Could not start worker thread, continuing with fewer workers"
                );
                break;
            }
        }
    }
    drop(task_rx);
    drop(result_tx);

    collect(&result_rx, &mut sink, &mut progress);

    // Teardown: stop the workers, clear out anything they left running,
    // then wait for them before closing the skip log they write to.
    stop.store(true, Ordering::SeqCst);
    let swept = registry.sweep(config.grace_period);
    if swept > 0 {
        warn!(swept, "Terminated subordinates left running at teardown");
    }
    for handle in handles {
        match handle.join() {
            Ok(stats) => debug!(?stats, "Worker joined"),
            Err(_) => error!("Worker thread panicked"),
        }
    }
    registry.sweep(config.grace_period);
    let skipped = skip_log.close();
    progress.finish();

    info!(
        tasks = total,
        finished = progress.finished(),
        without_result = progress.skipped(),
        skip_logged = skipped,
        elapsed_secs = progress.elapsed().as_secs(),
        "Worker pool finished"
    );

    Ok(sink.into_ordered())
}

/// Receive outcomes until every slot is filled or every worker has gone.
///
/// Slots still empty when the workers are gone stay `None`.
fn collect(results: &Receiver<Outcome>, sink: &mut ResultSink, progress: &mut Progress) {
    while !sink.is_complete() {
        match results.recv() {
            Ok(outcome) => {
                let (index, produced) = (outcome.index, outcome.value.is_some());
                if sink.accept(outcome) {
                    progress.finish_one(index, produced);
                } else {
                    warn!(index, "Discarding duplicate result");
                }
            }
            Err(_) => {
                error!(
                    missing = sink.missing().len(),
                    "All workers exited before every task reported"
                );
                return;
            }
        }
    }
}

/// Alias of [`killer_pmap`].
pub fn execute<P, O>(task: &TaskKind, inputs: Vec<P>, config: &PoolConfig) -> Result<Vec<Option<O>>>
where
    P: Serialize + Display,
    O: DeserializeOwned,
{
    killer_pmap(task, inputs, config)
}
