//! Handle to a single-task subordinate process.
//!
//! The subordinate is this same executable started with [`SUBORDINATE_ARG`].
//! The request goes down its stdin; its one response comes back on stdout and
//! is picked up by a reader thread that forwards it over a one-shot channel,
//! so the worker can wait with a deadline instead of blocking on the pipe.
//!
//! Once the response is in, the subordinate keeps running until its stdin is
//! closed. While it lingers its process tree stays rooted at a known pid,
//! which is what lets [`Subordinate::release`] find every helper it forked.

use super::ipc::{MessageReader, MessageWriter, PipeFd};
use super::protocol::{SubordinateRequest, SubordinateResponse};
use super::signals::ExitReason;
use super::tree;
use crate::error::{ApkxError, Result};
use crate::logging::LOG_FILTER_ENV;
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Hidden first argument that switches the binary into subordinate mode.
pub const SUBORDINATE_ARG: &str = "__subordinate";

/// How long a finished subordinate gets to exit on its own once its stdin
/// is closed, before it is signalled.
const SELF_EXIT_WINDOW: Duration = Duration::from_millis(250);

/// Stack size for pipe reader threads. They only decode one JSON line.
const READER_STACK_SIZE: usize = 256 * 1024;

/// What the worker observed while waiting on a subordinate.
#[derive(Debug)]
pub enum Awaited {
    /// A response arrived before the deadline.
    Reported(SubordinateResponse),
    /// The subordinate closed its stdout or sent garbage without reporting.
    Silent,
    /// The deadline passed with no response.
    TimedOut,
}

/// Live subordinates, keyed by the id of the worker that owns them.
///
/// Each entry is added on spawn and removed when the handle reaps its
/// process, so whatever is still listed at teardown belongs to a worker that
/// never got to clean up.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    live: Arc<Mutex<HashMap<usize, Pid>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, worker_id: usize, pid: Pid) {
        let mut live = self.live.lock().expect("subordinate registry poisoned");
        if let Some(previous) = live.insert(worker_id, pid) {
            warn!(
                worker_id,
                previous = previous.as_raw(),
                pid = pid.as_raw(),
                "Worker registered a second live subordinate"
            );
        }
    }

    fn unregister(&self, worker_id: usize, pid: Pid) {
        let mut live = self.live.lock().expect("subordinate registry poisoned");
        if live.get(&worker_id) == Some(&pid) {
            live.remove(&worker_id);
        }
    }

    /// Snapshot of `(worker_id, pid)` for every registered subordinate.
    pub fn entries(&self) -> Vec<(usize, Pid)> {
        let live = self.live.lock().expect("subordinate registry poisoned");
        let mut entries: Vec<_> = live.iter().map(|(&w, &p)| (w, p)).collect();
        entries.sort_unstable_by_key(|&(w, _)| w);
        entries
    }

    /// Terminate every registered subordinate and its descendants.
    ///
    /// Returns the number of subordinates swept.
    pub fn sweep(&self, grace: Duration) -> usize {
        let entries = self.entries();
        for &(worker_id, pid) in &entries {
            let report = tree::kill_tree(pid, true, grace);
            debug!(worker_id, pid = pid.as_raw(), ?report, "Swept leftover subordinate");
            // Reap if it is still ours; ECHILD just means someone else did.
            let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
            self.unregister(worker_id, pid);
        }
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.live.lock().expect("subordinate registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One running subordinate, exclusively owned by a worker.
pub struct Subordinate {
    pid: Pid,
    worker_id: usize,
    started: Instant,
    stdin: Option<MessageWriter>,
    response: Receiver<io::Result<Option<SubordinateResponse>>>,
    registry: Registry,
    reaped: bool,
}

impl Subordinate {
    /// Start a subordinate for one request.
    ///
    /// `log_filter`, when set, becomes the subordinate's log filter so its
    /// diagnostics match the supervisor's verbosity.
    ///
    /// A request that cannot be written (the process died immediately) is
    /// not an error here: the worker will observe the closed pipe.
    pub fn spawn(
        program: &Path,
        worker_id: usize,
        request: &SubordinateRequest,
        registry: &Registry,
        log_filter: Option<&str>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.arg(SUBORDINATE_ARG);
        if let Some(filter) = log_filter {
            cmd.env(LOG_FILTER_ENV, filter);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                ApkxError::Subordinate(format!("Failed to spawn {}: {}", program.display(), e))
            })?;

        let pid = Pid::from_raw(child.id() as i32);
        registry.register(worker_id, pid);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ApkxError::Subordinate("Child stdin not captured".into()));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ApkxError::Subordinate("Child stdout not captured".into()));

        // From here on the handle owns the process; dropping it reaps.
        let (tx, rx) = bounded(1);
        let mut sub = Self {
            pid,
            worker_id,
            started: Instant::now(),
            stdin: None,
            response: rx,
            registry: registry.clone(),
            reaped: false,
        };

        let mut writer = MessageWriter::new(PipeFd::from(OwnedFd::from(stdin?)));
        let mut reader = MessageReader::new(PipeFd::from(OwnedFd::from(stdout?)));

        std::thread::Builder::new()
            .name(format!("subordinate-{}", pid))
            .stack_size(READER_STACK_SIZE)
            .spawn(move || {
                let _ = tx.send(reader.read_message::<SubordinateResponse>());
            })?;

        if let Err(e) = writer.write_message(request) {
            debug!(
                worker_id,
                pid = pid.as_raw(),
                error = %e,
                "Could not deliver request to subordinate"
            );
        }
        sub.stdin = Some(writer);

        trace!(worker_id, pid = pid.as_raw(), index = request.index, "Subordinate started");
        Ok(sub)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Time since spawn.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wait for the response until `timeout` after spawn.
    pub fn await_response(&self, timeout: Duration) -> Awaited {
        let remaining = timeout.saturating_sub(self.started.elapsed());
        match self.response.recv_timeout(remaining) {
            Ok(Ok(Some(response))) => Awaited::Reported(response),
            Ok(Ok(None)) => Awaited::Silent,
            Ok(Err(e)) => {
                debug!(
                    worker_id = self.worker_id,
                    pid = self.pid.as_raw(),
                    error = %e,
                    "Unreadable subordinate response"
                );
                Awaited::Silent
            }
            Err(RecvTimeoutError::Timeout) => Awaited::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Awaited::Silent,
        }
    }

    /// Tear the subordinate down and reap it.
    ///
    /// Descendants are terminated first, while the subordinate still anchors
    /// them. Then its stdin is closed, which lets a subordinate that already
    /// reported exit by itself; one that does not is terminated along with
    /// anything it forked in the meantime.
    pub fn release(mut self, grace: Duration) -> ExitReason {
        self.kill_descendants(grace);
        self.stdin.take();

        let deadline = Instant::now() + SELF_EXIT_WINDOW;
        while Instant::now() < deadline {
            if let Some(status) = self.try_wait() {
                return status.into();
            }
            if self.reaped {
                return ExitReason::Unknown;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        self.terminate_tree(grace)
    }

    /// Tear down a subordinate that missed its deadline. Unlike
    /// [`release`](Self::release) it is not given a chance to exit on its own.
    pub fn terminate(mut self, grace: Duration) -> ExitReason {
        self.kill_descendants(grace);
        self.stdin.take();
        self.terminate_tree(grace)
    }

    fn kill_descendants(&self, grace: Duration) {
        let report = tree::kill_tree(self.pid, false, grace);
        if report.terminated > 0 {
            debug!(
                worker_id = self.worker_id,
                pid = self.pid.as_raw(),
                ?report,
                "Terminated subordinate descendants"
            );
        }
    }

    fn terminate_tree(&mut self, grace: Duration) -> ExitReason {
        if self.reaped {
            return ExitReason::Unknown;
        }
        // The root is unreaped, so its pid cannot have been recycled.
        tree::kill_tree(self.pid, true, grace);
        self.wait().map_or(ExitReason::Unknown, ExitReason::from)
    }

    fn try_wait(&mut self) -> Option<WaitStatus> {
        if self.reaped {
            return None;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => None,
            Ok(status) => {
                self.mark_reaped();
                Some(status)
            }
            Err(_) => {
                self.mark_reaped();
                None
            }
        }
    }

    fn wait(&mut self) -> Option<WaitStatus> {
        if self.reaped {
            return None;
        }
        let status = loop {
            match waitpid(self.pid, None) {
                Err(nix::errno::Errno::EINTR) => continue,
                Ok(status) => break Some(status),
                Err(_) => break None,
            }
        };
        self.mark_reaped();
        status
    }

    fn mark_reaped(&mut self) {
        self.reaped = true;
        self.registry.unregister(self.worker_id, self.pid);
    }
}

impl Drop for Subordinate {
    /// Reached on unwind paths. The root is still unreaped here, so its
    /// descendants are found and killed before it.
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_descendants(Duration::ZERO);
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.mark_reaped();
        }
    }
}
