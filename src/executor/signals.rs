//! Classification of how a subordinate ended.
//!
//! Only used for diagnostics: every ending without a reported result is
//! handled the same way by the worker.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Why a subordinate process is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Crashed inside native code (SIGSEGV, SIGBUS, SIGABRT, SIGILL, SIGFPE).
    Crashed(Signal),
    /// Killed by any other signal, usually our own SIGTERM/SIGKILL.
    Signaled(Signal),
    /// Still running when inspected.
    StillAlive,
    /// Already reaped elsewhere, or a stop/continue status.
    Unknown,
}

impl ExitReason {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Crashed(sig) => format!("crashed ({})", sig.as_str()),
            Self::Signaled(sig) => format!("killed by {}", sig.as_str()),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

impl From<WaitStatus> for ExitReason {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => Self::Exited(code),
            WaitStatus::Signaled(_, signal, _) => match signal {
                Signal::SIGSEGV
                | Signal::SIGBUS
                | Signal::SIGABRT
                | Signal::SIGILL
                | Signal::SIGFPE => Self::Crashed(signal),
                _ => Self::Signaled(signal),
            },
            WaitStatus::StillAlive => Self::StillAlive,
            _ => Self::Unknown,
        }
    }
}
