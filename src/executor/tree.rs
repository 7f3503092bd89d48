//! Process-tree discovery and termination.
//!
//! Descendants are found by an explicit breadth-first walk over a snapshot of
//! `(pid, ppid)` pairs rather than by process-group membership: analyzers are
//! free to call `setsid()` or put helpers in their own groups, but they cannot
//! hide from their parent links.
//!
//! The snapshot comes from `/proc` on Linux and from `ps` elsewhere.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How often liveness is re-checked while waiting out the grace window.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A point-in-time view of the parent/child links between processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessTable {
    children: HashMap<Pid, Vec<Pid>>,
}

impl ProcessTable {
    /// Build a table from `(pid, ppid)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Pid, Pid)>) -> Self {
        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, ppid) in pairs {
            if pid != ppid {
                children.entry(ppid).or_default().push(pid);
            }
        }
        Self { children }
    }

    /// Snapshot the live process table of this machine.
    pub fn snapshot() -> io::Result<Self> {
        read_process_pairs().map(Self::from_pairs)
    }

    /// Direct children of `pid`.
    pub fn children_of(&self, pid: Pid) -> &[Pid] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All transitive descendants of `root`, breadth-first, `root` excluded.
    ///
    /// Parents always come before their children in the returned order.
    pub fn descendants(&self, root: Pid) -> Vec<Pid> {
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut found = Vec::new();

        while let Some(pid) = queue.pop_front() {
            for &child in self.children_of(pid) {
                if seen.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        found
    }
}

/// Outcome of a tree termination, for logging.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KillReport {
    /// Processes that received SIGTERM.
    pub terminated: usize,
    /// Processes that ignored SIGTERM for the whole grace window.
    pub killed: usize,
    /// Processes that were already gone when signalled.
    pub vanished: usize,
}

/// Terminate every descendant of `root`, and `root` itself when
/// `include_root` is set.
///
/// SIGTERM goes out to the whole set first; whatever is still running after
/// `grace` gets SIGKILL. Processes that disappear along the way count as
/// success. The caller remains responsible for reaping `root` if it is its
/// own child.
pub fn kill_tree(root: Pid, include_root: bool, grace: Duration) -> KillReport {
    let mut targets = match ProcessTable::snapshot() {
        Ok(table) => table.descendants(root),
        Err(e) => {
            debug!(pid = root.as_raw(), error = %e, "Process table unavailable, signalling root only");
            Vec::new()
        }
    };
    if include_root {
        targets.insert(0, root);
    }
    terminate_all(&targets, grace)
}

/// Graceful-then-forceful termination of an explicit set of processes.
pub fn terminate_all(pids: &[Pid], grace: Duration) -> KillReport {
    let mut report = KillReport::default();
    if pids.is_empty() {
        return report;
    }

    let mut pending = Vec::with_capacity(pids.len());
    for &pid in pids {
        match send(pid, Signal::SIGTERM) {
            Delivery::Sent => {
                trace!(pid = pid.as_raw(), "Sent SIGTERM");
                report.terminated += 1;
                pending.push(pid);
            }
            Delivery::Gone => report.vanished += 1,
        }
    }

    let deadline = Instant::now() + grace;
    loop {
        pending.retain(|&pid| is_alive(pid));
        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(REAP_POLL_INTERVAL);
    }

    for pid in pending {
        if let Delivery::Sent = send(pid, Signal::SIGKILL) {
            debug!(pid = pid.as_raw(), "Process ignored SIGTERM, sent SIGKILL");
            report.killed += 1;
        }
    }
    report
}

enum Delivery {
    Sent,
    Gone,
}

fn send(pid: Pid, sig: Signal) -> Delivery {
    match signal::kill(pid, sig) {
        Ok(()) => Delivery::Sent,
        Err(Errno::ESRCH) => Delivery::Gone,
        Err(e) => {
            debug!(pid = pid.as_raw(), signal = ?sig, error = %e, "Failed to signal process");
            Delivery::Gone
        }
    }
}

/// Whether `pid` is running. Zombies count as dead: they hold no resources
/// worth killing and only wait for their parent to reap them.
pub fn is_alive(pid: Pid) -> bool {
    match signal::kill(pid, None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: Pid) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| parse_proc_stat(&stat))
        .is_some_and(|entry| entry.state == 'Z' || entry.state == 'X')
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: Pid) -> bool {
    false
}

/// The fields of `/proc/<pid>/stat` this module needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatEntry {
    pub pid: Pid,
    pub state: char,
    pub ppid: Pid,
}

/// Parse `/proc/<pid>/stat`.
///
/// Format: `pid (comm) state ppid ...`. `comm` may itself contain spaces and
/// parentheses, so the fields after it are located from the last `)`.
pub fn parse_proc_stat(stat: &str) -> Option<StatEntry> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let pid: i32 = stat[..open].trim().parse().ok()?;
    let mut rest = stat.get(close + 1..)?.split_whitespace();
    let state = rest.next()?.chars().next()?;
    let ppid: i32 = rest.next()?.parse().ok()?;
    Some(StatEntry {
        pid: Pid::from_raw(pid),
        state,
        ppid: Pid::from_raw(ppid),
    })
}

/// Parse `ps -A -o pid= -o ppid=` output.
#[cfg_attr(target_os = "linux", allow(dead_code))]
pub fn parse_ps_output(output: &str) -> Vec<(Pid, Pid)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid: i32 = fields.next()?.parse().ok()?;
            let ppid: i32 = fields.next()?.parse().ok()?;
            Some((Pid::from_raw(pid), Pid::from_raw(ppid)))
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn read_process_pairs() -> io::Result<Vec<(Pid, Pid)>> {
    let mut pairs = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // Processes can exit between readdir and open.
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(parsed) = parse_proc_stat(&stat) {
            pairs.push((parsed.pid, parsed.ppid));
        }
    }
    Ok(pairs)
}

#[cfg(not(target_os = "linux"))]
fn read_process_pairs() -> io::Result<Vec<(Pid, Pid)>> {
    let output = std::process::Command::new("ps")
        .args(["-A", "-o", "pid=", "-o", "ppid="])
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "ps exited with {}",
            output.status
        )));
    }
    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn test_descendants_breadth_first() {
        // 1 ─┬─ 10 ─┬─ 100
        //    │      └─ 101 ── 1000
        //    └─ 11
        // 2 ── 20
        let table = ProcessTable::from_pairs([
            (pid(10), pid(1)),
            (pid(11), pid(1)),
            (pid(100), pid(10)),
            (pid(101), pid(10)),
            (pid(1000), pid(101)),
            (pid(20), pid(2)),
        ]);

        assert_eq!(
            table.descendants(pid(1)),
            vec![pid(10), pid(11), pid(100), pid(101), pid(1000)]
        );
        assert_eq!(table.descendants(pid(101)), vec![pid(1000)]);
        assert!(table.descendants(pid(1000)).is_empty());
        assert!(table.descendants(pid(999)).is_empty());
    }

    #[test]
    fn test_descendants_terminates_on_cycles() {
        // A stale snapshot can contain a reused pid that points back up.
        let table = ProcessTable::from_pairs([(pid(2), pid(1)), (pid(3), pid(2)), (pid(1), pid(3))]);
        let found = table.descendants(pid(1));
        assert_eq!(found, vec![pid(2), pid(3)]);
    }

    #[test]
    fn test_self_parent_entries_ignored() {
        let table = ProcessTable::from_pairs([(pid(0), pid(0)), (pid(1), pid(0))]);
        assert_eq!(table.descendants(pid(0)), vec![pid(1)]);
    }

    #[test]
    fn test_parse_proc_stat() {
        let entry = parse_proc_stat("4242 (sleep) S 4241 4242 4242 0 -1 4194304").unwrap();
        assert_eq!(entry.pid, pid(4242));
        assert_eq!(entry.state, 'S');
        assert_eq!(entry.ppid, pid(4241));
    }

    #[test]
    fn test_parse_proc_stat_hostile_comm() {
        let entry = parse_proc_stat("77 (evil) Z 1 (x) R 5) R 12 77 77").unwrap();
        assert_eq!(entry.pid, pid(77));
        assert_eq!(entry.state, 'R');
        assert_eq!(entry.ppid, pid(12));

        assert!(parse_proc_stat("garbage").is_none());
        assert!(parse_proc_stat("12 (x)").is_none());
    }

    #[test]
    fn test_parse_ps_output() {
        let pairs = parse_ps_output("    1     0\n  312     1\nbogus line\n  313   312\n");
        assert_eq!(
            pairs,
            vec![(pid(1), pid(0)), (pid(312), pid(1)), (pid(313), pid(312))]
        );
    }

    #[test]
    fn test_snapshot_sees_own_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .spawn()
            .expect("Failed to spawn sleep");
        let child_pid = pid(child.id() as i32);
        let me = pid(std::process::id() as i32);

        let table = ProcessTable::snapshot().expect("snapshot");
        assert!(table.children_of(me).contains(&child_pid));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_kill_tree_reaches_grandchildren() {
        // sh forks two sleeps and waits; killing the tree must take all three.
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & sleep 30 & wait"])
            .stdin(Stdio::null())
            .spawn()
            .expect("Failed to spawn sh");
        let root = pid(child.id() as i32);

        // Let sh fork its children.
        let deadline = Instant::now() + Duration::from_secs(5);
        while ProcessTable::snapshot().unwrap().descendants(root).len() < 2 {
            assert!(Instant::now() < deadline, "sh never forked");
            std::thread::sleep(Duration::from_millis(20));
        }
        let grandchildren = ProcessTable::snapshot().unwrap().descendants(root);

        let report = kill_tree(root, true, Duration::from_secs(2));
        assert_eq!(report.terminated, 3);
        child.wait().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while grandchildren.iter().any(|&p| is_alive(p)) {
            assert!(Instant::now() < deadline, "grandchildren survived");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_terminate_missing_process_is_not_an_error() {
        // Above any configurable pid_max, so never a live process.
        let gone = pid(0x7fff_fff0);
        assert!(!is_alive(gone));

        let report = terminate_all(&[gone], Duration::from_millis(100));
        assert_eq!(report.vanished, 1);
        assert_eq!(report.terminated, 0);
        assert_eq!(report.killed, 0);
    }

    #[test]
    fn test_empty_target_set() {
        assert_eq!(terminate_all(&[], Duration::from_secs(1)), KillReport::default());
    }
}
