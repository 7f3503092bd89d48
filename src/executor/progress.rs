//! Batch progress and time-remaining estimates.
//!
//! Purely diagnostic: nothing here feeds back into scheduling.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Tracks finished tasks against the batch size.
pub struct Progress {
    total: usize,
    finished: usize,
    skipped: usize,
    started: Instant,
    bar: Option<ProgressBar>,
}

impl Progress {
    /// Create a tracker. With `show_bar`, a progress bar is drawn on stderr.
    pub fn new(total: usize, show_bar: bool) -> Self {
        let bar = show_bar.then(|| {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            {
                pb.set_style(style.progress_chars("█▓▒░  "));
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        Self {
            total,
            finished: 0,
            skipped: 0,
            started: Instant::now(),
            bar,
        }
    }

    /// Record one outcome.
    pub fn finish_one(&mut self, index: usize, produced: bool) {
        self.finished += 1;
        if !produced {
            self.skipped += 1;
        }

        debug!(
            index,
            finished = self.finished,
            total = self.total,
            percent = self.percent(),
            remaining = %self.eta_string(),
            "Task finished"
        );

        if let Some(pb) = &self.bar {
            pb.set_position(self.finished as u64);
            if self.skipped > 0 {
                pb.set_message(format!("{} without result", self.skipped));
            }
        }
    }

    /// Whole percent of tasks finished.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.finished * 100) / self.total).min(100) as u8
    }

    /// Remaining time, extrapolated from the mean time per finished task.
    pub fn eta(&self) -> Option<Duration> {
        estimate_remaining(self.started.elapsed(), self.finished, self.total)
    }

    pub fn eta_string(&self) -> String {
        match self.eta() {
            Some(eta) => format_duration(eta),
            None => "calculating...".to_string(),
        }
    }

    pub fn finished(&self) -> usize {
        self.finished
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Clear the bar, if any.
    pub fn finish(&self) {
        if let Some(pb) = &self.bar {
            pb.finish_and_clear();
        }
    }
}

fn estimate_remaining(elapsed: Duration, finished: usize, total: usize) -> Option<Duration> {
    if finished == 0 {
        return None;
    }
    let remaining = total.saturating_sub(finished) as u32;
    Some(elapsed / finished as u32 * remaining)
}

/// `1h 02m 03s`, `4m 05s` or `6s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
