//! Terminal feedback for `mixmatch` runs.
//!
//! Batch matching reports through [`TrackProgress`], which counts finished and
//! matched tracks from the worker threads. With `--log-only` the bars stay
//! hidden and the same counts go to the tracing log every few tracks.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Global flag for log-only mode (set from args in main)
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Progress bar over `len` tracks. Hidden in log-only mode.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(bar_style());
    }
    pb.set_message(msg.to_string());
    pb
}

/// Whether a log line is due at `current` of `total` for the given interval.
pub fn progress_due(current: u64, total: u64, interval: u64) -> bool {
    interval > 0 && (current % interval == 0 || current == total)
}

/// Log progress every `interval` items, only in log-only mode.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if is_log_only() && progress_due(current, total, interval) {
        let pct = if total == 0 {
            100.0
        } else {
            100.0 * current as f64 / total as f64
        };
        tracing::info!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
    }
}

/// Finished/matched counters behind the batch progress bar. Shared by
/// reference with the track workers.
pub struct TrackProgress {
    bar: ProgressBar,
    total: u64,
    interval: u64,
    done: AtomicU64,
    matched: AtomicU64,
}

impl TrackProgress {
    pub fn new(total: u64, interval: u64) -> Self {
        Self {
            bar: create_progress_bar(total, "Matching"),
            total,
            interval,
            done: AtomicU64::new(0),
            matched: AtomicU64::new(0),
        }
    }

    /// Count one finished track. Returns how many tracks are done.
    pub fn record(&self, matched: bool) -> u64 {
        let matched_so_far = if matched {
            self.matched.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.matched.load(Ordering::Relaxed)
        };
        let current = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.bar.inc(1);
        if current % self.interval.max(1) == 0 {
            self.bar.set_message(format!("Matching ({} matched)", matched_so_far));
        }
        log_progress("match", current, self.total, self.interval);
        current
    }

    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.bar.finish_with_message(format!(
            "Matched {}/{} tracks",
            self.matched(),
            self.done.load(Ordering::Relaxed)
        ));
    }
}

/// Spinner for work without a known length. Hidden in log-only mode.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{msg} {spinner} [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }

    #[test]
    fn test_track_progress_counts() {
        set_log_only(true);
        let progress = TrackProgress::new(3, 25);
        assert_eq!(progress.record(true), 1);
        assert_eq!(progress.record(false), 2);
        assert_eq!(progress.record(true), 3);
        assert_eq!(progress.matched(), 2);
        progress.finish();
    }

    #[test]
    fn test_progress_due() {
        assert!(progress_due(10, 95, 10));
        assert!(progress_due(95, 95, 10));
        assert!(!progress_due(11, 95, 10));
        assert!(!progress_due(10, 95, 0));
    }
}
