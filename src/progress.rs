//! Progress bars and spinners for rebuild phases.
//!
//! In log-only mode bars are hidden and progress goes through `tracing` at
//! fixed intervals instead, which keeps cron logs readable.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
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

fn hide_when_quiet(pb: &ProgressBar) -> bool {
    // Bars also stay hidden when stderr is not a terminal (tests, cron).
    if is_log_only() || pb.is_hidden() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return true;
    }
    false
}

/// Bar for a phase with a known number of items.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if !hide_when_quiet(&pb) {
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
        {
            pb.set_style(style.progress_chars("=> "));
        }
    }
    pb.set_message(msg.to_string());
    pb
}

/// Spinner for a phase of unknown length.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if !hide_when_quiet(&pb) {
        if let Ok(style) = ProgressStyle::default_spinner().template("{msg} {spinner} [{elapsed_precise}]") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Textual progress every `interval` items, only in log-only mode.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if is_log_only() && interval > 0 && (current % interval == 0 || current == total) {
        let pct = if total == 0 {
            100.0
        } else {
            100.0 * current as f64 / total as f64
        };
        tracing::info!(phase, current, total, "{:.1}%", pct);
    }
}

/// Finish a bar or spinner and mirror its final message to the log.
pub fn finish(pb: &ProgressBar, msg: String) {
    tracing::info!("{}", msg);
    pb.finish_with_message(msg);
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
    fn test_bars_work_without_terminal() {
        let pb = create_progress_bar(3, "Writing");
        pb.inc(3);
        finish(&pb, "Wrote 3 rows".to_string());
        assert_eq!(pb.position(), 3);

        let spinner = create_spinner("Sorting");
        finish(&spinner, "Sorted".to_string());
    }
}
