use crate::workflow::ProgressSample;
use indicatif::{DecimalBytes, ProgressBar, ProgressStyle};
use std::time::Duration;

const TEMPLATE: &str = "[{elapsed_precise}] {prefix} [{bar:40.cyan/blue}] {percent:>3}% {wide_msg}";

/// Conditioning progress on the terminal.
///
/// The bar fills as the record pointer counts down through each sub-pass.
pub struct ConditionProgress {
    bar: ProgressBar,
    capacity: u64,
    gigabyte: bool,
}

impl ConditionProgress {
    pub fn new(label: &str, capacity: u64, gigabyte: bool) -> Self {
        let bar = ProgressBar::new(capacity.max(1));
        let style = ProgressStyle::with_template(TEMPLATE)
            .map(|style| style.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_prefix(label.to_string());
        Self {
            bar,
            capacity,
            gigabyte,
        }
    }

    /// Draws nothing; for `--json` output and non-interactive runs
    pub fn hidden(capacity: u64, gigabyte: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            capacity,
            gigabyte,
        }
    }

    pub fn update(&self, sample: &ProgressSample) {
        self.bar
            .set_position(self.capacity.saturating_sub(sample.current_offset));
        self.bar
            .set_message(sample_message(sample, self.capacity, self.gigabyte));
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

/// `Read pass: 12000000 bytes to go (12%) at 1024Mbps`
pub(crate) fn sample_message(sample: &ProgressSample, capacity: u64, gigabyte: bool) -> String {
    let percent = if capacity > 0 {
        100 * sample.current_offset.min(capacity) / capacity
    } else {
        0
    };
    let rate = sample
        .data_rate
        .map(|rate| format!(" at {}", format_rate(rate)))
        .unwrap_or_default();
    format!(
        "{} pass: {} to go ({}%){}",
        sample.pass,
        format_size(sample.current_offset, gigabyte),
        percent,
        rate
    )
}

/// Byte count as `<n> bytes`, or in GB (10^9) with `gigabyte`
pub fn format_size(bytes: u64, gigabyte: bool) -> String {
    if gigabyte {
        format!("{:.7}GB", bytes as f64 / 1.0e9)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Bytes per second as megabits per second
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{:.0}Mbps", bytes_per_second * 8.0 / 1.0e6)
}

/// `Conditioning 100.00 GB in bank A took 2h 5m 9s (7509 secs)`
pub fn run_summary(verb: &str, capacity: u64, label: &str, duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{} {} in {} took {} ({} secs)",
        verb,
        DecimalBytes(capacity),
        label,
        humantime::format_duration(Duration::from_secs(secs)),
        secs
    )
}
