//! Progress indicators for the stackup CLI.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for a blocking step of unknown length
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn finish_clear(pb: &ProgressBar) {
    pb.finish_and_clear();
}
