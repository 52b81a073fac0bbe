//! Status spinner shown while waiting for an extract.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ipums_extract_core::ExtractStatus;

/// Whether the spinner should be drawn.
pub(crate) fn should_use_spinner(stderr_is_terminal: bool, quiet: bool, dumb_terminal: bool) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// True when `TERM=dumb`.
pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM").is_ok_and(|term| term == "dumb")
}

/// Spinner fed by status updates; hidden when disabled.
pub(crate) struct StatusSpinner {
    bar: ProgressBar,
}

impl StatusSpinner {
    pub(crate) fn new(enabled: bool) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message("Waiting for catalog...");
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub(crate) fn update(&self, status: &ExtractStatus) {
        self.bar.set_message(status_message(status));
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn status_message(status: &ExtractStatus) -> String {
    if status.is_ready() {
        "Extract ready, downloading...".to_string()
    } else {
        format!("Extract {status}, waiting...")
    }
}
