//! Terminal rendering of transfer progress.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ohflash::Observer;

/// Observer that renders each file transfer as a single progress bar line.
pub struct BarObserver {
    quiet: bool,
    bar: Option<ProgressBar>,
}

impl BarObserver {
    /// Create an observer; in quiet mode it stays silent.
    pub fn new(quiet: bool) -> Self {
        Self { quiet, bar: None }
    }
}

impl Observer for BarObserver {
    fn start(&mut self, file_name: &str, total: u64) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new(total);
        #[allow(clippy::unwrap_used)] // Static template string
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.set_message(file_name.to_string());
        self.bar = Some(bar);
    }

    fn progress(&mut self, sent: u64, _total: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(sent);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}
