//! Task progress: one tick per finished bucket.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const COUNT_TEMPLATE: &str = "{spinner:.green} {msg} {pos}/{len} [{bar:.cyan/blue}] {percent:>3}%  \
                              elapsed: {elapsed_precise}  eta: {eta_precise}";

/// Thin wrapper around an `indicatif` count bar.
pub struct ProgressScope {
    pb: ProgressBar,
}

impl ProgressScope {
    pub fn count<T: Into<String>>(label: T, total: u64) -> Self {
        let pb = ProgressBar::new(total);
        // The template is a constant; fall back to the default style rather than fail a run.
        if let Ok(style) = ProgressStyle::with_template(COUNT_TEMPLATE) {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        let label = label.into();
        if !label.is_empty() {
            pb.set_message(label);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    #[inline]
    pub fn inc_items(&self, delta: u64) {
        self.pb.inc(delta);
    }

    /// Print a line above the bar without tearing it.
    pub fn println<T: AsRef<str>>(&self, line: T) {
        self.pb.println(line);
    }

    pub fn finish<T: Into<String>>(&self, msg: T) {
        self.pb.finish_with_message(msg.into());
    }
}
