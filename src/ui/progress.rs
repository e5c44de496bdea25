//! Progress bar wrapping `indicatif`, polled from the CLI while an [`Operation`] runs.
//!
//! [`Operation`]: crate::operation::Operation

use anyhow::Result;
use indicatif::{ProgressBar as Bar, ProgressStyle as Style};

const PROGRESS_TEMPLATE: &str = "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// A thin wrapper over `indicatif::ProgressBar` with this crate's styling.
pub struct ProgressBar {
    bar: Bar,
}

impl ProgressBar {
    /// Creates a bar with the given `total` (bytes) and description. `total` may be 0
    /// initially and updated once the real size is known via [`Self::set_total`].
    pub fn new(total: u64, description: &str) -> Result<Self> {
        let bar = Bar::new(total);
        bar.set_style(Style::with_template(PROGRESS_TEMPLATE)?.progress_chars("●○ "));
        bar.set_message(description.to_owned());
        Ok(Self { bar })
    }

    /// Adjusts the bar's length once the actual byte total becomes known.
    #[inline]
    pub fn set_total(&self, total: u64) {
        if total > 0 && self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.bar.inc(delta);
    }

    #[inline]
    pub fn finish(&self) {
        self.bar.finish();
    }
}

impl Drop for ProgressBar {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_with_message("Done");
        }
    }
}
