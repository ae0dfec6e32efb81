use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use modelshelf_core::ProgressReporter;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Walk and hash phases: spinner (file count unknown upfront)
/// - Sync and render phases: progress bar
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.lock().take() {
            pb.finish_and_clear();
        }
    }

    fn spinner(&self, message: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICKS),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn bar(&self, label: &str, total: usize) {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {label} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)"
        );
        pb.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━╸─")
                .tick_chars(TICKS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn advance(&self, done: usize, total: usize) {
        if let Some(pb) = self.lock().as_ref() {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        }
    }

    fn done(&self, message: String) {
        self.finish_bar();
        eprintln!("  {} {}", "✓".green(), message);
    }
}

impl ProgressReporter for CliReporter {
    fn on_prune_complete(&self, removed: usize) {
        if removed > 0 {
            eprintln!("  {} Removed {} missing models", "✓".green(), removed);
        }
    }

    fn on_walk_start(&self, root: &str) {
        self.spinner(&format!("Scanning {}...", root));
    }

    fn on_walk_progress(&self, files_examined: usize) {
        if let Some(pb) = self.lock().as_ref() {
            pb.set_message(format!("Scanning... {} files examined", files_examined));
        }
    }

    fn on_walk_complete(&self, matched: usize, examined: usize, duration_secs: f64) {
        self.done(format!(
            "Scan complete: {} models out of {} files in {:.2}s",
            matched, examined, duration_secs
        ));
    }

    fn on_hash_start(&self, total_files: usize) {
        self.spinner(&format!("Checking content of {} models...", total_files));
    }

    fn on_hash_complete(&self, hashed: usize, reused: usize, duration_secs: f64) {
        self.done(format!(
            "Hash complete: {} hashed, {} unchanged in {:.2}s",
            hashed, reused, duration_secs
        ));
    }

    fn on_sync_progress(&self, processed: usize, total: usize) {
        if self.lock().is_none() {
            self.bar("Saving", total);
        }
        self.advance(processed, total);
    }

    fn on_sync_complete(&self, inserted: usize, updated: usize, duration_secs: f64) {
        self.done(format!(
            "Database updated: {} new, {} changed in {:.2}s",
            inserted, updated, duration_secs
        ));
    }

    fn on_render_start(&self, total: usize) {
        self.bar("Rendering", total);
    }

    fn on_render_progress(&self, done: usize, total: usize) {
        self.advance(done, total);
    }

    fn on_render_complete(&self, rendered: usize, fallbacks: usize, duration_secs: f64) {
        self.done(format!(
            "Thumbnails complete: {} rendered, {} placeholders in {:.2}s",
            rendered, fallbacks, duration_secs
        ));
    }
}
