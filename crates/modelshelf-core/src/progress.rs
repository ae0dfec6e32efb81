/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_prune_complete(&self, _removed: usize) {}
    fn on_walk_start(&self, _root: &str) {}
    fn on_walk_progress(&self, _files_examined: usize) {}
    fn on_walk_complete(&self, _matched: usize, _examined: usize, _duration_secs: f64) {}
    fn on_hash_start(&self, _total_files: usize) {}
    fn on_hash_complete(&self, _hashed: usize, _reused: usize, _duration_secs: f64) {}
    fn on_sync_progress(&self, _processed: usize, _total: usize) {}
    fn on_sync_complete(&self, _inserted: usize, _updated: usize, _duration_secs: f64) {}
    fn on_render_start(&self, _total: usize) {}
    fn on_render_progress(&self, _done: usize, _total: usize) {}
    fn on_render_complete(&self, _rendered: usize, _fallbacks: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
