use crate::config::AppConfig;
use crate::error::Error;
use crate::hasher;
use crate::library::Library;
use crate::platform;
use crate::progress::ProgressReporter;
use crate::render::{
    Clock, EmbeddedPreviewBackend, RenderBackend, RenderScheduler, SchedulerOptions,
    ThumbnailCache, TokioClock,
};
use crate::scanner::{ScanTask, WalkerHandle};
use crate::storage::models::{DiscoveredFile, ScannedModel};
use crate::sync::{self, SyncReport};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Drives a scan of one root: prune, walk, hash, sync.
pub struct ScanEngine {
    config: AppConfig,
    library: Library,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub root: String,
    /// Files that matched the extension and size filters.
    pub files: usize,
    pub total_examined: usize,
    /// Records pruned because their file vanished.
    pub removed: usize,
    pub hashed: usize,
    pub reused_hashes: usize,
    pub hash_failures: usize,
    pub walk_cancelled: bool,
    pub sync: SyncReport,
    pub duration: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailReport {
    pub requested: usize,
    pub rendered: usize,
    pub fallbacks: usize,
    pub save_failures: usize,
    /// Models never submitted because the run was cancelled.
    pub skipped: usize,
}

impl ThumbnailReport {
    pub fn add(&mut self, other: ThumbnailReport) {
        self.requested += other.requested;
        self.rendered += other.rendered;
        self.fallbacks += other.fallbacks;
        self.save_failures += other.save_failures;
        self.skipped += other.skipped;
    }
}

impl ScanEngine {
    pub fn new(config: AppConfig, library: Library) -> Self {
        Self {
            config,
            library,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Setting this flag stops the walker at the next directory, the sync at
    /// the next batch and thumbnail generation at the next submission.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the full indexing pipeline for `root`:
    /// 1. Prune records under `root` whose files are gone
    /// 2. Walk `root` on the walker thread
    /// 3. Hash new or changed files, reuse stored digests for the rest
    /// 4. Upsert everything in batched transactions
    pub async fn scan(
        &self,
        root: &Path,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<ScanOutcome, Error> {
        let root = match platform::canonical_path(root) {
            Ok(canonical) if canonical.is_dir() => canonical,
            _ => return Err(Error::RootNotFound(root.to_path_buf())),
        };
        let started = Instant::now();
        let root_key = platform::normalize_path(&root);
        info!("Scanning {}", root_key);

        // Phase 1: Prune
        let prune_root = root_key.clone();
        let removed = self
            .library
            .run("prune", move |db| sync::prune_missing_files(db, &prune_root))
            .await?;
        reporter.on_prune_complete(removed);

        // Phase 2: Walk
        let max_file_size = self
            .library
            .run("max_file_size", |db| Ok(db.max_file_size_bytes()?))
            .await?;
        let task = ScanTask::new(root.clone(), max_file_size)
            .with_ignore_globs(&self.config.ignore_patterns)
            .with_cancel_token(Arc::clone(&self.cancel));

        reporter.on_walk_start(&root_key);
        let walk_start = Instant::now();
        let walker = WalkerHandle::spawn(task)?;
        let walked = walker
            .finish(|examined| reporter.on_walk_progress(examined))
            .await?;
        reporter.on_walk_complete(
            walked.files.len(),
            walked.total_examined,
            walk_start.elapsed().as_secs_f64(),
        );
        if walked.cancelled {
            warn!(
                "Walk of {} cancelled, syncing {} files found so far",
                root_key,
                walked.files.len()
            );
        }

        // Phase 3: Hash
        let total_examined = walked.total_examined;
        let walk_cancelled = walked.cancelled;
        let hash_start = Instant::now();
        reporter.on_hash_start(walked.files.len());
        let hashed = self.resolve_hashes(&root_key, walked.files).await?;
        reporter.on_hash_complete(
            hashed.hashed,
            hashed.reused,
            hash_start.elapsed().as_secs_f64(),
        );

        // Phase 4: Sync
        let files = hashed.models.len();
        let batch_size = self.config.batch_size;
        let cancel = Arc::clone(&self.cancel);
        let sync_reporter = Arc::clone(&reporter);
        let sync_start = Instant::now();
        let models = hashed.models;
        let report = self
            .library
            .run("sync", move |db| {
                Ok(sync::sync_files(
                    db,
                    &models,
                    batch_size,
                    Some(cancel.as_ref()),
                    |processed, total| sync_reporter.on_sync_progress(processed, total),
                ))
            })
            .await?;
        reporter.on_sync_complete(
            report.counts.inserted,
            report.counts.updated,
            sync_start.elapsed().as_secs_f64(),
        );

        if !report.is_complete() {
            warn!(
                "Sync of {} incomplete: {} failed batches, cancelled: {}",
                root_key,
                report.failed_batches.len(),
                report.cancelled
            );
        }
        info!(
            "Scan of {} finished: {} files, {} inserted, {} updated, {} unchanged, {} removed",
            root_key,
            files,
            report.counts.inserted,
            report.counts.updated,
            report.counts.unchanged,
            removed
        );

        Ok(ScanOutcome {
            root: root_key,
            files,
            total_examined,
            removed,
            hashed: hashed.hashed,
            reused_hashes: hashed.reused,
            hash_failures: hashed.failures,
            walk_cancelled,
            sync: report,
            duration: started.elapsed(),
        })
    }

    async fn resolve_hashes(
        &self,
        root_key: &str,
        files: Vec<DiscoveredFile>,
    ) -> Result<HashedFiles, Error> {
        let states_root = root_key.to_string();
        let stored = self
            .library
            .run("scan_states", move |db| Ok(db.scan_states_under(&states_root)?))
            .await?;

        let mut digests: Vec<Option<String>> = Vec::with_capacity(files.len());
        let mut pending: Vec<(usize, PathBuf)> = Vec::new();
        for (i, file) in files.iter().enumerate() {
            let state = stored.get(&file.file_path);
            if hasher::needs_rehash(file, state) {
                digests.push(None);
                pending.push((i, PathBuf::from(&file.file_path)));
            } else {
                digests.push(state.and_then(|s| s.content_hash.clone()));
            }
        }

        let reused = files.len() - pending.len();
        debug!("{} files to hash, {} digests reused", pending.len(), reused);

        let paths: Vec<PathBuf> = pending.iter().map(|(_, p)| p.clone()).collect();
        let fresh = run_blocking("hash", move || hasher::hash_files(&paths)).await?;

        let mut failures = 0;
        for ((i, _), digest) in pending.iter().zip(fresh) {
            if digest.is_none() {
                failures += 1;
            }
            digests[*i] = digest;
        }

        let models = files
            .into_iter()
            .zip(digests)
            .map(|(file, digest)| ScannedModel::from_discovered(file, digest))
            .collect();

        Ok(HashedFiles {
            models,
            hashed: pending.len() - failures,
            reused,
            failures,
        })
    }

    /// Build a scheduler over the embedded-preview backend using the stored
    /// concurrency and thumbnail-size settings.
    pub async fn start_scheduler(&self) -> Result<Arc<RenderScheduler<EmbeddedPreviewBackend>>, Error> {
        let (max_concurrent, max_size) = self
            .library
            .run("render_settings", |db| {
                Ok((db.max_concurrent_renders()?, db.max_thumbnail_size()?))
            })
            .await?;
        let render = &self.config.render;
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        Ok(Arc::new(RenderScheduler::start(
            EmbeddedPreviewBackend::new(max_size),
            ThumbnailCache::shared(render.cache_capacity),
            clock,
            SchedulerOptions::from_config(render, max_concurrent),
        )))
    }

    /// Render and store thumbnails for every model (under `root`, if given)
    /// that has none. Models that cannot be rendered get the fallback image.
    pub async fn generate_thumbnails<B: RenderBackend>(
        &self,
        root: Option<&Path>,
        scheduler: &Arc<RenderScheduler<B>>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<ThumbnailReport, Error> {
        let started = Instant::now();
        let root_key = root.map(platform::root_key);
        let paths = self
            .library
            .run("models_without_thumbnails", move |db| {
                Ok(db.models_without_thumbnails(root_key.as_deref())?)
            })
            .await?;

        let mut report = ThumbnailReport {
            requested: paths.len(),
            ..Default::default()
        };
        reporter.on_render_start(paths.len());
        if paths.is_empty() {
            reporter.on_render_complete(0, 0, started.elapsed().as_secs_f64());
            return Ok(report);
        }

        // At most one scheduler's worth of renders is in flight. The cancel
        // flag is checked before every submission.
        let window = scheduler.max_concurrent_renders();
        let mut queued = paths.into_iter();
        let mut renders = JoinSet::new();
        let mut done = 0;
        loop {
            while renders.len() < window && !self.cancel.load(Ordering::Relaxed) {
                let Some(path) = queued.next() else {
                    break;
                };
                let scheduler = Arc::clone(scheduler);
                renders.spawn(async move {
                    let outcome = scheduler.render_or_fallback(&path).await;
                    (path, outcome)
                });
            }

            let Some(joined) = renders.join_next().await else {
                break;
            };
            let (path, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Render task failed to complete: {}", e);
                    report.save_failures += 1;
                    continue;
                }
            };
            done += 1;

            if outcome.is_fallback() {
                report.fallbacks += 1;
            } else {
                report.rendered += 1;
            }
            let png = outcome.into_thumbnail();
            let save_path = path.clone();
            let saved = self
                .library
                .run("save_thumbnail", move |db| {
                    Ok(db.save_thumbnail(&save_path, png.as_bytes())?)
                })
                .await;
            match saved {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Model {} was removed before its thumbnail was saved", path);
                    report.save_failures += 1;
                }
                Err(e) => {
                    warn!("Could not save thumbnail for {}: {}", path, e);
                    report.save_failures += 1;
                }
            }
            reporter.on_render_progress(done, report.requested);
        }

        report.skipped = queued.len();
        if report.skipped > 0 {
            info!(
                "Thumbnail generation cancelled, {} models left without thumbnails",
                report.skipped
            );
        }

        reporter.on_render_complete(
            report.rendered,
            report.fallbacks,
            started.elapsed().as_secs_f64(),
        );
        info!(
            "Thumbnails: {} rendered, {} fallbacks, {} not saved",
            report.rendered, report.fallbacks, report.save_failures
        );
        Ok(report)
    }
}

struct HashedFiles {
    models: Vec<ScannedModel>,
    hashed: usize,
    reused: usize,
    failures: usize,
}

async fn run_blocking<T, F>(label: &'static str, job: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| Error::Worker(format!("{label} task failed: {e}")))
}
