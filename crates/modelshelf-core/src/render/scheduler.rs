use super::backend::RenderBackend;
use super::cache::SharedThumbnailCache;
use super::clock::Clock;
use super::surface::SurfacePool;
use super::thumbnail::{self, Thumbnail};
use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::platform;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A render is attempted at most this many times before the caller is
/// rejected.
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_concurrent_renders: usize,
    pub pacing: Duration,
    pub retry_cooldown: Duration,
    pub max_surface_uses: u32,
}

impl SchedulerOptions {
    pub fn from_config(config: &RenderConfig, max_concurrent_renders: usize) -> Self {
        Self {
            max_concurrent_renders: max_concurrent_renders.max(1),
            pacing: config.pacing(),
            retry_cooldown: config.retry_cooldown(),
            max_surface_uses: config.max_surface_uses,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default(), 3)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub active: usize,
    pub peak_active: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub cache_evicted: usize,
    pub surfaces_released: usize,
}

/// Result of [`RenderScheduler::render_or_fallback`].
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Rendered(Thumbnail),
    Fallback { thumbnail: Thumbnail, error: RenderError },
}

impl RenderOutcome {
    pub fn thumbnail(&self) -> &Thumbnail {
        match self {
            RenderOutcome::Rendered(t) => t,
            RenderOutcome::Fallback { thumbnail, .. } => thumbnail,
        }
    }

    pub fn into_thumbnail(self) -> Thumbnail {
        match self {
            RenderOutcome::Rendered(t) => t,
            RenderOutcome::Fallback { thumbnail, .. } => thumbnail,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RenderOutcome::Fallback { .. })
    }
}

type Responder = oneshot::Sender<Result<Thumbnail, RenderError>>;

struct RenderTask {
    path: PathBuf,
    attempts: u32,
    responder: Responder,
}

struct Shared<B: RenderBackend> {
    pool: Arc<SurfacePool<B>>,
    cache: SharedThumbnailCache,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    queue: Mutex<VecDeque<RenderTask>>,
    wakeup: Notify,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    succeeded: AtomicUsize,
    retried: AtomicUsize,
    rejected: AtomicUsize,
}

/// FIFO render queue with bounded concurrency.
///
/// Each submitted path is dispatched in arrival order once one of
/// `max_concurrent_renders` slots is free. After a render finishes its slot
/// stays held for the pacing delay. A failed render is re-queued at the tail
/// after the retry cooldown and, if it fails again, the caller gets the
/// error. Successful renders land in the shared [`ThumbnailCache`].
///
/// Must be started from within a tokio runtime.
///
/// [`ThumbnailCache`]: super::cache::ThumbnailCache
pub struct RenderScheduler<B: RenderBackend> {
    shared: Arc<Shared<B>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<B: RenderBackend> RenderScheduler<B> {
    pub fn start(
        backend: B,
        cache: SharedThumbnailCache,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        let permits = options.max_concurrent_renders.max(1);
        let shared = Arc::new(Shared {
            pool: Arc::new(SurfacePool::new(Arc::new(backend), options.max_surface_uses)),
            cache,
            clock,
            options,
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            slots: Arc::new(Semaphore::new(permits)),
            closed: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            retried: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        });
        info!("Render scheduler started with {} slots", permits);
        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&shared)));
        Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Render `path`, serving from the cache when possible.
    pub async fn render(&self, path: impl AsRef<Path>) -> Result<Thumbnail, RenderError> {
        let path = path.as_ref();
        if let Some(hit) = self.shared.cached(path) {
            trace!("Thumbnail cache hit for {}", path.display());
            return Ok(hit);
        }

        let (responder, receiver) = oneshot::channel();
        self.shared.enqueue(RenderTask {
            path: path.to_path_buf(),
            attempts: 0,
            responder,
        });
        receiver.await.unwrap_or(Err(RenderError::Cancelled))
    }

    /// Like [`render`](Self::render) but never fails: a rejected render yields
    /// the fixed fallback thumbnail.
    pub async fn render_or_fallback(&self, path: impl AsRef<Path>) -> RenderOutcome {
        match self.render(path).await {
            Ok(thumbnail) => RenderOutcome::Rendered(thumbnail),
            Err(error) => RenderOutcome::Fallback {
                thumbnail: thumbnail::fallback(),
                error,
            },
        }
    }

    pub fn max_concurrent_renders(&self) -> usize {
        self.shared.options.max_concurrent_renders.max(1)
    }

    /// Forward an external context-loss event to the surface pool.
    pub fn notify_context_lost(&self) {
        self.shared.pool.notify_context_lost();
    }

    pub fn pool(&self) -> &SurfacePool<B> {
        &self.shared.pool
    }

    pub fn cache(&self) -> &SharedThumbnailCache {
        &self.shared.cache
    }

    pub fn stats(&self) -> SchedulerStats {
        let s = &self.shared;
        SchedulerStats {
            queued: s.lock_queue().len(),
            active: s.active.load(Ordering::SeqCst),
            peak_active: s.peak_active.load(Ordering::SeqCst),
            succeeded: s.succeeded.load(Ordering::SeqCst),
            retried: s.retried.load(Ordering::SeqCst),
            rejected: s.rejected.load(Ordering::SeqCst),
        }
    }

    /// Trim the cache and drop idle surfaces.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.shared.maintain()
    }

    /// Run [`run_maintenance`](Self::run_maintenance) every `every` until the
    /// scheduler shuts down.
    pub fn spawn_maintenance(&self, every: Duration) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                shared.maintain();
            }
        })
    }

    /// Stop dispatching. Queued renders are rejected with
    /// [`RenderError::Cancelled`]; renders already running finish normally.
    pub async fn shutdown(&self) {
        let pending = self.shared.close();
        if !pending.is_empty() {
            info!("Cancelling {} queued renders", pending.len());
        }
        for task in pending {
            let _ = task.responder.send(Err(RenderError::Cancelled));
        }

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Render dispatcher ended abnormally: {}", e);
            }
        }
        self.shared.pool.release_idle();
    }
}

impl<B: RenderBackend> Drop for RenderScheduler<B> {
    fn drop(&mut self) {
        for task in self.shared.close() {
            let _ = task.responder.send(Err(RenderError::Cancelled));
        }
    }
}

impl<B: RenderBackend> Shared<B> {
    fn cached(&self, path: &Path) -> Option<Thumbnail> {
        let key = platform::normalize_path(path);
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
    }

    fn store(&self, path: &Path, thumbnail: Thumbnail) {
        let key = platform::normalize_path(path);
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, thumbnail);
    }

    /// The closed check and the push share one queue lock so nothing lands
    /// in the queue after [`close`](Self::close) has drained it.
    fn enqueue(&self, task: RenderTask) {
        {
            let mut queue = self.lock_queue();
            if !self.closed.load(Ordering::SeqCst) {
                queue.push_back(task);
                drop(queue);
                self.wakeup.notify_one();
                return;
            }
        }
        let _ = task.responder.send(Err(RenderError::Cancelled));
    }

    async fn next_task(&self) -> Option<RenderTask> {
        loop {
            let next = self.lock_queue().pop_front();
            if next.is_some() {
                return next;
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.wakeup.notified().await;
        }
    }

    /// Mark the scheduler closed and hand back whatever was still queued.
    fn close(&self) -> Vec<RenderTask> {
        let pending: Vec<RenderTask> = {
            let mut queue = self.lock_queue();
            self.closed.store(true, Ordering::SeqCst);
            queue.drain(..).collect()
        };
        self.slots.close();
        self.wakeup.notify_one();
        pending
    }

    fn maintain(&self) -> MaintenanceReport {
        let cache_evicted = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .trim();
        let surfaces_released = self.pool.release_idle();
        MaintenanceReport {
            cache_evicted,
            surfaces_released,
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<RenderTask>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn dispatch_loop<B: RenderBackend>(shared: Arc<Shared<B>>) {
    loop {
        let permit = match Arc::clone(&shared.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let Some(task) = shared.next_task().await else {
            break;
        };
        if shared.closed.load(Ordering::SeqCst) {
            let _ = task.responder.send(Err(RenderError::Cancelled));
            break;
        }
        if task.responder.is_closed() {
            debug!("Dropping render of {}, nobody is waiting", task.path.display());
            continue;
        }

        let active = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_active.fetch_max(active, Ordering::SeqCst);
        trace!(
            "Dispatching render of {} (attempt {}, {} active)",
            task.path.display(),
            task.attempts + 1,
            active
        );
        tokio::spawn(run_task(Arc::clone(&shared), task, permit));
    }
    debug!("Render dispatcher stopped");
}

async fn run_task<B: RenderBackend>(
    shared: Arc<Shared<B>>,
    mut task: RenderTask,
    permit: OwnedSemaphorePermit,
) {
    let result = match shared.pool.acquire() {
        Ok(mut lease) => lease.render(&task.path).await,
        Err(e) => Err(e),
    };
    shared.active.fetch_sub(1, Ordering::SeqCst);
    task.attempts += 1;

    match result {
        Ok(thumbnail) => {
            shared.store(&task.path, thumbnail.clone());
            shared.succeeded.fetch_add(1, Ordering::SeqCst);
            let _ = task.responder.send(Ok(thumbnail));
        }
        Err(e) if task.attempts < MAX_ATTEMPTS => {
            warn!(
                "Render of {} failed, retrying in {:?}: {}",
                task.path.display(),
                shared.options.retry_cooldown,
                e
            );
            shared.retried.fetch_add(1, Ordering::SeqCst);
            let retry = Arc::clone(&shared);
            tokio::spawn(async move {
                retry.clock.sleep(retry.options.retry_cooldown).await;
                retry.enqueue(task);
            });
        }
        Err(e) => {
            warn!(
                "Render of {} failed after {} attempts: {}",
                task.path.display(),
                task.attempts,
                e
            );
            shared.rejected.fetch_add(1, Ordering::SeqCst);
            let _ = task.responder.send(Err(e));
        }
    }

    shared.clock.sleep(shared.options.pacing).await;
    drop(permit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cache::ThumbnailCache;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingClock {
        fn count(&self, duration: Duration) -> usize {
            self.sleeps.lock().unwrap().iter().filter(|d| **d == duration).count()
        }
    }

    #[async_trait]
    impl Clock for RecordingClock {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            tokio::task::yield_now().await;
        }
    }

    /// Paths containing "broken" always fail, "flaky" fails on the first call,
    /// "gpu-reset" reports a lost context on the first call.
    #[derive(Default)]
    struct ScriptedBackend {
        delay: Duration,
        calls: Mutex<Vec<PathBuf>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RenderBackend for ScriptedBackend {
        type Surface = ();

        fn create_surface(&self) -> Result<(), RenderError> {
            Ok(())
        }

        async fn render(&self, _surface: &mut (), path: &Path) -> Result<Thumbnail, RenderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let previous_calls = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.iter().filter(|p| p.as_path() == path).count();
                calls.push(path.to_path_buf());
                n
            };
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let name = path.to_string_lossy();
            if name.contains("broken") {
                return Err(RenderError::Backend("mesh is invalid".into()));
            }
            if name.contains("flaky") && previous_calls == 0 {
                return Err(RenderError::Backend("transient".into()));
            }
            if name.contains("gpu-reset") && previous_calls == 0 {
                return Err(RenderError::ContextLost);
            }
            Ok(Thumbnail::from_png(name.as_bytes().to_vec()))
        }
    }

    fn options(max: usize) -> SchedulerOptions {
        SchedulerOptions {
            max_concurrent_renders: max,
            pacing: Duration::from_millis(200),
            retry_cooldown: Duration::from_millis(2000),
            max_surface_uses: 100,
        }
    }

    fn start(
        backend: ScriptedBackend,
        max: usize,
    ) -> (RenderScheduler<ScriptedBackend>, Arc<RecordingClock>) {
        let clock = Arc::new(RecordingClock::default());
        let scheduler = RenderScheduler::start(
            backend,
            ThumbnailCache::shared(1000),
            clock.clone(),
            options(max),
        );
        (scheduler, clock)
    }

    fn calls_for(scheduler: &RenderScheduler<ScriptedBackend>, path: &str) -> usize {
        scheduler
            .pool()
            .backend()
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_path() == Path::new(path))
            .count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_limit() {
        let (scheduler, _clock) = start(ScriptedBackend::with_delay(Duration::from_millis(15)), 2);
        let scheduler = Arc::new(scheduler);

        let mut handles = Vec::new();
        for i in 0..8 {
            let s = Arc::clone(&scheduler);
            handles.push(tokio::spawn(async move {
                s.render(format!("/models/part{i}.stl")).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        let stats = scheduler.stats();
        assert_eq!(stats.succeeded, 8);
        assert!(stats.peak_active <= 2, "peak {}", stats.peak_active);
        assert!(scheduler.pool().backend().max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_fifo_dispatch_order() {
        let (scheduler, _clock) = start(ScriptedBackend::default(), 1);
        let (a, b, c) = tokio::join!(
            scheduler.render("/q/a.stl"),
            scheduler.render("/q/b.stl"),
            scheduler.render("/q/c.stl"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let calls = scheduler.pool().backend().calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                PathBuf::from("/q/a.stl"),
                PathBuf::from("/q/b.stl"),
                PathBuf::from("/q/c.stl")
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_model_retried_once_then_falls_back() {
        let (scheduler, clock) = start(ScriptedBackend::default(), 3);

        let outcome = scheduler.render_or_fallback("/m/broken.stl").await;
        assert!(outcome.is_fallback());
        assert!(outcome.thumbnail().is_fallback());
        assert_eq!(calls_for(&scheduler, "/m/broken.stl"), 2);
        assert_eq!(clock.count(Duration::from_millis(2000)), 1);

        let stats = scheduler.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.rejected, 1);
        assert!(scheduler.cache().lock().unwrap().get("/m/broken.stl").is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_succeeds_on_retry() {
        let (scheduler, _clock) = start(ScriptedBackend::default(), 3);
        let thumb = scheduler.render("/m/flaky.3mf").await.unwrap();
        assert!(!thumb.is_fallback());
        assert_eq!(calls_for(&scheduler, "/m/flaky.3mf"), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backend() {
        let (scheduler, _clock) = start(ScriptedBackend::default(), 3);
        let first = scheduler.render("/m/a.stl").await.unwrap();
        let second = scheduler.render("/m/a.stl").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls_for(&scheduler, "/m/a.stl"), 1);
    }

    #[tokio::test]
    async fn test_pacing_delay_after_each_render() {
        let (scheduler, clock) = start(ScriptedBackend::default(), 1);
        scheduler.render("/m/a.stl").await.unwrap();
        scheduler.render("/m/b.stl").await.unwrap();
        // The pacing sleep for the second render may still be in progress.
        tokio::task::yield_now().await;
        assert!(clock.count(Duration::from_millis(200)) >= 1);
    }

    #[tokio::test]
    async fn test_context_loss_rebuilds_surface() {
        let (scheduler, _clock) = start(ScriptedBackend::default(), 1);
        let thumb = scheduler.render("/m/gpu-reset.stl").await.unwrap();
        assert!(!thumb.is_fallback());
        assert_eq!(scheduler.pool().created_count(), 2);
        assert!(scheduler.pool().disposed_count() >= 1);
    }

    #[tokio::test]
    async fn test_external_context_loss_notification() {
        let (scheduler, _clock) = start(ScriptedBackend::default(), 1);
        scheduler.render("/m/a.stl").await.unwrap();
        // Let the pacing sleep finish so the lease is back in the pool.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        scheduler.notify_context_lost();
        assert_eq!(scheduler.pool().idle_count(), 0);

        scheduler.render("/m/b.stl").await.unwrap();
        assert_eq!(scheduler.pool().created_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let (scheduler, _clock) = start(ScriptedBackend::default(), 2);
        scheduler.shutdown().await;
        assert_eq!(
            scheduler.render("/m/late.stl").await.unwrap_err(),
            RenderError::Cancelled
        );
        assert!(scheduler.render_or_fallback("/m/late.stl").await.is_fallback());
    }

    /// Holds every retry cooldown until the test opens the gate.
    #[derive(Default)]
    struct GatedClock {
        gate: Notify,
        waiting: AtomicUsize,
    }

    #[async_trait]
    impl Clock for GatedClock {
        async fn sleep(&self, duration: Duration) {
            if duration == Duration::from_millis(2000) {
                self.waiting.fetch_add(1, Ordering::SeqCst);
                self.gate.notified().await;
            }
        }
    }

    #[tokio::test]
    async fn test_retry_after_shutdown_is_cancelled_not_lost() {
        let clock = Arc::new(GatedClock::default());
        let scheduler = Arc::new(RenderScheduler::start(
            ScriptedBackend::default(),
            ThumbnailCache::shared(10),
            clock.clone(),
            options(1),
        ));

        let s = Arc::clone(&scheduler);
        let pending = tokio::spawn(async move { s.render("/m/broken.stl").await });
        while clock.waiting.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.shutdown().await;
        clock.gate.notify_waiters();

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("retry left waiting after shutdown")
            .unwrap();
        assert_eq!(result.unwrap_err(), RenderError::Cancelled);
        assert_eq!(calls_for(&scheduler, "/m/broken.stl"), 1);
        assert_eq!(scheduler.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_abandoned_request_is_not_rendered() {
        let (scheduler, _clock) = start(ScriptedBackend::with_delay(Duration::from_millis(30)), 1);
        let scheduler = Arc::new(scheduler);

        let s = Arc::clone(&scheduler);
        let first = tokio::spawn(async move { s.render("/m/first.stl").await });
        while scheduler.stats().active == 0 {
            tokio::task::yield_now().await;
        }
        let s = Arc::clone(&scheduler);
        let abandoned = tokio::spawn(async move { s.render("/m/abandoned.stl").await });
        while scheduler.stats().queued == 0 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;

        assert!(first.await.unwrap().is_ok());
        scheduler.render("/m/last.stl").await.unwrap();
        assert_eq!(calls_for(&scheduler, "/m/abandoned.stl"), 0);
    }

    #[tokio::test]
    async fn test_maintenance_releases_idle_surfaces() {
        let (scheduler, _clock) = start(ScriptedBackend::default(), 1);
        scheduler.render("/m/a.stl").await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let report = scheduler.run_maintenance();
        assert_eq!(report.surfaces_released, 1);
        assert_eq!(report.cache_evicted, 0);
        assert_eq!(scheduler.pool().idle_count(), 0);
    }
}
