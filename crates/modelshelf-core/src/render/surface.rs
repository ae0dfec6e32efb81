use super::backend::RenderBackend;
use super::thumbnail::Thumbnail;
use crate::error::RenderError;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

struct PooledSurface<S> {
    surface: S,
    uses: u32,
    generation: u64,
}

struct PoolState<S> {
    idle: Vec<PooledSurface<S>>,
    generation: u64,
}

/// Reusable rendering surfaces with a per-surface use ceiling.
///
/// A surface is torn down once it has served `max_uses` renders, when the
/// backend reports it lost, or when [`notify_context_lost`] invalidates every
/// surface created before the call.
///
/// [`notify_context_lost`]: SurfacePool::notify_context_lost
pub struct SurfacePool<B: RenderBackend> {
    backend: Arc<B>,
    max_uses: u32,
    state: Mutex<PoolState<B::Surface>>,
    created: AtomicUsize,
    disposed: AtomicUsize,
}

impl<B: RenderBackend> SurfacePool<B> {
    pub fn new(backend: Arc<B>, max_uses: u32) -> Self {
        Self {
            backend,
            max_uses: max_uses.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                generation: 0,
            }),
            created: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Take an idle surface or build a fresh one.
    pub fn acquire(self: &Arc<Self>) -> Result<SurfaceLease<B>, RenderError> {
        let (reused, generation) = {
            let mut state = self.lock_state();
            (state.idle.pop(), state.generation)
        };

        let pooled = match reused {
            Some(pooled) => pooled,
            None => {
                let surface = self.backend.create_surface()?;
                let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Created render surface #{}", n);
                PooledSurface {
                    surface,
                    uses: 0,
                    generation,
                }
            }
        };

        Ok(SurfaceLease {
            pool: Arc::clone(self),
            pooled: Some(pooled),
            lost: false,
        })
    }

    /// Invalidate every existing surface. Idle ones are disposed now, leased
    /// ones when their lease ends.
    pub fn notify_context_lost(&self) {
        let drained = {
            let mut state = self.lock_state();
            state.generation += 1;
            std::mem::take(&mut state.idle)
        };
        info!(
            "Render context lost, discarding {} idle surfaces",
            drained.len()
        );
        for pooled in drained {
            self.dispose(pooled.surface);
        }
    }

    /// Dispose all idle surfaces. Returns how many were released.
    pub fn release_idle(&self) -> usize {
        let drained = std::mem::take(&mut self.lock_state().idle);
        let count = drained.len();
        for pooled in drained {
            self.dispose(pooled.surface);
        }
        if count > 0 {
            debug!("Released {} idle render surfaces", count);
        }
        count
    }

    pub fn idle_count(&self) -> usize {
        self.lock_state().idle.len()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn disposed_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    fn release(&self, mut pooled: PooledSurface<B::Surface>, lost: bool) {
        pooled.uses += 1;
        let mut state = self.lock_state();
        let stale = pooled.generation != state.generation;
        if lost || stale || pooled.uses >= self.max_uses {
            drop(state);
            debug!(
                "Recycling render surface after {} uses (lost: {}, stale: {})",
                pooled.uses, lost, stale
            );
            self.dispose(pooled.surface);
        } else {
            state.idle.push(pooled);
        }
    }

    fn dispose(&self, surface: B::Surface) {
        self.backend.dispose_surface(surface);
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<B::Surface>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive use of one surface. Dropping the lease returns it to the pool.
pub struct SurfaceLease<B: RenderBackend> {
    pool: Arc<SurfacePool<B>>,
    pooled: Option<PooledSurface<B::Surface>>,
    lost: bool,
}

impl<B: RenderBackend> SurfaceLease<B> {
    pub async fn render(&mut self, path: &Path) -> Result<Thumbnail, RenderError> {
        let Some(pooled) = self.pooled.as_mut() else {
            return Err(RenderError::SurfaceUnavailable(
                "lease already released".to_string(),
            ));
        };
        let result = self.pool.backend.render(&mut pooled.surface, path).await;
        if matches!(result, Err(RenderError::ContextLost)) {
            self.lost = true;
        }
        result
    }
}

impl<B: RenderBackend> Drop for SurfaceLease<B> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.pool.release(pooled, self.lost);
        }
    }
}
