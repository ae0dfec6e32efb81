//! Thumbnail production: a paced, bounded-concurrency render queue in front
//! of a pluggable [`RenderBackend`], with a capped in-memory cache.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod embedded;
pub mod scheduler;
pub mod surface;
pub mod thumbnail;

pub use backend::RenderBackend;
pub use cache::{SharedThumbnailCache, ThumbnailCache};
pub use clock::{Clock, TokioClock};
pub use embedded::EmbeddedPreviewBackend;
pub use scheduler::{RenderOutcome, RenderScheduler, SchedulerOptions, SchedulerStats};
pub use surface::{SurfaceLease, SurfacePool};
pub use thumbnail::{fallback as fallback_thumbnail, Thumbnail};
