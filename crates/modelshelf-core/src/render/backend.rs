use super::thumbnail::Thumbnail;
use crate::error::RenderError;
use async_trait::async_trait;
use std::path::Path;

/// The opaque "turn a model file into an image" capability.
///
/// A backend owns some native drawing surface (a GPU context, an offscreen
/// canvas, a scratch buffer). The scheduler creates surfaces through
/// [`create_surface`](RenderBackend::create_surface), reuses them across
/// renders, and hands them back to
/// [`dispose_surface`](RenderBackend::dispose_surface) when they are recycled
/// or lost. Returning [`RenderError::ContextLost`] from `render` marks the
/// surface as unusable.
#[async_trait]
pub trait RenderBackend: Send + Sync + 'static {
    type Surface: Send + 'static;

    fn create_surface(&self) -> Result<Self::Surface, RenderError>;

    async fn render(&self, surface: &mut Self::Surface, path: &Path)
        -> Result<Thumbnail, RenderError>;

    fn dispose_surface(&self, surface: Self::Surface) {
        drop(surface);
    }
}
