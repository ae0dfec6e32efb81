use super::backend::RenderBackend;
use super::thumbnail::{self, Thumbnail};
use crate::error::RenderError;
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_MAX_THUMBNAIL_SIZE: u32 = 300;

const PLATE_PREVIEW: &str = "metadata/plate_1.png";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Scratch buffer reused across renders.
#[derive(Debug, Default)]
pub struct PreviewSurface {
    buffer: Vec<u8>,
}

/// Backend that pulls the preview image slicers embed inside `.3mf`
/// archives. Plain `.stl` files carry no preview and are reported as
/// unsupported, which sends them down the fallback path.
#[derive(Debug, Clone)]
pub struct EmbeddedPreviewBackend {
    max_size: u32,
}

impl EmbeddedPreviewBackend {
    pub fn new(max_size: u32) -> Self {
        Self {
            max_size: max_size.max(1),
        }
    }
}

impl Default for EmbeddedPreviewBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_THUMBNAIL_SIZE)
    }
}

#[async_trait]
impl RenderBackend for EmbeddedPreviewBackend {
    type Surface = PreviewSurface;

    fn create_surface(&self) -> Result<PreviewSurface, RenderError> {
        Ok(PreviewSurface::default())
    }

    async fn render(
        &self,
        surface: &mut PreviewSurface,
        path: &Path,
    ) -> Result<Thumbnail, RenderError> {
        let is_3mf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("3mf"));
        if !is_3mf {
            return Err(RenderError::Unsupported(path.display().to_string()));
        }

        let owned: PathBuf = path.to_path_buf();
        let buffer = std::mem::take(&mut surface.buffer);
        let max_size = self.max_size;
        let (result, buffer) = tokio::task::spawn_blocking(move || {
            let mut buffer = buffer;
            let result = render_preview(&owned, &mut buffer, max_size);
            (result, buffer)
        })
        .await
        .map_err(|e| RenderError::Backend(format!("preview task failed: {e}")))?;
        surface.buffer = buffer;
        result
    }
}

fn render_preview(path: &Path, buffer: &mut Vec<u8>, max_size: u32) -> Result<Thumbnail, RenderError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| RenderError::Backend(format!("not a readable 3MF archive: {e}")))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let entry = pick_preview_entry(&names)
        .ok_or_else(|| RenderError::Unsupported(format!("{} has no embedded preview", path.display())))?;
    debug!("Using embedded preview {} from {}", entry, path.display());

    buffer.clear();
    archive
        .by_name(&entry)
        .map_err(|e| RenderError::Backend(e.to_string()))?
        .read_to_end(buffer)?;

    let image = image::load_from_memory(buffer)
        .map_err(|e| RenderError::Backend(format!("preview image is unreadable: {e}")))?;
    let png = thumbnail::encode_png(&thumbnail::fit_within(image, max_size))?;
    Ok(Thumbnail::from_png(png))
}

/// Preference order: the first plate preview, then any image under
/// `Metadata/`, then any image in the archive.
fn pick_preview_entry(names: &[String]) -> Option<String> {
    let normalized = |name: &str| name.trim_start_matches('/').to_ascii_lowercase();
    let is_image = |name: &str| {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
    };

    if let Some(plate) = names.iter().find(|n| normalized(n) == PLATE_PREVIEW) {
        return Some(plate.clone());
    }
    if let Some(meta) = names
        .iter()
        .find(|n| normalized(n).starts_with("metadata/") && is_image(n))
    {
        return Some(meta.clone());
    }
    names.iter().find(|n| is_image(n)).cloned()
}
