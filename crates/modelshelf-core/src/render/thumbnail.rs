use crate::error::RenderError;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use tracing::error;

const FALLBACK_SIZE: u32 = 64;

lazy_static::lazy_static! {
    static ref FALLBACK: Thumbnail = Thumbnail::from_png(placeholder_png(FALLBACK_SIZE));
}

/// PNG-encoded thumbnail. Cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    png: Arc<[u8]>,
}

impl Thumbnail {
    pub fn from_png(bytes: Vec<u8>) -> Self {
        Self { png: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn len(&self) -> usize {
        self.png.len()
    }

    pub fn is_empty(&self) -> bool {
        self.png.is_empty()
    }

    pub fn is_fallback(&self) -> bool {
        Arc::ptr_eq(&self.png, &FALLBACK.png) || self.png == FALLBACK.png
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("bytes", &self.png.len())
            .finish()
    }
}

/// The fixed placeholder used when a model cannot be rendered.
pub fn fallback() -> Thumbnail {
    FALLBACK.clone()
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, RenderError> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| RenderError::Backend(format!("PNG encode failed: {e}")))?;
    Ok(out)
}

/// Shrink `image` to fit a `max_size` square, keeping the aspect ratio.
/// Images already small enough are returned unchanged.
pub fn fit_within(image: DynamicImage, max_size: u32) -> DynamicImage {
    if image.width() <= max_size && image.height() <= max_size {
        image
    } else {
        image.thumbnail(max_size, max_size)
    }
}

fn placeholder_png(size: u32) -> Vec<u8> {
    let border = (size / 16).max(1);
    let image = RgbaImage::from_fn(size, size, |x, y| {
        let edge = x < border || y < border || x >= size - border || y >= size - border;
        if edge {
            Rgba([120, 120, 120, 255])
        } else if (x / 8 + y / 8) % 2 == 0 {
            Rgba([215, 215, 215, 255])
        } else {
            Rgba([190, 190, 190, 255])
        }
    });
    match encode_png(&DynamicImage::ImageRgba8(image)) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Could not build fallback thumbnail: {}", e);
            Vec::new()
        }
    }
}
