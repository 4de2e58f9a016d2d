use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::error::AssetError;

/// A loaded texture: image metadata, CPU pixels until upload, then a GPU id.
///
/// The pixel buffer and the GPU id are never both live: [`upload_with`]
/// hands the pixels to the render thread's upload step and frees them once a
/// GPU id comes back. The record keeps its own lock for this so it can be
/// shared read-only through the asset store like every other record.
///
/// [`upload_with`]: TextureRecord::upload_with
#[derive(Debug)]
pub struct TextureRecord {
    path: PathBuf,
    name: String,
    width: u32,
    height: u32,
    components: u32,
    gpu_id: AtomicU32,
    pixels: Mutex<Option<Vec<u8>>>,
}

impl TextureRecord {
    /// Wrap RGBA8 pixel data.
    pub fn from_rgba8(path: impl Into<PathBuf>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            width,
            height,
            components: 4,
            gpu_id: AtomicU32::new(0),
            pixels: Mutex::new(Some(pixels)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name (the file name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Channels per pixel.
    pub fn components(&self) -> u32 {
        self.components
    }

    /// GPU texture id, 0 until uploaded.
    pub fn gpu_id(&self) -> u32 {
        self.gpu_id.load(Ordering::Acquire)
    }

    pub fn is_uploaded(&self) -> bool {
        self.gpu_id() != 0
    }

    /// Whether CPU pixel data is still held.
    pub fn has_pixels(&self) -> bool {
        self.pixels.lock().is_some()
    }

    /// Run `f` on the CPU pixels, if they have not been uploaded yet.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.pixels.lock().as_deref().map(f)
    }

    /// Upload through `upload` and drop the CPU pixels.
    ///
    /// Call on the thread that owns the graphics context. `upload` returns the
    /// new GPU id, or `None`/`Some(0)` on failure, in which case the pixels are
    /// kept for a later attempt. Returns the GPU id; uploading twice returns
    /// the existing id without calling `upload`.
    pub fn upload_with<F>(&self, upload: F) -> Option<u32>
    where
        F: FnOnce(&TextureRecord, &[u8]) -> Option<u32>,
    {
        let mut pixels = self.pixels.lock();
        let existing = self.gpu_id();
        if existing != 0 {
            return Some(existing);
        }

        let data = pixels.take()?;
        match upload(self, &data) {
            Some(id) if id != 0 => {
                self.gpu_id.store(id, Ordering::Release);
                Some(id)
            }
            _ => {
                *pixels = Some(data);
                None
            }
        }
    }
}

/// Load an image file as an RGBA8 texture record.
///
/// With `flip_vertically` the rows are reversed so the first row is the
/// bottom of the image, matching GL texture coordinates.
pub fn load_texture(path: &Path, flip_vertically: bool) -> Result<TextureRecord, AssetError> {
    if !path.exists() {
        return Err(AssetError::NotFound(path.to_path_buf()));
    }

    let img = image::open(path)
        .map_err(|e| AssetError::ImageLoadFailed(path.to_path_buf(), e.to_string()))?;
    let img = if flip_vertically { img.flipv() } else { img };

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    Ok(TextureRecord::from_rgba8(path, width, height, rgba.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> TextureRecord {
        TextureRecord::from_rgba8("/tex/checker.png", 2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255])
    }

    #[test]
    fn metadata() {
        let tex = checker();
        assert_eq!(tex.name(), "checker.png");
        assert_eq!((tex.width(), tex.height(), tex.components()), (2, 1, 4));
        assert_eq!(tex.gpu_id(), 0);
        assert_eq!(tex.with_pixels(|p| p.len()), Some(8));
    }

    #[test]
    fn upload_frees_pixels() {
        let tex = checker();
        let id = tex.upload_with(|record, pixels| {
            assert_eq!(pixels.len() as u32, record.width() * record.height() * 4);
            Some(7)
        });
        assert_eq!(id, Some(7));
        assert!(tex.is_uploaded());
        assert!(!tex.has_pixels());

        // Second upload is a no-op.
        assert_eq!(tex.upload_with(|_, _| panic!("uploaded twice")), Some(7));
    }

    #[test]
    fn failed_upload_keeps_pixels() {
        let tex = checker();
        assert_eq!(tex.upload_with(|_, _| None), None);
        assert_eq!(tex.upload_with(|_, _| Some(0)), None);
        assert!(tex.has_pixels());
        assert!(!tex.is_uploaded());
    }

    #[test]
    fn load_png_flipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripe.png");
        let mut img = image::RgbaImage::new(1, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 255, 0, 255]));
        img.save(&path).unwrap();

        let tex = load_texture(&path, true).unwrap();
        assert_eq!((tex.width(), tex.height()), (1, 2));
        // Bottom row (green) comes first after flipping.
        assert_eq!(tex.with_pixels(|p| p[..4].to_vec()), Some(vec![0, 255, 0, 255]));

        let tex = load_texture(&path, false).unwrap();
        assert_eq!(tex.with_pixels(|p| p[..4].to_vec()), Some(vec![255, 0, 0, 255]));
    }

    #[test]
    fn missing_texture_returns_not_found() {
        let err = load_texture(Path::new("/nonexistent/tex.png"), true).unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }
}
