//! Decoding frame files into memory.
//!
//! [`FrameLoader`] reads an image file completely and decodes it on a
//! blocking thread, so the file can be removed as soon as loading returns.
//! A failed decode never yields a partial image.

use std::path::Path;

use image::DynamicImage;

use crate::error::FrameCacheError;

/// Loads finished frame images into memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameLoader;

impl FrameLoader {
    /// Read and fully decode the image at `path`.
    ///
    /// The bytes are read asynchronously and decoded with
    /// `tokio::task::spawn_blocking` to keep pixel work off the async
    /// workers.
    ///
    /// # Errors
    ///
    /// Returns [`FrameCacheError::Io`] if the file cannot be read,
    /// [`FrameCacheError::Image`] if it is not a decodable image, and
    /// [`FrameCacheError::ExtractionAborted`] if the decode thread panicked.
    pub async fn load(&self, path: &Path) -> Result<DynamicImage, FrameCacheError> {
        let bytes = tokio::fs::read(path).await?;
        tokio::task::spawn_blocking(move || decode(&bytes))
            .await
            .map_err(|_| FrameCacheError::ExtractionAborted)?
    }

    /// Synchronous variant of [`load`](FrameLoader::load).
    pub fn load_blocking(&self, path: &Path) -> Result<DynamicImage, FrameCacheError> {
        let bytes = std::fs::read(path)?;
        decode(&bytes)
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, FrameCacheError> {
    Ok(image::load_from_memory(bytes)?)
}
