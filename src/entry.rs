//! Cache keys and cached frames.
//!
//! A [`CacheKey`] names one logical preview frame: a source file, a frame
//! index and the size the frame was scaled to. A [`CachedFrame`] is the
//! immutable, cheaply clonable handle handed out for that key.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;

/// Identifies one cacheable frame.
///
/// File identity is compared case-insensitively, so `Clip.MP4` and
/// `clip.mp4` share a slot. The original spelling of the path is kept for
/// invoking the decoder.
#[derive(Clone)]
pub struct CacheKey {
    path: Arc<Path>,
    identity: Arc<str>,
    frame_index: u64,
    width: u32,
    height: u32,
}

impl CacheKey {
    /// Create a key for `frame_index` of `path` scaled to fit `width`×`height`.
    pub fn new(path: impl AsRef<Path>, frame_index: u64, width: u32, height: u32) -> Self {
        let path = path.as_ref();
        Self {
            path: Arc::from(path),
            identity: Arc::from(file_identity(path)),
            frame_index,
            width,
            height,
        }
    }

    /// Source file path as originally given.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame index within the source.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Target width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Target height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns `true` if this key refers to `path` (case-insensitive).
    pub fn is_for_file(&self, path: &Path) -> bool {
        *self.identity == file_identity(path)
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.frame_index == other.frame_index
            && self.width == other.width
            && self.height == other.height
            && self.identity == other.identity
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.frame_index.hash(state);
        self.width.hash(state);
        self.height.hash(state);
    }
}

impl Debug for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CacheKey")
            .field("path", &self.path)
            .field("frame_index", &self.frame_index)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

fn file_identity(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// A decoded preview frame held by the cache.
///
/// Cloning is cheap: the pixel data lives behind an [`Arc`] and is never
/// mutated, so handles can be sent to any thread.
#[derive(Clone)]
pub struct CachedFrame {
    image: Arc<DynamicImage>,
    path: Arc<Path>,
    frame_index: u64,
    created_at: Instant,
}

impl CachedFrame {
    /// Wrap a decoded image taken from `frame_index` of `path`.
    pub fn new(image: DynamicImage, path: impl AsRef<Path>, frame_index: u64) -> Self {
        Self {
            image: Arc::new(image),
            path: Arc::from(path.as_ref()),
            frame_index,
            created_at: Instant::now(),
        }
    }

    /// The decoded image.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Shared handle to the decoded image.
    pub fn image_arc(&self) -> Arc<DynamicImage> {
        Arc::clone(&self.image)
    }

    /// File the frame was extracted from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Owned copy of the source path.
    pub fn to_path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }

    /// Frame index within the source.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// When the frame was decoded.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Width of the decoded image.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height of the decoded image.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns `true` if both handles share the same pixel allocation.
    pub fn ptr_eq(&self, other: &CachedFrame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl Debug for CachedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CachedFrame")
            .field("path", &self.path)
            .field("frame_index", &self.frame_index)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
