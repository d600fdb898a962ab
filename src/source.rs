//! Where frames come from.
//!
//! The [`ExtractionCoordinator`](crate::ExtractionCoordinator) does not talk
//! to the decoder directly; it asks a [`FrameSource`]. The production source,
//! [`DecoderFrameSource`], chains [`ProcessInvoker`] and [`FrameLoader`].
//! Tests plug in their own sources to count or delay extractions.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::DynamicImage;

use crate::cancellation::CancellationToken;
use crate::configuration::DecoderOptions;
use crate::entry::CacheKey;
use crate::error::FrameCacheError;
use crate::loader::FrameLoader;
use crate::process::ProcessInvoker;
use crate::utilities::{
    checked_frame_index_to_timestamp, frame_index_to_timestamp, is_valid_frame_rate,
};

/// A single frame to extract.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    /// Source media file.
    pub path: PathBuf,
    /// Zero-based frame index.
    pub frame_index: u64,
    /// Frame rate used to turn the index into a timestamp.
    pub frame_rate: f64,
    /// Bounding box width; the frame is scaled to fit, keeping its aspect ratio.
    pub width: u32,
    /// Bounding box height.
    pub height: u32,
}

impl FrameRequest {
    /// Describe frame `frame_index` of `path` scaled into `width`×`height`.
    pub fn new(
        path: impl AsRef<Path>,
        frame_index: u64,
        frame_rate: f64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            frame_index,
            frame_rate,
            width,
            height,
        }
    }

    /// Presentation time of the frame (`frame_index / frame_rate`).
    pub fn timestamp(&self) -> Duration {
        frame_index_to_timestamp(self.frame_index, self.frame_rate)
    }

    /// Cache key for this request.
    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.path, self.frame_index, self.width, self.height)
    }

    /// Reject parameters no decoder could satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`FrameCacheError::InvalidRequest`] for a non-finite or
    /// non-positive frame rate, a frame whose timestamp does not fit in a
    /// [`Duration`], or a zero dimension.
    pub fn validate(&self) -> Result<(), FrameCacheError> {
        if !is_valid_frame_rate(self.frame_rate) {
            return Err(FrameCacheError::InvalidRequest(format!(
                "frame rate must be positive and finite, got {}",
                self.frame_rate
            )));
        }
        if checked_frame_index_to_timestamp(self.frame_index, self.frame_rate).is_none() {
            return Err(FrameCacheError::InvalidRequest(format!(
                "frame {} at {} fps is beyond any representable timestamp",
                self.frame_index, self.frame_rate
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(FrameCacheError::InvalidRequest(format!(
                "target size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Produces decoded frames on demand.
///
/// Implementations must be cheap to share: the coordinator keeps one behind
/// an `Arc` and calls it from many tasks at once.
pub trait FrameSource: Send + Sync + 'static {
    /// Decode the frame described by `request`.
    ///
    /// Implementations should stop early and return
    /// [`FrameCacheError::Cancelled`] once `cancel` fires.
    fn extract(
        &self,
        request: &FrameRequest,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<DynamicImage, FrameCacheError>> + Send;
}

/// Frame source backed by the external decoder process.
#[derive(Debug, Clone, Default)]
pub struct DecoderFrameSource {
    invoker: ProcessInvoker,
    loader: FrameLoader,
}

impl DecoderFrameSource {
    /// Create a source that runs the decoder with `options`.
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            invoker: ProcessInvoker::new(options),
            loader: FrameLoader,
        }
    }

    /// The underlying process invoker.
    pub fn invoker(&self) -> &ProcessInvoker {
        &self.invoker
    }
}

impl FrameSource for DecoderFrameSource {
    async fn extract(
        &self,
        request: &FrameRequest,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage, FrameCacheError> {
        let frame_file = self.invoker.invoke(request, cancel).await?;
        let image = self.loader.load(frame_file.path()).await?;
        drop(frame_file);
        Ok(image)
    }
}
