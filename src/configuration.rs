//! Cache and extraction configuration.
//!
//! [`CacheOptions`] is a builder that carries the tuning knobs of an
//! [`ExtractionCoordinator`](crate::ExtractionCoordinator): cache capacity,
//! the size of the extraction gate, the per-extraction timeout, the default
//! preview resolution and how the decoder process is invoked.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use framecache::CacheOptions;
//!
//! let options = CacheOptions::new()
//!     .with_capacity(64)
//!     .with_max_concurrent_extractions(2)
//!     .with_extraction_timeout(Duration::from_secs(3))
//!     .with_preview_resolution(480, 270);
//! assert_eq!(options.capacity(), 64);
//! ```

use std::ffi::OsString;
use std::time::Duration;

use crate::error::FrameCacheError;

/// Default number of cached frames.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default number of decoder processes allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_EXTRACTIONS: usize = 4;

/// Default time a single decoder process may run before it is killed.
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default preview width in pixels.
pub const DEFAULT_PREVIEW_WIDTH: u32 = 320;

/// Default preview height in pixels.
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 180;

/// Environment variable that overrides the decoder executable.
pub const DECODER_ENV_VAR: &str = "FRAMECACHE_FFMPEG";

const DEFAULT_DECODER_PROGRAM: &str = "ffmpeg";
const DEFAULT_OUTPUT_QUALITY: u8 = 2;
const MAX_OUTPUT_QUALITY: u8 = 31;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// How the external decoder is invoked.
///
/// Shared by [`ProcessInvoker`](crate::ProcessInvoker) and the
/// coordinator's default frame source.
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Executable to run. Defaults to `ffmpeg`, or the value of
    /// [`DECODER_ENV_VAR`] when set.
    pub program: OsString,
    /// Hard limit on a single decoder run.
    pub timeout: Duration,
    /// Value passed to `-q:v` (2 is best, 31 is worst).
    pub output_quality: u8,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            program: std::env::var_os(DECODER_ENV_VAR)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| OsString::from(DEFAULT_DECODER_PROGRAM)),
            timeout: DEFAULT_EXTRACTION_TIMEOUT,
            output_quality: DEFAULT_OUTPUT_QUALITY,
        }
    }
}

/// Configuration for an [`ExtractionCoordinator`](crate::ExtractionCoordinator).
///
/// A default-constructed value caches 100 frames, runs at most 4 decoders
/// at once with a 5 second timeout each, and renders previews at 320×180.
#[derive(Debug, Clone)]
#[must_use]
pub struct CacheOptions {
    pub(crate) capacity: usize,
    pub(crate) max_concurrent_extractions: usize,
    pub(crate) preview_width: u32,
    pub(crate) preview_height: u32,
    pub(crate) event_channel_capacity: usize,
    pub(crate) decoder: DecoderOptions,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_concurrent_extractions: DEFAULT_MAX_CONCURRENT_EXTRACTIONS,
            preview_width: DEFAULT_PREVIEW_WIDTH,
            preview_height: DEFAULT_PREVIEW_HEIGHT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            decoder: DecoderOptions::default(),
        }
    }

    /// Set the maximum number of cached frames.
    ///
    /// Zero is rejected by [`validate`](CacheOptions::validate).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set how many decoder processes may run at the same time.
    ///
    /// Zero is rejected by [`validate`](CacheOptions::validate).
    pub fn with_max_concurrent_extractions(mut self, limit: usize) -> Self {
        self.max_concurrent_extractions = limit;
        self
    }

    /// Set the time after which a decoder process is killed.
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.decoder.timeout = timeout;
        self
    }

    /// Set the resolution used by
    /// [`get_preview_frame`](crate::ExtractionCoordinator::get_preview_frame).
    ///
    /// Each dimension is clamped to a minimum of 1.
    pub fn with_preview_resolution(mut self, width: u32, height: u32) -> Self {
        self.preview_width = width.max(1);
        self.preview_height = height.max(1);
        self
    }

    /// Set the decoder executable.
    pub fn with_decoder_program(mut self, program: impl Into<OsString>) -> Self {
        self.decoder.program = program.into();
        self
    }

    /// Set the JPEG quality passed to the decoder. Clamped to `2..=31`.
    pub fn with_output_quality(mut self, quality: u8) -> Self {
        self.decoder.output_quality = quality.clamp(DEFAULT_OUTPUT_QUALITY, MAX_OUTPUT_QUALITY);
        self
    }

    /// Set how many undelivered events each
    /// [`CacheEventStream`](crate::CacheEventStream) buffers before it
    /// starts dropping. Clamped to a minimum of 1.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Maximum number of cached frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Maximum number of concurrently running decoders.
    pub fn max_concurrent_extractions(&self) -> usize {
        self.max_concurrent_extractions
    }

    /// Per-extraction timeout.
    pub fn extraction_timeout(&self) -> Duration {
        self.decoder.timeout
    }

    /// Default preview resolution as `(width, height)`.
    pub fn preview_resolution(&self) -> (u32, u32) {
        (self.preview_width, self.preview_height)
    }

    /// Decoder invocation settings.
    pub fn decoder(&self) -> &DecoderOptions {
        &self.decoder
    }

    /// Check the configuration for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`FrameCacheError::InvalidCapacity`] for a zero capacity and
    /// [`FrameCacheError::InvalidConcurrency`] for a zero extraction limit.
    pub fn validate(&self) -> Result<(), FrameCacheError> {
        if self.capacity == 0 {
            return Err(FrameCacheError::InvalidCapacity);
        }
        if self.max_concurrent_extractions == 0 {
            return Err(FrameCacheError::InvalidConcurrency);
        }
        Ok(())
    }
}
