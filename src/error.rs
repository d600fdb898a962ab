//! Error types for the `framecache` crate.
//!
//! This module defines [`FrameCacheError`], the unified error type used by
//! every fallible operation in the crate. The decode path (process launch,
//! timeout, image decoding) produces the richer variants; the
//! [`ExtractionCoordinator`](crate::ExtractionCoordinator) folds those into a
//! missing frame and only lets cancellation and misuse cross its boundary.

use std::{io::Error as IoError, path::PathBuf, time::Duration};

use image::ImageError;
use thiserror::Error;

/// The unified error type for all `framecache` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameCacheError {
    /// The source media file does not exist or is not a regular file.
    #[error("Source file not found: {path}")]
    SourceNotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// The request parameters are unusable (zero size, non-positive frame
    /// rate and similar caller mistakes).
    #[error("Invalid frame request: {0}")]
    InvalidRequest(String),

    /// A cache was configured with a capacity of zero.
    #[error("Cache capacity must be greater than zero")]
    InvalidCapacity,

    /// The extraction gate was configured with zero slots.
    #[error("Concurrent extraction limit must be greater than zero")]
    InvalidConcurrency,

    /// The decoder executable could not be started.
    #[error("Failed to launch decoder {program}: {source}")]
    ProcessLaunch {
        /// Program that was spawned.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: IoError,
    },

    /// The decoder exited unsuccessfully.
    #[error("Decoder exited with status {}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ProcessExit {
        /// Exit code, or `None` when the process was killed by a signal.
        code: Option<i32>,
    },

    /// The decoder did not finish within the configured timeout.
    #[error("Decoder timed out after {0:?}")]
    Timeout(Duration),

    /// The decoder reported success but left no usable output file.
    #[error("Decoder produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    /// An I/O error occurred while preparing or reading the frame file.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// The frame file could not be decoded into an image.
    #[error("Image decode error: {0}")]
    Image(#[from] ImageError),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken)
    /// or by shutting the coordinator down.
    #[error("Operation cancelled")]
    Cancelled,

    /// The shared extraction task ended without publishing a result.
    #[error("Extraction task ended without a result")]
    ExtractionAborted,
}

impl FrameCacheError {
    /// Returns `true` for [`FrameCacheError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FrameCacheError::Cancelled)
    }
}
