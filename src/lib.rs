//! # framecache
//!
//! Preview frames for scrubbing UIs, decoded on demand by an external
//! FFmpeg process and kept in a bounded in-memory cache.
//!
//! `framecache` sits between a playhead/scrubber and the decoder. Ask the
//! [`ExtractionCoordinator`] for a frame and it answers from its LRU cache,
//! joins an extraction of the same frame that is already running, or starts
//! one, never running more decoders at once than configured.
//!
//! ## Quick Start
//!
//! ### Get a Preview Frame
//!
//! ```no_run
//! use framecache::{CacheOptions, CancellationToken, ExtractionCoordinator};
//!
//! # async fn example() -> Result<(), framecache::FrameCacheError> {
//! let coordinator = ExtractionCoordinator::new(CacheOptions::new())?;
//! let cancel = CancellationToken::new();
//!
//! // Frame 120 of a 24 fps clip at the default 320x180 preview size.
//! if let Some(frame) = coordinator
//!     .get_preview_frame("input.mp4", 120, 24.0, &cancel)
//!     .await?
//! {
//!     frame.image().save("preview.png")?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Warm the Cache Around the Playhead
//!
//! ```no_run
//! use framecache::{CacheOptions, CancellationToken, ExtractionCoordinator};
//!
//! # async fn example() -> Result<(), framecache::FrameCacheError> {
//! let coordinator = ExtractionCoordinator::new(CacheOptions::new().with_capacity(64))?;
//! let cancel = CancellationToken::new();
//!
//! let report = coordinator
//!     .prefetch("input.mp4", 500, 25.0, 5, 320, 180, &cancel)
//!     .await?;
//! println!("{} loaded, {} failed", report.loaded, report.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **LRU cache**: fixed capacity, O(1) lookups and evictions
//! - **Deduplication**: concurrent requests for one frame share a single
//!   decoder run
//! - **Bounded concurrency**: a semaphore caps simultaneous decoder
//!   processes (and temporary files)
//! - **Two-phase seeking**: fast keyframe seek followed by an accurate
//!   seek for long offsets
//! - **Timeouts & cancellation**: stuck decoders are killed; callers can
//!   abandon a wait without affecting others
//! - **Notifications**: observer callbacks and an event stream for newly
//!   cached frames
//! - **Statistics**: hits, misses, joins, failures and evictions
//!
//! ## Requirements
//!
//! An `ffmpeg` executable on `PATH`, or its location in the
//! `FRAMECACHE_FFMPEG` environment variable or
//! [`CacheOptions::with_decoder_program`].

pub mod cancellation;
pub mod configuration;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod loader;
pub mod lru;
pub mod notify;
pub mod process;
pub mod source;
pub mod stats;
pub mod utilities;

pub use cancellation::CancellationToken;
pub use configuration::{CacheOptions, DecoderOptions};
pub use coordinator::{ExtractionCoordinator, PrefetchReport};
pub use entry::{CacheKey, CachedFrame};
pub use error::FrameCacheError;
pub use loader::FrameLoader;
pub use lru::LruStore;
pub use notify::{CacheEventStream, FrameCachedEvent, FrameObserver};
pub use process::{ProcessInvoker, SeekPlan, TempFrameFile};
pub use source::{DecoderFrameSource, FrameRequest, FrameSource};
pub use stats::CacheStats;
