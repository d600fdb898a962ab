//! The frame extraction coordinator.
//!
//! [`ExtractionCoordinator`] is the single entry point for preview frames.
//! For every request it either
//!
//! 1. answers from the [`LruStore`] without touching the decoder,
//! 2. joins an extraction of the same key that is already in flight, or
//! 3. registers a new pending extraction and spawns a task for it.
//!
//! Extraction tasks queue on a counting semaphore (the *gate*) so that no
//! more than [`CacheOptions::max_concurrent_extractions`] decoders run at
//! once. A task re-checks the cache after passing the gate, runs the
//! [`FrameSource`], stores the frame and publishes a
//! [`FrameCachedEvent`]. Its pending entry is removed by a drop guard on
//! every exit path, panics included.
//!
//! # Cancellation
//!
//! An extraction is shared by all of its waiters and is never aborted by
//! them: cancelling a caller's token only ends that caller's wait, while
//! the task runs to completion (or to the decoder timeout) and still fills
//! the cache. [`shutdown`](ExtractionCoordinator::shutdown) is the only way
//! to stop running extractions; it kills every decoder, closes the gate and
//! fails all waiters with [`FrameCacheError::Cancelled`].
//!
//! # Example
//!
//! ```no_run
//! use framecache::{CacheOptions, CancellationToken, ExtractionCoordinator};
//!
//! # async fn example() -> Result<(), framecache::FrameCacheError> {
//! let coordinator = ExtractionCoordinator::new(CacheOptions::new())?;
//! let cancel = CancellationToken::new();
//!
//! if let Some(frame) = coordinator
//!     .get_frame("clip.mp4", 240, 24.0, 320, 180, &cancel)
//!     .await?
//! {
//!     println!("{}x{} preview", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

use crate::cancellation::CancellationToken;
use crate::configuration::CacheOptions;
use crate::entry::{CacheKey, CachedFrame};
use crate::error::FrameCacheError;
use crate::lru::LruStore;
use crate::notify::{CacheEventStream, FrameCachedEvent, FrameObserver, Notifier};
use crate::source::{DecoderFrameSource, FrameRequest, FrameSource};
use crate::stats::{CacheStats, StatsCounters};

/// How a shared extraction ended.
#[derive(Debug, Clone)]
enum Settled {
    Frame(CachedFrame),
    Failed,
    Cancelled,
}

type SettledReceiver = watch::Receiver<Option<Settled>>;

struct PendingExtraction {
    id: u64,
    receiver: SettledReceiver,
}

enum Admission {
    Cached(CachedFrame),
    Waiting(SettledReceiver),
}

/// Outcome of a [`prefetch`](ExtractionCoordinator::prefetch) batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Indices skipped because they were already cached.
    pub already_cached: usize,
    /// Requests issued.
    pub requested: usize,
    /// Requests that produced a frame.
    pub loaded: usize,
    /// Requests that produced no frame.
    pub failed: usize,
    /// Requests abandoned through cancellation.
    pub cancelled: usize,
}

/// Deduplicating, concurrency-bounded front end to the frame cache.
///
/// Cloning is cheap and every clone shares the same cache, gate and
/// pending extractions. Create one per application and hand clones to the
/// components that need frames.
pub struct ExtractionCoordinator<S: FrameSource = DecoderFrameSource> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: FrameSource> {
    store: LruStore,
    pending: Mutex<HashMap<CacheKey, PendingExtraction>>,
    gate: Semaphore,
    source: S,
    notifier: Notifier,
    counters: StatsCounters,
    shutdown: CancellationToken,
    options: CacheOptions,
    next_id: AtomicU64,
}

impl<S: FrameSource> Clone for ExtractionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FrameSource> Debug for ExtractionCoordinator<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractionCoordinator")
            .field("options", &self.inner.options)
            .field("cached", &self.inner.store.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ExtractionCoordinator<DecoderFrameSource> {
    /// Create a coordinator that extracts frames with the external decoder.
    ///
    /// # Errors
    ///
    /// Returns [`FrameCacheError::InvalidCapacity`] or
    /// [`FrameCacheError::InvalidConcurrency`] if `options` are unusable.
    pub fn new(options: CacheOptions) -> Result<Self, FrameCacheError> {
        let source = DecoderFrameSource::new(options.decoder().clone());
        Self::with_source(options, source)
    }
}

impl<S: FrameSource> ExtractionCoordinator<S> {
    /// Create a coordinator that pulls frames from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameCacheError::InvalidCapacity`] or
    /// [`FrameCacheError::InvalidConcurrency`] if `options` are unusable.
    pub fn with_source(options: CacheOptions, source: S) -> Result<Self, FrameCacheError> {
        options.validate()?;

        log::info!(
            "Frame cache ready (capacity={}, concurrent extractions={}, timeout={:?})",
            options.capacity(),
            options.max_concurrent_extractions(),
            options.extraction_timeout()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                store: LruStore::new(options.capacity())?,
                pending: Mutex::new(HashMap::new()),
                gate: Semaphore::new(options.max_concurrent_extractions()),
                source,
                notifier: Notifier::new(options.event_channel_capacity),
                counters: StatsCounters::default(),
                shutdown: CancellationToken::new(),
                options,
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Configuration in use.
    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// The frame source extractions are delegated to.
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Get frame `frame_index` of `file`, scaled to fit `width`×`height`.
    ///
    /// Returns `Ok(None)` when no frame could be produced: the source is
    /// missing, the decoder failed or timed out, or the output could not be
    /// decoded. Those failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// - [`FrameCacheError::InvalidRequest`] for a non-positive frame rate
    ///   or a zero dimension.
    /// - [`FrameCacheError::Cancelled`] if `cancel` fires before the frame
    ///   is ready or the coordinator is shut down. Other callers waiting on
    ///   the same frame are unaffected by `cancel`.
    pub async fn get_frame(
        &self,
        file: impl AsRef<Path>,
        frame_index: u64,
        frame_rate: f64,
        width: u32,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<CachedFrame>, FrameCacheError> {
        let request = FrameRequest::new(file, frame_index, frame_rate, width, height);
        self.request_frame(request, cancel).await
    }

    /// [`get_frame`](ExtractionCoordinator::get_frame) at the configured
    /// preview resolution.
    pub async fn get_preview_frame(
        &self,
        file: impl AsRef<Path>,
        frame_index: u64,
        frame_rate: f64,
        cancel: &CancellationToken,
    ) -> Result<Option<CachedFrame>, FrameCacheError> {
        let (width, height) = self.inner.options.preview_resolution();
        self.get_frame(file, frame_index, frame_rate, width, height, cancel)
            .await
    }

    /// [`get_frame`](ExtractionCoordinator::get_frame) for a prepared request.
    pub async fn request_frame(
        &self,
        request: FrameRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<CachedFrame>, FrameCacheError> {
        request.validate()?;

        let counters = &self.inner.counters;
        if cancel.is_cancelled() || self.inner.shutdown.is_cancelled() {
            StatsCounters::bump(&counters.cancellations);
            return Err(FrameCacheError::Cancelled);
        }

        let key = request.key();
        if let Some(frame) = self.inner.store.get(&key) {
            StatsCounters::bump(&counters.hits);
            log::debug!("Cache hit for {key:?}");
            return Ok(Some(frame));
        }

        let source_exists = tokio::fs::metadata(&request.path)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        if !source_exists {
            log::debug!("Source {} does not exist, skipping extraction", request.path.display());
            return Ok(None);
        }

        match self.admit(key, request) {
            Admission::Cached(frame) => Ok(Some(frame)),
            Admission::Waiting(receiver) => self.wait_for(receiver, cancel).await,
        }
    }

    /// Warm the cache around `center_index`.
    ///
    /// Requests every frame in `[center_index - radius, center_index + radius]`
    /// (clamped at zero) that is not cached yet, then waits for the whole
    /// batch. Individual failures and cancellations are counted in the
    /// report, not returned. Cancelling `cancel` ends the batch early and
    /// stops issuing further requests.
    ///
    /// # Errors
    ///
    /// Returns [`FrameCacheError::InvalidRequest`] for a non-positive frame
    /// rate or a zero dimension.
    #[allow(clippy::too_many_arguments)]
    pub async fn prefetch(
        &self,
        file: impl AsRef<Path>,
        center_index: u64,
        frame_rate: f64,
        radius: u64,
        width: u32,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<PrefetchReport, FrameCacheError> {
        let file = file.as_ref();
        FrameRequest::new(file, center_index, frame_rate, width, height).validate()?;

        let first = center_index.saturating_sub(radius);
        let last = center_index.saturating_add(radius);
        let mut report = PrefetchReport::default();
        let mut batch = JoinSet::new();

        for frame_index in first..=last {
            if cancel.is_cancelled() {
                log::debug!("Prefetch of {} cancelled while issuing requests", file.display());
                break;
            }

            let request = FrameRequest::new(file, frame_index, frame_rate, width, height);
            if self.inner.store.contains(&request.key()) {
                report.already_cached += 1;
                continue;
            }

            let coordinator = self.clone();
            let cancel = cancel.clone();
            batch.spawn(async move { coordinator.request_frame(request, &cancel).await });
            report.requested += 1;
        }

        log::debug!(
            "Prefetching {} frame(s) of {} around {center_index}",
            report.requested,
            file.display()
        );

        while let Some(joined) = batch.join_next().await {
            match joined {
                Ok(Ok(Some(_))) => report.loaded += 1,
                Ok(Err(error)) if error.is_cancelled() => report.cancelled += 1,
                Ok(Ok(None)) | Ok(Err(_)) | Err(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Remove every cached frame.
    ///
    /// Extractions in flight are left alone and their frames are cached
    /// when they finish.
    pub fn invalidate(&self) {
        let removed = self.inner.store.len();
        self.inner.store.clear();
        log::info!("Invalidated frame cache ({removed} frame(s))");
    }

    /// Remove every cached frame of `file` (compared case-insensitively).
    ///
    /// Returns the number of frames removed. Extractions in flight are left
    /// alone.
    pub fn invalidate_for_file(&self, file: impl AsRef<Path>) -> usize {
        let file = file.as_ref();
        let removed = self.inner.store.remove_matching(|key| key.is_for_file(file));
        log::info!("Invalidated {removed} cached frame(s) of {}", file.display());
        removed
    }

    /// Returns `true` if the frame is cached. Does not affect LRU order.
    pub fn is_cached(
        &self,
        file: impl AsRef<Path>,
        frame_index: u64,
        width: u32,
        height: u32,
    ) -> bool {
        self.inner
            .store
            .contains(&CacheKey::new(file, frame_index, width, height))
    }

    /// Number of cached frames.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Returns `true` if no frames are cached.
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Cached keys, most recently used first.
    pub fn cached_keys(&self) -> Vec<CacheKey> {
        self.inner.store.keys()
    }

    /// Number of extractions in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot(
            self.inner.store.len(),
            self.inner.store.capacity(),
            self.pending_count(),
        )
    }

    /// Register an observer for newly cached frames.
    pub fn add_observer(&self, observer: Arc<dyn FrameObserver>) {
        self.inner.notifier.add_observer(observer);
    }

    /// Subscribe to newly cached frames as a stream.
    pub fn subscribe(&self) -> CacheEventStream {
        self.inner.notifier.subscribe()
    }

    /// Stop all work.
    ///
    /// Running decoders are killed, queued extractions give up their place
    /// at the gate, and every current and future request fails with
    /// [`FrameCacheError::Cancelled`]. Cached frames stay readable through
    /// [`cached_keys`](ExtractionCoordinator::cached_keys) and friends.
    pub fn shutdown(&self) {
        log::info!("Shutting down frame extraction");
        self.inner.shutdown.cancel();
        self.inner.gate.close();
    }

    /// Returns `true` once [`shutdown`](ExtractionCoordinator::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Join the pending extraction for `key`, or register and start one.
    fn admit(&self, key: CacheKey, request: FrameRequest) -> Admission {
        let counters = &self.inner.counters;
        let mut pending = self.inner.pending.lock();

        if let Some(existing) = pending.get(&key) {
            StatsCounters::bump(&counters.misses);
            StatsCounters::bump(&counters.joined);
            log::debug!("Joining in-flight extraction for {key:?}");
            return Admission::Waiting(existing.receiver.clone());
        }

        // A task may have stored the frame and unregistered between the
        // lookup in `request_frame` and taking the lock.
        if let Some(frame) = self.inner.store.get(&key) {
            StatsCounters::bump(&counters.hits);
            return Admission::Cached(frame);
        }

        StatsCounters::bump(&counters.misses);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        pending.insert(
            key.clone(),
            PendingExtraction {
                id,
                receiver: receiver.clone(),
            },
        );
        drop(pending);

        log::debug!("Starting extraction for {key:?}");
        let registration = PendingRegistration {
            inner: Arc::clone(&self.inner),
            key,
            id,
        };
        tokio::spawn(run_extraction(registration, request, sender));

        Admission::Waiting(receiver)
    }

    async fn wait_for(
        &self,
        mut receiver: SettledReceiver,
        cancel: &CancellationToken,
    ) -> Result<Option<CachedFrame>, FrameCacheError> {
        let settled = loop {
            let current = (*receiver.borrow_and_update()).clone();
            if current.is_some() {
                break current;
            }

            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        // Sender dropped without publishing: the task died.
                        let last = (*receiver.borrow()).clone();
                        break last;
                    }
                }
                () = cancel.cancelled() => {
                    StatsCounters::bump(&self.inner.counters.cancellations);
                    log::debug!("Frame request cancelled by caller");
                    return Err(FrameCacheError::Cancelled);
                }
                () = self.inner.shutdown.cancelled() => {
                    StatsCounters::bump(&self.inner.counters.cancellations);
                    return Err(FrameCacheError::Cancelled);
                }
            }
        };

        match settled {
            Some(Settled::Frame(frame)) => Ok(Some(frame)),
            Some(Settled::Cancelled) => {
                StatsCounters::bump(&self.inner.counters.cancellations);
                Err(FrameCacheError::Cancelled)
            }
            Some(Settled::Failed) => Ok(None),
            None => {
                log::warn!("{}", FrameCacheError::ExtractionAborted);
                Ok(None)
            }
        }
    }
}

/// Removes the pending entry it was created for when dropped.
struct PendingRegistration<S: FrameSource> {
    inner: Arc<Inner<S>>,
    key: CacheKey,
    id: u64,
}

impl<S: FrameSource> Drop for PendingRegistration<S> {
    fn drop(&mut self) {
        let mut pending = self.inner.pending.lock();
        if pending.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            pending.remove(&self.key);
        }
    }
}

async fn run_extraction<S: FrameSource>(
    registration: PendingRegistration<S>,
    request: FrameRequest,
    sender: watch::Sender<Option<Settled>>,
) {
    let inner = Arc::clone(&registration.inner);
    let settled = inner.extract(&registration.key, &request).await;
    drop(registration);
    // Waiters may all have given up; nobody listening is fine.
    let _ = sender.send(Some(settled));
}

impl<S: FrameSource> Inner<S> {
    async fn extract(&self, key: &CacheKey, request: &FrameRequest) -> Settled {
        let permit = tokio::select! {
            permit = self.gate.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Settled::Cancelled,
            },
            () = self.shutdown.cancelled() => return Settled::Cancelled,
        };

        if let Some(frame) = self.store.get(key) {
            return Settled::Frame(frame);
        }

        StatsCounters::bump(&self.counters.extractions);
        let result = self.source.extract(request, &self.shutdown).await;
        drop(permit);

        match result {
            Ok(image) => {
                let frame = CachedFrame::new(image, &request.path, request.frame_index);
                if let Some((evicted, _)) = self.store.put(key.clone(), frame.clone()) {
                    StatsCounters::bump(&self.counters.evictions);
                    log::debug!("Evicted {evicted:?}");
                }
                StatsCounters::bump(&self.counters.insertions);
                self.notifier.publish(FrameCachedEvent {
                    key: key.clone(),
                    frame: frame.clone(),
                });
                Settled::Frame(frame)
            }
            Err(FrameCacheError::Cancelled) => Settled::Cancelled,
            Err(error) => {
                StatsCounters::bump(&self.counters.failures);
                log::debug!("Extraction failed for {key:?}: {error}");
                Settled::Failed
            }
        }
    }
}
