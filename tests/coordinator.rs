//! ExtractionCoordinator integration tests.
//!
//! A counting in-memory frame source stands in for the decoder so that
//! deduplication, gating and cancellation can be observed exactly.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use framecache::{
    CacheOptions, CancellationToken, ExtractionCoordinator, FrameCacheError, FrameCachedEvent,
    FrameObserver, FrameRequest, FrameSource, PrefetchReport,
};
use image::DynamicImage;
use tempfile::TempDir;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

struct CountingSource {
    delay: Duration,
    behaviour: Behaviour,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl CountingSource {
    fn new(delay: Duration) -> Self {
        Self::with_behaviour(delay, Behaviour::Succeed)
    }

    fn with_behaviour(delay: Duration, behaviour: Behaviour) -> Self {
        Self {
            delay,
            behaviour,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl FrameSource for CountingSource {
    async fn extract(
        &self,
        request: &FrameRequest,
        cancel: &CancellationToken,
    ) -> Result<DynamicImage, FrameCacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let finished = tokio::select! {
            () = tokio::time::sleep(self.delay) => true,
            () = cancel.cancelled() => false,
        };
        self.running.fetch_sub(1, Ordering::SeqCst);

        if !finished {
            return Err(FrameCacheError::Cancelled);
        }
        match self.behaviour {
            Behaviour::Succeed => Ok(DynamicImage::new_rgb8(request.width, request.height)),
            Behaviour::Fail => Err(FrameCacheError::ProcessExit { code: Some(1) }),
            Behaviour::Panic => panic!("decoder exploded"),
        }
    }
}

/// Scratch directory with empty stand-in media files.
struct Media {
    directory: TempDir,
}

impl Media {
    fn new() -> Self {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        for name in ["a.mp4", "b.mp4"] {
            fs::write(directory.path().join(name), b"").expect("Failed to write media file");
        }
        Self { directory }
    }

    fn a(&self) -> PathBuf {
        self.directory.path().join("a.mp4")
    }

    fn b(&self) -> PathBuf {
        self.directory.path().join("b.mp4")
    }

    fn missing(&self) -> PathBuf {
        self.directory.path().join("missing.mp4")
    }
}

fn coordinator(
    options: CacheOptions,
    source: CountingSource,
) -> ExtractionCoordinator<CountingSource> {
    ExtractionCoordinator::with_source(options, source).expect("Failed to create coordinator")
}

async fn wait_until_cached(
    coordinator: &ExtractionCoordinator<CountingSource>,
    path: &Path,
    frame_index: u64,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !coordinator.is_cached(path, frame_index, 200, 100) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("frame was never cached");
}

// ── Cache hits and misses ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_request_is_served_from_cache() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();

    let first = coordinator
        .get_frame(media.a(), 10, 25.0, 200, 100, &cancel)
        .await
        .unwrap()
        .expect("first request should produce a frame");
    let second = coordinator
        .get_frame(media.a(), 10, 25.0, 200, 100, &cancel)
        .await
        .unwrap()
        .expect("second request should hit the cache");

    assert!(first.ptr_eq(&second));
    assert_eq!(coordinator.source().calls(), 1);
    assert_eq!(first.frame_index(), 10);
    assert_eq!((first.width(), first.height()), (200, 100));

    let stats = coordinator.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.extractions, 1);
    assert_eq!(stats.insertions, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn path_case_shares_cache_slot() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();

    coordinator
        .get_frame(media.a(), 3, 25.0, 200, 100, &cancel)
        .await
        .unwrap()
        .unwrap();

    let shouted = PathBuf::from(media.a().to_string_lossy().to_uppercase());
    assert!(coordinator.is_cached(&shouted, 3, 200, 100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn preview_frame_uses_configured_resolution() {
    let media = Media::new();
    let options = CacheOptions::new().with_preview_resolution(64, 36);
    let coordinator = coordinator(options, CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();

    let frame = coordinator
        .get_preview_frame(media.a(), 0, 24.0, &cancel)
        .await
        .unwrap()
        .unwrap();

    assert_eq!((frame.width(), frame.height()), (64, 36));
    assert!(coordinator.is_cached(media.a(), 0, 64, 36));
}

// ── Deduplication ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_extraction() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::new(Duration::from_millis(200)),
    );
    let cancel = CancellationToken::new();
    let path = media.a();

    let (first, second) = tokio::join!(
        coordinator.get_frame(&path, 10, 25.0, 200, 100, &cancel),
        coordinator.get_frame(&path, 10, 25.0, 200, 100, &cancel),
    );

    let first = first.unwrap().expect("first caller should get a frame");
    let second = second.unwrap().expect("second caller should get a frame");
    assert!(first.ptr_eq(&second));
    assert_eq!(coordinator.source().calls(), 1);
    assert_eq!(coordinator.stats().joined, 1);
    assert_eq!(coordinator.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_spawned_requests_for_one_key_decode_once() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::new(Duration::from_millis(150)),
    );

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = coordinator.clone();
            let path = media.a();
            tokio::spawn(async move {
                coordinator
                    .get_frame(path, 42, 30.0, 200, 100, &CancellationToken::new())
                    .await
            })
        })
        .collect();

    let mut frames = Vec::new();
    for task in tasks {
        frames.push(task.await.unwrap().unwrap().unwrap());
    }

    assert_eq!(coordinator.source().calls(), 1);
    assert!(frames.iter().all(|frame| frame.ptr_eq(&frames[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_sizes_are_different_frames() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();

    coordinator
        .get_frame(media.a(), 1, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    coordinator
        .get_frame(media.a(), 1, 25.0, 100, 50, &cancel)
        .await
        .unwrap();

    assert_eq!(coordinator.source().calls(), 2);
    assert_eq!(coordinator.len(), 2);
}

// ── Bounded concurrency ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gate_bounds_running_extractions() {
    let media = Media::new();
    let options = CacheOptions::new().with_max_concurrent_extractions(2);
    let coordinator = coordinator(options, CountingSource::new(Duration::from_millis(50)));

    let tasks: Vec<_> = (0..8)
        .map(|frame_index| {
            let coordinator = coordinator.clone();
            let path = media.a();
            tokio::spawn(async move {
                coordinator
                    .get_frame(path, frame_index, 25.0, 200, 100, &CancellationToken::new())
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_some());
    }

    assert_eq!(coordinator.source().calls(), 8);
    assert!(coordinator.source().max_running() <= 2);
    assert_eq!(coordinator.len(), 8);
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_extraction_returns_none_and_can_be_retried() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::with_behaviour(Duration::ZERO, Behaviour::Fail),
    );
    let cancel = CancellationToken::new();

    let result = coordinator
        .get_frame(media.a(), 5, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(!coordinator.is_cached(media.a(), 5, 200, 100));
    assert_eq!(coordinator.pending_count(), 0);

    coordinator
        .get_frame(media.a(), 5, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    assert_eq!(coordinator.source().calls(), 2);
    assert_eq!(coordinator.stats().failures, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_waiters_share_a_failure() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::with_behaviour(Duration::from_millis(100), Behaviour::Fail),
    );
    let cancel = CancellationToken::new();
    let path = media.a();

    let (first, second) = tokio::join!(
        coordinator.get_frame(&path, 8, 25.0, 200, 100, &cancel),
        coordinator.get_frame(&path, 8, 25.0, 200, 100, &cancel),
    );

    assert!(first.unwrap().is_none());
    assert!(second.unwrap().is_none());
    assert_eq!(coordinator.source().calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_source_leaves_no_pending_entry() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::with_behaviour(Duration::ZERO, Behaviour::Panic),
    );
    let cancel = CancellationToken::new();

    let result = coordinator
        .get_frame(media.a(), 9, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(coordinator.pending_count(), 0);

    // A stale entry would make this wait forever instead of retrying.
    let retry = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.get_frame(media.a(), 9, 25.0, 200, 100, &cancel),
    )
    .await
    .expect("retry should not hang");
    assert!(retry.unwrap().is_none());
    assert_eq!(coordinator.source().calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_source_fails_fast_without_extraction() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));

    let result = coordinator
        .get_frame(media.missing(), 0, 25.0, 200, 100, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(coordinator.source().calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_requests_are_errors() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();

    let zero_rate = coordinator.get_frame(media.a(), 0, 0.0, 200, 100, &cancel).await;
    assert!(matches!(zero_rate, Err(FrameCacheError::InvalidRequest(_))));

    let zero_size = coordinator.get_frame(media.a(), 0, 25.0, 0, 100, &cancel).await;
    assert!(matches!(zero_size, Err(FrameCacheError::InvalidRequest(_))));

    let beyond_time = coordinator
        .get_frame(media.a(), u64::MAX, 1e-3, 200, 100, &cancel)
        .await;
    assert!(matches!(beyond_time, Err(FrameCacheError::InvalidRequest(_))));

    assert_eq!(coordinator.source().calls(), 0);
}

#[test]
fn invalid_options_are_rejected() {
    let result = ExtractionCoordinator::with_source(
        CacheOptions::new().with_max_concurrent_extractions(0),
        CountingSource::new(Duration::ZERO),
    );
    assert!(matches!(result, Err(FrameCacheError::InvalidConcurrency)));
}

// ── Cancellation ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_one_waiter_does_not_fail_another() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::new(Duration::from_millis(300)),
    );
    let token_a = CancellationToken::new();
    let token_b = CancellationToken::new();

    let caller_a = {
        let coordinator = coordinator.clone();
        let path = media.a();
        let token = token_a.clone();
        tokio::spawn(async move { coordinator.get_frame(path, 7, 25.0, 200, 100, &token).await })
    };
    let caller_b = {
        let coordinator = coordinator.clone();
        let path = media.a();
        let token = token_b.clone();
        tokio::spawn(async move { coordinator.get_frame(path, 7, 25.0, 200, 100, &token).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    token_a.cancel();

    let result_a = caller_a.await.unwrap();
    assert!(matches!(result_a, Err(FrameCacheError::Cancelled)));

    let result_b = caller_b.await.unwrap().unwrap();
    assert!(result_b.is_some(), "B must still receive the frame");
    assert_eq!(coordinator.source().calls(), 1);
    assert!(coordinator.stats().cancellations >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_extraction_still_fills_the_cache() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::new(Duration::from_millis(100)),
    );
    let cancel = CancellationToken::new();

    let request = {
        let coordinator = coordinator.clone();
        let path = media.a();
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.get_frame(path, 11, 25.0, 200, 100, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    assert!(matches!(request.await.unwrap(), Err(FrameCacheError::Cancelled)));
    wait_until_cached(&coordinator, &media.a(), 11).await;
    assert_eq!(coordinator.source().calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn already_cancelled_token_is_rejected_up_front() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = coordinator.get_frame(media.a(), 0, 25.0, 200, 100, &cancel).await;
    assert!(matches!(result, Err(FrameCacheError::Cancelled)));
    assert_eq!(coordinator.source().calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_stops_running_and_future_work() {
    let media = Media::new();
    let options = CacheOptions::new().with_max_concurrent_extractions(1);
    let coordinator = coordinator(options, CountingSource::new(Duration::from_secs(30)));

    let requests: Vec<_> = (0..3)
        .map(|frame_index| {
            let coordinator = coordinator.clone();
            let path = media.a();
            tokio::spawn(async move {
                coordinator
                    .get_frame(path, frame_index, 25.0, 200, 100, &CancellationToken::new())
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.shutdown();
    assert!(coordinator.is_shut_down());

    for request in requests {
        let result = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .expect("shutdown should release waiters")
            .unwrap();
        assert!(matches!(result, Err(FrameCacheError::Cancelled)));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pending extractions should drain after shutdown");

    assert!(coordinator.source().calls() <= 1);
    assert!(coordinator.is_empty());

    let after = coordinator
        .get_frame(media.a(), 99, 25.0, 200, 100, &CancellationToken::new())
        .await;
    assert!(matches!(after, Err(FrameCacheError::Cancelled)));
}

// ── Invalidation ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalidate_for_file_keeps_other_files() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();

    for frame_index in 0..3 {
        coordinator
            .get_frame(media.a(), frame_index, 25.0, 200, 100, &cancel)
            .await
            .unwrap()
            .unwrap();
    }
    coordinator
        .get_frame(media.b(), 0, 25.0, 200, 100, &cancel)
        .await
        .unwrap()
        .unwrap();

    let shouted = PathBuf::from(media.a().to_string_lossy().to_uppercase());
    assert_eq!(coordinator.invalidate_for_file(&shouted), 3);

    assert!(coordinator.cached_keys().iter().all(|key| !key.is_for_file(&media.a())));
    assert!(coordinator.is_cached(media.b(), 0, 200, 100));
    assert_eq!(coordinator.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalidate_clears_everything() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();

    coordinator
        .get_frame(media.a(), 0, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    coordinator
        .get_frame(media.b(), 0, 25.0, 200, 100, &cancel)
        .await
        .unwrap();

    coordinator.invalidate();
    assert!(coordinator.is_empty());

    coordinator
        .get_frame(media.a(), 0, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    assert_eq!(coordinator.source().calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalidation_does_not_cancel_in_flight_extraction() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::new(Duration::from_millis(150)),
    );

    let request = {
        let coordinator = coordinator.clone();
        let path = media.a();
        tokio::spawn(async move {
            coordinator
                .get_frame(path, 4, 25.0, 200, 100, &CancellationToken::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    coordinator.invalidate_for_file(media.a());

    assert!(request.await.unwrap().unwrap().is_some());
    assert!(coordinator.is_cached(media.a(), 4, 200, 100));
}

// ── End to end ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_cache_single_gate_scenario() {
    let media = Media::new();
    let options = CacheOptions::new()
        .with_capacity(2)
        .with_max_concurrent_extractions(1);
    let coordinator = coordinator(options, CountingSource::new(Duration::from_millis(50)));
    let cancel = CancellationToken::new();
    let path = media.a();

    let (ten, twenty) = tokio::join!(
        coordinator.get_frame(&path, 10, 25.0, 200, 100, &cancel),
        coordinator.get_frame(&path, 20, 25.0, 200, 100, &cancel),
    );
    assert!(ten.unwrap().is_some());
    assert!(twenty.unwrap().is_some());

    assert_eq!(coordinator.source().max_running(), 1);
    assert_eq!(coordinator.source().calls(), 2);
    assert_eq!(coordinator.len(), 2);

    let oldest = coordinator.cached_keys()[1].clone();
    coordinator
        .get_frame(&path, 30, 25.0, 200, 100, &cancel)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(coordinator.len(), 2);
    assert!(!coordinator.is_cached(&path, oldest.frame_index(), 200, 100));
    assert!(coordinator.is_cached(&path, 30, 200, 100));
    assert_eq!(coordinator.stats().evictions, 1);
}

// ── Prefetch ───────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prefetch_fills_window_and_skips_cached() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::from_millis(5)));
    let cancel = CancellationToken::new();

    coordinator
        .get_frame(media.a(), 5, 25.0, 200, 100, &cancel)
        .await
        .unwrap();

    let report = coordinator
        .prefetch(media.a(), 5, 25.0, 2, 200, 100, &cancel)
        .await
        .unwrap();

    assert_eq!(report.already_cached, 1);
    assert_eq!(report.requested, 4);
    assert_eq!(report.loaded, 4);
    assert_eq!(report.failed, 0);
    for frame_index in 3..=7 {
        assert!(coordinator.is_cached(media.a(), frame_index, 200, 100));
    }
    assert_eq!(coordinator.source().calls(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prefetch_clamps_at_frame_zero() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));

    let report = coordinator
        .prefetch(media.a(), 1, 25.0, 3, 200, 100, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.requested, 5);
    assert_eq!(report.loaded, 5);
    assert!(coordinator.is_cached(media.a(), 0, 200, 100));
    assert!(coordinator.is_cached(media.a(), 4, 200, 100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prefetch_counts_failures_without_erroring() {
    let media = Media::new();
    let coordinator = coordinator(
        CacheOptions::new(),
        CountingSource::with_behaviour(Duration::ZERO, Behaviour::Fail),
    );

    let report = coordinator
        .prefetch(media.a(), 10, 25.0, 1, 200, 100, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.requested, 3);
    assert_eq!(report.failed, 3);
    assert_eq!(report.loaded, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_prefetch_returns_promptly() {
    let media = Media::new();
    let options = CacheOptions::new().with_max_concurrent_extractions(1);
    let coordinator = coordinator(options, CountingSource::new(Duration::from_secs(2)));
    let cancel = CancellationToken::new();

    let prefetch = {
        let coordinator = coordinator.clone();
        let path = media.a();
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.prefetch(path, 50, 25.0, 4, 200, 100, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(1), prefetch)
        .await
        .expect("prefetch should stop after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(report.requested, 9);
    assert_eq!(report.cancelled, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prefetch_with_cancelled_token_issues_nothing() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = coordinator
        .prefetch(media.a(), 1_000, 25.0, 500, 200, 100, &cancel)
        .await
        .unwrap();

    assert_eq!(report, PrefetchReport::default());
    assert_eq!(coordinator.source().calls(), 0);
    assert_eq!(coordinator.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prefetch_rejects_invalid_frame_rate() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));

    let result = coordinator
        .prefetch(media.a(), 10, -1.0, 2, 200, 100, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(FrameCacheError::InvalidRequest(_))));
}

// ── Notifications ──────────────────────────────────────────────────

struct CountingObserver {
    seen: AtomicUsize,
}

impl FrameObserver for CountingObserver {
    fn on_frame_cached(&self, _event: &FrameCachedEvent) {
        self.seen.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observers_see_new_frames_only() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let observer = Arc::new(CountingObserver {
        seen: AtomicUsize::new(0),
    });
    coordinator.add_observer(observer.clone());
    let cancel = CancellationToken::new();

    coordinator
        .get_frame(media.a(), 1, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    coordinator
        .get_frame(media.a(), 1, 25.0, 200, 100, &cancel)
        .await
        .unwrap();
    coordinator
        .get_frame(media.a(), 2, 25.0, 200, 100, &cancel)
        .await
        .unwrap();

    assert_eq!(observer.seen.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribers_receive_cached_frames() {
    let media = Media::new();
    let coordinator = coordinator(CacheOptions::new(), CountingSource::new(Duration::ZERO));
    let mut events = coordinator.subscribe();

    let frame = coordinator
        .get_frame(media.b(), 17, 25.0, 200, 100, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.next())
        .await
        .expect("event should arrive")
        .expect("stream should stay open");

    assert_eq!(event.frame_index(), 17);
    assert_eq!(event.path(), media.b().as_path());
    assert!(event.frame.ptr_eq(&frame));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_subscriber_does_not_block_extraction() {
    let media = Media::new();
    let options = CacheOptions::new().with_event_channel_capacity(1);
    let coordinator = coordinator(options, CountingSource::new(Duration::ZERO));
    let _events = coordinator.subscribe();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.prefetch(media.a(), 10, 25.0, 5, 200, 100, &CancellationToken::new()),
    )
    .await
    .expect("prefetch must not wait on subscribers")
    .unwrap();

    assert_eq!(report.loaded, 11);
}
