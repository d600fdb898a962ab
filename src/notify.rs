//! Cache population events.
//!
//! Every time a frame is newly inserted into the cache the coordinator
//! publishes a [`FrameCachedEvent`]. UI code can consume events in two ways:
//!
//! - register a [`FrameObserver`], called synchronously on the extraction
//!   task, or
//! - call [`ExtractionCoordinator::subscribe`](crate::ExtractionCoordinator::subscribe)
//!   and poll the returned [`CacheEventStream`].
//!
//! Events are hints for speculative redraws. A slow stream consumer loses
//! events once its buffer is full; cache correctness never depends on them.
//!
//! # Example
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//!
//! use framecache::{CacheOptions, ExtractionCoordinator};
//!
//! # async fn example() -> Result<(), framecache::FrameCacheError> {
//! let coordinator = ExtractionCoordinator::new(CacheOptions::new())?;
//! let mut events = coordinator.subscribe();
//!
//! while let Some(event) = events.next().await {
//!     println!("frame {} of {} is ready", event.frame_index(), event.path().display());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio_stream::Stream;

use crate::entry::{CacheKey, CachedFrame};

/// A frame was added to the cache.
#[derive(Debug, Clone)]
pub struct FrameCachedEvent {
    /// Key the frame was stored under.
    pub key: CacheKey,
    /// The cached frame.
    pub frame: CachedFrame,
}

impl FrameCachedEvent {
    /// Source file of the frame.
    pub fn path(&self) -> &Path {
        self.key.path()
    }

    /// Frame index within the source.
    pub fn frame_index(&self) -> u64 {
        self.key.frame_index()
    }
}

/// Receives cache population events.
///
/// Implementations must be [`Send`] and [`Sync`] because they are invoked
/// from extraction tasks running on worker threads. Callbacks should return
/// quickly; hand heavy work off to another task.
pub trait FrameObserver: Send + Sync {
    /// Called after a frame has been inserted into the cache.
    fn on_frame_cached(&self, event: &FrameCachedEvent);
}

/// A stream of [`FrameCachedEvent`]s.
///
/// Implements [`tokio_stream::Stream`]. Dropping the stream unsubscribes it.
pub struct CacheEventStream {
    receiver: Receiver<FrameCachedEvent>,
}

impl Stream for CacheEventStream {
    type Item = FrameCachedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Fans events out to observers and stream subscribers.
pub(crate) struct Notifier {
    observers: Mutex<Vec<Arc<dyn FrameObserver>>>,
    subscribers: Mutex<Vec<Sender<FrameCachedEvent>>>,
    channel_capacity: usize,
}

impl Notifier {
    pub(crate) fn new(channel_capacity: usize) -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn FrameObserver>) {
        self.observers.lock().push(observer);
    }

    pub(crate) fn subscribe(&self) -> CacheEventStream {
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        self.subscribers.lock().push(sender);
        CacheEventStream { receiver }
    }

    pub(crate) fn publish(&self, event: FrameCachedEvent) {
        // Snapshot so observers may register further observers.
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_frame_cached(&event);
        }

        self.subscribers
            .lock()
            .retain(|sender| match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::debug!(
                        "Dropping cache event for frame {}: subscriber is behind",
                        event.frame_index()
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }
}
