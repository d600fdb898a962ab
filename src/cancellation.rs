//! Cooperative cancellation.
//!
//! [`CancellationToken`] is shared between the caller that may abort a frame
//! request and the code that waits on it. Tokens form a tree: cancelling a
//! token also cancels every token created from it with
//! [`child_token`](CancellationToken::child_token), so one parent can stop a
//! whole group of requests at once while each request keeps its own token.
//!
//! # Example
//!
//! ```
//! use framecache::CancellationToken;
//!
//! let shutdown = CancellationToken::new();
//! let request = shutdown.child_token();
//! assert!(!request.is_cancelled());
//!
//! shutdown.cancel();
//! assert!(request.is_cancelled());
//! ```

use std::pin::pin;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Cancellation token backed by an [`AtomicBool`] and a [`Notify`].
///
/// Clone this token and share it between tasks; call
/// [`cancel`](CancellationToken::cancel) from anywhere to request
/// cancellation. Synchronous code polls
/// [`is_cancelled`](CancellationToken::is_cancelled), async code awaits
/// [`cancelled`](CancellationToken::cancelled).
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenState>>>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState::default()),
        }
    }

    /// Request cancellation.
    ///
    /// All clones and all child tokens observe the cancellation. Calling
    /// this more than once is harmless.
    pub fn cancel(&self) {
        cancel_state(&self.state);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Create a token that is cancelled when `self` is cancelled.
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child_token(&self) -> CancellationToken {
        let child = Arc::new(TokenState::default());
        {
            let mut children = self.state.children.lock();
            if self.is_cancelled() {
                child.cancelled.store(true, Ordering::Release);
            } else {
                children.retain(|weak| weak.strong_count() > 0);
                children.push(Arc::downgrade(&child));
            }
        }
        CancellationToken { state: child }
    }

    /// Wait until cancellation is requested.
    ///
    /// Resolves immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.state.notify.notified());
            // Register interest before checking the flag so a concurrent
            // `cancel` between the check and the await is not lost.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel_state(state: &TokenState) {
    let children = {
        let mut children = state.children.lock();
        if state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        std::mem::take(&mut *children)
    };

    state.notify.notify_waiters();

    for child in children {
        if let Some(child) = child.upgrade() {
            cancel_state(&child);
        }
    }
}
