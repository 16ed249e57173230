//! Cooperative cancellation shared between caller threads and network threads.
//!
//! A token is a cheap, cloneable handle. Cancelling it flips a flag, runs every
//! connected handler once, and wakes async waiters. Blocking code connects a
//! handler that signals its own condition variable, so a waiting thread is
//! woken instead of polling the flag.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::Notify;

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Cloneable cancellation flag with wake-up handlers.
///
/// # Examples
///
/// ```
/// use bytebridge_buffer::CancellationToken;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let token = CancellationToken::new();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&hits);
/// let _guard = token.connect(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// token.cancel();
/// token.cancel();
/// assert!(token.is_cancelled());
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler)>>,
    notify: Notify,
    // Keeps a child registered with its parent for as long as the child lives.
    parent_link: Mutex<Option<CancelGuard>>,
}

impl CancellationToken {
    pub fn new() -> Self { Self::default() }

    pub fn is_cancelled(&self) -> bool { self.inner.cancelled.load(Ordering::SeqCst) }

    /// Cancel the token. Only the first call has any effect.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let handlers: Vec<Handler> = {
            let mut handlers = self.inner.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.drain(..).map(|(_, handler)| handler).collect()
        };

        tracing::trace!(handlers = handlers.len(), "cancellation token fired");

        // Handlers run without the registry lock so they may take their own locks.
        for handler in handlers {
            handler();
        }

        self.inner.notify.notify_waiters();
    }

    /// Register `handler` to run when the token is cancelled.
    ///
    /// If the token is already cancelled the handler runs immediately on the
    /// calling thread. The handler is unregistered when the returned guard is
    /// dropped, and runs at most once.
    pub fn connect<F>(&self, handler: F) -> CancelGuard
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut handlers = self.inner.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_cancelled() {
                handlers.push((id, Arc::new(handler)));
                return CancelGuard { inner: Arc::downgrade(&self.inner), id: Some(id) };
            }
        }

        handler();
        CancelGuard { inner: Weak::new(), id: None }
    }

    /// Create a token that is cancelled whenever `self` is, but which can also
    /// be cancelled on its own without affecting `self`.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let weak_child = Arc::downgrade(&child.inner);

        let guard = self.connect(move || {
            if let Some(inner) = weak_child.upgrade() {
                CancellationToken { inner }.cancel();
            }
        });

        *child.inner.parent_link.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
        child
    }

    /// Wait asynchronously until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent cancel is never missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Disconnects a cancellation handler when dropped.
#[must_use = "dropping the guard disconnects the handler immediately"]
pub struct CancelGuard {
    inner: Weak<Inner>,
    id: Option<u64>,
}

impl CancelGuard {
    /// Disconnect the handler now.
    pub fn disconnect(self) {}
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let (Some(id), Some(inner)) = (self.id, self.inner.upgrade()) else {
            return;
        };
        let mut handlers = inner.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        handlers.retain(|(handler_id, _)| *handler_id != id);
    }
}

impl fmt::Debug for CancelGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelGuard").field("id", &self.id).finish()
    }
}
