use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};

/// Outcome of a pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Popped {
    /// Number of bytes copied into the caller's buffer.
    pub len: usize,
    /// `true` once end-of-stream was marked and every byte has been popped.
    pub reached_eof: bool,
}

/// Unbounded-length FIFO byte queue shared between a producer and a consumer.
///
/// Cloning produces another handle onto the same queue. All state sits behind
/// a single mutex; a condition variable on that mutex is signalled by every
/// push, by end-of-stream marking and by cancellation of a waiting pop.
#[derive(Clone, Default)]
pub struct BoundedByteChannel {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

#[derive(Default)]
struct State {
    chunks: VecDeque<Bytes>,
    /// Unconsumed bytes across all chunks.
    total_length: usize,
    /// Bytes of the head chunk already handed out.
    head_read_offset: usize,
    /// Monotonic: never reset once set.
    reached_eof: bool,
}

impl BoundedByteChannel {
    pub fn new() -> Self { Self::default() }

    /// Append a copy of `data` as a new chunk.
    ///
    /// An empty `data` is the end-of-stream marker: it marks the channel
    /// finished, wakes any blocked pop, and returns `false`. Once the channel
    /// is finished every push returns `false` and appends nothing.
    pub fn push(&self, data: &[u8]) -> bool { self.push_chunk(Bytes::copy_from_slice(data)) }

    /// Append `chunk` without copying. Same semantics as [`push`](Self::push).
    pub fn push_chunk(&self, chunk: Bytes) -> bool {
        let mut state = self.lock();

        if state.reached_eof {
            return false;
        }

        if chunk.is_empty() {
            state.reached_eof = true;
            tracing::trace!(buffered = state.total_length, "byte channel reached end-of-stream");
            drop(state);
            // Every waiter must observe end-of-stream, not just one.
            self.shared.available.notify_all();
            return false;
        }

        state.total_length += chunk.len();
        state.chunks.push_back(chunk);
        drop(state);

        self.shared.available.notify_one();
        true
    }

    /// Append `data`, failing with [`Error::ChannelClosed`] after end-of-stream.
    ///
    /// Unlike [`push`](Self::push), an empty `data` is a no-op rather than the
    /// end-of-stream marker; use [`close`](Self::close) for that.
    pub fn try_push(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return if self.reached_eof() { Err(Error::ChannelClosed) } else { Ok(()) };
        }
        if self.push(data) { Ok(()) } else { Err(Error::ChannelClosed) }
    }

    /// Mark end-of-stream. Equivalent to pushing an empty chunk.
    pub fn close(&self) { self.push_chunk(Bytes::new()); }

    /// Pop up to `buf.len()` bytes, blocking until that many are available.
    ///
    /// - Enough data buffered: returns `buf.len()` bytes immediately.
    /// - End-of-stream marked: returns whatever remains without blocking,
    ///   which may be zero bytes.
    /// - Otherwise blocks until enough data arrives, end-of-stream is marked,
    ///   or `cancel` fires. A cancelled pop returns what is available at that
    ///   moment and leaves the channel usable.
    pub fn pop(&self, buf: &mut [u8], cancel: Option<&CancellationToken>) -> Popped {
        let requested = buf.len();
        let mut state = self.lock();

        if requested > state.total_length && !state.reached_eof {
            match cancel {
                Some(token) => {
                    drop(state);

                    let cancelled = Arc::new(AtomicBool::new(false));
                    let _guard = token.connect({
                        let shared = Arc::clone(&self.shared);
                        let cancelled = Arc::clone(&cancelled);
                        move || {
                            // Taking the lock orders the store before the waiter's next check.
                            let _state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
                            cancelled.store(true, Ordering::SeqCst);
                            shared.available.notify_all();
                        }
                    });

                    state = self.lock();
                    while requested > state.total_length
                        && !state.reached_eof
                        && !cancelled.load(Ordering::SeqCst)
                    {
                        state = self.wait(state);
                    }

                    if cancelled.load(Ordering::SeqCst) {
                        tracing::trace!(
                            requested,
                            available = state.total_length,
                            "byte channel pop cancelled"
                        );
                    }
                }
                None => {
                    while requested > state.total_length && !state.reached_eof {
                        state = self.wait(state);
                    }
                }
            }
        }

        state.take(buf)
    }

    /// Pop whatever is buffered, up to `buf.len()` bytes, without blocking.
    ///
    /// Used where waiting could deadlock against the other side of the channel;
    /// a short (or empty) result does not imply end-of-stream.
    pub fn pop_available(&self, buf: &mut [u8]) -> Popped { self.lock().take(buf) }

    /// Remove up to `max` unconsumed bytes from the tail, newest first, and
    /// return how many were removed.
    ///
    /// Lets a producer take back bytes it pushed that no pop has reached yet.
    /// Bytes already popped are never affected.
    pub fn retract(&self, max: usize) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut removed = 0;

        while removed < max {
            let head_only = state.chunks.len() == 1;
            let Some(tail) = state.chunks.back_mut() else {
                break;
            };

            let consumed = if head_only { state.head_read_offset } else { 0 };
            let unread = tail.len() - consumed;
            let n = unread.min(max - removed);
            if n == unread {
                state.chunks.pop_back();
                if head_only {
                    state.head_read_offset = 0;
                }
            } else {
                tail.truncate(tail.len() - n);
            }
            removed += n;
        }

        state.total_length -= removed;
        if removed > 0 {
            tracing::trace!(removed, buffered = state.total_length, "byte channel retracted tail");
        }
        removed
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize { self.lock().total_length }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Whether end-of-stream has been marked (data may still be buffered).
    pub fn reached_eof(&self) -> bool { self.lock().reached_eof }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.shared.available.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    /// Copy `min(buf.len(), total_length)` bytes out in FIFO order.
    fn take(&mut self, buf: &mut [u8]) -> Popped {
        let len = buf.len().min(self.total_length);
        let mut copied = 0;

        while copied < len {
            let Some(head) = self.chunks.front() else {
                panic!("byte channel holds fewer chunks than its cached length of {}", self.total_length);
            };

            let unread = &head[self.head_read_offset..];
            let n = unread.len().min(len - copied);
            buf[copied..copied + n].copy_from_slice(&unread[..n]);
            copied += n;

            if n == unread.len() {
                self.chunks.pop_front();
                self.head_read_offset = 0;
            } else {
                self.head_read_offset += n;
            }
        }

        self.total_length -= len;
        Popped { len, reached_eof: self.reached_eof && self.total_length == 0 }
    }
}

impl fmt::Debug for BoundedByteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BoundedByteChannel")
            .field("chunks", &state.chunks.len())
            .field("total_length", &state.total_length)
            .field("head_read_offset", &state.head_read_offset)
            .field("reached_eof", &state.reached_eof)
            .finish()
    }
}
