//! Thread-safe byte queue for bridging a producer thread and a consumer thread.
//!
//! # Key Features
//!
//! - **FIFO chunks**: Every push is kept as its own chunk; pops copy bytes out in
//!   push order and split the head chunk when a request ends inside it
//! - **Explicit end-of-stream**: An empty push (or [`BoundedByteChannel::close`])
//!   marks the channel finished, which is what lets a short final pop return
//!   instead of blocking forever
//! - **Cooperative cancellation**: A blocked pop wakes as soon as its
//!   [`CancellationToken`] fires and returns whatever has arrived so far
//!
//! # Example
//!
//! ```
//! use bytebridge_buffer::BoundedByteChannel;
//!
//! let channel = BoundedByteChannel::new();
//! let producer = channel.clone();
//!
//! let handle = std::thread::spawn(move || {
//!     producer.push(b"hello ");
//!     producer.push(b"world");
//!     producer.close();
//! });
//!
//! let mut out = [0u8; 32];
//! let popped = channel.pop(&mut out, None);
//! handle.join().unwrap();
//!
//! assert_eq!(&out[..popped.len], b"hello world");
//! assert!(popped.reached_eof);
//! ```

pub use self::cancel::{CancelGuard, CancellationToken};
pub use self::channel::{BoundedByteChannel, Popped};
pub use self::error::{Error, Result};

mod cancel;
mod channel;
mod error;
