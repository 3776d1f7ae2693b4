//! Non-blocking read and write primitives.
//!
//! Each operation is a task registered with the [`EventLoop`](crate::event_loop::EventLoop)
//! that waits for socket readiness, moves as many bytes as the OS accepts,
//! and reports through a single completion callback:
//!
//! ```text
//!   read ──► readable? ──► try_read ──► predicate(buf) ─┬─ 0 ──► wait again
//!                                                        └─ k ──► on_done(Data(k bytes))
//!                                                                  └─ false ──► stop
//!   write ─► writable? ──► try_write ──► all written? ──► on_done(Done)
//! ```
//!
//! A zero-byte socket read is end of stream and is reported as
//! [`ReadEvent::Eof`], never as an error.

pub mod buffer;
pub mod predicate;
pub mod read;
pub mod write;

use std::future::Future;
use std::io;

use tokio::time::Instant;

pub use buffer::ReadBuffer;
pub use read::{ReadEvent, ReadOptions, read};
pub use write::{WriteEvent, write};

/// Wait for a readiness future, giving up at `deadline`.
///
/// Returns `None` when the deadline passes first.
pub(crate) async fn ready_by<F>(deadline: Option<Instant>, ready: F) -> Option<io::Result<()>>
where
    F: Future<Output = io::Result<()>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, ready).await.ok(),
        None => Some(ready.await),
    }
}
