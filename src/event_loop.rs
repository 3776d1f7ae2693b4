//! Single-threaded event loop.
//!
//! Every connection task runs on one thread inside a tokio [`LocalSet`], so
//! callbacks never run in parallel and shared state lives in `Rc`/`RefCell`.
//! Readiness watches and timers are local tasks; a [`Watch`] is the handle
//! used to deregister one.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::task::{AbortHandle, LocalSet};

/// A current-thread runtime together with the local task set it drives.
pub struct EventLoop {
    // dropped first so pending tasks release their sockets while the runtime is alive
    local: LocalSet,
    runtime: Runtime,
    id: u64,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl EventLoop {
    /// Build a new loop with I/O and timers enabled.
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            local: LocalSet::new(),
            runtime,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Sockets are registered with one loop and cannot move to another.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Drive the loop until `future` completes.
    ///
    /// Local tasks spawned before or during the call make progress while the
    /// future is pending. Must not be called from inside another runtime.
    pub fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.local.block_on(&self.runtime, future)
    }

    /// Drive the loop for a fixed amount of time.
    pub fn run_for(&self, duration: Duration) {
        // the sleep needs the runtime's timer, so it is created inside the loop
        self.run_until(async move { tokio::time::sleep(duration).await })
    }
}

/// Registration of a pending operation with the loop.
///
/// Dropping a watch leaves the operation running; [`Watch::cancel`] removes it.
#[derive(Debug)]
pub struct Watch {
    handle: AbortHandle,
}

impl Watch {
    /// Register `future` as a local task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of [`EventLoop::run_until`] or a callback
    /// running inside it.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        let handle = tokio::task::spawn_local(future).abort_handle();
        Self { handle }
    }

    /// Deregister the operation. Its owned buffers are freed with the task.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the operation has run to completion or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Run `f` once after `after` has elapsed, unless the watch is cancelled first.
pub fn timer<F>(after: Duration, f: F) -> Watch
where
    F: FnOnce() + 'static,
{
    Watch::spawn(async move {
        tokio::time::sleep(after).await;
        f();
    })
}
