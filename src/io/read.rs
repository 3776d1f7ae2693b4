use std::io;
use std::rc::Rc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::NetError;
use crate::event_loop::Watch;
use crate::io::{ReadBuffer, ready_by};

/// Default bound on buffered bytes for one read.
pub const DEFAULT_MAX_LEN: usize = 64 * 1024;

/// Progress reported by a read operation.
#[derive(Debug)]
pub enum ReadEvent<'a> {
    /// One complete unit, as decided by the predicate.
    Data(&'a [u8]),
    /// The peer closed the stream. Carries bytes that never formed a unit.
    Eof(&'a [u8]),
    Error(NetError),
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Most bytes that may sit in the buffer without completing a unit.
    pub max_len: usize,
    /// Deadline for progress, reset after every successful socket read.
    pub timeout: Option<Duration>,
    /// Pull a single byte per socket read so nothing past the unit is consumed.
    pub one_byte: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_LEN,
            timeout: None,
            one_byte: false,
        }
    }
}

impl ReadOptions {
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            ..Self::default()
        }
    }
}

/// Read from `socket` until `predicate` reports complete units.
///
/// Every unit is handed to `on_done`, which returns `true` to keep reading
/// and `false` to stop. Several units arriving in one socket read are
/// delivered back to back. `Eof`, `Error` and `Timeout` end the operation.
pub fn read<P, F>(
    socket: Rc<TcpStream>,
    buffer: ReadBuffer,
    options: ReadOptions,
    mut predicate: P,
    mut on_done: F,
) -> Watch
where
    P: FnMut(&[u8]) -> usize + 'static,
    F: FnMut(ReadEvent<'_>) -> bool + 'static,
{
    Watch::spawn(async move {
        let mut deadline = options.timeout.map(|t| Instant::now() + t);

        loop {
            loop {
                let complete =
                    buffer.with_slice(|buf| if buf.is_empty() { 0 } else { predicate(buf) });
                if complete == 0 {
                    break;
                }
                let unit = buffer.split_to(complete);
                if !on_done(ReadEvent::Data(&unit)) {
                    return;
                }
            }

            let room = buffer.reserve(options.max_len);
            if room == 0 {
                tracing::debug!(max_len = options.max_len, "read buffer full without a complete unit");
                on_done(ReadEvent::Error(NetError::BufferOverflow(options.max_len)));
                return;
            }
            let want = if options.one_byte { 1 } else { room };

            match ready_by(deadline, socket.readable()).await {
                None => {
                    on_done(ReadEvent::Timeout);
                    return;
                }
                Some(Err(e)) => {
                    on_done(ReadEvent::Error(e.into()));
                    return;
                }
                Some(Ok(())) => {}
            }

            match buffer.fill_from(&socket, want) {
                Ok(0) => {
                    let rest = buffer.split_to(buffer.len());
                    on_done(ReadEvent::Eof(&rest));
                    return;
                }
                Ok(n) => {
                    tracing::trace!(bytes = n, buffered = buffer.len(), "socket read");
                    deadline = options.timeout.map(|t| Instant::now() + t);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    on_done(ReadEvent::Error(e.into()));
                    return;
                }
            }
        }
    })
}
