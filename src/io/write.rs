use std::io;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::NetError;
use crate::event_loop::Watch;
use crate::io::ready_by;

/// Final outcome of a write operation, with the bytes that made it out.
#[derive(Debug)]
pub enum WriteEvent {
    Done { written: usize },
    Error { error: NetError, written: usize },
    Timeout { written: usize },
}

impl WriteEvent {
    pub fn written(&self) -> usize {
        match self {
            WriteEvent::Done { written }
            | WriteEvent::Error { written, .. }
            | WriteEvent::Timeout { written } => *written,
        }
    }
}

/// Write all of `data` to `socket`, then report through `on_done`.
///
/// An empty `data` completes immediately with `Done { written: 0 }`, still
/// from inside the loop rather than from this call.
pub fn write<F>(socket: Rc<TcpStream>, data: Bytes, timeout: Option<Duration>, on_done: F) -> Watch
where
    F: FnOnce(WriteEvent) + 'static,
{
    Watch::spawn(async move {
        let event = write_all(&socket, &data, timeout).await;
        on_done(event);
    })
}

async fn write_all(socket: &TcpStream, data: &[u8], timeout: Option<Duration>) -> WriteEvent {
    let mut written = 0;
    let mut deadline = timeout.map(|t| Instant::now() + t);

    while written < data.len() {
        match ready_by(deadline, socket.writable()).await {
            None => return WriteEvent::Timeout { written },
            Some(Err(e)) => {
                return WriteEvent::Error {
                    error: e.into(),
                    written,
                };
            }
            Some(Ok(())) => {}
        }

        match socket.try_write(&data[written..]) {
            Ok(0) => {
                return WriteEvent::Error {
                    error: io::Error::from(io::ErrorKind::WriteZero).into(),
                    written,
                };
            }
            Ok(n) => {
                written += n;
                tracing::trace!(bytes = n, written, total = data.len(), "socket write");
                deadline = timeout.map(|t| Instant::now() + t);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                return WriteEvent::Error {
                    error: e.into(),
                    written,
                };
            }
        }
    }

    WriteEvent::Done { written }
}
