use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::error::NetError;
use crate::event_loop::{self, Watch};
use crate::io::{self, ReadBuffer, ReadEvent, ReadOptions, WriteEvent, predicate};
use crate::net::resolver::{Resolver, SystemResolver};

/// Everything a connection reports to its owner.
#[derive(Debug)]
pub enum ConnEvent<'a> {
    /// The TCP connect completed.
    Connect,
    /// The peer closed the stream.
    Close,
    /// One unit produced by the current read.
    Read(&'a [u8]),
    /// A queued write was fully written.
    Write,
    /// The idle timer, a connect deadline, or a read/write deadline expired.
    Timeout,
    Error(NetError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Idle,
    Resolving,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
enum Target {
    Host { host: String, port: u16 },
    Addr(SocketAddr),
}

struct PendingWrite {
    data: Bytes,
    timeout: Option<Duration>,
}

type Callback = Box<dyn FnMut(ConnEvent<'_>)>;

struct State {
    status: ConnStatus,
    target: Target,
    resolver: Rc<dyn Resolver>,
    socket: Option<Rc<TcpStream>>,
    rbuf: ReadBuffer,
    read_options: ReadOptions,
    connect_watch: Option<Watch>,
    read_seq: u64,
    read_watch: Option<(u64, Watch)>,
    write_watch: Option<Watch>,
    write_queue: VecDeque<PendingWrite>,
    idle_watch: Option<Watch>,
}

struct Shared {
    state: RefCell<State>,
    func: RefCell<Option<Callback>>,
    in_callback: Cell<bool>,
    // set by Drop; honoured right away, or after the running callback returns
    released: Cell<bool>,
}

/// One TCP connection presented as a single event stream.
///
/// Resolve, connect, reads, writes and timeouts all report through the
/// callback given at construction. The connection can be driven from inside
/// that callback, including being dropped: a drop during the callback is
/// recorded and carried out once the callback returns.
///
/// ```text
///   Idle ──connect──► Resolving ──► Connecting ──► Connected ──► Closed
///     ▲                    │              │            │
///     └──── error/timeout ─┴──────────────┘            └── peer close / disconnect
/// ```
pub struct Connection {
    shared: Rc<Shared>,
}

impl Connection {
    /// A connection to `host:port`, resolved when [`connect`](Self::connect) runs.
    pub fn new<F>(host: impl Into<String>, port: u16, func: F) -> Self
    where
        F: FnMut(ConnEvent<'_>) + 'static,
    {
        let target = Target::Host {
            host: host.into(),
            port,
        };
        Self::with_target(target, Box::new(func))
    }

    /// A connection to an already resolved address.
    pub fn with_addr<F>(addr: SocketAddr, func: F) -> Self
    where
        F: FnMut(ConnEvent<'_>) + 'static,
    {
        Self::with_target(Target::Addr(addr), Box::new(func))
    }

    /// Wrap a socket that is already connected, such as one from `accept`.
    pub fn from_stream<F>(stream: TcpStream, func: F) -> Result<Self, NetError>
    where
        F: FnMut(ConnEvent<'_>) + 'static,
    {
        let addr = stream.peer_addr()?;
        let conn = Self::with_target(Target::Addr(addr), Box::new(func));
        {
            let mut st = conn.shared.state.borrow_mut();
            st.socket = Some(Rc::new(stream));
            st.status = ConnStatus::Connected;
        }
        Ok(conn)
    }

    fn with_target(target: Target, func: Callback) -> Self {
        let state = State {
            status: ConnStatus::Idle,
            target,
            resolver: Rc::new(SystemResolver),
            socket: None,
            rbuf: ReadBuffer::dynamic(),
            read_options: ReadOptions::default(),
            connect_watch: None,
            read_seq: 0,
            read_watch: None,
            write_watch: None,
            write_queue: VecDeque::new(),
            idle_watch: None,
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                func: RefCell::new(Some(func)),
                in_callback: Cell::new(false),
                released: Cell::new(false),
            }),
        }
    }

    pub fn set_resolver(&self, resolver: Rc<dyn Resolver>) {
        self.shared.state.borrow_mut().resolver = resolver;
    }

    /// Replace the event callback. Takes effect for the next event.
    pub fn set_callback<F>(&self, func: F)
    where
        F: FnMut(ConnEvent<'_>) + 'static,
    {
        *self.shared.func.borrow_mut() = Some(Box::new(func));
    }

    /// Options used by [`read_any`](Self::read_any), [`read_line`](Self::read_line)
    /// and [`read_exact`](Self::read_exact).
    pub fn set_read_options(&self, options: ReadOptions) {
        self.shared.state.borrow_mut().read_options = options;
    }

    pub fn status(&self) -> ConnStatus {
        self.shared.state.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnStatus::Connected
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        let st = self.shared.state.borrow();
        st.socket.as_ref().and_then(|s| s.peer_addr().ok())
    }

    /// Received bytes not yet handed out by a read.
    pub fn buffered(&self) -> usize {
        self.shared.state.borrow().rbuf.len()
    }

    /// Writes queued or in flight.
    pub fn pending_writes(&self) -> usize {
        let st = self.shared.state.borrow();
        st.write_queue.len() + usize::from(st.write_watch.is_some())
    }

    /// Resolve (when needed) and connect. A no-op while connecting or connected.
    ///
    /// `timeout` bounds resolve and connect together; expiry is reported as
    /// [`ConnEvent::Timeout`].
    pub fn connect(&self, timeout: Option<Duration>) {
        let mut st = self.shared.state.borrow_mut();
        if matches!(
            st.status,
            ConnStatus::Resolving | ConnStatus::Connecting | ConnStatus::Connected
        ) {
            return;
        }

        st.status = match st.target {
            Target::Host { .. } => ConnStatus::Resolving,
            Target::Addr(_) => ConnStatus::Connecting,
        };
        st.rbuf.clear();

        let weak = Rc::downgrade(&self.shared);
        let target = st.target.clone();
        let resolver = st.resolver.clone();
        st.connect_watch = Some(Watch::spawn(async move {
            let attempt = establish(weak.clone(), resolver, target);
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .unwrap_or(Err(NetError::Timeout)),
                None => attempt.await,
            };
            if let Some(shared) = weak.upgrade() {
                Shared::connected(&shared, outcome);
            }
        }));
    }

    /// Start a read with explicit options and completion predicate.
    ///
    /// A read already outstanding is replaced; bytes it buffered but did not
    /// hand out are seen first by the new one.
    pub fn read_with<P>(&self, options: ReadOptions, predicate: P) -> Result<(), NetError>
    where
        P: FnMut(&[u8]) -> usize + 'static,
    {
        let mut st = self.shared.state.borrow_mut();
        let socket = match (&st.socket, st.status) {
            (Some(socket), ConnStatus::Connected) => socket.clone(),
            _ => return Err(NetError::NotConnected),
        };

        if let Some((_, old)) = st.read_watch.take() {
            old.cancel();
        }
        st.read_seq += 1;
        let id = st.read_seq;

        let weak = Rc::downgrade(&self.shared);
        let watch = io::read(socket, st.rbuf.clone(), options, predicate, move |event| {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            if !shared.is_current_read(id) {
                return false;
            }
            match event {
                ReadEvent::Data(unit) => Shared::dispatch(&shared, ConnEvent::Read(unit)),
                ReadEvent::Eof(rest) => {
                    if !rest.is_empty() {
                        tracing::debug!(bytes = rest.len(), "discarding incomplete unit at end of stream");
                    }
                    shared.teardown();
                    Shared::dispatch(&shared, ConnEvent::Close);
                    return false;
                }
                ReadEvent::Error(error) => {
                    shared.finish_read(id);
                    Shared::dispatch(&shared, ConnEvent::Error(error));
                    return false;
                }
                ReadEvent::Timeout => {
                    shared.finish_read(id);
                    Shared::dispatch(&shared, ConnEvent::Timeout);
                    return false;
                }
            }
            !shared.released.get() && shared.is_current_read(id)
        });
        st.read_watch = Some((id, watch));
        Ok(())
    }

    /// Deliver whatever arrives.
    pub fn read_any(&self) -> Result<(), NetError> {
        let options = self.shared.state.borrow().read_options.clone();
        self.read_with(options, predicate::any)
    }

    /// Deliver one newline-terminated line at a time, newline included.
    pub fn read_line(&self) -> Result<(), NetError> {
        let options = self.shared.state.borrow().read_options.clone();
        self.read_with(options, predicate::line)
    }

    /// Deliver units of exactly `n` bytes. `n` must be at least one.
    pub fn read_exact(&self, n: usize) -> Result<(), NetError> {
        if n == 0 {
            return Err(NetError::InvalidArgument("read_exact needs at least one byte".to_string()));
        }
        let mut options = self.shared.state.borrow().read_options.clone();
        options.max_len = options.max_len.max(n);
        self.read_with(options, predicate::exact(n))
    }

    /// Stop the outstanding read, keeping buffered bytes.
    pub fn cancel_read(&self) {
        if let Some((_, watch)) = self.shared.state.borrow_mut().read_watch.take() {
            watch.cancel();
        }
    }

    /// Queue `data` for writing. Writes go out one at a time in call order;
    /// writes issued before the connection is up wait for it.
    pub fn write(&self, data: impl Into<Bytes>, timeout: Option<Duration>) {
        let mut st = self.shared.state.borrow_mut();
        st.write_queue.push_back(PendingWrite {
            data: data.into(),
            timeout,
        });
        if st.status == ConnStatus::Connected && st.write_watch.is_none() {
            Shared::start_next_write(&self.shared, &mut st);
        }
    }

    /// Arm, re-arm (`Some`) or disarm (`None`) the idle timer.
    ///
    /// Expiry reports [`ConnEvent::Timeout`]; the connection stays open.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        let mut st = self.shared.state.borrow_mut();
        if let Some(watch) = st.idle_watch.take() {
            watch.cancel();
        }
        let Some(after) = timeout else {
            return;
        };

        let weak = Rc::downgrade(&self.shared);
        st.idle_watch = Some(event_loop::timer(after, move || {
            if let Some(shared) = weak.upgrade() {
                shared.state.borrow_mut().idle_watch = None;
                Shared::dispatch(&shared, ConnEvent::Timeout);
            }
        }));
    }

    /// Cancel resolve, connect, reads, writes and timers, drop queued writes and
    /// close the socket. Safe to call from inside the connection's callback.
    pub fn disconnect(&self) {
        self.shared.teardown();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.released.set(true);
        if self.shared.in_callback.get() {
            tracing::trace!("connection dropped inside its callback, release deferred");
            return;
        }
        self.shared.release();
    }
}

impl Shared {
    /// Hand `event` to the owner's callback.
    ///
    /// The callback is taken out of its slot while it runs, so the owner may
    /// replace it or drop the connection from inside.
    fn dispatch(this: &Rc<Self>, event: ConnEvent<'_>) {
        if this.released.get() {
            return;
        }
        let Some(mut func) = this.func.borrow_mut().take() else {
            tracing::trace!(?event, "no callback installed, event dropped");
            return;
        };

        let outer = this.in_callback.replace(true);
        func(event);
        this.in_callback.set(outer);

        if this.released.get() {
            drop(func);
            if !outer {
                this.release();
            }
            return;
        }

        let mut slot = this.func.borrow_mut();
        if slot.is_none() {
            *slot = Some(func);
        }
    }

    fn connected(this: &Rc<Self>, outcome: Result<TcpStream, NetError>) {
        let event = {
            let mut st = this.state.borrow_mut();
            st.connect_watch = None;
            match outcome {
                Ok(stream) => {
                    tracing::debug!(peer = ?stream.peer_addr().ok(), "connected");
                    st.socket = Some(Rc::new(stream));
                    st.status = ConnStatus::Connected;
                    Shared::start_next_write(this, &mut st);
                    ConnEvent::Connect
                }
                Err(NetError::Timeout) => {
                    tracing::debug!("connect timed out");
                    st.status = ConnStatus::Idle;
                    ConnEvent::Timeout
                }
                Err(error) => {
                    tracing::debug!(error = %error, "connect failed");
                    st.status = ConnStatus::Idle;
                    ConnEvent::Error(error)
                }
            }
        };
        Shared::dispatch(this, event);
    }

    fn start_next_write(this: &Rc<Self>, st: &mut State) {
        let Some(socket) = st.socket.clone() else {
            return;
        };
        let Some(next) = st.write_queue.pop_front() else {
            return;
        };

        let weak = Rc::downgrade(this);
        st.write_watch = Some(io::write(socket, next.data, next.timeout, move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let event = {
                let mut st = shared.state.borrow_mut();
                st.write_watch = None;
                match event {
                    WriteEvent::Done { .. } => {
                        // start the next write before the upcall so writes made
                        // inside the callback queue behind it
                        Shared::start_next_write(&shared, &mut st);
                        ConnEvent::Write
                    }
                    WriteEvent::Error { error, written } => {
                        tracing::debug!(error = %error, written, "write failed");
                        ConnEvent::Error(error)
                    }
                    WriteEvent::Timeout { written } => {
                        tracing::debug!(written, "write timed out");
                        ConnEvent::Timeout
                    }
                }
            };
            Shared::dispatch(&shared, event);
        }));
    }

    fn is_current_read(&self, id: u64) -> bool {
        matches!(&self.state.borrow().read_watch, Some((current, _)) if *current == id)
    }

    fn finish_read(&self, id: u64) {
        let mut st = self.state.borrow_mut();
        if matches!(&st.read_watch, Some((current, _)) if *current == id) {
            st.read_watch = None;
        }
    }

    fn teardown(&self) {
        let mut st = self.state.borrow_mut();
        let watches = [
            st.connect_watch.take(),
            st.write_watch.take(),
            st.idle_watch.take(),
            st.read_watch.take().map(|(_, watch)| watch),
        ];
        for watch in watches.into_iter().flatten() {
            watch.cancel();
        }
        if !st.write_queue.is_empty() {
            tracing::debug!(dropped = st.write_queue.len(), "discarding queued writes");
            st.write_queue.clear();
        }
        st.socket = None;
        st.rbuf.clear();
        if st.status != ConnStatus::Idle {
            st.status = ConnStatus::Closed;
        }
    }

    fn release(&self) {
        self.teardown();
        let func = self.func.borrow_mut().take();
        drop(func);
    }
}

async fn establish(
    weak: Weak<Shared>,
    resolver: Rc<dyn Resolver>,
    target: Target,
) -> Result<TcpStream, NetError> {
    let addr = match target {
        Target::Addr(addr) => addr,
        Target::Host { host, port } => {
            let addr = resolver
                .resolve(&host, port)
                .await
                .map_err(|source| NetError::AddressResolution {
                    host: host.clone(),
                    source,
                })?;
            tracing::debug!(%host, %addr, "address resolved");
            match weak.upgrade() {
                Some(shared) => {
                    shared.state.borrow_mut().status = ConnStatus::Connecting;
                }
                None => return Err(NetError::NotConnected),
            }
            addr
        }
    };

    TcpStream::connect(addr)
        .await
        .map_err(|source| NetError::Connect { addr, source })
}
