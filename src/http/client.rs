//! HTTP/1.1 client driven by a [`Connection`].
//!
//! One [`HttpClient`] performs one logical request at a time: a GET or a
//! POST, followed through a bounded chain of redirects. Progress is reported
//! as [`HttpEvent`]s to the callback given to [`HttpClient::run_async`] or
//! [`HttpClient::run`].
//!
//! ```no_run
//! use evnet::http::client::HttpClient;
//! use evnet::http::event::HttpEvent;
//!
//! let mut client = HttpClient::from_uri("http://127.0.0.1:8080/status").unwrap();
//! let ok = client.run(|event: &mut HttpEvent| {
//!     if let HttpEvent::Response { code, .. } = event {
//!         println!("status {code}");
//!     }
//! });
//! let body = client.steal_buffer();
//! println!("{ok} {} bytes", body.len());
//! ```

use std::cell::{Cell, RefCell};
use std::net::{IpAddr, SocketAddr};
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;
use url::{Host, Url};

use crate::config::{ClientConfig, Config, MAX_REDIRECTS_LIMIT};
use crate::error::NetError;
use crate::event_loop::{EventLoop, Watch};
use crate::http::event::HttpEvent;
use crate::http::headers::{self, HeaderList};
use crate::http::parser::{parse_chunk_size, parse_header_line, parse_status_line, trim_line};
use crate::http::request::{self, Method};
use crate::http::response::{self, ResponseHead};
use crate::io::{ReadOptions, predicate};
use crate::net::{ConnEvent, Connection, ResolveFuture, Resolver, SystemResolver};

/// Where the client is in the request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    /// No request started yet
    None,
    /// Request written, waiting for a status line
    SentRequest,
    /// Reading header lines up to the blank line
    RecvHeaders,
    /// Reading a `Content-Length` or close-delimited body
    RecvBodyNonchunked,
    /// Waiting for a chunk size line
    RecvChunkSize,
    /// Reading one chunk and its CRLF
    RecvChunkBody,
    /// Reading trailer lines after the last chunk, up to a blank line,
    /// a peer close or the idle timeout
    RecvTrailers,
    /// Response fully received
    Done,
    /// Failed, timed out or cancelled
    Error,
}

type Callback = Box<dyn FnMut(&mut HttpEvent)>;

struct ClientState {
    config: ClientConfig,
    url: Option<Url>,
    method: Method,
    body: Bytes,
    headers: HeaderList,
    resolver: Rc<dyn Resolver>,
    timeout: Option<Duration>,
    max_redirects: u32,

    conn: Option<Connection>,
    peer: Option<(String, u16)>,
    resolve_watch: Option<Watch>,

    status: ProtocolStatus,
    body_sent: bool,
    interim: Option<u16>,
    head: ResponseHead,
    buffer: BytesMut,
    data_received: usize,
    redirect_to: Option<String>,
    num_redirects: u32,
}

impl ClientState {
    fn new(config: ClientConfig) -> Self {
        let mut headers = HeaderList::new();
        headers.set("User-Agent", config.user_agent.clone());
        headers.set("Accept", "*/*");

        Self {
            timeout: config.timeout(),
            max_redirects: config.max_redirects.min(MAX_REDIRECTS_LIMIT),
            config,
            url: None,
            method: Method::GET,
            body: Bytes::new(),
            headers,
            resolver: Rc::new(SystemResolver),
            conn: None,
            peer: None,
            resolve_watch: None,
            status: ProtocolStatus::None,
            body_sent: false,
            interim: None,
            head: ResponseHead::default(),
            buffer: BytesMut::new(),
            data_received: 0,
            redirect_to: None,
            num_redirects: 0,
        }
    }

    fn reset_response(&mut self) {
        self.status = ProtocolStatus::None;
        self.body_sent = false;
        self.interim = None;
        self.head = ResponseHead::default();
        self.buffer.clear();
        self.data_received = 0;
        self.redirect_to = None;
    }

    fn conn(&self) -> Result<&Connection, NetError> {
        self.conn.as_ref().ok_or(NetError::NotConnected)
    }

    fn read_line(&self) -> Result<(), NetError> {
        let options = ReadOptions::with_max_len(self.config.max_line_length);
        self.conn()?.read_with(options, predicate::line)
    }

    fn read_body<P>(&self, max_len: usize, predicate: P) -> Result<(), NetError>
    where
        P: FnMut(&[u8]) -> usize + 'static,
    {
        self.conn()?.read_with(ReadOptions::with_max_len(max_len), predicate)
    }

    fn succeeded(&self) -> bool {
        self.status == ProtocolStatus::Done
            && match self.head.content_length {
                Some(length) => self.data_received >= length,
                None => self.data_received > 0,
            }
    }
}

struct ClientShared {
    state: RefCell<ClientState>,
    func: RefCell<Option<Callback>>,
    in_callback: Cell<bool>,
    released: Cell<bool>,
    // bumped whenever a request starts or is abandoned; stale work compares against it
    generation: Cell<u64>,
    done: RefCell<Option<oneshot::Sender<()>>>,
    // loop the kept connection belongs to, None for the ambient one of run_async
    loop_id: Cell<Option<u64>>,
}

/// An HTTP/1.1 client for one request at a time.
///
/// The client owns at most one [`Connection`] and keeps it open between
/// requests to the same host unless the server asked to close it. It may be
/// dropped from inside its own callback; the drop takes effect once the
/// callback returns.
pub struct HttpClient {
    shared: Rc<ClientShared>,
    blocking_loop: Option<EventLoop>,
}

/// Cancels the request of an [`HttpClient`] without borrowing it.
///
/// Useful from inside the callback passed to [`HttpClient::run`].
#[derive(Clone)]
pub struct CancelHandle {
    shared: Weak<ClientShared>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Some(shared) = self.shared.upgrade() {
            ClientShared::cancel(&shared);
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            shared: Rc::new(ClientShared {
                state: RefCell::new(ClientState::new(config)),
                func: RefCell::new(None),
                in_callback: Cell::new(false),
                released: Cell::new(false),
                generation: Cell::new(0),
                done: RefCell::new(None),
                loop_id: Cell::new(None),
            }),
            blocking_loop: None,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, NetError> {
        let client = Self::new();
        client.set_uri(uri)?;
        Ok(client)
    }

    /// Set the request URI. A missing scheme means `http://`.
    pub fn set_uri(&self, uri: &str) -> Result<(), NetError> {
        let url = parse_http_url(uri)?;
        self.shared.state.borrow_mut().url = Some(url);
        Ok(())
    }

    /// Choose GET or POST. `body` is sent only for POST.
    pub fn set_method(&self, method: Method, body: impl Into<Bytes>) {
        let mut st = self.shared.state.borrow_mut();
        st.method = method;
        st.body = match method {
            Method::POST => body.into(),
            Method::GET => Bytes::new(),
        };
    }

    /// Add or overwrite a request header.
    ///
    /// `Host` is always rejected. Non-standard fields need `allow_nonstandard`.
    pub fn set_header(&self, field: &str, value: &str, allow_nonstandard: bool) -> Result<(), NetError> {
        headers::validate_request_header(field, value, allow_nonstandard)?;
        self.shared.state.borrow_mut().headers.set(field, value);
        Ok(())
    }

    pub fn set_user_agent(&self, agent: &str) -> Result<(), NetError> {
        self.set_header("User-Agent", agent, false)
    }

    pub fn set_max_redirects(&self, max_redirects: u32) -> Result<(), NetError> {
        if max_redirects > MAX_REDIRECTS_LIMIT {
            return Err(NetError::InvalidArgument(format!(
                "max_redirects {max_redirects} exceeds {MAX_REDIRECTS_LIMIT}"
            )));
        }
        self.shared.state.borrow_mut().max_redirects = max_redirects;
        Ok(())
    }

    /// Idle timeout, re-armed whenever data arrives. `None` disables it.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.shared.state.borrow_mut().timeout = timeout;
    }

    pub fn set_resolver(&self, resolver: Rc<dyn Resolver>) {
        self.shared.state.borrow_mut().resolver = resolver;
    }

    pub fn uri(&self) -> Option<String> {
        self.shared.state.borrow().url.as_ref().map(Url::to_string)
    }

    pub fn status(&self) -> ProtocolStatus {
        self.shared.state.borrow().status
    }

    /// Status code of the last final response.
    pub fn response_code(&self) -> Option<u16> {
        self.shared.state.borrow().head.code
    }

    pub fn response_headers(&self) -> Vec<(String, String)> {
        self.shared.state.borrow().head.headers.clone()
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.shared.state.borrow().head.header(name).map(str::to_string)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.shared.state.borrow().head.content_length
    }

    pub fn data_received(&self) -> usize {
        self.shared.state.borrow().data_received
    }

    pub fn num_redirects(&self) -> u32 {
        self.shared.state.borrow().num_redirects
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Start the request and return at once.
    ///
    /// Must be called from inside the event loop. Exactly one terminal event
    /// (`DataComplete`, `Timeout` or `Error`) ends the request.
    pub fn run_async<F>(&self, func: F)
    where
        F: FnMut(&mut HttpEvent) + 'static,
    {
        ClientShared::begin(&self.shared, Box::new(func), None);
    }

    /// Perform the request on a private event loop and wait for it to end.
    ///
    /// Nothing else runs meanwhile. Use [`run_on`](Self::run_on) to keep an
    /// application loop serviced while blocking.
    pub fn run<F>(&mut self, func: F) -> bool
    where
        F: FnMut(&mut HttpEvent) + 'static,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::warn!("HttpClient::run called inside a runtime, use run_async instead");
            return false;
        }
        if self.blocking_loop.is_none() {
            match EventLoop::new() {
                Ok(event_loop) => self.blocking_loop = Some(event_loop),
                Err(e) => {
                    tracing::error!(error = %e, "failed to build event loop");
                    return false;
                }
            }
        }
        let Some(event_loop) = self.blocking_loop.as_ref() else {
            return false;
        };
        self.run_on(event_loop, func)
    }

    /// Perform the request on `event_loop` and wait for it to end.
    ///
    /// Every other task registered with `event_loop` (timers, connections)
    /// keeps running while the call blocks.
    ///
    /// Returns `true` when the response completed and carried its full
    /// `Content-Length`, or at least one byte when no length was given.
    /// Returns `false` without doing anything when called from inside a
    /// tokio runtime.
    pub fn run_on<F>(&self, event_loop: &EventLoop, func: F) -> bool
    where
        F: FnMut(&mut HttpEvent) + 'static,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::warn!("HttpClient::run_on called inside a runtime, use run_async instead");
            return false;
        }

        let (tx, rx) = oneshot::channel();
        *self.shared.done.borrow_mut() = Some(tx);
        let shared = self.shared.clone();
        let loop_id = event_loop.id();
        event_loop.run_until(async move {
            ClientShared::begin(&shared, Box::new(func), Some(loop_id));
            let _ = rx.await;
        });
        self.shared.done.borrow_mut().take();

        self.shared.state.borrow().succeeded()
    }

    /// Take the body received so far, leaving the buffer empty.
    pub fn steal_buffer(&self) -> Bytes {
        std::mem::take(&mut self.shared.state.borrow_mut().buffer).freeze()
    }

    /// Abandon the current request. No further events are delivered for it
    /// and a blocking [`run`](Self::run) returns.
    pub fn cancel(&self) {
        ClientShared::cancel(&self.shared);
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.shared.released.set(true);
        if self.shared.in_callback.get() {
            tracing::trace!("client dropped inside its callback, release deferred");
            return;
        }
        self.shared.release();
    }
}

impl ClientShared {
    fn begin(this: &Rc<Self>, func: Callback, loop_id: Option<u64>) {
        this.generation.set(this.generation.get() + 1);
        *this.func.borrow_mut() = Some(func);
        let moved = this.loop_id.replace(loop_id) != loop_id;
        let stale = {
            let mut st = this.state.borrow_mut();
            st.num_redirects = 0;
            if let Some(watch) = st.resolve_watch.take() {
                watch.cancel();
            }
            if moved {
                st.peer = None;
                st.conn.take()
            } else {
                None
            }
        };
        if stale.is_some() {
            tracing::debug!("kept connection belongs to another loop, dropping it");
        }
        drop(stale);
        ClientShared::start_request(this);
    }

    fn start_request(this: &Rc<Self>) {
        let generation = this.generation.get();
        let mut st = this.state.borrow_mut();
        // a connection is only at a message boundary once its last response is done
        let idle = st.status == ProtocolStatus::Done;
        st.reset_response();

        let Some(url) = st.url.clone() else {
            drop(st);
            ClientShared::fail_later(this, NetError::InvalidUri("no URI set".to_string()));
            return;
        };
        let host = url.host_str().unwrap_or_default().to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let reusable = idle
            && st.peer.as_ref().is_some_and(|(h, p)| *h == host && *p == port)
            && st.conn.as_ref().is_some_and(Connection::is_connected);
        if reusable {
            tracing::debug!(%host, port, "reusing kept-alive connection");
            drop(st);
            if let Err(e) = ClientShared::send_request(this) {
                ClientShared::fail(this, e);
            }
            return;
        }

        let stale = st.conn.take();
        st.peer = None;
        if let Some(watch) = st.resolve_watch.take() {
            watch.cancel();
        }

        let lookup: ResolveFuture = match url.host() {
            Some(Host::Ipv4(ip)) => literal(IpAddr::V4(ip), port),
            Some(Host::Ipv6(ip)) => literal(IpAddr::V6(ip), port),
            _ => st.resolver.resolve(&host, port),
        };
        let limit = st.config.connect_timeout().or(st.timeout);
        let weak = Rc::downgrade(this);
        st.resolve_watch = Some(Watch::spawn(async move {
            let lookup = async {
                lookup.await.map_err(|source| NetError::AddressResolution {
                    host: host.clone(),
                    source,
                })
            };
            let outcome = match limit {
                Some(limit) => tokio::time::timeout(limit, lookup)
                    .await
                    .unwrap_or(Err(NetError::Timeout)),
                None => lookup.await,
            };

            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.generation.get() != generation || shared.released.get() {
                return;
            }
            shared.state.borrow_mut().resolve_watch = None;
            match outcome {
                Ok(addr) => ClientShared::resolved(&shared, addr, host, port),
                Err(error) => ClientShared::fail(&shared, error),
            }
        }));
        drop(st);
        drop(stale);
    }

    fn resolved(this: &Rc<Self>, addr: SocketAddr, host: String, port: u16) {
        tracing::debug!(%host, %addr, "address resolved");
        if !ClientShared::emit(this, &mut HttpEvent::Resolved { addr }) {
            return;
        }

        let weak = Rc::downgrade(this);
        let conn = Connection::with_addr(addr, move |event| {
            if let Some(shared) = weak.upgrade() {
                ClientShared::on_conn_event(&shared, event);
            }
        });
        {
            let mut st = this.state.borrow_mut();
            conn.connect(st.config.connect_timeout().or(st.timeout));
            st.conn = Some(conn);
            st.peer = Some((host, port));
        }
        if let Err(e) = ClientShared::send_request(this) {
            ClientShared::fail(this, e);
        }
    }

    /// Queue the request head; it goes out as soon as the connection is up.
    fn send_request(this: &Rc<Self>) -> Result<(), NetError> {
        let mut st = this.state.borrow_mut();
        let url = st
            .url
            .as_ref()
            .ok_or_else(|| NetError::InvalidUri("no URI set".to_string()))?;
        let body_len = match st.method {
            Method::POST => st.body.len(),
            Method::GET => 0,
        };
        let head = request::encode_head(st.method, url, &st.headers, body_len);
        tracing::debug!(method = st.method.as_str(), url = %url, "sending request");

        st.status = ProtocolStatus::SentRequest;
        let conn = st.conn()?;
        conn.write(head, st.timeout);
        conn.set_timeout(st.timeout);
        if conn.is_connected() {
            st.read_line()?;
        }
        Ok(())
    }

    fn on_conn_event(this: &Rc<Self>, event: ConnEvent<'_>) {
        let status = this.state.borrow().status;
        let idle = matches!(
            status,
            ProtocolStatus::None | ProtocolStatus::Done | ProtocolStatus::Error
        );

        let outcome = match event {
            ConnEvent::Connect => ClientShared::on_connect(this),
            ConnEvent::Read(data) => ClientShared::on_data(this, data),
            ConnEvent::Write => {
                tracing::trace!("request bytes written");
                Ok(())
            }
            ConnEvent::Close | ConnEvent::Timeout | ConnEvent::Error(_) if idle => {
                tracing::debug!(?status, "idle connection ended");
                let stale = {
                    let mut st = this.state.borrow_mut();
                    st.peer = None;
                    st.conn.take()
                };
                drop(stale);
                Ok(())
            }
            ConnEvent::Close => ClientShared::on_close(this),
            ConnEvent::Timeout => ClientShared::on_timeout(this),
            ConnEvent::Error(error) => Err(error),
        };

        if let Err(error) = outcome {
            ClientShared::fail(this, error);
        }
    }

    fn on_connect(this: &Rc<Self>) -> Result<(), NetError> {
        tracing::debug!("connected");
        if !ClientShared::emit(this, &mut HttpEvent::Connected) {
            return Ok(());
        }
        this.state.borrow().read_line()
    }

    fn on_data(this: &Rc<Self>, data: &[u8]) -> Result<(), NetError> {
        let status = {
            let st = this.state.borrow();
            if let Some(conn) = &st.conn {
                conn.set_timeout(st.timeout);
            }
            st.status
        };

        match status {
            ProtocolStatus::SentRequest => ClientShared::on_status_line(this, data),
            ProtocolStatus::RecvHeaders => ClientShared::on_header_line(this, data),
            ProtocolStatus::RecvBodyNonchunked => ClientShared::on_body(this, data),
            ProtocolStatus::RecvChunkSize => ClientShared::on_chunk_size(this, data),
            ProtocolStatus::RecvChunkBody => ClientShared::on_chunk_body(this, data),
            ProtocolStatus::RecvTrailers => {
                if trim_line(data).is_empty() {
                    ClientShared::finish(this);
                } else {
                    tracing::trace!("ignoring trailer field");
                }
                Ok(())
            }
            ProtocolStatus::None | ProtocolStatus::Done | ProtocolStatus::Error => {
                tracing::trace!(bytes = data.len(), ?status, "ignoring data");
                Ok(())
            }
        }
    }

    fn on_status_line(this: &Rc<Self>, line: &[u8]) -> Result<(), NetError> {
        if trim_line(line).is_empty() {
            return Ok(());
        }
        let status = parse_status_line(line)?;

        let mut st = this.state.borrow_mut();
        if status.is_interim() {
            tracing::debug!(code = status.code, "interim response");
            st.interim = Some(status.code);
        } else {
            tracing::debug!(code = status.code, reason = %status.reason, "status line");
            st.head.code = Some(status.code);
        }
        st.status = ProtocolStatus::RecvHeaders;
        Ok(())
    }

    fn on_header_line(this: &Rc<Self>, line: &[u8]) -> Result<(), NetError> {
        let line = trim_line(line);
        let mut st = this.state.borrow_mut();

        if !line.is_empty() {
            if st.interim.is_none() {
                match parse_header_line(line) {
                    Some((name, value)) => st.head.record(name, value)?,
                    None => tracing::trace!("skipping malformed header line"),
                }
            }
            return Ok(());
        }

        if let Some(code) = st.interim.take() {
            st.status = ProtocolStatus::SentRequest;
            if code == 100 && st.method == Method::POST && !st.body_sent {
                st.body_sent = true;
                tracing::debug!(bytes = st.body.len(), "100 Continue, sending request body");
                let conn = st.conn()?;
                conn.write(st.body.clone(), st.timeout);
            }
            return Ok(());
        }

        drop(st);
        ClientShared::headers_complete(this)
    }

    fn headers_complete(this: &Rc<Self>) -> Result<(), NetError> {
        let (code, headers, redirect) = {
            let mut st = this.state.borrow_mut();
            if st.method == Method::POST && !st.body_sent {
                // the unsent body leaves the stream off a message boundary
                st.head.connection_close = true;
            }
            let code = st.head.code.unwrap_or_default();
            let redirect = match &st.head.location {
                Some(location) if (300..400).contains(&code) => {
                    let eligible = (code != 301 || st.method != Method::POST)
                        && st.num_redirects < st.max_redirects;
                    Some((location.clone(), eligible))
                }
                _ => None,
            };
            tracing::debug!(code, fields = st.head.headers.len(), "response headers complete");
            (code, st.head.headers.clone(), redirect)
        };

        if !ClientShared::emit(this, &mut HttpEvent::Response { code, headers }) {
            return Ok(());
        }

        if let Some((location, eligible)) = redirect {
            let (num_redirects, max_redirects) = {
                let st = this.state.borrow();
                (st.num_redirects, st.max_redirects)
            };
            let mut event = HttpEvent::Redirect {
                code,
                location: location.clone(),
                num_redirects,
                max_redirects,
                auto_redirect: eligible,
            };
            if !ClientShared::emit(this, &mut event) {
                return Ok(());
            }
            let follow = eligible && matches!(event, HttpEvent::Redirect { auto_redirect: true, .. });
            if follow {
                this.state.borrow_mut().redirect_to = Some(location);
            } else {
                tracing::debug!(code, %location, "redirect left to the owner");
            }
        }

        ClientShared::start_body(this)
    }

    fn start_body(this: &Rc<Self>) -> Result<(), NetError> {
        let mut st = this.state.borrow_mut();
        let code = st.head.code.unwrap_or_default();
        if response::is_bodyless(code) || st.head.content_length == Some(0) {
            drop(st);
            ClientShared::finish(this);
            return Ok(());
        }

        let chunk = st.config.read_chunk_size;
        if st.head.chunked {
            st.status = ProtocolStatus::RecvChunkSize;
            st.read_line()
        } else if let Some(length) = st.head.content_length {
            st.status = ProtocolStatus::RecvBodyNonchunked;
            st.read_body(chunk, predicate::up_to(length))
        } else {
            st.status = ProtocolStatus::RecvBodyNonchunked;
            st.head.connection_close = true;
            st.read_body(chunk, predicate::any)
        }
    }

    /// Append to the body buffer and report the piece. Returns whether the
    /// request is still the owner's current one.
    fn deliver(this: &Rc<Self>, data: &[u8]) -> bool {
        let (content_length, data_received) = {
            let mut st = this.state.borrow_mut();
            st.buffer.extend_from_slice(data);
            st.data_received += data.len();
            (st.head.content_length, st.data_received)
        };
        tracing::trace!(bytes = data.len(), data_received, "body data");

        let mut event = HttpEvent::DataPartial {
            data: Bytes::copy_from_slice(data),
            content_length,
            data_received,
        };
        ClientShared::emit(this, &mut event)
    }

    fn on_body(this: &Rc<Self>, data: &[u8]) -> Result<(), NetError> {
        if !ClientShared::deliver(this, data) {
            return Ok(());
        }
        let complete = {
            let st = this.state.borrow();
            st.head
                .content_length
                .is_some_and(|length| st.data_received >= length)
        };
        if complete {
            ClientShared::finish(this);
        }
        Ok(())
    }

    fn on_chunk_size(this: &Rc<Self>, line: &[u8]) -> Result<(), NetError> {
        let size = parse_chunk_size(line)?;
        let mut st = this.state.borrow_mut();
        if size == 0 {
            tracing::debug!(data_received = st.data_received, "last chunk");
            st.status = ProtocolStatus::RecvTrailers;
            return Ok(());
        }

        let framed = size
            .checked_add(2)
            .ok_or_else(|| NetError::Protocol(format!("chunk size {size:#x} too large")))?;
        tracing::trace!(size, "chunk");
        st.status = ProtocolStatus::RecvChunkBody;
        let max_len = st.config.read_chunk_size.max(framed);
        st.read_body(max_len, predicate::exact(framed))
    }

    fn on_chunk_body(this: &Rc<Self>, data: &[u8]) -> Result<(), NetError> {
        let Some(payload) = data.strip_suffix(b"\r\n") else {
            return Err(NetError::Protocol("chunk data not followed by CRLF".to_string()));
        };
        if !ClientShared::deliver(this, payload) {
            return Ok(());
        }

        let mut st = this.state.borrow_mut();
        st.status = ProtocolStatus::RecvChunkSize;
        st.read_line()
    }

    /// The last chunk has been seen; the body is complete even if the
    /// trailer section never ends. The connection is not at a message
    /// boundary, so it is not reused.
    fn finish_after_last_chunk(this: &Rc<Self>, reason: &str) {
        tracing::debug!(reason, "ending response after last chunk");
        this.state.borrow_mut().head.connection_close = true;
        ClientShared::finish(this);
    }

    fn on_timeout(this: &Rc<Self>) -> Result<(), NetError> {
        if this.state.borrow().status == ProtocolStatus::RecvTrailers {
            ClientShared::finish_after_last_chunk(this, "no end of trailers before idle timeout");
            return Ok(());
        }
        Err(NetError::Timeout)
    }

    fn on_close(this: &Rc<Self>) -> Result<(), NetError> {
        let (status, until_close) = {
            let st = this.state.borrow();
            (st.status, st.head.is_close_delimited())
        };
        if status == ProtocolStatus::RecvBodyNonchunked && until_close {
            tracing::debug!("peer closed, body complete");
            ClientShared::finish(this);
            return Ok(());
        }
        if status == ProtocolStatus::RecvTrailers {
            ClientShared::finish_after_last_chunk(this, "peer closed");
            return Ok(());
        }
        Err(NetError::Protocol(format!(
            "connection closed by peer while in {status:?}"
        )))
    }

    fn finish(this: &Rc<Self>) {
        let (redirect, stale) = {
            let mut st = this.state.borrow_mut();
            st.status = ProtocolStatus::Done;
            if let Some(conn) = &st.conn {
                conn.cancel_read();
                conn.set_timeout(None);
            }
            let stale = if st.head.connection_close {
                st.peer = None;
                st.conn.take()
            } else {
                None
            };
            (st.redirect_to.take(), stale)
        };
        drop(stale);

        if let Some(location) = redirect {
            match ClientShared::follow(this, &location) {
                Ok(()) => ClientShared::start_request(this),
                Err(error) => ClientShared::fail(this, error),
            }
            return;
        }

        let (content_length, data_received) = {
            let st = this.state.borrow();
            (st.head.content_length, st.data_received)
        };
        tracing::debug!(data_received, "response complete");
        let mut event = HttpEvent::DataComplete {
            content_length,
            data_received,
        };
        if ClientShared::emit(this, &mut event) {
            this.complete();
        }
    }

    fn follow(this: &Rc<Self>, location: &str) -> Result<(), NetError> {
        let mut st = this.state.borrow_mut();
        let current = st
            .url
            .as_ref()
            .ok_or_else(|| NetError::InvalidUri("no URI set".to_string()))?;
        let next = current
            .join(location)
            .map_err(|e| NetError::InvalidUri(format!("{location}: {e}")))?;
        if next.scheme() != "http" {
            return Err(NetError::UnsupportedScheme(next.scheme().to_string()));
        }

        tracing::info!(
            from = %current,
            to = %next,
            redirects = st.num_redirects + 1,
            "following redirect"
        );
        st.url = Some(next);
        st.num_redirects += 1;
        Ok(())
    }

    fn fail(this: &Rc<Self>, error: NetError) {
        let stale = {
            let mut st = this.state.borrow_mut();
            st.status = ProtocolStatus::Error;
            st.redirect_to = None;
            if let Some(watch) = st.resolve_watch.take() {
                watch.cancel();
            }
            st.peer = None;
            st.conn.take()
        };
        drop(stale);

        let mut event = if error.is_timeout() {
            tracing::warn!("request timed out");
            HttpEvent::Timeout
        } else {
            tracing::warn!(error = %error, code = error.code(), "request failed");
            HttpEvent::Error { error }
        };
        if ClientShared::emit(this, &mut event) {
            this.complete();
        }
    }

    /// Report `error` from the loop rather than from inside the caller.
    fn fail_later(this: &Rc<Self>, error: NetError) {
        let weak = Rc::downgrade(this);
        let generation = this.generation.get();
        let watch = Watch::spawn(async move {
            if let Some(shared) = weak.upgrade() {
                if shared.generation.get() == generation && !shared.released.get() {
                    ClientShared::fail(&shared, error);
                }
            }
        });
        this.state.borrow_mut().resolve_watch = Some(watch);
    }

    fn cancel(this: &Rc<Self>) {
        this.generation.set(this.generation.get() + 1);
        let stale = {
            let mut st = this.state.borrow_mut();
            if !matches!(st.status, ProtocolStatus::None | ProtocolStatus::Done) {
                st.status = ProtocolStatus::Error;
            }
            st.redirect_to = None;
            if let Some(watch) = st.resolve_watch.take() {
                watch.cancel();
            }
            st.peer = None;
            st.conn.take()
        };
        drop(stale);
        tracing::debug!("request cancelled");
        this.complete();
    }

    /// Hand `event` to the owner's callback.
    ///
    /// Returns `false` when the owner dropped the client or started another
    /// request from inside the callback; the caller must then stop.
    fn emit(this: &Rc<Self>, event: &mut HttpEvent) -> bool {
        if this.released.get() {
            return false;
        }
        let generation = this.generation.get();
        let Some(mut func) = this.func.borrow_mut().take() else {
            tracing::trace!(event = event.name(), "no callback installed");
            return true;
        };

        tracing::trace!(event = event.name(), "emit");
        let outer = this.in_callback.replace(true);
        func(event);
        this.in_callback.set(outer);

        if this.released.get() {
            drop(func);
            if !outer {
                this.release();
            }
            return false;
        }

        {
            let mut slot = this.func.borrow_mut();
            if slot.is_none() {
                *slot = Some(func);
            }
        }
        this.generation.get() == generation
    }

    fn complete(&self) {
        if let Some(tx) = self.done.borrow_mut().take() {
            let _ = tx.send(());
        }
    }

    fn release(&self) {
        self.generation.set(self.generation.get() + 1);
        let (stale, watch) = {
            let mut st = self.state.borrow_mut();
            st.peer = None;
            (st.conn.take(), st.resolve_watch.take())
        };
        if let Some(watch) = watch {
            watch.cancel();
        }
        drop(stale);
        let func = self.func.borrow_mut().take();
        drop(func);
        self.complete();
    }
}

fn literal(ip: IpAddr, port: u16) -> ResolveFuture {
    Box::pin(std::future::ready(Ok(SocketAddr::new(ip, port))))
}

/// Parse `uri` as a plain `http` URL, assuming `http://` when no scheme is given.
pub fn parse_http_url(uri: &str) -> Result<Url, NetError> {
    let text = if uri.contains("://") {
        uri.to_string()
    } else {
        format!("http://{uri}")
    };
    let url = Url::parse(&text).map_err(|e| NetError::InvalidUri(format!("{uri}: {e}")))?;
    if url.scheme() != "http" {
        return Err(NetError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(NetError::InvalidUri(format!("{uri}: missing host")));
    }
    Ok(url)
}

/// Blocking GET of `uri` using the environment configuration.
///
/// Returns the final status code and body. Must be called outside any tokio
/// runtime.
pub fn get(uri: &str) -> Result<(u16, Bytes), NetError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(NetError::InvalidArgument(
            "blocking get called from inside a runtime".to_string(),
        ));
    }

    let mut client = HttpClient::with_config(Config::load().client);
    client.set_uri(uri)?;

    let failure: Rc<RefCell<Option<NetError>>> = Rc::default();
    let slot = failure.clone();
    client.run(move |event| match event {
        HttpEvent::Error { error } => {
            slot.replace(Some(std::mem::replace(error, NetError::Cancelled)));
        }
        HttpEvent::Timeout => {
            slot.replace(Some(NetError::Timeout));
        }
        _ => {}
    });

    if let Some(error) = failure.take() {
        return Err(error);
    }
    let code = client
        .response_code()
        .ok_or_else(|| NetError::Protocol("request ended without a response".to_string()))?;
    Ok((code, client.steal_buffer()))
}
