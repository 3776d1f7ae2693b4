use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::NetError;

/// Protocol-level events reported by [`HttpClient`](crate::http::client::HttpClient).
///
/// `DataComplete`, `Timeout` and `Error` are terminal: exactly one of them
/// ends every request started with `run_async` or `run`.
#[derive(Debug)]
pub enum HttpEvent {
    /// The target host has an address.
    Resolved { addr: SocketAddr },
    /// The TCP connection to the host is up.
    Connected,
    /// Status line and headers of the final response have been parsed.
    Response {
        code: u16,
        headers: Vec<(String, String)>,
    },
    /// A 3xx response carried a `Location`.
    ///
    /// `auto_redirect` says whether the client will follow it once the body
    /// has drained. The owner may clear it to veto the redirect; setting it on
    /// an ineligible redirect has no effect.
    Redirect {
        code: u16,
        location: String,
        num_redirects: u32,
        max_redirects: u32,
        auto_redirect: bool,
    },
    /// A piece of the body. The same bytes are also appended to the
    /// client's buffer, see [`steal_buffer`](crate::http::client::HttpClient::steal_buffer).
    DataPartial {
        data: Bytes,
        content_length: Option<usize>,
        data_received: usize,
    },
    /// The whole body has arrived.
    DataComplete {
        content_length: Option<usize>,
        data_received: usize,
    },
    Timeout,
    Error { error: NetError },
}

impl HttpEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HttpEvent::Resolved { .. } => "resolved",
            HttpEvent::Connected => "connected",
            HttpEvent::Response { .. } => "response",
            HttpEvent::Redirect { .. } => "redirect",
            HttpEvent::DataPartial { .. } => "data-partial",
            HttpEvent::DataComplete { .. } => "data-complete",
            HttpEvent::Timeout => "timeout",
            HttpEvent::Error { .. } => "error",
        }
    }

    /// Whether this event ends the request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HttpEvent::DataComplete { .. } | HttpEvent::Timeout | HttpEvent::Error { .. }
        )
    }
}
