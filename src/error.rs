//! Error types shared by the I/O primitives, connections and the HTTP client.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::http::parser::ParseError;

/// Every failure the networking stack reports to its owner.
#[derive(Debug, Error)]
pub enum NetError {
    /// The hostname could not be resolved.
    #[error("address resolution failed for {host}: {source}")]
    AddressResolution {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The TCP connect to a resolved address failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the socket failed.
    #[error("socket i/o error: {0}")]
    Io(#[from] io::Error),

    /// The operation saw no progress before its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The response could not be parsed.
    #[error("malformed response: {0}")]
    Parse(#[from] ParseError),

    /// The peer violated the protocol in a way that is not a parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A read filled its maximum length without completing a unit.
    #[error("read buffer reached {0} bytes without a complete unit")]
    BufferOverflow(usize),

    /// The URI could not be parsed or resolved.
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    /// Only plain `http` URIs are supported.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The header is not allowed in a request.
    #[error("header not allowed: {0}")]
    InvalidHeader(String),

    /// An argument is out of its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs an established connection.
    #[error("not connected")]
    NotConnected,

    /// The request was cancelled by its owner.
    #[error("request cancelled")]
    Cancelled,
}

impl NetError {
    /// Stable numeric code for this error kind.
    ///
    /// Codes are part of the public contract and never get reassigned.
    pub fn code(&self) -> u32 {
        match self {
            NetError::AddressResolution { .. } => 1,
            NetError::Connect { .. } => 2,
            NetError::Io(_) => 3,
            NetError::Timeout => 4,
            NetError::Parse(_) => 5,
            NetError::Protocol(_) => 6,
            NetError::BufferOverflow(_) => 7,
            NetError::InvalidUri(_) => 8,
            NetError::UnsupportedScheme(_) => 9,
            NetError::InvalidHeader(_) => 10,
            NetError::InvalidArgument(_) => 11,
            NetError::NotConnected => 12,
            NetError::Cancelled => 13,
        }
    }

    /// Whether this error is a timeout rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout)
    }
}
