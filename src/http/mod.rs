//! HTTP/1.1 client protocol.
//!
//! The HTTP layer sits on top of [`Connection`](crate::net::Connection) and
//! turns its byte-level events into protocol events.
//!
//! # Architecture
//!
//! - **`client`**: the request/response state machine and the blocking `get`
//! - **`event`**: events reported to the client's owner
//! - **`headers`**: request header list and field validation
//! - **`parser`**: status line, header line and chunk size parsing
//! - **`request`**: request line and header block encoding
//! - **`response`**: status line type and response header bookkeeping
//!
//! # Protocol State Machine
//!
//! ```text
//!        ┌───────────────┐
//!        │ SentRequest   │ ← request written; 1xx loops back here
//!        └──────┬────────┘
//!               │ status line
//!               ▼
//!        ┌───────────────┐
//!        │ RecvHeaders   │ ← header lines until the blank line
//!        └──────┬────────┘
//!               ├─ chunked ──────► RecvChunkSize ⇄ RecvChunkBody
//!               │                        │ size 0
//!               │                        ▼
//!               │                  RecvTrailers  (blank line, close or timeout)
//!               │                        │
//!               ├─ length / close ─► RecvBodyNonchunked
//!               ▼                        │
//!        ┌───────────────┐               │
//!        │     Done      │ ◄─────────────┘
//!        └──────┬────────┘
//!               ├─ redirect recorded → SentRequest (new URI)
//!               └─ DataComplete
//! ```
//!
//! Any state moves to `Error` on malformed input, a socket error or a timeout.

pub mod client;
pub mod event;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;

pub use client::{CancelHandle, HttpClient, ProtocolStatus, get};
pub use event::HttpEvent;
pub use headers::HeaderList;
pub use request::Method;
