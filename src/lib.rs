//! evnet - event-driven networking
//!
//! Async read/write primitives with completion predicates, connections that
//! report resolve, connect, I/O and timeouts as one event stream, and an
//! HTTP/1.1 client state machine built on them.

pub mod config;
pub mod error;
pub mod event_loop;
pub mod http;
pub mod io;
pub mod net;

pub use error::NetError;
pub use event_loop::EventLoop;
