//! Hostname resolution.
//!
//! Resolution is the only part of the stack that may leave the loop thread:
//! [`SystemResolver`] hands the lookup to tokio's blocking pool and the result
//! comes back into the loop as an ordinary future.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;

/// Future returned by [`Resolver::resolve`].
pub type ResolveFuture = Pin<Box<dyn Future<Output = io::Result<SocketAddr>>>>;

/// Turns a hostname and port into one socket address.
pub trait Resolver {
    fn resolve(&self, host: &str, port: u16) -> ResolveFuture;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> ResolveFuture {
        let host = host.to_string();
        Box::pin(async move {
            let mut addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
            addrs.next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {host}"))
            })
        })
    }
}

/// Resolver answering from a fixed table, like an `/etc/hosts` override.
///
/// Names missing from the table fail with `NotFound`.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, ip: IpAddr) -> Self {
        self.insert(host, ip);
        self
    }

    pub fn insert(&mut self, host: impl Into<String>, ip: IpAddr) {
        self.hosts.insert(host.into().to_ascii_lowercase(), ip);
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str, port: u16) -> ResolveFuture {
        let result = self
            .hosts
            .get(&host.to_ascii_lowercase())
            .map(|ip| SocketAddr::new(*ip, port))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}")));
        Box::pin(async move { result })
    }
}
