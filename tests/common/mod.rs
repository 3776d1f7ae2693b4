#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// One step of a scripted server connection.
pub enum Step {
    /// Read a request head up to and including the blank line.
    ReadHead,
    /// Read exactly this many bytes.
    ReadBytes(usize),
    Send(Vec<u8>),
    Pause(u64),
    /// Record whatever the client sends during this many milliseconds.
    Silence(u64),
    /// Append a marker to the received log.
    Mark(&'static str),
    /// Read until the client closes.
    ReadToEnd,
    /// Reset the connection instead of closing it cleanly.
    Reset,
}

pub fn send(bytes: &str) -> Step {
    Step::Send(bytes.as_bytes().to_vec())
}

/// What a scripted server saw.
#[derive(Clone, Default)]
pub struct ServerLog {
    pub accepted: Rc<Cell<usize>>,
    pub received: Rc<RefCell<Vec<u8>>>,
    pub finished: Rc<Cell<bool>>,
}

impl ServerLog {
    pub fn received_text(&self) -> String {
        String::from_utf8_lossy(&self.received.borrow()).into_owned()
    }
}

/// Serve one connection per script, in order, on a local task.
///
/// Must run inside `EventLoop::run_until`.
pub async fn scripted_server(scripts: Vec<Vec<Step>>) -> (SocketAddr, ServerLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = ServerLog::default();

    let server_log = log.clone();
    tokio::task::spawn_local(async move {
        for script in scripts {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            stream.set_nodelay(true).unwrap();
            server_log.accepted.set(server_log.accepted.get() + 1);
            run_script(&mut stream, script, &server_log).await;
        }
        server_log.finished.set(true);
    });

    (addr, log)
}

async fn run_script(stream: &mut TcpStream, script: Vec<Step>, log: &ServerLog) {
    for step in script {
        match step {
            Step::ReadHead => {
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    match stream.read(&mut byte).await {
                        Ok(1) => head.push(byte[0]),
                        _ => return,
                    }
                }
                log.received.borrow_mut().extend_from_slice(&head);
            }
            Step::ReadBytes(n) => {
                let mut body = vec![0u8; n];
                if stream.read_exact(&mut body).await.is_err() {
                    return;
                }
                log.received.borrow_mut().extend_from_slice(&body);
            }
            Step::Send(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Step::Pause(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            Step::Silence(ms) => {
                let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
                let mut chunk = [0u8; 4096];
                loop {
                    match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
                        Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                        Ok(Ok(n)) => log.received.borrow_mut().extend_from_slice(&chunk[..n]),
                    }
                }
            }
            Step::Mark(text) => log.received.borrow_mut().extend_from_slice(text.as_bytes()),
            Step::ReadToEnd => {
                let mut rest = Vec::new();
                let _ = stream.read_to_end(&mut rest).await;
                log.received.borrow_mut().extend_from_slice(&rest);
            }
            Step::Reset => {
                #[allow(deprecated)]
                let _ = stream.set_linger(Some(Duration::ZERO));
                return;
            }
        }
    }
}

/// Poll `cond` until it holds or `limit` passes. Returns the final value.
pub async fn wait_for(cond: impl Fn() -> bool, limit: Duration) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > limit {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    true
}

/// A connected socket pair on loopback: (local end, peer end).
pub async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (local, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let peer = accepted.unwrap().0;
    peer.set_nodelay(true).unwrap();
    (local.unwrap(), peer)
}

/// A plain thread serving one canned response, for the blocking client API.
pub fn blocking_server(response: Vec<u8>) -> SocketAddr {
    blocking_server_after(Duration::ZERO, response)
}

/// Like [`blocking_server`], but waits `delay` after the request before answering.
pub fn blocking_server_after(delay: Duration, response: Vec<u8>) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(1) => head.push(byte[0]),
                _ => return,
            }
        }
        std::thread::sleep(delay);
        let _ = stream.write_all(&response);
        std::thread::sleep(Duration::from_millis(200));
    });

    addr
}

/// A local address with nothing listening on it.
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
