mod common;

use std::cell::{Cell, RefCell};
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

use evnet::NetError;
use evnet::event_loop::EventLoop;
use evnet::io::ReadOptions;
use evnet::net::{ConnEvent, ConnStatus, Connection, StaticResolver};

use tokio::io::AsyncWriteExt;

use common::{Step, closed_port, init_tracing, scripted_server, send, socket_pair, wait_for};

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Connect,
    Close,
    Read(Vec<u8>),
    Write,
    Timeout,
    Error(u32),
}

type Log = Rc<RefCell<Vec<Seen>>>;

fn recorder(log: &Log) -> impl FnMut(ConnEvent<'_>) + 'static {
    let log = log.clone();
    move |event| {
        let seen = match event {
            ConnEvent::Connect => Seen::Connect,
            ConnEvent::Close => Seen::Close,
            ConnEvent::Read(data) => Seen::Read(data.to_vec()),
            ConnEvent::Write => Seen::Write,
            ConnEvent::Timeout => Seen::Timeout,
            ConnEvent::Error(e) => Seen::Error(e.code()),
        };
        log.borrow_mut().push(seen);
    }
}

fn count(log: &Log, seen: &Seen) -> usize {
    log.borrow().iter().filter(|s| *s == seen).count()
}

#[test]
fn test_writes_queued_before_connect_arrive_in_order() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (addr, server) = scripted_server(vec![vec![Step::ReadToEnd]]).await;
        let log: Log = Rc::default();
        let conn = Connection::with_addr(addr, recorder(&log));

        let parts: Vec<Vec<u8>> = [b'1', b'2', b'3']
            .iter()
            .map(|&b| vec![b; 200 * 1024])
            .collect();
        for part in &parts {
            conn.write(part.clone(), None);
        }
        assert_eq!(conn.pending_writes(), 3);
        conn.connect(None);

        let seen = log.clone();
        assert!(wait_for(|| count(&seen, &Seen::Write) == 3, Duration::from_secs(5)).await);
        assert_eq!(log.borrow()[0], Seen::Connect);
        assert_eq!(conn.pending_writes(), 0);

        drop(conn);
        let done = server.clone();
        assert!(wait_for(|| done.finished.get(), Duration::from_secs(5)).await);
        assert_eq!(*server.received.borrow(), parts.concat());
    });
}

#[test]
fn test_connect_refused_reports_error_and_stays_idle() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let log: Log = Rc::default();
        let conn = Connection::with_addr(closed_port(), recorder(&log));
        conn.connect(Some(Duration::from_secs(2)));
        assert_eq!(conn.status(), ConnStatus::Connecting);

        let seen = log.clone();
        assert!(wait_for(|| !seen.borrow().is_empty(), Duration::from_secs(5)).await);
        assert!(matches!(log.borrow()[0], Seen::Error(2)), "{:?}", log.borrow());
        assert_eq!(conn.status(), ConnStatus::Idle);
    });
}

#[test]
fn test_hostname_goes_through_resolver() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (addr, _server) = scripted_server(vec![vec![Step::Pause(500)]]).await;
        let resolver = Rc::new(StaticResolver::new().with_host("service.test", IpAddr::V4(Ipv4Addr::LOCALHOST)));

        let log: Log = Rc::default();
        let conn = Connection::new("service.test", addr.port(), recorder(&log));
        conn.set_resolver(resolver.clone());
        conn.connect(None);
        assert_eq!(conn.status(), ConnStatus::Resolving);

        let seen = log.clone();
        assert!(wait_for(|| !seen.borrow().is_empty(), Duration::from_secs(5)).await);
        assert_eq!(*log.borrow(), vec![Seen::Connect]);
        assert!(conn.is_connected());
        assert_eq!(conn.peer_addr(), Some(addr));

        let failed: Log = Rc::default();
        let unknown = Connection::new("missing.test", addr.port(), recorder(&failed));
        unknown.set_resolver(resolver);
        unknown.connect(None);
        let seen = failed.clone();
        assert!(wait_for(|| !seen.borrow().is_empty(), Duration::from_secs(5)).await);
        assert_eq!(*failed.borrow(), vec![Seen::Error(1)]);
        assert_eq!(unknown.status(), ConnStatus::Idle);
    });
}

#[test]
fn test_lines_then_close() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (addr, _server) = scripted_server(vec![vec![send("hello\nworld\n")]]).await;
        let log: Log = Rc::default();
        let status_at_close = Rc::new(Cell::new(None));

        let holder: Rc<RefCell<Option<Connection>>> = Rc::default();
        let mut record = recorder(&log);
        let conn_slot = holder.clone();
        let status_slot = status_at_close.clone();
        let conn = Connection::with_addr(addr, move |event| {
            let closing = matches!(event, ConnEvent::Close);
            let connected = matches!(event, ConnEvent::Connect);
            record(event);
            if let Some(conn) = conn_slot.borrow().as_ref() {
                if connected {
                    conn.read_line().unwrap();
                }
                if closing {
                    status_slot.set(Some(conn.status()));
                }
            }
        });
        conn.connect(None);
        *holder.borrow_mut() = Some(conn);

        let seen = log.clone();
        assert!(wait_for(|| seen.borrow().contains(&Seen::Close), Duration::from_secs(5)).await);
        assert_eq!(
            *log.borrow(),
            vec![
                Seen::Connect,
                Seen::Read(b"hello\n".to_vec()),
                Seen::Read(b"world\n".to_vec()),
                Seen::Close,
            ]
        );
        assert_eq!(status_at_close.get(), Some(ConnStatus::Closed));
        holder.borrow_mut().take();
    });
}

#[test]
fn test_switching_reads_keeps_buffered_bytes() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (addr, _server) =
            scripted_server(vec![vec![send("HEAD 4\nbodyNEXT\n"), Step::Pause(500)]]).await;
        let log: Log = Rc::default();

        let holder: Rc<RefCell<Option<Connection>>> = Rc::default();
        let mut record = recorder(&log);
        let conn_slot = holder.clone();
        let conn = Connection::with_addr(addr, move |event| {
            let next = match &event {
                ConnEvent::Connect => Some(0),
                ConnEvent::Read(line) if line.starts_with(b"HEAD") => Some(4),
                ConnEvent::Read(_) => Some(0),
                _ => None,
            };
            record(event);
            if let (Some(n), Some(conn)) = (next, conn_slot.borrow().as_ref()) {
                if n > 0 {
                    conn.read_exact(n).unwrap();
                } else {
                    conn.read_line().unwrap();
                }
            }
        });
        conn.connect(None);
        *holder.borrow_mut() = Some(conn);

        let seen = log.clone();
        assert!(wait_for(|| seen.borrow().len() == 4, Duration::from_secs(5)).await);
        assert_eq!(
            *log.borrow(),
            vec![
                Seen::Connect,
                Seen::Read(b"HEAD 4\n".to_vec()),
                Seen::Read(b"body".to_vec()),
                Seen::Read(b"NEXT\n".to_vec()),
            ]
        );
        holder.borrow_mut().take();
    });
}

#[test]
fn test_drop_inside_callback_is_deferred() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (addr, server) =
            scripted_server(vec![vec![send("one\ntwo\nthree\n"), Step::ReadToEnd]]).await;
        let log: Log = Rc::default();

        let holder: Rc<RefCell<Option<Connection>>> = Rc::default();
        let mut record = recorder(&log);
        let conn_slot = holder.clone();
        let conn = Connection::with_addr(addr, move |event| {
            let connected = matches!(event, ConnEvent::Connect);
            let read = matches!(event, ConnEvent::Read(_));
            record(event);
            if connected {
                if let Some(conn) = conn_slot.borrow().as_ref() {
                    conn.read_line().unwrap();
                }
            }
            if read {
                let conn = conn_slot.borrow_mut().take();
                drop(conn);
            }
        });
        conn.connect(None);
        *holder.borrow_mut() = Some(conn);

        // the server only finishes once the released connection closes its socket
        let done = server.clone();
        assert!(wait_for(|| done.finished.get(), Duration::from_secs(5)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*log.borrow(), vec![Seen::Connect, Seen::Read(b"one\n".to_vec())]);
        assert!(holder.borrow().is_none());
    });
}

#[test]
fn test_idle_timer_reports_timeout_and_keeps_connection() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (addr, _server) = scripted_server(vec![vec![Step::Pause(1000)]]).await;
        let log: Log = Rc::default();
        let conn = Connection::with_addr(addr, recorder(&log));
        conn.connect(None);

        let seen = log.clone();
        assert!(wait_for(|| !seen.borrow().is_empty(), Duration::from_secs(5)).await);
        conn.set_timeout(Some(Duration::from_millis(50)));

        let seen = log.clone();
        assert!(wait_for(|| seen.borrow().len() == 2, Duration::from_secs(5)).await);
        assert_eq!(*log.borrow(), vec![Seen::Connect, Seen::Timeout]);
        assert!(conn.is_connected());

        conn.set_timeout(Some(Duration::from_millis(50)));
        conn.set_timeout(None);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count(&log, &Seen::Timeout), 1);
    });
}

#[test]
fn test_read_requires_connection() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let log: Log = Rc::default();
        let conn = Connection::with_addr(closed_port(), recorder(&log));
        assert!(matches!(conn.read_line(), Err(NetError::NotConnected)));

        conn.disconnect();
        assert_eq!(conn.status(), ConnStatus::Idle);
    });
}

#[test]
fn test_accepted_stream_reads_with_configured_limit() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (local, mut peer) = socket_pair().await;
        let log: Log = Rc::default();
        let conn = Connection::from_stream(local, recorder(&log)).unwrap();
        assert!(conn.is_connected());
        assert!(conn.peer_addr().is_some());

        conn.set_read_options(ReadOptions::with_max_len(4));
        conn.read_any().unwrap();
        peer.write_all(b"abcdefgh").await.unwrap();

        let seen = log.clone();
        let total = move || {
            seen.borrow()
                .iter()
                .map(|s| match s {
                    Seen::Read(data) => data.len(),
                    _ => 0,
                })
                .sum::<usize>()
        };
        assert!(wait_for(|| total() == 8, Duration::from_secs(5)).await);
        let mut joined = Vec::new();
        for seen in log.borrow().iter() {
            let Seen::Read(data) = seen else {
                panic!("unexpected event {seen:?}");
            };
            assert!(data.len() <= 4);
            joined.extend_from_slice(data);
        }
        assert_eq!(joined, b"abcdefgh");

        let second: Log = Rc::default();
        conn.set_callback(recorder(&second));
        peer.write_all(b"xy").await.unwrap();
        let seen = second.clone();
        assert!(wait_for(|| !seen.borrow().is_empty(), Duration::from_secs(5)).await);
        assert_eq!(*second.borrow(), vec![Seen::Read(b"xy".to_vec())]);
        assert!(log.borrow().len() >= 2);
    });
}

#[test]
fn test_read_exact_rejects_zero_length() {
    init_tracing();
    let ev = EventLoop::new().unwrap();

    ev.run_until(async {
        let (local, _peer) = socket_pair().await;
        let log: Log = Rc::default();
        let conn = Connection::from_stream(local, recorder(&log)).unwrap();

        let err = conn.read_exact(0).unwrap_err();
        assert!(matches!(err, NetError::InvalidArgument(_)));
        assert!(conn.read_exact(1).is_ok());
        assert!(conn.is_connected());
    });
}
