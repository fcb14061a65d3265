//! End-to-end scenarios driving a real `Manager` over loopback TCP, plus a
//! handful of adversarial-input resilience checks. The manager always runs
//! on its own thread (it is only ever touched from its owner thread); test
//! bodies act as plain `std::net::TcpStream` clients, same as any other
//! consumer of this runtime would.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use manticore::connection::HandlerFn;
use manticore::http::{http_basic_auth, http_chunk, reply, reply_json};
use manticore::{Manager, MG_EV_HTTP_MSG, MG_EV_WAKEUP};

const POLL_TIMEOUT_MS: i64 = 25;
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns a manager with a single HTTP listener on an ephemeral loopback
/// port, driven by `handler`. Returns the port and a stop switch; dropping
/// the returned guard joins the manager thread.
struct Server {
    port: u16,
    stop: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn spawn_listener(handler: HandlerFn) -> Server {
    spawn_listener_with(move |manager| {
        manager.listen("http://127.0.0.1:0", Some(handler), None).unwrap()
    })
}

/// Generalized spawn: `setup` runs on the manager's owner thread and must
/// return the connection id whose `local_addr` the test will connect to.
fn spawn_listener_with(setup: impl FnOnce(&mut Manager) -> u64 + Send + 'static) -> Server {
    let (port_tx, port_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();

    let join = thread::spawn(move || {
        let mut manager = Manager::new(None, true, None).unwrap();
        let id = setup(&mut manager);
        let port = manager.local_addr(id).unwrap().port;
        port_tx.send(port).unwrap();

        loop {
            manager.poll(POLL_TIMEOUT_MS).unwrap();
            if stop_rx.try_recv().is_ok() {
                break;
            }
        }
    });

    let port = port_rx.recv_timeout(TEST_TIMEOUT).expect("listener never reported its port");
    Server { port, stop: stop_tx, join: Some(join) }
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(TEST_TIMEOUT)).unwrap();
    stream
}

fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[test]
fn http_200_echo() {
    let handler: HandlerFn = Arc::new(|h, code| {
        if code == MG_EV_HTTP_MSG {
            if let Some(req) = h.http() {
                if req.uri == "/test" {
                    h.write(&reply(200, b"OK", &[]));
                }
            }
        }
    });

    let server = spawn_listener(handler);
    let mut client = connect(server.port);
    client.write_all(b"GET /test HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let response = read_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 200"), "response: {response}");
    assert!(response.ends_with("OK"), "response: {response}");
}

#[test]
fn json_reply_round_trips() {
    let handler: HandlerFn = Arc::new(|h, code| {
        if code == MG_EV_HTTP_MSG {
            let value = serde_json::json!({"key": "value", "count": 42});
            h.write(&reply_json(&value, Some(200), &[]));
        }
    });

    let server = spawn_listener(handler);
    let mut client = connect(server.port);
    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let response = read_response(&mut client);
    assert!(response.contains("Content-Type: application/json"), "response: {response}");

    let body_start = response.find("\r\n\r\n").unwrap() + 4;
    let parsed: serde_json::Value = serde_json::from_str(&response[body_start..]).unwrap();
    assert_eq!(parsed["key"], "value");
    assert_eq!(parsed["count"], 42);
}

#[test]
fn basic_auth_header_matches_known_encoding() {
    let value = http_basic_auth("testuser", "testpass");
    assert_eq!(value, "Basic dGVzdHVzZXI6dGVzdHBhc3M=");
}

#[test]
fn chunked_three_part_stream_arrives_in_order() {
    let handler: HandlerFn = Arc::new(|h, code| {
        if code == MG_EV_HTTP_MSG {
            h.write(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
            h.write(&http_chunk(b"First"));
            h.write(&http_chunk(b"Second"));
            h.write(&http_chunk(b"Third"));
            h.write(&http_chunk(b""));
        }
    });

    let server = spawn_listener(handler);
    let mut client = connect(server.port);
    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }

    let body = String::from_utf8_lossy(&buf);
    let first = body.find("First").unwrap();
    let second = body.find("Second").unwrap();
    let third = body.find("Third").unwrap();
    assert!(first < second && second < third, "body: {body}");
}

#[test]
fn per_listener_handlers_stay_isolated() {
    let handler_a: HandlerFn = Arc::new(|h, code| {
        if code == MG_EV_HTTP_MSG {
            h.write(&reply(200, b"HandlerA", &[]));
        }
    });
    let handler_b: HandlerFn = Arc::new(|h, code| {
        if code == MG_EV_HTTP_MSG {
            h.write(&reply(200, b"HandlerB", &[]));
        }
    });

    let (port_tx, port_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();

    let join = thread::spawn(move || {
        let mut manager = Manager::new(None, false, None).unwrap();
        let id_a = manager.listen("http://127.0.0.1:0", Some(handler_a), None).unwrap();
        let id_b = manager.listen("http://127.0.0.1:0", Some(handler_b), None).unwrap();
        let port_a = manager.local_addr(id_a).unwrap().port;
        let port_b = manager.local_addr(id_b).unwrap().port;
        port_tx.send((port_a, port_b)).unwrap();

        loop {
            manager.poll(POLL_TIMEOUT_MS).unwrap();
            if stop_rx.try_recv().is_ok() {
                break;
            }
        }
    });

    let (port_a, port_b) = port_rx.recv_timeout(TEST_TIMEOUT).unwrap();

    let mut client_a = connect(port_a);
    client_a.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let response_a = read_response(&mut client_a);

    let mut client_b = connect(port_b);
    client_b.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let response_b = read_response(&mut client_b);

    let _ = stop_tx.send(());
    join.join().unwrap();

    assert!(response_a.ends_with("HandlerA"), "response_a: {response_a}");
    assert!(response_b.ends_with("HandlerB"), "response_b: {response_b}");
}

#[test]
fn cross_thread_wakeup_delivers_payload_once() {
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = received.clone();

    let handler: HandlerFn = Arc::new(move |h, code| {
        if code == MG_EV_WAKEUP {
            if let Some(data) = h.wakeup_data() {
                received_clone.lock().unwrap().push(data.to_vec());
            }
        }
    });

    let (waker_tx, waker_rx) = mpsc::channel();
    let (id_tx, id_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();

    let join = thread::spawn(move || {
        let mut manager = Manager::new(None, true, None).unwrap();
        let id = manager.listen("tcp://127.0.0.1:0", Some(handler), None).unwrap();
        id_tx.send(id).unwrap();
        waker_tx.send(manager.waker().unwrap()).unwrap();

        loop {
            manager.poll(POLL_TIMEOUT_MS).unwrap();
            if stop_rx.try_recv().is_ok() {
                break;
            }
        }
    });

    let id = id_rx.recv_timeout(TEST_TIMEOUT).unwrap();
    let waker = waker_rx.recv_timeout(TEST_TIMEOUT).unwrap();

    let background = thread::spawn(move || {
        waker.wakeup(id, b"ping".to_vec());
    });
    background.join().unwrap();

    let deadline = std::time::Instant::now() + TEST_TIMEOUT;
    loop {
        if !received.lock().unwrap().is_empty() || std::time::Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    let _ = stop_tx.send(());
    join.join().unwrap();

    let events = received.lock().unwrap();
    assert_eq!(*events, vec![b"ping".to_vec()]);
}

#[test]
fn malformed_request_line_closes_connection_without_panicking() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    let handler: HandlerFn = Arc::new(move |_h, code| {
        if code == MG_EV_HTTP_MSG {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    let server = spawn_listener(handler);
    let mut client = connect(server.port);
    client.write_all(b"GARBAGE\r\n\r\n").unwrap();

    let mut buf = [0u8; 16];
    // The server closes rather than crashing; either a clean EOF or an
    // error is an acceptable sign of life here, a hang is not.
    let _ = client.read(&mut buf);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn duplicate_content_length_is_tolerated_first_wins() {
    let seen_body_len = Arc::new(AtomicUsize::new(usize::MAX));
    let seen_clone = seen_body_len.clone();
    let handler: HandlerFn = Arc::new(move |h, code| {
        if code == MG_EV_HTTP_MSG {
            if let Some(req) = h.http() {
                seen_clone.store(req.body.len(), Ordering::SeqCst);
            }
            h.write(&reply(200, b"OK", &[]));
        }
    });

    let server = spawn_listener(handler);
    let mut client = connect(server.port);
    client
        .write_all(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\nabc",
        )
        .unwrap();

    let response = read_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 200"), "response: {response}");
    assert_eq!(seen_body_len.load(Ordering::SeqCst), 3);
}
