//! The event manager: the single poll loop tying together the connection
//! table, timer wheel, wakeup mailbox and protocol dispatch.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use slab::Slab;

use crate::buffer::Buffer;
use crate::connection::{Addr, Connection, ConnectionHandle, ConnectionId, HandlerFn, Protocol};
use crate::epoll::{Epoll, EpollOpt, Event, Events, Ready, Source, Token};
use crate::error::{ManagerError, ManagerResult};
use crate::event::*;
use crate::http;
use crate::net::{tcp, udp};
use crate::timer::{Timer, TimerId};
use crate::url::{Scheme, Url};
use crate::wakeup::Mailbox;
use crate::ws;

const READ_CHUNK: usize = 16 * 1024;

enum Socket {
    TcpListener(tcp::TcpListener),
    TcpStream(tcp::TcpStream),
    Udp(udp::UdpSocket),
}

impl Socket {
    fn register(&self, epoll: &Epoll, token: Token) -> io::Result<()> {
        let interest = Ready::readable();
        let opts = EpollOpt::edge();
        match self {
            Socket::TcpListener(s) => epoll.add(s, token, interest, opts),
            Socket::TcpStream(s) => epoll.add(s, token, interest | Ready::writable(), opts),
            Socket::Udp(s) => epoll.add(s, token, interest, opts),
        }
    }

    fn deregister(&self, epoll: &Epoll) -> io::Result<()> {
        match self {
            Socket::TcpListener(s) => epoll.delete(s),
            Socket::TcpStream(s) => epoll.delete(s),
            Socket::Udp(s) => epoll.delete(s),
        }
    }
}

type ErrorHandler = Arc<dyn Fn(ConnectionId, &str) + Send + Sync>;
type TimerCallback = Arc<dyn Fn() + Send + Sync>;

pub struct Manager {
    epoll: Epoll,
    connections: Slab<Connection>,
    sockets: Slab<Socket>,
    id_to_slot: IndexMap<ConnectionId, usize>,
    next_id: ConnectionId,
    default_handler: Option<HandlerFn>,
    error_handler: Option<ErrorHandler>,
    timers: Timer,
    timer_callbacks: std::collections::HashMap<TimerId, TimerCallback>,
    mailbox: Option<Mailbox>,
    closed: bool,
    owner_thread: ThreadId,
    in_poll: bool,
}

impl Manager {
    pub fn new(
        default_handler: Option<HandlerFn>,
        enable_wakeup: bool,
        error_handler: Option<ErrorHandler>,
    ) -> io::Result<Manager> {
        let mailbox = if enable_wakeup { Some(Mailbox::new()?) } else { None };

        let mut manager = Manager {
            epoll: Epoll::new()?,
            connections: Slab::new(),
            sockets: Slab::new(),
            id_to_slot: IndexMap::new(),
            next_id: 1,
            default_handler,
            error_handler,
            timers: Timer::new(),
            timer_callbacks: std::collections::HashMap::new(),
            mailbox,
            closed: false,
            owner_thread: thread::current().id(),
            in_poll: false,
        };

        if let Some(mailbox) = manager.mailbox.take() {
            manager.epoll.add(mailbox.queue(), Token(usize::MAX), Ready::readable(), EpollOpt::edge())?;
            manager.mailbox = Some(mailbox);
        }

        Ok(manager)
    }

    fn check_owner(&self) -> ManagerResult<()> {
        if thread::current().id() != self.owner_thread {
            return Err(ManagerError::ForeignThread);
        }
        Ok(())
    }

    fn alloc_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn scheme_to_protocol(scheme: Scheme, http_override: Option<bool>) -> (Protocol, bool, bool) {
        let http_on = http_override.unwrap_or_else(|| scheme.infers_http());
        let protocol = if http_on { Protocol::Http } else { Protocol::Raw };
        (protocol, scheme.is_udp(), scheme.is_tls())
    }

    /// Binds and listens on `url`. Scheme inference follows §4.1: `http`,
    /// `https`, `ws`, `wss` turn the HTTP protocol on by default; `tcp`,
    /// `udp`, `mqtt` leave it off. `http` overrides the inference either way.
    pub fn listen(
        &mut self,
        url: &str,
        handler: Option<HandlerFn>,
        http: Option<bool>,
    ) -> ManagerResult<ConnectionId> {
        self.check_owner()?;
        if self.closed {
            return Err(ManagerError::Closed);
        }

        let parsed = Url::parse(url)?;
        let (protocol, is_udp, is_tls) = Self::scheme_to_protocol(parsed.scheme, http);

        let id = self.alloc_id();
        let mut conn = Connection::new(id, protocol);
        conn.flags.is_listening = true;
        conn.flags.is_udp = is_udp;
        conn.flags.is_tls = is_tls;
        conn.handler = handler;

        let socket = if is_udp {
            let sock = udp::UdpSocket::bind(parsed.addr())
                .map_err(|_| ManagerError::InvalidUrl(url.to_string()))?;
            conn.local_addr = sock.local_addr().ok().map(Addr::from);
            Socket::Udp(sock)
        } else {
            let listener = tcp::TcpListener::bind(parsed.addr())
                .map_err(|_| ManagerError::InvalidUrl(url.to_string()))?;
            conn.local_addr = listener.local_addr().ok().map(Addr::from);
            Socket::TcpListener(listener)
        };

        self.insert_connection(conn, socket)
    }

    /// Non-blocking connect with the same scheme-inference rule as `listen`.
    ///
    /// `std::net::TcpStream::connect` has no asynchronous variant without a
    /// raw-socket dependency this crate doesn't carry, so the connect itself
    /// completes synchronously before the socket is switched to
    /// non-blocking and registered; `MG_EV_CONNECT` fires on the first poll
    /// tick after registration rather than genuinely overlapping with other
    /// I/O. See `DESIGN.md` for the tradeoff.
    pub fn connect(
        &mut self,
        url: &str,
        handler: Option<HandlerFn>,
        http: Option<bool>,
    ) -> ManagerResult<ConnectionId> {
        self.check_owner()?;
        if self.closed {
            return Err(ManagerError::Closed);
        }

        let parsed = Url::parse(url)?;
        let (protocol, is_udp, is_tls) = Self::scheme_to_protocol(parsed.scheme, http);

        let id = self.alloc_id();
        let mut conn = Connection::new(id, protocol);
        conn.flags.is_client = true;
        conn.flags.is_udp = is_udp;
        conn.flags.is_tls = is_tls;
        conn.handler = handler;

        let socket = if is_udp {
            let sock = udp::UdpSocket::bind("0.0.0.0:0")
                .map_err(|_| ManagerError::InvalidUrl(url.to_string()))?;
            sock.connect(parsed.addr()).map_err(|_| ManagerError::InvalidUrl(url.to_string()))?;
            conn.local_addr = sock.local_addr().ok().map(Addr::from);
            Socket::Udp(sock)
        } else {
            let stream = tcp::TcpStream::connect(parsed.addr())
                .map_err(|_| ManagerError::InvalidUrl(url.to_string()))?;
            conn.local_addr = stream.local_addr().ok().map(Addr::from);
            conn.remote_addr = stream.peer_addr().ok().map(Addr::from);
            Socket::TcpStream(stream)
        };

        let id = self.insert_connection(conn, socket)?;
        self.dispatch(id, MG_EV_CONNECT);
        Ok(id)
    }

    pub fn mqtt_listen(&mut self, url: &str, handler: Option<HandlerFn>) -> ManagerResult<ConnectionId> {
        let id = self.listen(url, handler, Some(false))?;
        if let Some(&slot) = self.id_to_slot.get(&id) {
            self.connections[slot].protocol = crate::mqtt::protocol();
        }
        Ok(id)
    }

    pub fn mqtt_connect(&mut self, url: &str, handler: Option<HandlerFn>) -> ManagerResult<ConnectionId> {
        let id = self.connect(url, handler, Some(false))?;
        if let Some(&slot) = self.id_to_slot.get(&id) {
            self.connections[slot].protocol = crate::mqtt::protocol();
        }
        Ok(id)
    }

    pub fn sntp_connect(&mut self, url: &str, handler: Option<HandlerFn>) -> ManagerResult<ConnectionId> {
        let id = self.connect(url, handler, Some(false))?;
        if let Some(&slot) = self.id_to_slot.get(&id) {
            self.connections[slot].protocol = crate::sntp::protocol();
        }
        Ok(id)
    }

    fn insert_connection(&mut self, conn: Connection, socket: Socket) -> ManagerResult<ConnectionId> {
        let id = conn.id;
        let slot = self.connections.insert(conn);
        let sock_slot = self.sockets.insert(socket);
        debug_assert_eq!(slot, sock_slot, "connection and socket slabs must stay in lockstep");

        self.sockets[sock_slot]
            .register(&self.epoll, Token(slot))
            .map_err(|_| ManagerError::InvalidUrl("registration failed".to_string()))?;

        self.id_to_slot.insert(id, slot);
        self.dispatch(id, MG_EV_OPEN);
        Ok(id)
    }

    /// Inserts a timer. `run_now` fires the callback once on the first poll
    /// tick independently of `interval_ms`.
    pub fn timer_add(
        &mut self,
        interval_ms: u64,
        callback: TimerCallback,
        repeat: bool,
        run_now: bool,
    ) -> TimerId {
        let id = self.timers.insert(interval_ms, repeat, run_now);
        self.timer_callbacks.insert(id, callback);
        id
    }

    pub fn timer_remove(&mut self, id: TimerId) {
        self.timers.remove(id);
        self.timer_callbacks.remove(&id);
    }

    /// Safe from any thread. Appends to the wakeup mailbox and flips the
    /// self-pipe readable; never touches connection state directly.
    pub fn wakeup(&self, connection_id: ConnectionId, payload: Vec<u8>) {
        if let Some(mailbox) = &self.mailbox {
            mailbox.send(connection_id, payload);
        }
    }

    /// A cloneable handle for calling `wakeup` from a thread other than the
    /// owner thread, which cannot hold a reference to the `Manager` itself
    /// while the owner thread is mutating it inside `poll`. `None` if the
    /// manager was built with wakeup disabled.
    pub fn waker(&self) -> Option<crate::wakeup::WakeupHandle> {
        self.mailbox.clone().map(crate::wakeup::WakeupHandle::new)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|(_, c)| c.id).collect()
    }

    pub fn local_addr(&self, id: ConnectionId) -> Option<Addr> {
        let slot = *self.id_to_slot.get(&id)?;
        self.connections.get(slot)?.local_addr.clone()
    }

    pub fn remote_addr(&self, id: ConnectionId) -> Option<Addr> {
        let slot = *self.id_to_slot.get(&id)?;
        self.connections.get(slot)?.remote_addr.clone()
    }

    pub fn user_data<T: std::any::Any>(&self, id: ConnectionId) -> Option<&T> {
        let slot = *self.id_to_slot.get(&id)?;
        self.connections.get(slot)?.user_data()
    }

    pub fn set_user_data<T: std::any::Any + Send>(&mut self, id: ConnectionId, data: T) {
        if let Some(&slot) = self.id_to_slot.get(&id) {
            if let Some(conn) = self.connections.get_mut(slot) {
                conn.set_user_data(data);
            }
        }
    }

    fn resolve_handler(&self, slot: usize) -> Option<HandlerFn> {
        let conn = self.connections.get(slot)?;

        if let Some(h) = &conn.handler {
            return Some(h.clone());
        }

        if let Some(parent_id) = conn.parent_listener {
            if let Some(&parent_slot) = self.id_to_slot.get(&parent_id) {
                if let Some(parent) = self.connections.get(parent_slot) {
                    if let Some(h) = &parent.handler {
                        return Some(h.clone());
                    }
                }
            }
        }

        self.default_handler.clone()
    }

    fn dispatch(&mut self, id: ConnectionId, code: i32) {
        let slot = match self.id_to_slot.get(&id) {
            Some(&s) => s,
            None => return,
        };

        let handler = self.resolve_handler(slot);

        if let Some(handler) = handler {
            if let Some(conn) = self.connections.get_mut(slot) {
                let mut handle = ConnectionHandle { conn };
                handler(&mut handle, code);
            }
        }

        if let Some(conn) = self.connections.get_mut(slot) {
            conn.pending_wakeup = None;
            conn.pending_error = None;
        }
    }

    fn emit_error(&mut self, id: ConnectionId, message: String) {
        if let Some(handler) = &self.error_handler {
            handler(id, &message);
        }

        if let Some(&slot) = self.id_to_slot.get(&id) {
            if let Some(conn) = self.connections.get_mut(slot) {
                conn.pending_error = Some(message);
            }
        }

        self.dispatch(id, MG_EV_ERROR);
    }

    /// Services one poll tick: timers, then wakeups, then socket I/O, then
    /// the `MG_EV_POLL` broadcast, then reaping closed connections.
    pub fn poll(&mut self, timeout_ms: i64) -> ManagerResult<()> {
        self.check_owner()?;

        if self.closed {
            return Err(ManagerError::Closed);
        }

        if self.in_poll {
            return Err(ManagerError::PollReentrant);
        }

        self.in_poll = true;
        let result = self.poll_inner(timeout_ms);
        self.in_poll = false;
        result
    }

    fn poll_inner(&mut self, timeout_ms: i64) -> ManagerResult<()> {
        let now = Instant::now();
        let mut wait = if timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        };

        if let Some(deadline) = self.timers.next_deadline() {
            let until = deadline.saturating_duration_since(now);
            wait = Some(match wait {
                Some(w) => w.min(until),
                None => until,
            });
        }

        let mut events = Events::with_capacity(256);
        self.epoll
            .wait(&mut events, wait)
            .map_err(|_| ManagerError::InvalidUrl("poll failed".to_string()))?;

        // 1. timers
        let fired = self.timers.expire_due(Instant::now());
        for timer_id in fired {
            if let Some(cb) = self.timer_callbacks.get(&timer_id).cloned() {
                cb();
            }
        }

        // 2. wakeups
        if let Some(mailbox) = &self.mailbox {
            let records = mailbox.drain();
            for (conn_id, payload) in records {
                if let Some(&slot) = self.id_to_slot.get(&conn_id) {
                    if let Some(conn) = self.connections.get_mut(slot) {
                        conn.pending_wakeup = Some(payload);
                    }
                    self.dispatch(conn_id, MG_EV_WAKEUP);
                }
                // miss: dropped without error, per the wakeup mailbox contract.
            }
        }

        // 3. socket I/O
        for event in events.iter() {
            self.service_socket(event);
        }

        // 3b. flush any connection with pending output. Sockets are
        // registered edge-triggered, so the writable edge only fires once
        // right after accept/connect; a response queued on a readable-only
        // tick (a second keep-alive request, a wakeup- or timer-driven
        // reply) would otherwise sit in `send` forever. Mirrors the
        // per-tick flush the original does unconditionally.
        let pending_writes: Vec<(usize, ConnectionId)> = self
            .connections
            .iter()
            .filter(|(_, c)| c.flags.is_writable && !c.send.is_empty())
            .map(|(slot, c)| (slot, c.id))
            .collect();
        for (slot, id) in pending_writes {
            self.flush_socket(slot, id);
        }

        // 4. MG_EV_POLL broadcast
        let ids: Vec<ConnectionId> = self.connections.iter().map(|(_, c)| c.id).collect();
        for id in ids {
            self.dispatch(id, MG_EV_POLL);
        }

        // 5. reap
        self.reap();

        Ok(())
    }

    fn service_socket(&mut self, event: Event) {
        let token = event.token();
        if token == Token(usize::MAX) {
            return; // the wakeup mailbox's own eventfd; handled separately above.
        }

        let slot = token.0;
        let id = match self.connections.get(slot) {
            Some(conn) => conn.id,
            None => return,
        };

        let is_listening = self.connections[slot].flags.is_listening;

        if is_listening {
            self.accept_loop(slot, id);
            return;
        }

        if event.readiness().is_readable() {
            self.read_socket(slot, id);
        }

        if event.readiness().is_writable() {
            self.flush_socket(slot, id);
        }
    }

    fn accept_loop(&mut self, listener_slot: usize, listener_id: ConnectionId) {
        loop {
            let accepted = match self.sockets.get(listener_slot) {
                Some(Socket::TcpListener(l)) => l.accept(),
                _ => return,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let (protocol, handler) = {
                        let parent = &self.connections[listener_slot];
                        (parent.protocol, parent.handler.clone())
                    };

                    let id = self.alloc_id();
                    let mut conn = Connection::new(id, protocol);
                    conn.parent_listener = Some(listener_id);
                    conn.handler = handler;
                    conn.local_addr = stream.local_addr().ok().map(Addr::from);
                    conn.remote_addr = Some(Addr::from(peer));

                    let slot = self.connections.insert(conn);
                    let sock_slot = self.sockets.insert(Socket::TcpStream(stream));
                    debug_assert_eq!(slot, sock_slot);

                    if self.sockets[sock_slot].register(&self.epoll, Token(slot)).is_err() {
                        self.connections.remove(slot);
                        self.sockets.remove(sock_slot);
                        continue;
                    }

                    self.id_to_slot.insert(id, slot);
                    self.dispatch(id, MG_EV_ACCEPT);
                    self.dispatch(id, MG_EV_OPEN);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.emit_error(listener_id, e.to_string());
                    break;
                }
            }
        }
    }

    fn read_socket(&mut self, slot: usize, id: ConnectionId) {
        let is_udp = self.connections[slot].flags.is_udp;

        if is_udp {
            self.read_udp(slot, id);
            return;
        }

        loop {
            let conn = &mut self.connections[slot];
            conn.recv.reserve(READ_CHUNK);
            let spare = conn.recv.spare_mut();

            let read_result = match self.sockets.get_mut(slot) {
                Some(Socket::TcpStream(s)) => s.read(spare),
                _ => return,
            };

            match read_result {
                Ok(0) => {
                    self.connections[slot].flags.is_closing = true;
                    break;
                }
                Ok(n) => unsafe {
                    self.connections[slot].recv.advance_mut(n);
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.emit_error(id, e.to_string());
                    self.connections[slot].flags.is_closing = true;
                    break;
                }
            }
        }

        self.dispatch(id, MG_EV_READ);
        self.drain_protocol_messages(slot, id);
    }

    fn read_udp(&mut self, slot: usize, id: ConnectionId) {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let recv_result = match self.sockets.get(slot) {
                Some(Socket::Udp(s)) => s.recv(&mut buf),
                _ => return,
            };

            match recv_result {
                Ok(n) => {
                    let conn = &mut self.connections[slot];
                    conn.recv.clear();
                    conn.recv.extend(&buf[..n]);
                    self.dispatch(id, MG_EV_READ);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.emit_error(id, e.to_string());
                    break;
                }
            }
        }
    }

    fn drain_protocol_messages(&mut self, slot: usize, id: ConnectionId) {
        loop {
            let protocol = self.connections[slot].protocol;
            let is_websocket = self.connections[slot].flags.is_websocket;

            if is_websocket {
                let outcome = ws::decode_frame(self.connections[slot].recv.as_slice());
                match outcome {
                    Ok(ws::WsOutcome::Complete { view, consumed }) => {
                        let code = if view.opcode.is_control() { MG_EV_WS_CTL } else { MG_EV_WS_MSG };
                        self.dispatch(id, code);
                        self.connections[slot].recv.consume(consumed);
                    }
                    Ok(ws::WsOutcome::Incomplete) => break,
                    Err(_) => {
                        self.connections[slot].flags.is_closing = true;
                        break;
                    }
                }
                continue;
            }

            if protocol == Protocol::Http {
                if !self.connections[slot].headers_seen
                    && http::headers_complete(self.connections[slot].recv.as_slice())
                {
                    self.connections[slot].headers_seen = true;
                    self.dispatch(id, MG_EV_HTTP_HDRS);
                }

                let outcome = http::parse_request(self.connections[slot].recv.as_slice());
                match outcome {
                    Ok(http::ParseOutcome::Complete { view, consumed }) => {
                        let is_upgrade = ws::upgrade_response(&view).is_some();
                        self.dispatch(id, MG_EV_HTTP_MSG);
                        self.connections[slot].recv.consume(consumed);
                        self.connections[slot].headers_seen = false;

                        if is_upgrade && self.connections[slot].flags.is_websocket {
                            self.dispatch(id, MG_EV_WS_OPEN);
                        }
                    }
                    Ok(http::ParseOutcome::Incomplete) => break,
                    Err(_) => {
                        self.connections[slot].flags.is_closing = true;
                        break;
                    }
                }
                continue;
            }

            // Raw/MQTT/SNTP: no protocol framing is decoded here; the
            // handler already saw `MG_EV_READ` with the buffer available
            // via `ConnectionHandle::data`.
            break;
        }
    }

    fn flush_socket(&mut self, slot: usize, id: ConnectionId) {
        loop {
            let pending = self.connections[slot].send.as_slice().to_vec();
            if pending.is_empty() {
                break;
            }

            let write_result = match self.sockets.get_mut(slot) {
                Some(Socket::TcpStream(s)) => s.write(&pending),
                Some(Socket::Udp(s)) => s.send(&pending),
                _ => return,
            };

            match write_result {
                Ok(0) => break,
                Ok(n) => {
                    self.connections[slot].send.consume(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.emit_error(id, e.to_string());
                    break;
                }
            }
        }

        if self.connections[slot].send.is_empty() {
            self.connections[slot].flags.is_writable = false;
            self.dispatch(id, MG_EV_WRITE);
        }
    }

    fn reap(&mut self) {
        let to_close: Vec<(usize, ConnectionId)> = self
            .connections
            .iter()
            .filter(|(_, c)| (c.flags.is_closing || c.flags.is_draining) && c.send.is_empty())
            .map(|(slot, c)| (slot, c.id))
            .collect();

        for (slot, id) in to_close {
            self.dispatch(id, MG_EV_CLOSE);

            if let Some(socket) = self.sockets.get(slot) {
                let _ = socket.deregister(&self.epoll);
            }

            self.connections.remove(slot);
            self.sockets.remove(slot);
            self.id_to_slot.shift_remove(&id);
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listen_reports_nonzero_ephemeral_port() {
        let mut manager = Manager::new(None, false, None).unwrap();
        let id = manager.listen("http://127.0.0.1:0", None, None).unwrap();
        let slot = *manager.id_to_slot.get(&id).unwrap();
        let addr = manager.connections[slot].local_addr.clone().unwrap();
        assert_ne!(addr.port, 0);
        assert!(!addr.is_ipv6);
    }

    #[test]
    fn http_scheme_infers_http_protocol() {
        let mut manager = Manager::new(None, false, None).unwrap();
        let id = manager.listen("http://127.0.0.1:0", None, None).unwrap();
        let slot = *manager.id_to_slot.get(&id).unwrap();
        assert_eq!(manager.connections[slot].protocol, Protocol::Http);
    }

    #[test]
    fn tcp_scheme_does_not_infer_http() {
        let mut manager = Manager::new(None, false, None).unwrap();
        let id = manager.listen("tcp://127.0.0.1:0", None, None).unwrap();
        let slot = *manager.id_to_slot.get(&id).unwrap();
        assert_eq!(manager.connections[slot].protocol, Protocol::Raw);
    }

    #[test]
    fn explicit_http_override_wins() {
        let mut manager = Manager::new(None, false, None).unwrap();
        let id = manager.listen("tcp://127.0.0.1:0", None, Some(true)).unwrap();
        let slot = *manager.id_to_slot.get(&id).unwrap();
        assert_eq!(manager.connections[slot].protocol, Protocol::Http);
    }

    #[test]
    fn poll_after_close_is_rejected() {
        let mut manager = Manager::new(None, false, None).unwrap();
        manager.close();
        assert!(matches!(manager.poll(0), Err(ManagerError::Closed)));
    }

    #[test]
    fn double_close_does_not_panic() {
        let mut manager = Manager::new(None, false, None).unwrap();
        manager.close();
        manager.close();
        assert!(manager.is_closed());
    }

    #[test]
    fn invalid_url_is_rejected() {
        let mut manager = Manager::new(None, false, None).unwrap();
        assert!(manager.listen("not-a-url", None, None).is_err());
    }

    #[test]
    fn handler_resolution_prefers_per_connection_over_default() {
        let default_hits = Arc::new(AtomicUsize::new(0));
        let per_conn_hits = Arc::new(AtomicUsize::new(0));

        let default_counter = default_hits.clone();
        let default_handler: HandlerFn = Arc::new(move |_h, _code| {
            default_counter.fetch_add(1, Ordering::SeqCst);
        });

        let per_conn_counter = per_conn_hits.clone();
        let per_conn_handler: HandlerFn = Arc::new(move |_h, _code| {
            per_conn_counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut manager = Manager::new(Some(default_handler), false, None).unwrap();
        let id = manager.listen("tcp://127.0.0.1:0", Some(per_conn_handler), None).unwrap();

        manager.dispatch(id, MG_EV_POLL);

        assert_eq!(per_conn_hits.load(Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timer_fires_with_callback() {
        let mut manager = Manager::new(None, false, None).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        manager.timer_add(0, Arc::new(move || { counter.fetch_add(1, Ordering::SeqCst); }), false, false);

        manager.poll(0).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wakeup_delivers_payload_without_owner_thread_panic() {
        let mut manager = Manager::new(None, true, None).unwrap();
        let id = manager.listen("tcp://127.0.0.1:0", None, None).unwrap();

        let received = Arc::new(std::sync::Mutex::new(None));
        let received_clone = received.clone();
        let handler: HandlerFn = Arc::new(move |h, code| {
            if code == MG_EV_WAKEUP {
                *received_clone.lock().unwrap() = h.wakeup_data().map(|d| d.to_vec());
            }
        });

        if let Some(&slot) = manager.id_to_slot.get(&id) {
            manager.connections[slot].handler = Some(handler);
        }

        manager.wakeup(id, b"ping".to_vec());
        manager.poll(0).unwrap();

        assert_eq!(*received.lock().unwrap(), Some(b"ping".to_vec()));
    }
}
