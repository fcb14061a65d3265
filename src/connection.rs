//! Per-socket connection state: flags, buffers, addresses, handler override.

use std::net::SocketAddr;

use crate::buffer::Buffer;

pub type ConnectionId = u64;

/// A user handler. Receives the connection handle and the `MG_EV_*` code;
/// protocol-decoded data (HTTP/WS views, wakeup payloads, error strings) is
/// read back out through `ConnectionHandle` accessors scoped to the call,
/// which is what actually enforces the message-view lifetime discipline --
/// a view cannot outlive the `&mut ConnectionHandle` borrow the handler was
/// called with.
pub type HandlerFn = std::sync::Arc<dyn for<'a> Fn(&mut ConnectionHandle<'a>, i32) + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    Raw,
    Http,
    WebSocket,
    Mqtt,
    Sntp,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Flags {
    pub is_listening: bool,
    pub is_client: bool,
    pub is_udp: bool,
    pub is_websocket: bool,
    pub is_tls: bool,
    pub is_readable: bool,
    pub is_writable: bool,
    pub is_closing: bool,
    pub is_draining: bool,
    pub is_hexdumping: bool,
    pub is_resp: bool,
}

/// A tuple-like `(ip, port, is_ipv6)` view, or absent for unbound/unconnected
/// endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Addr {
    pub ip: String,
    pub port: u16,
    pub is_ipv6: bool,
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Addr {
        Addr {
            ip: addr.ip().to_string(),
            port: addr.port(),
            is_ipv6: addr.is_ipv6(),
        }
    }
}

/// One socket endpoint: a listener, a client connection, or an accepted
/// child. Owned by the `Manager`'s connection table; a `Connection` never
/// outlives the slab slot backing it.
pub struct Connection {
    pub id: ConnectionId,
    pub flags: Flags,
    pub local_addr: Option<Addr>,
    pub remote_addr: Option<Addr>,
    pub recv: Buffer,
    pub send: Buffer,
    pub protocol: Protocol,
    pub handler: Option<HandlerFn>,
    pub parent_listener: Option<ConnectionId>,
    pub user_data: Option<Box<dyn std::any::Any + Send>>,
    /// Payload of the wakeup record currently being dispatched, if any.
    pub pending_wakeup: Option<Vec<u8>>,
    /// Message carried by the `MG_EV_ERROR` event currently being
    /// dispatched, if any.
    pub pending_error: Option<String>,
    /// Whether `MG_EV_HTTP_HDRS` has already fired for the request/response
    /// currently being buffered. Cleared once that message completes, so a
    /// pipelined follow-up gets its own headers event.
    pub headers_seen: bool,
}

impl Connection {
    pub fn new(id: ConnectionId, protocol: Protocol) -> Connection {
        Connection {
            id,
            flags: Flags::default(),
            local_addr: None,
            remote_addr: None,
            recv: Buffer::new(),
            send: Buffer::new(),
            protocol,
            handler: None,
            parent_listener: None,
            user_data: None,
            pending_wakeup: None,
            pending_error: None,
            headers_seen: false,
        }
    }

    pub fn recv_len(&self) -> usize {
        self.recv.len()
    }

    pub fn send_len(&self) -> usize {
        self.send.len()
    }

    pub fn recv_size(&self) -> usize {
        self.recv.capacity()
    }

    pub fn send_size(&self) -> usize {
        self.send.capacity()
    }

    pub fn recv_data(&self, n: i64) -> &[u8] {
        self.recv.data(n)
    }

    pub fn send_data(&self, n: i64) -> &[u8] {
        self.send.data(n)
    }

    pub fn set_user_data<T: std::any::Any + Send>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: std::any::Any>(&self) -> Option<&T> {
        self.user_data.as_ref().and_then(|b| b.downcast_ref::<T>())
    }
}

/// A borrowing handle to a connection, passed into user handlers. Kept
/// distinct from `Connection` itself so manager-internal bookkeeping (slab
/// index, epoll token) never leaks into the public handler signature.
pub struct ConnectionHandle<'a> {
    pub conn: &'a mut Connection,
}

impl<'a> ConnectionHandle<'a> {
    pub fn id(&self) -> ConnectionId {
        self.conn.id
    }

    pub fn close(&mut self) {
        self.conn.flags.is_closing = true;
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.conn.send.extend(bytes);
        self.conn.flags.is_writable = true;
    }

    pub fn set_handler(&mut self, handler: HandlerFn) {
        self.conn.handler = Some(handler);
    }

    /// The current HTTP message view, if the receive buffer holds one. Its
    /// lifetime is tied to `&self`, so it cannot escape the handler call.
    pub fn http(&self) -> Option<crate::http::HttpView<'_>> {
        match crate::http::parse_request(self.conn.recv.as_slice()) {
            Ok(crate::http::ParseOutcome::Complete { view, .. }) => Some(view),
            _ => None,
        }
    }

    /// The current WebSocket frame view, if the receive buffer holds one.
    pub fn ws(&self) -> Option<crate::ws::WsView<'_>> {
        match crate::ws::decode_frame(self.conn.recv.as_slice()) {
            Ok(crate::ws::WsOutcome::Complete { view, .. }) => Some(view),
            _ => None,
        }
    }

    /// Performs the RFC 6455 handshake and marks the connection
    /// `is_websocket`, so subsequent receive bytes are fed to the frame
    /// decoder instead of the HTTP parser. Must be called from inside an
    /// `MG_EV_HTTP_MSG` handler with that event's request view; returns
    /// `false` without writing anything if `request` isn't a valid upgrade.
    pub fn ws_upgrade(&mut self, request: &crate::http::HttpView) -> bool {
        match crate::ws::upgrade_response(request) {
            Some(response) => {
                self.conn.send.extend(&response);
                self.conn.flags.is_writable = true;
                self.conn.flags.is_websocket = true;
                true
            }
            None => false,
        }
    }

    /// Frames and queues one WebSocket message. Server-to-client frames are
    /// never masked.
    pub fn ws_send(&mut self, data: &[u8], opcode: crate::ws::Opcode) {
        let frame = crate::ws::encode_frame(opcode, data);
        self.conn.send.extend(&frame);
        self.conn.flags.is_writable = true;
    }

    pub fn wakeup_data(&self) -> Option<&[u8]> {
        self.conn.pending_wakeup.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.conn.pending_error.as_deref()
    }

    pub fn local_addr(&self) -> Option<&Addr> {
        self.conn.local_addr.as_ref()
    }

    pub fn remote_addr(&self) -> Option<&Addr> {
        self.conn.remote_addr.as_ref()
    }

    pub fn flags(&self) -> &Flags {
        &self.conn.flags
    }
}
