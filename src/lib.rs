//! An embedded, single-threaded, event-driven network runtime exposing a
//! uniform programming model for TCP, UDP, HTTP/1.1 (client and server),
//! WebSocket (client and server), MQTT and SNTP. One poller multiplexes
//! every connection; the host drives the runtime by calling a single
//! non-blocking [`Manager::poll`] from whatever thread owns its event loop.
//!
//! ## Usage
//!
//! First, add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! manticore = "0.1"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use manticore::{Manager, MG_EV_HTTP_MSG};
//! use manticore::http::reply;
//!
//! let handler: manticore::connection::HandlerFn = Arc::new(|handle, code| {
//!     if code == MG_EV_HTTP_MSG {
//!         if let Some(req) = handle.http() {
//!             if req.uri == "/healthcheck" {
//!                 handle.write(&reply(200, b"OK", &[]));
//!             }
//!         }
//!     }
//! });
//!
//! let mut manager = Manager::new(Some(handler), false, None).unwrap();
//! manager.listen("http://127.0.0.1:0", None, None).unwrap();
//!
//! loop {
//!     manager.poll(1000).unwrap();
//! }
//! ```

#[macro_use]
mod log;

pub mod buffer;
pub mod connection;
pub mod epoll;
pub mod error;
pub mod event;
pub mod http;
pub mod manager;
pub mod mqtt;
mod net;
pub mod queue;
pub mod sntp;
mod sys;
pub mod timer;
pub mod url;
mod waker;
pub mod wakeup;
pub mod ws;

pub use connection::{Connection, ConnectionHandle, ConnectionId, Protocol};
pub use error::{ManagerError, ManagerResult};
pub use event::{
    event_name, MG_EV_ACCEPT, MG_EV_CLOSE, MG_EV_CONNECT, MG_EV_ERROR, MG_EV_HTTP_HDRS,
    MG_EV_HTTP_MSG, MG_EV_MQTT_CMD, MG_EV_MQTT_MSG, MG_EV_MQTT_OPEN, MG_EV_OPEN, MG_EV_POLL,
    MG_EV_READ, MG_EV_RESOLVE, MG_EV_SNTP_TIME, MG_EV_TLS_HS, MG_EV_USER, MG_EV_WAKEUP,
    MG_EV_WRITE, MG_EV_WS_CTL, MG_EV_WS_MSG, MG_EV_WS_OPEN,
};
pub use manager::Manager;
pub use net::{TcpListener, TcpStream, UdpSocket};
pub use url::{Scheme, Url};
pub use wakeup::WakeupHandle;

pub use self::log::{log_get, log_set, DEBUG, ERROR, INFO, NONE, VERBOSE};
