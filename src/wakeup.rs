//! Cross-thread wakeup mailbox.
//!
//! A thin specialization of [`crate::queue::Queue`] to `(connection_id,
//! payload)` records, paired with the eventfd-backed `Waker` the queue
//! already carries. `wakeup` is the one `Manager` method promoted to
//! thread-safe: it only appends to the queue and flips the eventfd
//! readable, never touching connection state directly.

use std::io;

use crate::queue::Queue;

#[derive(Clone)]
pub struct Mailbox {
    queue: Queue<(u64, Vec<u8>)>,
}

impl Mailbox {
    pub fn new() -> io::Result<Mailbox> {
        Ok(Mailbox { queue: Queue::unbounded()? })
    }

    /// Callable from any thread. Best-effort: a closed mailbox (manager
    /// shutting down) silently drops the record rather than erroring.
    pub fn send(&self, connection_id: u64, payload: Vec<u8>) {
        let _ = self.queue.push((connection_id, payload));
    }

    /// Drains every pending record. Called only from the owner thread at
    /// the start of a `poll` tick, after timers and before socket I/O.
    pub fn drain(&self) -> Vec<(u64, Vec<u8>)> {
        let mut out = Vec::new();
        while let Ok(record) = self.queue.pop() {
            out.push(record);
        }
        out
    }

    pub fn queue(&self) -> &Queue<(u64, Vec<u8>)> {
        &self.queue
    }
}

/// A cloneable, `Send + Sync` handle onto a manager's wakeup mailbox,
/// obtained via [`crate::manager::Manager::waker`]. This is what a
/// background thread actually holds to call `wakeup` while the owner
/// thread's `Manager` is busy inside `poll` -- `Manager` itself is only
/// ever touched mutably from its owner thread.
#[derive(Clone)]
pub struct WakeupHandle {
    mailbox: Mailbox,
}

impl WakeupHandle {
    pub fn new(mailbox: Mailbox) -> WakeupHandle {
        WakeupHandle { mailbox }
    }

    pub fn wakeup(&self, connection_id: u64, payload: Vec<u8>) {
        self.mailbox.send(connection_id, payload);
    }
}
