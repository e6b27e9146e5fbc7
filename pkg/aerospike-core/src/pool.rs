//! Per-node connection pooling: a bounded LIFO of idle synchronous sockets
//! plus a separate, unbounded async queue (spec §4.B, §4.C).
//!
//! Grounded on the bounded-capacity discipline `common::fixed_queue` already
//! establishes for single-threaded scratch use; the pool wraps the same
//! idea behind a lock-free `crossbeam_queue::ArrayQueue` since idle sockets
//! are handed between the tender, worker threads and drivers concurrently.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crossbeam_queue::{ArrayQueue, SegQueue};

use crate::errors::ResultCode;

/// One pooled synchronous socket plus the bookkeeping a driver needs to
/// decide whether it is still worth reusing.
pub struct Connection {
    pub stream: TcpStream,
    pub address: SocketAddr,
    last_used: Instant,
}

impl Connection {
    fn connect(address: SocketAddr, timeout: Duration) -> std::io::Result<Self> {
        let stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            address,
            last_used: Instant::now(),
        })
    }

    pub fn set_read_timeout(&self, timeout: Duration) -> std::io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

/// Tries each address in turn until one connects (spec §4.B "Socket
/// creation"). A refused/unreachable address is not fatal on its own; only
/// exhausting the whole list is.
pub fn connect_any(addresses: &[SocketAddr], timeout: Duration) -> Result<Connection, ResultCode> {
    for &address in addresses {
        match Connection::connect(address, timeout) {
            Ok(conn) => return Ok(conn),
            Err(e) => log::debug!("connect to {} failed: {}", address, e),
        }
    }

    Err(ResultCode::NoAvailableConnections)
}

/// A node's two connection queues (spec §4.B).
pub struct Pool {
    sync_idle: ArrayQueue<Connection>,
    /// Async sockets are never pooled by capacity, only by how many the
    /// workload actually opens (spec §4.B "async pool is unbounded").
    async_idle: SegQueue<Connection>,
    idle_timeout: Duration,
}

impl Pool {
    pub fn new(sync_capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            sync_idle: ArrayQueue::new(sync_capacity.max(1)),
            async_idle: SegQueue::new(),
            idle_timeout,
        }
    }

    /// Pops an idle synchronous connection if one is available and not
    /// stale; never blocks (spec §4.B "pop-nowait").
    pub fn pop_sync(&self) -> Option<Connection> {
        while let Some(conn) = self.sync_idle.pop() {
            if !conn.is_idle_expired(self.idle_timeout) {
                return Some(conn);
            }
            // Stale; drop it and keep looking rather than handing back a
            // connection the peer may have already half-closed.
        }
        None
    }

    /// Returns a connection to the pool, or drops it if the pool is at
    /// capacity (spec §4.B "push-if-under-limit: drops to close on
    /// overflow"). Dropping `Connection` closes the socket via `TcpStream`'s
    /// own `Drop`.
    pub fn push_sync(&self, mut conn: Connection) {
        conn.touch();
        let _ = self.sync_idle.push(conn);
    }

    pub fn pop_async(&self) -> Option<Connection> {
        self.async_idle.pop()
    }

    pub fn push_async(&self, conn: Connection) {
        self.async_idle.push(conn);
    }

    /// Drains and drops every pooled socket in both queues (spec §4.C "the
    /// final decrement closes all sockets in both pools").
    pub fn drain_close_all(&self) {
        while self.sync_idle.pop().is_some() {}
        while self.async_idle.pop().is_some() {}
    }

    pub fn sync_idle_len(&self) -> usize {
        self.sync_idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, ToSocketAddrs};

    fn loopback_listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn connect_any_falls_back_across_addresses() {
        let (listener, good_addr) = loopback_listener();
        // A closed port that nothing listens on, to force a fallback.
        let bad_addr: SocketAddr = "127.0.0.1:1".to_socket_addrs().unwrap().next().unwrap();

        let conn = connect_any(&[bad_addr, good_addr], Duration::from_millis(200));
        drop(listener);
        assert!(conn.is_ok());
    }

    #[test]
    fn connect_any_fails_when_every_address_fails() {
        let bad_addr: SocketAddr = "127.0.0.1:1".to_socket_addrs().unwrap().next().unwrap();
        let result = connect_any(&[bad_addr], Duration::from_millis(200));
        assert!(result.is_err());
    }

    #[test]
    fn pool_overflow_drops_instead_of_blocking() {
        let (listener, addr) = loopback_listener();
        let pool = Pool::new(1, Duration::from_secs(60));

        let c1 = Connection::connect(addr, Duration::from_millis(200)).unwrap();
        let c2 = Connection::connect(addr, Duration::from_millis(200)).unwrap();
        pool.push_sync(c1);
        pool.push_sync(c2); // over capacity; silently dropped

        assert_eq!(pool.sync_idle_len(), 1);
        assert!(pool.pop_sync().is_some());
        assert!(pool.pop_sync().is_none());
        drop(listener);
    }
}
