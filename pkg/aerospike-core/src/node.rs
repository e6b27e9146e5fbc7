//! A single cluster member (spec §3 "Node", §4.C).
//!
//! Ownership follows the design-notes re-architecture (spec §9): rather
//! than the source's manual `rc_reserve`/`rc_release` on a raw pointer, a
//! `Node` is always held behind `Arc<Node>` — the cluster's node vector and
//! every partition-table slot each hold one clone, and a worker thread
//! holding a `get_node()` result holds another for the duration of its
//! call. The final `Arc` drop runs `Pool::drain_close_all` via `Drop`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::pool::Pool;

/// Sentinel for "no partition-map generation observed yet" (spec §3).
pub const GENERATION_UNKNOWN: u32 = 0xFFFF_FFFF;

/// I/O error severities accumulated into a node's health score (spec §4.C
/// "Health policy").
pub mod health {
    pub const INFO_ERROR: u32 = 2;
    pub const NAME_CHANGE: u32 = 50;
    pub const TIMEOUT: u32 = 1;
    pub const CONNECT_ERROR: u32 = 5;
}

pub struct Node {
    /// Server-assigned, immutable for the node's lifetime; used as equality
    /// identity everywhere else in the crate (spec §3).
    pub name: String,
    addresses: RwLock<Vec<SocketAddr>>,
    partition_generation: AtomicU32,
    health_score: AtomicU32,
    retired: AtomicBool,
    pub pool: Pool,
    health_retirement_threshold: u32,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        initial_address: SocketAddr,
        pool_size: usize,
        idle_timeout: Duration,
        health_retirement_threshold: u32,
    ) -> Self {
        Self {
            name: name.into(),
            addresses: RwLock::new(vec![initial_address]),
            partition_generation: AtomicU32::new(GENERATION_UNKNOWN),
            health_score: AtomicU32::new(0),
            retired: AtomicBool::new(false),
            pool: Pool::new(pool_size, idle_timeout),
            health_retirement_threshold,
        }
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.addresses.read().unwrap().clone()
    }

    /// Address set is append-only during a node's lifetime (spec §3); a
    /// newly learned address (e.g. from a `services` refresh) is added only
    /// if not already present — "unique append", deliberately `O(n)` since
    /// `n` is always small (spec §9).
    pub fn add_address(&self, address: SocketAddr) {
        let mut addrs = self.addresses.write().unwrap();
        if !addrs.contains(&address) {
            addrs.push(address);
        }
    }

    pub fn has_address(&self, address: &SocketAddr) -> bool {
        self.addresses.read().unwrap().contains(address)
    }

    pub fn partition_generation(&self) -> u32 {
        self.partition_generation.load(Ordering::Acquire)
    }

    pub fn set_partition_generation(&self, generation: u32) {
        self.partition_generation.store(generation, Ordering::Release);
    }

    /// Increments the running health score; crossing the retirement
    /// threshold marks the node retired (spec §4.C).
    pub fn add_health(&self, severity: u32) {
        let prev = self.health_score.fetch_add(severity, Ordering::AcqRel);
        if prev + severity >= self.health_retirement_threshold {
            if !self.retired.swap(true, Ordering::AcqRel) {
                log::warn!(
                    "node {} crossed the health retirement threshold ({} >= {})",
                    self.name,
                    prev + severity,
                    self.health_retirement_threshold
                );
            }
        }
    }

    /// A successful info exchange resets the score to zero (spec §4.C).
    pub fn reset_health(&self) {
        self.health_score.store(0, Ordering::Release);
    }

    pub fn health_score(&self) -> u32 {
        self.health_score.load(Ordering::Acquire)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Marks the node for retirement directly — used when the tender
    /// observes a reported node name mismatch (spec §4.F step 5).
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl Drop for Node {
    /// The final `Arc<Node>` drop closes every pooled socket in both queues
    /// (spec §4.C "the final decrement closes all sockets in both pools").
    fn drop(&mut self) {
        self.pool.drain_close_all();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("partition_generation", &self.partition_generation())
            .field("health_score", &self.health_score())
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl PartialEq for Node {
    /// Name is the node's equality identity (spec §3).
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn health_score_crosses_threshold_and_retires() {
        let node = Node::new("BB9A", addr(3000), 4, Duration::from_secs(1), 10);
        assert!(!node.is_retired());
        node.add_health(5);
        assert!(!node.is_retired());
        node.add_health(5);
        assert!(node.is_retired());
    }

    #[test]
    fn reset_health_clears_score_but_not_retirement() {
        let node = Node::new("BB9A", addr(3000), 4, Duration::from_secs(1), 10);
        node.add_health(10);
        assert!(node.is_retired());
        node.reset_health();
        assert_eq!(node.health_score(), 0);
        assert!(node.is_retired());
    }

    #[test]
    fn add_address_is_idempotent() {
        let node = Node::new("BB9A", addr(3000), 4, Duration::from_secs(1), 10);
        node.add_address(addr(3001));
        node.add_address(addr(3001));
        assert_eq!(node.addresses().len(), 2);
    }

    #[test]
    fn unknown_generation_sentinel_is_all_ones() {
        let node = Node::new("BB9A", addr(3000), 4, Duration::from_secs(1), 10);
        assert_eq!(node.partition_generation(), GENERATION_UNKNOWN);
    }
}
