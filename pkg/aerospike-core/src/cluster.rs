//! Cluster membership and routing (spec §3 "Cluster", §4.E).
//!
//! The source's intrusive linked list of clusters and cyclic node→cluster
//! pointers are both dropped per the design notes (spec §9): clusters are
//! owned handles held by the tender's process-global registry
//! ([`crate::tender`]), and nodes hold no pointer back to their cluster —
//! the tender passes `&Cluster` explicitly whenever it touches a node.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::errors::ResultCode;
use crate::key::DIGEST_SIZE;
use crate::node::{Node, GENERATION_UNKNOWN};
use crate::partition::PartitionTables;
use crate::policy::ClientPolicy;
use crate::tender;

/// A registered `(host, port)` seed entry plus its most recently resolved
/// addresses, so the tender can re-resolve without re-reading config (spec
/// §3 "seed hosts").
pub struct Seed {
    pub host: String,
    pub port: u16,
}

/// State touched under the single cluster lock (spec §5 "Shared-resource
/// policy": "the cluster lock guards the node vector, partition-table
/// list, seed list, address map, and lifecycle state bits").
struct ClusterState {
    seeds: Vec<Seed>,
    aliases: std::collections::HashMap<SocketAddr, SocketAddr>,
    nodes: Vec<Arc<Node>>,
    partition_tables: PartitionTables,
    found_all: bool,
    closed: bool,
}

pub struct Cluster {
    pub policy: ClientPolicy,
    state: Mutex<ClusterState>,
    n_partitions: AtomicU32,
    tender_running: std::sync::atomic::AtomicBool,
    /// Which tick of the tender's base period this cluster tends on (spec
    /// §4.F: "runs a tend cycle per cluster whose own period divides the
    /// current tick count").
    pub(crate) tend_tick_interval: u64,
    tick: std::sync::atomic::AtomicU64,
}

impl Cluster {
    /// Takes nothing more than configuration (spec §4.E "Creation");
    /// registers into the tender's global list so background tending picks
    /// it up without the caller doing anything further.
    pub fn new(policy: ClientPolicy, hosts: &[(String, u16)]) -> Arc<Self> {
        let tend_tick_interval = policy.tend_interval.as_millis().max(1) as u64
            / tender::BASE_TICK_MS.max(1) as u64;

        let cluster = Arc::new(Self {
            policy,
            state: Mutex::new(ClusterState {
                seeds: hosts
                    .iter()
                    .map(|(h, p)| Seed {
                        host: h.clone(),
                        port: *p,
                    })
                    .collect(),
                aliases: std::collections::HashMap::new(),
                nodes: Vec::new(),
                partition_tables: PartitionTables::new(),
                found_all: false,
                closed: false,
            }),
            n_partitions: AtomicU32::new(0),
            tender_running: std::sync::atomic::AtomicBool::new(false),
            tend_tick_interval: tend_tick_interval.max(1),
            tick: std::sync::atomic::AtomicU64::new(0),
        });

        tender::register(&cluster);
        cluster
    }

    /// Resolves `host` and appends it as a seed, then waits up to
    /// `policy.connection_timeout` for a reachable node to appear (spec
    /// §4.E "Add seed host").
    pub fn add_seed_host(self: &Arc<Self>, host: impl Into<String>, port: u16) -> Result<(), ResultCode> {
        let host = host.into();
        let resolved = resolve(&host, port)?;

        {
            let mut state = self.state.lock().unwrap();
            state.seeds.push(Seed {
                host: host.clone(),
                port,
            });
            state.found_all = false;
        }

        tender::tend_now(self);

        let deadline = Instant::now() + self.policy.connection_timeout;
        loop {
            {
                let state = self.state.lock().unwrap();
                if resolved
                    .iter()
                    .any(|addr| state.nodes.iter().any(|n| n.has_address(addr) && !n.is_retired()))
                {
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(ResultCode::Timeout);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn n_partitions(&self) -> u32 {
        self.n_partitions.load(Ordering::Acquire)
    }

    pub fn set_n_partitions(&self, n: u32) {
        self.n_partitions.store(n, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn found_all(&self) -> bool {
        self.state.lock().unwrap().found_all
    }

    pub fn set_found_all(&self, found_all: bool) {
        self.state.lock().unwrap().found_all = found_all;
    }

    pub fn alias_address(&self, orig: SocketAddr, alt: SocketAddr) {
        self.state.lock().unwrap().aliases.insert(orig, alt);
    }

    /// Resolves a reported service address through the alias map before
    /// the tender uses it (spec §3, SPEC_FULL §10 "Host-address aliasing").
    pub fn resolve_alias(&self, addr: SocketAddr) -> SocketAddr {
        self.state
            .lock()
            .unwrap()
            .aliases
            .get(&addr)
            .copied()
            .unwrap_or(addr)
    }

    pub fn seeds(&self) -> Vec<(String, u16)> {
        self.state
            .lock()
            .unwrap()
            .seeds
            .iter()
            .map(|s| (s.host.clone(), s.port))
            .collect()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.state.lock().unwrap().nodes.clone()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .map(|n| n.name.clone())
            .collect()
    }

    /// Maps a freshly resolved address back to an already-known node, so
    /// the tender does not create a duplicate (spec §4.F step 3;
    /// SPEC_FULL §10 `find_node_by_address`).
    pub fn find_node_by_address(&self, address: &SocketAddr) -> Option<Arc<Node>> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .find(|n| n.has_address(address))
            .cloned()
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
    }

    pub(crate) fn add_node(&self, node: Arc<Node>) {
        self.state.lock().unwrap().nodes.push(node);
    }

    /// Scans for retired nodes, clears their partition ownerships and drops
    /// the cluster's reference to them (spec §4.F step 1).
    pub(crate) fn reap_retired_nodes(&self) {
        let mut state = self.state.lock().unwrap();
        let (keep, retired): (Vec<_>, Vec<_>) = state.nodes.drain(..).partition(|n| !n.is_retired());
        state.nodes = keep;
        for node in &retired {
            state.partition_tables.remove_node(node);
            log::warn!("reaped retired node {}", node.name);
        }
    }

    /// Returns the existing node at `address` if known, otherwise
    /// constructs and registers a new one (spec §4.F step 3: "if not
    /// already present, create a node object and append it to the live
    /// set").
    pub(crate) fn add_node_if_missing(&self, name: &str, address: SocketAddr) -> Arc<Node> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.nodes.iter().find(|n| n.name == name) {
            existing.add_address(address);
            return existing.clone();
        }

        let node = Arc::new(Node::new(
            name,
            address,
            self.policy.connection_pool_size_per_node,
            self.policy.idle_timeout,
            self.policy.health_retirement_threshold,
        ));
        state.nodes.push(node.clone());
        node
    }

    /// Installs replica ownership for every set bit of a decoded
    /// `replicas-read`/`replicas-write` bitmap (spec §4.D "Update", §4.F
    /// step 6).
    pub(crate) fn apply_replica_bitmap(
        &self,
        namespace: &str,
        node: &Arc<Node>,
        bitmap: &[u8],
        write: bool,
    ) -> Result<(), ResultCode> {
        let n_partitions = self.n_partitions();
        let mut state = self.state.lock().unwrap();
        let table = state.partition_tables.get_or_create(namespace, n_partitions);
        crate::partition::apply_replica_bitmap(table, node, bitmap, write)
    }

    /// Clears every partition slot this node owns across all namespaces
    /// (spec §4.D "Remove-node").
    pub(crate) fn clear_node_partitions(&self, node: &Node) {
        self.state.lock().unwrap().partition_tables.remove_node(node);
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .partition_tables
            .namespaces()
            .map(str::to_string)
            .collect()
    }

    pub fn sc_mode(&self, namespace: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .partition_tables
            .get(namespace)
            .map(|t| t.sc_mode)
            .unwrap_or(false)
    }

    /// `get_node(namespace, digest, write) = partition_table.lookup(...)
    /// or random_live_node()` (spec §4.E "Node selection").
    pub fn get_node(&self, namespace: &str, digest: &[u8; DIGEST_SIZE], write: bool) -> Result<Arc<Node>, ResultCode> {
        let n_partitions = self.n_partitions();
        if n_partitions > 0 {
            let partition_id = crate::key::partition_id_from(digest, n_partitions);
            let state = self.state.lock().unwrap();
            if let Some(table) = state.partition_tables.get(namespace) {
                if let Some(node) = table.lookup(partition_id, write) {
                    if !node.is_retired() {
                        return Ok(node);
                    }
                }
            }
        }

        self.random_node().ok_or(ResultCode::NoAvailableConnections)
    }

    /// Picks uniformly among non-retired nodes (spec §4.E "Random
    /// selection").
    pub fn random_node(&self) -> Option<Arc<Node>> {
        let state = self.state.lock().unwrap();
        let live: Vec<&Arc<Node>> = state.nodes.iter().filter(|n| !n.is_retired()).collect();
        if live.is_empty() {
            return None;
        }

        let idx = rand::thread_rng().gen_range(0..live.len());
        Some(live[idx].clone())
    }

    /// Detaches from the tender registry, waits for any in-flight tend
    /// cycle, then releases every node and partition table (spec §4.E
    /// "Destruction").
    pub fn close(self: &Arc<Self>) {
        tender::unregister(self);

        while self.tender_running.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.nodes.clear();
    }

    pub(crate) fn begin_tend(&self) -> bool {
        !self.tender_running.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_tend(&self) {
        self.tender_running.store(false, Ordering::Release);
    }

    pub(crate) fn tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ResultCode> {
    (host, port)
        .to_socket_addrs()
        .map(|it| it.collect())
        .map_err(|e| ResultCode::ClientError(format!("could not resolve {}:{}: {}", host, port, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_node_skips_retired_nodes() {
        let cluster = Cluster::new(ClientPolicy::default(), &[]);
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let live = Arc::new(Node::new("LIVE", addr, 4, Duration::from_secs(1), 50));
        let dead = Arc::new(Node::new("DEAD", addr, 4, Duration::from_secs(1), 50));
        dead.retire();
        cluster.add_node(live.clone());
        cluster.add_node(dead);

        for _ in 0..10 {
            assert_eq!(cluster.random_node().unwrap().name, "LIVE");
        }
    }

    #[test]
    fn get_node_falls_back_to_random_when_unmapped() {
        let cluster = Cluster::new(ClientPolicy::default(), &[]);
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let node = Arc::new(Node::new("A", addr, 4, Duration::from_secs(1), 50));
        cluster.add_node(node);
        cluster.set_n_partitions(4096);

        let digest = [0u8; DIGEST_SIZE];
        let got = cluster.get_node("test", &digest, true).unwrap();
        assert_eq!(got.name, "A");
    }

    #[test]
    fn reap_retired_nodes_removes_and_clears_partitions() {
        let cluster = Cluster::new(ClientPolicy::default(), &[]);
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let node = Arc::new(Node::new("A", addr, 4, Duration::from_secs(1), 50));
        cluster.add_node(node.clone());
        node.retire();

        cluster.reap_retired_nodes();
        assert!(cluster.nodes().is_empty());
    }
}
