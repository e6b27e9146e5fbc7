//! The background tender thread (spec §4.F).
//!
//! One dedicated thread serves every registered cluster, replacing the
//! source's intrusive `cl_cluster` linked list with a process-global
//! registry of weak handles (spec §9): a cluster that has otherwise been
//! dropped simply fails to upgrade and is pruned from the registry on the
//! next wake, instead of needing an explicit unlink.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::cluster::Cluster;
use crate::info::InfoResponse;
use crate::node::{health, Node};
use crate::pool;

/// The tender's base wake period; each cluster's own `tend_interval` is
/// expressed as a multiple of this tick (spec §4.F "default 1 second").
pub const BASE_TICK_MS: u64 = 1000;

struct Registry {
    clusters: Vec<Weak<Cluster>>,
    shutdown: bool,
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
static THREAD_STARTED: OnceLock<()> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            clusters: Vec::new(),
            shutdown: false,
        })
    })
}

/// Registers `cluster` with the tender and starts the tender thread the
/// first time any cluster is created (spec §4.F "A single dedicated thread
/// serves all registered clusters").
pub(crate) fn register(cluster: &Arc<Cluster>) {
    registry().lock().unwrap().clusters.push(Arc::downgrade(cluster));
    THREAD_STARTED.get_or_init(|| {
        std::thread::Builder::new()
            .name("aerospike-tender".into())
            .spawn(run)
            .expect("failed to spawn tender thread");
    });
}

pub(crate) fn unregister(cluster: &Arc<Cluster>) {
    registry().lock().unwrap().clusters.retain(|w| match w.upgrade() {
        Some(other) => !Arc::ptr_eq(&other, cluster),
        None => false,
    });
}

/// Forces an immediate tend cycle outside the thread's regular wake period
/// (spec §4.E "Add seed host" — "triggers an immediate tend cycle").
pub(crate) fn tend_now(cluster: &Arc<Cluster>) {
    tend_one(cluster);
}

fn run() {
    loop {
        if registry().lock().unwrap().shutdown {
            return;
        }

        let snapshot: Vec<Arc<Cluster>> = registry()
            .lock()
            .unwrap()
            .clusters
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        for cluster in &snapshot {
            let tick = cluster.tick();
            if tick % cluster.tend_tick_interval == 0 {
                tend_one(cluster);
            }
        }

        // Prune dead weak refs opportunistically so the registry does not
        // grow unbounded across long-running processes.
        registry().lock().unwrap().clusters.retain(|w| w.strong_count() > 0);

        std::thread::sleep(Duration::from_millis(BASE_TICK_MS));
    }
}

/// Test-only escape hatch: drains the registry and stops the thread's loop
/// so a test process does not leak a background thread across test cases.
#[cfg(test)]
pub(crate) fn shutdown_for_test() {
    registry().lock().unwrap().shutdown = true;
}

/// Runs one tend cycle for `cluster`, in the step order spec §4.F lists.
/// Only one cycle per cluster may be active at a time; `TENDER_RUNNING` is
/// set/cleared around the whole cycle, including error paths, via the
/// `begin_tend`/`end_tend` pairing.
fn tend_one(cluster: &Arc<Cluster>) {
    if cluster.is_closed() {
        return;
    }
    if !cluster.begin_tend() {
        return; // a cycle is already in flight for this cluster
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| tend_cycle(cluster)));
    cluster.end_tend();

    if let Err(e) = result {
        log::error!("tend cycle panicked: {:?}", e);
    }
}

fn tend_cycle(cluster: &Arc<Cluster>) {
    // Step 1: reap retired nodes.
    cluster.reap_retired_nodes();

    // Step 2: resolve seed hosts.
    let seed_addrs: Vec<SocketAddr> = cluster
        .seeds()
        .into_iter()
        .flat_map(|(host, port)| (host.as_str(), port).to_socket_addrs().into_iter().flatten())
        .collect();

    // Step 3: discover new nodes from seeds.
    let mut peers: Vec<SocketAddr> = Vec::new();
    let mut frontier = seed_addrs;
    let mut discovered_any = false;

    while let Some(address) = frontier.pop() {
        if cluster.find_node_by_address(&address).is_some() {
            continue;
        }

        match probe_and_add(cluster, address) {
            Ok(_) => discovered_any = true,
            Err(e) => log::debug!("could not probe {}: {}", address, e),
        }
    }

    // Step 4: learn the partition count once per cluster.
    if cluster.n_partitions() == 0 {
        if let Some(node) = cluster.random_node() {
            if let Some(n) = fetch_partition_count(&node) {
                cluster.set_n_partitions(n);
            }
        }
    }

    // Step 5: refresh each known node.
    let mut generation_refresh = Vec::new();
    for node in cluster.nodes() {
        match refresh_node(cluster, &node) {
            Ok(node_peers) => {
                node.reset_health();
                peers.extend(node_peers.services);
                if node_peers.generation_changed {
                    generation_refresh.push(node.clone());
                }
                if node_peers.name_mismatch {
                    node.retire();
                }
            }
            Err(e) => {
                log::warn!("refresh of node {} failed: {}", node.name, e);
                node.add_health(health::INFO_ERROR);
            }
        }
    }

    // Step 6: refresh partition maps where generation advanced.
    for node in &generation_refresh {
        if let Err(e) = refresh_partition_map(cluster, node) {
            log::warn!("partition map refresh for {} failed: {}", node.name, e);
        }
    }

    // Step 7: follow peers.
    if cluster.policy.follow_peers {
        let mut added_any = false;
        for peer in peers {
            if cluster.find_node_by_address(&peer).is_none() {
                if probe_and_add(cluster, peer).is_ok() {
                    added_any = true;
                }
            }
        }
        if !added_any && !discovered_any {
            cluster.set_found_all(true);
        }
    } else {
        cluster.set_found_all(true);
    }
}

/// Opens a short-lived connection to `address`, asks for its node name, and
/// registers it if not already known (spec §4.F step 3).
fn probe_and_add(cluster: &Arc<Cluster>, address: SocketAddr) -> Result<Arc<Node>, crate::errors::ResultCode> {
    let mut conn = pool::connect_any(&[address], cluster.policy.connection_timeout)?;
    conn.set_read_timeout(cluster.policy.connection_timeout)?;

    let info = InfoResponse::fetch(&mut conn, &["node"])?;
    let name = info
        .get("node")
        .ok_or_else(|| crate::errors::ResultCode::Protocol("info response missing 'node'".into()))?;

    Ok(cluster.add_node_if_missing(name, address))
}

fn fetch_partition_count(node: &Arc<Node>) -> Option<u32> {
    for address in node.addresses() {
        if let Ok(mut conn) = pool::connect_any(&[address], Duration::from_secs(1)) {
            if let Ok(info) = InfoResponse::fetch(&mut conn, &["partitions"]) {
                if let Some(v) = info.get("partitions").and_then(|s| s.parse::<u32>().ok()) {
                    return Some(v);
                }
            }
        }
    }
    None
}

struct NodeRefresh {
    services: Vec<SocketAddr>,
    generation_changed: bool,
    name_mismatch: bool,
}

/// `node\npartition-generation\nservices` (spec §4.F step 5).
fn refresh_node(cluster: &Arc<Cluster>, node: &Arc<Node>) -> Result<NodeRefresh, crate::errors::ResultCode> {
    let addresses = node.addresses();
    let mut conn = pool::connect_any(&addresses, cluster.policy.connection_timeout)?;
    conn.set_read_timeout(cluster.policy.connection_timeout)?;

    let services_command = if cluster.policy.use_services_alternate {
        "services-alternate"
    } else {
        "services"
    };

    let info = InfoResponse::fetch(&mut conn, &["node", "partition-generation", services_command])?;

    let name_mismatch = info.get("node").map(|n| n != node.name).unwrap_or(false);

    let generation_changed = info
        .get("partition-generation")
        .and_then(|s| s.parse::<u32>().ok())
        .map(|g| g != node.partition_generation())
        .unwrap_or(false);

    let services = info
        .get_multi(services_command)
        .into_iter()
        .filter_map(|hp| hp.parse::<SocketAddr>().ok())
        .map(|addr| cluster.resolve_alias(addr))
        .collect();

    Ok(NodeRefresh {
        services,
        generation_changed,
        name_mismatch,
    })
}

/// `replicas-read\nreplicas-write` (spec §4.F step 6).
fn refresh_partition_map(cluster: &Arc<Cluster>, node: &Arc<Node>) -> Result<(), crate::errors::ResultCode> {
    let addresses = node.addresses();
    let mut conn = pool::connect_any(&addresses, cluster.policy.connection_timeout)?;
    conn.set_read_timeout(cluster.policy.connection_timeout)?;

    let info = InfoResponse::fetch(&mut conn, &["partition-generation", "replicas-read", "replicas-write"])?;

    cluster.clear_node_partitions(node);

    for (command, write) in [("replicas-read", false), ("replicas-write", true)] {
        if let Some(value) = info.get(command) {
            for field in value.split(';').filter(|s| !s.is_empty()) {
                if let Some((namespace, b64)) = InfoResponse::split_kv(field) {
                    let bitmap = STANDARD
                        .decode(b64)
                        .map_err(|e| crate::errors::ResultCode::Protocol(format!("bad replica bitmap base64: {}", e)))?;
                    cluster.apply_replica_bitmap(namespace, node, &bitmap, write)?;
                }
            }
        }
    }

    if let Some(gen) = info
        .get("partition-generation")
        .and_then(|s| s.parse::<u32>().ok())
    {
        node.set_partition_generation(gen);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ClientPolicy;

    #[test]
    fn register_and_unregister_keeps_registry_consistent() {
        let before = registry().lock().unwrap().clusters.len();
        let cluster = Cluster::new(ClientPolicy::default(), &[]);
        assert_eq!(registry().lock().unwrap().clusters.len(), before + 1);
        cluster.close();
    }

    #[test]
    fn tend_now_is_safe_on_an_empty_cluster() {
        let cluster = Cluster::new(ClientPolicy::default(), &[]);
        tend_now(&cluster);
        assert!(cluster.nodes().is_empty());
        cluster.close();
    }
}
