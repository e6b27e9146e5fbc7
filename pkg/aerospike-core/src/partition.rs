//! Per-namespace partition routing table (spec §3 "Partition table", §4.D).

use std::collections::HashMap;
use std::sync::Arc;

use common::bits::BitVector;

use crate::errors::ResultCode;
use crate::node::Node;

#[derive(Clone, Default)]
struct Slot {
    read_owner: Option<Arc<Node>>,
    write_owner: Option<Arc<Node>>,
}

/// One namespace's partition ownership map plus its strong-consistency flag
/// (spec §3, §4.D "sc_mode").
pub struct PartitionTable {
    slots: Vec<Slot>,
    pub sc_mode: bool,
}

impl PartitionTable {
    pub fn new(n_partitions: u32) -> Self {
        Self {
            slots: vec![Slot::default(); n_partitions as usize],
            sc_mode: false,
        }
    }

    /// Returns the read or write owner of `partition_id`, or `None` if
    /// unknown — a valid result that forces the caller to fall back (spec
    /// §4.D "Lookup").
    pub fn lookup(&self, partition_id: u32, write: bool) -> Option<Arc<Node>> {
        let slot = self.slots.get(partition_id as usize)?;
        if write {
            slot.write_owner.clone()
        } else {
            slot.read_owner.clone()
        }
    }

    /// Atomically replaces one slot's owner, releasing the previous owner's
    /// reference implicitly when the `Arc` is dropped (spec §4.D "Update").
    pub fn set(&mut self, partition_id: u32, node: Arc<Node>, write: bool) {
        if let Some(slot) = self.slots.get_mut(partition_id as usize) {
            if write {
                slot.write_owner = Some(node);
            } else {
                slot.read_owner = Some(node);
            }
        }
    }

    /// Clears every slot owned by `node` (spec §4.D "Remove-node", used by
    /// the tender when a node is retired).
    pub fn remove_node(&mut self, node: &Node) {
        for slot in &mut self.slots {
            if slot.read_owner.as_deref() == Some(node) {
                slot.read_owner = None;
            }
            if slot.write_owner.as_deref() == Some(node) {
                slot.write_owner = None;
            }
        }
    }

    pub fn n_partitions(&self) -> u32 {
        self.slots.len() as u32
    }

    /// `true` once every slot has a write owner (spec §8: "after `tend()`
    /// completes without errors, every partition id owned by the cluster
    /// has a non-null write_owner in every namespace seen").
    pub fn fully_mapped_for_write(&self) -> bool {
        self.slots.iter().all(|s| s.write_owner.is_some())
    }
}

/// Decodes the `replicas-read`/`replicas-write` bitmap for one namespace
/// (spec §6 "Partition replicas encoding") and installs ownership for every
/// set bit onto `node`.
pub fn apply_replica_bitmap(
    table: &mut PartitionTable,
    node: &Arc<Node>,
    bitmap: &[u8],
    write: bool,
) -> Result<(), ResultCode> {
    let expected_bytes = common::ceil_div(table.n_partitions() as usize, 8);
    if bitmap.len() != expected_bytes {
        return Err(ResultCode::Protocol(format!(
            "replica bitmap is {} bytes, expected {} for {} partitions",
            bitmap.len(),
            expected_bytes,
            table.n_partitions()
        )));
    }

    let bits = BitVector::from_raw_vec(bitmap.to_vec());
    for partition_id in 0..table.n_partitions() {
        if bits.get(partition_id as usize) == Some(1) {
            table.set(partition_id, node.clone(), write);
        }
    }

    Ok(())
}

/// The full set of per-namespace tables a cluster tracks (spec §3
/// "organized as a linked list keyed by namespace" — expressed here as a
/// `HashMap` since namespace lookup, not insertion order, is what matters).
#[derive(Default)]
pub struct PartitionTables {
    tables: HashMap<String, PartitionTable>,
}

impl PartitionTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str) -> Option<&PartitionTable> {
        self.tables.get(namespace)
    }

    /// Allocates the namespace table on first touch (spec §4.D "Update"
    /// step 1).
    pub fn get_or_create(&mut self, namespace: &str, n_partitions: u32) -> &mut PartitionTable {
        self.tables
            .entry(namespace.to_string())
            .or_insert_with(|| PartitionTable::new(n_partitions))
    }

    pub fn remove_node(&mut self, node: &Node) {
        for table in self.tables.values_mut() {
            table.remove_node(node);
        }
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn node(name: &str) -> Arc<Node> {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        Arc::new(Node::new(name, addr, 4, Duration::from_secs(1), 50))
    }

    #[test]
    fn lookup_returns_none_for_unmapped_partition() {
        let table = PartitionTable::new(1024);
        assert!(table.lookup(5, true).is_none());
    }

    #[test]
    fn set_then_lookup_round_trips() {
        let mut table = PartitionTable::new(1024);
        let n = node("BB9A");
        table.set(5, n.clone(), true);
        assert_eq!(table.lookup(5, true).unwrap().name, "BB9A");
        assert!(table.lookup(5, false).is_none());
    }

    #[test]
    fn remove_node_clears_only_its_own_slots() {
        let mut table = PartitionTable::new(4);
        let a = node("A");
        let b = node("B");
        table.set(0, a.clone(), true);
        table.set(1, b.clone(), true);

        table.remove_node(&a);
        assert!(table.lookup(0, true).is_none());
        assert_eq!(table.lookup(1, true).unwrap().name, "B");
    }

    #[test]
    fn apply_replica_bitmap_installs_owners_for_set_bits() {
        let mut table = PartitionTable::new(16);
        let n = node("BB9A");
        // bits 0 and 9 set (MSB-first within each byte, per BitVector).
        let bitmap = vec![0b1000_0000, 0b0100_0000];
        apply_replica_bitmap(&mut table, &n, &bitmap, true).unwrap();

        assert_eq!(table.lookup(0, true).unwrap().name, "BB9A");
        assert_eq!(table.lookup(9, true).unwrap().name, "BB9A");
        assert!(table.lookup(1, true).is_none());
    }

    #[test]
    fn apply_replica_bitmap_rejects_wrong_size() {
        let mut table = PartitionTable::new(16);
        let n = node("BB9A");
        assert!(apply_replica_bitmap(&mut table, &n, &[0u8], true).is_err());
    }

    #[test]
    fn fully_mapped_for_write_requires_every_slot() {
        let mut table = PartitionTable::new(2);
        assert!(!table.fully_mapped_for_write());
        table.set(0, node("A"), true);
        assert!(!table.fully_mapped_for_write());
        table.set(1, node("B"), true);
        assert!(table.fully_mapped_for_write());
    }
}
