// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Shard map data model (spec §3, §4.2), grounded on the teacher's
//! `cluster_routing.rs` (`Slot`) and `cluster_slotmap.rs` (`SlotMap`,
//! `ShardAddrs`), simplified to the dense representation spec.md §3
//! mandates ("dense mapping HashSlot -> Shard (all 16384 slots)") rather
//! than the teacher's range-compressed `BTreeMap`.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::hash_slot::SLOT_COUNT;

/// A hash slot, always in `[0, 16383]`.
pub type HashSlot = u16;

/// Opaque node identifier assigned by the cluster.
pub type NodeId = Arc<str>;

/// Whether a [`Node`] is the shard's primary or one of its replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Master,
    Replica,
}

/// A single cluster node. Equality and ordering are by `id` alone, per
/// spec §3 (two `Node`s with different host/port but the same id compare
/// equal — the id is the cluster's source of truth).
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, role: NodeRole, host: impl Into<String>, port: u16) -> Self {
        Node {
            id: id.into(),
            role,
            host: host.into(),
            port,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.id)
    }
}

/// One master plus zero or more replicas, all owning the same set of
/// slots at a given topology snapshot.
#[derive(Debug, Clone)]
pub struct Shard {
    pub master: Arc<Node>,
    pub replicas: Vec<Arc<Node>>,
}

impl Shard {
    pub fn new(master: Node, replicas: Vec<Node>) -> Self {
        Shard {
            master: Arc::new(master),
            replicas: replicas.into_iter().map(Arc::new).collect(),
        }
    }
}

/// An immutable snapshot mapping every one of the 16384 hash slots to a
/// shard. Constructed once by `refreshShardMap` and swapped in wholesale
/// (spec §3, §5): this type itself carries no interior mutability, the
/// enclosing `Mutex`/`ArcSwap`-like cell in [`crate::connection::Connection`]
/// is what makes refresh atomic.
#[derive(Debug, Clone)]
pub struct ShardMap {
    slots: Arc<[Shard; SLOT_COUNT as usize]>,
}

impl ShardMap {
    /// Builds a dense shard map from a list of `(slot, shard)` pairs.
    /// Every slot not explicitly assigned falls back to `default_shard`;
    /// callers constructing a map from a real `CLUSTER SLOTS` response are
    /// expected to cover every slot explicitly, but tests find it
    /// convenient to build partial maps.
    pub fn from_assignments(
        assignments: impl IntoIterator<Item = (HashSlot, Shard)>,
        default_shard: Shard,
    ) -> Self {
        const NONE: Option<Shard> = None;
        let mut slots: [Option<Shard>; SLOT_COUNT as usize] = [NONE; SLOT_COUNT as usize];
        for (slot, shard) in assignments {
            slots[slot as usize] = Some(shard);
        }
        let filled = slots.map(|s| s.unwrap_or_else(|| default_shard.clone()));
        ShardMap {
            slots: Arc::new(filled),
        }
    }

    /// `shardForSlot` (spec §4.2): O(1) lookup.
    pub fn shard_for_slot(&self, slot: HashSlot) -> &Shard {
        &self.slots[slot as usize]
    }

    /// `nodes` (spec §6): deduplicated list of every master and replica
    /// across all shards, ordered by node id for deterministic iteration.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for shard in self.slots.iter() {
            for node in std::iter::once(&shard.master).chain(shard.replicas.iter()) {
                if seen.insert(node.id.clone()) {
                    out.push(node.clone());
                }
            }
        }
        out.sort();
        out
    }

    /// Deduplicated list of every shard's master, ordered by node id.
    /// Used for broadcast routing (spec §4.4) and kept deterministic per
    /// spec §9's open question about broadcast reply ordering.
    pub fn all_masters(&self) -> Vec<Arc<Node>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for shard in self.slots.iter() {
            if seen.insert(shard.master.id.clone()) {
                out.push(shard.master.clone());
            }
        }
        out.sort();
        out
    }

    /// `nodeByHostPort` (spec §4.2): linear scan, used only on ASK
    /// redirection (rare, so no index is maintained for it).
    pub fn node_by_host_port(&self, host: &str, port: u16) -> Option<Arc<Node>> {
        for shard in self.slots.iter() {
            if shard.master.host == host && shard.master.port == port {
                return Some(shard.master.clone());
            }
            for replica in &shard.replicas {
                if replica.host == host && replica.port == port {
                    return Some(replica.clone());
                }
            }
        }
        None
    }
}

impl fmt::Display for ShardMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "shard map ({} masters):", self.all_masters().len())?;
        let mut run_start = 0u16;
        for slot in 1..SLOT_COUNT {
            if !Arc::ptr_eq(
                &self.slots[run_start as usize].master,
                &self.slots[slot as usize].master,
            ) {
                writeln!(
                    f,
                    "  [{run_start}-{}] -> {}",
                    slot - 1,
                    self.slots[run_start as usize].master
                )?;
                run_start = slot;
            }
        }
        writeln!(
            f,
            "  [{run_start}-{}] -> {}",
            SLOT_COUNT - 1,
            self.slots[run_start as usize].master
        )
    }
}
