// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Routing a single raw request to the node connection(s) it must be sent
//! to (spec §4.4), grounded on the teacher's `cluster_routing.rs`
//! (`RoutingInfo`, the broadcast-command table in
//! `ResponsePolicy::for_command`), simplified to spec.md's exact two-case
//! model: single-slot routing, or broadcast to every master.

use std::sync::Arc;

use crate::error::{ClusterError, ClusterResult};
use crate::external::{InfoMap, RawRequest};
use crate::hash_slot::key_to_slot;
use crate::shard_map::{HashSlot, Node, ShardMap};

/// Commands that broadcast to every distinct master rather than routing
/// by key (spec §4.4). Matched case-insensitively against the first
/// token, same convention as the teacher's `RoutingInfo::for_routable`.
const BROADCAST_COMMANDS: &[&str] = &["FLUSHALL", "FLUSHDB", "QUIT", "UNWATCH"];

pub(crate) fn command_name(request: &RawRequest) -> Option<String> {
    request
        .first()
        .map(|b| String::from_utf8_lossy(b).to_uppercase())
}

/// The slot(s) a request's keys resolve to, and whether it's a broadcast
/// command. Exposed separately from `nodeConnectionsFor` so the
/// transaction evaluator (§4.8) can reuse the single-slot resolution path
/// without going through a live `NodeConnection` map.
pub enum RequestTarget {
    Broadcast,
    Slot(HashSlot),
}

/// Resolves which slot a non-broadcast request's keys map to (spec §4.4
/// steps 2-3 and §4.8 steps 1-3): extracts keys via `InfoMap`, fails if
/// the keys span more than one slot, and falls back to slot 0 when there
/// are no keys.
pub fn resolve_target(
    info_map: &dyn InfoMap,
    request: &RawRequest,
) -> ClusterResult<RequestTarget> {
    let name = command_name(request).unwrap_or_default();
    if BROADCAST_COMMANDS.contains(&name.as_str()) {
        return Ok(RequestTarget::Broadcast);
    }

    let keys = info_map
        .keys_for_request(request)
        .ok_or_else(|| ClusterError::UnsupportedCommand(name.clone()))?;

    slot_for_keys(&keys).map(RequestTarget::Slot)
}

/// Collapses a set of keys to a single hash slot, failing *cross slot* if
/// they don't agree, and defaulting to slot 0 when there are no keys
/// (spec §4.4, §4.8, §9).
pub fn slot_for_keys(keys: &[Vec<u8>]) -> ClusterResult<HashSlot> {
    if keys.is_empty() {
        return Ok(0);
    }
    let mut slots: Vec<HashSlot> = keys.iter().map(|k| key_to_slot(k)).collect();
    slots.sort_unstable();
    slots.dedup();
    if slots.len() > 1 {
        return Err(ClusterError::CrossSlot { slots });
    }
    Ok(slots[0])
}

/// The node(s) a request must be routed to (spec §4.4's
/// `nodeConnectionsFor`, expressed as target nodes rather than live
/// connections). Callers — the evaluators — resolve each id to a live
/// `NodeConnection` one at a time against `Connection.node_conns`, since a
/// `HashMap` cannot safely yield more than one live `&mut` at once.
pub enum Targets {
    Broadcast(Vec<Arc<Node>>),
    Single(Arc<Node>),
}

pub fn resolve_targets(
    shard_map: &ShardMap,
    info_map: &dyn InfoMap,
    request: &RawRequest,
) -> ClusterResult<Targets> {
    match resolve_target(info_map, request)? {
        RequestTarget::Broadcast => Ok(Targets::Broadcast(shard_map.all_masters())),
        RequestTarget::Slot(slot) => Ok(Targets::Single(shard_map.shard_for_slot(slot).master.clone())),
    }
}
