// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! The transaction evaluator (spec §4.8), grounded on the teacher's
//! `pipeline.rs::Pipeline::execute_transaction` MULTI/EXEC framing, with
//! the single-slot constraint from `cluster_routing.rs`'s cross-slot
//! detection applied to the whole batch rather than per request.

use tracing::warn;

use crate::error::{ClusterError, ClusterResult};
use crate::external::{Hooks, InfoMap, ProtocolCodec, RawRequest, Reply};
use crate::redirect::{self, NodeConnectionLookup, RedirectOutcome};
use crate::routing;
use crate::shard_map::ShardMap;

/// `transactionEvaluator` (spec §4.8). `requests` must begin with `MULTI`
/// at index 0 and end with `EXEC` at the last index; the caller
/// (`pipeline_state`) guarantees this by construction.
pub fn evaluate_transaction<L: NodeConnectionLookup>(
    codec: &dyn ProtocolCodec,
    lookup: &mut L,
    shard_map: &ShardMap,
    info_map: &dyn InfoMap,
    hooks: &dyn Hooks,
    mut refresh: impl FnMut() -> ClusterResult<ShardMap>,
    requests: &[RawRequest],
) -> ClusterResult<Vec<Reply>> {
    // Steps 1-3: union the keys of every request in the batch and collapse
    // them to a single slot, defaulting key-less transactions to slot 0.
    let mut all_keys = Vec::new();
    for request in requests {
        let name = routing::command_name(request).unwrap_or_default();
        let keys = info_map
            .keys_for_request(request)
            .ok_or(ClusterError::UnsupportedCommand(name))?;
        all_keys.extend(keys);
    }
    let slot = routing::slot_for_keys(&all_keys)?;

    // Step 4.
    let master_id = shard_map.shard_for_slot(slot).master.id.clone();
    let conn = lookup.by_node_id(&master_id)?;

    // Step 5: the whole MULTI..EXEC batch is one per-node pipeline.
    let replies = conn.request_node(codec, requests)?;
    hooks.on_batch_flushed(1);

    // Step 6: refresh is driven off the EXEC reply only (the last one).
    let mut shard_map_snapshot = shard_map.clone();
    let exec_moved = replies.last().and_then(redirect::parse_moved);
    if let Some(moved) = &exec_moved {
        hooks.on_redirect("MOVED", moved.slot);
        warn!(slot = moved.slot, "MOVED observed on EXEC, refreshing shard map");
        shard_map_snapshot = refresh()?;
    } else if let Some(ask) = replies.last().and_then(redirect::parse_ask) {
        hooks.on_redirect("ASK", ask.slot);
    }

    // Step 7: redirect applies at the batch level — a MOVED on EXEC
    // re-runs the entire transaction on the new target.
    let outcome = redirect::apply_redirect(
        codec,
        lookup,
        &shard_map_snapshot,
        || {
            refresh()?;
            Ok(())
        },
        requests,
        replies,
        0,
    )?;
    match outcome {
        RedirectOutcome::Unchanged(replies) | RedirectOutcome::Redirected(replies) => Ok(replies),
    }
}
