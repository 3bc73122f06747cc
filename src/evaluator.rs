// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! The non-transactional pipeline evaluator (spec §4.7), grounded on the
//! teacher's `cluster_async/pipeline_routing.rs` group-by-node /
//! zip-replies-back pattern, adapted from its `futures::future::join_all`
//! fan-out to a plain sequential loop over node groups since this crate
//! is synchronous (spec §5) and per-node group counts are small; §4.7
//! permits either a sequential or a `std::thread::scope`-parallel
//! implementation as long as ordering within each node group holds.

use std::collections::HashMap;

use tracing::warn;

use crate::error::ClusterResult;
use crate::external::{Hooks, InfoMap, ProtocolCodec, RawRequest, Reply};
use crate::redirect::{self, NodeConnectionLookup, RedirectOutcome};
use crate::routing::{self, Targets};
use crate::shard_map::{NodeId, ShardMap};

struct Dispatched {
    submission_index: usize,
    request: RawRequest,
}

/// `nonTransactionalEvaluator` (spec §4.7). `requests` is already in
/// submission order (the caller un-reverses the internal queue per §3's
/// invariant before calling this).
pub fn evaluate_pipeline<L: NodeConnectionLookup>(
    codec: &dyn ProtocolCodec,
    lookup: &mut L,
    shard_map: &ShardMap,
    info_map: &dyn InfoMap,
    hooks: &dyn Hooks,
    mut refresh: impl FnMut() -> ClusterResult<ShardMap>,
    requests: &[RawRequest],
) -> ClusterResult<Vec<Reply>> {
    let n = requests.len();

    // Step 1: the snapshot used for the initial grouping pass. Refresh (if
    // triggered below) only affects the subsequent per-reply redirect
    // pass, never this grouping.
    let mut groups: HashMap<NodeId, Vec<Dispatched>> = HashMap::new();
    for (submission_index, request) in requests.iter().enumerate() {
        match routing::resolve_targets(shard_map, info_map, request)? {
            Targets::Single(node) => {
                groups.entry(node.id.clone()).or_default().push(Dispatched {
                    submission_index,
                    request: request.clone(),
                });
            }
            Targets::Broadcast(nodes) => {
                for node in nodes {
                    groups.entry(node.id.clone()).or_default().push(Dispatched {
                        submission_index,
                        request: request.clone(),
                    });
                }
            }
        }
    }

    // Step 3: one send per distinct node, each preserving per-connection
    // request order.
    hooks.on_batch_flushed(groups.len());
    let mut completed: Vec<(usize, RawRequest, Reply)> = Vec::with_capacity(n);
    for (node_id, items) in groups {
        let conn = lookup.by_node_id(&node_id)?;
        let batch: Vec<RawRequest> = items.iter().map(|d| d.request.clone()).collect();
        let replies = conn.request_node(codec, &batch)?;
        for (dispatched, reply) in items.into_iter().zip(replies) {
            completed.push((dispatched.submission_index, dispatched.request, reply));
        }
    }

    // Step 4: at most one refresh for the whole batch, regardless of how
    // many replies came back MOVED.
    let mut shard_map_snapshot = shard_map.clone();
    let any_moved = completed
        .iter()
        .any(|(_, _, reply)| redirect::parse_moved(reply).is_some());
    if any_moved {
        warn!("MOVED observed in pipelined batch, refreshing shard map");
        shard_map_snapshot = refresh()?;
    }

    // Step 5: redirect handling applies per reply for the non-transactional
    // evaluator, so only the requests that were actually redirected get
    // re-dispatched.
    let mut finalized = Vec::with_capacity(n);
    for (submission_index, request, reply) in completed {
        if let Some(moved) = redirect::parse_moved(&reply) {
            hooks.on_redirect("MOVED", moved.slot);
        }
        if let Some(ask) = redirect::parse_ask(&reply) {
            hooks.on_redirect("ASK", ask.slot);
            warn!(slot = ask.slot, "ASK observed, resending with ASKING prefix");
        }
        let outcome = redirect::apply_redirect(
            codec,
            lookup,
            &shard_map_snapshot,
            || {
                refresh()?;
                Ok(())
            },
            std::slice::from_ref(&request),
            vec![reply],
            0,
        )?;
        let reply = match outcome {
            RedirectOutcome::Unchanged(r) | RedirectOutcome::Redirected(r) => r
                .into_iter()
                .next()
                .expect("apply_redirect preserves a 1:1 request:reply count for a singleton batch"),
        };
        finalized.push((submission_index, reply));
    }

    // Step 6.
    finalized.sort_by_key(|(idx, _)| *idx);
    Ok(finalized.into_iter().map(|(_, reply)| reply).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::NoopHooks;
    use crate::node_connection::{ConnHandle, NodeConnection};
    use crate::shard_map::{Node, NodeRole, Shard};
    use crate::test_support::{req, FakeCodec, FakeInfoMap, ScriptedConnectionContext};
    use std::collections::HashMap as StdHashMap;

    struct MapLookup {
        conns: StdHashMap<NodeId, ConnHandle>,
    }
    impl NodeConnectionLookup for MapLookup {
        fn by_node_id(&mut self, id: &NodeId) -> ClusterResult<ConnHandle> {
            self.conns
                .get(id)
                .cloned()
                .ok_or_else(|| crate::error::ClusterError::missing_node(id.to_string()))
        }
        fn by_host_port(&mut self, _host: &str, _port: u16) -> Option<ConnHandle> {
            None
        }
        fn connect_if_missing(&mut self, node: &Node) -> ClusterResult<ConnHandle> {
            self.conns
                .get(&node.id)
                .cloned()
                .ok_or_else(|| crate::error::ClusterError::missing_node(node.id.to_string()))
        }
    }

    fn node(id: &str, port: u16) -> Node {
        Node::new(id.to_string(), NodeRole::Master, "127.0.0.1", port)
    }

    #[test]
    fn simple_pipeline_routes_both_requests_to_one_node() {
        let m = node("m1", 7000);
        let shard = Shard::new(m.clone(), vec![]);
        let shard_map = ShardMap::from_assignments([], shard);

        let ctx = ScriptedConnectionContext::replying_with(vec![
            Reply::Value(b"OK".to_vec()),
            Reply::Value(b"v".to_vec()),
        ]);
        let mut conns = StdHashMap::new();
        conns.insert(
            NodeId::from("m1"),
            ConnHandle::new(NodeConnection::new("m1".into(), "127.0.0.1".into(), 7000, Box::new(ctx))),
        );
        let mut lookup = MapLookup { conns };

        let info = FakeInfoMap::new();
        let codec = FakeCodec;
        let replies = evaluate_pipeline(
            &codec,
            &mut lookup,
            &shard_map,
            &info,
            &NoopHooks,
            || panic!("refresh should not be called"),
            &[req(&["SET", "k", "v"]), req(&["GET", "k"])],
        )
        .unwrap();
        assert_eq!(replies, vec![Reply::Value(b"OK".to_vec()), Reply::Value(b"v".to_vec())]);
    }

    #[test]
    fn moved_reply_triggers_refresh_and_resend() {
        let old_master = node("old", 6379);
        let new_master = node("new", 6380);
        let old_shard = Shard::new(old_master.clone(), vec![]);
        let new_shard = Shard::new(new_master.clone(), vec![]);
        let shard_map = ShardMap::from_assignments([], old_shard);

        let old_ctx = ScriptedConnectionContext::replying_with(vec![Reply::Error(
            "MOVED 12182 127.0.0.1:6380".to_string(),
        )]);
        let new_ctx = ScriptedConnectionContext::replying_with(vec![Reply::Value(b"v".to_vec())]);
        let mut conns = StdHashMap::new();
        conns.insert(
            NodeId::from("old"),
            ConnHandle::new(NodeConnection::new("old".into(), "127.0.0.1".into(), 6379, Box::new(old_ctx))),
        );
        conns.insert(
            NodeId::from("new"),
            ConnHandle::new(NodeConnection::new("new".into(), "127.0.0.1".into(), 6380, Box::new(new_ctx))),
        );
        let mut lookup = MapLookup { conns };

        let info = FakeInfoMap::new();
        let codec = FakeCodec;
        let mut refresh_calls = 0;
        let new_shard_map = ShardMap::from_assignments([], new_shard);
        let replies = evaluate_pipeline(
            &codec,
            &mut lookup,
            &shard_map,
            &info,
            &NoopHooks,
            || {
                refresh_calls += 1;
                Ok(new_shard_map.clone())
            },
            &[req(&["GET", "k"])],
        )
        .unwrap();
        assert_eq!(refresh_calls, 1);
        assert_eq!(replies, vec![Reply::Value(b"v".to_vec())]);
    }
}
