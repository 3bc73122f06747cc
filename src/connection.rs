// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! `Connection` (spec §3, §6): the public entry point tying together node
//! connections, the pipeline state machine, and the shard map, grounded on
//! the teacher's `cluster_async/connections_container.rs` for the
//! node-map shape and on `socket_listener.rs` for the overall
//! connect/disconnect/request lifecycle (adapted to synchronous I/O, spec
//! §5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::external::{ConnectionFactory, Hooks, InfoMap, ProtocolCodec, RawRequest, Reply};
use crate::node_connection::{ConnHandle, NodeConnection};
use crate::pipeline_state::{FlushTrigger, PipelineCell, PipelineRef, PipelineState};
use crate::redirect::NodeConnectionLookup;
use crate::shard_map::{Node, NodeId, ShardMap};
use crate::{evaluator, transaction};

/// A live `NodeConnectionLookup` over `node_conns` (spec §3's `nodeConns`).
/// Constructed fresh for the lifetime of one batch evaluation; see
/// [`Connection::run_batch`]. Unlike a plain `&mut HashMap` borrow, this
/// only takes the `node_conns` mutex for the brief map lookup/insert in
/// each method, never across the `ConnHandle::request_node` I/O the
/// evaluators drive afterward (spec §5: per-node contention, not
/// whole-map contention).
struct ConnMapLookup<'a> {
    node_conns: &'a Mutex<HashMap<NodeId, ConnHandle>>,
    factory: &'a Arc<dyn ConnectionFactory>,
    connect_timeout: Option<Duration>,
}

impl NodeConnectionLookup for ConnMapLookup<'_> {
    fn by_node_id(&mut self, id: &NodeId) -> ClusterResult<ConnHandle> {
        self.node_conns
            .lock()
            .expect("node connections mutex poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ClusterError::missing_node(format!("node {id}")))
    }

    fn by_host_port(&mut self, host: &str, port: u16) -> Option<ConnHandle> {
        self.node_conns
            .lock()
            .expect("node connections mutex poisoned")
            .values()
            .find(|conn| conn.host_port() == (host.to_string(), port))
            .cloned()
    }

    fn connect_if_missing(&mut self, node: &Node) -> ClusterResult<ConnHandle> {
        let mut conns = self.node_conns.lock().expect("node connections mutex poisoned");
        if let Some(existing) = conns.get(&node.id) {
            return Ok(existing.clone());
        }
        let ctx = self.factory.connect(&node.host, node.port, self.connect_timeout)?;
        let handle = ConnHandle::new(NodeConnection::new(node.id.clone(), node.host.clone(), node.port, ctx));
        conns.insert(node.id.clone(), handle.clone());
        debug!(node = %node.id, host = %node.host, node_port = node.port, "opened connection to node discovered via refresh");
        Ok(handle)
    }
}

/// The cluster connection (spec §3). Callers obtain one via
/// [`Connection::connect`] and submit requests via
/// [`Connection::request_pipelined`]; `Arc<Connection>` is required since
/// outstanding [`LazyReplyHandle`]s hold a reference back to it.
pub struct Connection {
    node_conns: Mutex<HashMap<NodeId, ConnHandle>>,
    factory: Arc<dyn ConnectionFactory>,
    pipeline: PipelineRef,
    shard_map: Mutex<ShardMap>,
    info_map: Arc<dyn InfoMap>,
    hooks: Arc<dyn Hooks>,
    codec: Arc<dyn ProtocolCodec>,
    config: ClusterConfig,
}

impl Connection {
    /// `connect` (spec §6): opens one `NodeConnection` per distinct node
    /// in `shard_map` via `factory`, matching spec §3's invariant that
    /// `nodeConns` covers every node present in the shard map at connect
    /// time. `factory` is retained for the lifetime of the connection so
    /// that a node appearing only once the shard map is later refreshed
    /// (e.g. a MOVED target) can still be connected to on demand.
    pub fn connect(
        info_map: Arc<dyn InfoMap>,
        shard_map: ShardMap,
        factory: Arc<dyn ConnectionFactory>,
        hooks: Arc<dyn Hooks>,
        codec: Arc<dyn ProtocolCodec>,
        config: ClusterConfig,
    ) -> ClusterResult<Arc<Connection>> {
        let mut conns = HashMap::new();
        for node in shard_map.nodes() {
            let ctx = factory.connect(&node.host, node.port, config.connect_timeout)?;
            conns.insert(
                node.id.clone(),
                ConnHandle::new(NodeConnection::new(node.id.clone(), node.host.clone(), node.port, ctx)),
            );
        }
        info!(nodes = conns.len(), "cluster connection established");
        Ok(Arc::new(Connection {
            node_conns: Mutex::new(conns),
            factory,
            pipeline: PipelineRef::new(),
            shard_map: Mutex::new(shard_map),
            info_map,
            hooks,
            codec,
            config,
        }))
    }

    /// `disconnect` (spec §6): tears down every node connection. Errors
    /// from individual disconnects are not propagated (spec §3: "Best
    /// effort").
    pub fn disconnect(&self) {
        let conns = self.node_conns.lock().expect("node connections mutex poisoned");
        for conn in conns.values() {
            conn.disconnect();
        }
    }

    /// `nodes` (spec §6).
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.shard_map.lock().expect("shard map mutex poisoned").nodes()
    }

    /// `hooks` (spec §6).
    pub fn hooks(&self) -> &Arc<dyn Hooks> {
        &self.hooks
    }

    /// A point-in-time copy of the current shard map, mostly useful for
    /// diagnostics and tests; the evaluators take their own snapshot
    /// internally.
    pub fn shard_map_snapshot(&self) -> ShardMap {
        self.shard_map.lock().expect("shard map mutex poisoned").clone()
    }

    /// Installs a freshly discovered topology (spec §6's `refreshShardMap`
    /// external mechanism). A `refresh_shard_map` closure passed to
    /// [`Connection::request_pipelined`] is expected to call this on the
    /// same `Arc<Connection>` once it has fetched a new topology; this
    /// crate never calls it itself, since discovering the topology (e.g.
    /// issuing `CLUSTER SLOTS`) is out of scope (spec §1).
    pub fn set_shard_map(&self, map: ShardMap) {
        *self.shard_map.lock().expect("shard map mutex poisoned") = map;
    }

    /// `requestPipelined` (spec §4.6, §6). `refresh_shard_map` is the
    /// effectful action named in spec §6: when invoked (at most once per
    /// flushed batch, on a MOVED reply) it is expected to fetch a fresh
    /// topology and call [`Connection::set_shard_map`] on the same
    /// connection to install it. This crate calls the closure and then
    /// re-reads its own shard map cell to pick up whatever it installed.
    pub fn request_pipelined(
        self: &Arc<Self>,
        request: RawRequest,
        refresh_shard_map: impl FnMut() -> ClusterResult<()> + Send + 'static,
    ) -> LazyReplyHandle {
        let mut refresh_box: Box<dyn FnMut() -> ClusterResult<()> + Send> = Box::new(refresh_shard_map);

        let submit = self.pipeline.submit(request, self.config.flush_threshold);

        if let FlushTrigger::Eager(batch) = submit.flush {
            debug!(
                requests = batch.requests.len(),
                transaction = batch.is_transaction,
                "eager flush triggered by arriving request"
            );
            self.run_sealed(&batch.cell, batch.requests, batch.is_transaction, refresh_box.as_mut());
        }

        LazyReplyHandle {
            connection: self.clone(),
            cell: submit.cell,
            index: submit.index,
            refresh: Mutex::new(Some(refresh_box)),
        }
    }

    /// Runs a batch (either the non-transactional or the transaction
    /// evaluator) against the current node/shard-map state (spec §4.7,
    /// §4.8). Per spec §5's lock order, `node_conns` is only ever locked
    /// briefly, by `ConnMapLookup`, to read or insert a map entry — never
    /// held across the `ConnHandle::request_node` I/O the evaluators below
    /// drive, so a batch in flight on one node never blocks a lookup for a
    /// different node. Neither `PMutex` nor `CMutex` are touched here,
    /// both of which callers already hold or have released before
    /// reaching here.
    fn run_batch(
        &self,
        requests: Vec<RawRequest>,
        is_transaction: bool,
        refresh: &mut dyn FnMut() -> ClusterResult<()>,
    ) -> ClusterResult<Vec<Reply>> {
        let mut lookup = ConnMapLookup {
            node_conns: &self.node_conns,
            factory: &self.factory,
            connect_timeout: self.config.connect_timeout,
        };
        let shard_map_snapshot = self.shard_map.lock().expect("shard map mutex poisoned").clone();

        let shard_map_cell = &self.shard_map;
        let mut refresh_adapter = move || -> ClusterResult<ShardMap> {
            refresh()?;
            Ok(shard_map_cell.lock().expect("shard map mutex poisoned").clone())
        };

        if is_transaction {
            transaction::evaluate_transaction(
                self.codec.as_ref(),
                &mut lookup,
                &shard_map_snapshot,
                self.info_map.as_ref(),
                self.hooks.as_ref(),
                &mut refresh_adapter,
                &requests,
            )
        } else {
            evaluator::evaluate_pipeline(
                self.codec.as_ref(),
                &mut lookup,
                &shard_map_snapshot,
                self.info_map.as_ref(),
                self.hooks.as_ref(),
                &mut refresh_adapter,
                &requests,
            )
        }
    }

    /// Executes a batch whose requests were already detached from their
    /// cell by `pipeline_state::submit` (the eager-flush path of spec
    /// §4.5), and installs the result.
    fn run_sealed(
        &self,
        cell: &Arc<PipelineCell>,
        requests: Vec<RawRequest>,
        is_transaction: bool,
        refresh: &mut dyn FnMut() -> ClusterResult<()>,
    ) {
        let mut state = cell.state.lock().expect("pipeline cell mutex poisoned");
        let result = self.run_batch(requests, is_transaction, refresh);
        *state = match result {
            Ok(replies) => PipelineState::Executed(replies),
            Err(e) => PipelineState::Failed(e),
        };
    }

    /// `requestPipelined`'s first-observation step (spec §4.6 step 2): if
    /// `cell` is not already resolved, drains its queue and flushes it
    /// under its own `CMutex`, held for the duration of the evaluator call
    /// per spec §5.
    fn resolve_cell(&self, cell: &Arc<PipelineCell>, refresh: &mut dyn FnMut() -> ClusterResult<()>) {
        let mut state = cell.state.lock().expect("pipeline cell mutex poisoned");
        let (requests, is_transaction) = match &mut *state {
            PipelineState::Executed(_) | PipelineState::Failed(_) => return,
            PipelineState::Pending(q) => (std::mem::take(q).into_iter().rev().collect::<Vec<_>>(), false),
            PipelineState::TransactionPending(q) => {
                (std::mem::take(q).into_iter().rev().collect::<Vec<_>>(), true)
            }
        };
        let result = self.run_batch(requests, is_transaction, refresh);
        *state = match result {
            Ok(replies) => PipelineState::Executed(replies),
            Err(e) => PipelineState::Failed(e),
        };
    }
}

/// `LazyReplyHandle` (spec §4.6, §9): a deferred reply. Submission is
/// cheap; the first `resolve()` call forces its batch to execute, and the
/// result is memoized for every subsequent call.
pub struct LazyReplyHandle {
    connection: Arc<Connection>,
    cell: Arc<PipelineCell>,
    index: usize,
    refresh: Mutex<Option<Box<dyn FnMut() -> ClusterResult<()> + Send>>>,
}

impl LazyReplyHandle {
    /// Forces execution of this handle's batch if it hasn't run yet, and
    /// returns this handle's reply. Calling this repeatedly never
    /// re-sends anything (spec §8 property 6).
    pub fn resolve(&self) -> ClusterResult<Reply> {
        {
            let mut refresh_slot = self.refresh.lock().expect("refresh slot mutex poisoned");
            if let Some(mut refresh) = refresh_slot.take() {
                self.connection.resolve_cell(&self.cell, refresh.as_mut());
                *refresh_slot = Some(refresh);
            }
        }

        let state = self.cell.state.lock().expect("pipeline cell mutex poisoned");
        match &*state {
            PipelineState::Executed(replies) => Ok(replies[self.index].clone()),
            PipelineState::Failed(e) => Err(e.clone()),
            PipelineState::Pending(_) | PipelineState::TransactionPending(_) => {
                unreachable!("resolve_cell always leaves the cell Executed or Failed")
            }
        }
    }
}
