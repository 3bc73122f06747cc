// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! A single TCP stream to one node (spec §3, §4.3), grounded on the
//! teacher's per-node bookkeeping in `cluster_async/connections_container.rs`
//! (`ClusterNode`), adapted here to a blocking send/flush/recv loop since
//! the engine as a whole is synchronous (spec §5).

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{ClusterError, ClusterResult};
use crate::external::{ConnectionContext, ParseOutcome, ProtocolCodec, RawRequest, Reply};
use crate::shard_map::NodeId;

/// One connection to one cluster node, carrying the receive-buffer
/// remainder needed for incremental reply parsing across calls (spec §3).
pub struct NodeConnection {
    pub(crate) id: NodeId,
    host: String,
    port: u16,
    ctx: Box<dyn ConnectionContext>,
    recv_remainder: Vec<u8>,
}

impl NodeConnection {
    pub fn new(id: NodeId, host: String, port: u16, ctx: Box<dyn ConnectionContext>) -> Self {
        NodeConnection {
            id,
            host,
            port,
            ctx,
            recv_remainder: Vec::new(),
        }
    }

    /// Used by `nodeByHostPort` (spec §4.2) on ASK redirection.
    pub fn host_port(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// `requestNode` (spec §4.3): sends every request in `requests` as one
    /// batch, then reads exactly that many replies back in order.
    ///
    /// Callers must not invoke this concurrently for the same
    /// `NodeConnection` (spec §5: "single-writer during one `requestNode`
    /// call").
    pub fn request_node(
        &mut self,
        codec: &dyn ProtocolCodec,
        requests: &[RawRequest],
    ) -> ClusterResult<Vec<Reply>> {
        for request in requests {
            let bytes = codec.render_request(request);
            self.ctx.send(&bytes)?;
        }
        self.ctx.flush()?;

        debug!(node = %self.id, count = requests.len(), "sent pipelined batch");

        let mut replies = Vec::with_capacity(requests.len());
        for _ in requests {
            replies.push(self.read_one_reply(codec)?);
        }
        Ok(replies)
    }

    /// Reads exactly one reply, threading `recv_remainder` across `recv`
    /// calls so framing survives short reads (spec §4.3).
    fn read_one_reply(&mut self, codec: &dyn ProtocolCodec) -> ClusterResult<Reply> {
        loop {
            match codec.parse_reply(&self.recv_remainder) {
                ParseOutcome::Done { tail, reply } => {
                    self.recv_remainder = tail.to_vec();
                    return Ok(reply);
                }
                ParseOutcome::Fail => {
                    return Err(ClusterError::Io("malformed reply from server".into()));
                }
                ParseOutcome::More => {
                    let chunk = self.ctx.recv()?;
                    if chunk.is_empty() {
                        // The parser wants more input but the peer is gone.
                        // A "needs more input" result after EOF is the
                        // caller's bug to catch, not ours to retry forever.
                        return Err(ClusterError::Io("connection closed".into()));
                    }
                    self.recv_remainder.extend_from_slice(&chunk);
                }
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.ctx.disconnect();
    }
}

/// A shared, individually-lockable reference to one node's connection
/// (spec §3's `nodeConns` map entries). Cloning is cheap; each clone locks
/// the same underlying `NodeConnection` independently of every other
/// node's entry, so one node's in-flight `requestNode` call never blocks a
/// lookup or a send on a different node (spec §5).
#[derive(Clone)]
pub struct ConnHandle(Arc<Mutex<NodeConnection>>);

impl ConnHandle {
    pub fn new(conn: NodeConnection) -> Self {
        ConnHandle(Arc::new(Mutex::new(conn)))
    }

    /// `requestNode` (spec §4.3), locking this node's connection only for
    /// the duration of the call.
    pub fn request_node(&self, codec: &dyn ProtocolCodec, requests: &[RawRequest]) -> ClusterResult<Vec<Reply>> {
        self.0
            .lock()
            .expect("node connection mutex poisoned")
            .request_node(codec, requests)
    }

    pub fn host_port(&self) -> (String, u16) {
        let conn = self.0.lock().expect("node connection mutex poisoned");
        let (host, port) = conn.host_port();
        (host.to_string(), port)
    }

    pub fn disconnect(&self) {
        self.0.lock().expect("node connection mutex poisoned").disconnect();
    }
}

impl PartialEq for NodeConnection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for NodeConnection {}

impl PartialOrd for NodeConnection {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NodeConnection {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}
