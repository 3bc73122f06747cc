// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! A cluster-aware pipelining engine for a sharded in-memory key-value
//! store client.
//!
//! This crate is the CORE described in its design notes: given a live
//! shard map and a stream of requests from application code, it decides
//! which node each request belongs to, batches requests bound for the
//! same node, dispatches them, reassembles replies in submission order,
//! and handles `MOVED`/`ASK` cluster redirection and `MULTI`/`EXEC`
//! transactions. It does not implement a wire protocol, a transport, or
//! command-key metadata — those are supplied by the host application
//! through the traits in [`external`].

pub mod config;
pub mod connection;
pub mod error;
pub mod evaluator;
pub mod external;
pub mod hash_slot;
pub mod node_connection;
pub mod pipeline_state;
pub mod redirect;
pub mod routing;
pub mod shard_map;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use config::ClusterConfig;
pub use connection::{Connection, LazyReplyHandle};
pub use error::{ClusterError, ClusterResult};
pub use external::{ConnectionContext, ConnectionFactory, Hooks, InfoMap, NoopHooks, ProtocolCodec, RawRequest, Reply};
pub use hash_slot::key_to_slot;
pub use shard_map::{HashSlot, Node, NodeId, NodeRole, Shard, ShardMap};
