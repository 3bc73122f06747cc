// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

use std::fmt;

use thiserror::Error;

use crate::shard_map::HashSlot;

/// The error taxonomy for the cluster-aware pipelining engine (spec §7).
///
/// Every fallible path in this crate resolves to one of these kinds. None
/// of them carry a backtrace or nested source chain beyond what's needed
/// to explain the routing decision that failed, matching the teacher's
/// `ClienUsageError`/`ClientCreationError` style in
/// `glide-core/src/socket_listener.rs`.
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    /// A request's keys (or a transaction's keys) span more than one hash
    /// slot.
    #[error("command keys span multiple hash slots ({slots:?})")]
    CrossSlot {
        /// The distinct slots the offending keys hashed to.
        slots: Vec<HashSlot>,
    },

    /// A shard's master has no live `NodeConnection`, or a slot has no
    /// shard assigned to it.
    #[error("no connection available for {what}")]
    MissingNode {
        /// What was missing: a slot, a node id, or a host:port pair.
        what: String,
    },

    /// The command name isn't present in the `InfoMap` at all.
    #[error("command `{0}` is not a recognized cluster command")]
    UnsupportedCommand(String),

    /// The server replied `TRYAGAIN`; per spec §4.8/§7 this is surfaced
    /// unchanged, never retried by this crate.
    #[error("server returned TRYAGAIN")]
    TryAgain,

    /// A send/recv/flush fault, or a clean EOF from the peer.
    #[error("connection closed: {0}")]
    Io(String),

    /// The codec reported "needs more input" after the socket already
    /// returned EOF. Spec §4.3 calls this a logic error, not a
    /// recoverable I/O fault.
    #[error("protocol parser requested more input after end of stream")]
    Protocol,

    /// The runtime detected an unrecoverable wait (spec §5): surfaced
    /// verbatim, never swallowed.
    #[error("deadlock detected: {0}")]
    Deadlock(String),
}

impl ClusterError {
    pub(crate) fn missing_node(what: impl fmt::Display) -> Self {
        ClusterError::MissingNode {
            what: what.to_string(),
        }
    }
}

/// Convenience alias used throughout the crate, mirroring the teacher's
/// `RedisResult<T>`.
pub type ClusterResult<T> = Result<T, ClusterError>;
