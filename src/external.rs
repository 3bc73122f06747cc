// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! External collaborator capabilities (spec §6). These are the pieces
//! spec.md explicitly puts out of scope: the byte-level wire codec, TCP/TLS
//! I/O, and command-key metadata. This crate is generic over them via the
//! traits below, the same way the teacher keeps `redis-rs` generic over
//! `ConnectionLike` rather than hard-coding a transport.

use std::time::Duration;

use crate::error::ClusterResult;

/// A raw, unencoded request: a list of argument byte strings (e.g.
/// `["SET", "k", "v"]`).
pub type RawRequest = Vec<Vec<u8>>;

/// An opaque reply value as produced by [`ProtocolCodec`]. The engine only
/// needs to recognize error replies and inspect their payload for MOVED/
/// ASK/TRYAGAIN; everything else is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A successful, non-error reply. Opaque to this crate.
    Value(Vec<u8>),
    /// An error reply; `message` is the raw error payload (e.g.
    /// `"MOVED 12182 10.0.0.2:6380"`), without the leading `-` the wire
    /// format uses to mark it as an error.
    Error(String),
}

impl Reply {
    pub fn as_error(&self) -> Option<&str> {
        match self {
            Reply::Error(msg) => Some(msg.as_str()),
            Reply::Value(_) => None,
        }
    }
}

/// Establishes a [`ConnectionContext`] for a given node address (spec §6's
/// `connect(host, port, timeoutOpt) -> ctx`). Supplied once at
/// [`crate::connection::Connection::connect`] time, invoked once per
/// distinct node in the shard map at that point, and retained for the
/// connection's whole lifetime so it can be invoked again later for any
/// node that only appears once the shard map is refreshed.
pub trait ConnectionFactory: Send + Sync {
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> ClusterResult<Box<dyn ConnectionContext>>;
}

/// Per-node TCP/TLS transport capability (spec §6). One instance per
/// [`crate::shard_map::Node`] for the lifetime of a
/// [`crate::connection::Connection`].
///
/// Implementations own the actual socket; this crate calls `send`/`flush`/
/// `recv` without ever inspecting the bytes itself.
pub trait ConnectionContext: Send {
    /// Writes `bytes` to the connection's outgoing buffer without
    /// necessarily transmitting them yet.
    fn send(&mut self, bytes: &[u8]) -> ClusterResult<()>;

    /// Transmits everything buffered by prior `send` calls.
    fn flush(&mut self) -> ClusterResult<()>;

    /// Returns the next available chunk of bytes, or an empty slice on
    /// EOF. Must not block forever past whatever timeout the
    /// implementation was configured with at connect time.
    fn recv(&mut self) -> ClusterResult<Vec<u8>>;

    /// Tears down the connection. Best-effort; errors are not
    /// propagated by callers of [`crate::connection::disconnect`].
    fn disconnect(&mut self);
}

/// Result of attempting to parse one reply out of a byte stream
/// (spec §6).
pub enum ParseOutcome<'a> {
    /// A full reply was parsed. `tail` is the unconsumed remainder of the
    /// input, which must seed the next invocation.
    Done { tail: &'a [u8], reply: Reply },
    /// Not enough input yet; the caller must `recv` more bytes and retry
    /// with the concatenation of the unconsumed remainder and the new
    /// chunk.
    More,
    /// The input was malformed.
    Fail,
}

/// The byte-level wire protocol: render a request, parse one reply at a
/// time (spec §6). Implementations own framing; this crate only threads
/// the remainder buffer across calls (spec §4.3).
pub trait ProtocolCodec: Send + Sync {
    /// Serializes a raw request into wire bytes ready for `send`.
    fn render_request(&self, request: &[Vec<u8>]) -> Vec<u8>;

    /// Attempts to parse exactly one reply from `input`, which is the
    /// concatenation of the previous call's unconsumed tail and any newly
    /// received bytes.
    fn parse_reply<'a>(&self, input: &'a [u8]) -> ParseOutcome<'a>;
}

/// Command-key metadata (spec §6): "which argument positions hold keys
/// for each command name". Out of scope to implement; this crate only
/// consumes it.
pub trait InfoMap: Send + Sync {
    /// Returns the keys referenced by `request`, or `None` if the command
    /// name is not recognized at all. An empty vector means the command
    /// is known to have no keys.
    fn keys_for_request(&self, request: &[Vec<u8>]) -> Option<Vec<Vec<u8>>>;
}

/// Opaque telemetry pass-through (spec §6). This crate never inspects a
/// `Hooks` value; it only threads it through [`crate::connection::Connection`]
/// so callers can observe batch boundaries, redirections, etc. if they
/// choose to extend it.
pub trait Hooks: Send + Sync {
    /// Called once per flushed batch, after replies have been assembled,
    /// with the number of distinct nodes the batch was sent to.
    fn on_batch_flushed(&self, _node_count: usize) {}

    /// Called whenever a MOVED or ASK redirection is observed.
    fn on_redirect(&self, _kind: &str, _slot: crate::shard_map::HashSlot) {}
}

/// A `Hooks` implementation that does nothing, for callers with no
/// telemetry to attach.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;
impl Hooks for NoopHooks {}
