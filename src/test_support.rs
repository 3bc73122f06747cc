// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Shared test fixtures: an in-memory `ConnectionContext`/`ProtocolCodec`
//! pair and a minimal `InfoMap`, grounded in the teacher's habit of
//! providing a `redis-test`-style mock connection for higher-level tests
//! (adapted here to one fixture module rather than a whole companion
//! crate, since this crate is far smaller than `redis-rs`).
#![cfg(test)]

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::ClusterResult;
use crate::external::{ConnectionContext, InfoMap, ParseOutcome, Reply};

/// A line-oriented toy protocol: `+<value>\n` for a value reply,
/// `-<message>\n` for an error reply. Good enough to exercise framing and
/// redirection parsing without pulling in a real RESP implementation,
/// which is explicitly out of scope (spec §1).
pub(crate) struct FakeCodec;

impl crate::external::ProtocolCodec for FakeCodec {
    fn render_request(&self, request: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, arg) in request.iter().enumerate() {
            if i > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(arg);
        }
        out.push(b'\n');
        out
    }

    fn parse_reply<'a>(&self, input: &'a [u8]) -> ParseOutcome<'a> {
        match input.iter().position(|b| *b == b'\n') {
            None => ParseOutcome::More,
            Some(pos) => {
                let line = &input[..pos];
                let tail = &input[pos + 1..];
                match line.split_first() {
                    Some((b'+', rest)) => ParseOutcome::Done {
                        tail,
                        reply: Reply::Value(rest.to_vec()),
                    },
                    Some((b'-', rest)) => ParseOutcome::Done {
                        tail,
                        reply: Reply::Error(String::from_utf8_lossy(rest).into_owned()),
                    },
                    _ => ParseOutcome::Fail,
                }
            }
        }
    }
}

pub(crate) fn encode_reply(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::new();
    match reply {
        Reply::Value(v) => {
            out.push(b'+');
            out.extend_from_slice(v);
        }
        Reply::Error(e) => {
            out.push(b'-');
            out.extend_from_slice(e.as_bytes());
        }
    }
    out.push(b'\n');
    out
}

/// A `ConnectionContext` whose `recv` plays back a scripted byte stream,
/// one chunk at a time, then reports EOF.
pub(crate) struct ScriptedConnectionContext {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    pub(crate) sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedConnectionContext {
    pub(crate) fn replying_with(replies: Vec<Reply>) -> Self {
        let bytes: Vec<u8> = replies.iter().flat_map(|r| encode_reply(r)).collect();
        ScriptedConnectionContext {
            chunks: Mutex::new(VecDeque::from([bytes])),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn eof_immediately() -> Self {
        ScriptedConnectionContext {
            chunks: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl ConnectionContext for ScriptedConnectionContext {
    fn send(&mut self, bytes: &[u8]) -> ClusterResult<()> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> ClusterResult<()> {
        Ok(())
    }

    fn recv(&mut self) -> ClusterResult<Vec<u8>> {
        Ok(self.chunks.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn disconnect(&mut self) {}
}

/// An `InfoMap` backed by a fixed table of command name -> key argument
/// indices (1-based positions within the request, position 0 being the
/// command name itself is never a key).
pub(crate) struct FakeInfoMap {
    known_no_key_commands: Vec<&'static str>,
}

impl FakeInfoMap {
    pub(crate) fn new() -> Self {
        FakeInfoMap {
            known_no_key_commands: vec!["PING", "MULTI", "EXEC", "ASKING", "DBSIZE"],
        }
    }
}

impl InfoMap for FakeInfoMap {
    fn keys_for_request(&self, request: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
        let name = String::from_utf8_lossy(request.first()?).to_uppercase();
        match name.as_str() {
            "GET" | "DEL" | "INCR" | "TYPE" => Some(vec![request.get(1)?.clone()]),
            "SET" => Some(vec![request.get(1)?.clone()]),
            "MGET" => Some(request[1..].to_vec()),
            _ if self.known_no_key_commands.contains(&name.as_str()) => Some(vec![]),
            _ => {
                if name == "UNKNOWNCMD" {
                    None
                } else {
                    Some(vec![])
                }
            }
        }
    }
}

pub(crate) fn req(parts: &[&str]) -> Vec<Vec<u8>> {
    parts.iter().map(|s| s.as_bytes().to_vec()).collect()
}
