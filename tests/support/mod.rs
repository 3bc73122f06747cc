// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Fixtures shared by the scenario tests, built entirely against the
//! crate's public API (the `#[cfg(test)]` fixtures in `src/test_support.rs`
//! aren't visible to an external test binary). Same toy line protocol as
//! the in-crate unit tests, duplicated here rather than shared because
//! `tests/` and `src/` compile as separate crates.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use clustermux::{ConnectionContext, ConnectionFactory, ClusterResult, InfoMap, Node, NodeRole, ParseOutcome, ProtocolCodec, RawRequest, Reply};

/// `+value\n` / `-error\n`: enough to exercise framing and MOVED/ASK
/// parsing without a real RESP implementation (out of scope, spec §1).
pub struct LineCodec;

impl ProtocolCodec for LineCodec {
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

fn encode_reply(reply: &Reply) -> Vec<u8> {
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

/// A `ConnectionContext` that replies with a fixed, pre-scripted sequence
/// of values and captures everything sent to it.
pub struct ScriptedContext {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedContext {
    pub fn replying_with(replies: Vec<Reply>) -> Self {
        let bytes: Vec<u8> = replies.iter().flat_map(|r| encode_reply(r)).collect();
        ScriptedContext {
            chunks: Mutex::new(VecDeque::from([bytes])),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl ConnectionContext for ScriptedContext {
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

/// A small hardcoded command -> key-position table, standing in for the
/// real command metadata spec.md §1/§6 puts out of scope.
pub struct TableInfoMap;

impl InfoMap for TableInfoMap {
    fn keys_for_request(&self, request: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
        let name = String::from_utf8_lossy(request.first()?).to_uppercase();
        match name.as_str() {
            "GET" | "DEL" | "INCR" | "TYPE" => Some(vec![request.get(1)?.clone()]),
            "SET" => Some(vec![request.get(1)?.clone()]),
            "MGET" => Some(request[1..].to_vec()),
            "PING" | "MULTI" | "EXEC" | "ASKING" | "DBSIZE" => Some(vec![]),
            "UNKNOWNCMD" => None,
            _ => Some(vec![]),
        }
    }
}

/// A `ConnectionFactory` whose replies are keyed by `(host, port)` and
/// handed out once each; a node with no entry gets an empty script (an
/// EOF on the first read it's asked to do).
pub struct FixedFactory {
    scripts: Mutex<HashMap<(String, u16), Vec<Reply>>>,
}

impl FixedFactory {
    pub fn new(scripts: HashMap<(String, u16), Vec<Reply>>) -> Self {
        FixedFactory {
            scripts: Mutex::new(scripts),
        }
    }
}

impl ConnectionFactory for FixedFactory {
    fn connect(&self, host: &str, port: u16, _timeout: Option<Duration>) -> ClusterResult<Box<dyn ConnectionContext>> {
        let mut table = self.scripts.lock().unwrap();
        let replies = table.remove(&(host.to_string(), port)).unwrap_or_default();
        Ok(Box::new(ScriptedContext::replying_with(replies)))
    }
}

pub fn req(parts: &[&str]) -> RawRequest {
    parts.iter().map(|s| s.as_bytes().to_vec()).collect()
}

pub fn master(id: &str, port: u16) -> Node {
    Node::new(id.to_string(), NodeRole::Master, "127.0.0.1", port)
}
