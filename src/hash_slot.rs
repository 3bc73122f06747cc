// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Pure hash-slot computation (spec §4.1), grounded on the teacher's
//! `cluster_topology.rs::slot`/`get_slot`/`get_hashtag`.

use crate::shard_map::HashSlot;

pub(crate) const SLOT_COUNT: u16 = 16384;

/// Returns the substring between the first `{` and the following `}` in
/// `key`, if any, provided it is non-empty. This is the Redis Cluster hash
/// tag convention: if present, only the tagged substring is hashed, so
/// multiple keys sharing a tag always land on the same slot.
fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|b| *b == b'{')?;
    let close = key[open..].iter().position(|b| *b == b'}')?;
    let inner = &key[open + 1..open + close];
    (!inner.is_empty()).then_some(inner)
}

/// Maps a key to its hash slot in `[0, 16383]`, honoring the `{tag}`
/// convention (spec §4.1).
pub fn key_to_slot(key: &[u8]) -> HashSlot {
    let hashed = hash_tag(key).unwrap_or(key);
    crc16::State::<crc16::XMODEM>::calculate(hashed) % SLOT_COUNT
}
