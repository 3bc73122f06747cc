// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Connection-level configuration, mirroring the teacher's plain
//! `client/types.rs`-style config structs: a flat struct with a `Default`
//! impl, no builder macro.

use std::time::Duration;

use crate::pipeline_state::DEFAULT_FLUSH_THRESHOLD;

/// Tunables for a [`crate::connection::Connection`] (spec §4.6, §9).
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Requests queued on a `Pending` cell beyond this many force an eager
    /// flush (spec §4.5, §9: "treat it as a tunable constant").
    pub flush_threshold: usize,

    /// Passed through to [`crate::external::ConnectionFactory::connect`]
    /// for every node connection made at `connect` time. The core itself
    /// does not enforce this timeout; that's the factory's job (spec §5's
    /// "Cancellation and timeouts").
    pub connect_timeout: Option<Duration>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            connect_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_matches_spec_backpressure_policy() {
        assert_eq!(ClusterConfig::default().flush_threshold, 1000);
    }
}
