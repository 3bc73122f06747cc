// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! The pipeline state machine (spec §4.5), the cell-swap pattern (spec §9),
//! and request submission (spec §4.6). No teacher analogue exists for this
//! module: the teacher always executes a `Pipeline` explicitly via
//! `Pipeline::query`/`query_async` (see `pipeline.rs`), it never defers
//! execution to first-observation. This is new code written in the
//! teacher's `enum` + `Mutex` idiom (see `cluster_slotmap.rs`'s use of
//! `Arc<AtomicUsize>` for cheap cross-thread shared counters) rather than
//! transliterated from any one teacher file.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::ClusterError;
use crate::external::{RawRequest, Reply};

/// Default backpressure threshold (spec §4.6, §9): enqueuing past this
/// many pending requests without an observed reply forces an eager flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// One pipeline's state (spec §3). The queue is held in reverse arrival
/// order (most recently pushed at the front) so pushing a newly submitted
/// request is O(1); consumers must reverse it back to arrival order before
/// dispatching (spec §3's invariant).
pub(crate) enum PipelineState {
    Pending(VecDeque<RawRequest>),
    TransactionPending(VecDeque<RawRequest>),
    Executed(Vec<Reply>),
    /// Not part of spec §3's tagged union by name, but required to satisfy
    /// spec §7's "reply handles issued from that cell observe the error on
    /// resolution": a terminal state memoizing a batch-evaluation failure
    /// the same way `Executed` memoizes success.
    Failed(ClusterError),
}

/// The mutable cell a `Pipeline` is realized as (spec §3, §9): a shared,
/// reference-counted home for one batch's state, protected by its own
/// mutex (`CMutex` in spec §5) so that resolving a reply handle only ever
/// contends with other handles from the *same* batch.
pub(crate) struct PipelineCell {
    pub(crate) state: Mutex<PipelineState>,
}

impl PipelineCell {
    fn new(state: PipelineState) -> Arc<Self> {
        Arc::new(PipelineCell {
            state: Mutex::new(state),
        })
    }
}

/// A sealed batch ready to be sent, paired with the cell it will resolve
/// into once execution completes.
pub(crate) struct SealedBatch {
    pub(crate) cell: Arc<PipelineCell>,
    pub(crate) requests: Vec<RawRequest>,
    pub(crate) is_transaction: bool,
}

/// What submitting a request should additionally trigger, beyond simply
/// landing it in a cell (spec §4.5's "flush X now" actions). `None` means
/// the common case: the request was enqueued and will only execute when
/// some handle from its cell is first observed (spec §4.6).
pub(crate) enum FlushTrigger {
    None,
    Eager(SealedBatch),
}

pub(crate) struct SubmitResult {
    pub(crate) cell: Arc<PipelineCell>,
    pub(crate) index: usize,
    pub(crate) flush: FlushTrigger,
}

fn command_name(request: &RawRequest) -> Option<&[u8]> {
    request.first().map(|v| v.as_slice())
}

fn is_multi(request: &RawRequest) -> bool {
    command_name(request).map(|n| n.eq_ignore_ascii_case(b"MULTI")).unwrap_or(false)
}

fn is_exec(request: &RawRequest) -> bool {
    command_name(request).map(|n| n.eq_ignore_ascii_case(b"EXEC")).unwrap_or(false)
}

/// The connection-level cell reference, guarded by `PMutex` (spec §5):
/// which `PipelineCell` is "current" at any moment.
pub(crate) struct PipelineRef {
    current: Mutex<Arc<PipelineCell>>,
}

impl PipelineRef {
    pub(crate) fn new() -> Self {
        PipelineRef {
            current: Mutex::new(PipelineCell::new(PipelineState::Pending(VecDeque::new()))),
        }
    }

    /// Implements spec §4.5's transition table for one arriving request.
    /// Holds `PMutex` (and, briefly, the current cell's `CMutex`) only for
    /// the in-memory bookkeeping; any flush this triggers is reported back
    /// in `SubmitResult::flush` for the caller to run *after* this
    /// function returns and all locks are released, per spec §5's "swap
    /// the cell under PMutex first, then release PMutex, then flush on
    /// the detached cell" guidance.
    pub(crate) fn submit(&self, request: RawRequest, threshold: usize) -> SubmitResult {
        let mut current_ref = self.current.lock().expect("pipeline mutex poisoned");
        let current = current_ref.clone();

        let mut state = current.state.lock().expect("pipeline cell mutex poisoned");
        match &mut *state {
            PipelineState::Executed(_) | PipelineState::Failed(_) => {
                drop(state);
                let new_state = if is_multi(&request) {
                    PipelineState::TransactionPending(VecDeque::from([request]))
                } else {
                    PipelineState::Pending(VecDeque::from([request]))
                };
                let new_cell = PipelineCell::new(new_state);
                *current_ref = new_cell.clone();
                SubmitResult {
                    cell: new_cell,
                    index: 0,
                    flush: FlushTrigger::None,
                }
            }

            PipelineState::Pending(q) if is_multi(&request) => {
                let sealed_queue = std::mem::take(q);
                drop(state);
                let new_cell = PipelineCell::new(PipelineState::TransactionPending(VecDeque::from([
                    request,
                ])));
                *current_ref = new_cell.clone();
                let flush = if sealed_queue.is_empty() {
                    FlushTrigger::None
                } else {
                    FlushTrigger::Eager(SealedBatch {
                        cell: current.clone(),
                        requests: sealed_queue.into_iter().rev().collect(),
                        is_transaction: false,
                    })
                };
                SubmitResult {
                    cell: new_cell,
                    index: 0,
                    flush,
                }
            }

            PipelineState::Pending(q) => {
                q.push_front(request);
                let index = q.len() - 1;
                if q.len() > threshold {
                    let sealed_queue = std::mem::take(q);
                    drop(state);
                    SubmitResult {
                        cell: current.clone(),
                        index,
                        flush: FlushTrigger::Eager(SealedBatch {
                            cell: current.clone(),
                            requests: sealed_queue.into_iter().rev().collect(),
                            is_transaction: false,
                        }),
                    }
                } else {
                    SubmitResult {
                        cell: current.clone(),
                        index,
                        flush: FlushTrigger::None,
                    }
                }
            }

            PipelineState::TransactionPending(q) => {
                q.push_front(request);
                let index = q.len() - 1;
                if q.iter().next().map(is_exec).unwrap_or(false) {
                    let sealed_queue = std::mem::take(q);
                    drop(state);
                    SubmitResult {
                        cell: current.clone(),
                        index,
                        flush: FlushTrigger::Eager(SealedBatch {
                            cell: current.clone(),
                            requests: sealed_queue.into_iter().rev().collect(),
                            is_transaction: true,
                        }),
                    }
                } else {
                    SubmitResult {
                        cell: current.clone(),
                        index,
                        flush: FlushTrigger::None,
                    }
                }
            }
        }
    }
}

impl Default for PipelineRef {
    fn default() -> Self {
        Self::new()
    }
}
