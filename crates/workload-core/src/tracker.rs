use crate::completion::CompletionSender;
use crate::idle_pool::IdleLease;
use crate::types::{
    EntityKind, MarkStatus, TransactionIdentifier, TransactionMark, TransactionOutput,
    TransactionType,
};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 16;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

type EntityKey = (EntityKind, u64);

/// Inbound side of the out-of-band completion feed.
///
/// Implemented by [`TransactionTracker`]; called by whatever listener
/// observes completions (HTTP receipt endpoint, stream subscriber, ...).
pub trait CompletionIngress: Send + Sync {
    /// Record that `output.tid` finished. Returns false for unknown or
    /// already-terminated tids, which are otherwise ignored.
    fn add_finished_transaction(&self, actor_id: u64, output: TransactionOutput) -> bool;

    /// Record that a submitted transaction was rejected downstream.
    fn add_aborted_transaction(&self, mark: TransactionMark) -> bool;
}

/// Append-only per-entity record of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityLog {
    pub submitted: Vec<TransactionIdentifier>,
    pub finished: Vec<TransactionOutput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityRecords {
    pub kind: EntityKind,
    pub id: u64,
    #[serde(flatten)]
    pub log: EntityLog,
}

/// Everything recorded during a run, handed to the metrics collector.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunRecords {
    pub entities: Vec<EntityRecords>,
    pub aborted: Vec<TransactionMark>,
    /// Transactions still awaiting completion when the records were drained.
    pub pending: usize,
}

impl RunRecords {
    pub fn submitted(&self) -> impl Iterator<Item = &TransactionIdentifier> {
        self.entities.iter().flat_map(|e| e.log.submitted.iter())
    }

    pub fn finished(&self) -> impl Iterator<Item = &TransactionOutput> {
        self.entities.iter().flat_map(|e| e.log.finished.iter())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerCounts {
    pub submitted: usize,
    pub finished: usize,
    pub aborted: usize,
    pub pending: usize,
}

/// A submitted transaction that has not reached a terminal state yet.
struct Pending {
    tx_type: TransactionType,
    kind: EntityKind,
    actor_id: u64,
    // Held until completion so the customer stays exclusive.
    _lease: Option<IdleLease>,
}

/// Thread-safe transaction bookkeeping shared by the worker façade and the
/// completion ingress.
///
/// Entity logs are spread over 16 shards keyed by `(kind, id)` so that
/// concurrent dispatches for different sellers and customers rarely contend.
/// Each submitted tid sits in `pending` until exactly one terminal outcome
/// (finish or abort) removes it; that removal is what emits the completion
/// token, so a transaction can never signal twice.
pub struct TransactionTracker {
    shards: Box<[RwLock<AHashMap<EntityKey, EntityLog>>]>,
    pending: Mutex<AHashMap<String, Pending>>,
    aborted: Mutex<Vec<TransactionMark>>,
    signal: RwLock<Option<CompletionSender>>,
}

impl TransactionTracker {
    pub fn new() -> Arc<Self> {
        let shards: Vec<RwLock<AHashMap<EntityKey, EntityLog>>> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(AHashMap::new()))
            .collect();
        Arc::new(Self {
            shards: shards.into_boxed_slice(),
            pending: Mutex::new(AHashMap::new()),
            aborted: Mutex::new(Vec::new()),
            signal: RwLock::new(None),
        })
    }

    #[inline]
    fn shard_index(key: &EntityKey) -> usize {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        (hash & SHARD_MASK) as usize
    }

    /// Clear all records and route future completion tokens to `sender`.
    pub fn begin_run(&self, sender: CompletionSender) {
        self.reset();
        *self.signal.write() = Some(sender);
    }

    /// Stop emitting completion tokens. Records keep accumulating.
    pub fn end_run(&self) {
        *self.signal.write() = None;
    }

    /// Drop every record and pending transaction. Leases of pending
    /// customer sessions go back to their pool.
    pub fn reset(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
        self.pending.lock().clear();
        self.aborted.lock().clear();
    }

    /// Record a submission and mark the tid pending.
    pub fn begin_transaction(
        &self,
        kind: EntityKind,
        actor_id: u64,
        id: TransactionIdentifier,
        lease: Option<IdleLease>,
    ) {
        self.pending.lock().insert(
            id.tid.clone(),
            Pending {
                tx_type: id.tx_type,
                kind,
                actor_id,
                _lease: lease,
            },
        );
        let key = (kind, actor_id);
        self.shards[Self::shard_index(&key)]
            .write()
            .entry(key)
            .or_default()
            .submitted
            .push(id);
    }

    /// Terminal success for a pending tid. The output is appended to the log
    /// of the entity that submitted it.
    pub fn finish(&self, output: TransactionOutput) -> bool {
        let Some(pending) = self.pending.lock().remove(&output.tid) else {
            tracing::debug!(tid = %output.tid, "completion for unknown or finished transaction");
            return false;
        };
        let key = (pending.kind, pending.actor_id);
        self.shards[Self::shard_index(&key)]
            .write()
            .entry(key)
            .or_default()
            .finished
            .push(output);
        self.emit(pending.tx_type, MarkStatus::Success);
        true
    }

    /// Terminal failure for a pending tid.
    pub fn abort(&self, mark: TransactionMark) -> bool {
        let Some(pending) = self.pending.lock().remove(&mark.tid) else {
            tracing::debug!(tid = %mark.tid, "abort for unknown or finished transaction");
            return false;
        };
        let tx_type = pending.tx_type;
        drop(pending);
        self.aborted.lock().push(mark);
        self.emit(tx_type, MarkStatus::Abort);
        true
    }

    /// Record an abort for a transaction that never reached submission
    /// (e.g. its dispatch failed before the façade saw it).
    pub fn abort_unsubmitted(&self, mark: TransactionMark) {
        let tx_type = mark.tx_type;
        self.aborted.lock().push(mark);
        self.emit(tx_type, MarkStatus::Abort);
    }

    fn emit(&self, tx_type: TransactionType, status: MarkStatus) {
        if let Some(sender) = self.signal.read().as_ref() {
            sender.signal(tx_type, status);
        }
    }

    pub fn is_pending(&self, tid: &str) -> bool {
        self.pending.lock().contains_key(tid)
    }

    pub fn counts(&self) -> TrackerCounts {
        let mut counts = TrackerCounts {
            aborted: self.aborted.lock().len(),
            pending: self.pending.lock().len(),
            ..TrackerCounts::default()
        };
        for shard in self.shards.iter() {
            for log in shard.read().values() {
                counts.submitted += log.submitted.len();
                counts.finished += log.finished.len();
            }
        }
        counts
    }

    /// Snapshot of one entity's log.
    pub fn entity_log(&self, kind: EntityKind, id: u64) -> Option<EntityLog> {
        let key = (kind, id);
        self.shards[Self::shard_index(&key)].read().get(&key).cloned()
    }

    /// Snapshot of the aborted list.
    pub fn aborted(&self) -> Vec<TransactionMark> {
        self.aborted.lock().clone()
    }

    /// Move every record out, leaving the tracker empty. Transactions still
    /// pending are dropped and only counted.
    pub fn drain(&self) -> RunRecords {
        let mut entities = Vec::new();
        for shard in self.shards.iter() {
            entities.extend(
                shard
                    .write()
                    .drain()
                    .map(|((kind, id), log)| EntityRecords { kind, id, log }),
            );
        }
        entities.sort_by_key(|e| (e.kind as u8, e.id));

        let pending = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };

        RunRecords {
            entities,
            aborted: std::mem::take(&mut *self.aborted.lock()),
            pending,
        }
    }
}

impl CompletionIngress for TransactionTracker {
    fn add_finished_transaction(&self, actor_id: u64, output: TransactionOutput) -> bool {
        if let Some(p) = self.pending.lock().get(&output.tid) {
            if p.actor_id != actor_id {
                tracing::debug!(
                    tid = %output.tid,
                    reported = actor_id,
                    recorded = p.actor_id,
                    "completion reported by a different actor"
                );
            }
        }
        self.finish(output)
    }

    fn add_aborted_transaction(&self, mark: TransactionMark) -> bool {
        self.abort(mark)
    }
}
