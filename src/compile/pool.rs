//! Pending-task heap and compiler worker threads.
//!
//! Workers stay alive and pull the next task from a shared heap guarded by
//! a `parking_lot` mutex and condvar. Ordering is decided by a rank derived
//! from [`QueueOrdering`] with a monotonic sequence number as tiebreak, so
//! equal-rank tasks leave the heap in submission order.
//!
//! Tasks cancelled while queued stay in the heap until a worker pops them.
//! Once the heap has doubled since it was last pruned, the next push drops
//! them, so a burst of cancellations behind long compiles cannot pile up.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::target::Tier;
use super::task::{CompileTask, TaskState};
use crate::runtime::config::QueueOrdering;

/// Heap size below which cancelled entries are never pruned
const MIN_PRUNE_THRESHOLD: usize = 64;

/// Heap entry (min-heap behavior via reversed comparison)
struct QueuedTask {
    rank: u8,
    sequence: u64,
    task: Arc<CompileTask>,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for QueuedTask {}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.sequence == other.sequence
    }
}

/// Thread-safe heap of tasks waiting for a worker.
pub(crate) struct PendingQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    not_empty: Condvar,
    ordering: QueueOrdering,
    sequence: AtomicU64,
    /// Set once, under the heap lock
    closed: AtomicBool,
    /// Heap size that triggers the next prune; only touched under the lock
    prune_at: AtomicUsize,
}

impl PendingQueue {
    pub(crate) fn new(ordering: QueueOrdering) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            ordering,
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            prune_at: AtomicUsize::new(MIN_PRUNE_THRESHOLD),
        }
    }

    fn rank(&self, tier: Tier) -> u8 {
        match self.ordering {
            QueueOrdering::TierPriority => tier as u8,
            QueueOrdering::Fifo => 0,
        }
    }

    /// Push a task. Returns false if the queue was closed.
    pub(crate) fn push(&self, task: Arc<CompileTask>) -> bool {
        let rank = self.rank(task.tier());
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);

        let mut heap = self.heap.lock();
        if self.closed.load(AtomicOrdering::SeqCst) {
            return false;
        }
        if heap.len() >= self.prune_at.load(AtomicOrdering::Relaxed) {
            let before = heap.len();
            heap.retain(|entry| entry.task.state() == TaskState::Queued);
            self.prune_at.store(
                (heap.len() * 2).max(MIN_PRUNE_THRESHOLD),
                AtomicOrdering::Relaxed,
            );
            trace!(
                target: "tierjit::queue",
                pruned = before - heap.len(),
                remaining = heap.len(),
                "Pruned cancelled entries"
            );
        }
        heap.push(QueuedTask {
            rank,
            sequence,
            task,
        });
        self.not_empty.notify_one();
        true
    }

    /// Pop the next task, blocking while the heap is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub(crate) fn pop_blocking(&self) -> Option<Arc<CompileTask>> {
        let mut heap = self.heap.lock();
        loop {
            if self.closed.load(AtomicOrdering::SeqCst) {
                return None;
            }
            if let Some(entry) = heap.pop() {
                return Some(entry.task);
            }
            self.not_empty.wait(&mut heap);
        }
    }

    /// Close the queue and take everything still in it, in dispatch order.
    ///
    /// Returns `None` if the queue was already closed.
    pub(crate) fn close(&self) -> Option<Vec<Arc<CompileTask>>> {
        let mut heap = self.heap.lock();
        if self.closed.swap(true, AtomicOrdering::SeqCst) {
            return None;
        }
        let mut drained = Vec::with_capacity(heap.len());
        while let Some(entry) = heap.pop() {
            drained.push(entry.task);
        }
        self.not_empty.notify_all();
        Some(drained)
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    /// Number of entries still waiting to start.
    ///
    /// Entries cancelled while queued are not counted.
    pub(crate) fn queued(&self) -> usize {
        self.heap
            .lock()
            .iter()
            .filter(|entry| entry.task.state() == TaskState::Queued)
            .count()
    }

    #[cfg(test)]
    fn heap_len(&self) -> usize {
        self.heap.lock().len()
    }
}

/// Spawn `count` named workers running `work` until it returns.
pub(crate) fn spawn_workers<F>(count: usize, work: F) -> Vec<JoinHandle<()>>
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let work = Arc::new(work);
    (0..count)
        .map(|id| {
            let work = Arc::clone(&work);
            thread::Builder::new()
                .name(format!("tierjit-compiler-{}", id))
                .spawn(move || work(id))
                .expect("failed to spawn compiler worker thread")
        })
        .collect()
}
