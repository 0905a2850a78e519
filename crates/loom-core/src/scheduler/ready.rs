//! Priority-ordered ready queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::domain::Priority;

/// Entry for the ready heap: higher priority first, then lower submission sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    seq: u64,
    index: usize,
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            // Reverse: earlier submissions win among equal priorities
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    heap: BinaryHeap<ReadyEntry>,
}

impl ReadyQueue {
    pub fn push(&mut self, index: usize, priority: Priority, seq: u64) {
        self.heap.push(ReadyEntry {
            priority,
            seq,
            index,
        });
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.heap.pop().map(|e| e.index)
    }

    pub fn remove(&mut self, index: usize) {
        self.heap.retain(|e| e.index != index);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
