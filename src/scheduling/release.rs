//! Min-heap of bodies waiting for their release step.
use std::{cmp::Reverse, collections::BinaryHeap};

use crate::step::Step;

#[derive(Debug)]
struct PendingRelease<Id> {
    due: Step,
    seq: u64,
    id: Id,
}

// Ordered by due step, ties broken by scheduling order; the id takes no part.
impl<Id> PartialEq for PendingRelease<Id> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<Id> Eq for PendingRelease<Id> {}

impl<Id> Ord for PendingRelease<Id> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

impl<Id> PartialOrd for PendingRelease<Id> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct ReleaseQueue<Id> {
    heap: BinaryHeap<Reverse<PendingRelease<Id>>>,
    seq: u64,
}

impl<Id> Default for ReleaseQueue<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id> ReleaseQueue<Id> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn schedule(&mut self, id: Id, due: Step) {
        self.heap.push(Reverse(PendingRelease {
            due,
            seq: self.seq,
            id,
        }));
        self.seq += 1;
    }

    pub fn contains(&self, id: &Id) -> bool
    where
        Id: PartialEq,
    {
        self.heap.iter().any(|Reverse(pending)| pending.id == *id)
    }

    pub fn next_due(&self) -> Option<Step> {
        self.heap.peek().map(|Reverse(pending)| pending.due)
    }

    /// Pops the earliest entry if it is due at or before `step`.
    pub fn pop_due(&mut self, step: Step) -> Option<Id> {
        if self.next_due()? > step {
            return None;
        }
        self.heap.pop().map(|Reverse(pending)| pending.id)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
