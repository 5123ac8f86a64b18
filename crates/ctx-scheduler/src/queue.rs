//! Deadline-ordered queue of registered expression ids

use ctx_core::Timestamp;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

/// A queued deadline
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    deadline: Timestamp,
    /// Insertion sequence; breaks deadline ties and marks stale entries
    seq: u64,
    id: String,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest deadline first, then earliest insertion
        Reverse((self.deadline, self.seq)).cmp(&Reverse((other.deadline, other.seq)))
    }
}

/// Min-heap of deadlines with at most one live entry per id
///
/// Rescheduling an id leaves its old heap entry behind; stale entries are
/// recognised by their sequence number and skipped when they surface.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Entry>,
    /// Live sequence number and deadline per id
    live: HashMap<String, (u64, Timestamp)>,
    next_seq: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` at `deadline`, replacing any earlier schedule
    pub fn schedule(&mut self, id: &str, deadline: Timestamp) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(id.to_string(), (seq, deadline));
        self.heap.push(Entry {
            deadline,
            seq,
            id: id.to_string(),
        });
    }

    /// Remove `id`; returns whether it was queued
    pub fn remove(&mut self, id: &str) -> bool {
        self.live.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.live.contains_key(id)
    }

    /// Deadline currently scheduled for `id`
    pub fn deadline_of(&self, id: &str) -> Option<Timestamp> {
        self.live.get(id).map(|(_, deadline)| *deadline)
    }

    /// Earliest live deadline
    pub fn peek_deadline(&mut self) -> Option<Timestamp> {
        self.discard_stale();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pop the earliest id if its deadline is at or before `now`
    pub fn pop_due(&mut self, now: Timestamp) -> Option<String> {
        self.discard_stale();
        if self.heap.peek()?.deadline > now {
            return None;
        }
        let entry = self.heap.pop()?;
        self.live.remove(&entry.id);
        Some(entry.id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_stale(&mut self) {
        while let Some(head) = self.heap.peek() {
            match self.live.get(&head.id) {
                Some((seq, _)) if *seq == head.seq => return,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}
