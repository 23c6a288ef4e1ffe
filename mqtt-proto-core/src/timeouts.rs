//! `operationTimeouts`: a priority queue of `(deadline, operation id)`, ordered so the earliest
//! deadline pops first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::fold::ElapsedMillis;
use crate::operation::OperationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    deadline: ElapsedMillis,
    id: OperationId,
}

/// Min-heap of pending operation deadlines.
#[derive(Debug, Default)]
pub struct TimeoutQueue {
    heap: BinaryHeap<Reverse<Entry>>,
}

impl TimeoutQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        TimeoutQueue::default()
    }

    /// Schedules `id` to time out at `deadline`.
    pub fn push(&mut self, deadline: ElapsedMillis, id: OperationId) {
        self.heap.push(Reverse(Entry { deadline, id }));
    }

    /// The earliest scheduled deadline, if any are pending. Stale entries (already removed via
    /// [`TimeoutQueue::cancel`]) are not reflected here until popped; callers reconcile against
    /// the live operation table when draining.
    #[must_use]
    pub fn next_deadline(&self) -> Option<ElapsedMillis> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Pops every entry whose deadline is `<= now`, in deadline order.
    pub fn drain_expired(&mut self, now: ElapsedMillis) -> Vec<OperationId> {
        let mut expired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            expired.push(entry.id);
        }
        expired
    }

    /// Removes every scheduled deadline for `id` (an operation completed before its timeout).
    /// `O(n)`; the heap is expected to stay small (bounded by in-flight operation count).
    pub fn cancel(&mut self, id: OperationId) {
        self.heap = self
            .heap
            .drain()
            .filter(|Reverse(entry)| entry.id != id)
            .collect();
    }

    /// Whether no deadlines are scheduled, part of `verifyEmpty()`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(slab_index: usize) -> OperationId {
        let mut table = crate::operation::OperationTable::new();
        for _ in 0..=slab_index {
            table.insert(crate::operation::ClientOperation::new(
                crate::operation::OperationKind::Disconnect,
                mqtt_packet::Packet::Disconnect(mqtt_packet::Disconnect {
                    reason_code: None,
                    properties: None,
                }),
                crate::operation::OperationOptions::default(),
                Box::new(|_| {}),
                Box::new(|_| {}),
            ));
        }
        table.ids().nth(slab_index).unwrap()
    }

    #[test]
    fn pops_in_deadline_order_regardless_of_insertion_order() {
        let mut queue = TimeoutQueue::new();
        let a = id(0);
        let b = id(1);
        let c = id(2);

        queue.push(300, a);
        queue.push(100, b);
        queue.push(200, c);

        assert_eq!(queue.next_deadline(), Some(100));
        assert_eq!(queue.drain_expired(150), vec![b]);
        assert_eq!(queue.drain_expired(1000), vec![c, a]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_removes_future_deadline() {
        let mut queue = TimeoutQueue::new();
        let a = id(0);
        queue.push(100, a);
        queue.cancel(a);
        assert!(queue.is_empty());
        assert_eq!(queue.drain_expired(1000), Vec::<OperationId>::new());
    }
}
