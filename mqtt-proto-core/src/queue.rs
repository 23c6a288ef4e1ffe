//! The three operation queues: `HighPriority` (ping, disconnect, implicit connect) strictly
//! ahead of `Resubmit` (operations in flight at the last disconnect, eligible for resend),
//! strictly ahead of `User` (freshly submitted work).

use std::collections::VecDeque;

use crate::operation::OperationId;

/// Which queue an operation currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Ahead of everything: ping, disconnect, implicit connect.
    HighPriority,
    /// Operations in flight at the last disconnect, resent after a session-resuming reconnect.
    Resubmit,
    /// Freshly submitted user work, FIFO.
    User,
}

/// The three priority-ordered FIFOs `ProtocolState` schedules outbound work from.
#[derive(Debug, Default)]
pub struct OperationQueues {
    high_priority: VecDeque<OperationId>,
    resubmit: VecDeque<OperationId>,
    user: VecDeque<OperationId>,
}

impl OperationQueues {
    /// Three empty queues.
    #[must_use]
    pub fn new() -> Self {
        OperationQueues::default()
    }

    /// Appends `id` to the tail of `kind`.
    pub fn push_back(&mut self, kind: QueueKind, id: OperationId) {
        self.queue_mut(kind).push_back(id);
    }

    /// Pushes `id` to the front of `kind`, used when a mid-encode operation returns to `User`
    /// after `ConnectionClosed` and must be retried first, ahead of anything submitted since.
    pub fn push_front(&mut self, kind: QueueKind, id: OperationId) {
        self.queue_mut(kind).push_front(id);
    }

    /// Pops the next operation to service, trying `HighPriority`, then `Resubmit`, then `User`,
    /// in that strict order. Returns which queue it came from alongside the id.
    pub fn pop_next(&mut self) -> Option<(QueueKind, OperationId)> {
        if let Some(id) = self.high_priority.pop_front() {
            return Some((QueueKind::HighPriority, id));
        }
        if let Some(id) = self.resubmit.pop_front() {
            return Some((QueueKind::Resubmit, id));
        }
        self.user.pop_front().map(|id| (QueueKind::User, id))
    }

    /// Looks at the next operation `pop_next` would return, without removing it.
    #[must_use]
    pub fn peek_front(&self) -> Option<(QueueKind, OperationId)> {
        if let Some(&id) = self.high_priority.front() {
            return Some((QueueKind::HighPriority, id));
        }
        if let Some(&id) = self.resubmit.front() {
            return Some((QueueKind::Resubmit, id));
        }
        self.user.front().map(|&id| (QueueKind::User, id))
    }

    /// Removes and returns every id currently queued under `kind`, in FIFO order, leaving the
    /// other two queues untouched. Used to purge `HighPriority` and to drain `Resubmit` wholesale
    /// on a clean-session reconnect.
    pub fn drain(&mut self, kind: QueueKind) -> Vec<OperationId> {
        self.queue_mut(kind).drain(..).collect()
    }

    /// Removes `id` from wherever it currently sits, e.g. on operation timeout. No-op if absent.
    pub fn remove(&mut self, id: OperationId) {
        self.high_priority.retain(|&queued| queued != id);
        self.resubmit.retain(|&queued| queued != id);
        self.user.retain(|&queued| queued != id);
    }

    /// Whether any queue holds an id ready to be serviced.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.high_priority.is_empty() || !self.resubmit.is_empty() || !self.user.is_empty()
    }

    /// Whether every queue is empty, part of `verifyEmpty()`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.high_priority.is_empty() && self.resubmit.is_empty() && self.user.is_empty()
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut VecDeque<OperationId> {
        match kind {
            QueueKind::HighPriority => &mut self.high_priority,
            QueueKind::Resubmit => &mut self.resubmit,
            QueueKind::User => &mut self.user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(slab_index: usize) -> OperationId {
        // OperationId has no public constructor; round-trip through a table to obtain real ids.
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
    fn priority_order_is_strict() {
        let mut queues = OperationQueues::new();
        let user_op = id(0);
        let resubmit_op = id(1);
        let high_op = id(2);

        queues.push_back(QueueKind::User, user_op);
        queues.push_back(QueueKind::Resubmit, resubmit_op);
        queues.push_back(QueueKind::HighPriority, high_op);

        assert_eq!(queues.pop_next(), Some((QueueKind::HighPriority, high_op)));
        assert_eq!(queues.pop_next(), Some((QueueKind::Resubmit, resubmit_op)));
        assert_eq!(queues.pop_next(), Some((QueueKind::User, user_op)));
        assert_eq!(queues.pop_next(), None);
    }

    #[test]
    fn fifo_within_a_class() {
        let mut queues = OperationQueues::new();
        let first = id(0);
        let second = id(1);
        queues.push_back(QueueKind::User, first);
        queues.push_back(QueueKind::User, second);

        assert_eq!(queues.pop_next(), Some((QueueKind::User, first)));
        assert_eq!(queues.pop_next(), Some((QueueKind::User, second)));
    }

    #[test]
    fn push_front_cuts_the_line() {
        let mut queues = OperationQueues::new();
        let first = id(0);
        let second = id(1);
        queues.push_back(QueueKind::User, first);
        queues.push_front(QueueKind::User, second);

        assert_eq!(queues.pop_next(), Some((QueueKind::User, second)));
        assert_eq!(queues.pop_next(), Some((QueueKind::User, first)));
    }
}
