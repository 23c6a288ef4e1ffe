//! `ClientOperation`: a user-originated unit of work, owned exclusively by the state machine
//! from submission to completion, kept in a `slab::Slab` keyed by a stable operation id rather
//! than by packet id, since a packet id is not assigned until the operation reaches the front of
//! the encode queue.

use std::fmt;

use mqtt_packet::{Packet, PacketId, PublishAck, SubscribeAck, UnsubscribeAck};
use slab::Slab;

use crate::error::OperationError;
use crate::fold::ElapsedMillis;

/// Stable identifier for a [`ClientOperation`], valid for the operation's entire lifetime
/// regardless of which queue or ack table currently references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(usize);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// What kind of user request this operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A Publish the user submitted.
    Publish,
    /// A Subscribe the user submitted.
    Subscribe,
    /// An Unsubscribe the user submitted.
    Unsubscribe,
    /// A Disconnect the user requested.
    Disconnect,
    /// A packet `ProtocolState` originates on its own behalf (implicit Connect, Pingreq, an
    /// auto-reply Puback for an inbound QoS 1 publish). Never subject to `OfflineQueuePolicy` —
    /// these never go through `handleUserEvent`.
    System,
}

/// The value delivered to `onSuccess` on completion. Which variant arrives is determined by
/// `OperationKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    /// A QoS 0 Publish completed on `WriteCompletion`; there is no ack to report.
    PublishedQos0,
    /// A QoS 1 Publish was acknowledged with a Puback.
    PublishedQos1(PublishAck),
    /// A Subscribe was acknowledged.
    Subscribed(SubscribeAck),
    /// An Unsubscribe was acknowledged.
    Unsubscribed(UnsubscribeAck),
    /// A Disconnect was handed to the socket (fire-and-forget; there is no broker ack for
    /// Disconnect).
    Disconnected,
}

/// Per-operation options the user supplied at submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationOptions {
    /// Absolute elapsed-millis deadline after which the operation fails with
    /// [`OperationError::OperationTimeout`]. `None` means "never times out".
    pub timeout_at: Option<ElapsedMillis>,
}

/// The caller-supplied completion pair. Invoked at most once, inline, from whichever of
/// `handleUserEvent`/`handleNetworkEvent`/`service` resolves the operation.
pub type OnSuccess = Box<dyn FnOnce(OperationOutcome) + Send>;
/// See [`OnSuccess`].
pub type OnFailure = Box<dyn FnOnce(OperationError) + Send>;

/// A user-originated unit of work, owned exclusively by [`crate::state::ProtocolState`] from
/// submission until it completes, times out, or is evicted by offline policy.
pub struct ClientOperation {
    kind: OperationKind,
    packet: Packet,
    packet_id: Option<PacketId>,
    options: OperationOptions,
    handlers: Option<(OnSuccess, OnFailure)>,
}

impl fmt::Debug for ClientOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOperation")
            .field("kind", &self.kind)
            .field("packet_id", &self.packet_id)
            .field("options", &self.options)
            .finish()
    }
}

impl ClientOperation {
    /// Creates a new, not-yet-queued operation.
    pub fn new(
        kind: OperationKind,
        packet: Packet,
        options: OperationOptions,
        on_success: OnSuccess,
        on_failure: OnFailure,
    ) -> Self {
        ClientOperation {
            kind,
            packet,
            packet_id: None,
            options,
            handlers: Some((on_success, on_failure)),
        }
    }

    /// What kind of request this is.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The owned outbound packet. Mutated in place to bind a packet id, or to set `dup` on
    /// resubmission.
    #[must_use]
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Mutable access to the outbound packet, for binding a packet id or setting `dup`.
    pub fn packet_mut(&mut self) -> &mut Packet {
        &mut self.packet
    }

    /// The packet id bound to this operation, once assigned at encode time.
    #[must_use]
    pub fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    /// Binds `id` as this operation's packet id, stamping it into the outbound packet too so the
    /// encoder and the ack tables agree.
    pub fn bind_packet_id(&mut self, id: PacketId) {
        self.packet_id = Some(id);
        match &mut self.packet {
            Packet::Publish(p) => p.packet_id = Some(id),
            Packet::Subscribe(s) => s.packet_id = id,
            Packet::Unsubscribe(u) => u.packet_id = id,
            _ => {}
        }
    }

    /// Releases the bound packet id (on `ConnectionClosed` before the write completed).
    pub fn release_packet_id(&mut self) {
        self.packet_id = None;
    }

    /// Marks an in-flight Publish as a retransmission (`dup = 1`) ahead of resubmission.
    pub fn mark_duplicate(&mut self) {
        if let Packet::Publish(p) = &mut self.packet {
            p.dup = true;
        }
    }

    /// The configured timeout deadline, if any.
    #[must_use]
    pub fn timeout_at(&self) -> Option<ElapsedMillis> {
        self.options.timeout_at
    }

    /// Resolves the operation successfully, consuming its handler pair. A no-op (other than
    /// logging) if the handlers were already taken.
    pub fn resolve(&mut self, outcome: OperationOutcome) {
        if let Some((on_success, _)) = self.handlers.take() {
            on_success(outcome);
        } else {
            warn!("{:?} resolved twice, ignoring", self.kind);
        }
    }

    /// Fails the operation, consuming its handler pair. A no-op (other than logging) if the
    /// handlers were already taken.
    pub fn fail(&mut self, error: OperationError) {
        if let Some((_, on_failure)) = self.handlers.take() {
            on_failure(error);
        } else {
            warn!("{:?} failed twice, ignoring ({})", self.kind, error);
        }
    }
}

/// The authoritative store of in-flight operations. Every queue and ack table elsewhere in this
/// crate holds only [`OperationId`]s; this is the only place an operation is actually owned.
#[derive(Debug, Default)]
pub struct OperationTable {
    slab: Slab<ClientOperation>,
}

impl OperationTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        OperationTable { slab: Slab::new() }
    }

    /// Inserts `operation`, returning its newly assigned stable id.
    pub fn insert(&mut self, operation: ClientOperation) -> OperationId {
        OperationId(self.slab.insert(operation))
    }

    /// Borrows the operation for `id`, if it is still present.
    #[must_use]
    pub fn get(&self, id: OperationId) -> Option<&ClientOperation> {
        self.slab.get(id.0)
    }

    /// Mutably borrows the operation for `id`, if it is still present.
    pub fn get_mut(&mut self, id: OperationId) -> Option<&mut ClientOperation> {
        self.slab.get_mut(id.0)
    }

    /// Removes and returns the operation for `id`. Panics if `id` is not present; callers must
    /// only remove an id they know is live (every queue/table is kept consistent with this one).
    pub fn remove(&mut self, id: OperationId) -> ClientOperation {
        self.slab.remove(id.0)
    }

    /// Whether the table holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// The number of live operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slab.len()
    }

    /// Iterates over every live operation id.
    pub fn ids(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.slab.iter().map(|(key, _)| OperationId(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_packet::{Disconnect, Publish, QoS};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn disconnect_operation() -> ClientOperation {
        ClientOperation::new(
            OperationKind::Disconnect,
            Packet::Disconnect(Disconnect {
                reason_code: None,
                properties: None,
            }),
            OperationOptions::default(),
            Box::new(|_| {}),
            Box::new(|_| {}),
        )
    }

    #[test]
    fn table_assigns_stable_ids() {
        let mut table = OperationTable::new();
        let a = table.insert(disconnect_operation());
        let b = table.insert(disconnect_operation());
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        table.remove(a);
        assert_eq!(table.len(), 1);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn resolve_invokes_on_success_exactly_once() {
        let resolved = Arc::new(AtomicBool::new(false));
        let flag = resolved.clone();

        let mut op = ClientOperation::new(
            OperationKind::Publish,
            Packet::Publish(Publish {
                dup: false,
                qos: QoS::AtMostOnce,
                retain: false,
                topic_name: "t".into(),
                packet_id: None,
                properties: None,
                payload: bytes::Bytes::new(),
            }),
            OperationOptions::default(),
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
            Box::new(|_| panic!("should not fail")),
        );

        op.resolve(OperationOutcome::PublishedQos0);
        assert!(resolved.load(Ordering::SeqCst));

        // second resolve is a no-op, not a panic or double-invoke
        op.resolve(OperationOutcome::PublishedQos0);
    }

    #[test]
    fn bind_packet_id_stamps_publish() {
        let mut op = ClientOperation::new(
            OperationKind::Publish,
            Packet::Publish(Publish {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: false,
                topic_name: "t".into(),
                packet_id: None,
                properties: None,
                payload: bytes::Bytes::new(),
            }),
            OperationOptions::default(),
            Box::new(|_| {}),
            Box::new(|_| {}),
        );

        op.bind_packet_id(42);
        assert_eq!(op.packet_id(), Some(42));
        match op.packet() {
            Packet::Publish(p) => assert_eq!(p.packet_id, Some(42)),
            _ => panic!("wrong packet"),
        }

        op.mark_duplicate();
        match op.packet() {
            Packet::Publish(p) => assert!(p.dup),
            _ => panic!("wrong packet"),
        }
    }
}
