//! `ProtocolState`: the sans-I/O core. It never touches a socket — it only reacts to elapsed
//! time, user requests, and network events, and replies with bytes to write, completions to
//! deliver, and (at most once) a halt. Everything else in this crate exists to give this one
//! struct somewhere to put its bookkeeping.
//!
//! `Slab`-backed tables keyed by a stable id, `thiserror` for the error taxonomy, and a runtime
//! `ProtocolVersion` drive every piece of bookkeeping below.
//!
//! Connect, the periodic Pingreq, and the auto-Puback reply to an inbound QoS 1 publish are not
//! special-cased: they are ordinary [`ClientOperation`]s tagged [`OperationKind::System`], pushed
//! onto the same [`OperationQueues`]/[`OperationTable`] as user-submitted work, with a no-op
//! handler pair. This keeps there from being two parallel scheduling mechanisms.

use std::collections::HashMap;
use std::fmt;

use bytes::{BufMut, Bytes};
use core::time::Duration;
use mqtt_packet::{
    codec_for_version, Codec, ConnectAck, DecodeProgress, EncodeError, FrameDecoder, Packet,
    PacketId, Property, ProtocolVersion, Publish, PublishAck, QoS, ReasonCode, SubscribeAck,
    UnsubscribeAck,
};

use crate::connect::ConnectOptions;
use crate::disconnect::DisconnectOptions;
use crate::error::{OperationError, ProtocolFatalError};
use crate::flow_control::{admits_another_publish, PacketIdAllocator, DEFAULT_RECEIVE_MAXIMUM};
use crate::fold::{fold_time_min, ElapsedMillis};
use crate::keepalive::KeepAlive;
use crate::operation::{
    ClientOperation, OnFailure, OnSuccess, OperationId, OperationKind, OperationOptions,
    OperationOutcome, OperationTable,
};
use crate::policy::{OfflineQueuePolicy, ResumeSessionPolicy};
use crate::publish::PublishOptions;
use crate::queue::{OperationQueues, QueueKind};
use crate::subscribe::SubscribeOptions;
use crate::timeouts::TimeoutQueue;
use crate::unsubscribe::UnsubscribeOptions;

/// Where the transport believes the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// No network connection; only `ConnectionOpened` is a legal network event.
    Disconnected,
    /// The transport is open and the implicit Connect is in flight or awaiting Connack.
    PendingConnack,
    /// A Connack was accepted; normal traffic may flow.
    Connected,
}

/// A transport-originated occurrence. The host drives this from its event loop; this crate never
/// reads a socket itself.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// The transport finished establishing a connection (TCP connect, TLS handshake, WebSocket
    /// upgrade — whichever the host layers on top). `establishment_timeout_at` is the absolute
    /// deadline by which a Connack must arrive.
    ConnectionOpened {
        /// Absolute elapsed-millis deadline for the Connack.
        establishment_timeout_at: ElapsedMillis,
    },
    /// The transport connection was lost, for any reason, at any point after `ConnectionOpened`.
    ConnectionClosed,
    /// Bytes arrived from the transport. May contain zero, one, or several whole frames, and may
    /// end mid-frame.
    IncomingData(Bytes),
    /// The host finished writing the bytes most recently produced by [`ProtocolState::service`]
    /// to the transport.
    WriteCompletion,
}

/// A user-originated request to submit.
#[derive(Debug, Clone)]
pub enum UserRequest {
    /// Publish a message. QoS 2 is rejected at submission (see [`PublishOptions::with_qos`]).
    Publish(PublishOptions),
    /// Subscribe to one or more topic filters.
    Subscribe(SubscribeOptions),
    /// Unsubscribe from one or more topic filters.
    Unsubscribe(UnsubscribeOptions),
    /// Gracefully disconnect.
    Disconnect(DisconnectOptions),
}

/// What `service` accomplished on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Nothing was ready to send.
    Idle,
    /// Bytes were written to `out`; call again after any further `WriteCompletion`.
    Wrote,
    /// The machine halted during this call. `out` may still hold partial bytes from before the
    /// halt; the host should stop calling `service` and tear the transport down.
    Halted,
}

/// What to do with `current_write`'s operation once the matching `WriteCompletion` arrives.
/// Populated by [`ProtocolState::finish_current_write`] the moment the encoder reports
/// [`mqtt_packet::EncodeOutcome::Complete`], resolved only once the host confirms the bytes
/// actually reached the wire.
#[derive(Debug, Clone, Copy)]
enum PendingWriteResolution {
    /// The operation is already tracked elsewhere (an ack table) and needs nothing further.
    None,
    /// A System operation that expects no ack (the implicit Connect, the auto-Puback reply).
    Discard(OperationId),
    /// A QoS 0 publish: resolves on write completion, there being no ack to wait for.
    ResolveQos0Publish(OperationId),
    /// A user Disconnect: resolves on write completion, there being no ack for Disconnect either.
    ResolveDisconnect(OperationId),
    /// The keep-alive Pingreq: arms the Pingresp timeout once the write is confirmed.
    PingSent(OperationId),
}

/// Configuration for one [`ProtocolState`], fixed for its entire lifetime (it does not change
/// across a reconnect — only the connection state does).
pub struct ProtocolStateConfig {
    /// Which wire format to speak.
    pub protocol_version: ProtocolVersion,
    /// The Connect this state machine reissues on every `ConnectionOpened`.
    pub connect_options: ConnectOptions,
    /// Which operation kinds survive a disconnect.
    pub offline_queue_policy: OfflineQueuePolicy,
    /// How `cleanStart` is chosen across reconnects.
    pub resume_session_policy: ResumeSessionPolicy,
    /// How long to wait for a Pingresp after a Pingreq is written, capped against half the
    /// keep-alive interval by [`KeepAlive::on_ping_sent`].
    pub ping_timeout: Duration,
    /// The largest packet this machine will encode or decode.
    pub maximum_packet_size: usize,
    /// An optional hook applied to every outbound Connect just before it is queued, e.g. to stamp
    /// an auth method the host negotiated out of band.
    pub connect_packet_transformer: Option<Box<dyn Fn(mqtt_packet::Connect) -> mqtt_packet::Connect + Send>>,
}

impl fmt::Debug for ProtocolStateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolStateConfig")
            .field("protocol_version", &self.protocol_version)
            .field("connect_options", &self.connect_options)
            .field("offline_queue_policy", &self.offline_queue_policy)
            .field("resume_session_policy", &self.resume_session_policy)
            .field("ping_timeout", &self.ping_timeout)
            .field("maximum_packet_size", &self.maximum_packet_size)
            .field(
                "connect_packet_transformer",
                &self.connect_packet_transformer.is_some(),
            )
            .finish()
    }
}

/// The protocol state machine. Owns every in-flight operation, the ack tables, the priority
/// queues, the packet-id allocator, the keep-alive clock, and the streaming codec. Holds no
/// reference to a transport; the host feeds it events and drains bytes from `service`.
pub struct ProtocolState {
    config: ProtocolStateConfig,
    protocol_version: ProtocolVersion,
    state: ConnectionState,
    halt_err: Option<ProtocolFatalError>,
    ever_connected: bool,

    operations: OperationTable,
    queues: OperationQueues,
    pending_publish_acks: HashMap<PacketId, OperationId>,
    pending_non_publish_acks: HashMap<PacketId, OperationId>,
    packet_ids: PacketIdAllocator,
    timeouts: TimeoutQueue,
    keepalive: KeepAlive,

    codec: Codec,
    frame_decoder: FrameDecoder,
    receive_maximum: u16,
    maximum_packet_size: usize,

    current_write: Option<OperationId>,
    write_pending: bool,
    write_resolution: PendingWriteResolution,

    keep_alive_millis: u64,
    ping_timeout_millis: u64,
}

impl fmt::Debug for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolState")
            .field("protocol_version", &self.protocol_version)
            .field("state", &self.state)
            .field("halt_err", &self.halt_err)
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl ProtocolState {
    /// Builds a fresh, disconnected state machine. Call [`ProtocolState::handle_network_event`]
    /// with `NetworkEvent::ConnectionOpened` once the host's transport is up to begin the
    /// implicit Connect.
    #[must_use]
    pub fn new(config: ProtocolStateConfig) -> Self {
        let protocol_version = config.protocol_version;
        let keep_alive_millis = config.connect_options.keep_alive().as_millis() as u64;
        let ping_timeout_millis = config.ping_timeout.as_millis() as u64;
        let maximum_packet_size = config.maximum_packet_size;

        ProtocolState {
            codec: codec_for_version(protocol_version),
            frame_decoder: FrameDecoder::new(maximum_packet_size),
            protocol_version,
            state: ConnectionState::Disconnected,
            halt_err: None,
            ever_connected: false,
            operations: OperationTable::new(),
            queues: OperationQueues::new(),
            pending_publish_acks: HashMap::new(),
            pending_non_publish_acks: HashMap::new(),
            packet_ids: PacketIdAllocator::new(),
            timeouts: TimeoutQueue::new(),
            keepalive: KeepAlive::new(keep_alive_millis, ping_timeout_millis),
            receive_maximum: DEFAULT_RECEIVE_MAXIMUM,
            maximum_packet_size,
            current_write: None,
            write_pending: false,
            write_resolution: PendingWriteResolution::None,
            keep_alive_millis,
            ping_timeout_millis,
            config,
        }
    }

    /// Whether a Connack has been accepted and no fatal error or disconnect has intervened since.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The error that halted the machine, if it has halted.
    #[must_use]
    pub fn halt_error(&self) -> Option<&ProtocolFatalError> {
        self.halt_err.as_ref()
    }

    /// Whether every queue, table, and allocator is empty — the state a freshly-constructed
    /// machine starts in, and the state a host may check for after a final, clean Disconnect.
    #[must_use]
    pub fn verify_empty(&self) -> bool {
        self.operations.is_empty()
            && self.queues.is_empty()
            && self.pending_publish_acks.is_empty()
            && self.pending_non_publish_acks.is_empty()
            && self.packet_ids.is_empty()
            && self.timeouts.is_empty()
            && self.current_write.is_none()
            && !self.write_pending
    }

    // ---- user events -----------------------------------------------------------------------

    /// Submits a user request. `on_success`/`on_failure` are invoked at most once, inline, from
    /// some later call to `handle_user_event`, `handle_network_event`, or `service` — never from
    /// this call itself (the operation always goes through the queue first).
    pub fn handle_user_event(
        &mut self,
        request: UserRequest,
        options: OperationOptions,
        on_success: OnSuccess,
        on_failure: OnFailure,
    ) {
        if let Some(err) = &self.halt_err {
            on_failure(OperationError::MachineHalted(err.operation_message()));
            return;
        }

        let (kind, packet, qos) = match request {
            UserRequest::Publish(opts) => {
                if opts.qos() == QoS::ExactlyOnce {
                    on_failure(OperationError::OutboundValidationFailure(
                        "QoS 2 publish origination is not supported".into(),
                    ));
                    return;
                }
                let qos = opts.qos();
                let packet = Packet::Publish(opts.build(self.protocol_version, None));
                (OperationKind::Publish, packet, qos)
            }
            UserRequest::Subscribe(opts) => {
                let packet = Packet::Subscribe(opts.build(self.protocol_version, 0));
                (OperationKind::Subscribe, packet, QoS::AtMostOnce)
            }
            UserRequest::Unsubscribe(opts) => {
                let packet = Packet::Unsubscribe(opts.build(self.protocol_version, 0));
                (OperationKind::Unsubscribe, packet, QoS::AtMostOnce)
            }
            UserRequest::Disconnect(opts) => {
                let packet = Packet::Disconnect(opts.build(self.protocol_version));
                (OperationKind::Disconnect, packet, QoS::AtMostOnce)
            }
        };

        if self.state == ConnectionState::Disconnected
            && !self.config.offline_queue_policy.admits(kind, qos)
        {
            on_failure(OperationError::OfflineQueuePolicyRejection);
            return;
        }

        let operation = ClientOperation::new(kind, packet, options, on_success, on_failure);
        let id = self.operations.insert(operation);
        if let Some(deadline) = self.operations.get(id).and_then(ClientOperation::timeout_at) {
            self.timeouts.push(deadline, id);
        }

        let queue_kind = if kind == OperationKind::Disconnect {
            QueueKind::HighPriority
        } else {
            QueueKind::User
        };
        self.queues.push_back(queue_kind, id);
    }

    // ---- network events ---------------------------------------------------------------------

    /// Delivers a network event. Returns the fatal error if this call halted the machine; the
    /// same error is returned by every subsequent call until the host drops this `ProtocolState`.
    pub fn handle_network_event(
        &mut self,
        event: NetworkEvent,
        now: ElapsedMillis,
    ) -> Result<(), ProtocolFatalError> {
        if let Some(err) = &self.halt_err {
            return Err(err.clone());
        }

        let result = match event {
            NetworkEvent::ConnectionOpened {
                establishment_timeout_at,
            } => self.handle_connection_opened(establishment_timeout_at),
            _ if self.state == ConnectionState::Disconnected => Err(
                ProtocolFatalError::IllegalStateTransition("event while disconnected".into()),
            ),
            NetworkEvent::ConnectionClosed => self.handle_connection_closed(),
            NetworkEvent::WriteCompletion => self.handle_write_completion(now),
            NetworkEvent::IncomingData(data) => self.handle_incoming_data(&data, now),
        };

        if let Err(err) = &result {
            self.halt(err.clone());
        }
        result
    }

    fn handle_connection_opened(
        &mut self,
        establishment_timeout_at: ElapsedMillis,
    ) -> Result<(), ProtocolFatalError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ProtocolFatalError::IllegalStateTransition(
                "ConnectionOpened while not disconnected".into(),
            ));
        }

        self.state = ConnectionState::PendingConnack;
        self.frame_decoder = FrameDecoder::new(self.maximum_packet_size);
        self.keepalive.set_establishment_timeout(establishment_timeout_at);

        let clean_start = self
            .config
            .resume_session_policy
            .clean_start(self.ever_connected);
        let mut connect = self
            .config
            .connect_options
            .build(self.protocol_version, clean_start);
        if let Some(transformer) = &self.config.connect_packet_transformer {
            connect = transformer(connect);
        }

        let id = self.create_system_operation(Packet::Connect(connect));
        self.queues.push_front(QueueKind::HighPriority, id);
        Ok(())
    }

    fn handle_connection_closed(&mut self) -> Result<(), ProtocolFatalError> {
        if let Some(id) = self.current_write.take() {
            self.abandon_in_flight(id);
        }
        if self.write_pending {
            self.abandon_pending_resolution(self.write_resolution);
            self.write_pending = false;
            self.write_resolution = PendingWriteResolution::None;
        }

        let stuck_publishes: Vec<OperationId> =
            self.pending_publish_acks.drain().map(|(_, id)| id).collect();
        for id in stuck_publishes {
            self.requeue_or_fail_publish(id);
        }

        let stuck_others: Vec<(PacketId, OperationId)> =
            self.pending_non_publish_acks.drain().collect();
        for (packet_id, id) in stuck_others {
            self.packet_ids.release(packet_id);
            let mut op = self.operations.remove(id);
            op.fail(OperationError::ConnectionClosedBeforeAck);
        }

        self.purge_high_priority_queue();

        self.keepalive = KeepAlive::new(self.keep_alive_millis, self.ping_timeout_millis);
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn handle_write_completion(&mut self, now: ElapsedMillis) -> Result<(), ProtocolFatalError> {
        if !self.write_pending {
            return Err(ProtocolFatalError::IllegalStateTransition(
                "WriteCompletion with no write pending".into(),
            ));
        }
        self.write_pending = false;

        match std::mem::replace(&mut self.write_resolution, PendingWriteResolution::None) {
            PendingWriteResolution::None => {}
            PendingWriteResolution::Discard(id) => {
                self.operations.remove(id);
            }
            PendingWriteResolution::ResolveQos0Publish(id) => {
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::PublishedQos0);
                self.keepalive.on_activity_out(now);
            }
            PendingWriteResolution::ResolveDisconnect(id) => {
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::Disconnected);
            }
            PendingWriteResolution::PingSent(id) => {
                self.operations.remove(id);
                self.keepalive.on_ping_sent(now);
            }
        }
        Ok(())
    }

    fn handle_incoming_data(
        &mut self,
        data: &[u8],
        now: ElapsedMillis,
    ) -> Result<(), ProtocolFatalError> {
        let mut cursor = data;
        loop {
            let progress = self
                .frame_decoder
                .poll(&mut cursor)
                .map_err(|e| ProtocolFatalError::DecoderFailure(e.to_string()))?;
            let (header, payload) = match progress {
                DecodeProgress::Incomplete => return Ok(()),
                DecodeProgress::Frame { header, payload } => (header, payload),
            };
            let packet = self
                .codec
                .decode(&header, &payload)
                .map_err(|e| ProtocolFatalError::DecoderFailure(e.to_string()))?;

            match self.state {
                ConnectionState::PendingConnack => self.handle_pending_connack_packet(packet, now)?,
                ConnectionState::Connected => self.handle_connected_packet(packet, now)?,
                ConnectionState::Disconnected => {
                    unreachable!("guarded in handle_network_event")
                }
            }
        }
    }

    fn handle_pending_connack_packet(
        &mut self,
        packet: Packet,
        now: ElapsedMillis,
    ) -> Result<(), ProtocolFatalError> {
        match packet {
            Packet::ConnectAck(ack) => {
                if !ack.reason_code.is_success() {
                    return Err(ProtocolFatalError::ConnackRejection(ack.reason_code));
                }
                self.apply_connack_properties(&ack);
                self.state = ConnectionState::Connected;
                self.ever_connected = true;
                self.keepalive.on_connected(now);
                if !ack.session_present {
                    self.discard_unresumed_session();
                }
                Ok(())
            }
            other => Err(ProtocolFatalError::ForbiddenPacketForState(
                other.packet_type(),
            )),
        }
    }

    fn handle_connected_packet(
        &mut self,
        packet: Packet,
        now: ElapsedMillis,
    ) -> Result<(), ProtocolFatalError> {
        let packet_type = packet.packet_type();
        match packet {
            Packet::Connect(_)
            | Packet::ConnectAck(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_) => Err(ProtocolFatalError::ForbiddenPacketForState(packet_type)),
            Packet::Disconnect(_) => {
                if self.protocol_version < ProtocolVersion::V5 {
                    Err(ProtocolFatalError::ForbiddenPacketForState(packet_type))
                } else {
                    info!("broker sent Disconnect while connected");
                    Ok(())
                }
            }
            Packet::Publish(publish) => {
                self.handle_inbound_publish(publish);
                Ok(())
            }
            Packet::PublishAck(ack) => {
                self.handle_puback(ack, now);
                Ok(())
            }
            Packet::PublishReceived(_) | Packet::PublishRelease(_) | Packet::PublishComplete(_) => {
                debug!("ignoring QoS 2 handshake packet; origination is not supported");
                Ok(())
            }
            Packet::SubscribeAck(ack) => {
                self.handle_suback(ack, now);
                Ok(())
            }
            Packet::UnsubscribeAck(ack) => {
                self.handle_unsuback(ack, now);
                Ok(())
            }
            Packet::Pingreq => {
                debug!("ignoring inbound Pingreq; this crate only implements the client role");
                Ok(())
            }
            Packet::Pingresp => {
                self.keepalive.on_pingresp(now);
                Ok(())
            }
            Packet::Auth(_) => {
                debug!("ignoring inbound Auth");
                Ok(())
            }
        }
    }

    fn apply_connack_properties(&mut self, ack: &ConnectAck) {
        if let Some(properties) = &ack.properties {
            for property in properties {
                match property {
                    Property::ReceiveMaximum(value) => self.receive_maximum = *value,
                    Property::MaximumPacketSize(value) => {
                        self.maximum_packet_size = *value as usize;
                    }
                    _ => {}
                }
            }
        }
    }

    fn handle_inbound_publish(&mut self, publish: Publish) {
        match publish.qos {
            QoS::AtMostOnce => debug!("inbound QoS 0 publish on {}", publish.topic_name),
            QoS::AtLeastOnce => {
                let packet_id = publish
                    .packet_id
                    .expect("decoder guarantees a QoS 1 publish carries a packet id");
                let reason_code = if self.protocol_version >= ProtocolVersion::V5 {
                    Some(ReasonCode::Success)
                } else {
                    None
                };
                let ack = Packet::PublishAck(PublishAck {
                    packet_id,
                    reason_code,
                    properties: None,
                });
                let id = self.create_system_operation(ack);
                self.queues.push_back(QueueKind::HighPriority, id);
            }
            QoS::ExactlyOnce => debug!(
                "inbound QoS 2 publish on {}; receiver-side handshake not implemented",
                publish.topic_name
            ),
        }
    }

    fn handle_puback(&mut self, ack: PublishAck, now: ElapsedMillis) {
        match self.pending_publish_acks.remove(&ack.packet_id) {
            Some(id) => {
                self.packet_ids.release(ack.packet_id);
                self.timeouts.cancel(id);
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::PublishedQos1(ack));
                self.keepalive.on_activity_out(now);
            }
            None => debug!("Puback for unknown packet id {}", ack.packet_id),
        }
    }

    fn handle_suback(&mut self, ack: SubscribeAck, now: ElapsedMillis) {
        match self.pending_non_publish_acks.remove(&ack.packet_id) {
            Some(id) => {
                self.packet_ids.release(ack.packet_id);
                self.timeouts.cancel(id);
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::Subscribed(ack));
                self.keepalive.on_activity_out(now);
            }
            None => debug!("Suback for unknown packet id {}", ack.packet_id),
        }
    }

    fn handle_unsuback(&mut self, ack: UnsubscribeAck, now: ElapsedMillis) {
        match self.pending_non_publish_acks.remove(&ack.packet_id) {
            Some(id) => {
                self.packet_ids.release(ack.packet_id);
                self.timeouts.cancel(id);
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::Unsubscribed(ack));
                self.keepalive.on_activity_out(now);
            }
            None => debug!("Unsuback for unknown packet id {}", ack.packet_id),
        }
    }

    fn discard_unresumed_session(&mut self) {
        for id in self.queues.drain(QueueKind::Resubmit) {
            let mut op = self.operations.remove(id);
            if let Some(packet_id) = op.packet_id() {
                self.packet_ids.release(packet_id);
                op.release_packet_id();
            }
            op.fail(OperationError::ReconnectWithoutSessionAndNoResumption);
        }
    }

    fn requeue_or_fail_publish(&mut self, id: OperationId) {
        let qos = match self
            .operations
            .get(id)
            .expect("pending-ack publish must be live")
            .packet()
        {
            Packet::Publish(publish) => publish.qos,
            _ => unreachable!("pending_publish_acks only ever holds Publish operations"),
        };

        if self.config.offline_queue_policy.admits(OperationKind::Publish, qos) {
            self.operations
                .get_mut(id)
                .expect("pending-ack publish must be live")
                .mark_duplicate();
            self.queues.push_back(QueueKind::Resubmit, id);
        } else {
            let packet_id = self
                .operations
                .get(id)
                .and_then(ClientOperation::packet_id)
                .expect("acked-pending publish must have a bound packet id");
            self.packet_ids.release(packet_id);
            let mut op = self.operations.remove(id);
            op.fail(OperationError::ConnectionClosedBeforeAck);
        }
    }

    fn abandon_in_flight(&mut self, id: OperationId) {
        let kind = self
            .operations
            .get(id)
            .expect("current_write id must be live")
            .kind();

        match kind {
            OperationKind::System => {
                self.operations.remove(id);
            }
            OperationKind::Disconnect => {
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::Disconnected);
            }
            OperationKind::Publish | OperationKind::Subscribe | OperationKind::Unsubscribe => {
                let operation = self
                    .operations
                    .get_mut(id)
                    .expect("current_write id must be live");
                if let Some(packet_id) = operation.packet_id() {
                    operation.release_packet_id();
                    self.packet_ids.release(packet_id);
                }
                self.queues.push_front(QueueKind::User, id);
            }
        }
    }

    fn abandon_pending_resolution(&mut self, resolution: PendingWriteResolution) {
        match resolution {
            PendingWriteResolution::None => {}
            PendingWriteResolution::Discard(id) | PendingWriteResolution::PingSent(id) => {
                self.operations.remove(id);
            }
            PendingWriteResolution::ResolveQos0Publish(id) => {
                self.queues.push_front(QueueKind::User, id);
            }
            PendingWriteResolution::ResolveDisconnect(id) => {
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::Disconnected);
            }
        }
    }

    fn purge_high_priority_queue(&mut self) {
        for id in self.queues.drain(QueueKind::HighPriority) {
            let kind = self
                .operations
                .get(id)
                .expect("queued operation id must be live")
                .kind();
            if kind == OperationKind::Disconnect {
                let mut op = self.operations.remove(id);
                op.resolve(OperationOutcome::Disconnected);
            } else {
                self.operations.remove(id);
            }
        }
    }

    // ---- servicing ---------------------------------------------------------------------------

    /// Drains as many bytes of outbound work into `out` as are currently ready, starting a new
    /// packet if the encoder is idle and something is unblocked. Call again after every
    /// `WriteCompletion` and at every timepoint [`ProtocolState::get_next_service_timepoint`]
    /// names.
    pub fn service(&mut self, now: ElapsedMillis, out: &mut impl BufMut) -> ServiceOutcome {
        if self.halt_err.is_some() {
            return ServiceOutcome::Halted;
        }

        self.expire_timed_out_operations(now);

        if let Some(err) = self.check_liveness_timeouts(now) {
            self.halt(err);
            return ServiceOutcome::Halted;
        }

        if self.codec.is_idle() && !self.write_pending {
            self.start_next_write(now);
        }

        if self.codec.is_idle() {
            return ServiceOutcome::Idle;
        }

        match self.codec.service(out) {
            mqtt_packet::EncodeOutcome::InProgress => ServiceOutcome::Wrote,
            mqtt_packet::EncodeOutcome::Complete => {
                self.finish_current_write();
                ServiceOutcome::Wrote
            }
        }
    }

    fn start_next_write(&mut self, now: ElapsedMillis) {
        if self.state == ConnectionState::Connected {
            if let Some(due) = self.keepalive.next_outbound_ping_at() {
                if due <= now {
                    let id = self.create_system_operation(Packet::Pingreq);
                    let started = self
                        .operations
                        .get(id)
                        .map(|op| {
                            self.codec
                                .start_encoding(op.packet(), self.maximum_packet_size)
                                .is_ok()
                        })
                        .unwrap_or(false);
                    if started {
                        self.current_write = Some(id);
                    } else {
                        self.operations.remove(id);
                        error!("Pingreq failed outbound size validation; will retry");
                    }
                    return;
                }
            }
        }

        loop {
            let (_, id) = match self.queues.peek_front() {
                Some(entry) => entry,
                None => return,
            };

            let operation = self
                .operations
                .get(id)
                .expect("queued operation id must be live");
            let kind = operation.kind();
            let qos_if_publish = match operation.packet() {
                Packet::Publish(p) => Some(p.qos),
                _ => None,
            };
            let already_bound = operation.packet_id().is_some();

            if let Some(qos) = qos_if_publish {
                if qos != QoS::AtMostOnce
                    && !admits_another_publish(self.pending_publish_acks.len(), self.receive_maximum)
                {
                    return;
                }
            }

            let needs_packet_id = matches!(kind, OperationKind::Subscribe | OperationKind::Unsubscribe)
                || matches!(qos_if_publish, Some(qos) if qos != QoS::AtMostOnce);

            if needs_packet_id && !already_bound {
                match self.packet_ids.allocate() {
                    Some(packet_id) => {
                        self.operations
                            .get_mut(id)
                            .expect("queued operation id must be live")
                            .bind_packet_id(packet_id);
                    }
                    None => return,
                }
            }

            self.queues.pop_next();

            let operation = self
                .operations
                .get(id)
                .expect("queued operation id must be live");
            match self.codec.start_encoding(operation.packet(), self.maximum_packet_size) {
                Ok(()) => {
                    self.current_write = Some(id);
                    return;
                }
                Err(EncodeError::PacketTooLarge { size, limit }) => {
                    self.fail_operation(
                        id,
                        OperationError::OutboundValidationFailure(format!(
                            "{} bytes exceeds maximum packet size {}",
                            size, limit
                        )),
                    );
                }
                Err(EncodeError::InvalidField(message)) => {
                    self.fail_operation(id, OperationError::OutboundValidationFailure(message));
                }
            }
        }
    }

    fn finish_current_write(&mut self) {
        let id = self
            .current_write
            .take()
            .expect("codec completed with no current_write set");
        let operation = self
            .operations
            .get(id)
            .expect("current_write id must be live");

        let resolution = match operation.kind() {
            OperationKind::System => match operation.packet() {
                Packet::Pingreq => PendingWriteResolution::PingSent(id),
                _ => PendingWriteResolution::Discard(id),
            },
            OperationKind::Disconnect => PendingWriteResolution::ResolveDisconnect(id),
            OperationKind::Publish => {
                let qos = match operation.packet() {
                    Packet::Publish(p) => p.qos,
                    _ => unreachable!("Publish-kind operation must carry a Publish packet"),
                };
                if qos == QoS::AtMostOnce {
                    PendingWriteResolution::ResolveQos0Publish(id)
                } else {
                    let packet_id = operation
                        .packet_id()
                        .expect("QoS >= 1 publish must have a bound packet id");
                    self.pending_publish_acks.insert(packet_id, id);
                    PendingWriteResolution::None
                }
            }
            OperationKind::Subscribe | OperationKind::Unsubscribe => {
                let packet_id = operation
                    .packet_id()
                    .expect("Subscribe/Unsubscribe must have a bound packet id");
                self.pending_non_publish_acks.insert(packet_id, id);
                PendingWriteResolution::None
            }
        };

        self.write_pending = true;
        self.write_resolution = resolution;
    }

    fn create_system_operation(&mut self, packet: Packet) -> OperationId {
        self.operations.insert(ClientOperation::new(
            OperationKind::System,
            packet,
            OperationOptions::default(),
            Box::new(|_| {}),
            Box::new(|_| {}),
        ))
    }

    fn fail_operation(&mut self, id: OperationId, error: OperationError) {
        if let Some(packet_id) = self.operations.get(id).and_then(ClientOperation::packet_id) {
            self.packet_ids.release(packet_id);
        }
        self.timeouts.cancel(id);
        let mut op = self.operations.remove(id);
        op.fail(error);
    }

    fn expire_timed_out_operations(&mut self, now: ElapsedMillis) {
        for id in self.timeouts.drain_expired(now) {
            if self.current_write == Some(id) {
                continue;
            }
            self.queues.remove(id);
            if let Some(packet_id) = self.operations.get(id).and_then(ClientOperation::packet_id) {
                self.pending_publish_acks.remove(&packet_id);
                self.pending_non_publish_acks.remove(&packet_id);
                self.packet_ids.release(packet_id);
            }
            let mut op = self.operations.remove(id);
            op.fail(OperationError::OperationTimeout);
        }
    }

    fn check_liveness_timeouts(&self, now: ElapsedMillis) -> Option<ProtocolFatalError> {
        match self.state {
            ConnectionState::PendingConnack => self
                .keepalive
                .establishment_timeout_at()
                .filter(|&deadline| now >= deadline)
                .map(|_| ProtocolFatalError::ConnackTimeout),
            ConnectionState::Connected => self
                .keepalive
                .pending_pingresp_timeout_at()
                .filter(|&deadline| now >= deadline)
                .map(|_| ProtocolFatalError::PingrespTimeout),
            ConnectionState::Disconnected => None,
        }
    }

    fn halt(&mut self, err: ProtocolFatalError) {
        let message = err.operation_message();
        for id in self.operations.ids().collect::<Vec<_>>() {
            let mut op = self.operations.remove(id);
            op.fail(OperationError::MachineHalted(message.clone()));
        }
        self.queues = OperationQueues::new();
        self.pending_publish_acks.clear();
        self.pending_non_publish_acks.clear();
        self.packet_ids = PacketIdAllocator::new();
        self.timeouts = TimeoutQueue::new();
        self.current_write = None;
        self.write_pending = false;
        self.write_resolution = PendingWriteResolution::None;
        self.halt_err = Some(err);
    }

    /// The next absolute elapsed-millis instant [`ProtocolState::service`] should be called
    /// again, folding the keep-alive clock, the operation timeout queue, and (if the encoder is
    /// idle and work is unblocked) now itself.
    #[must_use]
    pub fn get_next_service_timepoint(&self, now: ElapsedMillis) -> Option<ElapsedMillis> {
        if self.halt_err.is_some() {
            return None;
        }

        let ready_now = if self.write_pending || !self.codec.is_idle() {
            None
        } else if self.has_unblocked_queue_work() {
            Some(now)
        } else {
            None
        };

        fold_time_min(vec![
            self.keepalive.next_service_timepoint(),
            self.timeouts.next_deadline(),
            ready_now,
        ])
    }

    fn has_unblocked_queue_work(&self) -> bool {
        let (_, id) = match self.queues.peek_front() {
            Some(entry) => entry,
            None => return false,
        };
        let operation = self
            .operations
            .get(id)
            .expect("queued operation id must be live");

        if let Packet::Publish(p) = operation.packet() {
            if p.qos != QoS::AtMostOnce
                && !admits_another_publish(self.pending_publish_acks.len(), self.receive_maximum)
            {
                return false;
            }
        }

        let needs_packet_id = matches!(operation.kind(), OperationKind::Subscribe | OperationKind::Unsubscribe)
            || matches!(operation.packet(), Packet::Publish(p) if p.qos != QoS::AtMostOnce);
        if needs_packet_id && operation.packet_id().is_none() && self.packet_ids.is_full() {
            return false;
        }

        true
    }
}
