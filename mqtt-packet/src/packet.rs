//! Owned representation of every MQTT 3.1.1 and MQTT 5 control packet.
//!
//! A packet borrowing from the decode buffer can't outlive that buffer, but a `ClientOperation`
//! must (it can sit in a resubmit queue across a reconnect), so every field here is owned:
//! `String` for text, `Bytes` for binary payloads (still a cheap, ref-counted clone, not a copy).

use bytes::Bytes;
use derive_more::Display;
use num_enum::{TryFromPrimitive, UnsafeFromPrimitive};

use crate::props::Property;

/// The Protocol Name field of the Connect variable header, UTF-8-encoded-string form: a 2 byte
/// big-endian length prefix followed by the bytes `MQTT`. Both protocol revisions this crate
/// supports use the same name.
pub const PROTOCOL_NAME: &[u8] = b"\x00\x04MQTT";

/// The revision level of the protocol used by the Client.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, PartialOrd, Copy, Clone, TryFromPrimitive)]
pub enum ProtocolVersion {
    /// The value of the Protocol Level field for the version 3.1.1 of the protocol is 4 (0x04).
    V311 = 4,
    /// The value of the Protocol Version field for version 5.0 of the protocol is 5 (0x05).
    V5 = 5,
}

/// MQTT Control Packets, owned.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet {
    /// Client request to connect to Server
    Connect(Connect),
    /// Connect acknowledgment
    ConnectAck(ConnectAck),
    /// Publish message
    Publish(Publish),
    /// Publish acknowledgment
    PublishAck(PublishAck),
    /// Publish received (assured delivery part 1, QoS 2)
    PublishReceived(PublishReceived),
    /// Publish release (assured delivery part 2, QoS 2)
    PublishRelease(PublishRelease),
    /// Publish complete (assured delivery part 3, QoS 2)
    PublishComplete(PublishComplete),
    /// Client subscribe request
    Subscribe(Subscribe),
    /// Subscribe acknowledgment
    SubscribeAck(SubscribeAck),
    /// Unsubscribe request
    Unsubscribe(Unsubscribe),
    /// Unsubscribe acknowledgment
    UnsubscribeAck(UnsubscribeAck),
    /// PING request
    Pingreq,
    /// PING response
    Pingresp,
    /// Client is disconnecting
    Disconnect(Disconnect),
    /// Authentication exchange (MQTT 5)
    Auth(Auth),
}

/// Fixed Header
///
/// Each MQTT Control Packet contains a fixed header.
#[derive(Debug, PartialEq, Clone)]
pub struct FixedHeader {
    /// MQTT Control Packet type
    pub packet_type: Type,
    /// Flags specific to each MQTT Control Packet type
    pub packet_flags: u8,
    /// the number of bytes remaining within the current packet,
    /// including data in the variable header and the payload.
    pub remaining_length: usize,
}

/// MQTT Control Packet type (high nibble of the first byte)
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum Type {
    /// Client request to connect to Server
    Connect = 1,
    /// Connect acknowledgment
    Connack = 2,
    /// Publish message
    Publish = 3,
    /// Publish acknowledgment
    Puback = 4,
    /// Publish received (assured delivery part 1)
    Pubrec = 5,
    /// Publish release (assured delivery part 2)
    Pubrel = 6,
    /// Publish complete (assured delivery part 3)
    Pubcomp = 7,
    /// Client subscribe request
    Subscribe = 8,
    /// Subscribe acknowledgment
    Suback = 9,
    /// Unsubscribe request
    Unsubscribe = 10,
    /// Unsubscribe acknowledgment
    Unsuback = 11,
    /// PING request
    Pingreq = 12,
    /// PING response
    Pingresp = 13,
    /// Disconnect notification
    Disconnect = 14,
    /// Authentication exchange
    Auth = 15,
}

/// Packet Identifier
///
/// The variable header component of many of the Control Packet types includes a 2 byte Packet
/// Identifier field. `0` is never a valid value for a packet that carries one.
pub type PacketId = u16;

/// Quality of Service levels
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, UnsafeFromPrimitive,
)]
pub enum QoS {
    /// At most once delivery: no packet id, no acknowledgement.
    #[display(fmt = "at-most-once")]
    AtMostOnce = 0,
    /// At least once delivery: carries a packet id, acknowledged by Puback.
    #[display(fmt = "at-least-once")]
    AtLeastOnce = 1,
    /// Exactly once delivery: carries a packet id, acknowledged by the Pubrec/Pubrel/Pubcomp
    /// handshake. This crate encodes/decodes it fully; `ProtocolState` does not originate it.
    #[display(fmt = "exactly-once")]
    ExactlyOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::AtMostOnce
    }
}

/// The result of an operation, the MQTT 5 Reason Code space. MQTT 3.1.1 packets that carry no
/// reason byte on the wire leave the corresponding field `None`; 3.1.1's 6-value Connect Return
/// Code is mapped onto this same enum by the codec (`props::connect_reason_for_v311`-style
/// helpers in `decode`/`encode`) so callers only ever deal with one type.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum ReasonCode {
    /// Granted QoS 0 [SUBACK]; also "Success" / "Connection Accepted" / "Normal disconnection".
    GrantedQoS0 = 0,
    /// Granted QoS 1 [SUBACK]
    GrantedQoS1 = 1,
    /// Granted QoS 2 [SUBACK]
    GrantedQoS2 = 2,
    /// Disconnect with Will Message [DISCONNECT]
    DisconnectWithWill = 0x04,
    /// No matching subscribers [PUBACK, PUBREC]
    NoMatchingSubscribers = 0x10,
    /// No subscription existed [UNSUBACK]
    NoSubscriptionExisted = 0x11,
    /// Continue authentication [AUTH]
    ContinueAuthentication = 0x18,
    /// Re-authenticate [AUTH]
    Reauthenticate = 0x19,
    /// Unspecified error [CONNACK, PUBACK, PUBREC, SUBACK, UNSUBACK, DISCONNECT]
    UnspecifiedError = 0x80,
    /// Malformed Packet [CONNACK, DISCONNECT]
    MalformedPacket = 0x81,
    /// Protocol Error [CONNACK, DISCONNECT]
    ProtocolError = 0x82,
    /// Implementation specific error [CONNACK, PUBACK, PUBREC, SUBACK, UNSUBACK, DISCONNECT]
    ImplementationSpecificError = 0x83,
    /// Unsupported Protocol Version [CONNACK]
    UnsupportedProtocolVersion = 0x84,
    /// Client Identifier not valid [CONNACK]
    ClientIdNotValid = 0x85,
    /// Bad User Name or Password [CONNACK]
    BadUserNameOrPassword = 0x86,
    /// Not authorized [CONNACK, PUBACK, PUBREC, SUBACK, UNSUBACK, DISCONNECT]
    NotAuthorized = 0x87,
    /// Server unavailable [CONNACK]
    ServerUnavailable = 0x88,
    /// Server busy [CONNACK, DISCONNECT]
    ServerBusy = 0x89,
    /// Banned [CONNACK]
    Banned = 0x8A,
    /// Server shutting down [DISCONNECT]
    ServerShuttingDown = 0x8B,
    /// Bad authentication method [CONNACK, DISCONNECT]
    BadAuthenticationMethod = 0x8C,
    /// Keep Alive timeout [DISCONNECT]
    KeepAliveTimeout = 0x8D,
    /// Session taken over [DISCONNECT]
    SessionTakenOver = 0x8E,
    /// Topic Filter invalid [SUBACK, UNSUBACK, DISCONNECT]
    InvalidTopicFilter = 0x8F,
    /// Topic Name invalid [CONNACK, PUBACK, PUBREC, DISCONNECT]
    InvalidTopicName = 0x90,
    /// Packet Identifier in use [PUBACK, PUBREC, SUBACK, UNSUBACK]
    PacketIdInUse = 0x91,
    /// Packet Identifier not found [PUBREL, PUBCOMP]
    PacketIdNotFound = 0x92,
    /// Receive Maximum exceeded [DISCONNECT]
    ReceiveMaximumExceeded = 0x93,
    /// Topic Alias invalid [DISCONNECT]
    InvalidTopicAlias = 0x94,
    /// Packet too large [CONNACK, DISCONNECT]
    PacketTooLarge = 0x95,
    /// Message rate too high [DISCONNECT]
    MessageRateTooHigh = 0x96,
    /// Quota exceeded [CONNACK, PUBACK, PUBREC, SUBACK, DISCONNECT]
    QuotaExceeded = 0x97,
    /// Administrative action [DISCONNECT]
    AdministrativeAction = 0x98,
    /// Payload format invalid [CONNACK, PUBACK, PUBREC, DISCONNECT]
    InvalidPayloadFormat = 0x99,
    /// Retain not supported [CONNACK, DISCONNECT]
    RetainNotSupported = 0x9A,
    /// QoS not supported [CONNACK, DISCONNECT]
    QoSNotSupported = 0x9B,
    /// Use another server [CONNACK, DISCONNECT]
    UseAnotherServer = 0x9C,
    /// Server moved [CONNACK, DISCONNECT]
    ServerMoved = 0x9D,
    /// Shared Subscriptions not supported [SUBACK, DISCONNECT]
    SharedSubscriptionsNotSupported = 0x9E,
    /// Connection rate exceeded [CONNACK, DISCONNECT]
    ConnectionRateExceeded = 0x9F,
    /// Maximum connect time [DISCONNECT]
    MaximumConnectTime = 0xA0,
    /// Subscription Identifiers not supported [SUBACK, DISCONNECT]
    SubscriptionIdNotSupported = 0xA1,
    /// Wildcard Subscriptions not supported [SUBACK, DISCONNECT]
    WildcardSubscriptionsNotSupported = 0xA2,
}

impl Default for ReasonCode {
    fn default() -> Self {
        ReasonCode::Success
    }
}

#[allow(non_upper_case_globals)]
impl ReasonCode {
    /// Success [CONNACK, PUBACK, PUBREC, PUBREL, PUBCOMP, UNSUBACK, AUTH]
    pub const Success: Self = Self::GrantedQoS0;
    /// Normal disconnection [DISCONNECT]
    pub const NormalDisconnection: Self = Self::Success;
    /// Connection Accepted [CONNACK]
    pub const ConnectionAccepted: Self = Self::Success;
}

impl ReasonCode {
    /// True for the codes that represent "this went fine" across every packet type that carries
    /// a reason code.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, ReasonCode::GrantedQoS0 | ReasonCode::GrantedQoS1 | ReasonCode::GrantedQoS2)
    }
}

/// Client request to connect to Server
#[derive(Debug, PartialEq, Clone)]
pub struct Connect {
    /// the revision level of the protocol used by the Client.
    pub protocol_version: ProtocolVersion,
    /// the handling of the Session state; `true` starts a fresh session.
    pub clean_start: bool,
    /// a time interval measured in seconds; `0` disables keep-alive pings.
    pub keep_alive: u16,
    /// Connect properties (MQTT 5 only; `None` under 3.1.1, `Some(vec![])` at minimum otherwise).
    pub properties: Option<Vec<Property>>,
    /// identifies the Client to the Server.
    pub client_id: String,
    /// Will Message to be stored on the Server and associated with the Network Connection.
    pub last_will: Option<LastWill>,
    /// username used by the Server for authentication and authorization.
    pub username: Option<String>,
    /// password used by the Server for authentication and authorization.
    pub password: Option<Bytes>,
}

bitflags! {
    /// The Connect Flags byte contains a number of parameters specifying the behavior of the
    /// MQTT connection, and indicates the presence or absence of fields in the payload.
    #[derive(Default)]
    pub struct ConnectFlags: u8 {
        /// a user name is present in the payload.
        const USERNAME      = 0b1000_0000;
        /// a password is present in the payload.
        const PASSWORD      = 0b0100_0000;
        /// the Will Message is to be Retained when it is published.
        const WILL_RETAIN   = 0b0010_0000;
        /// the QoS level to be used when publishing the Will Message.
        const WILL_QOS      = 0b0001_1000;
        /// a Will Message MUST be stored on the Server and associated with the Network Connection.
        const LAST_WILL     = 0b0000_0100;
        /// the handling of the Session state.
        const CLEAN_START   = 0b0000_0010;
    }
}

const WILL_QOS_SHIFT: usize = 3;

impl ConnectFlags {
    /// the QoS level to be used when publishing the Will Message.
    #[must_use]
    pub fn will_qos(self) -> QoS {
        unsafe { QoS::from_unchecked((self & Self::WILL_QOS).bits() >> WILL_QOS_SHIFT) }
    }
}

impl From<QoS> for ConnectFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << WILL_QOS_SHIFT)
    }
}

/// Connection Will
#[derive(Debug, PartialEq, Clone)]
pub struct LastWill {
    /// the QoS level to be used when publishing the Will Message.
    pub qos: QoS,
    /// the Will Message is to be Retained when it is published.
    pub retain: bool,
    /// the Will Topic
    pub topic_name: String,
    /// Will properties (MQTT 5 only), including an optional Will Delay Interval.
    pub properties: Option<Vec<Property>>,
    /// the Application Message that is to be published to the Will Topic
    pub message: Bytes,
}

/// Connect acknowledgment
#[derive(Debug, PartialEq, Clone)]
pub struct ConnectAck {
    /// Whether the Server already holds Session state for this Client.
    pub session_present: bool,
    /// The result of the connection attempt.
    pub reason_code: ReasonCode,
    /// ConnectAck properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
}

bitflags! {
    /// The Connect Acknowledge Flags.
    #[derive(Default)]
    pub struct ConnectAckFlags: u8 {
        /// whether the Client and Server have a consistent view of Session state.
        const SESSION_PRESENT = 0b0000_0001;
    }
}

/// Publish message
#[derive(Debug, PartialEq, Clone)]
pub struct Publish {
    /// set when this might be re-delivery of an earlier attempt to send the packet.
    pub dup: bool,
    /// The level of assurance for delivery of an Application Message.
    pub qos: QoS,
    /// If set, the Server stores the Application Message for future matching subscribers.
    pub retain: bool,
    /// the information channel to which payload data is published.
    pub topic_name: String,
    /// present only when QoS is 1 or 2.
    pub packet_id: Option<PacketId>,
    /// Publish properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
    /// the Application Message that is being published.
    pub payload: Bytes,
}

bitflags! {
    /// Publish Flags, the low nibble of the fixed header byte.
    #[derive(Default)]
    pub struct PublishFlags: u8 {
        /// might be re-delivery of an earlier attempt to send the packet.
        const DUP = 0b0000_1000;
        /// the level of assurance for delivery of an Application Message.
        const QOS = 0b0000_0110;
        /// deliverable to future subscribers whose subscriptions match its topic name.
        const RETAIN = 0b0000_0001;
    }
}

const PUBLISH_QOS_SHIFT: usize = 1;

impl PublishFlags {
    /// the QoS level this Publish carries.
    #[must_use]
    pub fn qos(self) -> QoS {
        unsafe { QoS::from_unchecked((self & Self::QOS).bits() >> PUBLISH_QOS_SHIFT) }
    }
}

impl From<QoS> for PublishFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << PUBLISH_QOS_SHIFT)
    }
}

/// Publish acknowledgment (QoS 1)
#[derive(Debug, PartialEq, Clone)]
pub struct PublishAck {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// Reason Code (MQTT 5 only; 3.1.1 Puback carries no reason byte).
    pub reason_code: Option<ReasonCode>,
    /// PublishAck properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
}

/// Publish received (assured delivery part 1, QoS 2)
#[derive(Debug, PartialEq, Clone)]
pub struct PublishReceived {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// Reason Code (MQTT 5 only)
    pub reason_code: Option<ReasonCode>,
    /// PublishReceived properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
}

/// Publish release (assured delivery part 2, QoS 2)
#[derive(Debug, PartialEq, Clone)]
pub struct PublishRelease {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// Reason Code (MQTT 5 only)
    pub reason_code: Option<ReasonCode>,
    /// PublishRelease properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
}

/// Publish complete (assured delivery part 3, QoS 2)
#[derive(Debug, PartialEq, Clone)]
pub struct PublishComplete {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// Reason Code (MQTT 5 only)
    pub reason_code: Option<ReasonCode>,
    /// PublishComplete properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
}

/// A single Topic Filter/QoS pair within a Subscribe packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subscription {
    /// Topic Filter the Client wants to subscribe to.
    pub topic_filter: String,
    /// Maximum QoS at which the Server can send Application Messages to the Client.
    pub qos: QoS,
    /// (MQTT 5) suppress delivery of messages published by this same Client.
    pub no_local: bool,
    /// (MQTT 5) keep the RETAIN flag as published rather than clearing it.
    pub retain_as_published: bool,
    /// (MQTT 5) whether retained messages are sent when the subscription is established.
    pub retain_handling: RetainHandling,
}

impl From<&str> for Subscription {
    fn from(topic_filter: &str) -> Self {
        Subscription {
            topic_filter: topic_filter.to_owned(),
            ..Default::default()
        }
    }
}

impl From<(&str, QoS)> for Subscription {
    fn from((topic_filter, qos): (&str, QoS)) -> Self {
        Subscription {
            topic_filter: topic_filter.to_owned(),
            qos,
            ..Default::default()
        }
    }
}

/// Whether retained messages are sent when a subscription is (re-)established.
#[repr(u8)]
#[derive(Debug, PartialEq, Clone, Copy, TryFromPrimitive)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    AfterSubscribe = 0,
    /// Send retained messages only if the subscription does not currently exist.
    NewSubscription = 1,
    /// Do not send retained messages at subscribe time.
    SkipSubscribe = 2,
}

impl Default for RetainHandling {
    fn default() -> Self {
        RetainHandling::AfterSubscribe
    }
}

/// Client subscribe request
#[derive(Debug, PartialEq, Clone)]
pub struct Subscribe {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// Subscribe properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
    /// the Topic Filters and options the Client wants to subscribe to.
    pub subscriptions: Vec<Subscription>,
}

/// Per-filter outcome of a Subscribe request.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SubscribeReturnCode {
    /// Granted at (at most) this QoS.
    Success(QoS),
    /// Refused; carries the MQTT 5 reason code, or `ReasonCode::UnspecifiedError` under 3.1.1
    /// (whose wire encoding of failure is a single fixed byte, 0x80).
    Failure(ReasonCode),
}

impl SubscribeReturnCode {
    pub(crate) const FAILURE_BYTE: u8 = 0x80;
}

/// Subscribe acknowledgment
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeAck {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// SubscribeAck properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
    /// one outcome per Topic Filter in the Subscribe packet being acknowledged, in order.
    pub status: Vec<SubscribeReturnCode>,
}

/// Unsubscribe request
#[derive(Debug, PartialEq, Clone)]
pub struct Unsubscribe {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// Unsubscribe properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
    /// the Topic Filters the Client wishes to unsubscribe from.
    pub topic_filters: Vec<String>,
}

/// Unsubscribe acknowledgment
#[derive(Debug, PartialEq, Clone)]
pub struct UnsubscribeAck {
    /// Packet Identifier
    pub packet_id: PacketId,
    /// UnsubscribeAck properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
    /// per-filter reason codes; always empty under MQTT 3.1.1, which carries none on the wire.
    pub status: Vec<ReasonCode>,
}

/// Disconnect notification
#[derive(Debug, PartialEq, Clone)]
pub struct Disconnect {
    /// Reason Code (MQTT 5 only; 3.1.1 Disconnect carries no payload at all).
    pub reason_code: Option<ReasonCode>,
    /// Disconnect properties (MQTT 5 only).
    pub properties: Option<Vec<Property>>,
}

/// Authentication exchange (MQTT 5 only)
#[derive(Debug, PartialEq, Clone)]
pub struct Auth {
    /// Reason Code.
    pub reason_code: Option<ReasonCode>,
    /// Authentication properties.
    pub properties: Option<Vec<Property>>,
}

impl Packet {
    /// The MQTT control packet type.
    #[must_use]
    pub fn packet_type(&self) -> Type {
        match self {
            Packet::Connect(_) => Type::Connect,
            Packet::ConnectAck(_) => Type::Connack,
            Packet::Publish(_) => Type::Publish,
            Packet::PublishAck(_) => Type::Puback,
            Packet::PublishReceived(_) => Type::Pubrec,
            Packet::PublishRelease(_) => Type::Pubrel,
            Packet::PublishComplete(_) => Type::Pubcomp,
            Packet::Subscribe(_) => Type::Subscribe,
            Packet::SubscribeAck(_) => Type::Suback,
            Packet::Unsubscribe(_) => Type::Unsubscribe,
            Packet::UnsubscribeAck(_) => Type::Unsuback,
            Packet::Pingreq => Type::Pingreq,
            Packet::Pingresp => Type::Pingresp,
            Packet::Disconnect(_) => Type::Disconnect,
            Packet::Auth(_) => Type::Auth,
        }
    }

    /// The packet id this packet carries, if any.
    #[must_use]
    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            Packet::Publish(p) => p.packet_id,
            Packet::PublishAck(p) => Some(p.packet_id),
            Packet::PublishReceived(p) => Some(p.packet_id),
            Packet::PublishRelease(p) => Some(p.packet_id),
            Packet::PublishComplete(p) => Some(p.packet_id),
            Packet::Subscribe(p) => Some(p.packet_id),
            Packet::SubscribeAck(p) => Some(p.packet_id),
            Packet::Unsubscribe(p) => Some(p.packet_id),
            Packet::UnsubscribeAck(p) => Some(p.packet_id),
            _ => None,
        }
    }
}
