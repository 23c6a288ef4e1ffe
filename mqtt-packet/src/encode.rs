use core::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::EncodeError;
use crate::packet::*;
use crate::varint::{encode_varint, encoded_len};

const PROPERTY_ID_SIZE: usize = mem::size_of::<u8>();
const LENGTH_FIELD_SIZE: usize = mem::size_of::<u16>();

const SUPPORTED: u8 = 1;
const UNSUPPORTED: u8 = 0;

impl Packet {
    fn fixed_header(&self) -> FixedHeader {
        FixedHeader {
            packet_type: self.packet_type(),
            packet_flags: self.packet_flags(),
            remaining_length: self.remaining_length(),
        }
    }

    fn packet_flags(&self) -> u8 {
        match self {
            Packet::Publish(ref publish) => publish.flags().bits(),
            Packet::PublishRelease(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0x02,
            _ => 0,
        }
    }

    fn remaining_length(&self) -> usize {
        match self {
            Packet::Connect(ref connect) => connect.size(),
            Packet::ConnectAck(ref connect_ack) => connect_ack.size(),
            Packet::Publish(ref publish) => publish.size(),
            Packet::PublishAck(ref publish_ack) => publish_ack.size(),
            Packet::PublishReceived(ref publish_received) => publish_received.size(),
            Packet::PublishRelease(ref publish_release) => publish_release.size(),
            Packet::PublishComplete(ref publish_complete) => publish_complete.size(),
            Packet::Subscribe(ref subscribe) => subscribe.size(),
            Packet::SubscribeAck(ref subscribe_ack) => subscribe_ack.size(),
            Packet::Unsubscribe(ref unsubscribe) => unsubscribe.size(),
            Packet::UnsubscribeAck(ref unsubscribe_ack) => unsubscribe_ack.size(),
            Packet::Pingreq | Packet::Pingresp => 0,
            Packet::Disconnect(ref disconnect) => disconnect.size(),
            Packet::Auth(ref auth) => auth.size(),
        }
    }
}

trait BufMutExt: BufMut {
    fn put_utf8_str(&mut self, s: &str) {
        self.put_binary(s.as_bytes())
    }

    fn put_binary(&mut self, s: &[u8]) {
        self.put_u16(s.len() as u16);
        self.put_slice(s)
    }

    fn put_varint(&mut self, n: usize) {
        let mut tmp = Vec::with_capacity(4);
        encode_varint(n, &mut tmp);
        self.put_slice(&tmp);
    }
}

impl<T: BufMut> BufMutExt for T {}

/// A trait for objects which can be written to byte-oriented sinks.
///
/// A single in-memory pass; streaming across short writes is [`PacketEncoder`]'s job, layered
/// on top.
pub trait WriteTo {
    /// Gets the size of this object.
    fn size(&self) -> usize;

    /// Writes this object to the given byte-oriented sink.
    fn write_to<T: BufMut>(&self, buf: &mut T);
}

impl WriteTo for Packet {
    fn size(&self) -> usize {
        let fixed_header = self.fixed_header();
        fixed_header.size() + fixed_header.remaining_length
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        self.fixed_header().write_to(buf);

        match self {
            Packet::Connect(ref connect) => connect.write_to(buf),
            Packet::ConnectAck(ref connect_ack) => connect_ack.write_to(buf),
            Packet::Publish(ref publish) => publish.write_to(buf),
            Packet::PublishAck(ref publish_ack) => publish_ack.write_to(buf),
            Packet::PublishReceived(ref publish_received) => publish_received.write_to(buf),
            Packet::PublishRelease(ref publish_release) => publish_release.write_to(buf),
            Packet::PublishComplete(ref publish_complete) => publish_complete.write_to(buf),
            Packet::Subscribe(ref subscribe) => subscribe.write_to(buf),
            Packet::SubscribeAck(ref subscribe_ack) => subscribe_ack.write_to(buf),
            Packet::Unsubscribe(ref unsubscribe) => unsubscribe.write_to(buf),
            Packet::UnsubscribeAck(ref unsubscribe_ack) => unsubscribe_ack.write_to(buf),
            Packet::Pingreq | Packet::Pingresp => {}
            Packet::Disconnect(ref disconnect) => disconnect.write_to(buf),
            Packet::Auth(ref auth) => auth.write_to(buf),
        }
    }
}

impl WriteTo for FixedHeader {
    fn size(&self) -> usize {
        mem::size_of::<u8>() + encoded_len(self.remaining_length)
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(((self.packet_type as u8) << 4) + self.packet_flags);
        buf.put_varint(self.remaining_length);
    }
}

impl WriteTo for [Property] {
    fn size(&self) -> usize {
        let size = self.iter().map(Property::size).sum();

        encoded_len(size) + size
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_varint(self.iter().map(Property::size).sum());

        for prop in self {
            prop.write_to(buf);
        }
    }
}

impl WriteTo for Property {
    fn size(&self) -> usize {
        PROPERTY_ID_SIZE
            + match self {
                Property::PayloadFormat(_)
                | Property::RequestProblemInformation(_)
                | Property::RequestResponseInformation(_)
                | Property::MaximumQoS(_)
                | Property::RetainAvailable(_)
                | Property::WildcardSubscriptionAvailable(_)
                | Property::SubscriptionIdAvailable(_)
                | Property::SharedSubscriptionAvailable(_) => mem::size_of::<u8>(),

                Property::ServerKeepAlive(_)
                | Property::ReceiveMaximum(_)
                | Property::TopicAliasMaximum(_)
                | Property::TopicAlias(_) => mem::size_of::<u16>(),

                Property::MessageExpiryInterval(_)
                | Property::SessionExpiryInterval(_)
                | Property::WillDelayInterval(_)
                | Property::MaximumPacketSize(_) => mem::size_of::<u32>(),

                Property::SubscriptionId(n) => encoded_len(*n as usize),

                Property::CorrelationData(s) | Property::AuthData(s) => LENGTH_FIELD_SIZE + s.len(),

                Property::ContentType(s)
                | Property::ResponseTopic(s)
                | Property::AssignedClientId(s)
                | Property::AuthMethod(s)
                | Property::ResponseInformation(s)
                | Property::ServerReference(s)
                | Property::Reason(s) => LENGTH_FIELD_SIZE + s.len(),

                Property::UserProperty(name, value) => {
                    LENGTH_FIELD_SIZE + name.len() + LENGTH_FIELD_SIZE + value.len()
                }
            }
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(self.id() as u8);

        match self {
            Property::RetainAvailable(b)
            | Property::WildcardSubscriptionAvailable(b)
            | Property::SubscriptionIdAvailable(b)
            | Property::SharedSubscriptionAvailable(b) => {
                buf.put_u8(if *b { SUPPORTED } else { UNSUPPORTED })
            }

            Property::RequestProblemInformation(b) | Property::RequestResponseInformation(b) => {
                buf.put_u8(if *b { SUPPORTED } else { UNSUPPORTED })
            }

            Property::PayloadFormat(n) => buf.put_u8(*n as u8),
            Property::MaximumQoS(n) => buf.put_u8(*n as u8),

            Property::ServerKeepAlive(n)
            | Property::ReceiveMaximum(n)
            | Property::TopicAliasMaximum(n)
            | Property::TopicAlias(n) => buf.put_u16(*n),

            Property::MessageExpiryInterval(d)
            | Property::WillDelayInterval(d) => buf.put_u32(d.as_secs() as u32),
            Property::SessionExpiryInterval(expiry) => buf.put_u32(expiry.as_secs()),
            Property::MaximumPacketSize(n) => buf.put_u32(*n),

            Property::SubscriptionId(n) => buf.put_varint(*n as usize),

            Property::CorrelationData(s) | Property::AuthData(s) => buf.put_binary(s),

            Property::ContentType(s)
            | Property::ResponseTopic(s)
            | Property::AssignedClientId(s)
            | Property::AuthMethod(s)
            | Property::ResponseInformation(s)
            | Property::ServerReference(s)
            | Property::Reason(s) => buf.put_utf8_str(s),

            Property::UserProperty(name, value) => {
                buf.put_utf8_str(name);
                buf.put_utf8_str(value);
            }
        }
    }
}

fn properties_size(properties: &Option<Vec<Property>>) -> usize {
    match properties {
        Some(props) => props.as_slice().size(),
        None => 0,
    }
}

fn write_properties<T: BufMut>(properties: &Option<Vec<Property>>, buf: &mut T) {
    if let Some(props) = properties {
        props.as_slice().write_to(buf);
    }
}

impl Publish {
    fn flags(&self) -> PublishFlags {
        let mut flags = PublishFlags::from(self.qos);
        if self.dup {
            flags |= PublishFlags::DUP;
        }
        if self.retain {
            flags |= PublishFlags::RETAIN;
        }
        flags
    }
}

impl WriteTo for Connect {
    fn size(&self) -> usize {
        PROTOCOL_NAME.len()
            + mem::size_of::<u8>() // protocol_version
            + mem::size_of::<u8>() // connect flags
            + mem::size_of::<u16>() // keep_alive
            + properties_size(&self.properties)
            + LENGTH_FIELD_SIZE + self.client_id.len()
            + self.last_will.as_ref().map_or(0, |will| {
                properties_size(&will.properties)
                    + LENGTH_FIELD_SIZE + will.topic_name.len()
                    + LENGTH_FIELD_SIZE + will.message.len()
            })
            + self.username.as_ref().map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
            + self.password.as_ref().map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        let mut flags = ConnectFlags::empty();
        if let Some(ref will) = self.last_will {
            flags.remove(ConnectFlags::WILL_QOS);
            flags |= ConnectFlags::LAST_WILL | ConnectFlags::from(will.qos);
            if will.retain {
                flags.insert(ConnectFlags::WILL_RETAIN);
            } else {
                flags.remove(ConnectFlags::WILL_RETAIN);
            }
        }
        if self.username.is_some() {
            flags |= ConnectFlags::USERNAME;
        }
        if self.password.is_some() {
            flags |= ConnectFlags::PASSWORD;
        }
        if self.clean_start {
            flags |= ConnectFlags::CLEAN_START;
        }

        buf.put_slice(PROTOCOL_NAME);
        buf.put_u8(self.protocol_version as u8);
        buf.put_u8(flags.bits());
        buf.put_u16(self.keep_alive);
        write_properties(&self.properties, buf);
        buf.put_utf8_str(&self.client_id);
        if let Some(ref will) = self.last_will {
            write_properties(&will.properties, buf);
            buf.put_utf8_str(&will.topic_name);
            buf.put_binary(&will.message);
        }
        if let Some(ref username) = self.username {
            buf.put_utf8_str(username);
        }
        if let Some(ref password) = self.password {
            buf.put_binary(password);
        }
    }
}

impl WriteTo for ConnectAck {
    fn size(&self) -> usize {
        mem::size_of::<u8>() + mem::size_of::<u8>() + properties_size(&self.properties)
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u8(if self.session_present {
            ConnectAckFlags::SESSION_PRESENT.bits()
        } else {
            0
        });
        buf.put_u8(self.reason_code as u8);
        write_properties(&self.properties, buf);
    }
}

impl WriteTo for Publish {
    fn size(&self) -> usize {
        LENGTH_FIELD_SIZE
            + self.topic_name.len()
            + self.packet_id.map_or(0, |_| mem::size_of::<PacketId>())
            + properties_size(&self.properties)
            + self.payload.len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_utf8_str(&self.topic_name);
        if let Some(packet_id) = self.packet_id {
            buf.put_u16(packet_id);
        }
        write_properties(&self.properties, buf);
        buf.put_slice(&self.payload)
    }
}

macro_rules! impl_write_to_for_puback_like {
    ($ty:ty) => {
        impl WriteTo for $ty {
            fn size(&self) -> usize {
                mem::size_of::<PacketId>()
                    + self.reason_code.map_or(0, |_| mem::size_of::<u8>())
                    + properties_size(&self.properties)
            }

            fn write_to<T: BufMut>(&self, buf: &mut T) {
                buf.put_u16(self.packet_id);
                if let Some(reason_code) = self.reason_code {
                    buf.put_u8(reason_code as u8)
                }
                write_properties(&self.properties, buf);
            }
        }
    };
}

impl_write_to_for_puback_like!(PublishAck);
impl_write_to_for_puback_like!(PublishReceived);
impl_write_to_for_puback_like!(PublishRelease);
impl_write_to_for_puback_like!(PublishComplete);

impl WriteTo for Subscribe {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
            + properties_size(&self.properties)
            + self
                .subscriptions
                .iter()
                .map(|s| LENGTH_FIELD_SIZE + s.topic_filter.len() + mem::size_of::<u8>())
                .sum::<usize>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        write_properties(&self.properties, buf);
        for s in &self.subscriptions {
            buf.put_utf8_str(&s.topic_filter);
            let mut options = s.qos as u8;
            if s.no_local {
                options |= 0b0000_0100;
            }
            if s.retain_as_published {
                options |= 0b0000_1000;
            }
            options |= (s.retain_handling as u8) << 4;
            buf.put_u8(options);
        }
    }
}

impl WriteTo for SubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>() + properties_size(&self.properties) + self.status.len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        write_properties(&self.properties, buf);
        for status in &self.status {
            let byte = match status {
                SubscribeReturnCode::Success(qos) => *qos as u8,
                SubscribeReturnCode::Failure(reason) => *reason as u8,
            };
            buf.put_u8(byte);
        }
    }
}

impl WriteTo for Unsubscribe {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
            + properties_size(&self.properties)
            + self
                .topic_filters
                .iter()
                .map(|topic_filter| LENGTH_FIELD_SIZE + topic_filter.len())
                .sum::<usize>()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        write_properties(&self.properties, buf);
        for topic_filter in &self.topic_filters {
            buf.put_utf8_str(topic_filter);
        }
    }
}

impl WriteTo for UnsubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>() + properties_size(&self.properties) + self.status.len()
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        buf.put_u16(self.packet_id);
        write_properties(&self.properties, buf);
        for status in &self.status {
            buf.put_u8(*status as u8);
        }
    }
}

impl WriteTo for Disconnect {
    fn size(&self) -> usize {
        self.reason_code.map_or(0, |_| mem::size_of::<u8>()) + properties_size(&self.properties)
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        if let Some(reason_code) = self.reason_code {
            buf.put_u8(reason_code as u8)
        }
        write_properties(&self.properties, buf);
    }
}

impl WriteTo for Auth {
    fn size(&self) -> usize {
        self.reason_code.map_or(0, |_| mem::size_of::<u8>()) + properties_size(&self.properties)
    }

    fn write_to<T: BufMut>(&self, buf: &mut T) {
        if let Some(reason_code) = self.reason_code {
            buf.put_u8(reason_code as u8)
        }
        write_properties(&self.properties, buf);
    }
}

/// What [`PacketEncoder::service`] did with the bytes it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// The caller's buffer filled up before the whole packet was written; call `service` again
    /// with a fresh (or drained) buffer to continue.
    InProgress,
    /// The packet has been fully written; the encoder is idle again.
    Complete,
}

/// Encodes one packet at a time into caller-supplied buffers across as many `service` calls as
/// it takes to drain it, never writing past what the caller's buffer can currently hold.
///
/// The packet itself is rendered once, up front (via [`WriteTo`]), into an owned `Bytes`;
/// `service` then just drains that buffer using `bytes::Buf` cursor semantics.
#[derive(Debug, Default)]
pub struct PacketEncoder {
    pending: Option<Bytes>,
}

impl PacketEncoder {
    /// Creates an idle encoder.
    #[must_use]
    pub fn new() -> Self {
        PacketEncoder { pending: None }
    }

    /// Whether a packet is mid-flight (a prior `start` hasn't yet been fully drained).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Begins encoding `packet`. Fails without mutating encoder state if the encoded size would
    /// exceed `max_packet_size` (the locally configured cap, or the peer-advertised Maximum
    /// Packet Size property under MQTT 5).
    ///
    /// # Panics
    ///
    /// Panics if called while a previous packet is still being drained; callers must finish
    /// draining (poll `service` to [`EncodeOutcome::Complete`]) before starting the next one.
    pub fn start(&mut self, packet: &Packet, max_packet_size: usize) -> Result<(), EncodeError> {
        assert!(self.is_idle(), "PacketEncoder::start called while a packet is still in flight");

        let size = packet.size();
        if size > max_packet_size {
            return Err(EncodeError::PacketTooLarge {
                size,
                limit: max_packet_size,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        packet.write_to(&mut buf);
        self.pending = Some(buf.freeze());

        Ok(())
    }

    /// Writes as much of the in-flight packet as fits into `out`, advancing it.
    ///
    /// Returns [`EncodeOutcome::Complete`] once every byte has been written (including when no
    /// packet was in flight), or [`EncodeOutcome::InProgress`] if bytes remain for the next call.
    pub fn service(&mut self, out: &mut impl BufMut) -> EncodeOutcome {
        let mut bytes = match self.pending.take() {
            Some(bytes) => bytes,
            None => return EncodeOutcome::Complete,
        };

        let n = out.remaining_mut().min(bytes.remaining());
        out.put_slice(&bytes[..n]);
        bytes.advance(n);

        if bytes.has_remaining() {
            self.pending = Some(bytes);
            EncodeOutcome::InProgress
        } else {
            EncodeOutcome::Complete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_packet {
        ($packet:expr, $right:expr) => {
            assert_eq!($packet.size(), $right.len(), "assert packet size");

            let mut v = Vec::new();
            $packet.write_to(&mut v);
            assert_eq!(v, &$right[..], "assert packet content: {:#?}", $packet);
        };
    }

    #[test]
    fn test_connect() {
        assert_packet!(
            Packet::Connect(Connect {
                protocol_version: ProtocolVersion::V311,
                clean_start: false,
                keep_alive: 60,
                properties: None,
                client_id: "12345".to_owned(),
                last_will: None,
                username: Some("user".to_owned()),
                password: Some(Bytes::from_static(b"pass")),
            }),
            b"\x10\x1D\x00\x04MQTT\x04\xC0\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass"
        );

        assert_packet!(
            Packet::Disconnect(Disconnect {
                reason_code: None,
                properties: None
            }),
            b"\xe0\x00"
        );
    }

    #[test]
    fn test_publish() {
        assert_packet!(
            Packet::Publish(Publish {
                dup: true,
                retain: true,
                qos: QoS::ExactlyOnce,
                topic_name: "topic".to_owned(),
                packet_id: Some(0x4321),
                properties: None,
                payload: Bytes::from_static(b"data"),
            }),
            b"\x3d\x0D\x00\x05topic\x43\x21data"
        );

        assert_packet!(
            Packet::Publish(Publish {
                dup: false,
                retain: false,
                qos: QoS::AtMostOnce,
                topic_name: "topic".to_owned(),
                packet_id: None,
                properties: None,
                payload: Bytes::from_static(b"data"),
            }),
            b"\x30\x0b\x00\x05topicdata"
        );
    }

    #[test]
    fn test_subscribe_ack() {
        assert_packet!(
            Packet::SubscribeAck(SubscribeAck {
                packet_id: 0x1234,
                properties: None,
                status: vec![
                    SubscribeReturnCode::Success(QoS::AtLeastOnce),
                    SubscribeReturnCode::Failure(ReasonCode::UnspecifiedError),
                    SubscribeReturnCode::Success(QoS::ExactlyOnce),
                ],
            }),
            b"\x90\x05\x12\x34\x01\x80\x02"
        );
    }

    #[test]
    fn test_ping_pong() {
        assert_packet!(Packet::Pingreq, b"\xc0\x00");
        assert_packet!(Packet::Pingresp, b"\xd0\x00");
    }

    #[test]
    fn encoder_drains_across_short_buffers() {
        let packet = Packet::Publish(Publish {
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic_name: "topic".to_owned(),
            packet_id: None,
            properties: None,
            payload: Bytes::from_static(b"0123456789"),
        });

        let mut encoder = PacketEncoder::new();
        encoder.start(&packet, 1024).unwrap();

        let mut out = Vec::new();
        loop {
            let mut limited = bytes::buf::BufMutExt::limit(&mut out, 4);
            let outcome = encoder.service(&mut limited);
            if outcome == EncodeOutcome::Complete {
                break;
            }
        }

        let mut expected = Vec::new();
        packet.write_to(&mut expected);
        assert_eq!(out, expected);
        assert!(encoder.is_idle());
    }

    #[test]
    fn encoder_rejects_oversized_packets() {
        let packet = Packet::Publish(Publish {
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic_name: "topic".to_owned(),
            packet_id: None,
            properties: None,
            payload: Bytes::from_static(b"0123456789"),
        });

        let mut encoder = PacketEncoder::new();
        assert!(matches::matches!(
            encoder.start(&packet, 4),
            Err(EncodeError::PacketTooLarge { .. })
        ));
        assert!(encoder.is_idle());
    }
}
