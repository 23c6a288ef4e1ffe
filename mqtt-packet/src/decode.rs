//! Decoding: an incremental frame assembler (3-state machine, resumable across arbitrary byte
//! boundaries) layered over the per-packet-type field parsers, which run as `nom` combinators
//! against a single assembled buffer.

use core::convert::TryFrom;
use core::str;
use core::time::Duration;

use bytes::{Bytes, BytesMut};
use nom::{
    bytes::complete::tag,
    combinator::{all_consuming, cond, map, map_opt, map_res, opt, rest},
    error::{context, VerboseError},
    multi::{length_data, many0, many1},
    number::complete::{be_u16, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

use crate::error::DecodeError;
use crate::packet::*;
use crate::props::*;
use crate::varint::{decode_varint, VarIntDecode};

type NomError<'a> = VerboseError<&'a [u8]>;

/// Assembles raw bytes into complete `(FixedHeader, payload)` frames.
///
/// This is the only part of the codec that deals with fragmentation: a single `service` call may
/// see anywhere from zero bytes to many whole packets, and must resume cleanly the next call
/// picks up wherever the last one left off, including mid Variable Byte Integer.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    max_frame_size: usize,
}

#[derive(Debug)]
enum State {
    PendingFirstByte,
    PendingRemainingLength {
        packet_type_byte: u8,
        varint_bytes: Vec<u8>,
    },
    PendingPayload {
        header: FixedHeader,
        scratch: BytesMut,
    },
}

/// What `FrameDecoder::poll` produced after consuming as much of the input as it could use.
#[derive(Debug)]
pub enum DecodeProgress {
    /// No complete frame yet; call again once more bytes have arrived.
    Incomplete,
    /// A full frame was assembled.
    Frame {
        /// The decoded fixed header.
        header: FixedHeader,
        /// Exactly `header.remaining_length` bytes: the variable header and payload.
        payload: Bytes,
    },
}

impl FrameDecoder {
    /// Creates a decoder that rejects any frame whose Remaining Length would exceed
    /// `max_frame_size` bytes with [`DecodeError::PacketTooLarge`].
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        FrameDecoder {
            state: State::PendingFirstByte,
            max_frame_size,
        }
    }

    /// Consumes as many bytes from the front of `input` as form one complete frame, advancing
    /// `input` past what was consumed. Returns [`DecodeProgress::Incomplete`] if `input` was
    /// exhausted before a whole frame was available; call again with more bytes appended.
    ///
    /// Takes ownership of `self.state` on every iteration (`mem::replace` against a placeholder)
    /// rather than matching `&mut self.state` directly, so a state transition never has to
    /// happen while a borrow derived from the old variant is still alive.
    pub fn poll(&mut self, input: &mut &[u8]) -> Result<DecodeProgress, DecodeError> {
        loop {
            match std::mem::replace(&mut self.state, State::PendingFirstByte) {
                State::PendingFirstByte => {
                    if input.is_empty() {
                        return Ok(DecodeProgress::Incomplete);
                    }
                    let byte = input[0];
                    *input = &input[1..];
                    self.state = State::PendingRemainingLength {
                        packet_type_byte: byte,
                        varint_bytes: Vec::with_capacity(1),
                    };
                }
                State::PendingRemainingLength {
                    packet_type_byte,
                    mut varint_bytes,
                } => {
                    let mut done = None;

                    while !input.is_empty() && varint_bytes.len() < 4 {
                        varint_bytes.push(input[0]);
                        *input = &input[1..];

                        match decode_varint(&varint_bytes)? {
                            VarIntDecode::NeedsMoreData => continue,
                            VarIntDecode::Done { value, .. } => {
                                done = Some(value);
                                break;
                            }
                        }
                    }

                    match done {
                        Some(remaining_length) => {
                            if remaining_length > self.max_frame_size {
                                return Err(DecodeError::PacketTooLarge {
                                    declared: remaining_length,
                                    limit: self.max_frame_size,
                                });
                            }

                            let packet_type = Type::try_from((packet_type_byte >> 4) & 0x0F)
                                .map_err(|_| DecodeError::UnknownPacketType(packet_type_byte >> 4))?;
                            let header = FixedHeader {
                                packet_type,
                                packet_flags: packet_type_byte & 0x0F,
                                remaining_length,
                            };
                            self.state = State::PendingPayload {
                                header,
                                scratch: BytesMut::with_capacity(remaining_length),
                            };
                        }
                        None => {
                            self.state = State::PendingRemainingLength {
                                packet_type_byte,
                                varint_bytes,
                            };
                            return Ok(DecodeProgress::Incomplete);
                        }
                    }
                }
                State::PendingPayload { header, mut scratch } => {
                    let needed = header.remaining_length - scratch.len();
                    let take = needed.min(input.len());

                    if take > 0 {
                        scratch.extend_from_slice(&input[..take]);
                        *input = &input[take..];
                    }

                    if scratch.len() < header.remaining_length {
                        self.state = State::PendingPayload { header, scratch };
                        return Ok(DecodeProgress::Incomplete);
                    }

                    let payload = scratch.freeze();
                    self.state = State::PendingFirstByte;
                    return Ok(DecodeProgress::Frame { header, payload });
                }
            }
        }
    }
}

/// Turns an assembled `(FixedHeader, payload)` frame into a [`Packet`], dispatching on packet
/// type and protocol version. Fragmentation handling has already happened in [`FrameDecoder`];
/// this only ever sees a complete frame.
#[derive(Debug, Default)]
pub struct PacketDecoder;

impl PacketDecoder {
    /// Decodes one frame's payload into a [`Packet`].
    pub fn decode(
        &self,
        header: &FixedHeader,
        payload: &[u8],
        protocol_version: ProtocolVersion,
    ) -> Result<Packet, DecodeError> {
        let result: IResult<&[u8], Packet, NomError> = match header.packet_type {
            Type::Connect => context("Connect", all_consuming(map(connect, Packet::Connect)))(payload),
            Type::Connack => context(
                "ConnectAck",
                all_consuming(map(|i| connect_ack(i, protocol_version), Packet::ConnectAck)),
            )(payload),
            Type::Publish => {
                let flags = PublishFlags::from_bits(header.packet_flags).ok_or(
                    DecodeError::InvalidFixedHeaderFlags {
                        packet_type: header.packet_type,
                        flags: header.packet_flags,
                    },
                )?;
                context(
                    "Publish",
                    all_consuming(map(
                        |i| publish(i, protocol_version, flags),
                        Packet::Publish,
                    )),
                )(payload)
            }
            Type::Puback => context(
                "PublishAck",
                all_consuming(map(|i| publish_ack(i, protocol_version), Packet::PublishAck)),
            )(payload),
            Type::Pubrec => context(
                "PublishReceived",
                all_consuming(map(
                    |i| publish_received(i, protocol_version),
                    Packet::PublishReceived,
                )),
            )(payload),
            Type::Pubrel => context(
                "PublishRelease",
                all_consuming(map(
                    |i| publish_release(i, protocol_version),
                    Packet::PublishRelease,
                )),
            )(payload),
            Type::Pubcomp => context(
                "PublishComplete",
                all_consuming(map(
                    |i| publish_complete(i, protocol_version),
                    Packet::PublishComplete,
                )),
            )(payload),
            Type::Subscribe => context(
                "Subscribe",
                all_consuming(map(|i| subscribe(i, protocol_version), Packet::Subscribe)),
            )(payload),
            Type::Suback => context(
                "SubscribeAck",
                all_consuming(map(
                    |i| subscribe_ack(i, protocol_version),
                    Packet::SubscribeAck,
                )),
            )(payload),
            Type::Unsubscribe => context(
                "Unsubscribe",
                all_consuming(map(
                    |i| unsubscribe(i, protocol_version),
                    Packet::Unsubscribe,
                )),
            )(payload),
            Type::Unsuback => context(
                "UnsubscribeAck",
                all_consuming(map(
                    |i| unsubscribe_ack(i, protocol_version),
                    Packet::UnsubscribeAck,
                )),
            )(payload),
            Type::Pingreq => {
                if !payload.is_empty() {
                    return Err(DecodeError::PayloadLengthMismatch {
                        declared: header.remaining_length,
                        consumed: 0,
                    });
                }
                return Ok(Packet::Pingreq);
            }
            Type::Pingresp => {
                if !payload.is_empty() {
                    return Err(DecodeError::PayloadLengthMismatch {
                        declared: header.remaining_length,
                        consumed: 0,
                    });
                }
                return Ok(Packet::Pingresp);
            }
            Type::Disconnect => context(
                "Disconnect",
                all_consuming(map(|i| disconnect(i, protocol_version), Packet::Disconnect)),
            )(payload),
            Type::Auth => context("Auth", all_consuming(map(auth, Packet::Auth)))(payload),
        };

        result
            .map(|(_, packet)| packet)
            .map_err(|_| DecodeError::MalformedField(format!("{:?}", header.packet_type)))
    }
}

fn boolean<'a>(input: &'a [u8]) -> IResult<&'a [u8], bool, NomError<'a>> {
    context("bool", map(be_u8, |b| b != 0))(input)
}

fn binary_data<'a>(input: &'a [u8]) -> IResult<&'a [u8], Bytes, NomError<'a>> {
    context(
        "binary data",
        map(length_data(be_u16), |b: &[u8]| Bytes::copy_from_slice(b)),
    )(input)
}

fn utf8_str<'a>(input: &'a [u8]) -> IResult<&'a [u8], String, NomError<'a>> {
    context(
        "utf8 string",
        map_res(length_data(be_u16), |b: &[u8]| {
            str::from_utf8(b).map(str::to_owned)
        }),
    )(input)
}

fn utf8_str_pair<'a>(input: &'a [u8]) -> IResult<&'a [u8], (String, String), NomError<'a>> {
    context("utf8 pair", tuple((utf8_str, utf8_str)))(input)
}

fn interval<'a>(input: &'a [u8]) -> IResult<&'a [u8], Duration, NomError<'a>> {
    context("interval", map(be_u32, |secs| Duration::from_secs(u64::from(secs))))(input)
}

fn expiry<'a>(input: &'a [u8]) -> IResult<&'a [u8], Expiry, NomError<'a>> {
    context("expiry", map(be_u32, Expiry::from))(input)
}

fn varint_raw<'a>(input: &'a [u8]) -> IResult<&'a [u8], usize, NomError<'a>> {
    for len in 1..=4.min(input.len()) {
        if let Ok(VarIntDecode::Done { value, consumed }) = decode_varint(&input[..len]) {
            if consumed == len {
                return Ok((&input[len..], value));
            }
        }
    }
    Err(nom::Err::Incomplete(nom::Needed::Unknown))
}

const CLIENT_ID_MIN_LEN: usize = 1;
const CLIENT_ID_MAX_LEN: usize = 23;
const CLIENT_ID_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// The Server MUST allow ClientIds which are between 1 and 23 UTF-8 encoded bytes in length, and
/// that contain only the characters [MQTT-3.1.3-5]. We also accept longer/richer ids (common
/// server-side extension both MQTT 3.1.1 and 5 brokers support) but still require the charset.
fn client_id<'a>(input: &'a [u8]) -> IResult<&'a [u8], String, NomError<'a>> {
    context(
        "client id",
        map_res(utf8_str, |s: String| -> Result<String, ()> {
            if s.is_empty() || (CLIENT_ID_MIN_LEN <= s.len() && s.bytes().all(|b| CLIENT_ID_CHARS.contains(&b)))
            {
                Ok(s)
            } else if s.len() > CLIENT_ID_MAX_LEN {
                Ok(s)
            } else {
                Err(())
            }
        }),
    )(input)
}

fn topic_name<'a>(input: &'a [u8]) -> IResult<&'a [u8], String, NomError<'a>> {
    context(
        "topic name",
        map_res(utf8_str, |s: String| -> Result<String, ()> {
            if s.bytes().all(|c| c != b'#' && c != b'+') {
                Ok(s)
            } else {
                Err(())
            }
        }),
    )(input)
}

fn topic_filter<'a>(input: &'a [u8]) -> IResult<&'a [u8], String, NomError<'a>> {
    context("topic filter", utf8_str)(input)
}

bitflags! {
    struct SubscriptionOptions: u8 {
        const QOS = 0b0000_0011;
        const NL = 0b0000_0100;
        const RAP = 0b0000_1000;
        const RETAIN_HANDLING = 0b0011_0000;
    }
}

const RETAIN_HANDLING_SHIFT: u8 = 4;

fn subscription<'a>(input: &'a [u8]) -> IResult<&'a [u8], Subscription, NomError<'a>> {
    context(
        "subscription",
        map_res(
            tuple((topic_filter, map_opt(be_u8, SubscriptionOptions::from_bits))),
            |(topic_filter, options)| -> Result<Subscription, ()> {
                Ok(Subscription {
                    topic_filter,
                    qos: QoS::try_from((options & SubscriptionOptions::QOS).bits()).map_err(|_| ())?,
                    no_local: options.contains(SubscriptionOptions::NL),
                    retain_as_published: options.contains(SubscriptionOptions::RAP),
                    retain_handling: RetainHandling::try_from(
                        (options & SubscriptionOptions::RETAIN_HANDLING).bits() >> RETAIN_HANDLING_SHIFT,
                    )
                    .map_err(|_| ())?,
                })
            },
        ),
    )(input)
}

fn packet_id<'a>(input: &'a [u8]) -> IResult<&'a [u8], PacketId, NomError<'a>> {
    context(
        "packet id",
        map_res(be_u16, |id| if id == 0 { Err(()) } else { Ok(id) }),
    )(input)
}

fn reason_code<'a>(input: &'a [u8]) -> IResult<&'a [u8], ReasonCode, NomError<'a>> {
    context("reason code", map_res(be_u8, ReasonCode::try_from))(input)
}

fn properties<'a>(input: &'a [u8]) -> IResult<&'a [u8], Vec<Property>, NomError<'a>> {
    let (input, block) = length_data(varint_raw)(input)?;
    let (_, props) = all_consuming(many0(property))(block)?;
    Ok((input, props))
}

fn property<'a>(input: &'a [u8]) -> IResult<&'a [u8], Property, NomError<'a>> {
    let (input, prop_id) = map_res(varint_raw, |n| PropertyId::try_from(n as u8))(input)?;

    match prop_id {
        PropertyId::PayloadFormat => map(map_res(be_u8, PayloadFormat::try_from), Property::PayloadFormat)(input),
        PropertyId::MessageExpiryInterval => map(interval, Property::MessageExpiryInterval)(input),
        PropertyId::ContentType => map(utf8_str, Property::ContentType)(input),
        PropertyId::ResponseTopic => map(utf8_str, Property::ResponseTopic)(input),
        PropertyId::CorrelationData => map(binary_data, Property::CorrelationData)(input),
        PropertyId::SubscriptionId => map(varint_raw, |n| Property::SubscriptionId(n as u32))(input),
        PropertyId::SessionExpiryInterval => map(expiry, Property::SessionExpiryInterval)(input),
        PropertyId::AssignedClientId => map(utf8_str, Property::AssignedClientId)(input),
        PropertyId::ServerKeepAlive => map(be_u16, Property::ServerKeepAlive)(input),
        PropertyId::AuthMethod => map(utf8_str, Property::AuthMethod)(input),
        PropertyId::AuthData => map(binary_data, Property::AuthData)(input),
        PropertyId::RequestProblemInformation => map(boolean, Property::RequestProblemInformation)(input),
        PropertyId::WillDelayInterval => map(interval, Property::WillDelayInterval)(input),
        PropertyId::RequestResponseInformation => map(boolean, Property::RequestResponseInformation)(input),
        PropertyId::ResponseInformation => map(utf8_str, Property::ResponseInformation)(input),
        PropertyId::ServerReference => map(utf8_str, Property::ServerReference)(input),
        PropertyId::Reason => map(utf8_str, Property::Reason)(input),
        PropertyId::ReceiveMaximum => map(be_u16, Property::ReceiveMaximum)(input),
        PropertyId::TopicAliasMaximum => map(be_u16, Property::TopicAliasMaximum)(input),
        PropertyId::TopicAlias => map(be_u16, Property::TopicAlias)(input),
        PropertyId::MaximumQoS => map(map_res(be_u8, QoS::try_from), Property::MaximumQoS)(input),
        PropertyId::RetainAvailable => map(boolean, Property::RetainAvailable)(input),
        PropertyId::UserProperty => map(utf8_str_pair, |(name, value)| Property::UserProperty(name, value))(input),
        PropertyId::MaximumPacketSize => map(be_u32, Property::MaximumPacketSize)(input),
        PropertyId::WildcardSubscriptionAvailable => map(boolean, Property::WildcardSubscriptionAvailable)(input),
        PropertyId::SubscriptionIdAvailable => map(boolean, Property::SubscriptionIdAvailable)(input),
        PropertyId::SharedSubscriptionAvailable => map(boolean, Property::SharedSubscriptionAvailable)(input),
    }
}

fn connect<'a>(input: &'a [u8]) -> IResult<&'a [u8], Connect, NomError<'a>> {
    let (input, (_, protocol_version, flags, keep_alive)) = tuple((
        context("protocol name", tag(PROTOCOL_NAME)),
        context("protocol version", map_res(be_u8, ProtocolVersion::try_from)),
        context("flags", map_opt(be_u8, ConnectFlags::from_bits)),
        context("keepalive", be_u16),
    ))(input)?;

    let (input, (properties, client_id, last_will, username, password)) = tuple((
        cond(protocol_version >= ProtocolVersion::V5, properties),
        client_id,
        cond(
            flags.contains(ConnectFlags::LAST_WILL),
            context(
                "will",
                map(
                    tuple((
                        cond(protocol_version >= ProtocolVersion::V5, context("will properties", properties)),
                        context("will topic", utf8_str),
                        context("will message", binary_data),
                    )),
                    |(properties, topic_name, message)| LastWill {
                        qos: flags.will_qos(),
                        retain: flags.contains(ConnectFlags::WILL_RETAIN),
                        topic_name,
                        message,
                        properties,
                    },
                ),
            ),
        ),
        cond(flags.contains(ConnectFlags::USERNAME), context("username", utf8_str)),
        cond(flags.contains(ConnectFlags::PASSWORD), context("password", binary_data)),
    ))(input)?;

    Ok((
        input,
        Connect {
            protocol_version,
            clean_start: flags.contains(ConnectFlags::CLEAN_START),
            keep_alive,
            properties,
            client_id,
            last_will,
            username,
            password,
        },
    ))
}

fn connect_ack<'a>(input: &'a [u8], protocol_version: ProtocolVersion) -> IResult<&'a [u8], ConnectAck, NomError<'a>> {
    map(
        tuple((
            context("flags", map_opt(be_u8, ConnectAckFlags::from_bits)),
            context("reason code", reason_code_for(protocol_version)),
            cond(protocol_version >= ProtocolVersion::V5, properties),
        )),
        |(flags, reason_code, properties)| ConnectAck {
            session_present: flags.contains(ConnectAckFlags::SESSION_PRESENT),
            reason_code,
            properties,
        },
    )(input)
}

/// MQTT 3.1.1's Connect Return Code is a 6-value subset folded onto the same [`ReasonCode`]
/// space every other ack uses, so a 3.1.1 byte outside 0..=5 is simply malformed.
fn reason_code_for<'a>(
    protocol_version: ProtocolVersion,
) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], ReasonCode, NomError<'a>> {
    move |input| {
        if protocol_version >= ProtocolVersion::V5 {
            reason_code(input)
        } else {
            map_res(be_u8, |b| match b {
                0 => Ok(ReasonCode::Success),
                1 => Ok(ReasonCode::UnsupportedProtocolVersion),
                2 => Ok(ReasonCode::ClientIdNotValid),
                3 => Ok(ReasonCode::ServerUnavailable),
                4 => Ok(ReasonCode::BadUserNameOrPassword),
                5 => Ok(ReasonCode::NotAuthorized),
                _ => Err(()),
            })(input)
        }
    }
}

/// MQTT 5 lets a Puback/Pubrec/Pubrel/Pubcomp/Disconnect omit the reason byte (and properties)
/// entirely when there is nothing but success to report; MQTT 3.1.1 never carries one.
fn v5_reason_code<'a>(
    protocol_version: ProtocolVersion,
) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], Option<ReasonCode>, NomError<'a>> {
    move |input| {
        if protocol_version >= ProtocolVersion::V5 {
            opt(reason_code)(input)
        } else {
            Ok((input, None))
        }
    }
}

fn publish<'a>(
    input: &'a [u8],
    protocol_version: ProtocolVersion,
    flags: PublishFlags,
) -> IResult<&'a [u8], Publish, NomError<'a>> {
    let dup = flags.contains(PublishFlags::DUP);
    let qos = flags.qos();
    let retain = flags.contains(PublishFlags::RETAIN);
    let (input, (topic_name, packet_id, properties, payload)) = tuple((
        topic_name,
        cond(qos >= QoS::AtLeastOnce, packet_id),
        cond(protocol_version >= ProtocolVersion::V5, properties),
        map(rest, Bytes::copy_from_slice),
    ))(input)?;

    Ok((
        input,
        Publish {
            dup,
            qos,
            retain,
            topic_name,
            packet_id,
            properties,
            payload,
        },
    ))
}

fn publish_ack<'a>(input: &'a [u8], protocol_version: ProtocolVersion) -> IResult<&'a [u8], PublishAck, NomError<'a>> {
    map(
        tuple((
            packet_id,
            v5_reason_code(protocol_version),
            cond(protocol_version >= ProtocolVersion::V5, properties),
        )),
        |(packet_id, reason_code, properties)| PublishAck {
            packet_id,
            reason_code,
            properties,
        },
    )(input)
}

fn publish_received<'a>(
    input: &'a [u8],
    protocol_version: ProtocolVersion,
) -> IResult<&'a [u8], PublishReceived, NomError<'a>> {
    map(
        tuple((
            packet_id,
            v5_reason_code(protocol_version),
            cond(protocol_version >= ProtocolVersion::V5, properties),
        )),
        |(packet_id, reason_code, properties)| PublishReceived {
            packet_id,
            reason_code,
            properties,
        },
    )(input)
}

fn publish_release<'a>(
    input: &'a [u8],
    protocol_version: ProtocolVersion,
) -> IResult<&'a [u8], PublishRelease, NomError<'a>> {
    map(
        tuple((
            packet_id,
            v5_reason_code(protocol_version),
            cond(protocol_version >= ProtocolVersion::V5, properties),
        )),
        |(packet_id, reason_code, properties)| PublishRelease {
            packet_id,
            reason_code,
            properties,
        },
    )(input)
}

fn publish_complete<'a>(
    input: &'a [u8],
    protocol_version: ProtocolVersion,
) -> IResult<&'a [u8], PublishComplete, NomError<'a>> {
    map(
        tuple((
            packet_id,
            v5_reason_code(protocol_version),
            cond(protocol_version >= ProtocolVersion::V5, properties),
        )),
        |(packet_id, reason_code, properties)| PublishComplete {
            packet_id,
            reason_code,
            properties,
        },
    )(input)
}

fn subscribe<'a>(input: &'a [u8], protocol_version: ProtocolVersion) -> IResult<&'a [u8], Subscribe, NomError<'a>> {
    map(
        tuple((
            packet_id,
            cond(protocol_version >= ProtocolVersion::V5, properties),
            many1(subscription),
        )),
        |(packet_id, properties, subscriptions)| Subscribe {
            packet_id,
            properties,
            subscriptions,
        },
    )(input)
}

fn subscribe_ack<'a>(
    input: &'a [u8],
    protocol_version: ProtocolVersion,
) -> IResult<&'a [u8], SubscribeAck, NomError<'a>> {
    map(
        tuple((
            packet_id,
            cond(protocol_version >= ProtocolVersion::V5, properties),
            many1(context(
                "return code",
                map_res(be_u8, |b| -> Result<SubscribeReturnCode, ()> {
                    if (b & SubscribeReturnCode::FAILURE_BYTE) == 0 {
                        Ok(SubscribeReturnCode::Success(QoS::try_from(b).map_err(|_| ())?))
                    } else {
                        Ok(SubscribeReturnCode::Failure(ReasonCode::try_from(b).unwrap_or(ReasonCode::UnspecifiedError)))
                    }
                }),
            )),
        )),
        |(packet_id, properties, status)| SubscribeAck {
            packet_id,
            properties,
            status,
        },
    )(input)
}

fn unsubscribe<'a>(
    input: &'a [u8],
    protocol_version: ProtocolVersion,
) -> IResult<&'a [u8], Unsubscribe, NomError<'a>> {
    map(
        tuple((
            packet_id,
            cond(protocol_version >= ProtocolVersion::V5, properties),
            many1(topic_filter),
        )),
        |(packet_id, properties, topic_filters)| Unsubscribe {
            packet_id,
            properties,
            topic_filters,
        },
    )(input)
}

fn unsubscribe_ack<'a>(
    input: &'a [u8],
    protocol_version: ProtocolVersion,
) -> IResult<&'a [u8], UnsubscribeAck, NomError<'a>> {
    map(
        tuple((
            packet_id,
            cond(protocol_version >= ProtocolVersion::V5, properties),
            // MQTT 3.1.1's Unsuback carries no reason bytes at all; synthesize an empty status
            // vector rather than guessing at the per-filter outcome (Open Question, resolved).
            cond(protocol_version >= ProtocolVersion::V5, many0(reason_code)),
        )),
        |(packet_id, properties, status)| UnsubscribeAck {
            packet_id,
            properties,
            status: status.unwrap_or_default(),
        },
    )(input)
}

fn disconnect<'a>(input: &'a [u8], protocol_version: ProtocolVersion) -> IResult<&'a [u8], Disconnect, NomError<'a>> {
    map(
        tuple((
            v5_reason_code(protocol_version),
            cond(protocol_version >= ProtocolVersion::V5, properties),
        )),
        |(reason_code, properties)| Disconnect {
            reason_code,
            properties,
        },
    )(input)
}

fn auth<'a>(input: &'a [u8]) -> IResult<&'a [u8], Auth, NomError<'a>> {
    map(tuple((opt(reason_code), opt(properties))), |(reason_code, properties)| Auth {
        reason_code,
        properties,
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8], protocol_version: ProtocolVersion) -> Packet {
        let mut decoder = FrameDecoder::new(1024 * 1024);
        let mut input = bytes;
        match decoder.poll(&mut input).unwrap() {
            DecodeProgress::Frame { header, payload } => {
                PacketDecoder::default().decode(&header, &payload, protocol_version).unwrap()
            }
            DecodeProgress::Incomplete => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn decodes_connect_v311() {
        let packet = decode_one(
            b"\x10\x19\x00\x04MQTT\x04\xC0\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass",
            ProtocolVersion::V311,
        );

        match packet {
            Packet::Connect(c) => {
                assert_eq!(c.protocol_version, ProtocolVersion::V311);
                assert!(!c.clean_start);
                assert_eq!(c.keep_alive, 60);
                assert_eq!(c.client_id, "12345");
                assert_eq!(c.username.as_deref(), Some("user"));
                assert_eq!(c.password.as_deref(), Some(&b"pass"[..]));
            }
            _ => panic!("wrong packet type"),
        }
    }

    #[test]
    fn decodes_publish_with_qos1_packet_id() {
        let packet = decode_one(b"\x32\x0c\x00\x05topic\x12\x34hello", ProtocolVersion::V311);

        match packet {
            Packet::Publish(p) => {
                assert_eq!(p.qos, QoS::AtLeastOnce);
                assert_eq!(p.topic_name, "topic");
                assert_eq!(p.packet_id, Some(0x1234));
                assert_eq!(&p.payload[..], b"hello");
            }
            _ => panic!("wrong packet type"),
        }
    }

    #[test]
    fn decodes_pingreq() {
        assert!(matches::matches!(decode_one(b"\xc0\x00", ProtocolVersion::V311), Packet::Pingreq));
    }

    #[test]
    fn frame_decoder_resumes_across_arbitrary_splits() {
        let bytes: &[u8] = b"\x32\x0c\x00\x05topic\x12\x34hello";
        let mut decoder = FrameDecoder::new(1024);

        for split in 1..bytes.len() {
            let mut fresh = FrameDecoder::new(1024);
            let (first, second) = bytes.split_at(split);
            let mut cursor = first;
            assert!(matches::matches!(fresh.poll(&mut cursor).unwrap(), DecodeProgress::Incomplete));
            let mut cursor = second;
            assert!(matches::matches!(fresh.poll(&mut cursor).unwrap(), DecodeProgress::Frame { .. }));
        }

        let mut cursor = bytes;
        assert!(matches::matches!(decoder.poll(&mut cursor).unwrap(), DecodeProgress::Frame { .. }));
    }

    #[test]
    fn frame_decoder_rejects_oversized_packets() {
        let mut decoder = FrameDecoder::new(4);
        let mut input: &[u8] = b"\x30\x80\x01"; // remaining length 128 > max 4
        assert!(matches::matches!(
            decoder.poll(&mut input),
            Err(DecodeError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn frame_decoder_rejects_unknown_packet_type() {
        let mut decoder = FrameDecoder::new(1024);
        let mut input: &[u8] = b"\x00\x00"; // packet type nibble 0 is reserved/unused
        assert!(matches::matches!(decoder.poll(&mut input), Err(DecodeError::UnknownPacketType(0))));
    }
}
