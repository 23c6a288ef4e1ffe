//! Error taxonomy for the wire-format layer.
//!
//! Every variant here is protocol-fatal: the decoder and encoder never produce a recoverable
//! per-operation error, they either succeed or the frame (and therefore the connection) is done.

use crate::packet::Type;

/// Failure to decode a byte stream into a packet.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum DecodeError {
    /// A 5th Variable Byte Integer continuation byte was seen.
    #[error("variable-length integer exceeds 4 bytes")]
    VliOverflow,

    /// The high nibble of the fixed header did not match a known packet type.
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),

    /// The low nibble of the fixed header carried flags that are illegal for this packet type.
    #[error("invalid fixed header flags {flags:#x} for {packet_type:?}")]
    InvalidFixedHeaderFlags {
        /// The packet type the flags were read for.
        packet_type: Type,
        /// The offending flag nibble.
        flags: u8,
    },

    /// The declared Remaining Length (or property length) would make the frame larger than the
    /// configured maximum packet size.
    #[error("packet of {declared} bytes exceeds the configured maximum of {limit}")]
    PacketTooLarge {
        /// Bytes the frame declared it would need.
        declared: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// A UTF-8 string field contained invalid UTF-8.
    #[error("malformed UTF-8 string field")]
    InvalidUtf8,

    /// A length-prefixed field declared more bytes than remained in the packet.
    #[error("field length {declared} exceeds {available} remaining bytes")]
    FieldTooLong {
        /// Declared length.
        declared: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// An MQTT 5 property code was not recognized.
    #[error("unknown property identifier {0:#x}")]
    UnknownPropertyId(u8),

    /// The declared property block length did not match the bytes actually consumed decoding it.
    #[error("property block declared {declared} bytes but {consumed} were consumed")]
    PropertyLengthMismatch {
        /// Declared length.
        declared: usize,
        /// Bytes actually consumed.
        consumed: usize,
    },

    /// A packet that must carry a non-zero packet id carried 0.
    #[error("packet id 0 is not valid")]
    InvalidPacketId,

    /// The Remaining Length did not match the bytes actually consumed by the per-type decoder.
    #[error("declared remaining length {declared} but payload decode consumed {consumed}")]
    PayloadLengthMismatch {
        /// Declared remaining length.
        declared: usize,
        /// Bytes actually consumed.
        consumed: usize,
    },

    /// A field held a value outside its legal range (bad QoS, bad reason code, ...).
    #[error("malformed field: {0}")]
    MalformedField(String),
}

/// Failure to encode a packet into bytes.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum EncodeError {
    /// The encoded packet would exceed the server-declared (or locally configured) maximum
    /// packet size.
    #[error("outbound packet validation failed: {size} bytes exceeds maximum {limit}")]
    PacketTooLarge {
        /// Size the packet would occupy on the wire.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// A field value cannot be represented on the wire (string too long, payload too long, ...).
    #[error("outbound packet validation failed: {0}")]
    InvalidField(String),
}
