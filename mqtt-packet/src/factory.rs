//! Protocol-version-bound codec handles.
//!
//! `FrameDecoder`/`PacketDecoder`/`PacketEncoder` already dispatch per packet type internally
//! (the compiler turns the `match` in `decode.rs`/`encode.rs` into a jump table, functionally
//! the same "fixed-size table indexed by packet type" the wire format calls for); what's left
//! for a factory to do is bind the protocol version once so call sites stop threading it through
//! every decode/encode call.

use crate::decode::PacketDecoder;
use crate::error::{DecodeError, EncodeError};
use crate::packet::{FixedHeader, Packet, ProtocolVersion};
use crate::encode::{EncodeOutcome, PacketEncoder, WriteTo};

/// A decoder/encoder pair bound to one negotiated protocol version.
#[derive(Debug)]
pub struct Codec {
    protocol_version: ProtocolVersion,
    decoder: PacketDecoder,
    encoder: PacketEncoder,
}

impl Codec {
    /// The protocol version this codec was bound to.
    #[must_use]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Decodes one already-assembled frame.
    pub fn decode(&self, header: &FixedHeader, payload: &[u8]) -> Result<Packet, DecodeError> {
        self.decoder.decode(header, payload, self.protocol_version)
    }

    /// Begins encoding `packet`; see [`PacketEncoder::start`].
    pub fn start_encoding(&mut self, packet: &Packet, max_packet_size: usize) -> Result<(), EncodeError> {
        self.encoder.start(packet, max_packet_size)
    }

    /// Drains bytes of the in-flight packet into `out`; see [`PacketEncoder::service`].
    pub fn service(&mut self, out: &mut impl bytes::BufMut) -> EncodeOutcome {
        self.encoder.service(out)
    }

    /// Whether the encoder half is idle (no packet mid-flight).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.encoder.is_idle()
    }

    /// The number of bytes `packet` would occupy on the wire under this codec's protocol
    /// version (fixed header included).
    #[must_use]
    pub fn encoded_size(&self, packet: &Packet) -> usize {
        packet.size()
    }
}

/// Produces a [`Codec`] bound to `protocol_version`.
#[must_use]
pub fn codec_for_version(protocol_version: ProtocolVersion) -> Codec {
    Codec {
        protocol_version,
        decoder: PacketDecoder::default(),
        encoder: PacketEncoder::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodeProgress, FrameDecoder};
    use bytes::Bytes;

    #[test]
    fn round_trips_a_packet_through_one_codec() {
        let packet = Packet::Disconnect(crate::packet::Disconnect {
            reason_code: None,
            properties: None,
        });

        let mut codec = codec_for_version(ProtocolVersion::V311);
        codec.start_encoding(&packet, 1024).unwrap();

        let mut encoded = Vec::new();
        while codec.service(&mut encoded) == EncodeOutcome::InProgress {}

        let mut frame_decoder = FrameDecoder::new(1024);
        let mut input: &[u8] = &encoded;
        let (header, payload) = match frame_decoder.poll(&mut input).unwrap() {
            DecodeProgress::Frame { header, payload } => (header, payload),
            DecodeProgress::Incomplete => panic!("expected a full frame"),
        };

        let decoded = codec.decode(&header, &payload).unwrap();
        assert_eq!(decoded, packet);
        let _: Bytes = payload;
    }
}
