//! The MQTT protocol works by exchanging a series of MQTT Control Packets in a defined way.
//!
//! This crate describes the wire format of those packets (3.1.1 and 5), an owned packet
//! model a long-lived protocol state machine can hold across a reconnect, and a streaming
//! encoder/decoder pair that move packets across a byte-oriented transport.
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

mod decode;
mod encode;
mod error;
mod factory;
mod packet;
mod props;
mod varint;

pub use crate::decode::{DecodeProgress, FrameDecoder, PacketDecoder};
pub use crate::encode::{EncodeOutcome, PacketEncoder, WriteTo};
pub use crate::error::{DecodeError, EncodeError};
pub use crate::factory::{codec_for_version, Codec};
pub use crate::packet::*;
pub use crate::props::{Property, PropertyId};
pub use crate::varint::{decode_varint, encode_varint, VarIntDecode, MAX_VARINT};
