//! The Variable Byte Integer (VLI) encoding MQTT uses for the Remaining Length field and for
//! every property-length prefix in MQTT 5: each byte carries 7 data bits, with the high bit
//! set on every byte but the last.

use crate::error::DecodeError;

/// Largest value a 4-byte Variable Byte Integer can represent.
pub const MAX_VARINT: usize = 268_435_455;

const CONTINUATION_BIT: u8 = 0x80;

/// Encodes `value` as 1-4 bytes, appending them to `out`.
///
/// # Panics
///
/// Panics if `value` exceeds [`MAX_VARINT`]; callers validate packet size before encoding.
pub fn encode_varint(mut value: usize, out: &mut Vec<u8>) {
    assert!(value <= MAX_VARINT, "varint {} out of range", value);

    loop {
        let mut byte = (value % 0x80) as u8;
        value /= 0x80;

        if value > 0 {
            byte |= CONTINUATION_BIT;
        }

        out.push(byte);

        if value == 0 {
            break;
        }
    }
}

/// Number of bytes `encode_varint` would emit for `value`.
#[must_use]
pub const fn encoded_len(value: usize) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Outcome of feeding one more byte to the incremental VLI decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntDecode {
    /// The continuation bit was set; more bytes are needed.
    NeedsMoreData,
    /// The integer is complete. Carries the decoded value and the number of bytes consumed.
    Done {
        /// Decoded value.
        value: usize,
        /// Number of input bytes that made up the encoding.
        consumed: usize,
    },
}

/// Decodes a Variable Byte Integer from the front of `input`.
///
/// Returns [`VarIntDecode::NeedsMoreData`] if `input` ends mid-continuation (at most 3 bytes
/// with the high bit set and nothing after). Fails with [`DecodeError::VliOverflow`] on a 5th
/// continuation byte.
pub fn decode_varint(input: &[u8]) -> Result<VarIntDecode, DecodeError> {
    let mut value: usize = 0;

    for (i, &byte) in input.iter().enumerate() {
        if i == 4 {
            return Err(DecodeError::VliOverflow);
        }

        value += usize::from(byte & !CONTINUATION_BIT) << (7 * i);

        if byte & CONTINUATION_BIT == 0 {
            return Ok(VarIntDecode::Done {
                value,
                consumed: i + 1,
            });
        }
    }

    if input.len() >= 4 {
        // a 4th byte with the continuation bit still set can never be followed by a legal 5th
        Err(DecodeError::VliOverflow)
    } else {
        Ok(VarIntDecode::NeedsMoreData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: usize) {
        let mut buf = Vec::new();
        encode_varint(value, &mut buf);
        assert_eq!(buf.len(), encoded_len(value));

        match decode_varint(&buf).unwrap() {
            VarIntDecode::Done { value: got, consumed } => {
                assert_eq!(got, value);
                assert_eq!(consumed, buf.len());
            }
            VarIntDecode::NeedsMoreData => panic!("decode of a complete buffer should not need more data"),
        }
    }

    #[test]
    fn round_trips_boundary_values() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, MAX_VARINT] {
            round_trip(value);
        }
    }

    #[test]
    fn needs_more_data_mid_continuation() {
        let mut buf = Vec::new();
        encode_varint(300, &mut buf);

        assert_eq!(decode_varint(&buf[..1]).unwrap(), VarIntDecode::NeedsMoreData);
    }

    #[test]
    fn resumable_across_arbitrary_splits() {
        let mut buf = Vec::new();
        encode_varint(2_097_151, &mut buf);

        for split in 1..buf.len() {
            assert_eq!(decode_varint(&buf[..split]).unwrap(), VarIntDecode::NeedsMoreData);
        }
        assert!(matches!(decode_varint(&buf).unwrap(), VarIntDecode::Done { .. }));
    }

    #[test]
    fn fifth_continuation_byte_overflows() {
        let garbage = [0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(matches!(decode_varint(&garbage), Err(DecodeError::VliOverflow)));
    }

    #[test]
    fn four_continuation_bytes_with_no_terminator_overflows() {
        let garbage = [0x80, 0x80, 0x80, 0x80];
        assert!(matches!(decode_varint(&garbage), Err(DecodeError::VliOverflow)));
    }
}
