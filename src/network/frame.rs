use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::service::{BrokerError, BrokerResult};

/// Largest value the four-byte remaining-length encoding can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// The encoding stops after four length bytes; a fifth continuation is malformed.
const MAX_LENGTH_BYTES: usize = 4;

/// One complete wire frame: a type/flags byte, the decoded remaining length,
/// and the payload that followed the header.
///
/// The high nibble of `header` is the packet type; the low nibble carries
/// per-type flags and is opaque at this layer.
#[derive(Debug)]
pub struct Frame {
    pub header: u8,
    pub remaining_length: usize,
    pub payload: BytesMut,
}

impl Frame {
    pub fn type_nibble(&self) -> u8 {
        self.header >> 4
    }

    pub fn flags(&self) -> u8 {
        self.header & 0x0F
    }

    /// Checks whether `buffer` starts with a complete frame. Returns the
    /// header length (type byte plus length bytes) and the remaining length,
    /// or `Incomplete` if more reads are needed.
    fn check(buffer: &BytesMut, max_frame_size: usize) -> BrokerResult<(usize, usize)> {
        if buffer.len() < 2 {
            return Err(BrokerError::Incomplete);
        }
        let (remaining_length, length_bytes) = decode_remaining_length(&buffer[1..])?;
        let frame_size = 1 + length_bytes + remaining_length;
        if frame_size > max_frame_size {
            return Err(BrokerError::MalformedFrame(format!(
                "declared frame of {} bytes exceeds the {} byte limit",
                frame_size, max_frame_size
            )));
        }
        if buffer.len() < frame_size {
            return Err(BrokerError::Incomplete);
        }
        Ok((1 + length_bytes, remaining_length))
    }

    /// Extracts one frame from the front of `buffer`, leaving any residual
    /// bytes in place for the next attempt.
    ///
    /// Returns `Ok(None)` while the buffered bytes are still short of a full
    /// frame. A malformed length encoding or an over-limit frame is an error
    /// and the connection should be closed.
    pub fn parse(buffer: &mut BytesMut, max_frame_size: usize) -> BrokerResult<Option<Frame>> {
        match Frame::check(buffer, max_frame_size) {
            Ok((header_len, remaining_length)) => {
                let header = buffer[0];
                buffer.advance(header_len);
                let payload = buffer.split_to(remaining_length);
                Ok(Some(Frame {
                    header,
                    remaining_length,
                    payload,
                }))
            }
            Err(BrokerError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Decodes a base-128 remaining length from `buf`. Each byte contributes its
/// low seven bits, least significant group first; the top bit marks a
/// continuation. Returns the value and the number of bytes consumed.
pub fn decode_remaining_length(buf: &[u8]) -> BrokerResult<(usize, usize)> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (index, &byte) in buf.iter().take(MAX_LENGTH_BYTES).enumerate() {
        value += (byte as usize & 0x7F) * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            return Ok((value, index + 1));
        }
    }
    if buf.len() < MAX_LENGTH_BYTES {
        // continuation bit set on every byte seen so far
        Err(BrokerError::Incomplete)
    } else {
        Err(BrokerError::MalformedFrame(
            "remaining length runs past four bytes".to_string(),
        ))
    }
}

/// Appends the base-128 encoding of `value` to `buffer`.
pub fn encode_remaining_length(mut value: usize, buffer: &mut BytesMut) -> BrokerResult<()> {
    if value > MAX_REMAINING_LENGTH {
        return Err(BrokerError::InvalidValue(format!(
            "remaining length {} does not fit in four bytes",
            value
        )));
    }
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buffer.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Builds a complete outbound frame from a header byte and payload.
pub fn encode_frame(header: u8, payload: &[u8]) -> BrokerResult<Bytes> {
    let mut buffer = BytesMut::with_capacity(1 + MAX_LENGTH_BYTES + payload.len());
    buffer.put_u8(header);
    encode_remaining_length(payload.len(), &mut buffer)?;
    buffer.put_slice(payload);
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse_all(buffer: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = Frame::parse(buffer, 1 << 20).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[rstest]
    #[case(0, &[0x00])]
    #[case(1, &[0x01])]
    #[case(127, &[0x7F])]
    #[case(128, &[0x80, 0x01])]
    #[case(16_383, &[0xFF, 0x7F])]
    #[case(16_384, &[0x80, 0x80, 0x01])]
    #[case(2_097_151, &[0xFF, 0xFF, 0x7F])]
    #[case(2_097_152, &[0x80, 0x80, 0x80, 0x01])]
    #[case(MAX_REMAINING_LENGTH, &[0xFF, 0xFF, 0xFF, 0x7F])]
    fn test_remaining_length_boundaries(#[case] value: usize, #[case] encoded: &[u8]) {
        let mut buffer = BytesMut::new();
        encode_remaining_length(value, &mut buffer).unwrap();
        assert_eq!(&buffer[..], encoded);

        let (decoded, consumed) = decode_remaining_length(encoded).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_remaining_length_rejects_fifth_byte() {
        let result = decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(result, Err(BrokerError::MalformedFrame(_))));
    }

    #[test]
    fn test_remaining_length_over_limit_value() {
        let mut buffer = BytesMut::new();
        let result = encode_remaining_length(MAX_REMAINING_LENGTH + 1, &mut buffer);
        assert!(matches!(result, Err(BrokerError::InvalidValue(_))));
    }

    #[test]
    fn test_truncated_length_is_incomplete() {
        // continuation bit set, stream ends: wait for more bytes
        assert!(matches!(
            decode_remaining_length(&[0x80]),
            Err(BrokerError::Incomplete)
        ));
        assert!(matches!(
            decode_remaining_length(&[0x80, 0x80, 0x80]),
            Err(BrokerError::Incomplete)
        ));
    }

    #[test]
    fn test_header_only_frame_completes_at_two_bytes() {
        let mut buffer = BytesMut::from(&[0x10u8, 0x00][..]);
        let frame = Frame::parse(&mut buffer, 4096).unwrap().unwrap();
        assert_eq!(frame.header, 0x10);
        assert_eq!(frame.type_nibble(), 1);
        assert_eq!(frame.remaining_length, 0);
        assert!(frame.payload.is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_incomplete_frames_leave_buffer_untouched() {
        let mut buffer = BytesMut::new();
        assert!(Frame::parse(&mut buffer, 4096).unwrap().is_none());

        buffer.put_u8(0x30);
        assert!(Frame::parse(&mut buffer, 4096).unwrap().is_none());

        // declared 5-byte payload, only 2 buffered
        buffer.put_u8(0x05);
        buffer.put_slice(&[0xAA, 0xBB]);
        assert!(Frame::parse(&mut buffer, 4096).unwrap().is_none());
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_residual_bytes_stay_buffered() {
        let mut buffer = BytesMut::new();
        buffer.put_slice(&[0x30, 0x02, 0x01, 0x02]);
        buffer.put_slice(&[0xC0, 0x00]);
        buffer.put_slice(&[0x30, 0x01]); // truncated third frame

        let frames = parse_all(&mut buffer);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].type_nibble(), 3);
        assert_eq!(&frames[0].payload[..], &[0x01, 0x02]);
        assert_eq!(frames[1].type_nibble(), 12);
        assert_eq!(buffer.len(), 2);

        // the tail arrives and the third frame completes
        buffer.put_u8(0x7E);
        let frames = parse_all(&mut buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], &[0x7E]);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut buffer = BytesMut::new();
        buffer.put_u8(0x30);
        encode_remaining_length(5000, &mut buffer).unwrap();
        let result = Frame::parse(&mut buffer, 4096);
        assert!(matches!(result, Err(BrokerError::MalformedFrame(_))));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(7)]
    #[case(64)]
    fn test_split_invariance(#[case] chunk_size: usize) {
        // one byte stream, delivered in arbitrary fragments, must yield the
        // same frame sequence as a single delivery
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x10, 0x00]);
        stream.extend_from_slice(&encode_frame(0x20, &[0x55; 127]).unwrap());
        stream.extend_from_slice(&encode_frame(0x20, &[0x66; 128]).unwrap());
        stream.extend_from_slice(&encode_frame(0x30, b"topic+payload").unwrap());

        let mut whole = BytesMut::from(&stream[..]);
        let expected: Vec<(u8, usize)> = parse_all(&mut whole)
            .iter()
            .map(|f| (f.header, f.remaining_length))
            .collect();

        let mut buffer = BytesMut::new();
        let mut observed = Vec::new();
        for chunk in stream.chunks(chunk_size) {
            buffer.put_slice(chunk);
            for frame in parse_all(&mut buffer) {
                observed.push((frame.header, frame.remaining_length));
            }
        }
        assert_eq!(observed, expected);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_single_and_multi_byte_length_payloads() {
        // 127-byte payload fits a single length byte, 128 takes two
        let mut buffer = BytesMut::new();
        buffer.put_u8(0x20);
        buffer.put_u8(0x7F);
        buffer.put_slice(&[0xAB; 127]);
        let frame = Frame::parse(&mut buffer, 4096).unwrap().unwrap();
        assert_eq!(frame.remaining_length, 127);

        buffer.put_slice(&[0x20, 0x80, 0x01]);
        buffer.put_slice(&[0xCD; 128]);
        let frame = Frame::parse(&mut buffer, 4096).unwrap().unwrap();
        assert_eq!(frame.remaining_length, 128);
        assert_eq!(&frame.payload[..4], &[0xCD; 4]);
    }
}
