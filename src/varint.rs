//! Variable-length integer encoding per RFC 9000 Section 16.
//!
//! HTTP/3 inherits QUIC's variable-length integer encoding for frame types,
//! frame lengths, stream type identifiers, push IDs, and settings parameters.
//! The top two bits of the first byte select a 1/2/4/8-byte encoding; the
//! remaining bits form the big-endian magnitude.
//!
//! [`VarintReader`] additionally decodes a varint delivered across multiple
//! byte slices, which the frame-level parser needs when a frame header
//! straddles transport reads.

use crate::error::{Error, ErrorCode, Result};
use bytes::{Buf, BufMut};

/// Largest encodable value, 2^62 - 1.
pub const MAX: u64 = (1 << 62) - 1;

/// Number of bytes required to encode `value`.
pub fn encoded_len(value: u64) -> usize {
    if value < 64 {
        1
    } else if value < 16384 {
        2
    } else if value < 1073741824 {
        4
    } else {
        8
    }
}

/// Encoding size selected by the first byte.
pub fn len_from_first_byte(b0: u8) -> usize {
    match b0 >> 6 {
        0 => 1,
        1 => 2,
        2 => 4,
        3 => 8,
        _ => unreachable!(),
    }
}

/// Encode `value` into `dst`, returning the number of bytes written.
///
/// # Errors
///
/// Returns `InvalidArgument` if `value` exceeds [`MAX`] or `dst` is too
/// short for the encoding.
pub fn encode(value: u64, dst: &mut [u8]) -> Result<usize> {
    if value > MAX {
        return Err(Error::InvalidArgument("varint value exceeds 2^62 - 1"));
    }
    let len = encoded_len(value);
    if dst.len() < len {
        return Err(Error::InvalidArgument("varint destination too short"));
    }

    match len {
        1 => dst[0] = value as u8,
        2 => dst[..2].copy_from_slice(&((value as u16) | 0x4000).to_be_bytes()),
        4 => dst[..4].copy_from_slice(&((value as u32) | 0x8000_0000).to_be_bytes()),
        _ => dst[..8].copy_from_slice(&(value | 0xC000_0000_0000_0000).to_be_bytes()),
    }

    Ok(len)
}

/// Decode a varint from the front of `src`, returning the value and the
/// number of bytes consumed.
///
/// # Errors
///
/// Returns a `FrameError` protocol error if `src` does not contain a
/// complete varint.
pub fn decode(src: &[u8]) -> Result<(u64, usize)> {
    let first = *src
        .first()
        .ok_or(Error::InvalidArgument("empty varint source"))?;
    let len = len_from_first_byte(first);
    if src.len() < len {
        return Err(Error::protocol(
            ErrorCode::FrameError,
            format!("incomplete varint: need {} bytes, have {}", len, src.len()),
        ));
    }

    let mut acc = u64::from(first & 0x3f);
    for &b in &src[1..len] {
        acc = (acc << 8) + u64::from(b);
    }

    Ok((acc, len))
}

/// Decode a varint from a buffer implementing `Buf`, advancing it by the
/// number of bytes consumed.
pub fn decode_buf<B: Buf>(buf: &mut B) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(Error::protocol(
            ErrorCode::FrameError,
            "incomplete varint: empty buffer",
        ));
    }

    let len = len_from_first_byte(buf.chunk()[0]);
    if buf.remaining() < len {
        return Err(Error::protocol(
            ErrorCode::FrameError,
            format!(
                "incomplete varint: need {} bytes, have {}",
                len,
                buf.remaining()
            ),
        ));
    }

    // Buf may be segmented; collect the encoding into a stack buffer.
    let mut raw = [0u8; 8];
    buf.copy_to_slice(&mut raw[..len]);
    let (value, consumed) = decode(&raw[..len])?;
    debug_assert_eq!(consumed, len);
    Ok(value)
}

/// Encode `value` into a buffer implementing `BufMut`.
pub fn encode_buf<B: BufMut>(value: u64, buf: &mut B) -> Result<usize> {
    let mut tmp = [0u8; 8];
    let written = encode(value, &mut tmp)?;
    if buf.remaining_mut() < written {
        return Err(Error::InvalidArgument("varint destination too short"));
    }
    buf.put_slice(&tmp[..written]);
    Ok(written)
}

/// Streaming varint decoder.
///
/// Accepts byte slices one at a time and accumulates a single varint across
/// them. After a successful [`read`](Self::read), the varint is complete iff
/// [`left`](Self::left) is zero, at which point [`value`](Self::value) holds
/// the decoded integer.
#[derive(Debug, Default, Clone)]
pub struct VarintReader {
    acc: u64,
    left: usize,
}

impl VarintReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the initial state for the next varint.
    pub fn reset(&mut self) {
        self.acc = 0;
        self.left = 0;
    }

    /// Decoded value; meaningful once [`left`](Self::left) is zero.
    pub fn value(&self) -> u64 {
        self.acc
    }

    /// Bytes still required to complete the current varint.
    pub fn left(&self) -> usize {
        self.left
    }

    /// Consume bytes from `src`, returning how many were read.
    ///
    /// `fin` marks `src` as the final slice of the stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `src` is empty, or if `fin` is set and
    /// the varint is still incomplete after consuming `src`.
    pub fn read(&mut self, src: &[u8], fin: bool) -> Result<usize> {
        if src.is_empty() {
            return Err(Error::InvalidArgument("empty varint source"));
        }

        let mut nread = 0;
        let mut src = src;

        if self.left == 0 {
            debug_assert_eq!(self.acc, 0);

            let len = len_from_first_byte(src[0]);
            if len <= src.len() {
                let (value, consumed) = decode(src)?;
                self.acc = value;
                return Ok(consumed);
            }

            self.acc = u64::from(src[0] & 0x3f);
            self.left = len - 1;
            nread = 1;
            src = &src[1..];
        }

        let n = self.left.min(src.len());
        for &b in &src[..n] {
            self.acc = (self.acc << 8) + u64::from(b);
        }
        self.left -= n;
        nread += n;

        if fin && self.left > 0 {
            return Err(Error::InvalidArgument("truncated varint at end of stream"));
        }

        Ok(nread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_encode_decode_roundtrip() {
        let values = [0, 1, 63, 64, 16383, 16384, 1073741823, 1073741824, MAX];

        for value in values {
            let mut buf = [0u8; 8];
            let written = encode(value, &mut buf).unwrap();
            assert_eq!(written, encoded_len(value));

            let (decoded, consumed) = decode(&buf[..written]).unwrap();
            assert_eq!(decoded, value, "roundtrip failed for {}", value);
            assert_eq!(consumed, written);
        }
    }

    #[test]
    fn test_encoded_len_boundaries() {
        assert_eq!(encoded_len(0), 1);
        assert_eq!(encoded_len(63), 1);
        assert_eq!(encoded_len(64), 2);
        assert_eq!(encoded_len(16383), 2);
        assert_eq!(encoded_len(16384), 4);
        assert_eq!(encoded_len(1073741823), 4);
        assert_eq!(encoded_len(1073741824), 8);
        assert_eq!(encoded_len(MAX), 8);
    }

    #[test]
    fn test_rfc9000_eight_byte_example() {
        // RFC 9000 Appendix A.1 sample value.
        let value = 151288809941952652u64;
        let mut buf = [0u8; 8];
        let written = encode(value, &mut buf).unwrap();
        assert_eq!(written, 8);
        assert_eq!(buf, [0xc2, 0x19, 0x7c, 0x5a, 0x6b, 0xd6, 0x2c, 0x0c]);

        let (decoded, consumed) = decode(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let mut buf = [0u8; 8];
        assert!(encode(MAX + 1, &mut buf).is_err());
        assert!(encode(1073741824, &mut buf[..4]).is_err());
    }

    #[test]
    fn test_decode_incomplete() {
        assert!(decode(&[0x40]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_buf_adapters() {
        let mut buf = BytesMut::new();
        encode_buf(16384, &mut buf).unwrap();
        assert_eq!(buf.len(), 4);
        let mut rd = buf.freeze();
        assert_eq!(decode_buf(&mut rd).unwrap(), 16384);
        assert!(!rd.has_remaining());
    }

    #[test]
    fn test_streaming_whole_slice() {
        let mut rv = VarintReader::new();
        let nread = rv.read(&[0xc2, 0x19, 0x7c, 0x5a, 0x6b, 0xd6, 0x2c, 0x0c], true).unwrap();
        assert_eq!(nread, 8);
        assert_eq!(rv.left(), 0);
        assert_eq!(rv.value(), 151288809941952652);
    }

    #[test]
    fn test_streaming_all_split_points() {
        let value = 151288809941952652u64;
        let mut enc = [0u8; 8];
        let len = encode(value, &mut enc).unwrap();

        for split in 1..len {
            let mut rv = VarintReader::new();
            let mut total = 0;
            total += rv.read(&enc[..split], false).unwrap();
            assert!(rv.left() > 0);
            total += rv.read(&enc[split..], true).unwrap();
            assert_eq!(total, len, "split at {}", split);
            assert_eq!(rv.left(), 0);
            assert_eq!(rv.value(), value);
        }
    }

    #[test]
    fn test_streaming_byte_at_a_time() {
        let value = 299792458u64;
        let mut enc = [0u8; 8];
        let len = encode(value, &mut enc).unwrap();

        let mut rv = VarintReader::new();
        let mut total = 0;
        for i in 0..len {
            total += rv.read(&enc[i..i + 1], i == len - 1).unwrap();
        }
        assert_eq!(total, len);
        assert_eq!(rv.value(), value);
    }

    #[test]
    fn test_streaming_fin_truncation() {
        let mut rv = VarintReader::new();
        assert!(rv.read(&[0x80, 0x01], true).is_err());

        let mut rv = VarintReader::new();
        rv.read(&[0x80, 0x01], false).unwrap();
        assert!(rv.read(&[0x02], true).is_err());
    }

    #[test]
    fn test_streaming_reset() {
        let mut rv = VarintReader::new();
        rv.read(&[0x40], false).unwrap();
        assert_eq!(rv.left(), 1);
        rv.reset();
        assert_eq!(rv.left(), 0);
        assert_eq!(rv.read(&[0x25], true).unwrap(), 1);
        assert_eq!(rv.value(), 0x25);
    }
}
