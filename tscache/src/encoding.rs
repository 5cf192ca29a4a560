//! Append-only sample encoding used inside a chunk.
//!
//! Each sample is written as two fields, both relative to the previous sample
//! of the same chunk:
//!
//! ```text
//! +---------------------------+--------+----------------------+
//! | zigzag varint ts delta    | header | 0..=8 XOR value bytes |
//! +---------------------------+--------+----------------------+
//!
//! header = (zero high-order bytes of xor) << 4 | (zero low-order bytes of xor)
//! ```
//!
//! The timestamp delta is signed so out-of-order samples inside a bucket
//! round-trip unchanged. The first sample of a chunk is delta'd against the
//! chunk's `t0` and XOR'd against `0.0`. A value equal to its predecessor
//! costs one header byte.
//!
//! The format carries no length prefix. Decoders are bounded externally by a
//! byte length and sample count captured from the chunk, which is what lets a
//! reader stop at a consistent prefix of a chunk that is still being written.

/// Header byte for an unchanged value.
const REPEAT_HEADER: u8 = 0x80;

/// Longest LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

/// Running state for appending samples to a chunk buffer.
#[derive(Debug, Clone, Copy)]
pub struct SampleEncoder {
    prev_ts: u32,
    prev_bits: u64,
}

impl SampleEncoder {
    /// Creates an encoder for a chunk starting at `t0`.
    pub fn new(t0: u32) -> Self {
        Self {
            prev_ts: t0,
            prev_bits: 0,
        }
    }

    /// Appends one sample to `buf`, returning the number of bytes written.
    pub fn encode(&mut self, timestamp: u32, value: f64, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();

        let delta = i64::from(timestamp) - i64::from(self.prev_ts);
        put_uvarint(buf, zigzag(delta));

        let bits = value.to_bits();
        put_xor(buf, bits ^ self.prev_bits);

        self.prev_ts = timestamp;
        self.prev_bits = bits;
        buf.len() - start
    }
}

/// Running state for reading samples back out of a chunk buffer.
#[derive(Debug, Clone, Copy)]
pub struct SampleDecoder {
    prev_ts: u32,
    prev_bits: u64,
}

impl SampleDecoder {
    /// Creates a decoder for a chunk starting at `t0`.
    pub fn new(t0: u32) -> Self {
        Self {
            prev_ts: t0,
            prev_bits: 0,
        }
    }

    /// Decodes the sample at the front of `buf`.
    ///
    /// Returns the sample and the number of bytes consumed, or `None` if
    /// `buf` is truncated or malformed.
    pub fn decode(&mut self, buf: &[u8]) -> Option<((u32, f64), usize)> {
        let (zz, ts_len) = uvarint(buf)?;
        let ts = i64::from(self.prev_ts) + unzigzag(zz);
        let ts = u32::try_from(ts).ok()?;

        let (xor, value_len) = take_xor(&buf[ts_len..])?;
        let bits = self.prev_bits ^ xor;

        self.prev_ts = ts;
        self.prev_bits = bits;
        Some(((ts, f64::from_bits(bits)), ts_len + value_len))
    }
}

#[inline]
fn zigzag(value: i64) -> u64 {
    #[allow(clippy::cast_sign_loss)] // zigzag maps the sign into bit 0
    let encoded = ((value << 1) ^ (value >> 63)) as u64;
    encoded
}

#[inline]
fn unzigzag(value: u64) -> i64 {
    #[allow(clippy::cast_possible_wrap)] // inverse of `zigzag`
    let decoded = ((value >> 1) as i64) ^ -((value & 1) as i64);
    decoded
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        #[allow(clippy::cast_possible_truncation)] // masked to 7 bits
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }

    None
}

fn put_xor(buf: &mut Vec<u8>, xor: u64) {
    if xor == 0 {
        buf.push(REPEAT_HEADER);
        return;
    }

    let lead = xor.leading_zeros() / 8;
    let trail = xor.trailing_zeros() / 8;
    let len = (8 - lead - trail) as usize;

    #[allow(clippy::cast_possible_truncation)] // both counts are <= 7 here
    buf.push(((lead as u8) << 4) | trail as u8);

    let middle = (xor >> (trail * 8)).to_be_bytes();
    buf.extend_from_slice(&middle[8 - len..]);
}

fn take_xor(buf: &[u8]) -> Option<(u64, usize)> {
    let header = *buf.first()?;
    if header == REPEAT_HEADER {
        return Some((0, 1));
    }

    let lead = u32::from(header >> 4);
    let trail = u32::from(header & 0x0F);
    if lead + trail >= 8 {
        return None;
    }

    let len = (8 - lead - trail) as usize;
    let bytes = buf.get(1..=len)?;
    let middle = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    Some((middle << (trail * 8), 1 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(t0: u32, buf: &[u8]) -> Vec<(u32, f64)> {
        let mut decoder = SampleDecoder::new(t0);
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            let (sample, used) = decoder.decode(&buf[offset..]).unwrap();
            out.push(sample);
            offset += used;
        }
        out
    }

    #[test]
    fn test_repeated_value_costs_one_byte() {
        let mut encoder = SampleEncoder::new(600);
        let mut buf = Vec::new();

        encoder.encode(610, 42.0, &mut buf);
        let before = buf.len();
        // Delta 10 fits one varint byte, unchanged value is the header only.
        assert_eq!(encoder.encode(620, 42.0, &mut buf), 2);
        assert_eq!(buf.len(), before + 2);
    }

    #[test]
    fn test_out_of_order_timestamps_survive() {
        let samples = [(605, 1.5), (640, -3.25), (601, 0.0), (659, f64::MAX), (659, 1e-300)];
        let mut encoder = SampleEncoder::new(600);
        let mut buf = Vec::new();
        for &(ts, v) in &samples {
            encoder.encode(ts, v, &mut buf);
        }

        assert_eq!(decode_all(600, &buf), samples.to_vec());
    }

    #[test]
    fn test_nan_bits_preserved() {
        let mut encoder = SampleEncoder::new(0);
        let mut buf = Vec::new();
        encoder.encode(1, f64::NAN, &mut buf);
        encoder.encode(2, f64::NAN, &mut buf);

        let out = decode_all(0, &buf);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|(_, v)| v.is_nan()));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut encoder = SampleEncoder::new(0);
        let mut buf = Vec::new();
        encoder.encode(1, 123.456, &mut buf);

        let mut decoder = SampleDecoder::new(0);
        assert!(decoder.decode(&buf[..buf.len() - 1]).is_none());
        assert!(decoder.decode(&[]).is_none());
    }

    #[test]
    fn test_malformed_header_rejected() {
        // ts delta 0, then a header claiming 8 zero bytes without the repeat marker.
        let mut decoder = SampleDecoder::new(0);
        assert!(decoder.decode(&[0x00, 0x44]).is_none());
    }

    #[test]
    fn test_integer_values_stay_compact() {
        let mut encoder = SampleEncoder::new(0);
        let mut buf = Vec::new();
        encoder.encode(0, 1.0, &mut buf);
        // 1.0 -> 2.0 flips only high-order exponent bits.
        let used = encoder.encode(1, 2.0, &mut buf);
        assert!(used <= 4, "used {used} bytes");
    }
}
