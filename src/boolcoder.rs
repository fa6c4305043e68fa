//! Legacy boolean coder.
//!
//! Same contract as the range coder, different machinery: an 8-bit `range`
//! register is split at `1 + ((range - 1) * P(0)) >> 15`, and the
//! renormalization shift comes from the position of the highest set bit of
//! `range`. Carries are resolved eagerly by walking back over already written
//! `0xFF` bytes instead of being deferred.
//!
//! Streams open with an implicit `0` marker bit and close with 32 padding
//! bits, so the decoder's look-ahead never depends on bytes past the stream.

use tracing::trace;

use crate::coder::{BitReader, BitWriter, SENTINEL};
use crate::error::{Error, Result};
use crate::prob::{Probability, PROB_BITS};

/// Zero bits appended by [`BoolWriter::finish`].
const PADDING_BITS: usize = 32;

/// Width of the decoder's value window.
const VALUE_BITS: i32 = u64::BITS as i32;

/// Credited to the decoder's bit count once input runs out.
const LOTS_OF_BITS: i32 = 0x4000;

/// Left shift that brings an 8-bit range back into `[128, 255]`.
#[inline]
fn norm_shift(range: u32) -> u32 {
    debug_assert!((1..=255).contains(&range));
    range.leading_zeros() - 24
}

#[inline]
fn split(range: u32, prob: Probability) -> u32 {
    1 + (((range - 1) * prob.zero() as u32) >> PROB_BITS)
}

/// Boolean encoder writing into a caller-provided buffer.
pub struct BoolWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    low: u32,
    range: u32,
    count: i32,
}

impl<'a> BoolWriter<'a> {
    /// Starts a new stream at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let mut w = Self {
            buf,
            pos: 0,
            low: 0,
            range: 255,
            count: -24,
        };
        w.write_bit(false, Probability::HALF);
        w
    }

    /// Bytes written so far.
    pub fn tell(&self) -> usize {
        self.pos
    }

    fn propagate_carry(&mut self) {
        let mut x = self.pos;
        while x > 0 && self.buf[x - 1] == 0xFF {
            self.buf[x - 1] = 0;
            x -= 1;
        }
        // The marker bit keeps the first byte below 0x80, so the carry stops.
        debug_assert!(x > 0);
        self.buf[x - 1] += 1;
    }

    #[inline]
    fn put(&mut self, byte: u8) {
        debug_assert!(self.pos < self.buf.len(), "bool coder output buffer overflow");
        self.buf[self.pos] = byte;
        self.pos += 1;
    }
}

impl BitWriter for BoolWriter<'_> {
    #[inline]
    fn write_bit(&mut self, bit: bool, prob: Probability) {
        let split = split(self.range, prob);
        let mut range = split;
        if bit {
            self.low = self.low.wrapping_add(split);
            range = self.range - split;
        }

        let mut shift = norm_shift(range) as i32;
        range <<= shift;
        self.count += shift;

        if self.count >= 0 {
            let offset = shift - self.count;
            if (self.low << (offset - 1)) & 0x8000_0000 != 0 {
                self.propagate_carry();
            }
            self.put((self.low >> (24 - offset)) as u8);
            self.low <<= offset;
            shift = self.count;
            self.low &= 0x00FF_FFFF;
            self.count -= 8;
        }

        self.low <<= shift;
        self.range = range;
    }

    fn finish(mut self) -> usize {
        for _ in 0..PADDING_BITS {
            self.write_bit(false, Probability::HALF);
        }
        self.put(SENTINEL);
        trace!(bytes = self.pos, "bool stream finished");
        self.pos
    }
}

/// Boolean decoder over an encoded stream.
///
/// Past the end of the stream the window fills with zero bits.
pub struct BoolReader<'a> {
    buf: &'a [u8],
    pos: usize,
    value: u64,
    /// Valid bits in `value` below its top byte.
    count: i32,
    range: u32,
}

impl<'a> BoolReader<'a> {
    /// Opens `buf`, which must be a complete stream from [`BoolWriter`].
    ///
    /// Returns [`Error::InvalidStream`] if the leading marker bit is set.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let mut r = Self {
            buf,
            pos: 0,
            value: 0,
            count: -8,
            range: 255,
        };
        r.fill();
        if r.read_bit(Probability::HALF) {
            return Err(Error::InvalidStream);
        }
        Ok(r)
    }

    fn fill(&mut self) {
        let mut shift = VALUE_BITS - 8 - (self.count + 8);
        while shift >= 0 {
            let Some(&byte) = self.buf.get(self.pos) else {
                self.count += LOTS_OF_BITS;
                break;
            };
            self.pos += 1;
            self.count += 8;
            self.value |= (byte as u64) << shift;
            shift -= 8;
        }
    }
}

impl BitReader for BoolReader<'_> {
    #[inline]
    fn read_bit(&mut self, prob: Probability) -> bool {
        let split = split(self.range, prob);
        if self.count < 0 {
            self.fill();
        }
        let bigsplit = (split as u64) << (VALUE_BITS - 8);
        let bit = if self.value >= bigsplit {
            self.range -= split;
            self.value -= bigsplit;
            true
        } else {
            self.range = split;
            false
        };
        let shift = norm_shift(self.range);
        self.range <<= shift;
        self.value <<= shift;
        self.count -= shift as i32;
        bit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::worst_case_bound;
    use proptest::prelude::*;

    fn encode(decisions: &[(bool, Probability)]) -> Vec<u8> {
        let mut buf = vec![0u8; worst_case_bound(decisions.len())];
        let mut w = BoolWriter::new(&mut buf);
        for &(bit, p) in decisions {
            w.write_bit(bit, p);
        }
        let n = w.finish();
        buf.truncate(n);
        buf
    }

    #[test]
    fn test_norm_shift() {
        assert_eq!(norm_shift(1), 7);
        assert_eq!(norm_shift(127), 1);
        assert_eq!(norm_shift(128), 0);
        assert_eq!(norm_shift(255), 0);
    }

    #[test]
    fn test_split_stays_inside_range() {
        for range in 128..=255 {
            for p in [Probability::MIN, Probability::HALF, Probability::MAX] {
                let s = split(range, p);
                assert!(s >= 1 && s < range, "range {range} p {p:?} split {s}");
            }
        }
    }

    #[test]
    fn test_carry_walks_over_ff_bytes() {
        let p = Probability::new(32000).unwrap();
        let mut decisions = vec![(true, p); 4000];
        decisions.push((false, p));
        decisions.extend(vec![(true, p); 4000]);
        let stream = encode(&decisions);
        let mut r = BoolReader::new(&stream).unwrap();
        for &(bit, p) in &decisions {
            assert_eq!(r.read_bit(p), bit);
        }
    }

    #[test]
    fn test_set_marker_bit_is_rejected() {
        let decisions: Vec<_> = (0..64u32)
            .map(|i| (i % 5 < 2, Probability::new(1 + (i * 4099) % 32767).unwrap()))
            .collect();
        let mut stream = encode(&decisions);
        assert!(stream[0] < 0x80);
        assert!(BoolReader::new(&stream).is_ok());

        stream[0] |= 0x80;
        assert!(matches!(BoolReader::new(&stream), Err(Error::InvalidStream)));
        assert!(matches!(BoolReader::new(&[0xFF]), Err(Error::InvalidStream)));
    }

    #[test]
    fn test_empty_input_reads_as_zero_marker() {
        let mut r = BoolReader::new(&[]).unwrap();
        assert!(!r.read_bit(Probability::HALF));
    }

    #[test]
    fn test_tell_tracks_output() {
        let mut buf = vec![0u8; worst_case_bound(4096)];
        let mut w = BoolWriter::new(&mut buf);
        assert_eq!(w.tell(), 0);
        // 1000 even-odds decisions are 1000 bits, give or take the 24-bit lag.
        for i in 0..1000 {
            w.write_bit(i % 2 == 0, Probability::HALF);
        }
        let mid = w.tell();
        assert!((122..=126).contains(&mid), "{mid}");
        for _ in 0..1000 {
            w.write_bit(false, Probability::HALF);
        }
        assert!(w.tell() >= mid + 124);
        let n = w.finish();
        assert!(n > 250);
    }

    #[test]
    fn test_trailing_bytes_do_not_change_decoding() {
        let decisions: Vec<_> = (0..777u32)
            .map(|i| (i % 3 == 0, Probability::new(1 + (i * 977) % 32767).unwrap()))
            .collect();
        let mut stream = encode(&decisions);
        assert_eq!(*stream.last().unwrap(), SENTINEL);
        let last = stream.len() - 1;
        stream[last] = 0xFF;
        stream.extend_from_slice(&[0xAB; 9]);
        let mut r = BoolReader::new(&stream).unwrap();
        for &(bit, p) in &decisions {
            assert_eq!(r.read_bit(p), bit);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_bool_roundtrip(
            decisions in prop::collection::vec((any::<bool>(), 1u32..32768), 0..400),
        ) {
            let decisions: Vec<(bool, Probability)> = decisions
                .into_iter()
                .map(|(b, p)| (b, Probability::new(p).unwrap()))
                .collect();
            let stream = encode(&decisions);
            let mut r = BoolReader::new(&stream).unwrap();
            for &(bit, p) in &decisions {
                prop_assert_eq!(r.read_bit(p), bit);
            }
        }
    }
}
