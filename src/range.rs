//! Carry-propagating range coder.
//!
//! The encoder keeps a 32-bit interval `[low, low + range)` inside a 33-bit
//! window. Once `range` drops below 2^24 the top byte of `low` is final
//! unless a later addition carries into it, so it is parked in `cache`
//! together with a count of `0xFF` bytes behind it. A carry bumps the cached
//! byte and turns the pending `0xFF`s into `0x00`s. Nothing is ever rewritten
//! after it reaches the output buffer.
//!
//! Binary decisions use `probability / 2^15` of the interval for a `1`.
//! Multi-symbol decisions narrow by a Q15 [`Cdf`], with the rounding
//! remainder given to the symbol whose upper bound is the full scale.

use tracing::trace;

use crate::coder::{BitReader, BitWriter, SENTINEL};
use crate::prob::{Cdf, Probability, PROB_BITS, PROB_SCALE};

/// Renormalization threshold.
const TOP: u32 = 1 << 24;

/// Bytes flushed by the encoder and preloaded by the decoder.
const FLUSH_BYTES: usize = 5;

/// Range encoder writing into a caller-provided buffer.
///
/// The buffer must hold at least
/// [`worst_case_bound`](crate::coder::worst_case_bound) bytes for the number
/// of decisions coded; this is only checked in debug builds.
pub struct RangeWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    low: u64,
    range: u32,
    cache: u8,
    /// Number of `0xFF` bytes waiting behind `cache` for carry resolution.
    pending: u32,
}

impl<'a> RangeWriter<'a> {
    /// Starts a new stream at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            low: 0,
            range: u32::MAX,
            cache: 0,
            pending: 0,
        }
    }

    /// Codes symbol `s` with distribution `cdf`.
    ///
    /// `s` must have non-zero probability in `cdf`.
    #[inline]
    pub fn write_symbol(&mut self, s: usize, cdf: &Cdf) {
        let lo = cdf.lower(s);
        let hi = cdf.upper(s);
        debug_assert!(lo < hi, "symbol {s} has zero probability");
        let r = self.range >> PROB_BITS;
        self.low += (r * lo) as u64;
        self.range = if hi == PROB_SCALE {
            self.range - r * lo
        } else {
            r * (hi - lo)
        };
        self.normalize();
    }

    /// Bytes committed so far, counting the cached byte and pending carries.
    pub fn tell(&self) -> usize {
        self.pos + 1 + self.pending as usize
    }

    #[inline]
    fn normalize(&mut self) {
        while self.range < TOP {
            self.range <<= 8;
            self.shift_low();
        }
    }

    fn shift_low(&mut self) {
        let carry = (self.low >> 32) as u8;
        let low32 = self.low as u32;
        if low32 < 0xFF00_0000 || carry != 0 {
            self.put(self.cache.wrapping_add(carry));
            let fill = 0xFFu8.wrapping_add(carry);
            for _ in 0..self.pending {
                self.put(fill);
            }
            self.pending = 0;
            self.cache = (low32 >> 24) as u8;
        } else {
            self.pending += 1;
        }
        self.low = (low32 << 8) as u64;
    }

    #[inline]
    fn put(&mut self, byte: u8) {
        debug_assert!(self.pos < self.buf.len(), "range coder output buffer overflow");
        self.buf[self.pos] = byte;
        self.pos += 1;
    }
}

impl BitWriter for RangeWriter<'_> {
    #[inline]
    fn write_bit(&mut self, bit: bool, prob: Probability) {
        let bound = (self.range >> PROB_BITS) * prob.get() as u32;
        if bit {
            self.range = bound;
        } else {
            self.low += bound as u64;
            self.range -= bound;
        }
        self.normalize();
    }

    fn finish(mut self) -> usize {
        for _ in 0..FLUSH_BYTES {
            self.shift_low();
        }
        self.put(SENTINEL);
        trace!(bytes = self.pos, "range stream finished");
        self.pos
    }
}

/// Range decoder over an encoded stream.
///
/// Reading past the end of the stream feeds zero bytes; the results are
/// deterministic but meaningless.
pub struct RangeReader<'a> {
    buf: &'a [u8],
    pos: usize,
    range: u32,
    code: u32,
}

impl<'a> RangeReader<'a> {
    /// Opens `buf`, which must be a complete stream from [`RangeWriter`].
    pub fn new(buf: &'a [u8]) -> Self {
        let mut reader = Self {
            buf,
            pos: 0,
            range: u32::MAX,
            code: 0,
        };
        // The first byte is always zero and falls off the top of `code`.
        for _ in 0..FLUSH_BYTES {
            reader.code = (reader.code << 8) | reader.next_byte() as u32;
        }
        reader
    }

    /// Decodes a symbol coded with `cdf`.
    #[inline]
    pub fn read_symbol(&mut self, cdf: &Cdf) -> usize {
        let r = self.range >> PROB_BITS;
        let target = (self.code / r).min(PROB_SCALE - 1);
        let s = cdf.symbol_for(target);
        let lo = cdf.lower(s);
        let hi = cdf.upper(s);
        self.code -= r * lo;
        self.range = if hi == PROB_SCALE {
            self.range - r * lo
        } else {
            r * (hi - lo)
        };
        self.normalize();
        s
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn next_byte(&mut self) -> u8 {
        match self.buf.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                b
            }
            None => 0,
        }
    }

    #[inline]
    fn normalize(&mut self) {
        while self.range < TOP {
            self.range <<= 8;
            self.code = (self.code << 8) | self.next_byte() as u32;
        }
    }
}

impl BitReader for RangeReader<'_> {
    #[inline]
    fn read_bit(&mut self, prob: Probability) -> bool {
        let bound = (self.range >> PROB_BITS) * prob.get() as u32;
        let bit = if self.code < bound {
            self.range = bound;
            true
        } else {
            self.code -= bound;
            self.range -= bound;
            false
        };
        self.normalize();
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
        let mut w = RangeWriter::new(&mut buf);
        for &(bit, p) in decisions {
            w.write_bit(bit, p);
        }
        let n = w.finish();
        buf.truncate(n);
        buf
    }

    #[test]
    fn test_empty_stream() {
        let stream = encode(&[]);
        assert_eq!(stream, vec![0; FLUSH_BYTES + 1]);
    }

    #[test]
    fn test_extreme_probabilities() {
        // Every decision goes against a near-certain prediction, then with it.
        let mut decisions = Vec::new();
        for i in 0..2000 {
            decisions.push((i % 2 == 0, Probability::MIN));
            decisions.push((i % 3 == 0, Probability::MAX));
        }
        let stream = encode(&decisions);
        assert!(stream.len() <= worst_case_bound(decisions.len()));
        let mut r = RangeReader::new(&stream);
        for &(bit, p) in &decisions {
            assert_eq!(r.read_bit(p), bit);
        }
    }

    #[test]
    fn test_carry_through_pending_bytes() {
        // Long runs of likely-zero decisions park 0xFF bytes before a carry.
        let p = Probability::new(3).unwrap();
        let mut decisions = vec![(false, p); 5000];
        decisions.extend(std::iter::repeat((true, Probability::HALF)).take(64));
        decisions.extend(std::iter::repeat((false, p)).take(5000));
        let stream = encode(&decisions);
        let mut r = RangeReader::new(&stream);
        for &(bit, p) in &decisions {
            assert_eq!(r.read_bit(p), bit);
        }
    }

    #[test]
    fn test_reader_never_reaches_sentinel() {
        let decisions: Vec<_> = (0..1000u32)
            .map(|i| (i % 5 == 1, Probability::new(1 + i * 31 % 32766).unwrap()))
            .collect();
        let stream = encode(&decisions);
        let mut r = RangeReader::new(&stream);
        for &(_, p) in &decisions {
            r.read_bit(p);
        }
        assert_eq!(r.position(), stream.len() - 1);
        assert_eq!(stream[stream.len() - 1], SENTINEL);
    }

    #[test]
    fn test_symbols_with_zero_probability_neighbours() {
        let cdf = Cdf::new(vec![0, 100, 100, 32768, 32768]).unwrap();
        let symbols: Vec<usize> = (0..3000).map(|i| if i % 7 == 0 { 1 } else { 3 }).collect();
        let mut buf = vec![0u8; worst_case_bound(symbols.len())];
        let mut w = RangeWriter::new(&mut buf);
        for &s in &symbols {
            w.write_symbol(s, &cdf);
        }
        let n = w.finish();
        let mut r = RangeReader::new(&buf[..n]);
        let out: Vec<usize> = symbols.iter().map(|_| r.read_symbol(&cdf)).collect();
        assert_eq!(out, symbols);
    }

    #[test]
    fn test_tell_tracks_output() {
        let mut buf = vec![0u8; worst_case_bound(1000)];
        let mut w = RangeWriter::new(&mut buf);
        let start = w.tell();
        for _ in 0..1000 {
            w.write_bit(true, Probability::HALF);
        }
        // 1000 even-odds decisions commit about 125 bytes.
        assert!((120..=130).contains(&(w.tell() - start)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_range_bit_roundtrip(
            decisions in prop::collection::vec((any::<bool>(), 1u32..32768), 0..400),
        ) {
            let decisions: Vec<(bool, Probability)> = decisions
                .into_iter()
                .map(|(b, p)| (b, Probability::new(p).unwrap()))
                .collect();
            let stream = encode(&decisions);
            let mut r = RangeReader::new(&stream);
            for &(bit, p) in &decisions {
                prop_assert_eq!(r.read_bit(p), bit);
            }
        }
    }
}
