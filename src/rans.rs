//! Byte-aligned range Asymmetric Numeral Systems (rANS).
//!
//! The coder state `x` lives in `[L_BASE, L_BASE * IO_BASE)`. Encoding symbol
//! `s` with quantized frequency `f` and cumulative start `c` maps
//!
//! ```text
//! x' = (x / f) * M + (x % f) + c          (M = RANS_PRECISION)
//! ```
//!
//! after shifting bytes out of `x` until `x < (L_BASE / M) * IO_BASE * f`.
//! Decoding inverts the map, so the decoder pops symbols in the reverse of the
//! order they were pushed.
//!
//! **Callers must feed [`AnsWriter`] in reverse decode order.** Feeding it
//! forward does not fail; it produces a stream that decodes back to front.
//!
//! Binary decisions use the uABS variant at 8-bit precision on the same state
//! and byte stream, so both kinds of decision can be mixed in one stream.
//!
//! Stream layout: renormalization bytes, then the final state minus `L_BASE`
//! in 1 to 3 little-endian bytes whose top two bits give the length, then the
//! sentinel. The decoder reads everything from the end.

use tracing::trace;

use crate::coder::{BitReader, BitWriter, SENTINEL};
use crate::error::{Error, Result};
use crate::prob::{Cdf, Probability, PROB_BITS};

/// Precision of quantized symbol frequencies, in bits.
pub const RANS_BITS: u32 = 10;

/// Quantized probability scale (`1 << RANS_BITS`).
pub const RANS_PRECISION: u32 = 1 << RANS_BITS;

/// Precision of uABS binary probabilities.
const P8_PRECISION: u32 = 256;

/// Lower bound of the normalized state interval.
pub const L_BASE: u32 = P8_PRECISION * 4;

/// Radix of renormalization output.
const IO_BASE: u32 = 256;

/// One quantized symbol: frequency and cumulative start, both in
/// [`RANS_PRECISION`] units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RansSymbol {
    /// Quantized frequency.
    pub prob: u16,
    /// Sum of the frequencies of all earlier symbols.
    pub cum_prob: u16,
}

/// Per-symbol quantized frequencies derived from a Q15 [`Cdf`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolTable {
    entries: Vec<RansSymbol>,
}

impl SymbolTable {
    /// The entry for symbol `s`.
    #[inline]
    pub fn get(&self, s: usize) -> &RansSymbol {
        &self.entries[s]
    }

    /// All entries, in symbol order.
    pub fn entries(&self) -> &[RansSymbol] {
        &self.entries
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a table built from a [`Cdf`].
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all quantized frequencies.
    pub fn total(&self) -> u32 {
        self.entries.iter().map(|e| e.prob as u32).sum()
    }
}

/// Requantizes a Q15 CDF to [`RANS_PRECISION`].
///
/// Each frequency is rounded to the nearest multiple of 2^5. Symbols with
/// non-zero Q15 mass keep at least one slot, zero-mass symbols get none, and
/// the last symbol with non-zero mass absorbs the rounding error so the table
/// always totals exactly [`RANS_PRECISION`]. If that would leave it empty, the
/// excess is taken one slot at a time from the largest entries.
pub fn build_symbol_table(cdf: &Cdf) -> SymbolTable {
    let shift = PROB_BITS - RANS_BITS;
    let half = 1 << (shift - 1);
    let n = cdf.len();

    let mut probs: Vec<u32> = (0..n)
        .map(|s| match cdf.freq(s) {
            0 => 0,
            f => ((f + half) >> shift).max(1),
        })
        .collect();

    let last = (0..n).rev().find(|&s| cdf.freq(s) > 0).unwrap_or(n - 1);
    probs[last] = 0;
    let others: u32 = probs.iter().sum();
    probs[last] = RANS_PRECISION.saturating_sub(others).max(1);

    let mut total = others + probs[last];
    while total > RANS_PRECISION {
        let (big, _) = probs
            .iter()
            .enumerate()
            .max_by_key(|&(i, &p)| (p, std::cmp::Reverse(i)))
            .unwrap_or((last, &0));
        probs[big] -= 1;
        total -= 1;
    }

    let mut cum = 0u32;
    let entries = probs
        .into_iter()
        .map(|p| {
            let e = RansSymbol {
                prob: p as u16,
                cum_prob: cum as u16,
            };
            cum += p;
            e
        })
        .collect();
    SymbolTable { entries }
}

/// Direct slot-to-symbol lookup covering the full quantized range.
#[derive(Clone, Debug)]
pub struct DecodeTable {
    slots: Vec<u8>,
    symbols: Vec<RansSymbol>,
}

impl DecodeTable {
    /// Symbol owning slot `rem` (`rem < RANS_PRECISION`).
    #[inline]
    pub fn symbol_at(&self, rem: u32) -> usize {
        self.slots[rem as usize] as usize
    }
}

/// Expands a [`SymbolTable`] into a [`RANS_PRECISION`]-entry lookup table.
pub fn build_decode_table(table: &SymbolTable) -> DecodeTable {
    let mut slots = vec![0u8; RANS_PRECISION as usize];
    for (s, e) in table.entries().iter().enumerate() {
        let start = e.cum_prob as usize;
        slots[start..start + e.prob as usize].fill(s as u8);
    }
    DecodeTable {
        slots,
        symbols: table.entries().to_vec(),
    }
}

/// rANS encoder writing into a caller-provided buffer.
///
/// Decisions must be written in reverse decode order.
pub struct AnsWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    state: u32,
}

impl<'a> AnsWriter<'a> {
    /// Starts a new stream at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            state: L_BASE,
        }
    }

    /// Pushes one symbol-table entry onto the state.
    #[inline]
    pub fn write_symbol(&mut self, sym: &RansSymbol) {
        let p = sym.prob as u32;
        debug_assert!(p > 0, "symbol has zero quantized probability");
        while self.state >= (L_BASE / RANS_PRECISION) * IO_BASE * p {
            self.put((self.state % IO_BASE) as u8);
            self.state /= IO_BASE;
        }
        self.state = (self.state / p) * RANS_PRECISION + self.state % p + sym.cum_prob as u32;
    }

    /// Current coder state.
    pub fn state(&self) -> u32 {
        self.state
    }

    #[inline]
    fn put(&mut self, byte: u8) {
        debug_assert!(self.pos < self.buf.len(), "rans output buffer overflow");
        self.buf[self.pos] = byte;
        self.pos += 1;
    }
}

impl BitWriter for AnsWriter<'_> {
    #[inline]
    fn write_bit(&mut self, bit: bool, prob: Probability) {
        let p0 = prob.to_p8_zero() as u32;
        let p = P8_PRECISION - p0;
        let l_s = if bit { p } else { p0 };
        while self.state >= L_BASE / P8_PRECISION * IO_BASE * l_s {
            self.put((self.state % IO_BASE) as u8);
            self.state /= IO_BASE;
        }
        self.state = if bit {
            ((self.state + 1) * P8_PRECISION + p - 1) / p - 1
        } else {
            self.state * P8_PRECISION / p0
        };
    }

    fn finish(mut self) -> usize {
        debug_assert!((L_BASE..L_BASE * IO_BASE).contains(&self.state));
        let state = self.state - L_BASE;
        if state < 1 << 6 {
            self.put(state as u8);
        } else if state < 1 << 14 {
            for b in ((0x01 << 14) + state).to_le_bytes()[..2].iter() {
                self.put(*b);
            }
        } else {
            debug_assert!(state < 1 << 22);
            for b in ((0x02 << 22) + state).to_le_bytes()[..3].iter() {
                self.put(*b);
            }
        }
        self.put(SENTINEL);
        trace!(bytes = self.pos, "rans stream finished");
        self.pos
    }

    #[inline]
    fn is_lifo(&self) -> bool {
        true
    }
}

/// rANS decoder over an encoded stream.
///
/// Once the renormalization bytes are exhausted the state keeps shrinking
/// without input; decoded values are then deterministic but meaningless.
pub struct AnsReader<'a> {
    buf: &'a [u8],
    /// Bytes still available below the trailer, consumed back to front.
    offset: usize,
    state: u32,
}

impl<'a> AnsReader<'a> {
    /// Opens `buf`, which must be exactly the bytes reported by
    /// [`AnsWriter`]'s `finish`, sentinel included.
    ///
    /// # Errors
    /// Returns `Error::InvalidStream` if the sentinel is missing, the trailer
    /// is truncated or carries the reserved `0b11` length tag, or the state is
    /// out of range.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let Some((&SENTINEL, body)) = buf.split_last() else {
            return Err(Error::InvalidStream);
        };
        let Some(&last) = body.last() else {
            return Err(Error::InvalidStream);
        };
        let len = body.len();
        let (offset, state) = match last >> 6 {
            0 => (len - 1, (last & 0x3F) as u32),
            1 if len >= 2 => (
                len - 2,
                u16::from_le_bytes([body[len - 2], body[len - 1]]) as u32 & 0x3FFF,
            ),
            2 if len >= 3 => (
                len - 3,
                u32::from_le_bytes([body[len - 3], body[len - 2], body[len - 1], 0]) & 0x3F_FFFF,
            ),
            // 0b11 would look like a frame marker; never produced.
            _ => return Err(Error::InvalidStream),
        };
        let state = state + L_BASE;
        if state >= L_BASE * IO_BASE {
            return Err(Error::InvalidStream);
        }
        Ok(Self {
            buf: body,
            offset,
            state,
        })
    }

    /// Pops one symbol using `table`.
    #[inline]
    pub fn read_symbol(&mut self, table: &DecodeTable) -> usize {
        self.refill();
        let quo = self.state / RANS_PRECISION;
        let rem = self.state % RANS_PRECISION;
        let s = table.symbol_at(rem);
        let sym = table.symbols[s];
        self.state = quo * sym.prob as u32 + rem - sym.cum_prob as u32;
        s
    }

    /// Current coder state.
    pub fn state(&self) -> u32 {
        self.state
    }

    /// True once every renormalization byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.offset == 0
    }

    #[inline]
    fn refill(&mut self) {
        while self.state < L_BASE && self.offset > 0 {
            self.offset -= 1;
            self.state = self.state * IO_BASE + self.buf[self.offset] as u32;
        }
    }
}

impl BitReader for AnsReader<'_> {
    #[inline]
    fn read_bit(&mut self, prob: Probability) -> bool {
        let p0 = prob.to_p8_zero() as u32;
        let p = P8_PRECISION - p0;
        self.refill();
        let sp = self.state * p;
        let xp = sp / P8_PRECISION;
        let bit = (sp & 0xFF) >= p0;
        self.state = if bit { xp } else { self.state - xp };
        bit
    }
}
