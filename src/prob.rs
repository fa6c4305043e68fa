//! Probability model shared by every backend.
//!
//! Binary decisions carry a Q15 probability that the coded bit is `1`.
//! Multi-symbol decisions carry a [`Cdf`]: inclusive cumulative upper bounds
//! per symbol, closing at [`PROB_SCALE`].

use crate::error::{Error, Result};

/// Precision of binary and CDF probabilities, in bits.
pub const PROB_BITS: u32 = 15;

/// Total probability mass (`1 << PROB_BITS`).
pub const PROB_SCALE: u32 = 1 << PROB_BITS;

/// Largest alphabet a [`Cdf`] may describe.
pub const MAX_SYMBOLS: usize = 16;

/// Q15 probability that a binary decision is `1`.
///
/// Always in `[1, PROB_SCALE - 1]`: both certainties are excluded because
/// they would give the other outcome an infinite cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Probability(u16);

impl Probability {
    /// Even odds.
    pub const HALF: Probability = Probability((PROB_SCALE / 2) as u16);

    /// Smallest legal probability.
    pub const MIN: Probability = Probability(1);

    /// Largest legal probability.
    pub const MAX: Probability = Probability((PROB_SCALE - 1) as u16);

    /// Checked constructor.
    ///
    /// # Errors
    /// Returns `Error::InvalidProbability` when `p` is 0 or `>= PROB_SCALE`.
    pub fn new(p: u32) -> Result<Self> {
        if p == 0 || p >= PROB_SCALE {
            return Err(Error::InvalidProbability(p));
        }
        Ok(Self(p as u16))
    }

    /// Unchecked constructor for hot paths whose inputs were validated earlier.
    #[inline]
    pub const fn new_unchecked(p: u16) -> Self {
        debug_assert!(p != 0 && (p as u32) < PROB_SCALE);
        Self(p)
    }

    /// Converts an 8-bit tree node probability into a Q15 probability of `1`.
    ///
    /// `p8` is the chance, in 1/256, that the node's 0-branch is taken. Zero
    /// is not a legal node probability and is treated as 1.
    #[inline]
    pub fn from_zero_branch(p8: u8) -> Self {
        let p8 = p8.max(1) as u16;
        Self((256 - p8) << 7)
    }

    /// Raw Q15 probability of `1`.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Q15 probability of `0`.
    #[inline]
    pub const fn zero(self) -> u16 {
        (PROB_SCALE - self.0 as u32) as u16
    }

    /// Probability of `0` reduced to 8 bits and clamped to `[1, 255]`.
    #[inline]
    pub fn to_p8_zero(self) -> u8 {
        let p0 = (self.zero() as u32 + 64) >> 7;
        p0.clamp(1, 255) as u8
    }

    /// Ideal cost in bits of coding `bit` with this probability.
    pub fn cost(self, bit: bool) -> f64 {
        let p = if bit { self.0 } else { self.zero() };
        -(p as f64 / PROB_SCALE as f64).log2()
    }
}

impl TryFrom<u32> for Probability {
    type Error = Error;

    fn try_from(p: u32) -> Result<Self> {
        Self::new(p)
    }
}

/// Cumulative distribution over at most [`MAX_SYMBOLS`] symbols.
///
/// `bounds()[s]` is the cumulative probability of symbols `0..=s`; the
/// implicit lower bound of symbol 0 is 0 and the last bound is exactly
/// [`PROB_SCALE`]. Equal neighbours give a symbol zero probability, which is
/// legal as long as that symbol is never coded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cdf {
    bounds: Vec<u16>,
}

impl Cdf {
    /// Builds a CDF from inclusive cumulative upper bounds.
    ///
    /// # Errors
    /// Returns `Error::InvalidCdf` if `bounds` is empty, longer than
    /// [`MAX_SYMBOLS`], decreasing anywhere, or does not end at the scale.
    pub fn new(bounds: Vec<u16>) -> Result<Self> {
        if bounds.is_empty() || bounds.len() > MAX_SYMBOLS {
            return Err(Error::InvalidCdf(format!(
                "{} symbols, expected 1..={MAX_SYMBOLS}",
                bounds.len()
            )));
        }
        if bounds.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidCdf("bounds decrease".into()));
        }
        if bounds[bounds.len() - 1] as u32 != PROB_SCALE {
            return Err(Error::InvalidCdf(format!(
                "last bound {} != {PROB_SCALE}",
                bounds[bounds.len() - 1]
            )));
        }
        Ok(Self { bounds })
    }

    /// Builds a CDF from per-symbol probabilities that sum to the scale.
    ///
    /// # Errors
    /// Same conditions as [`Cdf::new`].
    pub fn from_pdf(pdf: &[u16]) -> Result<Self> {
        let mut acc = 0u32;
        let mut bounds = Vec::with_capacity(pdf.len());
        for &p in pdf {
            acc += p as u32;
            if acc > PROB_SCALE {
                return Err(Error::InvalidCdf(format!("mass {acc} exceeds scale")));
            }
            bounds.push(acc as u16);
        }
        Self::new(bounds)
    }

    /// Number of symbols.
    #[inline]
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Always false for a constructed CDF.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Inclusive cumulative upper bounds.
    #[inline]
    pub fn bounds(&self) -> &[u16] {
        &self.bounds
    }

    /// Cumulative probability of all symbols before `s`.
    #[inline]
    pub fn lower(&self, s: usize) -> u32 {
        if s == 0 {
            0
        } else {
            self.bounds[s - 1] as u32
        }
    }

    /// Cumulative probability of symbols `0..=s`.
    #[inline]
    pub fn upper(&self, s: usize) -> u32 {
        self.bounds[s] as u32
    }

    /// Probability mass of symbol `s`.
    #[inline]
    pub fn freq(&self, s: usize) -> u32 {
        self.upper(s) - self.lower(s)
    }

    /// First symbol whose upper bound exceeds `target` (`target < PROB_SCALE`).
    #[inline]
    pub fn symbol_for(&self, target: u32) -> usize {
        debug_assert!(target < PROB_SCALE);
        let mut s = 0;
        while target >= self.bounds[s] as u32 {
            s += 1;
        }
        s
    }

    /// Ideal cost in bits of coding symbol `s`.
    pub fn cost(&self, s: usize) -> f64 {
        -(self.freq(s) as f64 / PROB_SCALE as f64).log2()
    }
}
