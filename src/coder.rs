//! Backend-neutral coding interface.
//!
//! Every backend writes binary decisions through [`BitWriter`] and reads them
//! back through [`BitReader`]. Code that only speaks these traits cannot tell
//! which backend is active, except for [`BitWriter::is_lifo`]: the rANS
//! backend must be fed in reverse decode order.

use std::fmt;
use std::str::FromStr;

use crate::boolcoder::{BoolReader, BoolWriter};
use crate::error::{Error, Result};
use crate::prob::Probability;
use crate::range::{RangeReader, RangeWriter};
use crate::rans::{AnsReader, AnsWriter};

/// Value of the byte appended after every flushed stream.
///
/// It keeps raw entropy-coded payload from being mistaken for a frame
/// boundary marker when streams are concatenated.
pub const SENTINEL: u8 = 0;

/// Output capacity, in bytes, that is always enough for `decisions` write
/// calls (one bit, one symbol or one literal bit each) on any backend.
///
/// Writers do not check capacity in release builds.
pub const fn worst_case_bound(decisions: usize) -> usize {
    2 * decisions + 16
}

/// Encoder side of a binary entropy coder.
pub trait BitWriter {
    /// Codes one binary decision; `prob` is the probability that `bit` is set.
    fn write_bit(&mut self, bit: bool, prob: Probability);

    /// Flushes pending state, appends [`SENTINEL`] and returns the total
    /// number of bytes written.
    fn finish(self) -> usize
    where
        Self: Sized;

    /// True when decisions must be supplied in reverse decode order.
    #[inline]
    fn is_lifo(&self) -> bool {
        false
    }

    /// Codes the low `bits` bits of `value` at even odds, most significant
    /// bit first in decode order.
    fn write_literal(&mut self, value: u32, bits: u32) {
        if self.is_lifo() {
            for i in 0..bits {
                self.write_bit((value >> i) & 1 != 0, Probability::HALF);
            }
        } else {
            for i in (0..bits).rev() {
                self.write_bit((value >> i) & 1 != 0, Probability::HALF);
            }
        }
    }
}

/// Decoder side of a binary entropy coder.
pub trait BitReader {
    /// Decodes one binary decision coded with `prob`.
    fn read_bit(&mut self, prob: Probability) -> bool;

    /// Decodes a literal written by [`BitWriter::write_literal`].
    fn read_literal(&mut self, bits: u32) -> u32 {
        let mut value = 0;
        for _ in 0..bits {
            value = (value << 1) | self.read_bit(Probability::HALF) as u32;
        }
        value
    }
}

/// Available backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Carry-propagating range coder.
    Range,
    /// Legacy boolean coder.
    Bool,
    /// Byte-aligned rANS (binary decisions use uABS).
    Ans,
}

impl Backend {
    /// All backends, in comparison order.
    pub const ALL: [Backend; 3] = [Backend::Range, Backend::Bool, Backend::Ans];

    /// True when this backend decodes in the reverse of encode order.
    pub const fn is_lifo(self) -> bool {
        matches!(self, Backend::Ans)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Range => "range",
            Backend::Bool => "bool",
            Backend::Ans => "ans",
        })
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "range" | "daala" => Ok(Backend::Range),
            "bool" | "dk" | "vpx" => Ok(Backend::Bool),
            "ans" | "rans" => Ok(Backend::Ans),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

/// A writer whose backend is chosen at construction time.
pub enum Writer<'a> {
    /// Range coder.
    Range(RangeWriter<'a>),
    /// Legacy boolean coder.
    Bool(BoolWriter<'a>),
    /// rANS coder.
    Ans(AnsWriter<'a>),
}

impl<'a> Writer<'a> {
    /// Starts a stream for `backend` in `buf`.
    pub fn new(backend: Backend, buf: &'a mut [u8]) -> Self {
        match backend {
            Backend::Range => Writer::Range(RangeWriter::new(buf)),
            Backend::Bool => Writer::Bool(BoolWriter::new(buf)),
            Backend::Ans => Writer::Ans(AnsWriter::new(buf)),
        }
    }

    /// The backend in use.
    pub fn backend(&self) -> Backend {
        match self {
            Writer::Range(_) => Backend::Range,
            Writer::Bool(_) => Backend::Bool,
            Writer::Ans(_) => Backend::Ans,
        }
    }

    /// Bytes committed so far, for the backends that emit in stream order.
    ///
    /// rANS keeps its output provisional until `finish`, so this is `None`.
    pub fn tell(&self) -> Option<usize> {
        match self {
            Writer::Range(w) => Some(w.tell()),
            Writer::Bool(w) => Some(w.tell()),
            Writer::Ans(_) => None,
        }
    }
}

impl BitWriter for Writer<'_> {
    #[inline]
    fn write_bit(&mut self, bit: bool, prob: Probability) {
        match self {
            Writer::Range(w) => w.write_bit(bit, prob),
            Writer::Bool(w) => w.write_bit(bit, prob),
            Writer::Ans(w) => w.write_bit(bit, prob),
        }
    }

    fn finish(self) -> usize {
        match self {
            Writer::Range(w) => w.finish(),
            Writer::Bool(w) => w.finish(),
            Writer::Ans(w) => w.finish(),
        }
    }

    #[inline]
    fn is_lifo(&self) -> bool {
        self.backend().is_lifo()
    }
}

/// A reader whose backend is chosen at construction time.
pub enum Reader<'a> {
    /// Range coder.
    Range(RangeReader<'a>),
    /// Legacy boolean coder.
    Bool(BoolReader<'a>),
    /// rANS coder.
    Ans(AnsReader<'a>),
}

impl<'a> Reader<'a> {
    /// Opens a stream produced by the matching [`Writer`].
    ///
    /// `buf` must be exactly the bytes reported by `finish`.
    ///
    /// # Errors
    /// Returns `Error::InvalidStream` when an rANS trailer is malformed or a
    /// boolean stream opens with its marker bit set.
    pub fn new(backend: Backend, buf: &'a [u8]) -> Result<Self> {
        Ok(match backend {
            Backend::Range => Reader::Range(RangeReader::new(buf)),
            Backend::Bool => Reader::Bool(BoolReader::new(buf)?),
            Backend::Ans => Reader::Ans(AnsReader::new(buf)?),
        })
    }
}

impl BitReader for Reader<'_> {
    #[inline]
    fn read_bit(&mut self, prob: Probability) -> bool {
        match self {
            Reader::Range(r) => r.read_bit(prob),
            Reader::Bool(r) => r.read_bit(prob),
            Reader::Ans(r) => r.read_bit(prob),
        }
    }
}

/// Encodes `bits` (paired with their probabilities) in decode order,
/// reversing internally for LIFO backends. Returns the stream length.
pub fn encode_bits<W: BitWriter>(mut w: W, decisions: &[(bool, Probability)]) -> usize {
    if w.is_lifo() {
        for &(bit, prob) in decisions.iter().rev() {
            w.write_bit(bit, prob);
        }
    } else {
        for &(bit, prob) in decisions {
            w.write_bit(bit, prob);
        }
    }
    w.finish()
}

/// Decodes one bit per probability, in order.
pub fn decode_bits<R: BitReader>(r: &mut R, probs: impl IntoIterator<Item = Probability>) -> Vec<bool> {
    probs.into_iter().map(|p| r.read_bit(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names_roundtrip() {
        for backend in Backend::ALL {
            let parsed: Backend = backend.to_string().parse().unwrap();
            assert_eq!(parsed, backend);
        }
        assert_eq!("DAALA".parse::<Backend>().unwrap(), Backend::Range);
        assert!("huffman".parse::<Backend>().is_err());
    }

    #[test]
    fn test_dynamic_writer_roundtrip_all_backends() {
        let decisions: Vec<(bool, Probability)> = (0..500u32)
            .map(|i| {
                let p = Probability::new(1 + (i * 7919) % 32767).unwrap();
                ((i * 31) % 7 < 3, p)
            })
            .collect();
        for backend in Backend::ALL {
            let mut buf = vec![0u8; worst_case_bound(decisions.len())];
            let n = encode_bits(Writer::new(backend, &mut buf), &decisions);
            let mut reader = Reader::new(backend, &buf[..n]).unwrap();
            let out = decode_bits(&mut reader, decisions.iter().map(|d| d.1));
            let expected: Vec<bool> = decisions.iter().map(|d| d.0).collect();
            assert_eq!(out, expected, "backend {backend}");
        }
    }

    #[test]
    fn test_tell_never_passes_finished_length() {
        for backend in Backend::ALL {
            let mut buf = vec![0u8; worst_case_bound(2000)];
            let mut w = Writer::new(backend, &mut buf);
            for i in 0..2000u32 {
                w.write_bit(i % 3 == 0, Probability::HALF);
            }
            let committed = w.tell();
            let n = w.finish();
            match committed {
                Some(c) => assert!(c > 200 && c < n, "backend {backend} tell {c} finish {n}"),
                None => assert_eq!(backend, Backend::Ans),
            }
        }
    }

    #[test]
    fn test_reader_rejects_corrupt_headers() {
        assert!(matches!(Reader::new(Backend::Bool, &[0x80, 0]), Err(Error::InvalidStream)));
        assert!(matches!(Reader::new(Backend::Ans, &[0xC0, 0]), Err(Error::InvalidStream)));
        // The range coder has no header to check.
        assert!(Reader::new(Backend::Range, &[0xFF, 0]).is_ok());
    }

    #[test]
    fn test_literals_are_msb_first_on_every_backend() {
        for backend in Backend::ALL {
            let mut buf = vec![0u8; worst_case_bound(64)];
            let mut w = Writer::new(backend, &mut buf);
            if w.is_lifo() {
                w.write_literal(0x2A, 6);
                w.write_literal(0xBEEF, 16);
            } else {
                w.write_literal(0xBEEF, 16);
                w.write_literal(0x2A, 6);
            }
            let n = w.finish();
            let mut r = Reader::new(backend, &buf[..n]).unwrap();
            assert_eq!(r.read_literal(16), 0xBEEF, "backend {backend}");
            assert_eq!(r.read_literal(6), 0x2A, "backend {backend}");
        }
    }
}
