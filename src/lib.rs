//! # Entropy coding for block-based video
//!
//! *Three interchangeable entropy coders behind one decision interface.*
//!
//! ## Intuition First
//!
//! A video encoder makes tens of millions of small choices per frame: is this
//! coefficient zero, which of ten intra modes predicts this block best. Each
//! choice comes with a probability from the context model. An entropy coder
//! turns that stream of (choice, probability) pairs into bytes so that a
//! likely choice costs a fraction of a bit and an unlikely one costs several.
//! The decoder replays the same probabilities in the same order and gets the
//! choices back exactly.
//!
//! ## The Problem
//!
//! Several coders exist with different trade-offs:
//! - **Range coding**: narrows an interval per decision; needs carry handling
//!   when a late addition ripples into bytes already produced.
//! - **Boolean coding**: the same idea with an 8-bit range register, as used by
//!   older bitstream dialects.
//! - **rANS**: keeps the whole message in one integer state; fast and
//!   byte-aligned, but decodes in the reverse of encode order.
//!
//! Callers should not care which one runs, beyond that ordering rule.
//!
//! ## Historical Context
//!
//! ```text
//! 1976  Rissanen    Arithmetic coding
//! 1979  Martin      Range coding: byte-wise renormalization
//! 2008  VP8         8-bit boolean coder with eager carry
//! 2009  Duda        Asymmetric numeral systems
//! 2014  Giesen      Interleaved, byte-aligned rANS
//! 2016  AV1 exp.    Daala range coder, rANS and boolean coder side by side
//! ```
//!
//! ## Mathematical Formulation
//!
//! A binary decision with probability `p = P(1)` in Q15 costs
//! `-log2(p / 32768)` bits when it is `1`. Range and boolean coders split the
//! current interval of width `R` at roughly `R * p`. rANS maps state `x` for a
//! symbol of quantized frequency `f` and cumulative start `c` to
//!
//! ```text
//! x' = floor(x / f) * M + (x mod f) + c,     M = 1024
//! ```
//!
//! which is invertible from `x'` alone, back to front.
//!
//! A multi-symbol decision can be coded as a walk down a binary tree (one
//! decision per node) or, after [`tree::tree_to_cdf`], as a single draw from a
//! cumulative distribution. Both cost the same up to rounding.
//!
//! ## Complexity Analysis
//!
//! - **Time**: O(1) per binary decision or symbol; O(depth) per tree walk.
//! - **Space**: a few registers per coder, plus a 1024-entry decode table per
//!   rANS distribution.
//!
//! ## Failure Modes
//!
//! 1. **Order**: feeding rANS in decode order silently yields a stream that
//!    decodes backwards.
//! 2. **Capacity**: writers trust the caller's buffer size
//!    ([`coder::worst_case_bound`]); overflow is only caught in debug builds.
//! 3. **Zero-mass symbols**: legal in a CDF, but coding one is a caller bug.
//!
//! ## Implementation Notes
//!
//! - [`range`], [`boolcoder`] and [`rans`] implement [`BitWriter`] and
//!   [`BitReader`]; [`coder::Writer`] and [`coder::Reader`] select one at
//!   runtime.
//! - Every stream ends with a zero sentinel byte.
//! - [`worker`] runs independent streams (tiles) in parallel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boolcoder;
pub mod coder;
pub mod error;
pub mod prob;
pub mod range;
pub mod rans;
pub mod tree;
pub mod worker;

pub use boolcoder::{BoolReader, BoolWriter};
pub use coder::{
    decode_bits, encode_bits, worst_case_bound, Backend, BitReader, BitWriter, Reader, Writer, SENTINEL,
};
pub use error::{Error, Result};
pub use prob::{Cdf, Probability, PROB_SCALE};
pub use range::{RangeReader, RangeWriter};
pub use rans::{build_decode_table, build_symbol_table, AnsReader, AnsWriter, DecodeTable, SymbolTable};
pub use tree::{tokens_from_tree, tree_to_cdf, Token, Tree};
pub use worker::{WorkerConfig, WorkerInterface, WorkerPool};
