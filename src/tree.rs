//! Binary symbol trees.
//!
//! A tree is a flat `i16` array. Entries `2k` and `2k + 1` are the 0-branch
//! and 1-branch of node `k`; a non-negative entry is the (even) index of the
//! next node, a negative entry is the bitwise complement of a leaf symbol.
//! The root is node 0. Every node carries an 8-bit probability that its
//! 0-branch is taken.
//!
//! The same tree drives two coding strategies:
//!
//! - walk it one binary decision per node on any [`BitWriter`], or
//! - collapse it into a [`Cdf`] with [`tree_to_cdf`] and code each symbol as a
//!   single multi-symbol decision.
//!
//! Both spend the same number of bits per symbol up to rounding.

use crate::coder::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::prob::{Cdf, Probability, MAX_SYMBOLS, PROB_SCALE};

/// Deepest root-to-leaf path a valid tree can have.
const MAX_DEPTH: usize = MAX_SYMBOLS - 1;

/// A validated symbol tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<i16>,
    symbols: usize,
}

impl Tree {
    /// Validates `nodes` and takes a copy.
    ///
    /// # Errors
    /// Returns `Error::MalformedTree` if the array has odd length, a child
    /// index is odd or out of range, a node is reachable twice or not at all,
    /// or the leaves are not exactly the symbols `0..n` for some
    /// `n <= MAX_SYMBOLS`.
    pub fn new(nodes: &[i16]) -> Result<Self> {
        if nodes.is_empty() || nodes.len() % 2 != 0 {
            return Err(Error::MalformedTree(format!("length {}", nodes.len())));
        }
        let internal = nodes.len() / 2;
        let mut visited = vec![false; internal];
        let mut seen = [false; MAX_SYMBOLS];
        let mut leaves = 0;

        let mut stack = vec![0usize];
        visited[0] = true;
        while let Some(i) = stack.pop() {
            for &child in &nodes[i..i + 2] {
                if child < 0 {
                    let s = !child as usize;
                    if s >= MAX_SYMBOLS || seen[s] {
                        return Err(Error::MalformedTree(format!("leaf {s} invalid or repeated")));
                    }
                    seen[s] = true;
                    leaves += 1;
                    continue;
                }
                let j = child as usize;
                if j % 2 != 0 || j >= nodes.len() {
                    return Err(Error::MalformedTree(format!("child index {j} at {i}")));
                }
                if visited[j / 2] {
                    return Err(Error::MalformedTree(format!("node {j} reached twice")));
                }
                visited[j / 2] = true;
                stack.push(j);
            }
        }

        if let Some(k) = visited.iter().position(|&v| !v) {
            return Err(Error::MalformedTree(format!("node {} unreachable", 2 * k)));
        }
        if seen[..leaves].iter().any(|&s| !s) {
            return Err(Error::MalformedTree("leaf symbols are not contiguous".into()));
        }
        Ok(Self {
            nodes: nodes.to_vec(),
            symbols: leaves,
        })
    }

    /// The raw node array.
    pub fn nodes(&self) -> &[i16] {
        &self.nodes
    }

    /// Number of leaf symbols.
    pub fn num_symbols(&self) -> usize {
        self.symbols
    }

    /// Number of decision nodes, and so of node probabilities required.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len() / 2
    }

    fn check_probs(&self, probs: &[u8]) -> Result<()> {
        if probs.len() < self.num_nodes() {
            return Err(Error::MalformedTree(format!(
                "{} node probabilities for {} nodes",
                probs.len(),
                self.num_nodes()
            )));
        }
        Ok(())
    }
}

/// Root-to-leaf path of one symbol: `len` decisions, the first one in the
/// most significant used bit of `value`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Token {
    /// Branch taken at each node, first decision highest.
    pub value: u32,
    /// Number of decisions.
    pub len: u8,
}

impl Token {
    /// Branch taken at depth `d`.
    #[inline]
    fn bit(self, d: u8) -> bool {
        (self.value >> (self.len - 1 - d)) & 1 != 0
    }
}

/// Precomputes the path of every symbol, indexed by symbol.
pub fn tokens_from_tree(tree: &Tree) -> Vec<Token> {
    let mut tokens = vec![Token::default(); tree.num_symbols()];
    let mut stack = vec![(0usize, Token::default())];
    while let Some((i, prefix)) = stack.pop() {
        for b in 0..2 {
            let token = Token {
                value: (prefix.value << 1) | b,
                len: prefix.len + 1,
            };
            match tree.nodes[i + b as usize] {
                child if child < 0 => tokens[!child as usize] = token,
                child => stack.push((child as usize, token)),
            }
        }
    }
    tokens
}

/// Collapses `tree` with node probabilities `probs` into a Q15 [`Cdf`]
/// ordered by symbol.
///
/// Each node splits its mass as `(mass * p + 128) >> 8` for the 0-branch and
/// the remainder for the 1-branch, so the leaves always total exactly
/// [`PROB_SCALE`]. A leaf whose mass rounds to zero gets an empty interval
/// and must not be coded through the CDF.
///
/// # Errors
/// Returns `Error::MalformedTree` if `probs` has fewer entries than the tree
/// has nodes.
pub fn tree_to_cdf(tree: &Tree, probs: &[u8]) -> Result<Cdf> {
    tree.check_probs(probs)?;
    let mut pdf = vec![0u16; tree.num_symbols()];
    let mut stack = vec![(0usize, PROB_SCALE)];
    while let Some((i, mass)) = stack.pop() {
        let p8 = probs[i / 2].max(1) as u32;
        let zero = (mass * p8 + 128) >> 8;
        for (child, m) in [(tree.nodes[i], zero), (tree.nodes[i + 1], mass - zero)] {
            if child < 0 {
                pdf[!child as usize] = m as u16;
            } else {
                stack.push((child as usize, m));
            }
        }
    }
    Cdf::from_pdf(&pdf)
}

/// Ideal cost in bits of coding `token` by walking the tree.
pub fn token_cost(tree: &Tree, probs: &[u8], token: Token) -> f64 {
    let mut i = 0usize;
    let mut cost = 0.0;
    for d in 0..token.len {
        let bit = token.bit(d);
        cost += Probability::from_zero_branch(probs[i / 2]).cost(bit);
        let next = tree.nodes[i + bit as usize];
        if next < 0 {
            break;
        }
        i = next as usize;
    }
    cost
}

/// Writes one symbol as a sequence of binary decisions.
///
/// On LIFO writers the decisions are pushed deepest first so the reader still
/// sees them root first.
pub fn write_tree<W: BitWriter>(w: &mut W, tree: &Tree, probs: &[u8], token: Token) {
    let mut path = [(false, Probability::HALF); MAX_DEPTH];
    let mut i = 0usize;
    for (d, slot) in path.iter_mut().enumerate().take(token.len as usize) {
        let bit = token.bit(d as u8);
        *slot = (bit, Probability::from_zero_branch(probs[i / 2]));
        let next = tree.nodes[i + bit as usize];
        if next >= 0 {
            i = next as usize;
        }
    }
    let path = &path[..token.len as usize];
    if w.is_lifo() {
        for &(bit, p) in path.iter().rev() {
            w.write_bit(bit, p);
        }
    } else {
        for &(bit, p) in path {
            w.write_bit(bit, p);
        }
    }
}

/// Reads one symbol by walking the tree from the root.
pub fn read_tree<R: BitReader>(r: &mut R, tree: &Tree, probs: &[u8]) -> usize {
    let mut i = 0usize;
    loop {
        let bit = r.read_bit(Probability::from_zero_branch(probs[i / 2]));
        let next = tree.nodes[i + bit as usize];
        if next < 0 {
            return !next as usize;
        }
        i = next as usize;
    }
}

/// Writes `symbols` in decode order through the tree and finishes the stream,
/// reversing the order for LIFO writers. Returns the stream length.
pub fn encode_symbols<W: BitWriter>(
    mut w: W,
    tree: &Tree,
    probs: &[u8],
    tokens: &[Token],
    symbols: &[usize],
) -> usize {
    if w.is_lifo() {
        for &s in symbols.iter().rev() {
            write_tree(&mut w, tree, probs, tokens[s]);
        }
    } else {
        for &s in symbols {
            write_tree(&mut w, tree, probs, tokens[s]);
        }
    }
    w.finish()
}

/// Reads `count` symbols through the tree.
pub fn decode_symbols<R: BitReader>(r: &mut R, tree: &Tree, probs: &[u8], count: usize) -> Vec<usize> {
    (0..count).map(|_| read_tree(r, tree, probs)).collect()
}

/// Intra prediction modes, numbered as they appear in the mode tree leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PredictionMode {
    /// Average of the edge pixels.
    Dc = 0,
    /// Vertical.
    V = 1,
    /// Horizontal.
    H = 2,
    /// Directional, 45 degrees.
    D45 = 3,
    /// Directional, 135 degrees.
    D135 = 4,
    /// Directional, 117 degrees.
    D117 = 5,
    /// Directional, 153 degrees.
    D153 = 6,
    /// Directional, 207 degrees.
    D207 = 7,
    /// Directional, 63 degrees.
    D63 = 8,
    /// True motion.
    Tm = 9,
}

/// Number of intra prediction modes.
pub const INTRA_MODES: usize = 10;

impl PredictionMode {
    /// All modes, by symbol id.
    pub const ALL: [PredictionMode; INTRA_MODES] = [
        PredictionMode::Dc,
        PredictionMode::V,
        PredictionMode::H,
        PredictionMode::D45,
        PredictionMode::D135,
        PredictionMode::D117,
        PredictionMode::D153,
        PredictionMode::D207,
        PredictionMode::D63,
        PredictionMode::Tm,
    ];

    /// Mode for symbol id `s`.
    pub fn from_symbol(s: usize) -> Option<Self> {
        Self::ALL.get(s).copied()
    }

    /// Symbol id of this mode.
    pub const fn symbol(self) -> usize {
        self as usize
    }
}

const fn leaf(mode: PredictionMode) -> i16 {
    !(mode as i16)
}

/// Intra mode tree: DC first, then TM, then V, then the directional modes.
#[rustfmt::skip]
pub const INTRA_MODE_TREE: [i16; 2 * (INTRA_MODES - 1)] = [
    leaf(PredictionMode::Dc), 2,
    leaf(PredictionMode::Tm), 4,
    leaf(PredictionMode::V), 6,
    8, 12,
    leaf(PredictionMode::H), 10,
    leaf(PredictionMode::D135), leaf(PredictionMode::D117),
    leaf(PredictionMode::D45), 14,
    leaf(PredictionMode::D63), 16,
    leaf(PredictionMode::D153), leaf(PredictionMode::D207),
];

/// Number of block size groups with their own luma mode probabilities.
pub const BLOCK_SIZE_GROUPS: usize = 4;

/// Default luma intra mode node probabilities per block size group, smallest
/// blocks first.
pub const DEFAULT_IF_Y_PROBS: [[u8; INTRA_MODES - 1]; BLOCK_SIZE_GROUPS] = [
    [65, 32, 18, 144, 162, 194, 41, 51, 98],
    [132, 68, 18, 165, 217, 196, 45, 40, 78],
    [173, 80, 19, 176, 240, 193, 64, 35, 46],
    [221, 135, 38, 194, 248, 121, 96, 85, 29],
];

/// The intra mode tree, already validated.
pub fn intra_mode_tree() -> Tree {
    Tree {
        nodes: INTRA_MODE_TREE.to_vec(),
        symbols: INTRA_MODES,
    }
}
