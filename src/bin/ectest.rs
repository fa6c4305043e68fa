//! Comparative entropy coder harness.
//!
//! Draws intra-mode symbols from the CDF of the intra mode tree, codes them
//! with every backend (as tree walks and, where supported, as direct CDF
//! symbols), and reports stream size, timing and decode errors.
//!
//! With `--binary N` it instead codes N raw binary decisions with random
//! per-decision probabilities, decodes them `--repeat` times, and reports
//! each backend's average decode time relative to the boolean coder.
//!
//! ```bash
//! ectest --symbols 10000000 --block-group 0
//! ectest --backend ans --tiles 8 --log-level debug
//! ectest --binary 100000000 --repeat 5
//! ```

use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use entcode::tree::{
    decode_symbols, encode_symbols, intra_mode_tree, tokens_from_tree, tree_to_cdf, Token, Tree,
    BLOCK_SIZE_GROUPS, DEFAULT_IF_Y_PROBS,
};
use entcode::{
    build_decode_table, build_symbol_table, decode_bits, worst_case_bound, AnsReader, AnsWriter,
    Backend, BitWriter, Cdf, Probability, RangeReader, RangeWriter, Reader, WorkerConfig,
    WorkerInterface, WorkerPool, Writer, PROB_SCALE,
};

#[derive(Parser, Debug)]
#[command(name = "ectest")]
#[command(version)]
#[command(about = "Compare entropy coder backends on intra mode symbols", long_about = None)]
struct Args {
    /// Number of symbols to draw
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    symbols: usize,

    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Only run this backend (range, bool, ans)
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Block size group selecting the default probabilities (0 = smallest)
    #[arg(long, default_value_t = 0)]
    block_group: usize,

    /// Split the symbols into this many independently coded tiles
    #[arg(long, default_value_t = 1)]
    tiles: usize,

    /// Run tiles on the calling thread
    #[arg(long)]
    inline: bool,

    /// Code this many raw binary decisions instead of intra mode symbols
    #[arg(long)]
    binary: Option<usize>,

    /// Decode passes per backend in binary mode
    #[arg(long, default_value_t = 5)]
    repeat: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct Report {
    name: String,
    bytes: usize,
    encode: Duration,
    decode: Duration,
    errors: usize,
}

impl Report {
    fn print(&self, symbols: usize) {
        let bits = self.bytes as f64 * 8.0 / symbols.max(1) as f64;
        println!(
            "{:<12} {:>12} bytes {:>8.4} bits/sym  enc {:>9.2} ms  dec {:>9.2} ms  errors {}",
            self.name,
            self.bytes,
            bits,
            self.encode.as_secs_f64() * 1000.0,
            self.decode.as_secs_f64() * 1000.0,
            self.errors
        );
    }
}

fn count_errors(expected: &[usize], decoded: &[usize]) -> usize {
    expected.iter().zip(decoded).filter(|(a, b)| a != b).count()
}

fn draw_symbols(cdf: &Cdf, count: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| cdf.symbol_for(rng.gen_range(0..PROB_SCALE)))
        .collect()
}

fn run_range_cdf(symbols: &[usize], cdf: &Cdf) -> Report {
    let mut buf = vec![0u8; worst_case_bound(symbols.len())];
    let start = Instant::now();
    let mut w = RangeWriter::new(&mut buf);
    for &s in symbols {
        w.write_symbol(s, cdf);
    }
    let bytes = w.finish();
    let encode = start.elapsed();

    let start = Instant::now();
    let mut r = RangeReader::new(&buf[..bytes]);
    let decoded: Vec<usize> = symbols.iter().map(|_| r.read_symbol(cdf)).collect();
    let decode = start.elapsed();

    Report {
        name: "range/cdf".into(),
        bytes,
        encode,
        decode,
        errors: count_errors(symbols, &decoded),
    }
}

fn run_ans_cdf(symbols: &[usize], cdf: &Cdf) -> entcode::Result<Report> {
    let table = build_symbol_table(cdf);
    let dec = build_decode_table(&table);
    let mut buf = vec![0u8; worst_case_bound(symbols.len())];

    let start = Instant::now();
    let mut w = AnsWriter::new(&mut buf);
    for &s in symbols.iter().rev() {
        w.write_symbol(table.get(s));
    }
    let bytes = w.finish();
    let encode = start.elapsed();

    let start = Instant::now();
    let mut r = AnsReader::new(&buf[..bytes])?;
    let decoded: Vec<usize> = symbols.iter().map(|_| r.read_symbol(&dec)).collect();
    let decode = start.elapsed();

    Ok(Report {
        name: "ans/cdf".into(),
        bytes,
        encode,
        decode,
        errors: count_errors(symbols, &decoded),
    })
}

fn run_tree(
    backend: Backend,
    symbols: &[usize],
    tree: &Tree,
    probs: &[u8],
    tokens: &[Token],
) -> entcode::Result<Report> {
    let depth = tokens.iter().map(|t| t.len as usize).max().unwrap_or(0);
    let mut buf = vec![0u8; worst_case_bound(symbols.len() * depth)];

    let start = Instant::now();
    let bytes = encode_symbols(Writer::new(backend, &mut buf), tree, probs, tokens, symbols);
    let encode = start.elapsed();

    let start = Instant::now();
    let mut r = Reader::new(backend, &buf[..bytes])?;
    let decoded = decode_symbols(&mut r, tree, probs, symbols.len());
    let decode = start.elapsed();

    Ok(Report {
        name: format!("{backend}/tree"),
        bytes,
        encode,
        decode,
        errors: count_errors(symbols, &decoded),
    })
}

/// Random decisions with 8-bit zero-branch probabilities in `[1, 255]`.
fn draw_decisions(count: usize, seed: u64) -> Vec<(bool, Probability)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let p8: u8 = rng.gen_range(1..=255);
            let bit = rng.gen_range(0..256u32) >= p8 as u32;
            (bit, Probability::from_zero_branch(p8))
        })
        .collect()
}

struct BinaryReport {
    backend: Backend,
    bytes: usize,
    /// Bytes committed before the final flush, where the backend reports it.
    committed: Option<usize>,
    decode: Duration,
    errors: usize,
}

/// Encodes once, then decodes `repeat` times and keeps the average time.
fn run_binary(
    backend: Backend,
    decisions: &[(bool, Probability)],
    repeat: u32,
) -> entcode::Result<BinaryReport> {
    let mut buf = vec![0u8; worst_case_bound(decisions.len())];
    let mut w = Writer::new(backend, &mut buf);
    if w.is_lifo() {
        for &(bit, p) in decisions.iter().rev() {
            w.write_bit(bit, p);
        }
    } else {
        for &(bit, p) in decisions {
            w.write_bit(bit, p);
        }
    }
    let committed = w.tell();
    let bytes = w.finish();
    debug!(%backend, bytes, ?committed, "binary stream encoded");

    let mut total = Duration::ZERO;
    let mut errors = 0;
    for pass in 0..repeat.max(1) {
        let start = Instant::now();
        let mut r = Reader::new(backend, &buf[..bytes])?;
        let decoded = decode_bits(&mut r, decisions.iter().map(|d| d.1));
        total += start.elapsed();
        errors = decisions.iter().zip(&decoded).filter(|(d, b)| d.0 != **b).count();
        debug!(%backend, pass, errors, "decode pass");
    }

    Ok(BinaryReport {
        backend,
        bytes,
        committed,
        decode: total / repeat.max(1),
        errors,
    })
}

fn print_binary(reports: &[BinaryReport], decisions: usize) {
    let reference = reports
        .iter()
        .find(|r| r.backend == Backend::Bool)
        .map(|r| r.decode.as_secs_f64());
    for r in reports {
        let bits = r.bytes as f64 * 8.0 / decisions.max(1) as f64;
        let relative = match reference {
            Some(t) if t > 0.0 => format!("{:>7.2}% of bool", r.decode.as_secs_f64() / t * 100.0),
            _ => String::new(),
        };
        let committed = r.committed.map_or_else(|| "-".to_string(), |c| c.to_string());
        println!(
            "{:<6} {:>12} bytes ({committed} before flush) {:>8.4} bits/bin  dec {:>9.2} ms {relative}  errors {}",
            r.backend,
            r.bytes,
            bits,
            r.decode.as_secs_f64() * 1000.0,
            r.errors
        );
    }
}

/// Codes each tile on its own worker; a tile fails if it does not decode back.
fn run_tiles(
    backend: Backend,
    symbols: &[usize],
    probs: [u8; 9],
    tiles: usize,
    interface: WorkerInterface,
) -> entcode::Result<Report> {
    let mut pool = WorkerPool::new(WorkerConfig {
        threads: tiles,
        interface,
    })?;
    let chunk = symbols.len().div_ceil(tiles).max(1);
    let jobs: Vec<_> = symbols
        .chunks(chunk)
        .map(|tile| {
            let tile = tile.to_vec();
            move || {
                let tree = intra_mode_tree();
                let tokens = tokens_from_tree(&tree);
                let report = run_tree(backend, &tile, &tree, &probs, &tokens).ok()?;
                (report.errors == 0).then_some((report.bytes, report.encode, report.decode))
            }
        })
        .collect();

    let start = Instant::now();
    let results = pool.run(jobs)?;
    let wall = start.elapsed();
    info!(tiles = results.len(), ?wall, "tiles finished");

    Ok(Report {
        name: format!("{backend}/tiles"),
        bytes: results.iter().map(|r| r.0).sum(),
        encode: results.iter().map(|r| r.1).max().unwrap_or_default(),
        decode: results.iter().map(|r| r.2).max().unwrap_or_default(),
        errors: 0,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let backends: Vec<Backend> = match args.backend {
        Some(b) => vec![b],
        None => Backend::ALL.to_vec(),
    };

    if let Some(count) = args.binary {
        info!(decisions = count, seed = args.seed, repeat = args.repeat, "generating decisions");
        let decisions = draw_decisions(count, args.seed);
        let reports = backends
            .iter()
            .map(|&b| run_binary(b, &decisions, args.repeat))
            .collect::<entcode::Result<Vec<_>>>()?;
        print_binary(&reports, decisions.len());
        let failures: usize = reports.iter().map(|r| r.errors).sum();
        if failures > 0 {
            return Err(format!("{failures} decisions decoded incorrectly").into());
        }
        return Ok(());
    }

    if args.block_group >= BLOCK_SIZE_GROUPS {
        return Err(format!("block group must be below {BLOCK_SIZE_GROUPS}").into());
    }
    let probs = DEFAULT_IF_Y_PROBS[args.block_group];
    let tree = intra_mode_tree();
    let tokens = tokens_from_tree(&tree);
    let cdf = tree_to_cdf(&tree, &probs)?;

    for s in 0..cdf.len() {
        let f = cdf.freq(s);
        println!("{s}: {f} ({:.6})", f as f64 / PROB_SCALE as f64);
    }

    info!(symbols = args.symbols, seed = args.seed, "generating symbols");
    let symbols = draw_symbols(&cdf, args.symbols, args.seed);
    let mut counts = vec![0usize; cdf.len()];
    for &s in &symbols {
        counts[s] += 1;
    }
    for (s, c) in counts.iter().enumerate() {
        println!("{s}: {c} ({:.6})", *c as f64 / symbols.len().max(1) as f64);
    }

    let interface = if args.inline {
        WorkerInterface::Inline
    } else {
        WorkerInterface::Threaded
    };

    let mut failures = 0;
    for backend in backends {
        let mut reports = vec![run_tree(backend, &symbols, &tree, &probs, &tokens)?];
        match backend {
            Backend::Range => reports.push(run_range_cdf(&symbols, &cdf)),
            Backend::Ans => reports.push(run_ans_cdf(&symbols, &cdf)?),
            Backend::Bool => {}
        }
        if args.tiles > 1 {
            reports.push(run_tiles(backend, &symbols, probs, args.tiles, interface)?);
        }
        for report in &reports {
            report.print(symbols.len());
            failures += report.errors;
        }
    }

    if failures > 0 {
        return Err(format!("{failures} symbols decoded incorrectly").into());
    }
    Ok(())
}
