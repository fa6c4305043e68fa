use entcode::rans::RANS_PRECISION;
use entcode::tree::{
    decode_symbols, encode_symbols, intra_mode_tree, tokens_from_tree, tree_to_cdf,
};
use entcode::{
    build_decode_table, build_symbol_table, decode_bits, encode_bits, worst_case_bound, AnsReader,
    AnsWriter, Backend, BitWriter, Cdf, Probability, RangeReader, RangeWriter, Reader, Writer,
    PROB_SCALE, SENTINEL,
};
use proptest::prelude::*;

/// Per-symbol masses summing to the scale; zero masses only if `allow_zero`.
fn pdf_strategy(allow_zero: bool) -> impl Strategy<Value = Vec<u16>> {
    let lo = if allow_zero { 0u16 } else { 1u16 };
    prop::collection::vec(lo..2000, 1..=16).prop_map(|mut pdf| {
        let used: u32 = pdf.iter().map(|&p| p as u32).sum();
        let last = pdf.len() - 1;
        pdf[last] += (PROB_SCALE - used) as u16;
        pdf
    })
}

fn backend_strategy() -> impl Strategy<Value = Backend> {
    prop::sample::select(Backend::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_binary_roundtrip_any_backend(
        backend in backend_strategy(),
        decisions in prop::collection::vec((any::<bool>(), 1u32..PROB_SCALE), 0..500),
    ) {
        let decisions: Vec<(bool, Probability)> = decisions
            .into_iter()
            .map(|(b, p)| (b, Probability::new(p).unwrap()))
            .collect();
        let mut buf = vec![0u8; worst_case_bound(decisions.len())];
        let n = encode_bits(Writer::new(backend, &mut buf), &decisions);
        prop_assert_eq!(buf[n - 1], SENTINEL);

        let mut r = Reader::new(backend, &buf[..n]).unwrap();
        let out = decode_bits(&mut r, decisions.iter().map(|d| d.1));
        let expected: Vec<bool> = decisions.iter().map(|d| d.0).collect();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn test_range_cdf_roundtrip(
        pdf in pdf_strategy(false),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..300),
    ) {
        let cdf = Cdf::from_pdf(&pdf).unwrap();
        let symbols: Vec<usize> = picks.iter().map(|i| i.index(cdf.len())).collect();

        let mut buf = vec![0u8; worst_case_bound(symbols.len())];
        let mut w = RangeWriter::new(&mut buf);
        for &s in &symbols {
            w.write_symbol(s, &cdf);
        }
        let n = w.finish();

        let mut r = RangeReader::new(&buf[..n]);
        let out: Vec<usize> = symbols.iter().map(|_| r.read_symbol(&cdf)).collect();
        prop_assert_eq!(out, symbols);
    }

    #[test]
    fn test_rans_cdf_roundtrip(
        pdf in pdf_strategy(false),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..300),
    ) {
        let cdf = Cdf::from_pdf(&pdf).unwrap();
        let table = build_symbol_table(&cdf);
        let dec = build_decode_table(&table);
        let symbols: Vec<usize> = picks.iter().map(|i| i.index(cdf.len())).collect();

        // Encode in reverse
        let mut buf = vec![0u8; worst_case_bound(symbols.len())];
        let mut w = AnsWriter::new(&mut buf);
        for &s in symbols.iter().rev() {
            w.write_symbol(table.get(s));
        }
        let n = w.finish();

        let mut r = AnsReader::new(&buf[..n]).unwrap();
        let out: Vec<usize> = symbols.iter().map(|_| r.read_symbol(&dec)).collect();
        prop_assert_eq!(out, symbols);
    }

    #[test]
    fn test_symbol_table_always_closes(pdf in pdf_strategy(true)) {
        let cdf = Cdf::from_pdf(&pdf).unwrap();
        let table = build_symbol_table(&cdf);
        prop_assert_eq!(table.total(), RANS_PRECISION);
        for (s, e) in table.entries().iter().enumerate() {
            // Codable in Q15 means codable after requantization.
            prop_assert_eq!(cdf.freq(s) > 0, e.prob > 0);
        }
        let last = table.entries()[table.len() - 1];
        prop_assert_eq!(last.cum_prob as u32 + last.prob as u32, RANS_PRECISION);
    }

    #[test]
    fn test_tree_walk_roundtrip_any_backend(
        backend in backend_strategy(),
        probs in prop::collection::vec(1u8..=255, 9),
        picks in prop::collection::vec(0usize..10, 1..200),
    ) {
        let tree = intra_mode_tree();
        let tokens = tokens_from_tree(&tree);
        let mut buf = vec![0u8; worst_case_bound(picks.len() * 8)];
        let n = encode_symbols(Writer::new(backend, &mut buf), &tree, &probs, &tokens, &picks);
        let mut r = Reader::new(backend, &buf[..n]).unwrap();
        prop_assert_eq!(decode_symbols(&mut r, &tree, &probs, picks.len()), picks);
    }

    #[test]
    fn test_tree_cdf_final_entry_is_scale(probs in prop::collection::vec(any::<u8>(), 9)) {
        let cdf = tree_to_cdf(&intra_mode_tree(), &probs).unwrap();
        prop_assert_eq!(cdf.upper(cdf.len() - 1), PROB_SCALE);
    }
}

#[test]
fn test_boundary_probabilities_every_backend() {
    let decisions: Vec<(bool, Probability)> = (0..3000)
        .map(|i| match i % 4 {
            0 => (true, Probability::MIN),
            1 => (false, Probability::MIN),
            2 => (true, Probability::MAX),
            _ => (false, Probability::MAX),
        })
        .collect();
    for backend in Backend::ALL {
        let mut buf = vec![0u8; worst_case_bound(decisions.len())];
        let mut w = Writer::new(backend, &mut buf);
        if w.is_lifo() {
            for &(bit, p) in decisions.iter().rev() {
                w.write_bit(bit, p);
            }
        } else {
            for &(bit, p) in &decisions {
                w.write_bit(bit, p);
            }
        }
        let n = w.finish();
        assert!(n <= worst_case_bound(decisions.len()), "backend {backend}");
        let mut r = Reader::new(backend, &buf[..n]).unwrap();
        let out = decode_bits(&mut r, decisions.iter().map(|d| d.1));
        assert!(
            out.iter().zip(&decisions).all(|(a, d)| *a == d.0),
            "backend {backend}"
        );
    }
}
