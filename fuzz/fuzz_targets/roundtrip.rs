#![no_main]
use entcode::{encode_bits, worst_case_bound, Backend, BitReader, Probability, Reader, Writer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u8, Vec<(bool, u16)>)| {
    let (which, raw) = data;
    let backend = Backend::ALL[which as usize % Backend::ALL.len()];

    // Map arbitrary u16 onto [1, 32767].
    let decisions: Vec<(bool, Probability)> = raw
        .into_iter()
        .map(|(bit, p)| (bit, Probability::new_unchecked(1 + p % 32767)))
        .collect();

    let mut buf = vec![0u8; worst_case_bound(decisions.len())];
    let n = encode_bits(Writer::new(backend, &mut buf), &decisions);
    assert_eq!(buf[n - 1], 0);

    let mut r = Reader::new(backend, &buf[..n]).unwrap();
    for &(bit, p) in &decisions {
        assert_eq!(r.read_bit(p), bit);
    }
});
