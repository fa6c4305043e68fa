#![no_main]
use entcode::{AnsReader, BitReader, Probability};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: Vec<u8>| {
    // Arbitrary input must either be rejected or decode without panicking.
    if let Ok(mut r) = AnsReader::new(&data) {
        for _ in 0..64 {
            r.read_bit(Probability::HALF);
        }
    }
});
