#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate simpatch;

fuzz_target!(|data: &[u8]| {
    let mut bytes = data.to_vec();
    match simpatch::patch(&mut bytes) {
        Ok(report) => {
            if !report.changed() {
                assert_eq!(&bytes[..], data);
            }
        }
        Err(err) => {
            assert_eq!(&bytes[..], data);
            assert!(err.diagnostic().len() <= simpatch::error::DIAGNOSTIC_CAPACITY);
        }
    }
    assert_eq!(bytes.len(), data.len());
});
