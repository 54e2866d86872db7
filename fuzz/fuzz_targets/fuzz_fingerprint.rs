//! Fuzz target for request fingerprints.
//!
//! Normalizing an already normalized target must not change the key.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sluice_types::Fingerprint;

fuzz_target!(|input: (&str, &str, &[u8])| {
    let (method, target, body) = input;

    let fingerprint = Fingerprint::request(method, target);
    let prefix = format!("{} ", method.trim().to_ascii_uppercase());
    let normalized = fingerprint
        .as_str()
        .strip_prefix(&prefix)
        .expect("fingerprint starts with the method");
    assert_eq!(Fingerprint::request(method, normalized), fingerprint);

    let with_body = fingerprint.clone().with_body(body);
    assert!(with_body.as_str().starts_with(fingerprint.as_str()));
    assert_eq!(with_body, fingerprint.with_body(body));
});
