//! Fuzz target for cache invalidation patterns.
//!
//! Any pattern must parse, and a pattern without `*` matches only itself.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sluice_cache::KeyPattern;

fuzz_target!(|input: (&str, &str)| {
    let (pattern, key) = input;
    let parsed = KeyPattern::parse(pattern);

    let _ = parsed.matches(key);
    if !pattern.contains('*') {
        assert!(parsed.matches(pattern));
        assert_eq!(parsed.matches(key), pattern == key);
    }
});
