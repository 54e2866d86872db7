//! Fuzz target for the throttle guard.
//!
//! Replays arbitrary checks, clock advances and cleanups against a manual
//! clock and checks the record bound after every step.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sluice_throttle::{ThrottleConfig, ThrottleGuard};
use sluice_types::ManualClock;
use std::time::Duration;

#[derive(Debug, Arbitrary)]
enum Op {
    Check { key: u8, cooldown_ms: u16 },
    Advance { ms: u16 },
    Cleanup,
}

#[derive(Debug, Arbitrary)]
struct Input {
    max_records: u8,
    retain_percent: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let config = ThrottleConfig {
        max_records: usize::from(input.max_records).max(1),
        retain_ratio: f64::from(input.retain_percent % 100 + 1) / 100.0,
        ..Default::default()
    };
    let max_records = config.max_records;
    let clock = ManualClock::new();
    let Ok(guard) = ThrottleGuard::with_clock(config, clock.shared()) else {
        return;
    };

    for op in input.ops {
        match op {
            Op::Check { key, cooldown_ms } => {
                let cooldown = Duration::from_millis(u64::from(cooldown_ms));
                let key = format!("event:{key}");
                if guard.should_emit(&key, cooldown) && !cooldown.is_zero() {
                    assert!(!guard.should_emit(&key, cooldown));
                }
            }
            Op::Advance { ms } => clock.advance(Duration::from_millis(u64::from(ms))),
            Op::Cleanup => {
                guard.cleanup();
            }
        }
        assert!(guard.len() <= max_records);
    }

    let stats = guard.stats();
    assert_eq!(stats.records, guard.len());
});
