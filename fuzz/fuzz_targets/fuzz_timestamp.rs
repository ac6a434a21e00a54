#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use efris_core::time;

#[derive(Arbitrary, Debug)]
struct Input {
    local: String,
    remote: String,
    tolerance_minutes: u32,
}

fuzz_target!(|input: Input| {
    let _ = time::parse_timestamp(&input.local);

    // A synchronized pair always has a measurable drift within tolerance
    if time::is_synchronized(&input.local, &input.remote, input.tolerance_minutes) {
        let drift = time::drift_seconds(&input.local, &input.remote);
        assert!(drift.is_some());
        assert!(drift.unwrap_or_default().unsigned_abs() <= u64::from(input.tolerance_minutes) * 60);
    }
});
