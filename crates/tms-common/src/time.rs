//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Shared primitives and utilities for the core runtime."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
use std::time::Duration;

/// Signed lateness of a tick against its scheduled instant, in microseconds.
pub fn jitter_us(actual: Duration, expected: Duration) -> i64 {
    let actual_us = actual.as_secs_f64() * 1_000_000.0;
    let expected_us = expected.as_secs_f64() * 1_000_000.0;
    (actual_us - expected_us).round() as i64
}

/// Whole milliseconds of a duration, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
