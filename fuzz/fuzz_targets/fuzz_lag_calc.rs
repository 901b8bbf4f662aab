//! Fuzz target for lag and start time calculation.
//!
//! This tests that `lag_seconds` and `start_timestamp` never panic on
//! arbitrary clocks and cluster times.

#![no_main]

use changestream_mirror::stream::{lag_seconds, start_timestamp};
use chrono::{TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use mongodb::bson::Timestamp;

fuzz_target!(|data: (u32, u32, i64, u32)| {
    let (time, increment, now, hours) = data;

    // Should never panic
    let lag = lag_seconds(Timestamp { time, increment }, now);
    if now <= i64::from(time) {
        assert_eq!(lag, 0);
    }

    if let Some(now) = Utc.timestamp_opt(now, 0).single() {
        let start = start_timestamp(now, hours);
        assert_eq!(start.increment, 1);
    }
});
