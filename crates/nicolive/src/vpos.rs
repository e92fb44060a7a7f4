//! Playback position ("vpos") of a comment.
//!
//! Vpos is counted in centiseconds since the broadcast's base time, which is
//! handed out by the player status lookup and fixed for the whole broadcast.

use chrono::{DateTime, TimeDelta, Utc};

const MICROS_PER_CENTISECOND: i64 = 10_000;

/// Vpos of an instant relative to the broadcast base time, truncated toward zero.
pub fn vpos_between(base_time: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    vpos_from_elapsed(at - base_time)
}

/// Vpos of the current wall clock relative to `base_time`.
pub fn vpos_now(base_time: DateTime<Utc>) -> i64 {
    vpos_between(base_time, Utc::now())
}

fn vpos_from_elapsed(elapsed: TimeDelta) -> i64 {
    match elapsed.num_microseconds() {
        Some(micros) => micros / MICROS_PER_CENTISECOND,
        // Only reachable for spans of ~290k years.
        None => elapsed.num_milliseconds() / 10,
    }
}

/// Convert a vpos back to the offset it represents.
pub fn vpos_to_offset(vpos: i64) -> TimeDelta {
    TimeDelta::try_milliseconds(vpos.saturating_mul(10)).unwrap_or(if vpos < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    })
}
