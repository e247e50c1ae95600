//! Timezone offset math for time-shifted playback.
//!
//! The goal: a listener in `user_tz` hears the broadcast at the same local
//! wall-clock hour it aired in the stream's `base_tz`. The shift is the
//! difference between the instants at which both zones show the same
//! reference wall time.
//!
//! A fixed historical reference date keeps the computation stable across
//! requests. This ignores DST differences in effect at request time; see
//! DESIGN.md for the trade-off.

use chrono::{Duration, TimeZone};
use chrono_tz::Tz;

use crate::error::{Error, Result};

/// Resolve an IANA timezone name.
fn lookup(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::Validation(format!("couldn't find timezone {name}")))
}

/// Instant at which `tz` shows the reference wall time 1981-12-06 01:00:00.
fn reference_instant(tz: Tz) -> Result<chrono::DateTime<Tz>> {
    tz.with_ymd_and_hms(1981, 12, 6, 1, 0, 0)
        .earliest()
        .ok_or_else(|| Error::Internal(format!("reference time does not exist in {tz}")))
}

/// Signed playback offset between a stream's native zone and a listener's.
///
/// Positive when the listener is west of (behind) the source: playback
/// rewinds into the buffered window. Negative when the listener is ahead:
/// the target resolves to the newest available chunk.
pub fn offset_between(base_tz: &str, user_tz: &str) -> Result<Duration> {
    let base = reference_instant(lookup(base_tz)?)?;
    let user = reference_instant(lookup(user_tz)?)?;
    Ok(user.signed_duration_since(base))
}
