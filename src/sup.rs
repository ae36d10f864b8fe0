/// Supplementary module with the local clock seam and the conversions between
/// UNIX milliseconds and NTP timestamps.
use std::time::{Duration, SystemTime};

use crate::types::{Error, Result, Timestamp};

/// Seconds between the NTP era start (1900-01-01) and the UNIX epoch
/// (1970-01-01), see <https://www.rfc-editor.org/rfc/rfc5905>
pub const NTP_TIMESTAMP_DELTA: u32 = 2_208_988_800u32;
/// SNTP milliseconds in second constant
pub(crate) const MSEC_IN_SEC: i64 = 1_000;

/// A trait encapsulating timestamp generator's operations
///
/// The client reads the local clock through this trait when it stamps a
/// request and when the receive loop stamps a reply, so tests and embedders
/// can supply their own clock. All timestamps are counted from UNIX EPOCH
/// "_1970-01-01 00:00:00 UTC_"
pub trait NtpTimestampGenerator {
    /// Initialize timestamp generator state with `now` system time since UNIX EPOCH.
    /// Expected to be called every time before `timestamp_sec` and
    /// `timestamp_subsec_micros` usage.
    fn init(&mut self);

    /// Returns timestamp in seconds since UNIX EPOCH for the initialized generator
    fn timestamp_sec(&self) -> u64;

    /// Returns the fractional part of the timestamp in whole micro seconds.
    /// That method **should not** return microseconds since UNIX EPOCH
    fn timestamp_subsec_micros(&self) -> u32;

    /// Re-initialize the generator and return milliseconds since UNIX EPOCH
    #[allow(clippy::cast_possible_wrap)]
    fn now_millis(&mut self) -> i64 {
        self.init();
        (self.timestamp_sec() as i64) * MSEC_IN_SEC
            + i64::from(self.timestamp_subsec_micros()) / 1_000
    }
}

/// Standard library timestamp generator wrapper type
/// that relies on `std::time` to provide timestamps during SNTP client operations
#[derive(Copy, Clone, Debug, Default)]
pub struct StdTimestampGen {
    duration: Duration,
}

impl NtpTimestampGenerator for StdTimestampGen {
    fn init(&mut self) {
        self.duration = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
    }

    fn timestamp_sec(&self) -> u64 {
        self.duration.as_secs()
    }

    fn timestamp_subsec_micros(&self) -> u32 {
        self.duration.subsec_micros()
    }
}

/// Convert milliseconds since UNIX EPOCH into an NTP timestamp
///
/// The fraction is rounded to the nearest `1/2^32` of a second.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the time falls outside of NTP era 0
pub fn to_timestamp(millis: i64) -> Result<Timestamp> {
    let seconds = millis.div_euclid(MSEC_IN_SEC);
    let sub_millis = millis.rem_euclid(MSEC_IN_SEC);
    let fraction = ((sub_millis << 32) + MSEC_IN_SEC / 2) / MSEC_IN_SEC;

    Timestamp::new(seconds + i64::from(NTP_TIMESTAMP_DELTA), fraction)
        .map_err(|_| Error::InvalidArgument("time outside of NTP era 0"))
}

/// Convert an NTP timestamp into milliseconds since UNIX EPOCH
#[must_use]
pub fn from_timestamp(timestamp: &Timestamp) -> i64 {
    let seconds =
        i64::from(timestamp.integer()) - i64::from(NTP_TIMESTAMP_DELTA);
    let sub_millis = (i64::from(timestamp.fraction()) * MSEC_IN_SEC) >> 32;

    seconds * MSEC_IN_SEC + sub_millis
}
