//! Timezone resolution and all-day event boundaries.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_opt(23, 59, 59) {
    Some(time) => time,
    None => unreachable!(),
};

/// Longest DST gap we will step across when a local time does not exist.
const MAX_GAP_STEPS: u32 = 4 * 24;
const GAP_STEP_MINUTES: i64 = 15;

/// The configured timezone is not a known IANA identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timezone: {0}")]
pub struct TimezoneConfigError(pub String);

/// Parses an IANA timezone name such as `America/New_York`.
pub fn parse_timezone(name: &str) -> Result<Tz, TimezoneConfigError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimezoneConfigError(name.to_string()))
}

/// Parses a timezone name, falling back to UTC with a warning.
pub fn resolve_timezone(name: &str) -> Tz {
    match parse_timezone(name) {
        Ok(tz) => tz,
        Err(err) => {
            tracing::warn!(error = %err, "falling back to UTC for all-day events");
            Tz::UTC
        }
    }
}

/// Computes the absolute bounds of an all-day event.
///
/// `end_exclusive` follows calendar conventions: a single-day event on D has
/// an end date of D+1. The result starts at local midnight of the first day
/// and ends at 23:59:59 local time of the last covered day, using whichever
/// UTC offset is in force at each of those instants.
pub fn all_day_bounds(
    first_day: NaiveDate,
    end_exclusive: NaiveDate,
    tz: Tz,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let last_day = if end_exclusive > first_day {
        end_exclusive.pred_opt().unwrap_or(first_day)
    } else {
        first_day
    };
    let start = local_instant(first_day.and_time(NaiveTime::MIN), tz);
    let end = local_instant(last_day.and_time(END_OF_DAY), tz);
    (start, end)
}

/// Maps a wall-clock time to an instant.
///
/// Ambiguous times (fall back) take the earlier instant; times inside a
/// spring-forward gap move to the first valid wall-clock time after it.
fn local_instant(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..MAX_GAP_STEPS {
                probe += TimeDelta::minutes(GAP_STEP_MINUTES);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&naive)
        }
    }
}
