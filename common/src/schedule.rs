// Time-of-day parsing, notification window math and task cron schedules
//
// Dose times are stored as "HH:MM" strings and are interpreted against the
// current calendar day in the configured wall-clock timezone. Periodic task
// schedules use second-precision cron expressions evaluated in a fixed timezone.

use crate::errors::ScheduleError;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref TIME_OF_DAY_PATTERN: Regex =
        Regex::new(r"^([0-1]?[0-9]|2[0-3]):([0-5][0-9])$").expect("Invalid time-of-day pattern");
}

pub const DEFAULT_QUIET_START: TimeOfDay = TimeOfDay { hour: 22, minute: 0 };
pub const DEFAULT_QUIET_END: TimeOfDay = TimeOfDay { hour: 7, minute: 0 };

/// A wall-clock time with minute resolution
///
/// Ordering matches chronological order within a single day, which is the
/// same order zero-padded "HH:MM" strings compare in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Build from hour/minute, rejecting out-of-range values
    pub fn new(hour: u8, minute: u8) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTimeOfDay(format!(
                "{}:{:02}",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Parse "HH:MM" (a single-digit hour is accepted)
    pub fn parse(value: &str) -> Result<Self, ScheduleError> {
        let captures = TIME_OF_DAY_PATTERN
            .captures(value.trim())
            .ok_or_else(|| ScheduleError::InvalidTimeOfDay(value.to_string()))?;

        let hour = captures[1]
            .parse::<u8>()
            .map_err(|_| ScheduleError::InvalidTimeOfDay(value.to_string()))?;
        let minute = captures[2]
            .parse::<u8>()
            .map_err(|_| ScheduleError::InvalidTimeOfDay(value.to_string()))?;

        Self::new(hour, minute)
    }

    /// Wall-clock time of an instant in the given timezone; seconds are dropped
    pub fn from_instant(instant: DateTime<Utc>, tz: Tz) -> Self {
        let local = instant.with_timezone(&tz);
        Self {
            hour: local.hour() as u8,
            minute: local.minute() as u8,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes elapsed since midnight
    pub fn minute_of_day(&self) -> i64 {
        self.hour as i64 * 60 + self.minute as i64
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ScheduleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Decide whether an advance reminder for `scheduled` is due at `current`
///
/// The notify minute is `scheduled - advance_minutes` on the same day with no
/// wrap across midnight. The tolerance must cover at least half of the scan
/// cadence so a tick is never missed.
pub fn should_notify(
    scheduled: TimeOfDay,
    current: TimeOfDay,
    advance_minutes: u32,
    window_minutes: u32,
) -> bool {
    let notify_minute = scheduled.minute_of_day() - advance_minutes as i64;
    let diff = (current.minute_of_day() - notify_minute).abs();
    diff <= window_minutes as i64
}

/// True when two instants are at most `window` apart, in either direction
pub fn is_within_window(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    (a - b).abs() <= window
}

/// Today's occurrence of `time` in `tz`, with zeroed seconds
pub fn scheduled_instant_today(
    now: DateTime<Utc>,
    time: TimeOfDay,
    tz: Tz,
) -> Result<DateTime<Utc>, ScheduleError> {
    let today = now.with_timezone(&tz).date_naive();
    let naive_time = NaiveTime::from_hms_opt(time.hour() as u32, time.minute() as u32, 0)
        .ok_or_else(|| ScheduleError::InvalidTimeOfDay(time.to_string()))?;

    // A time skipped by a DST transition has no instant on this day
    tz.from_local_datetime(&today.and_time(naive_time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            ScheduleError::InvalidTimeOfDay(format!("{} does not exist on {} in {}", time, today, tz))
        })
}

/// Midnight of the current day in `tz`, expressed in UTC
pub fn start_of_day(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    tz.from_local_datetime(&today.and_time(NaiveTime::MIN))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        // Midnight can only vanish in zones that shift at 00:00; fall back to UTC midnight
        .unwrap_or_else(|| today.and_time(NaiveTime::MIN).and_utc())
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Parse and validate a cron expression with second precision
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Next fire time of `schedule` strictly after `after`, evaluated in `timezone`
pub fn next_fire_time(
    schedule: &CronSchedule,
    timezone: Tz,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let reference_in_tz = after.with_timezone(&timezone);

    schedule
        .after(&reference_in_tz)
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::NoNextExecution {
            schedule: schedule.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tod(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(tod("08:00").minute_of_day(), 480);
        assert_eq!(tod("8:05").to_string(), "08:05");
        assert_eq!(tod("23:59").minute_of_day(), 1439);
        assert!(TimeOfDay::parse("24:00").is_err());
        assert!(TimeOfDay::parse("12:60").is_err());
        assert!(TimeOfDay::parse("noon").is_err());
        assert!(TimeOfDay::parse("").is_err());
    }

    #[test]
    fn test_time_of_day_serde_as_string() {
        let json = serde_json::to_string(&tod("07:30")).unwrap();
        assert_eq!(json, "\"07:30\"");
        let back: TimeOfDay = serde_json::from_str("\"22:00\"").unwrap();
        assert_eq!(back, tod("22:00"));
        assert!(serde_json::from_str::<TimeOfDay>("\"25:00\"").is_err());
    }

    #[test]
    fn test_should_notify_window_boundaries() {
        // 08:00 dose with 15 minutes advance notifies around 07:45
        assert!(should_notify(tod("08:00"), tod("07:45"), 15, 5));
        assert!(should_notify(tod("08:00"), tod("07:50"), 15, 5));
        assert!(should_notify(tod("08:00"), tod("07:40"), 15, 5));
        assert!(!should_notify(tod("08:00"), tod("07:39"), 15, 5));
        assert!(!should_notify(tod("08:00"), tod("07:51"), 15, 5));
    }

    #[test]
    fn test_should_notify_does_not_wrap_midnight() {
        // Notify minute would be 23:55 of the previous day; it is never reached
        assert!(!should_notify(tod("00:10"), tod("23:55"), 15, 5));
        assert!(should_notify(tod("00:10"), tod("00:00"), 15, 5));
    }

    #[test]
    fn test_scheduled_instant_today_zeroes_seconds() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 7, 45, 37).unwrap();
        let scheduled = scheduled_instant_today(now, tod("08:00"), chrono_tz::UTC).unwrap();
        assert_eq!(scheduled, Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_scheduled_instant_today_respects_timezone() {
        // 23:30 UTC is already 1 March in Berlin (UTC+1)
        let now = Utc.with_ymd_and_hms(2025, 2, 28, 23, 30, 0).unwrap();
        let scheduled =
            scheduled_instant_today(now, tod("08:00"), chrono_tz::Europe::Berlin).unwrap();
        assert_eq!(scheduled, Utc.with_ymd_and_hms(2025, 3, 1, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_start_of_day() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 17, 5, 0).unwrap();
        assert_eq!(
            start_of_day(now, chrono_tz::UTC),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_is_within_window_is_symmetric() {
        let a = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();
        assert!(is_within_window(a, a + Duration::minutes(5), Duration::minutes(5)));
        assert!(is_within_window(a + Duration::minutes(5), a, Duration::minutes(5)));
        assert!(!is_within_window(a, a + Duration::minutes(6), Duration::minutes(5)));
    }

    #[test]
    fn test_parse_valid_cron_expression() {
        assert!(parse_cron_expression("0 */5 * * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        assert!(parse_cron_expression("invalid").is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("UTC").unwrap(), chrono_tz::UTC);
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_next_fire_time_every_five_minutes() {
        let schedule = parse_cron_expression("0 */5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 1, 7, 42, 10).unwrap();
        let next = next_fire_time(&schedule, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 7, 45, 0).unwrap());
    }

    #[test]
    fn test_next_fire_time_daily_cleanup() {
        let schedule = parse_cron_expression("0 0 2 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap();
        let next = next_fire_time(&schedule, chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 2, 2, 0, 0).unwrap());
    }
}
