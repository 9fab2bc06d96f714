// Quiet-hours evaluation

use crate::models::QuietHours;
use crate::schedule::TimeOfDay;

/// Returns true when notifications must be suppressed at `current`
///
/// A window with `start <= end` is same-day and inclusive on both ends. A
/// window with `start > end` wraps past midnight. `start == end` suppresses
/// only that single minute.
pub fn is_quiet_time(quiet_hours: &QuietHours, current: TimeOfDay) -> bool {
    if !quiet_hours.enabled {
        return false;
    }

    let (start, end) = (quiet_hours.start, quiet_hours.end);

    if start > end {
        current >= start || current <= end
    } else {
        current >= start && current <= end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(enabled: bool, start: &str, end: &str) -> QuietHours {
        QuietHours {
            enabled,
            start: TimeOfDay::parse(start).unwrap(),
            end: TimeOfDay::parse(end).unwrap(),
        }
    }

    fn at(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    #[test]
    fn test_disabled_never_suppresses() {
        let quiet = window(false, "00:00", "23:59");
        assert!(!is_quiet_time(&quiet, at("12:00")));
    }

    #[test]
    fn test_overnight_window() {
        let quiet = window(true, "22:00", "07:00");
        assert!(is_quiet_time(&quiet, at("23:30")));
        assert!(is_quiet_time(&quiet, at("22:00")));
        assert!(is_quiet_time(&quiet, at("03:15")));
        assert!(is_quiet_time(&quiet, at("07:00")));
        assert!(!is_quiet_time(&quiet, at("07:01")));
        assert!(!is_quiet_time(&quiet, at("12:00")));
        assert!(!is_quiet_time(&quiet, at("21:59")));
    }

    #[test]
    fn test_same_day_window() {
        let quiet = window(true, "01:00", "05:00");
        assert!(is_quiet_time(&quiet, at("01:00")));
        assert!(is_quiet_time(&quiet, at("04:59")));
        assert!(is_quiet_time(&quiet, at("05:00")));
        assert!(!is_quiet_time(&quiet, at("00:59")));
        assert!(!is_quiet_time(&quiet, at("05:01")));
    }

    #[test]
    fn test_zero_width_window_suppresses_single_minute() {
        let quiet = window(true, "13:00", "13:00");
        assert!(is_quiet_time(&quiet, at("13:00")));
        assert!(!is_quiet_time(&quiet, at("12:59")));
        assert!(!is_quiet_time(&quiet, at("13:01")));
    }
}
