//! Booking policy configuration, loaded from `TUTORD_*` environment variables.

use std::fmt;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::clock::BusinessCalendar;
use crate::model::{Ms, DAY_MS, HOUR_MS, MINUTE_MS};

#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Timing policy for the booking lifecycle. All durations are pre-converted
/// to `Ms` so the engine never does unit math.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    /// Minimum lead time between "now" and a lesson's start.
    pub min_notice_ms: Ms,
    /// Maximum distance into the future a lesson may start.
    pub max_advance_ms: Ms,
    /// Candidate-slot stepping granularity.
    pub slot_interval_ms: Ms,
    /// Length of a generated candidate slot.
    pub lesson_duration_ms: Ms,
    /// How long an unpaid pending lesson holds its interval.
    pub payment_window_ms: Ms,
    /// When set, new bookings start `Pending` until payment is confirmed.
    pub require_payment: bool,
    pub calendar: BusinessCalendar,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            min_notice_ms: 24 * HOUR_MS,
            max_advance_ms: 30 * DAY_MS,
            slot_interval_ms: 30 * MINUTE_MS,
            lesson_duration_ms: 30 * MINUTE_MS,
            payment_window_ms: 30 * MINUTE_MS,
            require_payment: false,
            calendar: BusinessCalendar::new(chrono_tz::UTC, 9, 21),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError(format!("{key}: cannot parse {raw:?}"))),
        Err(_) => Ok(default),
    }
}

impl SchedulePolicy {
    /// Recognized variables (defaults in parentheses):
    /// `TUTORD_MIN_NOTICE_HOURS` (24), `TUTORD_MAX_ADVANCE_DAYS` (30),
    /// `TUTORD_BUSINESS_HOURS_START` (9), `TUTORD_BUSINESS_HOURS_END` (21),
    /// `TUTORD_SLOT_INTERVAL_MINUTES` (30), `TUTORD_LESSON_DURATION_MINUTES`
    /// (slot interval), `TUTORD_TIMEZONE` (UTC), `TUTORD_REQUIRE_PAYMENT`
    /// (false), `TUTORD_PAYMENT_WINDOW_MINUTES` (30).
    pub fn from_env() -> Result<Self, ConfigError> {
        let min_notice_hours: i64 = env_parse("TUTORD_MIN_NOTICE_HOURS", 24)?;
        let max_advance_days: i64 = env_parse("TUTORD_MAX_ADVANCE_DAYS", 30)?;
        let open_hour: u32 = env_parse("TUTORD_BUSINESS_HOURS_START", 9)?;
        let close_hour: u32 = env_parse("TUTORD_BUSINESS_HOURS_END", 21)?;
        let slot_interval_minutes: i64 = env_parse("TUTORD_SLOT_INTERVAL_MINUTES", 30)?;
        let lesson_duration_minutes: i64 =
            env_parse("TUTORD_LESSON_DURATION_MINUTES", slot_interval_minutes)?;
        let payment_window_minutes: i64 = env_parse("TUTORD_PAYMENT_WINDOW_MINUTES", 30)?;
        let require_payment: bool = env_parse("TUTORD_REQUIRE_PAYMENT", false)?;

        let tz_name = std::env::var("TUTORD_TIMEZONE").unwrap_or_else(|_| "UTC".into());
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| ConfigError(format!("TUTORD_TIMEZONE: unknown zone {tz_name:?}")))?;

        Self::build(
            min_notice_hours,
            max_advance_days,
            open_hour,
            close_hour,
            slot_interval_minutes,
            lesson_duration_minutes,
            payment_window_minutes,
            require_payment,
            tz,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        min_notice_hours: i64,
        max_advance_days: i64,
        open_hour: u32,
        close_hour: u32,
        slot_interval_minutes: i64,
        lesson_duration_minutes: i64,
        payment_window_minutes: i64,
        require_payment: bool,
        tz: Tz,
    ) -> Result<Self, ConfigError> {
        if min_notice_hours < 0 {
            return Err(ConfigError("minimum notice must not be negative".into()));
        }
        if max_advance_days <= 0 {
            return Err(ConfigError("advance window must be positive".into()));
        }
        if max_advance_days * DAY_MS <= min_notice_hours * HOUR_MS {
            return Err(ConfigError(
                "advance window must exceed the minimum notice".into(),
            ));
        }
        if !(open_hour < close_hour && close_hour <= 24) {
            return Err(ConfigError(format!(
                "business hours {open_hour}..{close_hour} are not a valid local-hour range"
            )));
        }
        if slot_interval_minutes <= 0 || lesson_duration_minutes <= 0 {
            return Err(ConfigError(
                "slot interval and lesson duration must be positive".into(),
            ));
        }
        if payment_window_minutes <= 0 {
            return Err(ConfigError("payment window must be positive".into()));
        }

        Ok(Self {
            min_notice_ms: min_notice_hours * HOUR_MS,
            max_advance_ms: max_advance_days * DAY_MS,
            slot_interval_ms: slot_interval_minutes * MINUTE_MS,
            lesson_duration_ms: lesson_duration_minutes * MINUTE_MS,
            payment_window_ms: payment_window_minutes * MINUTE_MS,
            require_payment,
            calendar: BusinessCalendar::new(tz, open_hour, close_hour),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let p = SchedulePolicy::default();
        assert_eq!(p.min_notice_ms, 24 * HOUR_MS);
        assert_eq!(p.max_advance_ms, 30 * DAY_MS);
        assert_eq!(p.slot_interval_ms, 30 * MINUTE_MS);
        assert_eq!(p.lesson_duration_ms, 30 * MINUTE_MS);
        assert!(!p.require_payment);
        assert_eq!(p.calendar.open_hour, 9);
        assert_eq!(p.calendar.close_hour, 21);
    }

    #[test]
    fn rejects_inverted_business_hours() {
        let result = SchedulePolicy::build(24, 30, 21, 9, 30, 30, 30, false, chrono_tz::UTC);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_advance_window_inside_notice() {
        let result = SchedulePolicy::build(48, 1, 9, 21, 30, 30, 30, false, chrono_tz::UTC);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_zero_slot_interval() {
        let result = SchedulePolicy::build(24, 30, 9, 21, 0, 30, 30, false, chrono_tz::UTC);
        assert!(result.is_err());
    }

    #[test]
    fn durations_converted_to_ms() {
        let p = SchedulePolicy::build(12, 14, 8, 18, 45, 60, 15, true, chrono_tz::UTC).unwrap();
        assert_eq!(p.min_notice_ms, 12 * HOUR_MS);
        assert_eq!(p.max_advance_ms, 14 * DAY_MS);
        assert_eq!(p.slot_interval_ms, 45 * MINUTE_MS);
        assert_eq!(p.lesson_duration_ms, 60 * MINUTE_MS);
        assert_eq!(p.payment_window_ms, 15 * MINUTE_MS);
        assert!(p.require_payment);
    }
}
