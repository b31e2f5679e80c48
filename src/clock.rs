//! Pure time arithmetic: the business-hours test and slot-boundary stepping.
//!
//! The engine keeps every instant as `Ms` (UTC). Only this module converts
//! into the configured display zone, and only to ask one question: does an
//! instant's local hour fall inside business hours?

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::model::Ms;

#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
    pub tz: Tz,
    /// First bookable local hour, inclusive.
    pub open_hour: u32,
    /// Last bookable local hour, exclusive.
    pub close_hour: u32,
}

impl BusinessCalendar {
    pub fn new(tz: Tz, open_hour: u32, close_hour: u32) -> Self {
        debug_assert!(open_hour < close_hour && close_hour <= 24);
        Self {
            tz,
            open_hour,
            close_hour,
        }
    }

    /// True when the instant's local hour lies in `[open_hour, close_hour)`.
    /// Instants outside chrono's representable range count as closed.
    pub fn in_business_hours(&self, at: Ms) -> bool {
        match DateTime::<Utc>::from_timestamp_millis(at) {
            Some(utc) => {
                let hour = utc.with_timezone(&self.tz).hour();
                self.open_hour <= hour && hour < self.close_hour
            }
            None => false,
        }
    }
}

/// Round `at` up to the next multiple of `step` (epoch-relative). Already
/// aligned instants are returned unchanged.
pub fn align_up(at: Ms, step: Ms) -> Ms {
    let rem = at.rem_euclid(step);
    if rem == 0 { at } else { at + (step - rem) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, MINUTE_MS};

    // 2026-03-02 is a Monday; 00:00 UTC.
    const MONDAY_UTC: Ms = 1_772_409_600_000;

    #[test]
    fn business_hours_utc() {
        let cal = BusinessCalendar::new(chrono_tz::UTC, 9, 21);
        assert!(!cal.in_business_hours(MONDAY_UTC + 8 * HOUR_MS));
        assert!(cal.in_business_hours(MONDAY_UTC + 9 * HOUR_MS));
        assert!(cal.in_business_hours(MONDAY_UTC + 20 * HOUR_MS + 30 * MINUTE_MS));
        assert!(!cal.in_business_hours(MONDAY_UTC + 21 * HOUR_MS));
    }

    #[test]
    fn business_hours_follow_configured_zone() {
        // 09:00 in Tokyo is 00:00 UTC.
        let cal = BusinessCalendar::new(chrono_tz::Asia::Tokyo, 9, 21);
        assert!(cal.in_business_hours(MONDAY_UTC));
        assert!(!cal.in_business_hours(MONDAY_UTC + 12 * HOUR_MS)); // 21:00 JST
        // 09:00 UTC is 18:00 JST — still open.
        assert!(cal.in_business_hours(MONDAY_UTC + 9 * HOUR_MS));
    }

    #[test]
    fn open_boundary_is_inclusive_close_exclusive() {
        let cal = BusinessCalendar::new(chrono_tz::UTC, 9, 21);
        let nine = MONDAY_UTC + 9 * HOUR_MS;
        let just_before_nine = nine - 1;
        assert!(cal.in_business_hours(nine));
        assert!(!cal.in_business_hours(just_before_nine));
        // 20:59:59.999 is still open; 21:00:00.000 is not.
        assert!(cal.in_business_hours(MONDAY_UTC + 21 * HOUR_MS - 1));
        assert!(!cal.in_business_hours(MONDAY_UTC + 21 * HOUR_MS));
    }

    #[test]
    fn align_up_to_slot_boundary() {
        let step = 30 * MINUTE_MS;
        assert_eq!(align_up(0, step), 0);
        assert_eq!(align_up(step, step), step);
        assert_eq!(align_up(step + 1, step), 2 * step);
        assert_eq!(align_up(step - 1, step), step);
    }
}
