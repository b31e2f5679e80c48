use crate::clock::{align_up, BusinessCalendar};
use crate::model::{Ms, Span};

/// Lazy enumeration of bookable candidate slots.
///
/// Steps candidate windows of `duration` on `interval` boundaries across
/// `[from, until)` and yields, in ascending order, those whose start lies
/// inside business hours and which overlap no busy span. Finite, restartable
/// (`Clone` before iterating), and never materializes the full range.
#[derive(Debug, Clone)]
pub struct SlotIter {
    cursor: Ms,
    until: Ms,
    interval: Ms,
    duration: Ms,
    calendar: BusinessCalendar,
    /// Active lesson spans, sorted by start.
    busy: Vec<Span>,
    /// Index of the first busy span that can still overlap the cursor.
    busy_idx: usize,
}

impl SlotIter {
    pub fn new(
        from: Ms,
        until: Ms,
        interval: Ms,
        duration: Ms,
        calendar: BusinessCalendar,
        mut busy: Vec<Span>,
    ) -> Self {
        busy.sort_by_key(|s| s.start);
        Self {
            cursor: align_up(from, interval),
            until,
            interval,
            duration,
            calendar,
            busy,
            busy_idx: 0,
        }
    }

    fn is_free(&mut self, candidate: &Span) -> bool {
        // The cursor only moves forward, so spans ending at or before the
        // candidate start never match again.
        while self.busy_idx < self.busy.len() && self.busy[self.busy_idx].end <= candidate.start {
            self.busy_idx += 1;
        }
        self.busy[self.busy_idx..]
            .iter()
            .take_while(|b| b.start < candidate.end)
            .all(|b| !b.overlaps(candidate))
    }
}

impl Iterator for SlotIter {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        while self.cursor < self.until {
            let start = self.cursor;
            self.cursor += self.interval;

            if !self.calendar.in_business_hours(start) {
                continue;
            }
            let candidate = Span::new(start, start + self.duration);
            if self.is_free(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, MINUTE_MS};

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    // 2026-03-02T00:00:00Z, a Monday.
    const DAY: Ms = 1_772_409_600_000;

    fn all_day_calendar() -> BusinessCalendar {
        BusinessCalendar::new(chrono_tz::UTC, 0, 24)
    }

    fn nine_to_nine() -> BusinessCalendar {
        BusinessCalendar::new(chrono_tz::UTC, 9, 21)
    }

    #[test]
    fn enumerates_every_slot_when_free() {
        let slots: Vec<Span> = SlotIter::new(
            DAY,
            DAY + 2 * H,
            30 * M,
            30 * M,
            all_day_calendar(),
            vec![],
        )
        .collect();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0], Span::new(DAY, DAY + 30 * M));
        assert_eq!(slots[3], Span::new(DAY + 90 * M, DAY + 2 * H));
    }

    #[test]
    fn respects_business_hours() {
        let slots: Vec<Span> = SlotIter::new(
            DAY,
            DAY + 24 * H,
            30 * M,
            30 * M,
            nine_to_nine(),
            vec![],
        )
        .collect();
        // [9:00, 21:00) on 30-minute boundaries → 24 slots.
        assert_eq!(slots.len(), 24);
        assert_eq!(slots[0].start, DAY + 9 * H);
        assert_eq!(slots.last().unwrap().start, DAY + 20 * H + 30 * M);
    }

    #[test]
    fn one_booked_lesson_excludes_exactly_one_slot() {
        // Business hours 9–21, 30-minute slots, one lesson 10:00–10:30.
        let busy = vec![Span::new(DAY + 10 * H, DAY + 10 * H + 30 * M)];
        let slots: Vec<Span> = SlotIter::new(
            DAY,
            DAY + 24 * H,
            30 * M,
            30 * M,
            nine_to_nine(),
            busy,
        )
        .collect();
        assert_eq!(slots.len(), 23);
        assert!(!slots
            .iter()
            .any(|s| s.start == DAY + 10 * H));
        // The neighbours survive.
        assert!(slots.iter().any(|s| s.start == DAY + 9 * H + 30 * M));
        assert!(slots.iter().any(|s| s.start == DAY + 10 * H + 30 * M));
    }

    #[test]
    fn slot_ending_where_lesson_starts_is_kept() {
        let busy = vec![Span::new(DAY + 10 * H, DAY + 11 * H)];
        let slots: Vec<Span> = SlotIter::new(
            DAY + 9 * H,
            DAY + 12 * H,
            30 * M,
            30 * M,
            all_day_calendar(),
            busy,
        )
        .collect();
        // 9:30–10:00 touches the lesson but does not overlap it.
        assert!(slots.contains(&Span::new(DAY + 9 * H + 30 * M, DAY + 10 * H)));
        assert!(!slots.iter().any(|s| s.start == DAY + 10 * H));
        assert!(!slots.iter().any(|s| s.start == DAY + 10 * H + 30 * M));
        assert!(slots.contains(&Span::new(DAY + 11 * H, DAY + 11 * H + 30 * M)));
    }

    #[test]
    fn long_slots_conflict_with_partial_overlap() {
        // 60-minute slots on 30-minute steps; a lesson at 10:30 kills both
        // the 10:00 and the 10:30 candidate.
        let busy = vec![Span::new(DAY + 10 * H + 30 * M, DAY + 11 * H)];
        let slots: Vec<Span> = SlotIter::new(
            DAY + 10 * H,
            DAY + 12 * H,
            30 * M,
            60 * M,
            all_day_calendar(),
            busy,
        )
        .collect();
        assert!(!slots.iter().any(|s| s.start == DAY + 10 * H));
        assert!(!slots.iter().any(|s| s.start == DAY + 10 * H + 30 * M));
        assert!(slots.iter().any(|s| s.start == DAY + 11 * H));
    }

    #[test]
    fn unaligned_query_start_snaps_to_boundary() {
        let slots: Vec<Span> = SlotIter::new(
            DAY + 7 * M,
            DAY + 2 * H,
            30 * M,
            30 * M,
            all_day_calendar(),
            vec![],
        )
        .collect();
        assert_eq!(slots[0].start, DAY + 30 * M);
        assert!(slots.iter().all(|s| (s.start - DAY) % (30 * M) == 0));
    }

    #[test]
    fn ascending_and_restartable() {
        let busy = vec![Span::new(DAY + H, DAY + 2 * H)];
        let iter = SlotIter::new(DAY, DAY + 4 * H, 30 * M, 30 * M, all_day_calendar(), busy);
        let first: Vec<Span> = iter.clone().collect();
        let second: Vec<Span> = iter.collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn empty_window_yields_nothing() {
        let mut iter = SlotIter::new(DAY, DAY, 30 * M, 30 * M, all_day_calendar(), vec![]);
        assert!(iter.next().is_none());
    }
}
