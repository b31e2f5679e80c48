use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::SlotIter;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_lesson(&self, id: Ulid) -> Result<Lesson, EngineError> {
        let teacher_id = self
            .teacher_for_lesson(&id)
            .ok_or(EngineError::NotFound(id))?;
        let book = self
            .get_teacher(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = book.read().await;
        guard
            .lesson(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// A teacher's lessons overlapping the window, ascending by start.
    /// Cancelled lessons are included — the schedule is also the audit trail.
    pub async fn teacher_schedule(
        &self,
        teacher_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Lesson>, EngineError> {
        if from >= to {
            return Err(EngineError::InvalidInterval);
        }
        let book = self
            .get_teacher(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = book.read().await;
        Ok(guard.overlapping(&Span::new(from, to)).cloned().collect())
    }

    /// Bookable slots for a teacher across `[from, to)`.
    ///
    /// Snapshots the teacher's active lesson spans under the read lock, then
    /// hands back a lazy iterator — enumeration happens outside the lock, so
    /// a wide window never blocks bookings.
    pub async fn available_slots(
        &self,
        teacher_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<SlotIter, EngineError> {
        if from >= to {
            return Err(EngineError::InvalidInterval);
        }
        if to - from > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let book = self
            .get_teacher(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = book.read().await;

        // The last candidate may extend past `to`, so the busy snapshot is
        // widened by one slot length to catch lessons it could run into.
        let query = Span::new(from, to + self.policy.lesson_duration_ms);
        let busy: Vec<Span> = guard
            .overlapping(&query)
            .filter(|l| l.is_active())
            .map(|l| l.span)
            .collect();

        Ok(SlotIter::new(
            from,
            to,
            self.policy.slot_interval_ms,
            self.policy.lesson_duration_ms,
            self.policy.calendar,
            busy,
        ))
    }
}
