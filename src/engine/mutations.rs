use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::payment::PaymentGateway;

use super::conflict::{check_no_conflict, now_ms, validate_interval};
use super::{Engine, EngineError, WalCommand};

/// Everything `book_lesson` needs. Times are raw so an inverted interval is
/// rejected as a value, not a panic.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub id: Ulid,
    pub teacher_id: Ulid,
    pub student_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub lesson_type: LessonType,
    pub level: LessonLevel,
    pub price: f64,
    pub currency: String,
    pub max_participants: u32,
    pub meeting: Option<Meeting>,
}

fn validate_fields(req: &BookingRequest) -> Result<(), EngineError> {
    if !(req.price >= 0.0 && req.price.is_finite()) {
        return Err(EngineError::LimitExceeded("price must be non-negative"));
    }
    if req.currency.len() != 3 || !req.currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(EngineError::LimitExceeded(
            "currency must be a 3-letter ISO 4217 code",
        ));
    }
    if req.max_participants == 0 || req.max_participants > MAX_STUDENTS_PER_LESSON {
        return Err(EngineError::LimitExceeded("participant limit out of range"));
    }
    if req.lesson_type == LessonType::Individual && req.max_participants != 1 {
        return Err(EngineError::LimitExceeded(
            "individual lessons take a single student",
        ));
    }
    if let Some(m) = &req.meeting {
        for field in [&m.url, &m.meeting_id, &m.password].into_iter().flatten() {
            if field.len() > MAX_MEETING_FIELD_LEN {
                return Err(EngineError::LimitExceeded("meeting field too long"));
            }
        }
    }
    Ok(())
}

impl Engine {
    /// Timing policy shared by booking and rescheduling: lead time, advance
    /// window, business hours — in that order, all before any mutation.
    fn validate_timing(&self, start: Ms, now: Ms) -> Result<(), EngineError> {
        if start - now < self.policy.min_notice_ms {
            return Err(EngineError::InsufficientNotice);
        }
        if start - now > self.policy.max_advance_ms {
            return Err(EngineError::TooFarInAdvance);
        }
        if !self.policy.calendar.in_business_hours(start) {
            return Err(EngineError::OutsideBusinessHours);
        }
        Ok(())
    }

    /// Create the conflict scope for a teacher. Lessons can only be booked
    /// against a registered teacher.
    pub async fn register_teacher(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_TEACHERS {
            return Err(EngineError::LimitExceeded("too many teachers"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("teacher name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::TeacherRegistered {
            id,
            name: name.clone(),
            at: now_ms(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(TeacherBook::new(id, name))));
        self.notify.send(id, &event);
        metrics::gauge!(crate::observability::TEACHERS_ACTIVE).set(self.state.len() as f64);
        Ok(())
    }

    /// Book a lesson. Validation order: interval, lead time, advance window,
    /// business hours, field shapes — then, under the teacher's write lock,
    /// the conflict check and the journal append. Nothing is written unless
    /// everything passes.
    pub async fn book_lesson(&self, req: BookingRequest) -> Result<Lesson, EngineError> {
        let span = validate_interval(req.start, req.end)?;
        let now = now_ms();
        self.validate_timing(span.start, now)?;
        validate_fields(&req)?;

        let book = self
            .get_teacher(&req.teacher_id)
            .ok_or(EngineError::NotFound(req.teacher_id))?;
        let mut guard = book.write().await;
        if guard.lessons.len() >= MAX_LESSONS_PER_TEACHER {
            return Err(EngineError::LimitExceeded("too many lessons for teacher"));
        }

        check_no_conflict(&guard, &span, None).inspect_err(|_| {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        })?;

        let status = if self.policy.require_payment {
            LessonStatus::Pending
        } else {
            LessonStatus::Scheduled
        };
        let lesson = Lesson {
            id: req.id,
            teacher_id: req.teacher_id,
            students: vec![req.student_id],
            span,
            lesson_type: req.lesson_type,
            level: req.level,
            price: req.price,
            currency: req.currency,
            status,
            max_participants: req.max_participants,
            meeting: req.meeting,
            created_at: now,
            updated_at: now,
        };

        let event = Event::LessonBooked {
            lesson: lesson.clone(),
        };
        self.persist_and_apply(req.teacher_id, &mut guard, &event)
            .await?;
        Ok(lesson)
    }

    /// Promote a pending lesson to scheduled once its payment is confirmed.
    /// The gateway round-trip happens outside the teacher lock; the status is
    /// re-checked afterwards, so a lesson reaped or cancelled in the meantime
    /// fails the transition rather than resurrecting.
    pub async fn confirm_lesson(
        &self,
        id: Ulid,
        gateway: &dyn PaymentGateway,
    ) -> Result<Lesson, EngineError> {
        {
            let teacher_id = self
                .teacher_for_lesson(&id)
                .ok_or(EngineError::NotFound(id))?;
            let book = self
                .get_teacher(&teacher_id)
                .ok_or(EngineError::NotFound(teacher_id))?;
            let guard = book.read().await;
            let lesson = guard.lesson(&id).ok_or(EngineError::NotFound(id))?;
            if lesson.status != LessonStatus::Pending {
                return Err(EngineError::InvalidTransition {
                    from: lesson.status,
                    op: "confirm",
                });
            }
        }

        let confirmed = gateway
            .is_payment_confirmed(id)
            .await
            .map_err(EngineError::PaymentGateway)?;
        if !confirmed {
            return Err(EngineError::PaymentNotConfirmed(id));
        }

        let (teacher_id, mut guard) = self.resolve_lesson_write(&id).await?;
        let lesson = guard.lesson(&id).ok_or(EngineError::NotFound(id))?;
        if lesson.status != LessonStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: lesson.status,
                op: "confirm",
            });
        }

        let event = Event::LessonConfirmed {
            id,
            teacher_id,
            at: now_ms(),
        };
        self.persist_and_apply(teacher_id, &mut guard, &event).await?;
        Ok(guard.lesson(&id).cloned().expect("lesson just confirmed"))
    }

    /// Move a lesson to a new interval. The new window passes the full timing
    /// policy and a conflict check that excludes the lesson itself.
    pub async fn update_schedule(
        &self,
        id: Ulid,
        new_start: Ms,
        new_end: Ms,
    ) -> Result<Lesson, EngineError> {
        let span = validate_interval(new_start, new_end)?;
        let now = now_ms();
        let (teacher_id, mut guard) = self.resolve_lesson_write(&id).await?;
        let lesson = guard.lesson(&id).ok_or(EngineError::NotFound(id))?;
        if lesson.status.is_terminal() || lesson.span.start <= now {
            return Err(EngineError::InvalidTransition {
                from: lesson.status,
                op: "reschedule",
            });
        }
        self.validate_timing(span.start, now)?;
        check_no_conflict(&guard, &span, Some(id)).inspect_err(|_| {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        })?;

        let event = Event::LessonRescheduled {
            id,
            teacher_id,
            span,
            at: now,
        };
        self.persist_and_apply(teacher_id, &mut guard, &event).await?;
        Ok(guard.lesson(&id).cloned().expect("lesson just rescheduled"))
    }

    /// Cancel from `pending` or `scheduled`. Cancelling a terminal lesson is
    /// an error, not a silent no-op, and leaves the record untouched.
    pub async fn cancel_lesson(&self, id: Ulid) -> Result<Lesson, EngineError> {
        let (teacher_id, mut guard) = self.resolve_lesson_write(&id).await?;
        let lesson = guard.lesson(&id).ok_or(EngineError::NotFound(id))?;
        if lesson.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: lesson.status,
                op: "cancel",
            });
        }

        let event = Event::LessonCancelled {
            id,
            teacher_id,
            at: now_ms(),
        };
        self.persist_and_apply(teacher_id, &mut guard, &event).await?;
        Ok(guard.lesson(&id).cloned().expect("lesson just cancelled"))
    }

    /// Mark a scheduled lesson as delivered. Valid only from `scheduled`.
    pub async fn complete_lesson(&self, id: Ulid) -> Result<Lesson, EngineError> {
        let (teacher_id, mut guard) = self.resolve_lesson_write(&id).await?;
        let lesson = guard.lesson(&id).ok_or(EngineError::NotFound(id))?;
        if lesson.status != LessonStatus::Scheduled {
            return Err(EngineError::InvalidTransition {
                from: lesson.status,
                op: "complete",
            });
        }

        let event = Event::LessonCompleted {
            id,
            teacher_id,
            at: now_ms(),
        };
        self.persist_and_apply(teacher_id, &mut guard, &event).await?;
        Ok(guard.lesson(&id).cloned().expect("lesson just completed"))
    }

    /// Enroll another student into a scheduled group lesson.
    pub async fn add_student(&self, id: Ulid, student_id: Ulid) -> Result<Lesson, EngineError> {
        let (teacher_id, mut guard) = self.resolve_lesson_write(&id).await?;
        let lesson = guard.lesson(&id).ok_or(EngineError::NotFound(id))?;
        if lesson.status != LessonStatus::Scheduled {
            return Err(EngineError::InvalidTransition {
                from: lesson.status,
                op: "join",
            });
        }
        if lesson.students.contains(&student_id) {
            return Err(EngineError::AlreadyBooked(student_id));
        }
        if !lesson.is_available() {
            return Err(EngineError::CapacityExceeded(lesson.max_participants));
        }

        let event = Event::StudentJoined {
            id,
            teacher_id,
            student_id,
            at: now_ms(),
        };
        self.persist_and_apply(teacher_id, &mut guard, &event).await?;
        Ok(guard.lesson(&id).cloned().expect("student just joined"))
    }

    /// Withdraw a student. The count never goes below zero because unknown
    /// students are rejected before anything is written.
    pub async fn remove_student(&self, id: Ulid, student_id: Ulid) -> Result<Lesson, EngineError> {
        let (teacher_id, mut guard) = self.resolve_lesson_write(&id).await?;
        let lesson = guard.lesson(&id).ok_or(EngineError::NotFound(id))?;
        if lesson.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: lesson.status,
                op: "withdraw from",
            });
        }
        if !lesson.students.contains(&student_id) {
            return Err(EngineError::NotFound(student_id));
        }

        let event = Event::StudentLeft {
            id,
            teacher_id,
            student_id,
            at: now_ms(),
        };
        self.persist_and_apply(teacher_id, &mut guard, &event).await?;
        Ok(guard.lesson(&id).cloned().expect("student just left"))
    }

    /// Pending lessons whose payment window has lapsed. Read-only scan; the
    /// reaper cancels them through the normal lifecycle operation.
    pub fn collect_expired_pending(&self, now: Ms) -> Vec<Ulid> {
        let window = self.policy.payment_window_ms;
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let book = entry.value().clone();
            if let Ok(guard) = book.try_read() {
                for lesson in &guard.lessons {
                    if lesson.status == LessonStatus::Pending && lesson.created_at + window <= now {
                        expired.push(lesson.id);
                    }
                }
            }
        }
        expired
    }

    /// Rewrite the journal as the minimal event sequence reproducing current
    /// state: one registration per teacher, one booked-event per lesson
    /// (lessons embed their full current state, transitions included).
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        // Snapshot the handles first so no DashMap shard lock is held while
        // awaiting the per-teacher read locks.
        let books: Vec<super::SharedTeacherBook> =
            self.state.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for book in books {
            let guard = book.read().await;
            events.push(Event::TeacherRegistered {
                id: guard.id,
                name: guard.name.clone(),
                at: 0,
            });
            for lesson in &guard.lessons {
                events.push(Event::LessonBooked {
                    lesson: lesson.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
