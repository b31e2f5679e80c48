use ulid::Ulid;

use crate::limits::*;
use crate::model::{Ms, Span, TeacherBook};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate a raw `[start, end)` request before a `Span` is ever built.
pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval);
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_LESSON_DURATION_MS {
        return Err(EngineError::LimitExceeded("lesson too long"));
    }
    Ok(Span::new(start, end))
}

/// Per-teacher conflict check. Scans only lessons overlapping the window
/// (half-open, strict), skipping cancelled lessons and — when validating an
/// update against itself — one excluded id. Pure query, no side effects.
pub(crate) fn check_no_conflict(
    book: &TeacherBook,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for lesson in book.overlapping(span) {
        if !lesson.is_active() {
            continue;
        }
        if exclude == Some(lesson.id) {
            continue;
        }
        return Err(EngineError::SlotConflict(lesson.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn lesson(start: Ms, end: Ms, status: LessonStatus) -> Lesson {
        Lesson {
            id: Ulid::new(),
            teacher_id: Ulid::new(),
            students: vec![Ulid::new()],
            span: Span::new(start, end),
            lesson_type: LessonType::Individual,
            level: LessonLevel::Intermediate,
            price: 30.0,
            currency: "EUR".into(),
            status,
            max_participants: 1,
            meeting: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn book_with(lessons: Vec<Lesson>) -> TeacherBook {
        let mut book = TeacherBook::new(Ulid::new(), None);
        for l in lessons {
            book.insert_lesson(l);
        }
        book
    }

    #[test]
    fn overlap_is_a_conflict() {
        let book = book_with(vec![lesson(1000, 2000, LessonStatus::Scheduled)]);
        let result = check_no_conflict(&book, &Span::new(1500, 2500), None);
        assert!(matches!(result, Err(EngineError::SlotConflict(_))));
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        let book = book_with(vec![lesson(1000, 2000, LessonStatus::Scheduled)]);
        assert!(check_no_conflict(&book, &Span::new(2000, 3000), None).is_ok());
        assert!(check_no_conflict(&book, &Span::new(0, 1000), None).is_ok());
    }

    #[test]
    fn cancelled_lessons_do_not_conflict() {
        let book = book_with(vec![lesson(1000, 2000, LessonStatus::Cancelled)]);
        assert!(check_no_conflict(&book, &Span::new(1000, 2000), None).is_ok());
    }

    #[test]
    fn pending_lessons_hold_their_slot() {
        let book = book_with(vec![lesson(1000, 2000, LessonStatus::Pending)]);
        let result = check_no_conflict(&book, &Span::new(1000, 2000), None);
        assert!(matches!(result, Err(EngineError::SlotConflict(_))));
    }

    #[test]
    fn exclusion_lets_a_lesson_keep_its_own_slot() {
        let l = lesson(1000, 2000, LessonStatus::Scheduled);
        let id = l.id;
        let book = book_with(vec![l]);
        // Shrinking within its own window conflicts only with itself.
        assert!(check_no_conflict(&book, &Span::new(1200, 1800), Some(id)).is_ok());
        assert!(matches!(
            check_no_conflict(&book, &Span::new(1200, 1800), None),
            Err(EngineError::SlotConflict(_))
        ));
    }

    #[test]
    fn validate_interval_rejects_inverted() {
        assert!(matches!(
            validate_interval(2000, 1000),
            Err(EngineError::InvalidInterval)
        ));
        assert!(matches!(
            validate_interval(1000, 1000),
            Err(EngineError::InvalidInterval)
        ));
    }

    #[test]
    fn validate_interval_rejects_out_of_range() {
        assert!(matches!(
            validate_interval(-5, 1000),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_interval(0, MAX_VALID_TIMESTAMP_MS + 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn validate_interval_rejects_marathon_lessons() {
        let result = validate_interval(0, MAX_LESSON_DURATION_MS + 1);
        assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    }
}
