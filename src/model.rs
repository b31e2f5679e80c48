use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC — the only time type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_ms() / MINUTE_MS
    }

    /// Strict half-open overlap: touching endpoints (`self.end == other.start`)
    /// do NOT overlap, so back-to-back lessons coexist.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonStatus {
    Pending,
    Scheduled,
    Completed,
    Cancelled,
}

impl LessonStatus {
    /// Terminal states accept no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, LessonStatus::Completed | LessonStatus::Cancelled)
    }
}

impl std::fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LessonStatus::Pending => "pending",
            LessonStatus::Scheduled => "scheduled",
            LessonStatus::Completed => "completed",
            LessonStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonType {
    Individual,
    Group,
    Workshop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Conferencing coordinates attached to a lesson. Opaque strings — the engine
/// stores and returns them, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub url: Option<String>,
    pub meeting_id: Option<String>,
    pub password: Option<String>,
}

/// The booking unit. Never physically deleted — cancellation is a status
/// transition, which keeps the audit trail intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Ulid,
    pub teacher_id: Ulid,
    /// Enrolled students; the first entry is the original booker.
    pub students: Vec<Ulid>,
    pub span: Span,
    pub lesson_type: LessonType,
    pub level: LessonLevel,
    pub price: f64,
    /// ISO 4217 code, three uppercase ASCII letters.
    pub currency: String,
    pub status: LessonStatus,
    pub max_participants: u32,
    pub meeting: Option<Meeting>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Lesson {
    pub fn duration_minutes(&self) -> i64 {
        self.span.duration_minutes()
    }

    /// Active lessons participate in conflict checks.
    pub fn is_active(&self) -> bool {
        self.status != LessonStatus::Cancelled
    }

    /// A lesson accepts additional students only while scheduled and not full.
    pub fn is_available(&self) -> bool {
        self.status == LessonStatus::Scheduled
            && (self.students.len() as u32) < self.max_participants
    }

    pub fn current_participants(&self) -> u32 {
        self.students.len() as u32
    }
}

/// Per-teacher book of lessons, sorted by `span.start`. One of these lives
/// behind each teacher's `RwLock`; all conflict checks are scoped to it.
#[derive(Debug, Clone)]
pub struct TeacherBook {
    pub id: Ulid,
    pub name: Option<String>,
    pub lessons: Vec<Lesson>,
}

impl TeacherBook {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            lessons: Vec::new(),
        }
    }

    /// Insert keeping the book sorted by lesson start.
    pub fn insert_lesson(&mut self, lesson: Lesson) {
        let pos = self
            .lessons
            .binary_search_by_key(&lesson.span.start, |l| l.span.start)
            .unwrap_or_else(|e| e);
        self.lessons.insert(pos, lesson);
    }

    pub fn lesson(&self, id: &Ulid) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == *id)
    }

    pub fn lesson_mut(&mut self, id: &Ulid) -> Option<&mut Lesson> {
        self.lessons.iter_mut().find(|l| l.id == *id)
    }

    /// Move a lesson to a new interval, preserving sort order.
    pub fn reschedule_lesson(&mut self, id: &Ulid, span: Span, at: Ms) {
        if let Some(pos) = self.lessons.iter().position(|l| l.id == *id) {
            let mut lesson = self.lessons.remove(pos);
            lesson.span = span;
            lesson.updated_at = at;
            self.insert_lesson(lesson);
        }
    }

    /// Lessons whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Lesson> {
        let right_bound = self
            .lessons
            .partition_point(|l| l.span.start < query.end);
        self.lessons[..right_bound]
            .iter()
            .filter(move |l| l.span.end > query.start)
    }
}

/// Journal record format — one event per accepted mutation, replayed at
/// startup to rebuild in-memory state. Transition events carry `at` so replay
/// reconstructs `updated_at` exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    TeacherRegistered {
        id: Ulid,
        name: Option<String>,
        at: Ms,
    },
    LessonBooked {
        lesson: Lesson,
    },
    LessonConfirmed {
        id: Ulid,
        teacher_id: Ulid,
        at: Ms,
    },
    LessonRescheduled {
        id: Ulid,
        teacher_id: Ulid,
        span: Span,
        at: Ms,
    },
    LessonCancelled {
        id: Ulid,
        teacher_id: Ulid,
        at: Ms,
    },
    LessonCompleted {
        id: Ulid,
        teacher_id: Ulid,
        at: Ms,
    },
    StudentJoined {
        id: Ulid,
        teacher_id: Ulid,
        student_id: Ulid,
        at: Ms,
    },
    StudentLeft {
        id: Ulid,
        teacher_id: Ulid,
        student_id: Ulid,
        at: Ms,
    },
}

impl Event {
    /// Short label, used for metrics and notification routing.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TeacherRegistered { .. } => "teacher_registered",
            Event::LessonBooked { .. } => "lesson_booked",
            Event::LessonConfirmed { .. } => "lesson_confirmed",
            Event::LessonRescheduled { .. } => "lesson_rescheduled",
            Event::LessonCancelled { .. } => "lesson_cancelled",
            Event::LessonCompleted { .. } => "lesson_completed",
            Event::StudentJoined { .. } => "student_joined",
            Event::StudentLeft { .. } => "student_left",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(start: Ms, end: Ms) -> Lesson {
        Lesson {
            id: Ulid::new(),
            teacher_id: Ulid::new(),
            students: vec![Ulid::new()],
            span: Span::new(start, end),
            lesson_type: LessonType::Individual,
            level: LessonLevel::Beginner,
            price: 25.0,
            currency: "USD".into(),
            status: LessonStatus::Scheduled,
            max_participants: 1,
            meeting: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap_is_strict() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, not a conflict
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn duration_in_minutes() {
        let s = Span::new(0, 90 * MINUTE_MS);
        assert_eq!(s.duration_minutes(), 90);
    }

    #[test]
    fn terminal_states() {
        assert!(!LessonStatus::Pending.is_terminal());
        assert!(!LessonStatus::Scheduled.is_terminal());
        assert!(LessonStatus::Completed.is_terminal());
        assert!(LessonStatus::Cancelled.is_terminal());
    }

    #[test]
    fn availability_requires_scheduled_and_room() {
        let mut l = lesson(1000, 2000);
        assert!(!l.is_available()); // max 1, one student enrolled
        l.max_participants = 3;
        assert!(l.is_available());
        l.status = LessonStatus::Pending;
        assert!(!l.is_available());
        l.status = LessonStatus::Cancelled;
        assert!(!l.is_active());
    }

    #[test]
    fn book_keeps_lessons_sorted() {
        let mut book = TeacherBook::new(Ulid::new(), None);
        book.insert_lesson(lesson(300, 400));
        book.insert_lesson(lesson(100, 200));
        book.insert_lesson(lesson(200, 300));
        let starts: Vec<Ms> = book.lessons.iter().map(|l| l.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_prunes_disjoint_lessons() {
        let mut book = TeacherBook::new(Ulid::new(), None);
        book.insert_lesson(lesson(100, 200)); // past
        book.insert_lesson(lesson(450, 600)); // hit
        book.insert_lesson(lesson(1000, 1100)); // future

        let hits: Vec<_> = book.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_excludes_adjacent() {
        let mut book = TeacherBook::new(Ulid::new(), None);
        book.insert_lesson(lesson(100, 200));
        let hits: Vec<_> = book.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn reschedule_preserves_order() {
        let mut book = TeacherBook::new(Ulid::new(), None);
        let l = lesson(500, 600);
        let id = l.id;
        book.insert_lesson(l);
        book.insert_lesson(lesson(100, 200));
        book.insert_lesson(lesson(900, 1000));

        book.reschedule_lesson(&id, Span::new(300, 400), 7);
        let starts: Vec<Ms> = book.lessons.iter().map(|l| l.span.start).collect();
        assert_eq!(starts, vec![100, 300, 900]);
        let moved = book.lesson(&id).unwrap();
        assert_eq!(moved.span, Span::new(300, 400));
        assert_eq!(moved.updated_at, 7);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::LessonBooked {
            lesson: lesson(1000, 2000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
